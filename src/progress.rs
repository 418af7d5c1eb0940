use crate::types::TransferProgress;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

pub struct ProgressManager;

impl ProgressManager {
    pub fn setup() -> MultiProgress {
        MultiProgress::new()
    }

    pub fn create_collect_progress(multi: &MultiProgress, message: &str) -> ProgressBar {
        let collect_pb = multi.add(ProgressBar::new_spinner());
        collect_pb.set_style(
            ProgressStyle::with_template("🔍 {spinner:.green} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
        );
        collect_pb.set_message(message.to_string());
        collect_pb
    }

    /// Position and length are in bytes; the message carries the file count.
    pub fn create_transfer_progress(multi: &MultiProgress, total_bytes: u64) -> ProgressBar {
        let transfer_pb = multi.add(ProgressBar::new(total_bytes));
        transfer_pb.set_style(
            ProgressStyle::with_template(
                "📋 [{elapsed}] {bar:40.cyan/blue} {bytes:>10}/{total_bytes:10} {wide_msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        transfer_pb
    }

    pub fn apply(pb: &ProgressBar, snapshot: &TransferProgress) {
        pb.set_length(snapshot.total_bytes);
        pb.set_position(snapshot.copied_bytes);
        pb.set_message(format!(
            "{}/{} {}",
            snapshot.copied_files, snapshot.total_files, snapshot.current_file_name
        ));
    }
}
