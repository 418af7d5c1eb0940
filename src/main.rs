use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use error_stack::{Report, Result, ResultExt};
use indicatif::{HumanBytes, HumanDuration, MultiProgress};
use jiff::civil::Date;
use photo_ingest::progress::ProgressManager;
use photo_ingest::{
    AppError, CancelToken, IngestKeys, Ingestor, SourceCollector, SqliteStore, TransferResult,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "photo-ingest")]
#[command(about = "Copy photos into an event/date/photographer folder hierarchy")]
struct Args {
    /// Settings database holding the destination folder and name history
    #[arg(long, default_value = "photo_ingest.db")]
    settings_db: Utf8PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy files and folders into the destination hierarchy
    Ingest {
        /// Event name
        #[arg(long)]
        event: String,
        /// Photographer name
        #[arg(long)]
        photographer: String,
        /// Event date as YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<Date>,
        /// Destination root; remembered for later runs
        #[arg(long)]
        dest: Option<Utf8PathBuf>,
        /// Files and folders to copy
        #[arg(required = true)]
        paths: Vec<Utf8PathBuf>,
    },
    /// Show or change the destination root
    Destination {
        path: Option<Utf8PathBuf>,
    },
    /// List remembered names matching a query
    Suggest {
        #[arg(value_enum)]
        kind: NameKind,
        #[arg(default_value = "")]
        query: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum NameKind {
    Events,
    Photographers,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_ingest(
    ingestor: &Ingestor<SqliteStore>,
    keys: IngestKeys,
    dest: Option<Utf8PathBuf>,
    paths: Vec<Utf8PathBuf>,
) -> Result<(), AppError> {
    if let Some(dest) = dest {
        ingestor.set_destination_root(&dest).await?;
    }

    let multi = ProgressManager::setup();
    let collect_pb = ProgressManager::create_collect_progress(&multi, "Collecting source files");
    collect_pb.enable_steady_tick(Duration::from_millis(100));

    let mut collector = SourceCollector::new();
    collector.add_paths(&paths);
    collect_pb.finish_with_message(format!(
        "✓ Found {} files ({})",
        collector.len(),
        HumanBytes(collector.total_size())
    ));

    let items = collector.into_items();
    ingestor.validate(&items, &keys).await?;

    let transfer_pb = ProgressManager::create_transfer_progress(&multi, 0);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let drain_pb = transfer_pb.clone();
    let drain = tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            ProgressManager::apply(&drain_pb, &snapshot);
        }
    });

    let cancel = CancelToken::new();
    let ctrl_c_cancel = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let outcome = ingestor.ingest(items, &keys, tx, cancel).await;
    ctrl_c.abort();
    let _ = drain.await;

    match outcome {
        Ok(result) => {
            transfer_pb.finish_with_message("✓ Transfer complete");
            print_summary(&multi, &result);
            Ok(())
        }
        Err(err) => {
            transfer_pb.abandon_with_message("✗ Transfer failed");
            Err(err)
        }
    }
}

fn print_summary(multi: &MultiProgress, result: &TransferResult) {
    let _ = multi.println("");
    println!("TRANSFER SUMMARY:");
    println!("  Destination: {}", result.destination_path);
    if let Some(folder) = &result.versioned_folder_name {
        println!("  Existing files found, new batch placed in: {}", folder);
    }
    println!(
        "  Files copied: {}/{}",
        result.succeeded_files(),
        result.total_files
    );
    println!("  Bytes copied: {}", HumanBytes(result.total_bytes_copied));
    println!(
        "  Duration: {}",
        HumanDuration(Duration::from_secs_f64(result.duration_seconds))
    );
    if result.cancelled {
        println!(
            "  Cancelled after {} of {} files; copied files were kept",
            result.processed_files, result.total_files
        );
    }
    if result.has_errors() {
        eprintln!("  Errors: {}", result.errors.len());
        for error in &result.errors {
            eprintln!("    {}: {}", error.file_name, error.message);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_tracing();
    let args = Args::parse();

    let store = SqliteStore::open(&args.settings_db)
        .await
        .change_context(AppError::Store)?;
    let ingestor = Ingestor::new(store);

    match args.command {
        Commands::Ingest {
            event,
            photographer,
            date,
            dest,
            paths,
        } => {
            let date = date.unwrap_or_else(|| jiff::Zoned::now().date());
            let keys = IngestKeys::new(event, date, photographer);
            run_ingest(&ingestor, keys, dest, paths).await?;
        }
        Commands::Destination { path: Some(path) } => {
            if !path.is_dir() {
                return Err(Report::new(AppError::Validation)
                    .attach_printable(format!("Not a directory: {}", path)));
            }
            ingestor.set_destination_root(&path).await?;
            println!("Destination set to {}", path);
        }
        Commands::Destination { path: None } => match ingestor.destination_root().await? {
            Some(root) => println!("{}", root),
            None => println!("No destination configured"),
        },
        Commands::Suggest { kind, query } => {
            let history = ingestor.history().await?;
            let names = match kind {
                NameKind::Events => history.event_suggestions(&query),
                NameKind::Photographers => history.photographer_suggestions(&query),
            };
            for name in names {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
