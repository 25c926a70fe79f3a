use std::io::{self, Write};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use record_store::import::{BatchCommitted, PreloadOutcome, ReimportPolicy, preload_with_progress};
use record_store::store::FetchDescriptor;
use record_store::{Container, ImportConfig, RecordId, RecordInspector, StoreConfig, init_logger};

#[derive(Parser, Debug)]
#[command(
    name = "record-store",
    about = "Preload and inspect a record store in checkpointed batches"
)]
struct Args {
    /// Use a throwaway in-memory store instead of DATABASE_URL.
    #[arg(long, global = true)]
    in_memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations.
    Migrate,
    /// Drop every record and recreate the schema.
    Reset,
    /// Bulk-import synthetic records, checkpointing after every batch.
    Import {
        /// Total number of records to create.
        #[arg(long)]
        total: Option<usize>,

        /// Records per checkpoint.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Pause after each insertion, in milliseconds.
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Title prefix for generated records.
        #[arg(long)]
        prefix: Option<String>,

        /// Do nothing when the store already holds records.
        #[arg(long)]
        skip_if_populated: bool,
    },
    /// Print the number of committed records.
    Count,
    /// Print one record as JSON.
    Show {
        /// Record identifier (UUID).
        id: String,
    },
    /// Print committed records as JSON lines, in insertion order.
    List {
        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();

    let args = Args::parse();

    let store_config = if args.in_memory {
        StoreConfig::in_memory()
    } else {
        StoreConfig::from_env()
    };

    let container = Container::open(&store_config).await?;
    log::info!("opened {} record store", container.kind());

    match args.command {
        Command::Migrate => {
            // Opening a Postgres container already applied pending migrations.
            println!("schema up to date ({} store)", container.kind());
        }
        Command::Reset => {
            container.reset().await?;
            println!("store reset");
        }
        Command::Import {
            total,
            batch_size,
            delay_ms,
            prefix,
            skip_if_populated,
        } => {
            let mut config = ImportConfig::from_env();
            if let Some(total) = total {
                config.total = total;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(delay_ms) = delay_ms {
                config.insert_delay = Duration::from_millis(delay_ms);
            }
            if let Some(prefix) = prefix {
                config.title_prefix = prefix;
            }

            let policy = if skip_if_populated {
                ReimportPolicy::SkipIfPopulated
            } else {
                ReimportPolicy::Always
            };

            match run_import(&container, config, policy).await? {
                PreloadOutcome::Imported(stats) => println!(
                    "imported {} records in {} checkpoints ({:.1}s)",
                    stats.records,
                    stats.batches,
                    stats.elapsed.as_secs_f64()
                ),
                PreloadOutcome::Skipped { existing } => {
                    println!("skipped: store already holds {existing} records")
                }
            }
        }
        Command::Count => {
            let count = container.new_context().fetch_count().await?;
            println!("{count}");
        }
        Command::Show { id } => {
            let id: RecordId = match id.parse() {
                Ok(id) => id,
                Err(err) => {
                    writeln!(io::stderr(), "error: '{id}' is not a record id: {err}")?;
                    std::process::exit(2);
                }
            };

            let inspector = RecordInspector::spawn(container.clone());
            match inspector.inspect(id).await? {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                None => {
                    writeln!(io::stderr(), "error: record {id} not found")?;
                    std::process::exit(1);
                }
            }
        }
        Command::List { offset, limit } => {
            let mut context = container.new_context();
            let records = context.fetch(FetchDescriptor::page(offset, limit)).await?;

            let stdout = io::stdout();
            let mut out = stdout.lock();
            for record in records {
                writeln!(out, "{}", serde_json::to_string(&record)?)?;
            }
        }
    }

    Ok(())
}

/// Run the preload on a background task while this task reports checkpoints.
async fn run_import(
    container: &Container,
    config: ImportConfig,
    policy: ReimportPolicy,
) -> Result<PreloadOutcome, Box<dyn std::error::Error>> {
    let batch_count = config.batch_count();
    let (tx, mut rx) = mpsc::channel::<BatchCommitted>(16);

    let container = container.clone();
    let task = tokio::spawn(async move {
        preload_with_progress(&container, config, policy, Some(tx)).await
    });

    while let Some(report) = rx.recv().await {
        log::info!(
            "checkpoint {}/{}: {} records committed",
            report.batch,
            batch_count,
            report.committed
        );
    }

    Ok(task.await??)
}
