//! Command-line interface for logtap
//!
//! # Usage Examples
//!
//! ## Dump a topic
//! ```bash
//! # Everything from the beginning, as JSON lines on stdout
//! logtap dump \
//!   --brokers localhost:9092 \
//!   --topic events \
//!   --from beginning
//!
//! # Only new records, reading every partition without a group rebalance
//! logtap dump \
//!   --brokers localhost:9092 \
//!   --topic events \
//!   --from end --assign --max-stalls 100000
//!
//! # Resume from a local offset file, mirroring commits back into it
//! logtap dump \
//!   --brokers localhost:9092 \
//!   --topic events \
//!   --from stored --offset-file .logtap-offsets.json
//! ```
//!
//! ## Populate a topic with test records
//! ```bash
//! logtap populate \
//!   --brokers localhost:9092 \
//!   --topic events \
//!   --count 1000
//! ```
//!
//! Log verbosity follows `RUST_LOG`, e.g. `RUST_LOG=logtap=debug`.

use clap::{Parser, Subcommand};
use logtap::kafka::ShutdownToken;
use logtap::{dump, populate};

#[derive(Parser)]
#[command(name = "logtap")]
#[command(about = "Dump and populate Kafka topics through a buffered event source")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume topics and print each event as a JSON line
    Dump {
        #[command(flatten)]
        config: dump::DumpConfig,
    },

    /// Publish sequential test records to a topic
    Populate {
        #[command(flatten)]
        config: populate::PopulateConfig,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Dump { config } => {
            let shutdown = ShutdownToken::new();
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Interrupt received, finishing up");
                        shutdown.cancel();
                    }
                }
            });

            let stats = dump::run_dump(config, shutdown, dump::JsonLineSink::stdout()).await?;
            tracing::info!(
                "Dumped {} events in {:?} ({} stalls, {} commits)",
                stats.events,
                stats.duration,
                stats.stalls,
                stats.source.commits
            );
        }
        Commands::Populate { config } => {
            let stats = populate::run_populate(config).await?;
            tracing::info!(
                "Published {} records in {:?} ({:.1} records/sec)",
                stats.published,
                stats.duration,
                stats.records_per_second()
            );
        }
    }

    Ok(())
}
