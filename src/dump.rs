//! Topic dump: consume topics through a sink chain and hand each event to
//! an output sink.
//!
//! The CLI prints JSON lines to stdout; the end-to-end tests pass a
//! [`CollectorSink`] instead and assert on what arrives. Both go through
//! [`run_dump`] so they exercise the same path.
//!
//! [`CollectorSink`]: event_core::CollectorSink

use anyhow::{Context, Result};
use clap::Parser;
use event_core::{Event, Sink, ThroughputSink};
use logtap_kafka_source::{
    connect, MetricsSnapshot, ReadPolicy, SaslPlainLogin, ShutdownToken, SourceMetrics,
    SourceOptions, StartPosition,
};
use offset_store::{FileOffsetStore, OffsetStore};
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::info;

/// Configuration for the dump command.
#[derive(Debug, Clone, Parser)]
pub struct DumpConfig {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[clap(long, value_delimiter = ',', required = true)]
    pub brokers: Vec<String>,
    /// Topics to consume from (comma-separated or multiple --topic)
    #[clap(long = "topic", value_delimiter = ',', required = true)]
    pub topics: Vec<String>,
    /// Consumer group ID
    #[clap(long, default_value = "logtap-dump")]
    pub group_id: String,
    /// Where to start reading: beginning, earliest, latest, end, or stored
    #[clap(long, default_value = "beginning")]
    pub from: String,
    /// Take every partition of every topic directly instead of joining the
    /// consumer group
    #[clap(long)]
    pub assign: bool,
    /// Codec for record keys (utf8 or base64)
    #[clap(long, default_value = "utf8")]
    pub key_codec: String,
    /// Codec for record values (utf8 or base64)
    #[clap(long, default_value = "utf8")]
    pub value_codec: String,
    /// Maximum records pulled into the read-ahead buffer per broker round trip
    #[clap(long, default_value_t = 500)]
    pub max_fetch_records: usize,
    /// How long a single poll waits for records, in milliseconds
    #[clap(long, default_value_t = 1000)]
    pub poll_timeout_ms: u64,
    /// Stop after this many consecutive polls that found no records.
    /// Streaming dumps that should only stop on interrupt can set this high.
    #[clap(long, default_value_t = 5)]
    pub max_stalls: u32,
    /// Stop after dumping this many events.
    /// Useful when the exact record count is known, as in load tests.
    #[clap(long)]
    pub max_events: Option<u64>,
    /// Disable committing consumed offsets back to the broker
    #[clap(long)]
    pub no_commit: bool,
    /// JSON file holding externally stored offsets. Commits are mirrored to
    /// it; combined with `--from stored` the dump resumes where the previous
    /// run left off.
    #[clap(long)]
    pub offset_file: Option<std::path::PathBuf>,
    /// Log current lag once per this many decoded events
    #[clap(long)]
    pub lag_report_interval: Option<u64>,
    /// Log a throughput line once per this many events
    #[clap(long, default_value_t = 1000)]
    pub log_every: u64,
    /// SASL/PLAIN username
    #[clap(long, env = "LOGTAP_SASL_USERNAME")]
    pub sasl_username: Option<String>,
    /// SASL/PLAIN password
    #[clap(long, env = "LOGTAP_SASL_PASSWORD", hide_env_values = true)]
    pub sasl_password: Option<String>,
    /// Raw client property (format: key=value), applied after everything
    /// the source sets
    #[clap(long = "property", value_name = "KEY=VALUE")]
    pub properties: Vec<String>,
}

impl DumpConfig {
    fn source_options(&self) -> Result<SourceOptions> {
        let mut properties = Vec::new();
        for raw in &self.properties {
            let (key, value) = raw
                .split_once('=')
                .with_context(|| format!("Invalid property '{raw}', expected key=value"))?;
            properties.push((key.to_string(), value.to_string()));
        }
        let sasl = match (&self.sasl_username, &self.sasl_password) {
            (Some(username), Some(password)) => Some(SaslPlainLogin {
                username: username.clone(),
                password: password.clone(),
            }),
            (None, None) => None,
            _ => anyhow::bail!("--sasl-username and --sasl-password must be given together"),
        };
        Ok(SourceOptions {
            brokers: self.brokers.join(","),
            topics: self.topics.clone(),
            group_id: self.group_id.clone(),
            key_codec: self.key_codec.parse()?,
            value_codec: self.value_codec.parse()?,
            max_fetch_records: self.max_fetch_records,
            auto_commit: !self.no_commit,
            lag_report_interval: self.lag_report_interval,
            sasl,
            properties,
        })
    }

    fn read_policy(&self) -> Result<ReadPolicy> {
        let start = match self.from.to_ascii_lowercase().as_str() {
            "beginning" => StartPosition::Beginning,
            "earliest" => StartPosition::Earliest,
            "latest" => StartPosition::Latest,
            "end" => StartPosition::End,
            "stored" => StartPosition::Stored { default_offset: 0 },
            other => anyhow::bail!(
                "Unknown start position '{other}', expected beginning, earliest, latest, end, or stored"
            ),
        };
        Ok(if self.assign {
            ReadPolicy::assign(start)
        } else {
            ReadPolicy::subscribe(start)
        })
    }

    fn offset_store(&self) -> Result<Option<Box<dyn OffsetStore>>> {
        match &self.offset_file {
            Some(path) => {
                let store = FileOffsetStore::open(path)?;
                Ok(Some(Box::new(store)))
            }
            None => Ok(None),
        }
    }
}

/// Counters from a completed dump.
#[derive(Debug, Clone)]
pub struct DumpStats {
    /// Events handed to the output sink.
    pub events: u64,
    /// Polls that found no records within the timeout.
    pub stalls: u32,
    /// Source counters at close.
    pub source: MetricsSnapshot,
    /// Total wall-clock duration.
    pub duration: Duration,
}

/// Run a dump to completion.
///
/// The consumer engine is synchronous, so the whole dump runs on a blocking
/// task. Cancelling the token stops the dump at the next poll; everything
/// consumed so far is still committed on close.
pub async fn run_dump<S>(config: DumpConfig, shutdown: ShutdownToken, output: S) -> Result<DumpStats>
where
    S: Sink<Event> + Send + 'static,
{
    tokio::task::spawn_blocking(move || dump_blocking(config, shutdown, output))
        .await
        .context("Dump worker panicked")?
}

fn dump_blocking<S>(config: DumpConfig, shutdown: ShutdownToken, output: S) -> Result<DumpStats>
where
    S: Sink<Event> + Send,
{
    if config.max_stalls == 0 {
        anyhow::bail!("--max-stalls must be at least 1");
    }
    if config.log_every == 0 {
        anyhow::bail!("--log-every must be at least 1");
    }
    let options = config.source_options()?;
    let policy = config.read_policy()?;
    let store = config.offset_store()?;
    let metrics = SourceMetrics::new();

    info!(
        "Starting dump of {:?} from {} (group {})",
        options.topics, options.brokers, options.group_id
    );

    let mut source = connect(options, policy, store, metrics.clone(), shutdown.clone())?;
    let mut chain = ThroughputSink::new(config.log_every, output);

    let started = Instant::now();
    let poll_timeout = Duration::from_millis(config.poll_timeout_ms);
    let mut events = 0u64;
    let mut stalls = 0u32;
    let mut consecutive_stalls = 0u32;

    let outcome = loop {
        if shutdown.is_cancelled() {
            info!("Shutdown requested, stopping dump after {events} events");
            break Ok(());
        }
        if let Some(max) = config.max_events {
            if events >= max {
                info!("Reached max events limit ({max})");
                break Ok(());
            }
        }
        match source.poll(poll_timeout) {
            Ok(Some(event)) => {
                consecutive_stalls = 0;
                events += 1;
                if let Err(e) = chain.send(event) {
                    break Err(e.context("Output sink rejected an event"));
                }
            }
            Ok(None) => {
                stalls += 1;
                consecutive_stalls += 1;
                info!(
                    "Buffer exhausted, no records within {poll_timeout:?} ({consecutive_stalls}/{})",
                    config.max_stalls
                );
                if consecutive_stalls >= config.max_stalls {
                    break Ok(());
                }
            }
            Err(e) => break Err(e.into()),
        }
    };

    // Close the source first so outstanding progress is committed even when
    // the loop ended on an error.
    let source_closed = source.close();
    let chain_closed = chain.close();
    outcome?;
    source_closed?;
    chain_closed?;

    let stats = DumpStats {
        events,
        stalls,
        source: metrics.snapshot(),
        duration: started.elapsed(),
    };
    info!(
        "Dump complete: {} events in {:?} ({} stalls)",
        stats.events, stats.duration, stats.stalls
    );
    Ok(stats)
}

/// Writes each event as one JSON object per line.
pub struct JsonLineSink<W> {
    writer: W,
}

impl JsonLineSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            writer: std::io::stdout(),
        }
    }
}

impl<W: Write> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> Sink<Event> for JsonLineSink<W> {
    fn send(&mut self, event: Event) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
