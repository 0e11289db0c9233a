//! Trafficcast: camera ingestion daemon and forecast CLI.

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::sync::Notify;

use trafficcast::{LabelFilter, SqliteConnector, SqliteStore};
use trafficcast_daemon::config::{IngestOverrides, PredictOverrides};
use trafficcast_daemon::feed::feed_for;
use trafficcast_daemon::query::{self, DEFAULT_MIN_CONFIDENCE};
use trafficcast_daemon::{
    resolve_database_path, HttpDetector, IngestConfig, IngestionScheduler, PredictConfig,
    SchedulerConfig,
};

#[derive(Parser)]
#[command(
    name = "trafficcast",
    about = "Traffic camera object counts and short-horizon forecasts",
    version
)]
struct Cli {
    /// Path to the SQLite database.
    #[arg(long, global = true)]
    db: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion loop until interrupted.
    Run {
        /// Detection service endpoint.
        #[arg(long)]
        detector_url: Option<String>,

        /// Open-data camera listing (rows.json).
        #[arg(long, conflicts_with = "feed_file")]
        feed_url: Option<String>,

        /// Local JSON file with the camera list.
        #[arg(long)]
        feed_file: Option<String>,

        /// Seconds between cycle starts.
        #[arg(long)]
        interval: Option<u64>,

        /// Maximum concurrent detector calls.
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// Forecast counts for one camera and print the result as JSON.
    Predict {
        /// Camera id.
        #[arg(long)]
        source: i64,

        /// Number of buckets to forecast.
        #[arg(long, default_value_t = 4)]
        steps: usize,

        /// Path to the forecast ONNX model.
        #[arg(long)]
        model: Option<String>,

        /// Path to the scaler JSON.
        #[arg(long)]
        scaler: Option<String>,

        /// History window length.
        #[arg(long)]
        history_steps: Option<usize>,
    },

    /// Print stored object locations for one camera as JSON.
    Locations {
        /// Camera id.
        #[arg(long)]
        source: i64,

        /// Object label.
        #[arg(long, default_value = "car")]
        label: String,

        /// Only points with confidence above this value.
        #[arg(long, default_value_t = DEFAULT_MIN_CONFIDENCE)]
        min_confidence: f64,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   trafficcast completions bash > ~/.local/share/bash-completion/completions/trafficcast
    ///   trafficcast completions zsh > ~/.zfunc/_trafficcast
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            detector_url,
            feed_url,
            feed_file,
            interval,
            max_concurrent,
        } => {
            let config = IngestConfig::resolve(&IngestOverrides {
                database: cli.db,
                detector_url,
                feed_url,
                feed_file,
                interval_secs: interval,
                max_concurrent,
            })?;
            tracing::info!("Database: {}", config.database_path.display());
            tracing::info!("Detector: {}", config.detector_url);

            let detector = HttpDetector::new(&config.detector_url, config.detector_timeout)?;
            let connector = SqliteConnector::new(&config.database_path);
            let mut scheduler = IngestionScheduler::new(
                detector,
                connector,
                SchedulerConfig {
                    fetch_interval: config.fetch_interval,
                    max_concurrent_detections: config.max_concurrent_detections,
                    labels: LabelFilter::new(&config.target_labels),
                },
            );

            let feed = feed_for(&config.feed, config.detector_timeout)?;
            scheduler.register_sources(feed.as_ref()).await?;

            let shutdown = Arc::new(Notify::new());
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, finishing current cycle");
                    signal.notify_one();
                }
            });

            let cycles = scheduler.run(shutdown).await;
            tracing::info!("Stopped after {cycles} cycles");
        }

        Commands::Predict {
            source,
            steps,
            model,
            scaler,
            history_steps,
        } => {
            let config = PredictConfig::resolve(&PredictOverrides {
                database: cli.db,
                model,
                scaler,
                history_steps,
            })?;
            let forecast = query::forecast(&config, source, steps)?;
            println!("{}", serde_json::to_string_pretty(&forecast)?);
        }

        Commands::Locations {
            source,
            label,
            min_confidence,
        } => {
            let path = resolve_database_path(cli.db.as_deref());
            let store: SqliteStore = query::open_existing(&path)?;
            let points = query::object_locations(&store, source, &label, min_confidence)?;
            println!("{}", serde_json::to_string_pretty(&points)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "trafficcast", &mut std::io::stdout());
        }
    }

    Ok(())
}
