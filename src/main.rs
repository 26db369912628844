use clap::Parser;
use tracing::info;

use zero_export::{Config, Devices, Orchestrator, SqliteRecorder};

/// Keeps grid exchange near zero by steering OpenDTU inverter limits
/// from a Shelly 3EM reading.
#[derive(Parser, Debug)]
#[command(name = "zero-export")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration
    #[arg(short, long, default_value = "zero-export.toml")]
    config: String,

    /// Enable debug mode with detailed logging output
    #[arg(long)]
    debug: bool,

    /// Overrides the SQLite database path from the configuration
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = Config::load(&args.config)?;
    if let Some(db) = args.db {
        config.recorder.path = db;
    }

    let recorder = SqliteRecorder::open(&config.recorder.path)?;
    let devices = Devices::from_config(&config)?;
    let dtu = devices.dtu.clone();

    info!(
        "Starting zero-export control with {} inverters",
        config.inverters.len()
    );
    let mut orchestrator = Orchestrator::new(config, devices, dtu, recorder);

    // Exits non-zero through the returned error.
    orchestrator.preflight().await?;
    info!("Entering control loop");

    orchestrator
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
