use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use shodan_alert_monitor::{
    actors::service::ServiceController, config::read_config_file, stream::ShodanStream,
};
use tokio::time;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// How often crashed workers are looked for while idle
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(5);

/// Log Shodan alerts to files. Output is written as JSON lines.
#[derive(Debug, Clone, Parser)]
#[command(version)]
struct Args {
    /// Configuration file (JSON)
    configuration: PathBuf,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_target("shodan_alert_monitor", level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.configuration)?;
    let source = ShodanStream::new(config.stream_url.as_str())
        .context("failed to create stream client")?;

    let mut service = ServiceController::new(&config, Arc::new(source));

    if let Err(e) = service.start().await {
        error!("failed to start collectors: {e}");
        service.stop().await;
        return Err(e).context("startup failed");
    }

    run_until_signalled(&mut service).await;

    info!("shutting down, draining collectors");
    for report in service.stop().await {
        if !report.is_clean() {
            warn!(
                collector = %report.collector_id,
                undrained = report.undrained,
                "collector did not shut down cleanly"
            );
        }
    }

    info!("bye");
    Ok(())
}

async fn run_until_signalled(service: &mut ServiceController) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut ticker = time::interval(SUPERVISE_INTERVAL);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown => return,
            _ = ticker.tick() => service.supervise().await,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received terminate signal"),
    }
}
