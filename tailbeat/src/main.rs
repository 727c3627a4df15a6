//! `tailbeat` — tails a Common Log Format access log and reports periodic
//! stats via two schedules (spec §1, §10.A). This binary supplies the
//! concrete collaborators the core is generic over: the CLF parser
//! ([`clf::ClfParser`]) and the two schedules ([`schedules`]). The tick
//! loop, cache, and dispatcher themselves live in `tailbeat-core`.

mod clf;
mod config;
mod schedules;

use std::sync::Arc;

use clap::Parser;
use config::{Args, Config};
use tailbeat_core::{FileTailer, Scheduler};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tailbeat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env()?.apply_args(&args);

    if let Err(err) = config.validate() {
        eprintln!("invalid configuration: {err}");
        std::process::exit(1);
    }

    info!(
        file_path = %config.file_path.display(),
        general_stats_period_secs = config.general_stats_period_secs,
        traffic_gauge_period_secs = config.traffic_gauge_period_secs,
        traffic_gauge_threshold_rps = config.traffic_gauge_threshold_rps,
        "tailbeat starting"
    );

    let tailer = FileTailer::new(&config.file_path, clf::ClfParser);
    let scheduler = Scheduler::new(tailer, config.read_from_start);

    scheduler
        .dispatcher()
        .register(Arc::new(schedules::GeneralStatsSchedule::new(
            config.general_stats_period_secs,
        )))
        .await?;
    scheduler
        .dispatcher()
        .register(Arc::new(schedules::TrafficGaugeSchedule::new(
            config.traffic_gauge_period_secs,
            config.traffic_gauge_threshold_rps,
        )))
        .await?;

    scheduler.start().await?;
    info!("tailbeat running; press ctrl-c to stop");

    wait_for_shutdown_signal().await;

    info!("shutting down");
    scheduler.stop().await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
