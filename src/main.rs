use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use condopark::clock::SystemClock;
use condopark::config::Config;
use condopark::engine::Engine;
use condopark::jobs;
use condopark::push::LogNotifier;
use condopark::repo::InMemoryRepository;

const USAGE: &str = "usage: condopark <reminders|sanctions|compact|watch>";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "watch".into());
    let config = Config::from_env();
    condopark::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let repo = Arc::new(InMemoryRepository::open(&config.wal_path())?);
    let engine = Arc::new(Engine::new(
        repo.clone(),
        Arc::new(LogNotifier),
        Arc::new(SystemClock),
        config.policy.clone(),
    ));
    info!("  data_dir: {}", config.data_dir.display());

    match command.as_str() {
        "reminders" => {
            let sweep = engine.run_reminder_sweep(config.sweep_budget).await?;
            println!(
                "processed={} notified={} truncated={}",
                sweep.processed, sweep.notified, sweep.truncated
            );
        }
        "sanctions" => {
            let sweep = engine.run_expiry_sweep(config.sweep_budget).await?;
            println!("expired={}", sweep.expired_count);
            for id in sweep.expired_ids {
                println!("{id}");
            }
        }
        "compact" => {
            let kept = repo.compact().await?;
            println!("kept={kept}");
        }
        "watch" => watch(engine, repo, &config).await,
        other => {
            error!("unknown command {other:?}");
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
    Ok(())
}

/// Run the sweeps and the compactor until SIGTERM/ctrl-c.
async fn watch(engine: Arc<Engine>, repo: Arc<InMemoryRepository>, config: &Config) {
    info!(
        "sweeping every {}s (budget {}s)",
        config.sweep_interval.as_secs(),
        config.sweep_budget.as_secs()
    );
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let sweeper = tokio::spawn(jobs::run_sweeper(
        engine,
        config.sweep_interval,
        config.sweep_budget,
    ));
    let compactor = tokio::spawn(jobs::run_compactor(
        repo.clone(),
        config.compact_threshold,
        Duration::from_secs(60),
    ));

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received, stopping sweeps");
    sweeper.abort();
    compactor.abort();

    // Leave a compact journal behind for the next start.
    match repo.compact().await {
        Ok(kept) => info!(kept, "journal compacted"),
        Err(e) => error!("final compaction failed: {e}"),
    }
    info!("condopark stopped");
}
