use anyhow::Context;
use hl_coordinator::{Coordinator, CoordinatorConfig};
use hl_search::Sampler;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: hyperloom <template.json> <program>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args_os().skip(1);
    let template = PathBuf::from(args.next().context(USAGE)?);
    let program = PathBuf::from(args.next().context(USAGE)?);

    let config = CoordinatorConfig::from_env().context("loading coordinator config")?;
    let sampler = Sampler::from_path(&template)
        .with_context(|| format!("reading search template {}", template.display()))?;
    info!(
        "Searching {} axes ({} configurations) with {} concurrent runs",
        sampler.axes().len(),
        sampler.cardinality(),
        config.max_concurrent_runs
    );

    if !sampler.cardinality().is_finite() && config.max_runs.is_none() {
        warn!("Search space is unbounded and max_runs is unset; running until interrupted");
    }

    let poll = Duration::from_secs(config.poll_interval_secs.max(1));
    let mut coordinator = Coordinator::new(config, sampler, program);

    let mut interval = tokio::time::interval(poll);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = match coordinator.tick() {
                    Ok(report) => report,
                    Err(e) if e.is_bookkeeping_violation() => {
                        error!("Run bookkeeping diverged from the process table: {}", e);
                        coordinator.shutdown()?;
                        return Err(e.into());
                    }
                    Err(e) => return Err(e.into()),
                };
                if !report.launched.is_empty() {
                    info!("Launched {:?}", report.launched);
                }
                if coordinator.is_done() {
                    match report.best {
                        Some((run_id, metric)) => info!("Search finished; best run {} ({})", run_id, metric),
                        None => info!("Search finished; no run reported a metric"),
                    }
                    break;
                }
            }
            _ = &mut ctrl_c => {
                warn!("Interrupted; stopping in-flight runs");
                for (run_id, outcome) in coordinator.shutdown()? {
                    info!("{}: {:?}", run_id, outcome);
                }
                break;
            }
        }
    }

    Ok(())
}
