mod config;
mod fetch;
mod job;
mod shorten;
mod sources;
mod store;

use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::job::Job;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feed_refresh=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load_or_default("refresh.toml")?;
    info!(
        "refreshing into {} (watchdog {}s)",
        config.output_dir.display(),
        config.run_timeout_secs
    );

    let job = Job::new(&config)?;

    // Watchdog: a hung network call must not stall the scheduled job forever
    let deadline = Duration::from_secs(config.run_timeout_secs);
    match tokio::time::timeout(deadline, job.run()).await {
        Ok(result) => result?,
        Err(_) => {
            error!("run exceeded {}s watchdog, aborting", config.run_timeout_secs);
            std::process::exit(1);
        }
    }

    info!("refresh complete");
    Ok(())
}
