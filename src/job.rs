//! One refresh run: every configured source is given a chance to update
//! its slot, and one source failing never stops the others.

use std::path::PathBuf;

use reqwest::Client;
use tracing::{error, info};

use crate::config::Config;
use crate::sources::faif::FaifSource;
use crate::sources::kernel::KernelSource;
use crate::sources::slackware::SlackwareSource;
use crate::sources::{Outcome, Source};
use crate::store::save_slot;

pub struct Job {
    client: Client,
    output_dir: PathBuf,
    sources: Vec<(&'static str, Box<dyn Source + Send + Sync>)>,
}

impl Job {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = crate::fetch::build_client(config.http_timeout_secs)?;

        // Fixed order: slots are refreshed exactly in this sequence
        let sources: Vec<(&'static str, Box<dyn Source + Send + Sync>)> = vec![
            (
                "kernel",
                Box::new(KernelSource::new(config.kernel_rss_url.clone())),
            ),
            (
                "slack",
                Box::new(SlackwareSource::new(config.slackware_mirrors.clone())),
            ),
            (
                "faif",
                Box::new(FaifSource::new(
                    config.faif_feed_url.clone(),
                    config.shortener_url.clone(),
                )),
            ),
        ];

        Ok(Self {
            client,
            output_dir: config.output_dir.clone(),
            sources,
        })
    }

    /// Run every source once, sequentially, logging per-source failures
    /// and persisting whatever succeeded.
    pub async fn run(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;

        for (name, source) in &self.sources {
            let slot = self.output_dir.join(name);
            match source.refresh(&self.client, &slot).await {
                Ok(Outcome::Updated(value)) => {
                    if let Err(err) = save_slot(&slot, value.as_bytes()) {
                        error!("failed to store '{}': {:#}", name, err);
                    } else {
                        info!("updated '{}'", name);
                    }
                }
                Ok(Outcome::Unchanged) => {
                    info!("no update for '{}'", name);
                }
                Err(err) => {
                    error!("source '{}' failed: {:#}", name, err);
                }
            }
        }

        Ok(())
    }
}
