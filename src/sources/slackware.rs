//! Slackware release version, scraped from mirror directory listings.
//! Mirrors are interchangeable; the first one that yields a match wins.

use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use tracing::warn;

use crate::fetch::fetch_text;
use crate::sources::{Outcome, Source};

static ANNOUNCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ANNOUNCE\.([0-9._]*)").expect("invalid announce pattern"));

pub struct SlackwareSource {
    mirrors: Vec<String>,
}

impl SlackwareSource {
    pub fn new(mirrors: Vec<String>) -> Self {
        Self { mirrors }
    }
}

#[async_trait]
impl Source for SlackwareSource {
    async fn refresh(&self, client: &Client, _slot: &Path) -> anyhow::Result<Outcome> {
        for mirror in &self.mirrors {
            // A dead mirror only costs us this iteration
            match fetch_text(client, mirror).await {
                Ok(body) => {
                    if let Some(version) = find_version(&body) {
                        return Ok(Outcome::Updated(version));
                    }
                }
                Err(err) => {
                    warn!("Slackware mirror {} failed: {:#}", mirror, err);
                }
            }
        }
        Ok(Outcome::Unchanged)
    }
}

/// Find the `ANNOUNCE.<version>` file name in a listing body and return the
/// version with underscores turned into dots. Names like `ANNOUNCE.TXT`
/// leave the capture empty and do not count as a match.
fn find_version(body: &str) -> Option<String> {
    ANNOUNCE_RE
        .captures(body)
        .map(|captures| captures[1].replace('_', "."))
        .filter(|version| !version.is_empty())
}
