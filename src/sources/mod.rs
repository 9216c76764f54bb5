//! The per-source extractors. Each source fetches one or more remote
//! documents and derives the value for a single slot.

pub mod faif;
pub mod kernel;
pub mod slackware;

use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;

/// Result of one source refresh. `Unchanged` covers both "nothing matched
/// this run" and "the source persisted its own state"; the coordinator only
/// writes the slot for `Updated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Updated(String),
    Unchanged,
}

#[async_trait]
pub trait Source {
    /// Fetch remote data and derive this source's slot value. `slot` is the
    /// path the coordinator will write an `Updated` value to; sources that
    /// keep history read and write it themselves.
    async fn refresh(&self, client: &Client, slot: &Path) -> anyhow::Result<Outcome>;
}

static WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("invalid whitespace pattern"));

/// Collapse internal whitespace runs to single spaces and trim the ends.
pub fn normalize_ws(text: &str) -> String {
    WS_RUN.replace_all(text.trim(), " ").into_owned()
}
