//! Kernel release topic: turns the kernel.org release feed into a one-line
//! summary like `"6.10, 6.9; 6.9.5; 6.6.34"` (mainline; stable; longterm).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use feed_rs::parser;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;

use crate::fetch::fetch_bytes;
use crate::sources::{Outcome, Source};

/// Release channels in the order they appear in the topic. Anything else
/// in the feed (e.g. linux-next) is dropped.
const TYPE_ORDER: [&str; 3] = ["mainline", "stable", "longterm"];

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*): (.*)$").expect("invalid kernel title pattern"));

pub struct KernelSource {
    url: String,
}

impl KernelSource {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Source for KernelSource {
    async fn refresh(&self, client: &Client, _slot: &Path) -> anyhow::Result<Outcome> {
        let bytes = fetch_bytes(client, &self.url).await?;
        let feed = parser::parse(&bytes[..])?;

        let titles = feed
            .entries
            .iter()
            .filter_map(|entry| entry.title.as_ref().map(|t| t.content.clone()));

        match build_topic(titles) {
            Some(topic) => Ok(Outcome::Updated(topic)),
            None => Ok(Outcome::Unchanged),
        }
    }
}

/// Split a `"<version>: <type>"` feed title into its two halves.
fn split_title(title: &str) -> Option<(String, String)> {
    let captures = TITLE_RE.captures(title.trim())?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

/// Sort key for version strings: segments split on `.` and `-`, compared
/// numerically where possible so `5.10` orders above `5.9`.
fn version_key(version: &str) -> Vec<(u64, String)> {
    version
        .split(['.', '-'])
        .map(|segment| match segment.parse::<u64>() {
            Ok(n) => (n, String::new()),
            Err(_) => (0, segment.to_string()),
        })
        .collect()
}

/// Group titles by release type and compose the topic line. `None` when no
/// title matched a recognized type.
fn build_topic<I>(titles: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let mut types: HashMap<String, HashSet<String>> = HashMap::new();
    for title in titles {
        if let Some((version, release_type)) = split_title(&title) {
            types.entry(release_type).or_default().insert(version);
        }
    }

    let mut parts = Vec::new();
    for release_type in TYPE_ORDER {
        if let Some(versions) = types.get(release_type) {
            let mut versions: Vec<&String> = versions.iter().collect();
            versions.sort_by_key(|v| std::cmp::Reverse(version_key(v.as_str())));
            parts.push(
                versions
                    .into_iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}
