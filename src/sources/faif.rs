//! Free as in Freedom podcast episodes. Unlike the other sources this one
//! keeps history: fresh feed entries are merged into the previously stored
//! record set, short links are backfilled once and cached forever, and the
//! whole sorted set is rewritten every run.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use feed_rs::parser;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use crate::fetch::fetch_bytes;
use crate::shorten::short_link;
use crate::sources::{normalize_ws, Outcome, Source};
use crate::store::{load_records, save_records};

static EPISODE_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:episode\s*)?0x([0-9a-f]+)").expect("invalid episode pattern"));

/// `"<local time> <sign>HH[:]MM"`, the shape of the feed's pubDate values.
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*\S)\s+([-+])(\d\d):?(\d\d)$").expect("invalid date pattern"));

const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

#[derive(Debug, Error)]
pub enum EpisodeError {
    #[error("malformed publish date {0:?}")]
    MalformedDate(String),
    #[error("malformed episode number {0:?}")]
    MalformedNumber(String),
    #[error("expected 5 fields per record, got {0}")]
    BadArity(usize),
}

/// One stored episode. `short_link` is empty until the shortener has
/// answered once; after that it is never recomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub id: String,
    pub title: String,
    pub link: String,
    pub short_link: String,
    pub date: String,
}

impl Episode {
    fn from_row(row: Vec<String>) -> Result<Self, EpisodeError> {
        let mut fields = row;
        if fields.len() != 5 {
            return Err(EpisodeError::BadArity(fields.len()));
        }
        let date = fields.pop().unwrap_or_default();
        let short_link = fields.pop().unwrap_or_default();
        let link = fields.pop().unwrap_or_default();
        let title = fields.pop().unwrap_or_default();
        let id = fields.pop().unwrap_or_default();
        Ok(Self {
            id,
            title,
            link,
            short_link,
            date,
        })
    }

    fn into_row(self) -> Vec<String> {
        vec![self.id, self.title, self.link, self.short_link, self.date]
    }

    /// Ordering key: absolute publish instant first, episode number as the
    /// tie-break. The feed writes offsets as `<sign>HHMM`; `-` adds the
    /// offset and `+` subtracts it, matching what the feed has always
    /// published.
    fn sort_key(&self) -> Result<(i64, u64), EpisodeError> {
        let date = self.date.trim();
        let captures = DATE_RE
            .captures(date)
            .ok_or_else(|| EpisodeError::MalformedDate(date.to_string()))?;

        let naive = NaiveDateTime::parse_from_str(captures[1].trim(), TIMESTAMP_FORMAT)
            .map_err(|_| EpisodeError::MalformedDate(date.to_string()))?;
        let mut timestamp = naive.and_utc().timestamp();

        let hours: i64 = captures[3].parse().expect("digits matched by pattern");
        let minutes: i64 = captures[4].parse().expect("digits matched by pattern");
        let offset = hours * 3600 + minutes * 60;
        if &captures[2] == "-" {
            timestamp += offset;
        } else {
            timestamp -= offset;
        }

        let number = u64::from_str_radix(&self.id, 16)
            .map_err(|_| EpisodeError::MalformedNumber(self.id.clone()))?;
        Ok((timestamp, number))
    }
}

/// Match the episode id prefix of a feed title and rebuild the display
/// title as `0x<HEX><rest>`, with HTML entities in the rest decoded.
fn parse_episode_title(title: &str) -> Option<(String, String)> {
    let captures = EPISODE_TITLE_RE.captures(title)?;
    let hex = captures.get(1).expect("pattern has one group");
    let id = hex.as_str().to_uppercase();
    let rest = html_escape::decode_html_entities(&title[hex.end()..]);
    let display = format!("0x{}{}", id, rest);
    Some((id, display))
}

pub struct FaifSource {
    feed_url: String,
    shortener_url: String,
}

impl FaifSource {
    pub fn new(feed_url: String, shortener_url: String) -> Self {
        Self {
            feed_url,
            shortener_url,
        }
    }

    async fn resolve_short_link(
        &self,
        client: &Client,
        known_links: &HashMap<String, String>,
        stored: Option<&Episode>,
        full_link: &str,
    ) -> String {
        if let Some(short) = known_links.get(full_link) {
            return short.clone();
        }
        if let Some(episode) = stored {
            if !episode.short_link.is_empty() {
                return episode.short_link.clone();
            }
        }
        // Best effort: an unreachable shortener just means another try on
        // the next run
        match short_link(client, &self.shortener_url, full_link).await {
            Ok(Some(short)) => short,
            Ok(None) => {
                debug!("shortener returned no success link for {}", full_link);
                String::new()
            }
            Err(err) => {
                warn!("shortener lookup failed for {}: {:#}", full_link, err);
                String::new()
            }
        }
    }
}

#[async_trait]
impl Source for FaifSource {
    async fn refresh(&self, client: &Client, slot: &Path) -> anyhow::Result<Outcome> {
        let mut episodes: HashMap<String, Episode> = HashMap::new();
        let mut known_links: HashMap<String, String> = HashMap::new();
        for row in load_records(slot)? {
            let episode = Episode::from_row(row)?;
            if !episode.short_link.is_empty() {
                known_links.insert(episode.link.clone(), episode.short_link.clone());
            }
            episodes.insert(episode.id.clone(), episode);
        }

        let bytes = fetch_bytes(client, &self.feed_url).await?;
        let pub_dates = extract_pub_dates(&bytes);
        let feed = parser::parse(&bytes[..])?;

        for entry in feed.entries {
            let title = match entry.title.as_ref() {
                Some(t) => normalize_ws(&t.content),
                None => continue,
            };
            let link = match entry.links.first() {
                Some(l) => normalize_ws(&l.href),
                None => continue,
            };
            let Some((id, display_title)) = parse_episode_title(&title) else {
                continue;
            };
            let date = pub_dates
                .get(&link)
                .map(|d| normalize_ws(d))
                .unwrap_or_default();

            let short = self
                .resolve_short_link(client, &known_links, episodes.get(&id), &link)
                .await;

            episodes.insert(
                id.clone(),
                Episode {
                    id,
                    title: display_title,
                    link,
                    short_link: short,
                    date,
                },
            );
        }

        let mut keyed = episodes
            .into_values()
            .map(|episode| Ok((episode.sort_key()?, episode)))
            .collect::<Result<Vec<_>, EpisodeError>>()?;
        keyed.sort_by(|a, b| b.0.cmp(&a.0));

        // Always rewritten, even when nothing changed
        save_records(slot, keyed.into_iter().map(|(_, ep)| ep.into_row()))?;
        Ok(Outcome::Unchanged)
    }
}

/// Map each item's `<link>` to the raw text of its `<pubDate>`. feed-rs
/// parses pubDate into a DateTime, but the stored records keep the feed's
/// original text, so it is pulled straight from the XML.
fn extract_pub_dates(xml_bytes: &[u8]) -> HashMap<String, String> {
    let mut dates = HashMap::new();
    let xml_str = match std::str::from_utf8(xml_bytes) {
        Ok(s) => s,
        Err(_) => return dates,
    };

    for item_block in xml_str.split("<item>").skip(1) {
        let item_end = item_block.find("</item>").unwrap_or(item_block.len());
        let item = &item_block[..item_end];

        let link = extract_xml_element(item, "link");
        let pub_date = extract_xml_element(item, "pubDate");

        if let (Some(link), Some(pub_date)) = (link, pub_date) {
            // feed-rs hands out entity-decoded links, so the key must be
            // decoded too or links with &amp; would never match
            let link = html_escape::decode_html_entities(&link);
            dates.insert(normalize_ws(&link), pub_date);
        }
    }

    dates
}

fn extract_xml_element(xml: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    let start = xml.find(&start_tag)? + start_tag.len();
    let end = xml[start..].find(&end_tag)? + start;

    Some(xml[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn episode(id: &str, date: &str) -> Episode {
        Episode {
            id: id.to_string(),
            title: format!("0x{}: test", id),
            link: format!("http://faif.us/cast/{}/", id),
            short_link: String::new(),
            date: date.to_string(),
        }
    }

    #[test]
    fn test_parse_episode_title_plain() {
        let (id, title) = parse_episode_title("0x9b: Trademarks").unwrap();
        assert_eq!(id, "9B");
        assert_eq!(title, "0x9B: Trademarks");
    }

    #[test]
    fn test_parse_episode_title_with_prefix_and_entities() {
        let (id, title) = parse_episode_title("Episode 0xA1: Q&amp;A session").unwrap();
        assert_eq!(id, "A1");
        assert_eq!(title, "0xA1: Q&A session");
    }

    #[test]
    fn test_parse_episode_title_no_id() {
        assert!(parse_episode_title("Season finale").is_none());
        assert!(parse_episode_title("about 0x99").is_none());
    }

    #[test]
    fn test_sort_key_applies_inverted_offset() {
        let east = episode("01", "Tue, 23 Oct 2012 10:25:00 +0200");
        let utc = episode("01", "Tue, 23 Oct 2012 10:25:00 +0000");
        let west = episode("01", "Tue, 23 Oct 2012 10:25:00 -0400");

        let east = east.sort_key().unwrap().0;
        let utc = utc.sort_key().unwrap().0;
        let west = west.sort_key().unwrap().0;

        assert_eq!(utc - east, 2 * 3600);
        assert_eq!(west - utc, 4 * 3600);
    }

    #[test]
    fn test_sort_key_accepts_colon_in_offset() {
        let a = episode("01", "Tue, 23 Oct 2012 10:25:00 -04:00");
        let b = episode("01", "Tue, 23 Oct 2012 10:25:00 -0400");
        assert_eq!(a.sort_key().unwrap(), b.sort_key().unwrap());
    }

    #[test]
    fn test_sort_key_rejects_malformed_date() {
        assert!(matches!(
            episode("01", "yesterday").sort_key(),
            Err(EpisodeError::MalformedDate(_))
        ));
        assert!(matches!(
            episode("01", "").sort_key(),
            Err(EpisodeError::MalformedDate(_))
        ));
    }

    #[test]
    fn test_ordering_timestamp_primary_episode_tiebreak() {
        let newer = episode("01", "Wed, 24 Oct 2012 10:25:00 +0000");
        let older_high = episode("FF", "Tue, 23 Oct 2012 10:25:00 +0000");
        let older_low = episode("0A", "Tue, 23 Oct 2012 10:25:00 +0000");

        let mut keys = vec![
            older_low.sort_key().unwrap(),
            newer.sort_key().unwrap(),
            older_high.sort_key().unwrap(),
        ];
        keys.sort_by(|a, b| b.cmp(a));

        assert_eq!(keys[0], newer.sort_key().unwrap());
        assert_eq!(keys[1], older_high.sort_key().unwrap());
        assert_eq!(keys[2], older_low.sort_key().unwrap());
    }

    #[test]
    fn test_row_round_trip() {
        let ep = Episode {
            id: "9B".to_string(),
            title: "0x9B: Trademarks".to_string(),
            link: "http://faif.us/cast/2012/oct/23/0x9B/".to_string(),
            short_link: "http://ur1.ca/abc".to_string(),
            date: "Tue, 23 Oct 2012 10:25:00 -0400".to_string(),
        };
        assert_eq!(Episode::from_row(ep.clone().into_row()).unwrap(), ep);
    }

    #[test]
    fn test_row_wrong_arity_rejected() {
        let row = vec!["9B".to_string(), "title".to_string()];
        assert!(matches!(
            Episode::from_row(row),
            Err(EpisodeError::BadArity(2))
        ));
    }

    #[test]
    fn test_extract_pub_dates() {
        let xml = br#"<rss><channel>
            <title>FAIF</title>
            <item>
                <title>0x9B: Trademarks</title>
                <link>http://faif.us/cast/2012/oct/23/0x9B/</link>
                <pubDate>Tue, 23 Oct 2012 10:25:00 -0400</pubDate>
            </item>
            <item>
                <title>0x9A: Q&amp;A</title>
                <link>http://faif.us/cast/2012/oct/09/0x9A/</link>
            </item>
        </channel></rss>"#;

        let dates = extract_pub_dates(xml);
        assert_eq!(dates.len(), 1);
        assert_eq!(
            dates.get("http://faif.us/cast/2012/oct/23/0x9B/"),
            Some(&"Tue, 23 Oct 2012 10:25:00 -0400".to_string())
        );
    }

    #[test]
    fn test_extract_pub_dates_decodes_link_entities() {
        let xml = br#"<rss><channel>
            <item>
                <title>0x9B: Trademarks</title>
                <link>http://faif.us/cast/?ep=0x9B&amp;fmt=ogg</link>
                <pubDate>Tue, 23 Oct 2012 10:25:00 -0400</pubDate>
            </item>
        </channel></rss>"#;

        let dates = extract_pub_dates(xml);
        assert_eq!(
            dates.get("http://faif.us/cast/?ep=0x9B&fmt=ogg"),
            Some(&"Tue, 23 Oct 2012 10:25:00 -0400".to_string())
        );
    }

    #[tokio::test]
    async fn test_refresh_handles_query_string_links() {
        let feed = r#"<?xml version="1.0"?><rss version="2.0"><channel>
            <title>FAIF</title>
            <item>
                <title>0x9B: Trademarks</title>
                <link>http://faif.us/cast/?ep=0x9B&amp;fmt=ogg</link>
                <pubDate>Tue, 23 Oct 2012 10:25:00 -0400</pubDate>
            </item>
        </channel></rss>"#;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/cast-ogg/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(feed, "application/rss+xml"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/shorten"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SHORT_PAGE))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let slot = dir.path().join("faif");
        let source = FaifSource::new(
            format!("{}/feeds/cast-ogg/", server.uri()),
            format!("{}/shorten", server.uri()),
        );
        let client = crate::fetch::build_client(5).unwrap();

        source.refresh(&client, &slot).await.unwrap();

        let rows = load_records(&slot).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][2], "http://faif.us/cast/?ep=0x9B&fmt=ogg");
        assert_eq!(rows[0][4], "Tue, 23 Oct 2012 10:25:00 -0400");
    }

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
    <title>Free as in Freedom</title>
    <item>
        <title>0x9B: Trademarks</title>
        <link>http://faif.us/cast/2012/oct/23/0x9B/</link>
        <pubDate>Tue, 23 Oct 2012 10:25:00 -0400</pubDate>
    </item>
    <item>
        <title>Episode 0x9a: Software Patents</title>
        <link>http://faif.us/cast/2012/oct/09/0x9A/</link>
        <pubDate>Tue, 09 Oct 2012 07:15:00 -0400</pubDate>
    </item>
    <item>
        <title>Bonus interview</title>
        <link>http://faif.us/cast/2012/oct/01/bonus/</link>
        <pubDate>Mon, 01 Oct 2012 07:15:00 -0400</pubDate>
    </item>
</channel></rss>"#;

    const SHORT_PAGE: &str =
        r#"<p class="success">Your ur1 is: <a href="http://ur1.ca/short1">http://ur1.ca/short1</a></p>"#;

    async fn mock_feed_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/cast-ogg/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(FEED, "application/rss+xml"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/shorten"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SHORT_PAGE))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_refresh_merges_sorts_and_persists() {
        let server = mock_feed_server().await;
        let dir = tempfile::tempdir().unwrap();
        let slot = dir.path().join("faif");

        let source = FaifSource::new(
            format!("{}/feeds/cast-ogg/", server.uri()),
            format!("{}/shorten", server.uri()),
        );
        let client = crate::fetch::build_client(5).unwrap();

        let outcome = source.refresh(&client, &slot).await.unwrap();
        assert_eq!(outcome, Outcome::Unchanged);

        let rows = load_records(&slot).unwrap();
        assert_eq!(rows.len(), 2, "item without episode id is skipped");
        // Newest first
        assert_eq!(rows[0][0], "9B");
        assert_eq!(rows[0][1], "0x9B: Trademarks");
        assert_eq!(rows[0][3], "http://ur1.ca/short1");
        assert_eq!(rows[1][0], "9A");
        assert_eq!(rows[1][1], "0x9A: Software Patents");
        assert_eq!(rows[1][4], "Tue, 09 Oct 2012 07:15:00 -0400");
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent_and_keeps_short_links() {
        let server = mock_feed_server().await;
        let dir = tempfile::tempdir().unwrap();
        let slot = dir.path().join("faif");

        let source = FaifSource::new(
            format!("{}/feeds/cast-ogg/", server.uri()),
            format!("{}/shorten", server.uri()),
        );
        let client = crate::fetch::build_client(5).unwrap();

        source.refresh(&client, &slot).await.unwrap();
        let first = std::fs::read(&slot).unwrap();

        // Take the shortener away: cached short links must survive
        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/feeds/cast-ogg/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(FEED, "application/rss+xml"),
            )
            .mount(&server)
            .await;

        source.refresh(&client, &slot).await.unwrap();
        let second = std::fs::read(&slot).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_refresh_shortener_down_leaves_short_link_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/cast-ogg/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(FEED, "application/rss+xml"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/shorten"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let slot = dir.path().join("faif");
        let source = FaifSource::new(
            format!("{}/feeds/cast-ogg/", server.uri()),
            format!("{}/shorten", server.uri()),
        );
        let client = crate::fetch::build_client(5).unwrap();

        source.refresh(&client, &slot).await.unwrap();

        let rows = load_records(&slot).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row[3].is_empty()));
    }

    #[tokio::test]
    async fn test_refresh_malformed_date_aborts_and_keeps_old_slot() {
        let server = MockServer::start().await;
        let bad_feed = r#"<?xml version="1.0"?><rss version="2.0"><channel>
            <title>FAIF</title>
            <item>
                <title>0xA0: Broken</title>
                <link>http://faif.us/cast/broken/</link>
                <pubDate>sometime soon</pubDate>
            </item>
        </channel></rss>"#;
        Mock::given(method("GET"))
            .and(path("/feeds/cast-ogg/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(bad_feed, "application/rss+xml"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let slot = dir.path().join("faif");
        let previous = vec![vec![
            "9B".to_string(),
            "0x9B: Trademarks".to_string(),
            "http://faif.us/cast/2012/oct/23/0x9B/".to_string(),
            String::new(),
            "Tue, 23 Oct 2012 10:25:00 -0400".to_string(),
        ]];
        save_records(&slot, previous.clone()).unwrap();

        let source = FaifSource::new(
            format!("{}/feeds/cast-ogg/", server.uri()),
            format!("{}/shorten", server.uri()),
        );
        let client = crate::fetch::build_client(5).unwrap();

        let result = source.refresh(&client, &slot).await;
        assert!(result.is_err());
        assert_eq!(load_records(&slot).unwrap(), previous);
    }
}
