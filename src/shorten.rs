//! Client for the ur1.ca-style link shortener. The service answers a GET
//! with an HTML page; on success the page carries a
//! `<p class="success">` paragraph whose anchor points at the short URL.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;

static SUCCESS_PARAGRAPH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<p[^>]*class="success"[^>]*>(.*?)</p>"#)
        .expect("invalid shortener pattern")
});

static ANCHOR_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<a[^>]*href="([^"]+)""#).expect("invalid anchor pattern"));

/// Ask the shortener for a short form of `long_url`.
///
/// `Ok(None)` means the service answered but reported no success paragraph;
/// transport and status failures are `Err`.
pub async fn short_link(
    client: &Client,
    endpoint: &str,
    long_url: &str,
) -> anyhow::Result<Option<String>> {
    let response = client
        .get(endpoint)
        .query(&[("longurl", long_url)])
        .send()
        .await?
        .error_for_status()?;
    let body = response.text().await?;
    Ok(extract_short_href(&body))
}

/// The anchor must sit inside the success paragraph itself; anchors
/// elsewhere on the page are not the short link.
fn extract_short_href(body: &str) -> Option<String> {
    let paragraph = SUCCESS_PARAGRAPH.captures(body)?;
    ANCHOR_HREF
        .captures(paragraph.get(1)?.as_str())
        .map(|captures| captures[1].to_string())
}
