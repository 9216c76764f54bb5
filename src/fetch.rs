use std::time::Duration;

use reqwest::Client;

/// Build the HTTP client shared by every source for one run.
pub fn build_client(timeout_secs: u64) -> anyhow::Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent("feed-refresh/0.1 (scheduled data refresh)")
        .build()?;
    Ok(client)
}

/// GET `url` and return the response body as text. Non-2xx statuses are
/// errors.
pub async fn fetch_text(client: &Client, url: &str) -> anyhow::Result<String> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

/// GET `url` and return the raw body, for feed XML handed to feed-rs.
pub async fn fetch_bytes(client: &Client, url: &str) -> anyhow::Result<Vec<u8>> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}
