use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Directory the slot files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_kernel_rss_url")]
    pub kernel_rss_url: String,
    /// Mirrors are tried in order; the first match wins
    #[serde(default = "default_slackware_mirrors")]
    pub slackware_mirrors: Vec<String>,
    #[serde(default = "default_faif_feed_url")]
    pub faif_feed_url: String,
    #[serde(default = "default_shortener_url")]
    pub shortener_url: String,
    /// Wall-clock bound on the whole run, in seconds
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Per-request HTTP timeout, in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_kernel_rss_url() -> String {
    "https://www.kernel.org/kdist/rss.xml".to_string()
}

fn default_slackware_mirrors() -> Vec<String> {
    vec![
        "https://ftp5.gwdg.de/pub/linux/slackware/slackware/".to_string(),
        "https://mirror.netcologne.de/slackware/slackware/".to_string(),
    ]
}

fn default_faif_feed_url() -> String {
    "http://faif.us/feeds/cast-ogg/".to_string()
}

fn default_shortener_url() -> String {
    "http://ur1.ca/".to_string()
}

fn default_run_timeout() -> u64 {
    600
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self::from_str("").expect("empty config must deserialize to defaults")
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
