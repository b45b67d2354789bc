//! Runtime configuration: defaults, then environment, then CLI overrides.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Timeout for fetching robots.txt.
pub const ROBOTS_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for fetching one sitemap document.
pub const SITEMAP_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for one page navigation or page fetch.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for one classifier request.
pub const CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay between crawl navigations when politeness is on.
pub const CRAWL_DELAY: Duration = Duration::from_millis(250);

pub const MIN_DEPTH: u32 = 1;
pub const MAX_DEPTH: u32 = 5;
pub const MIN_URLS: u32 = 1;
pub const MAX_URLS: u32 = 500;

/// Agent token matched against robots.txt `User-agent` groups.
pub const AGENT_TOKEN: &str = "sitegauge";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub classifier_url: Option<String>,
    pub classifier_concurrency: usize,
    pub detector_script: Option<PathBuf>,
    pub cluster_ceiling: usize,
    pub render_concurrency: usize,
    /// Browser binary; located automatically when unset.
    pub chromium_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            addr: SocketAddr::from(([127, 0, 0, 1], 7710)),
            classifier_url: None,
            classifier_concurrency: 1,
            detector_script: None,
            cluster_ceiling: sitegauge::cluster::DEFAULT_MERGE_CEILING,
            render_concurrency: 4,
            chromium_path: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `SITEGAUGE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(p) = std::env::var("SITEGAUGE_DB") {
            config.db_path = PathBuf::from(p);
        }
        if let Some(addr) = env_parse::<SocketAddr>("SITEGAUGE_ADDR") {
            config.addr = addr;
        }
        if let Ok(url) = std::env::var("SITEGAUGE_CLASSIFIER_URL") {
            if !url.trim().is_empty() {
                config.classifier_url = Some(url.trim().to_string());
            }
        }
        if let Some(n) = env_parse::<usize>("SITEGAUGE_CLASSIFIER_CONCURRENCY") {
            config.classifier_concurrency = n.max(1);
        }
        if let Ok(p) = std::env::var("SITEGAUGE_DETECTOR_SCRIPT") {
            config.detector_script = Some(PathBuf::from(p));
        }
        if let Some(n) = env_parse::<usize>("SITEGAUGE_CLUSTER_CEILING") {
            config.cluster_ceiling = n;
        }
        if let Some(n) = env_parse::<usize>("SITEGAUGE_RENDER_CONCURRENCY") {
            config.render_concurrency = n.max(1);
        }
        if let Ok(p) = std::env::var("SITEGAUGE_CHROMIUM_PATH") {
            config.chromium_path = Some(PathBuf::from(p));
        }
        config
    }
}

/// `~/.sitegauge/sitegauge.db`.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".sitegauge")
        .join("sitegauge.db")
}

pub fn clamp_depth(depth: u32) -> u32 {
    depth.clamp(MIN_DEPTH, MAX_DEPTH)
}

pub fn clamp_urls(urls: u32) -> u32 {
    urls.clamp(MIN_URLS, MAX_URLS)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring invalid {key}={raw}");
            None
        }
    }
}
