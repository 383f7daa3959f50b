//! Candidate feeds
//!
//! Fetches newline-delimited node lists from HTTP URLs or local files. A
//! failing source contributes nothing; it never aborts the run.

use crate::error::ProbeError;
use crate::proxy::sampler::candidate_lines;
use crate::Result;
use reqwest::Client;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// Default timeout for feed requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

const DEFAULT_USER_AGENT: &str = concat!("node-probe/", env!("CARGO_PKG_VERSION"));

/// Public vless list the tool was originally pointed at
pub const DEFAULT_FEED_URL: &str =
    "https://raw.githubusercontent.com/sevcator/5ubscrpt10n/main/protocols/vl.txt";

/// Where a list of raw descriptors comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    Url(String),
    File(PathBuf),
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedSource::Url(url) => write!(f, "{}", url),
            FeedSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Outcome of reading one source
#[derive(Debug, Clone)]
pub struct FeedResult {
    pub source: String,
    pub lines: Vec<String>,
    pub error: Option<String>,
}

impl FeedResult {
    pub fn success(source: String, lines: Vec<String>) -> Self {
        Self {
            source,
            lines,
            error: None,
        }
    }

    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            lines: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for feed fetching
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FeedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Reader for candidate sources
pub struct NodeFeed {
    client: Client,
}

impl NodeFeed {
    pub fn new() -> Result<Self> {
        Self::with_config(FeedConfig::default())
    }

    pub fn with_config(config: FeedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client })
    }

    /// GET a URL; non-2xx is an error
    pub async fn fetch_url(&self, url: &str) -> std::result::Result<String, ProbeError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Transport(format!("HTTP status: {}", status)));
        }
        Ok(response.text().await?)
    }

    pub async fn fetch_source(&self, source: &FeedSource) -> std::result::Result<String, ProbeError> {
        match source {
            FeedSource::Url(url) => self.fetch_url(url).await,
            FeedSource::File(path) => Ok(tokio::fs::read_to_string(path).await?),
        }
    }

    /// Read every source, one result per source
    pub async fn fetch_all(&self, sources: &[FeedSource]) -> Vec<FeedResult> {
        let mut results = Vec::new();

        for source in sources {
            let result = match self.fetch_source(source).await {
                Ok(text) => {
                    let lines: Vec<String> = text.lines().map(str::to_string).collect();
                    info!(source = %source, lines = lines.len(), "fetched node list");
                    FeedResult::success(source.to_string(), lines)
                }
                Err(e) => {
                    error!(source = %source, error = %e, "failed to fetch node list");
                    FeedResult::failure(source.to_string(), e.to_string())
                }
            };
            results.push(result);
        }

        results
    }

    /// Distinct non-comment candidate lines across all successful sources
    pub fn candidates(results: &[FeedResult]) -> Vec<String> {
        candidate_lines(
            results
                .iter()
                .flat_map(|r| r.lines.iter().map(String::as_str)),
        )
    }
}
