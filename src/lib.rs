//! Node Probe - vless/vmess node normalizer and prober
//!
//! Fetches lists of proxy node descriptors, normalizes and validates them,
//! probes each node through a short-lived tunnel process with bounded
//! parallelism, then ranks and groups the working nodes.

pub mod error;
pub mod logging;
pub mod pipeline;
pub mod proxy;
pub mod report;

pub use error::ProbeError;
pub use proxy::*;

use proxy::feed::DEFAULT_FEED_URL;
use std::path::PathBuf;
use tracing::{info, warn};

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Default output directory for reports
pub const DEFAULT_OUTPUT_DIR: &str = "results";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Candidate sources; defaults to the public vless list
    pub sources: Vec<FeedSource>,
    /// Probe at most this many distinct candidates, chosen at random
    pub sample_size: Option<usize>,
    pub feed: FeedConfig,
    pub probe: ProbeConfig,
    /// Directory the report files are written to
    pub output_dir: PathBuf,
    /// Optional MaxMind database used as a region fallback for IP hosts
    pub mmdb_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: vec![FeedSource::Url(DEFAULT_FEED_URL.to_string())],
            sample_size: None,
            feed: FeedConfig::default(),
            probe: ProbeConfig::default(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            mmdb_path: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the sources; an empty list keeps the default feed
    pub fn with_sources(mut self, sources: Vec<FeedSource>) -> Self {
        if !sources.is_empty() {
            self.sources = sources;
        }
        self
    }

    pub fn with_sample_size(mut self, sample_size: Option<usize>) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_mmdb_path(mut self, path: Option<PathBuf>) -> Self {
        self.mmdb_path = path;
        self
    }
}

/// Everything a run needs, built once at startup
pub struct AppContext {
    pub config: Config,
    pub feed: NodeFeed,
    pub prober: NodeProber,
    pub regions: RegionResolver,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let regions = match &config.mmdb_path {
            Some(path) => match GeoLocator::from_path(path) {
                Ok(geo) => {
                    info!(path = %path.display(), "loaded GeoIP database");
                    RegionResolver::with_geo(geo)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "GeoIP database unavailable, using keyword regions only");
                    RegionResolver::new()
                }
            },
            None => RegionResolver::new(),
        };

        let feed = NodeFeed::with_config(config.feed.clone())?;
        let prober = NodeProber::with_config(config.probe.clone()).with_regions(regions.clone());

        Ok(Self {
            config,
            feed,
            prober,
            regions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.sources, vec![FeedSource::Url(DEFAULT_FEED_URL.to_string())]);
        assert_eq!(config.output_dir, PathBuf::from("results"));
        assert!(config.sample_size.is_none());
        assert!(config.mmdb_path.is_none());
    }

    #[test]
    fn test_empty_sources_keep_default() {
        let config = Config::new().with_sources(Vec::new());
        assert_eq!(config.sources.len(), 1);

        let config = Config::new().with_sources(vec![FeedSource::File(PathBuf::from("nodes.txt"))]);
        assert_eq!(config.sources, vec![FeedSource::File(PathBuf::from("nodes.txt"))]);
    }

    #[test]
    fn test_context_with_missing_mmdb_falls_back() {
        let config = Config::new().with_mmdb_path(Some(PathBuf::from("/nonexistent/geo.mmdb")));
        let ctx = AppContext::new(config).unwrap();
        assert_eq!(ctx.regions.resolve("jp-node.example.com"), "asia");
        assert_eq!(ctx.regions.resolve("203.0.113.5"), "unknown");
    }
}
