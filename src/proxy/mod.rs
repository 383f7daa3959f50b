//! Proxy node module
//!
//! This module provides functionality for:
//! - Normalizing vless/vmess/shorthand descriptors into `NodeSpec`s
//! - Validating, deduplicating and sampling candidates
//! - Rendering tunnel configuration documents
//! - Probing nodes through short-lived tunnel processes with bounded parallelism
//! - Ranking and grouping the working nodes
//! - Fetching candidate lists from URLs and files

pub mod checker;
pub mod feed;
pub mod models;
pub mod parser;
pub mod ports;
pub mod ranker;
pub mod region;
pub mod sampler;
pub mod session;
pub mod tunnel_config;
pub mod validator;

pub use checker::{NodeProber, PingCommand, ProbeConfig};
pub use feed::{FeedConfig, FeedResult, FeedSource, NodeFeed};
pub use models::{NodeProtocol, NodeSpec, ProbeResult, ProbeStatus, Transport};
pub use parser::NodeParser;
pub use region::{GeoLocator, RegionResolver};
pub use session::{TunnelCommand, TunnelSession};
pub use tunnel_config::TunnelConfig;
