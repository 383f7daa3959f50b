//! Per-node error taxonomy
//!
//! Every variant is contained at the node level: a probe that hits one of
//! these still produces a `ProbeResult`, it never aborts the batch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    /// Malformed encoding (bad base64, bad JSON, unparsable authority)
    #[error("parse error: {0}")]
    Parse(String),

    /// Recognizable descriptor with semantically invalid fields
    #[error("validation failed: {0}")]
    Validation(String),

    /// A sub-check exceeded its bound
    #[error("{stage} timed out after {secs:.1}s")]
    Timeout { stage: &'static str, secs: f64 },

    /// Tunnel process could not be spawned, signalled or reaped
    #[error("tunnel process: {0}")]
    ProcessLifecycle(String),

    /// Network failure talking to a feed or through the tunnel
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    pub fn timeout(stage: &'static str, bound: std::time::Duration) -> Self {
        Self::Timeout {
            stage,
            secs: bound.as_secs_f64(),
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
