//! Node validation
//!
//! Pure checks run before a node costs any network or process time.

use crate::error::ProbeError;
use crate::proxy::models::NodeSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;

/// Hex digits and hyphens, 36 characters. The 8-4-4-4-12 grouping is
/// intentionally not enforced.
static UUID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F\-]{36}$").expect("Invalid UUID regex"));

/// At least one dot and an alphabetic final label of 2+ characters
static DNS_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9\-\.]+\.[a-zA-Z]{2,}$").expect("Invalid DNS name regex")
});

/// Check a node, returning the first failing rule
pub fn validate(spec: &NodeSpec) -> Result<(), ProbeError> {
    if spec.protocol.requires_uuid() {
        if !UUID_REGEX.is_match(&spec.identity) {
            return Err(ProbeError::Validation(format!(
                "identity {:?} is not UUID-shaped",
                spec.identity
            )));
        }
    } else if spec.identity.trim().is_empty() {
        return Err(ProbeError::Validation("identity is empty".to_string()));
    }

    if !(1..=65535).contains(&spec.port) {
        return Err(ProbeError::Validation(format!(
            "port {} is outside 1-65535",
            spec.port
        )));
    }

    if !is_valid_host(&spec.host) {
        return Err(ProbeError::Validation(format!(
            "host {:?} is neither an IP literal nor a DNS name",
            spec.host
        )));
    }

    Ok(())
}

pub fn is_valid(spec: &NodeSpec) -> bool {
    validate(spec).is_ok()
}

pub fn is_valid_host(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok() || DNS_NAME_REGEX.is_match(host)
}
