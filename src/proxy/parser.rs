//! Node descriptor parser
//!
//! Normalizes the three descriptor encodings seen in public node lists into
//! a [`NodeSpec`]:
//! - `vless://identity@host:port?params#tag`
//! - `vmess://<base64 JSON>`
//! - `identity@host[:port]` shorthand

use crate::error::ProbeError;
use crate::proxy::models::{NodeProtocol, NodeSpec, Transport};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};
use url::form_urlencoded;

const VLESS_PREFIX: &str = "vless://";
const VMESS_PREFIX: &str = "vmess://";

/// Port used when a descriptor omits one
const DEFAULT_PORT: u32 = 443;

/// Label given to vmess nodes without a `ps` field
const DEFAULT_VMESS_TAG: &str = "from_vmess";

static SHORTHAND_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^\s@:/?#]+)@(\[[0-9A-Fa-f:.]+\]|[^\s@:/?#\[\]]+)(?::(\d+))?$")
        .expect("Invalid shorthand regex")
});

/// Parser for node descriptors
pub struct NodeParser;

impl NodeParser {
    /// Parse a single descriptor line
    ///
    /// Returns `None` for anything that is not a recognized descriptor,
    /// including blank lines, comments and descriptors whose encoding is
    /// broken (the latter are logged).
    pub fn parse_line(line: &str) -> Option<NodeSpec> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let parsed = if line.starts_with(VLESS_PREFIX) {
            Self::parse_vless(line)
        } else if line.starts_with(VMESS_PREFIX) {
            Self::parse_vmess(line)
        } else if let Some(node) = Self::parse_shorthand(line) {
            Ok(node)
        } else {
            debug!(line = %preview(line), "skipping unrecognized line");
            return None;
        };

        match parsed {
            Ok(node) => Some(node),
            Err(e) => {
                warn!(error = %e, line = %preview(line), "failed to normalize node");
                None
            }
        }
    }

    /// Parse every recognized descriptor in a block of text
    pub fn parse_string(content: &str) -> Vec<NodeSpec> {
        content.lines().filter_map(Self::parse_line).collect()
    }

    fn parse_vless(line: &str) -> Result<NodeSpec, ProbeError> {
        let rest = &line[VLESS_PREFIX.len()..];
        let (rest, fragment) = match rest.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (rest, None),
        };
        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, query),
            None => (rest, ""),
        };
        let authority = authority.trim_end_matches('/');

        let (identity, host_port) = authority
            .rsplit_once('@')
            .ok_or_else(|| ProbeError::Parse("missing identity in authority".to_string()))?;
        let identity = decode_component(identity);
        if identity.is_empty() {
            return Err(ProbeError::Parse("empty identity".to_string()));
        }

        let (host, port) = split_host_port(host_port)?;
        let params: HashMap<String, String> = form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();

        let port = match port {
            Some(port) => port,
            None => params
                .get("port")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
        };

        let transport = Transport {
            network: params
                .get("type")
                .or_else(|| params.get("network"))
                .cloned()
                .unwrap_or_else(|| "tcp".to_string()),
            security: params
                .get("security")
                .cloned()
                .unwrap_or_else(|| "none".to_string()),
            encryption: params
                .get("encryption")
                .cloned()
                .unwrap_or_else(|| "none".to_string()),
            host: params.get("host").cloned(),
            sni: params.get("sni").cloned(),
            path: params.get("path").cloned(),
            alpn: params.get("alpn").cloned(),
            service_name: params.get("serviceName").cloned(),
        };

        let display_tag = fragment
            .map(decode_component)
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .unwrap_or_else(|| NodeSpec::generated_tag(NodeProtocol::Vless, &host, port));

        Ok(NodeSpec {
            protocol: NodeProtocol::Vless,
            identity,
            host,
            port,
            transport: Some(transport),
            display_tag,
            raw_original: line.to_string(),
        })
    }

    fn parse_vmess(line: &str) -> Result<NodeSpec, ProbeError> {
        let payload = line[VMESS_PREFIX.len()..].trim();
        let json = decode_base64(payload)?;
        let value: Value = serde_json::from_str(&json)
            .map_err(|e| ProbeError::Parse(format!("vmess json: {}", e)))?;
        let info = value
            .as_object()
            .ok_or_else(|| ProbeError::Parse("vmess payload is not an object".to_string()))?;

        let host = json_field(info, "add")
            .ok_or_else(|| ProbeError::Parse("vmess payload has no address".to_string()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .map(str::to_string)
            .unwrap_or(host);
        check_host_chars(&host)?;
        let port_text = json_field(info, "port").unwrap_or_else(|| DEFAULT_PORT.to_string());
        let port: u32 = port_text
            .parse()
            .map_err(|_| ProbeError::Parse(format!("vmess port {:?} is not a number", port_text)))?;
        let identity = json_field(info, "id")
            .ok_or_else(|| ProbeError::Parse("vmess payload has no id".to_string()))?;

        let transport = Transport {
            network: json_field(info, "net").unwrap_or_else(|| "tcp".to_string()),
            security: json_field(info, "tls").unwrap_or_else(|| "none".to_string()),
            encryption: json_field(info, "scy").unwrap_or_else(|| "auto".to_string()),
            host: json_field(info, "host"),
            sni: json_field(info, "sni"),
            path: json_field(info, "path"),
            alpn: json_field(info, "alpn"),
            service_name: json_field(info, "serviceName"),
        };

        Ok(NodeSpec {
            protocol: NodeProtocol::Vmess,
            identity,
            host,
            port,
            transport: Some(transport),
            display_tag: json_field(info, "ps").unwrap_or_else(|| DEFAULT_VMESS_TAG.to_string()),
            raw_original: line.to_string(),
        })
    }

    fn parse_shorthand(line: &str) -> Option<NodeSpec> {
        if line.contains("://") {
            return None;
        }
        let caps = SHORTHAND_REGEX.captures(line)?;

        let identity = caps[1].to_string();
        let host = caps[2].trim_start_matches('[').trim_end_matches(']').to_string();
        let port = match caps.get(3) {
            Some(port) => port.as_str().parse().ok()?,
            None => DEFAULT_PORT,
        };

        Some(NodeSpec {
            display_tag: NodeSpec::generated_tag(NodeProtocol::Shorthand, &host, port),
            protocol: NodeProtocol::Shorthand,
            identity,
            host,
            port,
            transport: None,
            raw_original: line.to_string(),
        })
    }
}

/// Split `host[:port]`, accepting bracketed IPv6 literals
fn split_host_port(input: &str) -> Result<(String, Option<u32>), ProbeError> {
    let (host, port) = if let Some(rest) = input.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| ProbeError::Parse(format!("unterminated IPv6 literal {:?}", input)))?;
        let port = match rest {
            "" => None,
            _ => Some(rest.strip_prefix(':').ok_or_else(|| {
                ProbeError::Parse(format!("unexpected text after IPv6 literal {:?}", input))
            })?),
        };
        (host, port)
    } else if input.matches(':').count() > 1 {
        // bare IPv6 literal without a port
        (input, None)
    } else {
        match input.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (input, None),
        }
    };

    if host.is_empty() {
        return Err(ProbeError::Parse("empty host".to_string()));
    }

    let port = match port {
        Some(port) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            Some(port.parse::<u32>().map_err(|_| {
                ProbeError::Parse(format!("port {:?} out of representable range", port))
            })?)
        }
        Some("") | None => None,
        Some(port) => return Err(ProbeError::Parse(format!("port {:?} is not numeric", port))),
    };

    Ok((host.to_string(), port))
}

/// Decode base64 with or without padding, standard or URL-safe alphabet
fn decode_base64(payload: &str) -> Result<String, ProbeError> {
    let mut padded: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let bytes = STANDARD
        .decode(&padded)
        .or_else(|_| URL_SAFE.decode(&padded))
        .map_err(|e| ProbeError::Parse(format!("vmess base64: {}", e)))?;

    String::from_utf8(bytes).map_err(|e| ProbeError::Parse(format!("vmess utf-8: {}", e)))
}

/// Hosts taken from JSON payloads must survive being written back into an
/// authority, so URI delimiters are refused
fn check_host_chars(host: &str) -> Result<(), ProbeError> {
    match host
        .chars()
        .find(|c| c.is_whitespace() || matches!(c, '#' | '?' | '@' | '/' | '\\' | '[' | ']' | '%'))
    {
        Some(c) => Err(ProbeError::Parse(format!(
            "host {:?} contains {:?}",
            host, c
        ))),
        None => Ok(()),
    }
}

/// String view of a JSON field; numbers are stringified, empty strings are absent
fn json_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decode_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// First 60 characters of a line, for log output
pub(crate) fn preview(line: &str) -> String {
    line.chars().take(60).collect()
}
