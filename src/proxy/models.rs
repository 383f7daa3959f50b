//! Node and probe-result data models

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::form_urlencoded;

/// Characters left unescaped in the userinfo and fragment of a canonical URI
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Descriptor scheme a node was published with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeProtocol {
    Vless,
    Vmess,
    Shorthand,
}

impl NodeProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeProtocol::Vless => "vless",
            NodeProtocol::Vmess => "vmess",
            NodeProtocol::Shorthand => "shorthand",
        }
    }

    /// Whether the identity must look like a UUID
    pub fn requires_uuid(&self) -> bool {
        matches!(self, NodeProtocol::Vless | NodeProtocol::Vmess)
    }
}

impl fmt::Display for NodeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream settings carried by vless/vmess descriptors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    /// Network type (tcp, ws, grpc, ...)
    pub network: String,
    /// Security mode (none, tls, reality, ...)
    pub security: String,
    /// User-level encryption (`none` for vless, `auto` etc. for vmess)
    pub encryption: String,
    /// Host header override
    pub host: Option<String>,
    pub sni: Option<String>,
    pub path: Option<String>,
    pub alpn: Option<String>,
    pub service_name: Option<String>,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            security: "none".to_string(),
            encryption: "none".to_string(),
            host: None,
            sni: None,
            path: None,
            alpn: None,
            service_name: None,
        }
    }
}

impl Transport {
    pub fn is_tls(&self) -> bool {
        self.security.eq_ignore_ascii_case("tls")
    }
}

/// Canonical description of one proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub protocol: NodeProtocol,
    pub identity: String,
    /// IP literal (IPv6 without brackets) or DNS name
    pub host: String,
    /// Kept wider than `u16` so out-of-range values reach the validator
    pub port: u32,
    pub transport: Option<Transport>,
    pub display_tag: String,
    pub raw_original: String,
}

impl NodeSpec {
    /// Tag used when the descriptor carries no label
    pub fn generated_tag(protocol: NodeProtocol, host: &str, port: u32) -> String {
        format!("{}-{}:{}", protocol, host, port)
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Outbound tag used in multi-node config documents
    pub fn outbound_tag(&self) -> String {
        format!("{}-{}:{}", self.protocol, self.host, self.port)
    }

    /// Transport settings, falling back to plain tcp for shorthand nodes
    pub fn effective_transport(&self) -> Transport {
        self.transport.clone().unwrap_or_default()
    }

    /// Render the node as a `vless://` URI regardless of the source scheme
    pub fn to_canonical_uri(&self) -> String {
        let transport = self.effective_transport();

        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("encryption", &transport.encryption);
        query.append_pair("security", &transport.security);
        query.append_pair("type", &transport.network);
        let optional = [
            ("host", &transport.host),
            ("sni", &transport.sni),
            ("path", &transport.path),
            ("alpn", &transport.alpn),
            ("serviceName", &transport.service_name),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                query.append_pair(key, value);
            }
        }

        format!(
            "vless://{}@{}?{}#{}",
            utf8_percent_encode(&self.identity, URI_COMPONENT),
            self.address(),
            query.finish(),
            utf8_percent_encode(&self.display_tag, URI_COMPONENT),
        )
    }

    /// Same endpoint, credential, transport and label; ignores the source
    /// scheme and the raw line
    pub fn is_equivalent(&self, other: &NodeSpec) -> bool {
        self.identity == other.identity
            && self.host == other.host
            && self.port == other.port
            && self.effective_transport() == other.effective_transport()
            && self.display_tag == other.display_tag
    }
}

impl fmt::Display for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.protocol, self.address(), self.display_tag)
    }
}

/// Outcome class of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Ok,
    Failed,
    Invalid,
    Error,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Ok => write!(f, "OK"),
            ProbeStatus::Failed => write!(f, "FAILED"),
            ProbeStatus::Invalid => write!(f, "INVALID"),
            ProbeStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of probing one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Source line the candidate came from
    pub raw: String,
    /// Parsed node, absent when the line was not recognized
    pub node: Option<NodeSpec>,
    pub status: ProbeStatus,
    pub latency_ms: Option<f64>,
    pub bandwidth_mbps: Option<f64>,
    pub packet_loss_pct: Option<f64>,
    pub region: String,
    /// Reason for non-ok outcomes
    pub detail: Option<String>,
}

impl ProbeResult {
    fn base(raw: String, node: Option<NodeSpec>, status: ProbeStatus, region: String) -> Self {
        Self {
            raw,
            node,
            status,
            latency_ms: None,
            bandwidth_mbps: None,
            packet_loss_pct: None,
            region,
            detail: None,
        }
    }

    pub fn ok(node: NodeSpec, latency_ms: f64, region: String) -> Self {
        let mut result = Self::base(node.raw_original.clone(), Some(node), ProbeStatus::Ok, region);
        result.latency_ms = Some(latency_ms);
        result
    }

    pub fn failed(node: NodeSpec, region: String, reason: String) -> Self {
        let mut result =
            Self::base(node.raw_original.clone(), Some(node), ProbeStatus::Failed, region);
        result.detail = Some(reason);
        result
    }

    pub fn invalid(raw: String, node: Option<NodeSpec>, region: String, reason: String) -> Self {
        let mut result = Self::base(raw, node, ProbeStatus::Invalid, region);
        result.detail = Some(reason);
        result
    }

    pub fn error(node: NodeSpec, region: String, reason: String) -> Self {
        let mut result =
            Self::base(node.raw_original.clone(), Some(node), ProbeStatus::Error, region);
        result.detail = Some(reason);
        result
    }

    pub fn with_bandwidth(mut self, mbps: Option<f64>) -> Self {
        self.bandwidth_mbps = mbps;
        self
    }

    pub fn with_packet_loss(mut self, pct: Option<f64>) -> Self {
        self.packet_loss_pct = pct.map(|p| p.clamp(0.0, 100.0));
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ProbeStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node() -> NodeSpec {
        NodeSpec {
            protocol: NodeProtocol::Vless,
            identity: "11111111-1111-1111-1111-111111111111".to_string(),
            host: "203.0.113.5".to_string(),
            port: 443,
            transport: Some(Transport::default()),
            display_tag: "tag".to_string(),
            raw_original: "vless://raw".to_string(),
        }
    }

    #[test]
    fn test_address_brackets_ipv6() {
        let mut node = sample_node();
        assert_eq!(node.address(), "203.0.113.5:443");
        node.host = "2001:db8::1".to_string();
        assert_eq!(node.address(), "[2001:db8::1]:443");
    }

    #[test]
    fn test_canonical_uri() {
        let mut node = sample_node();
        node.display_tag = "my node".to_string();
        let mut transport = Transport::default();
        transport.security = "tls".to_string();
        transport.sni = Some("example.com".to_string());
        node.transport = Some(transport);

        assert_eq!(
            node.to_canonical_uri(),
            "vless://11111111-1111-1111-1111-111111111111@203.0.113.5:443\
             ?encryption=none&security=tls&type=tcp&sni=example.com#my%20node"
        );
    }

    #[test]
    fn test_outbound_tag() {
        assert_eq!(sample_node().outbound_tag(), "vless-203.0.113.5:443");
    }

    #[test]
    fn test_equivalence_ignores_scheme_and_raw() {
        let a = sample_node();
        let mut b = sample_node();
        b.protocol = NodeProtocol::Vmess;
        b.raw_original = "vmess://other".to_string();
        assert!(a.is_equivalent(&b));

        b.port = 8443;
        assert!(!a.is_equivalent(&b));
    }

    #[test]
    fn test_shorthand_transport_defaults() {
        let mut node = sample_node();
        node.protocol = NodeProtocol::Shorthand;
        node.transport = None;
        assert_eq!(node.effective_transport(), Transport::default());
        assert!(!NodeProtocol::Shorthand.requires_uuid());
    }

    #[test]
    fn test_probe_result_constructors() {
        let result = ProbeResult::ok(sample_node(), 42.0, "asia".to_string())
            .with_packet_loss(Some(250.0));
        assert!(result.is_ok());
        assert_eq!(result.latency_ms, Some(42.0));
        assert_eq!(result.packet_loss_pct, Some(100.0));
        assert_eq!(result.raw, "vless://raw");

        let result = ProbeResult::failed(sample_node(), "unknown".to_string(), "503".to_string());
        assert!(!result.is_ok());
        assert!(result.latency_ms.is_none());

        let result = ProbeResult::invalid(
            "garbage".to_string(),
            None,
            "unknown".to_string(),
            "unrecognized".to_string(),
        );
        assert_eq!(result.status, ProbeStatus::Invalid);
        assert!(result.node.is_none());
    }
}
