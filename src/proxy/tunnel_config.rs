//! Configuration documents for the external tunnel process
//!
//! A document has one local SOCKS inbound and one outbound per node. It is a
//! plain typed structure; serialization to JSON happens only when a caller
//! writes it out.

use crate::proxy::models::{NodeProtocol, NodeSpec, ProbeResult};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const LOCAL_LISTEN: &str = "127.0.0.1";
const TUNNEL_LOG_LEVEL: &str = "warning";

#[derive(Debug, Clone, Serialize)]
pub struct TunnelConfig {
    pub log: LogSettings,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSettings {
    pub loglevel: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inbound {
    pub listen: String,
    pub port: u16,
    pub protocol: String,
    pub settings: SocksSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct SocksSettings {
    pub auth: String,
    pub udp: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Outbound {
    pub protocol: String,
    pub settings: OutboundSettings,
    #[serde(rename = "streamSettings")]
    pub stream_settings: StreamSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<OutboundMetrics>,
}

/// Protocol-specific settings block; the variant follows `Outbound::protocol`
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundSettings {
    Vless { vnext: Vec<Server<VlessUser>> },
    Vmess { vnext: Vec<Server<VmessUser>> },
}

#[derive(Debug, Clone, Serialize)]
pub struct Server<U> {
    pub address: String,
    pub port: u32,
    pub users: Vec<U>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VlessUser {
    pub id: String,
    pub encryption: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VmessUser {
    pub id: String,
    #[serde(rename = "alterId")]
    pub alter_id: u32,
    pub security: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamSettings {
    pub network: String,
    pub security: String,
    #[serde(rename = "tlsSettings", skip_serializing_if = "Option::is_none")]
    pub tls_settings: Option<TlsSettings>,
    #[serde(rename = "wsSettings", skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<WsSettings>,
    #[serde(rename = "grpcSettings", skip_serializing_if = "Option::is_none")]
    pub grpc_settings: Option<GrpcSettings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TlsSettings {
    #[serde(rename = "serverName")]
    pub server_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WsSettings {
    pub path: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrpcSettings {
    #[serde(rename = "serviceName")]
    pub service_name: String,
}

/// Measured metrics attached to outbounds in grouped result documents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMetrics {
    pub latency_ms: Option<f64>,
    pub packet_loss_pct: Option<f64>,
    pub bandwidth_mbps: Option<f64>,
    pub region: String,
}

impl OutboundMetrics {
    pub fn from_result(result: &ProbeResult) -> Self {
        Self {
            latency_ms: result.latency_ms,
            packet_loss_pct: result.packet_loss_pct,
            bandwidth_mbps: result.bandwidth_mbps,
            region: result.region.clone(),
        }
    }
}

impl TunnelConfig {
    fn with_outbounds(socks_port: u16, outbounds: Vec<Outbound>) -> Self {
        Self {
            log: LogSettings {
                loglevel: TUNNEL_LOG_LEVEL.to_string(),
            },
            inbounds: vec![Inbound {
                listen: LOCAL_LISTEN.to_string(),
                port: socks_port,
                protocol: "socks".to_string(),
                settings: SocksSettings {
                    auth: "noauth".to_string(),
                    udp: true,
                },
            }],
            outbounds,
        }
    }

    /// Single-node document used by one probe
    pub fn for_node(spec: &NodeSpec, socks_port: u16) -> Self {
        Self::with_outbounds(socks_port, vec![outbound_for(spec)])
    }

    /// Multi-node document; every outbound gets a unique
    /// `protocol-host:port` tag
    pub fn for_nodes<'a, I>(entries: I, socks_port: u16) -> Self
    where
        I: IntoIterator<Item = (&'a NodeSpec, Option<OutboundMetrics>)>,
    {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let outbounds = entries
            .into_iter()
            .map(|(spec, metrics)| {
                let base = spec.outbound_tag();
                let count = seen.entry(base.clone()).or_insert(0);
                *count += 1;
                let tag = if *count == 1 {
                    base
                } else {
                    format!("{}-{}", base, count)
                };

                let mut outbound = outbound_for(spec);
                outbound.tag = Some(tag);
                outbound.metrics = metrics;
                outbound
            })
            .collect();

        Self::with_outbounds(socks_port, outbounds)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn outbound_for(spec: &NodeSpec) -> Outbound {
    let transport = spec.effective_transport();

    let (protocol, settings) = match spec.protocol {
        NodeProtocol::Vmess => (
            "vmess",
            OutboundSettings::Vmess {
                vnext: vec![Server {
                    address: spec.host.clone(),
                    port: spec.port,
                    users: vec![VmessUser {
                        id: spec.identity.clone(),
                        alter_id: 0,
                        security: transport.encryption.clone(),
                    }],
                }],
            },
        ),
        NodeProtocol::Vless | NodeProtocol::Shorthand => (
            "vless",
            OutboundSettings::Vless {
                vnext: vec![Server {
                    address: spec.host.clone(),
                    port: spec.port,
                    users: vec![VlessUser {
                        id: spec.identity.clone(),
                        encryption: transport.encryption.clone(),
                    }],
                }],
            },
        ),
    };

    let tls_settings = transport.is_tls().then(|| TlsSettings {
        server_name: transport
            .sni
            .clone()
            .or_else(|| transport.host.clone())
            .unwrap_or_else(|| spec.host.clone()),
        alpn: transport
            .alpn
            .as_deref()
            .map(|alpn| {
                alpn.split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    });

    let ws_settings = (transport.network == "ws").then(|| WsSettings {
        path: transport.path.clone().unwrap_or_else(|| "/".to_string()),
        headers: transport
            .host
            .iter()
            .map(|host| ("Host".to_string(), host.clone()))
            .collect(),
    });

    let grpc_settings = (transport.network == "grpc").then(|| GrpcSettings {
        service_name: transport.service_name.clone().unwrap_or_default(),
    });

    Outbound {
        protocol: protocol.to_string(),
        settings,
        stream_settings: StreamSettings {
            network: transport.network,
            security: transport.security,
            tls_settings,
            ws_settings,
            grpc_settings,
        },
        tag: None,
        metrics: None,
    }
}
