//! Ranking and grouping of probe results

use crate::proxy::models::ProbeResult;
use crate::proxy::tunnel_config::{OutboundMetrics, TunnelConfig};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Name of the group holding every ranked node
pub const ALL_GROUP: &str = "all";

/// Working nodes, best first
///
/// Keys: latency ascending (absent = +inf), packet loss ascending
/// (absent = 100), then bandwidth descending (absent = 0) when
/// `track_bandwidth` is set. The sort is stable, so full ties keep their
/// input order.
pub fn rank(results: &[ProbeResult], track_bandwidth: bool) -> Vec<ProbeResult> {
    let mut ranked: Vec<ProbeResult> = results.iter().filter(|r| r.is_ok()).cloned().collect();
    ranked.sort_by(|a, b| compare(a, b, track_bandwidth));
    ranked
}

fn compare(a: &ProbeResult, b: &ProbeResult, track_bandwidth: bool) -> Ordering {
    let latency = |r: &ProbeResult| r.latency_ms.unwrap_or(f64::INFINITY);
    let loss = |r: &ProbeResult| r.packet_loss_pct.unwrap_or(100.0);
    let bandwidth = |r: &ProbeResult| r.bandwidth_mbps.unwrap_or(0.0);

    latency(a)
        .total_cmp(&latency(b))
        .then_with(|| loss(a).total_cmp(&loss(b)))
        .then_with(|| {
            if track_bandwidth {
                bandwidth(b).total_cmp(&bandwidth(a))
            } else {
                Ordering::Equal
            }
        })
}

/// Ranked nodes partitioned by protocol and by region; rank order is kept
/// inside each group
#[derive(Debug, Default)]
pub struct Groups {
    pub by_protocol: BTreeMap<String, Vec<ProbeResult>>,
    pub by_region: BTreeMap<String, Vec<ProbeResult>>,
}

pub fn group(ranked: &[ProbeResult]) -> Groups {
    let mut groups = Groups::default();
    for result in ranked {
        let Some(node) = &result.node else { continue };
        groups
            .by_protocol
            .entry(node.protocol.to_string())
            .or_default()
            .push(result.clone());
        groups
            .by_region
            .entry(result.region.clone())
            .or_default()
            .push(result.clone());
    }
    groups
}

/// One tunnel config document per group: `all`, `protocol-<name>` and
/// `region-<name>`, each outbound annotated with its metrics
pub fn group_configs(ranked: &[ProbeResult], socks_port: u16) -> Vec<(String, TunnelConfig)> {
    let groups = group(ranked);

    let mut configs = vec![(ALL_GROUP.to_string(), document(ranked, socks_port))];
    configs.extend(
        groups
            .by_protocol
            .iter()
            .map(|(name, members)| (format!("protocol-{}", name), document(members, socks_port))),
    );
    configs.extend(
        groups
            .by_region
            .iter()
            .map(|(name, members)| (format!("region-{}", name), document(members, socks_port))),
    );
    configs
}

fn document(results: &[ProbeResult], socks_port: u16) -> TunnelConfig {
    TunnelConfig::for_nodes(
        results.iter().filter_map(|r| {
            r.node
                .as_ref()
                .map(|node| (node, Some(OutboundMetrics::from_result(r))))
        }),
        socks_port,
    )
}
