//! Report writer
//!
//! Layout under the output directory:
//!
//! - `probe_report.txt`: header timestamp plus one block per candidate
//! - `configs/<group>.json`: one tunnel config document per group
//! - `valid_nodes.txt`: canonical URIs of working nodes, best first

use crate::proxy::models::ProbeResult;
use crate::proxy::tunnel_config::TunnelConfig;
use crate::Result;
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const PROBE_REPORT_FILE: &str = "probe_report.txt";
pub const VALID_NODES_FILE: &str = "valid_nodes.txt";
pub const CONFIGS_DIR: &str = "configs";

const RULE: &str = "==================================================";
const BLOCK_RULE: &str = "----------------------------------------";

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    /// One record per processed candidate, valid or not
    pub results: Vec<ProbeResult>,
    /// Working nodes, best first
    pub ranked: Vec<ProbeResult>,
    pub configs: Vec<(String, TunnelConfig)>,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Local>,
        results: Vec<ProbeResult>,
        ranked: Vec<ProbeResult>,
        configs: Vec<(String, TunnelConfig)>,
    ) -> Self {
        Self {
            started_at,
            results,
            ranked,
            configs,
        }
    }

    pub fn working(&self) -> usize {
        self.ranked.len()
    }
}

/// Paths of the files written for one report
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub probe_report: PathBuf,
    pub valid_nodes: PathBuf,
    pub configs: Vec<PathBuf>,
}

pub struct ReportWriter {
    out_dir: PathBuf,
}

impl ReportWriter {
    pub fn new<P: Into<PathBuf>>(out_dir: P) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn write(&self, report: &RunReport) -> Result<ReportPaths> {
        let configs_dir = self.out_dir.join(CONFIGS_DIR);
        fs::create_dir_all(&configs_dir)?;

        let probe_report = self.out_dir.join(PROBE_REPORT_FILE);
        fs::write(&probe_report, render_probe_report(report))?;

        let valid_nodes = self.out_dir.join(VALID_NODES_FILE);
        fs::write(&valid_nodes, render_valid_nodes(&report.ranked))?;

        let mut configs = Vec::with_capacity(report.configs.len());
        for (group, config) in &report.configs {
            let path = configs_dir.join(format!("{}.json", file_stem(group)));
            fs::write(&path, config.to_json_pretty()?)?;
            configs.push(path);
        }

        info!(
            out_dir = %self.out_dir.display(),
            candidates = report.results.len(),
            working = report.working(),
            groups = configs.len(),
            "report written"
        );

        Ok(ReportPaths {
            probe_report,
            valid_nodes,
            configs,
        })
    }
}

/// Human-readable log of every candidate
pub fn render_probe_report(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Node Probe Results - {}\n",
        report.started_at.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!(
        "Candidates: {}, working: {}\n",
        report.results.len(),
        report.working()
    ));
    out.push_str(RULE);
    out.push('\n');

    if report.results.is_empty() {
        out.push_str("No candidates processed.\n");
        return out;
    }

    for result in &report.results {
        out.push_str(&render_block(result));
        out.push_str(BLOCK_RULE);
        out.push('\n');
    }
    out
}

fn render_block(result: &ProbeResult) -> String {
    let mut block = format!("Node: {}\n", result.raw);
    if let Some(node) = &result.node {
        block.push_str(&format!(
            "Protocol: {}, Host: {}, Port: {}\n",
            node.protocol, node.host, node.port
        ));
    }
    block.push_str(&format!(
        "Status: {}, Region: {}\n",
        result.status, result.region
    ));

    let mut metrics = Vec::new();
    if let Some(latency) = result.latency_ms {
        metrics.push(format!("Latency: {:.1} ms", latency));
    }
    if let Some(loss) = result.packet_loss_pct {
        metrics.push(format!("Loss: {:.1}%", loss));
    }
    if let Some(bandwidth) = result.bandwidth_mbps {
        metrics.push(format!("Bandwidth: {:.2} MB/s", bandwidth));
    }
    if !metrics.is_empty() {
        block.push_str(&metrics.join(", "));
        block.push('\n');
    }

    if let Some(detail) = &result.detail {
        block.push_str(&format!("Detail: {}\n", detail));
    }
    block
}

pub fn render_valid_nodes(ranked: &[ProbeResult]) -> String {
    ranked
        .iter()
        .filter_map(|r| r.node.as_ref())
        .map(|node| format!("{}\n", node.to_canonical_uri()))
        .collect()
}

/// Group names come from region and protocol names; keep them path-safe
fn file_stem(group: &str) -> String {
    group
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
