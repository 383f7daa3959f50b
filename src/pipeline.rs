//! One probing run, from feed to ranked report
//!
//! feed → dedup → sample → normalize/validate → probe → rank → group

use crate::proxy::feed::NodeFeed;
use crate::proxy::models::{NodeSpec, ProbeResult};
use crate::proxy::parser::{preview, NodeParser};
use crate::proxy::region::{RegionResolver, UNKNOWN_REGION};
use crate::proxy::{ranker, sampler, validator};
use crate::report::RunReport;
use crate::{AppContext, ProbeError, Result};
use chrono::Local;
use tracing::{debug, info};

/// Candidates split into probe-worthy nodes and already-settled records
#[derive(Debug, Default)]
pub struct Candidates {
    pub nodes: Vec<NodeSpec>,
    /// `Invalid` results for lines that did not normalize or validate
    pub rejected: Vec<ProbeResult>,
}

/// Normalize and validate distinct candidate lines
///
/// Every line ends up either as a node or as an `Invalid` record. Comment
/// lines are removed earlier, by `sampler::candidate_lines`.
pub fn prepare_candidates(lines: &[String], regions: &RegionResolver) -> Candidates {
    let mut candidates = Candidates::default();

    for line in lines {
        let Some(node) = NodeParser::parse_line(line) else {
            candidates.rejected.push(ProbeResult::invalid(
                line.clone(),
                None,
                UNKNOWN_REGION.to_string(),
                ProbeError::Parse("unrecognized descriptor".to_string()).to_string(),
            ));
            continue;
        };

        match validator::validate(&node) {
            Ok(()) => candidates.nodes.push(node),
            Err(e) => {
                debug!(line = %preview(line), error = %e, "rejected candidate");
                let region = regions.resolve(&node.host);
                candidates.rejected.push(ProbeResult::invalid(
                    line.clone(),
                    Some(node),
                    region,
                    e.to_string(),
                ));
            }
        }
    }

    candidates
}

/// Fetch, probe, rank and group; writing the report is left to the caller
pub async fn run(ctx: &AppContext) -> Result<RunReport> {
    let started_at = Local::now();
    let config = &ctx.config;

    let fetched = ctx.feed.fetch_all(&config.sources).await;
    let distinct = NodeFeed::candidates(&fetched);
    let total = distinct.len();
    let sampled = sampler::sample(distinct, config.sample_size);
    info!(distinct = total, sampled = sampled.len(), "collected candidates");

    let Candidates { nodes, rejected } = prepare_candidates(&sampled, &ctx.regions);
    info!(
        valid = nodes.len(),
        rejected = rejected.len(),
        concurrency = config.probe.concurrency,
        "probing nodes"
    );

    let mut results = rejected;
    results.extend(ctx.prober.check_nodes(nodes).await);

    let ranked = ranker::rank(&results, config.probe.measure_bandwidth);
    let configs = ranker::group_configs(&ranked, config.probe.base_port);
    info!(
        working = ranked.len(),
        groups = configs.len(),
        "ranking complete"
    );

    Ok(RunReport::new(started_at, results, ranked, configs))
}
