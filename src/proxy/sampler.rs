//! Candidate deduplication and sampling

use rand::seq::SliceRandom;
use std::collections::HashSet;

/// Collapse a block of raw lines into distinct trimmed, non-empty lines
///
/// The result is a set; first-seen order is kept only for readability.
pub fn dedup_lines<'a, I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(str::to_string)
        .collect()
}

/// Distinct candidate lines: `dedup_lines` without `#` comment lines, so
/// comments never take a sample slot
pub fn candidate_lines<'a, I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    dedup_lines(
        lines
            .into_iter()
            .filter(|line| !line.trim_start().starts_with('#')),
    )
}

/// Draw a uniform random subset of exactly `limit` candidates
///
/// Returns the input unchanged when no limit is given or when it already
/// fits.
pub fn sample(candidates: Vec<String>, limit: Option<usize>) -> Vec<String> {
    match limit {
        Some(limit) if candidates.len() > limit => candidates
            .choose_multiple(&mut rand::thread_rng(), limit)
            .cloned()
            .collect(),
        _ => candidates,
    }
}
