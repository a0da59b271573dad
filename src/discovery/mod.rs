//! Discovery-space partitioning
//!
//! The search API caps every query at a fixed number of results, so the
//! discovery space is cut into disjoint slices (star-count intervals,
//! creation-date windows, or both) that are each small enough to page through.
//! Every repository matching the base query falls into exactly one slice.

mod ranges;

pub use ranges::{DateWindow, StarRange};

use crate::config::{DiscoveryConfig, Strategy};
use crate::state::Partition;
use crate::ConfigError;
use sha2::{Digest, Sha256};

/// Builds the partition plan for a discovery configuration
///
/// # Returns
///
/// * `Ok(Vec<Partition>)` - Disjoint partitions covering the discovery space
/// * `Err(ConfigError)` - The configuration does not describe a usable space
pub fn build_partitions(config: &DiscoveryConfig) -> Result<Vec<Partition>, ConfigError> {
    let partitions = match config.strategy {
        Strategy::Stars => star_ranges(config)?
            .into_iter()
            .map(|range| {
                Partition::new(
                    range.key(),
                    predicate(&config.base_query, &[range.qualifier()]),
                )
            })
            .collect(),

        Strategy::Created => date_windows(config)?
            .into_iter()
            .map(|window| {
                Partition::new(
                    window.key(),
                    predicate(&config.base_query, &[window.qualifier()]),
                )
            })
            .collect(),

        Strategy::CreatedStars => {
            let stars = star_ranges(config)?;
            let windows = date_windows(config)?;
            let mut partitions = Vec::with_capacity(stars.len() * windows.len());

            for window in &windows {
                for range in &stars {
                    partitions.push(Partition::new(
                        format!("{}/{}", window.key(), range.key()),
                        predicate(
                            &config.base_query,
                            &[window.qualifier(), range.qualifier()],
                        ),
                    ));
                }
            }

            partitions
        }
    };

    tracing::debug!(
        "Built {} partitions with {:?} strategy",
        partitions.len(),
        config.strategy
    );

    Ok(partitions)
}

/// Computes a stable fingerprint of a partition plan
///
/// A stored crawl is only resumed when its fingerprint matches the plan built
/// from the current configuration.
pub fn plan_fingerprint(partitions: &[Partition]) -> String {
    let mut hasher = Sha256::new();
    for partition in partitions {
        hasher.update(partition.key.as_bytes());
        hasher.update(b"\t");
        hasher.update(partition.predicate.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

fn star_ranges(config: &DiscoveryConfig) -> Result<Vec<StarRange>, ConfigError> {
    if config.star_bounds.is_empty() {
        return Err(ConfigError::InvalidDiscovery(
            "star-bounds cannot be empty".to_string(),
        ));
    }
    Ok(StarRange::from_bounds(&config.star_bounds))
}

fn date_windows(config: &DiscoveryConfig) -> Result<Vec<DateWindow>, ConfigError> {
    match (config.created_from, config.created_to) {
        (Some(from), Some(to)) if from < to => {
            Ok(DateWindow::split(from, to, config.window_days))
        }
        _ => Err(ConfigError::InvalidDiscovery(
            "date partitioning needs created-from before created-to".to_string(),
        )),
    }
}

fn predicate(base_query: &str, qualifiers: &[String]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(qualifiers.len() + 1);
    let base = base_query.trim();
    if !base.is_empty() {
        parts.push(base);
    }
    parts.extend(qualifiers.iter().map(String::as_str));
    parts.join(" ")
}
