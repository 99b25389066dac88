//! Batch resolution: drives a [`KeysLookup`] over a submitted batch.
//!
//! 1. Validate every decoded row; rejected rows become `Fail` rows for every
//!    applicable peril/coverage pair and never reach the lookup.
//! 2. Resolve valid locations one per blocking task, each bounded by the
//!    per-location timeout. At most `concurrency` tasks run at a time; a task
//!    abandoned after a timeout keeps its slot until it actually returns.
//! 3. Merge in input order, rows of a location sorted by (peril, coverage).
//!
//! Any infrastructure error aborts the batch and nothing is returned. Dropping
//! the `run` future abandons the remaining locations.
//!
//! [`KeysLookup`]: crate::lookup::KeysLookup

use crate::errors::{LookupError, ResolveError};
use crate::lookup::{LookupConfiguration, LookupSnapshot};
use crate::models::{BatchSummary, CoverageTypeId, KeyResult, KeyStatus, LocationRecord, PerilId, RawLocation};
use crate::resolution_cache::ResolutionCache;
use crate::validation::validate_location;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Tuning knobs for batch resolution.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Maximum number of locations resolved at the same time.
    pub concurrency: usize,
    /// Upper bound for a single location lookup. `None` waits indefinitely.
    pub location_timeout: Option<Duration>,
    /// Abort the batch once more than this many locations have timed out.
    pub timeout_abort_threshold: Option<usize>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            location_timeout: Some(Duration::from_secs(5)),
            timeout_abort_threshold: None,
        }
    }
}

/// Fully resolved batch, in output order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBatch {
    pub results: Vec<KeyResult>,
    pub summary: BatchSummary,
}

impl IntoIterator for ResolvedBatch {
    type Item = KeyResult;
    type IntoIter = std::vec::IntoIter<KeyResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

enum Entry {
    Rejected {
        row: usize,
        location_id: Option<String>,
        message: String,
    },
    Valid(LocationRecord),
}

enum Outcome {
    Rejected(Vec<KeyResult>),
    Resolved(Vec<KeyResult>),
    Cached(Vec<KeyResult>),
    TimedOut(Vec<KeyResult>),
}

pub struct BatchResolver {
    settings: ResolverSettings,
    cache: Option<ResolutionCache>,
}

impl BatchResolver {
    pub fn new(settings: ResolverSettings) -> Self {
        Self {
            settings,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: ResolutionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn cache(&self) -> Option<&ResolutionCache> {
        self.cache.as_ref()
    }

    /// Resolves a decoded batch against one snapshot.
    pub async fn run(
        &self,
        raw: Vec<RawLocation>,
        snapshot: &LookupSnapshot,
    ) -> Result<ResolvedBatch, ResolveError> {
        let pairs = snapshot.config.applicable_pairs();
        let mut summary = BatchSummary {
            locations_received: raw.len(),
            ..Default::default()
        };

        let entries = partition(raw, &snapshot.config)?;
        summary.locations_rejected = entries
            .iter()
            .filter(|e| matches!(e, Entry::Rejected { .. }))
            .count();

        let concurrency = self.settings.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut outcomes = stream::iter(entries)
            .map(|entry| self.resolve_entry(entry, snapshot, &pairs, &permits))
            .buffered(concurrency);

        let mut results = Vec::with_capacity(summary.locations_received * pairs.len());
        while let Some(outcome) = outcomes.next().await {
            let rows = match outcome? {
                Outcome::Rejected(rows) | Outcome::Resolved(rows) => rows,
                Outcome::Cached(rows) => {
                    summary.cache_hits += 1;
                    rows
                }
                Outcome::TimedOut(rows) => {
                    summary.locations_timed_out += 1;
                    if let Some(threshold) = self.settings.timeout_abort_threshold {
                        if summary.locations_timed_out > threshold {
                            tracing::error!(
                                "Aborting batch: {} locations timed out (threshold {})",
                                summary.locations_timed_out,
                                threshold
                            );
                            return Err(ResolveError::SystemicTimeout {
                                timed_out: summary.locations_timed_out,
                                threshold,
                            });
                        }
                    }
                    rows
                }
            };
            results.extend(rows);
        }

        for row in &results {
            summary.record(row);
        }

        tracing::info!(
            "Resolved batch of {} locations into {} rows (success={}, nomatch={}, fail={}, rejected={}, timed_out={}, cache_hits={})",
            summary.locations_received,
            summary.total_rows(),
            summary.success,
            summary.no_match,
            summary.fail,
            summary.locations_rejected,
            summary.locations_timed_out,
            summary.cache_hits
        );

        Ok(ResolvedBatch { results, summary })
    }

    async fn resolve_entry(
        &self,
        entry: Entry,
        snapshot: &LookupSnapshot,
        pairs: &[(PerilId, CoverageTypeId)],
        permits: &Arc<Semaphore>,
    ) -> Result<Outcome, ResolveError> {
        let location = match entry {
            Entry::Rejected {
                row,
                location_id,
                message,
            } => {
                tracing::warn!(
                    "Rejected location at row {} ({:?}): {}",
                    row,
                    location_id,
                    message
                );
                return Ok(Outcome::Rejected(fail_rows(&location_id, pairs, &message)));
            }
            Entry::Valid(location) => location,
        };

        let cache_key = self
            .cache
            .as_ref()
            .filter(|_| snapshot.lookup.cacheable_by_attributes())
            .map(|_| ResolutionCache::key(snapshot.generation, &location));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(rows) = cache.get(key, &location.location_id).await {
                tracing::debug!("Cache hit for location {}", location.location_id);
                return Ok(Outcome::Cached(rows));
            }
        }

        let location_id = location.location_id.clone();
        let lookup = snapshot.lookup.clone();
        let config = snapshot.config.clone();
        let permits = permits.clone();
        let task = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| LookupError::Internal(format!("lookup slots closed: {}", e)))?;
            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                lookup
                    .resolve(vec![location], &config)
                    .collect::<Result<Vec<_>, LookupError>>()
            })
            .await;
            Ok::<_, LookupError>(joined)
        };

        // The timeout also covers waiting for a free slot.
        let joined = match self.settings.location_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined?,
                Err(_) => {
                    tracing::warn!(
                        "Lookup for location {} timed out after {} ms",
                        location_id,
                        limit.as_millis()
                    );
                    let message = format!("lookup timed out after {} ms", limit.as_millis());
                    return Ok(Outcome::TimedOut(fail_rows(
                        &Some(location_id),
                        pairs,
                        &message,
                    )));
                }
            },
            None => task.await?,
        };

        let rows = match joined {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                tracing::error!("Lookup failed for location {}: {}", location_id, e);
                return Err(ResolveError::Infrastructure(e));
            }
            Err(join_error) => {
                tracing::error!(
                    "Lookup task for location {} did not complete: {}",
                    location_id,
                    join_error
                );
                return Ok(Outcome::Resolved(fail_rows(
                    &Some(location_id),
                    pairs,
                    "lookup task failed",
                )));
            }
        };

        let rows = conform(&location_id, rows, pairs)?;

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, &rows).await;
        }

        Ok(Outcome::Resolved(rows))
    }
}

/// Validates rows up front and rejects duplicate identifiers.
fn partition(raw: Vec<RawLocation>, config: &LookupConfiguration) -> Result<Vec<Entry>, ResolveError> {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(raw.len());

    for location in raw {
        let row = location.row;
        let location_id = location
            .location_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        if let Some(id) = &location_id {
            if !seen.insert(id.clone()) {
                return Err(ResolveError::DuplicateLocationId(id.clone()));
            }
        }

        match validate_location(location, &config.schema) {
            Ok(record) => entries.push(Entry::Valid(record)),
            Err(e) => entries.push(Entry::Rejected {
                row,
                location_id,
                message: e.message,
            }),
        }
    }

    Ok(entries)
}

fn fail_rows(
    location_id: &Option<String>,
    pairs: &[(PerilId, CoverageTypeId)],
    message: &str,
) -> Vec<KeyResult> {
    pairs
        .iter()
        .map(|(peril, coverage)| KeyResult::fail(location_id.clone(), peril.clone(), *coverage, message))
        .collect()
}

/// Checks the lookup honored its contract for one location and returns the
/// rows in (peril, coverage) order, filling pairs it did not answer.
fn conform(
    location_id: &str,
    rows: Vec<KeyResult>,
    pairs: &[(PerilId, CoverageTypeId)],
) -> Result<Vec<KeyResult>, ResolveError> {
    let applicable: HashSet<_> = pairs.iter().collect();
    let mut by_pair = BTreeMap::new();

    for row in rows {
        if row.location_id.as_deref() != Some(location_id) {
            return Err(LookupError::Internal(format!(
                "lookup returned a row for {:?} while resolving {}",
                row.location_id, location_id
            ))
            .into());
        }
        let pair = (row.peril_id.clone(), row.coverage_type);
        if !applicable.contains(&pair) {
            return Err(LookupError::Internal(format!(
                "lookup returned inactive peril/coverage {}/{} for {}",
                pair.0, pair.1, location_id
            ))
            .into());
        }
        let has_ids = row.area_peril_id.is_some() && row.vulnerability_id.is_some();
        if (row.status == KeyStatus::Success) != has_ids {
            return Err(LookupError::Internal(format!(
                "lookup returned {} row for {} with inconsistent ids",
                row.status, location_id
            ))
            .into());
        }
        if by_pair.insert(pair.clone(), row).is_some() {
            return Err(LookupError::Internal(format!(
                "lookup returned {}/{} twice for {}",
                pair.0, pair.1, location_id
            ))
            .into());
        }
    }

    Ok(pairs
        .iter()
        .map(|(peril, coverage)| {
            by_pair
                .remove(&(peril.clone(), *coverage))
                .unwrap_or_else(|| {
                    KeyResult::fail(
                        Some(location_id.to_string()),
                        peril.clone(),
                        *coverage,
                        "lookup returned no result",
                    )
                })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs() -> Vec<(PerilId, CoverageTypeId)> {
        vec![
            (PerilId::new("QEQ"), CoverageTypeId::BUILDINGS),
            (PerilId::new("QEQ"), CoverageTypeId::CONTENTS),
        ]
    }

    #[test]
    fn test_conform_sorts_and_fills_gaps() {
        let rows = vec![KeyResult::no_match(
            "L1",
            PerilId::new("QEQ"),
            CoverageTypeId::CONTENTS,
            "no vulnerability",
        )];

        let conformed = conform("L1", rows, &pairs()).unwrap();
        assert_eq!(conformed.len(), 2);
        assert_eq!(conformed[0].coverage_type, CoverageTypeId::BUILDINGS);
        assert_eq!(conformed[0].status, KeyStatus::Fail);
        assert_eq!(conformed[0].message, "lookup returned no result");
        assert_eq!(conformed[1].status, KeyStatus::NoMatch);
    }

    #[test]
    fn test_conform_rejects_duplicates() {
        let row = KeyResult::no_match("L1", PerilId::new("QEQ"), CoverageTypeId::BUILDINGS, "x");
        let result = conform("L1", vec![row.clone(), row], &pairs());
        assert!(matches!(
            result,
            Err(ResolveError::Infrastructure(LookupError::Internal(_)))
        ));
    }

    #[test]
    fn test_conform_rejects_foreign_location() {
        let row = KeyResult::no_match("L2", PerilId::new("QEQ"), CoverageTypeId::BUILDINGS, "x");
        assert!(conform("L1", vec![row], &pairs()).is_err());
    }

    #[test]
    fn test_conform_rejects_inactive_pair() {
        let row = KeyResult::no_match("L1", PerilId::new("WTC"), CoverageTypeId::BUILDINGS, "x");
        assert!(conform("L1", vec![row], &pairs()).is_err());
    }
}
