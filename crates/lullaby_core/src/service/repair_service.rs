//! Repair engine reconciling the embedded and indexed representations.
//!
//! # Responsibility
//! - Rewrite one or both representations of a child per a chosen strategy.
//! - Re-analyze after writing and report whether drift remains.
//!
//! # Invariants
//! - Merge never drops a record present in either input. Its output size
//!   lies in `[max(|E|, |I|), |E| + |I|]`.
//! - A child already in full key agreement is left untouched.
//! - Batches abort only when the store is unreachable.

use crate::config::IntegrityConfig;
use crate::model::child::ChildId;
use crate::model::event::{EventKey, EventRecord};
use crate::repo::child_repo::ChildDirectory;
use crate::repo::event_repo::EventRecordStore;
use crate::service::consistency_service::{
    compare_representations, ChildFailure, ConsistencyAnalyzer, IntegrityError, SyncReport,
};
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

/// Which representation wins during a repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepairStrategy {
    /// Wipe indexed and re-derive it from embedded with fresh ids.
    EmbeddedAuthoritative,
    /// Overwrite embedded with the indexed set.
    IndexedAuthoritative,
    /// Union both by key and write the union to both sides.
    Merge,
}

impl RepairStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmbeddedAuthoritative => "embedded-authoritative",
            Self::IndexedAuthoritative => "indexed-authoritative",
            Self::Merge => "merge",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "embedded-authoritative" => Some(Self::EmbeddedAuthoritative),
            "indexed-authoritative" => Some(Self::IndexedAuthoritative),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }
}

impl Display for RepairStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of repairing one child.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairOutcome {
    pub child_id: ChildId,
    pub strategy: RepairStrategy,
    /// Post-repair analysis reports full key agreement.
    pub success: bool,
    /// `false` when the child was already in agreement and nothing was written.
    pub changed: bool,
    pub written_embedded: usize,
    pub written_indexed: usize,
    pub post_analysis: SyncReport,
}

impl RepairOutcome {
    /// Converts residual drift into `IntegrityError::PartialRepair`.
    pub fn into_result(self) -> Result<Self, IntegrityError> {
        if self.success {
            Ok(self)
        } else {
            Err(IntegrityError::PartialRepair {
                child_id: self.child_id,
                report: Box::new(self.post_analysis),
            })
        }
    }
}

/// Aggregate of a system-wide repair sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemRepairSummary {
    pub strategy: RepairStrategy,
    pub fixed: usize,
    pub failed: usize,
    pub total: usize,
    pub failures: Vec<ChildFailure>,
}

/// Unions two record lists by `EventKey`.
///
/// Each key appears `max(count_embedded, count_indexed)` times. On collision
/// the embedded copy wins; surplus indexed copies are appended. Ids repeated
/// in the output are replaced with fresh ones.
pub fn merge_representations(embedded: &[EventRecord], indexed: &[EventRecord]) -> Vec<EventRecord> {
    let mut embedded_remaining: BTreeMap<EventKey, usize> = BTreeMap::new();
    for record in embedded {
        *embedded_remaining.entry(record.key()).or_insert(0) += 1;
    }

    let mut merged: Vec<EventRecord> = embedded.to_vec();
    for record in indexed {
        match embedded_remaining.get_mut(&record.key()) {
            Some(remaining) if *remaining > 0 => *remaining -= 1,
            _ => merged.push(record.clone()),
        }
    }

    merged.sort_by_key(|record| (record.start_time.is_none(), record.start_time));

    let mut seen = HashSet::with_capacity(merged.len());
    for record in &mut merged {
        if !seen.insert(record.id) {
            record.id = Uuid::new_v4();
            seen.insert(record.id);
        }
    }
    merged
}

pub struct RepairEngine<S, D>
where
    S: EventRecordStore + Clone,
    D: ChildDirectory + Clone,
{
    store: S,
    directory: D,
    analyzer: ConsistencyAnalyzer<S, D>,
    config: IntegrityConfig,
}

impl<S, D> RepairEngine<S, D>
where
    S: EventRecordStore + Clone,
    D: ChildDirectory + Clone,
{
    pub fn new(store: S, directory: D, config: IntegrityConfig) -> Self {
        let analyzer = ConsistencyAnalyzer::new(store.clone(), directory.clone(), config);
        Self {
            store,
            directory,
            analyzer,
            config,
        }
    }

    /// Repairs one child and re-analyzes it with full key verification.
    ///
    /// Residual drift is reported through `success = false`; use
    /// [`RepairOutcome::into_result`] to treat it as an error.
    pub fn repair_child(
        &self,
        child_id: ChildId,
        strategy: RepairStrategy,
    ) -> Result<RepairOutcome, IntegrityError> {
        let embedded = self.store.get(child_id)?;
        let indexed = self.store.list_indexed(child_id)?;
        let before = compare_representations(child_id, &embedded, &indexed, true);

        if before.synced {
            info!(
                "event=repair_child module=repair status=noop child_id={} strategy={}",
                child_id, strategy
            );
            return Ok(RepairOutcome {
                child_id,
                strategy,
                success: true,
                changed: false,
                written_embedded: 0,
                written_indexed: 0,
                post_analysis: before,
            });
        }

        let (written_embedded, written_indexed) = match strategy {
            RepairStrategy::EmbeddedAuthoritative => {
                let derived: Vec<EventRecord> = embedded
                    .iter()
                    .map(|record| {
                        let mut copy = record.clone();
                        copy.id = Uuid::new_v4();
                        copy.child_id = child_id;
                        copy
                    })
                    .collect();
                let written = self.store.replace_indexed(child_id, &derived)?;
                (0, written)
            }
            RepairStrategy::IndexedAuthoritative => {
                let mut ordered = indexed;
                ordered.sort_by_key(|record| (record.start_time.is_none(), record.start_time));
                self.store.replace_embedded(child_id, &ordered)?;
                (ordered.len(), 0)
            }
            RepairStrategy::Merge => {
                let merged = merge_representations(&embedded, &indexed);
                let written = self.store.replace_all(child_id, &merged)?;
                (written, written)
            }
        };

        let post_analysis = self.analyzer.analyze_child_with(child_id, true)?;
        let success = post_analysis.synced;
        if success {
            info!(
                "event=repair_child module=repair status=ok child_id={} strategy={} embedded={} indexed={}",
                child_id, strategy, written_embedded, written_indexed
            );
        } else {
            warn!(
                "event=repair_child module=repair status=partial child_id={} strategy={} discrepancy={}",
                child_id, strategy, post_analysis.discrepancy
            );
        }

        Ok(RepairOutcome {
            child_id,
            strategy,
            success,
            changed: true,
            written_embedded,
            written_indexed,
            post_analysis,
        })
    }

    /// Repairs every child with the same strategy.
    pub fn repair_system(
        &self,
        strategy: RepairStrategy,
    ) -> Result<SystemRepairSummary, IntegrityError> {
        let started_at = Instant::now();
        let child_ids = self.directory.list_all()?;
        info!(
            "event=repair_system module=repair status=start strategy={} children={}",
            strategy,
            child_ids.len()
        );

        let mut summary = SystemRepairSummary {
            strategy,
            fixed: 0,
            failed: 0,
            total: child_ids.len(),
            failures: Vec::new(),
        };

        for (index, child_id) in child_ids.into_iter().enumerate() {
            self.config.pace(index);
            match self.repair_child(child_id, strategy) {
                Ok(outcome) if outcome.success => summary.fixed += 1,
                Ok(outcome) => {
                    summary.failed += 1;
                    summary.failures.push(ChildFailure {
                        child_id,
                        error: IntegrityError::PartialRepair {
                            child_id,
                            report: Box::new(outcome.post_analysis),
                        }
                        .to_string(),
                    });
                }
                Err(err) if err.aborts_batch() => {
                    warn!(
                        "event=repair_system module=repair status=aborted child_id={} error={}",
                        child_id, err
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        "event=repair_child module=repair status=error child_id={} error={}",
                        child_id, err
                    );
                    summary.failed += 1;
                    summary.failures.push(ChildFailure {
                        child_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            "event=repair_system module=repair status=ok duration_ms={} fixed={} failed={} total={}",
            started_at.elapsed().as_millis(),
            summary.fixed,
            summary.failed,
            summary.total
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_representations, RepairStrategy};
    use crate::model::event::{EventRecord, EventType};
    use std::collections::HashSet;
    use uuid::Uuid;

    fn nap_at(child: Uuid, start: i64) -> EventRecord {
        EventRecord::interval(child, EventType::Nap, start, start + 60_000)
    }

    #[test]
    fn merge_keeps_max_multiplicity_per_key() {
        let child = Uuid::new_v4();
        let embedded = vec![nap_at(child, 1_000), nap_at(child, 1_000), nap_at(child, 9_000)];
        let indexed = vec![nap_at(child, 1_000), nap_at(child, 20_000)];

        let merged = merge_representations(&embedded, &indexed);
        assert_eq!(merged.len(), 4);
        assert!(merged.len() >= embedded.len().max(indexed.len()));
        assert!(merged.len() <= embedded.len() + indexed.len());
        let ids: HashSet<_> = merged.iter().map(|record| record.id).collect();
        assert_eq!(ids.len(), merged.len());
    }

    #[test]
    fn merge_prefers_embedded_copy_on_collision() {
        let child = Uuid::new_v4();
        let mut from_embedded = nap_at(child, 1_000);
        from_embedded.notes = Some("embedded".to_string());
        let mut from_indexed = nap_at(child, 1_400);
        from_indexed.notes = Some("indexed".to_string());

        let merged = merge_representations(&[from_embedded.clone()], &[from_indexed]);
        assert_eq!(merged, vec![from_embedded]);
    }

    #[test]
    fn merge_replaces_repeated_ids() {
        let child = Uuid::new_v4();
        let first = nap_at(child, 1_000);
        let mut second = nap_at(child, 50_000);
        second.id = first.id;

        let merged = merge_representations(&[first.clone()], &[second]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, first.id);
        assert_ne!(merged[1].id, first.id);
    }

    #[test]
    fn strategy_tags_round_trip() {
        for strategy in [
            RepairStrategy::EmbeddedAuthoritative,
            RepairStrategy::IndexedAuthoritative,
            RepairStrategy::Merge,
        ] {
            assert_eq!(RepairStrategy::parse(strategy.as_str()), Some(strategy));
        }
        assert_eq!(RepairStrategy::parse("newest"), None);
    }
}
