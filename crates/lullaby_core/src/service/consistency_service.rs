//! Consistency analyzer for the two event representations.
//!
//! # Responsibility
//! - Compare the embedded list and the indexed set of one child by
//!   `EventKey` multiset and report drift.
//! - Sweep every child and aggregate the results.
//!
//! # Invariants
//! - Read-only. Safe to run while caregivers keep writing; results are
//!   eventually consistent, not a point-in-time snapshot.
//! - A per-child failure is recorded and the sweep continues; only an
//!   unreachable store aborts it.

use crate::config::IntegrityConfig;
use crate::model::child::ChildId;
use crate::model::event::{EventKey, EventRecord};
use crate::repo::child_repo::ChildDirectory;
use crate::repo::event_repo::{EventRecordStore, RepoError};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Errors shared by the integrity services (analyzer, repair, scanner,
/// cascade delete, health check).
#[derive(Debug)]
pub enum IntegrityError {
    /// Child id does not resolve. Fatal for one operation, never a batch.
    ChildNotFound(ChildId),
    /// Store unreachable. Aborts the whole batch; not retried internally.
    StoreUnavailable(RepoError),
    /// Drift persisted after a repair. Callers may retry.
    PartialRepair {
        child_id: ChildId,
        report: Box<SyncReport>,
    },
    /// Any other persistence failure scoped to the current child.
    Store(RepoError),
}

impl IntegrityError {
    /// Whether a batch must stop instead of moving to the next child.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl Display for IntegrityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChildNotFound(id) => write!(f, "child not found: {id}"),
            Self::StoreUnavailable(err) => write!(f, "event store unavailable: {err}"),
            Self::PartialRepair { child_id, report } => write!(
                f,
                "repair of child {child_id} left drift: embedded={} indexed={}",
                report.embedded_count, report.indexed_count
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IntegrityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StoreUnavailable(err) | Self::Store(err) => Some(err),
            Self::ChildNotFound(_) | Self::PartialRepair { .. } => None,
        }
    }
}

impl From<RepoError> for IntegrityError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::ChildNotFound(id) => Self::ChildNotFound(id),
            other if other.is_unavailable() => Self::StoreUnavailable(other),
            other => Self::Store(other),
        }
    }
}

/// Drift report for one child.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub child_id: ChildId,
    pub embedded_count: usize,
    pub indexed_count: usize,
    pub synced: bool,
    /// Absolute cardinality difference.
    pub discrepancy: usize,
    /// Present in embedded, absent from indexed (one entry per missing copy).
    pub missing_in_indexed: Vec<EventKey>,
    /// Present in indexed, absent from embedded. Non-empty means a write
    /// bypassed the embedded list or clocks disagreed.
    pub missing_in_embedded: Vec<EventKey>,
    /// Keys repeated within the indexed set alone.
    pub duplicates: Vec<EventKey>,
    pub sync_percentage: f64,
}

/// One child that could not be processed during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildFailure {
    pub child_id: ChildId,
    pub error: String,
}

/// Aggregate of a system-wide analysis sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSyncReport {
    pub total_children: usize,
    pub synced_children: usize,
    pub unsynced_children: usize,
    pub total_discrepancies: usize,
    pub reports: Vec<SyncReport>,
    pub failures: Vec<ChildFailure>,
}

/// Compares both representations of one child.
///
/// `synced` is a cardinality check; key lists are only computed when it
/// fails, unless `verify_keys` asks for a full multiset comparison.
pub fn compare_representations(
    child_id: ChildId,
    embedded: &[EventRecord],
    indexed: &[EventRecord],
    verify_keys: bool,
) -> SyncReport {
    let embedded_count = embedded.len();
    let indexed_count = indexed.len();
    let counts_match = embedded_count == indexed_count;

    let mut report = SyncReport {
        child_id,
        embedded_count,
        indexed_count,
        synced: counts_match,
        discrepancy: embedded_count.abs_diff(indexed_count),
        missing_in_indexed: Vec::new(),
        missing_in_embedded: Vec::new(),
        duplicates: Vec::new(),
        sync_percentage: sync_percentage(embedded_count, indexed_count),
    };

    if counts_match && !verify_keys {
        return report;
    }

    let embedded_keys = key_counts(embedded);
    let indexed_keys = key_counts(indexed);
    report.missing_in_indexed = multiset_difference(&embedded_keys, &indexed_keys);
    report.missing_in_embedded = multiset_difference(&indexed_keys, &embedded_keys);
    report.duplicates = indexed_keys
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(key, _)| *key)
        .collect();

    if verify_keys {
        report.synced = counts_match
            && report.missing_in_indexed.is_empty()
            && report.missing_in_embedded.is_empty();
    }
    report
}

/// `min/max * 100`, or 100 when both sides are empty.
pub fn sync_percentage(embedded_count: usize, indexed_count: usize) -> f64 {
    let max = embedded_count.max(indexed_count);
    if max == 0 {
        return 100.0;
    }
    let min = embedded_count.min(indexed_count);
    min as f64 / max as f64 * 100.0
}

pub(crate) fn key_counts(records: &[EventRecord]) -> BTreeMap<EventKey, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.key()).or_insert(0) += 1;
    }
    counts
}

fn multiset_difference(
    left: &BTreeMap<EventKey, usize>,
    right: &BTreeMap<EventKey, usize>,
) -> Vec<EventKey> {
    let mut missing = Vec::new();
    for (key, count) in left {
        let other = right.get(key).copied().unwrap_or(0);
        for _ in other..*count {
            missing.push(*key);
        }
    }
    missing
}

/// Read-only analyzer over both representations.
pub struct ConsistencyAnalyzer<S: EventRecordStore, D: ChildDirectory> {
    store: S,
    directory: D,
    config: IntegrityConfig,
}

impl<S: EventRecordStore, D: ChildDirectory> ConsistencyAnalyzer<S, D> {
    pub fn new(store: S, directory: D, config: IntegrityConfig) -> Self {
        Self {
            store,
            directory,
            config,
        }
    }

    /// Reports drift for one child.
    pub fn analyze_child(&self, child_id: ChildId) -> Result<SyncReport, IntegrityError> {
        self.analyze_child_with(child_id, self.config.verify_keys)
    }

    pub(crate) fn analyze_child_with(
        &self,
        child_id: ChildId,
        verify_keys: bool,
    ) -> Result<SyncReport, IntegrityError> {
        let embedded = self.store.get(child_id)?;
        let indexed = self.store.list_indexed(child_id)?;
        Ok(compare_representations(
            child_id,
            &embedded,
            &indexed,
            verify_keys,
        ))
    }

    /// Sweeps every child, pacing by `sweep_delay`.
    pub fn analyze_system(&self) -> Result<SystemSyncReport, IntegrityError> {
        let started_at = Instant::now();
        let child_ids = self.directory.list_all()?;
        info!(
            "event=analyze_system module=consistency status=start children={}",
            child_ids.len()
        );

        let mut summary = SystemSyncReport {
            total_children: child_ids.len(),
            synced_children: 0,
            unsynced_children: 0,
            total_discrepancies: 0,
            reports: Vec::with_capacity(child_ids.len()),
            failures: Vec::new(),
        };

        for (index, child_id) in child_ids.into_iter().enumerate() {
            self.config.pace(index);
            match self.analyze_child(child_id) {
                Ok(report) => {
                    if report.synced {
                        summary.synced_children += 1;
                    } else {
                        summary.unsynced_children += 1;
                    }
                    summary.total_discrepancies += report.discrepancy;
                    summary.reports.push(report);
                }
                Err(err) if err.aborts_batch() => {
                    warn!(
                        "event=analyze_system module=consistency status=aborted child_id={} error={}",
                        child_id, err
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        "event=analyze_child module=consistency status=error child_id={} error={}",
                        child_id, err
                    );
                    summary.failures.push(ChildFailure {
                        child_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            "event=analyze_system module=consistency status=ok duration_ms={} synced={} unsynced={} failed={} discrepancies={}",
            started_at.elapsed().as_millis(),
            summary.synced_children,
            summary.unsynced_children,
            summary.failures.len(),
            summary.total_discrepancies
        );
        Ok(summary)
    }
}
