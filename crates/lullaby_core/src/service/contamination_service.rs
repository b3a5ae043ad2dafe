//! Contamination scanner for indexed events whose child no longer exists.
//!
//! # Responsibility
//! - Partition the indexed set into valid and orphaned records.
//! - Delete orphans in bounded batches, grouped by owning child id.
//!
//! # Invariants
//! - Dry run is the default and never writes.
//! - A failed group is recorded and skipped; other groups still run.
//! - Only an unreachable store aborts a clean.
//! - Orphan detection reads owner and key columns only, so a malformed
//!   record is still classified and can be cleaned.

use crate::config::IntegrityConfig;
use crate::model::child::ChildId;
use crate::model::event::{EventId, EventType};
use crate::repo::child_repo::ChildDirectory;
use crate::repo::event_repo::EventRecordStore;
use crate::service::consistency_service::{ChildFailure, IntegrityError};
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

/// Whether `clean` only counts or actually deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanMode {
    #[default]
    DryRun,
    Apply,
}

/// Indexed record that references a missing child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedEvent {
    pub id: EventId,
    pub child_id: ChildId,
    pub kind: EventType,
    pub start_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContaminationReport {
    pub total_indexed: usize,
    pub orphaned: Vec<OrphanedEvent>,
    pub valid: Vec<EventId>,
    /// `orphaned / total * 100`, zero for an empty index.
    pub contamination_rate: f64,
    pub orphaned_by_child: BTreeMap<ChildId, usize>,
    /// Rows that could not be attributed to any child.
    pub unreadable_rows: Vec<String>,
}

impl ContaminationReport {
    pub fn orphaned_count(&self) -> usize {
        self.orphaned.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CleanOutcome {
    WouldClean {
        count: usize,
    },
    Cleaned {
        count: usize,
        failed_groups: Vec<ChildFailure>,
    },
}

pub fn contamination_rate(orphaned: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    orphaned as f64 / total as f64 * 100.0
}

pub struct ContaminationScanner<S: EventRecordStore, D: ChildDirectory> {
    store: S,
    directory: D,
    config: IntegrityConfig,
}

impl<S: EventRecordStore, D: ChildDirectory> ContaminationScanner<S, D> {
    pub fn new(store: S, directory: D, config: IntegrityConfig) -> Self {
        Self {
            store,
            directory,
            config,
        }
    }

    /// Reads the whole indexed set and the child directory once.
    pub fn scan(&self) -> Result<ContaminationReport, IntegrityError> {
        let started_at = Instant::now();
        let known: HashSet<ChildId> = self.directory.list_all()?.into_iter().collect();
        let listing = self.store.list_index_entries()?;

        let total_indexed = listing.entries.len();
        let mut orphaned = Vec::new();
        let mut valid = Vec::with_capacity(total_indexed);
        let mut orphaned_by_child = BTreeMap::new();
        for entry in listing.entries {
            if known.contains(&entry.child_id) {
                valid.push(entry.id);
            } else {
                *orphaned_by_child.entry(entry.child_id).or_insert(0) += 1;
                orphaned.push(OrphanedEvent {
                    id: entry.id,
                    child_id: entry.child_id,
                    kind: entry.kind,
                    start_time: entry.start_time,
                });
            }
        }

        let report = ContaminationReport {
            total_indexed,
            contamination_rate: contamination_rate(orphaned.len(), total_indexed),
            orphaned,
            valid,
            orphaned_by_child,
            unreadable_rows: listing.unreadable,
        };
        info!(
            "event=contamination_scan module=contamination status=ok duration_ms={} total={} orphaned={} unreadable={} rate={:.2}",
            started_at.elapsed().as_millis(),
            report.total_indexed,
            report.orphaned_count(),
            report.unreadable_rows.len(),
            report.contamination_rate
        );
        Ok(report)
    }

    /// Scans, then deletes orphans when `mode` is `Apply`.
    pub fn clean(&self, mode: CleanMode) -> Result<CleanOutcome, IntegrityError> {
        let report = self.scan()?;
        if mode == CleanMode::DryRun {
            info!(
                "event=contamination_clean module=contamination status=dry_run would_clean={}",
                report.orphaned_count()
            );
            return Ok(CleanOutcome::WouldClean {
                count: report.orphaned_count(),
            });
        }

        let mut groups: BTreeMap<ChildId, Vec<EventId>> = BTreeMap::new();
        for orphan in &report.orphaned {
            groups.entry(orphan.child_id).or_default().push(orphan.id);
        }

        let batch_size = self.config.effective_batch_size();
        let mut cleaned = 0;
        let mut failed_groups = Vec::new();
        for (index, (child_id, ids)) in groups.into_iter().enumerate() {
            self.config.pace(index);
            for chunk in ids.chunks(batch_size) {
                match self.store.delete_many(chunk) {
                    Ok(deleted) => cleaned += deleted,
                    Err(err) => {
                        let err = IntegrityError::from(err);
                        if err.aborts_batch() {
                            warn!(
                                "event=contamination_clean module=contamination status=aborted child_id={} cleaned={} error={}",
                                child_id, cleaned, err
                            );
                            return Err(err);
                        }
                        warn!(
                            "event=contamination_clean module=contamination status=group_failed child_id={} error={}",
                            child_id, err
                        );
                        failed_groups.push(ChildFailure {
                            child_id,
                            error: err.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        info!(
            "event=contamination_clean module=contamination status=ok cleaned={} failed_groups={}",
            cleaned,
            failed_groups.len()
        );
        Ok(CleanOutcome::Cleaned {
            count: cleaned,
            failed_groups,
        })
    }
}
