//! Qualitative health summary over store connectivity, contamination and drift.
//!
//! # Invariants
//! - `check` never fails: an unreachable store is reported as `Critical`
//!   with `store_connected = false`. Any other scan or sweep failure is
//!   `Critical` with the store still marked connected.
//! - Status thresholds apply to the contamination rate only.

use crate::config::IntegrityConfig;
use crate::repo::child_repo::ChildDirectory;
use crate::repo::event_repo::EventRecordStore;
use crate::service::consistency_service::{
    ConsistencyAnalyzer, IntegrityError, SystemSyncReport,
};
use crate::service::contamination_service::{ContaminationReport, ContaminationScanner};
use log::{info, warn};
use serde::Serialize;
use std::fmt::{Display, Formatter};

const WARNING_RATE: f64 = 5.0;
const CRITICAL_RATE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// `<5%` healthy, `5-10%` warning, `>10%` critical.
    pub fn from_contamination_rate(rate: f64) -> Self {
        if rate < WARNING_RATE {
            Self::Healthy
        } else if rate <= CRITICAL_RATE {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub store_connected: bool,
    pub contamination_rate: f64,
    pub orphaned_count: usize,
    pub total_indexed: usize,
    pub total_children: usize,
    pub unsynced_children: usize,
    pub recommendations: Vec<String>,
}

impl HealthReport {
    fn disconnected(reason: &str) -> Self {
        Self {
            status: HealthStatus::Critical,
            store_connected: false,
            contamination_rate: 0.0,
            orphaned_count: 0,
            total_indexed: 0,
            total_children: 0,
            unsynced_children: 0,
            recommendations: vec![format!(
                "Event store is unreachable ({reason}); check the database path and retry."
            )],
        }
    }

    /// Store answered but `stage` could not complete.
    fn failed(stage: &str, err: &IntegrityError) -> Self {
        Self {
            store_connected: true,
            recommendations: vec![format!(
                "The {stage} failed ({err}); inspect the store before cleaning or repairing."
            )],
            ..Self::disconnected("")
        }
    }

    fn from_failure(stage: &str, err: &IntegrityError) -> Self {
        if err.aborts_batch() {
            Self::disconnected(&err.to_string())
        } else {
            Self::failed(stage, err)
        }
    }
}

pub struct HealthCheck<S, D>
where
    S: EventRecordStore + Clone,
    D: ChildDirectory + Clone,
{
    store: S,
    analyzer: ConsistencyAnalyzer<S, D>,
    scanner: ContaminationScanner<S, D>,
}

impl<S, D> HealthCheck<S, D>
where
    S: EventRecordStore + Clone,
    D: ChildDirectory + Clone,
{
    pub fn new(store: S, directory: D, config: IntegrityConfig) -> Self {
        Self {
            analyzer: ConsistencyAnalyzer::new(store.clone(), directory.clone(), config),
            scanner: ContaminationScanner::new(store.clone(), directory, config),
            store,
        }
    }

    pub fn check(&self) -> HealthReport {
        if let Err(err) = self.store.ping() {
            warn!(
                "event=health_check module=health status=disconnected error={}",
                err
            );
            return HealthReport::disconnected(&err.to_string());
        }

        let contamination = match self.scanner.scan() {
            Ok(report) => report,
            Err(err) => {
                warn!("event=health_check module=health status=scan_failed error={}", err);
                return HealthReport::from_failure("contamination scan", &err);
            }
        };
        let sync = match self.analyzer.analyze_system() {
            Ok(report) => report,
            Err(err) => {
                warn!(
                    "event=health_check module=health status=analyze_failed error={}",
                    err
                );
                return HealthReport::from_failure("consistency sweep", &err);
            }
        };

        let report = summarize(&contamination, &sync);
        info!(
            "event=health_check module=health status={} rate={:.2} orphaned={} unsynced={}",
            report.status,
            report.contamination_rate,
            report.orphaned_count,
            report.unsynced_children
        );
        report
    }
}

/// Builds the report from a completed scan and sweep.
pub fn summarize(contamination: &ContaminationReport, sync: &SystemSyncReport) -> HealthReport {
    let status = HealthStatus::from_contamination_rate(contamination.contamination_rate);
    let orphaned_count = contamination.orphaned_count();

    let mut recommendations = Vec::new();
    if orphaned_count > 0 {
        recommendations.push(format!(
            "Run `clean --apply` to remove {orphaned_count} orphaned indexed events."
        ));
    }
    if sync.unsynced_children > 0 {
        recommendations.push(format!(
            "Run `repair --strategy merge` for {} children whose event lists drifted.",
            sync.unsynced_children
        ));
    }
    let duplicated = sync
        .reports
        .iter()
        .filter(|report| !report.duplicates.is_empty())
        .count();
    if duplicated > 0 {
        recommendations.push(format!(
            "{duplicated} children have duplicate indexed events; review before repairing."
        ));
    }
    if !contamination.unreadable_rows.is_empty() {
        recommendations.push(format!(
            "{} indexed rows could not be read; inspect them manually.",
            contamination.unreadable_rows.len()
        ));
    }
    if !sync.failures.is_empty() {
        recommendations.push(format!(
            "{} children could not be analyzed; see the log for details.",
            sync.failures.len()
        ));
    }
    if recommendations.is_empty() {
        recommendations.push("No action needed.".to_string());
    }

    HealthReport {
        status,
        store_connected: true,
        contamination_rate: contamination.contamination_rate,
        orphaned_count,
        total_indexed: contamination.total_indexed,
        total_children: sync.total_children,
        unsynced_children: sync.unsynced_children,
        recommendations,
    }
}
