//! Sleep state resolver.
//!
//! # Responsibility
//! - Derive the current sleep status from persisted records and an instant.
//! - Pair the status with the single primary action for that instant.
//!
//! # Invariants
//! - Pure: no I/O, no clock reads, no logging.
//! - Only `sleep`, `nap` and `night_waking` records starting at or before
//!   `now` are considered; the latest start wins.
//! - Never yields `GoingToSleep`; that status is client-held.

use crate::model::event::{EventRecord, EventType};
use crate::model::sleep::{primary_action, SleepAction, SleepProfile, SleepStatus};
use chrono::{DateTime, FixedOffset, Timelike};

/// Resolver output: derived profile plus the primary next action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub profile: SleepProfile,
    pub next_action: SleepAction,
}

/// Resolves status and next action at local instant `now`.
pub fn resolve(records: &[EventRecord], now: DateTime<FixedOffset>) -> Resolution {
    let profile = resolve_profile(records, now.timestamp_millis());
    Resolution {
        profile,
        next_action: primary_action(profile.status, now.hour()),
    }
}

/// Resolves the persisted sleep profile at `now_ms`.
pub fn resolve_profile(records: &[EventRecord], now_ms: i64) -> SleepProfile {
    let latest = records
        .iter()
        .filter(|record| record.kind.is_sleep_interval())
        .filter_map(|record| record.start_time.map(|start| (start, record)))
        .filter(|(start, _)| *start <= now_ms)
        // Equal starts: an open interval outranks a closed one.
        .max_by_key(|(start, record)| (*start, record.end_time.is_none(), record.id));

    let Some((start, record)) = latest else {
        return SleepProfile::awake();
    };

    if record.end_time.is_some() {
        return SleepProfile {
            status: SleepStatus::Awake,
            since: record.end_time,
            open_event_id: None,
        };
    }

    let status = match record.kind {
        EventType::Sleep => SleepStatus::Sleeping,
        EventType::Nap => SleepStatus::Napping,
        EventType::NightWaking => SleepStatus::NightWaking,
        EventType::Wake
        | EventType::Bedtime
        | EventType::Feeding
        | EventType::NightFeeding
        | EventType::Medication
        | EventType::ExtraActivities => SleepStatus::Awake,
    };

    SleepProfile {
        status,
        since: Some(start),
        open_event_id: Some(record.id),
    }
}

/// Open sleep-interval records, any type.
pub fn open_intervals(records: &[EventRecord]) -> Vec<&EventRecord> {
    records.iter().filter(|record| record.is_open()).collect()
}
