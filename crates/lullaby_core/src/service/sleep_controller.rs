//! Sleep cycle controller.
//!
//! # Responsibility
//! - Own per-child session state (deferred onset, registered bedtime).
//! - Validate caregiver actions against the action table and issue writes.
//! - Reconcile the optimistic status with persisted state after writes.
//!
//! # Invariants
//! - A sleep/nap interval is written once, carrying both start and end, when
//!   it is closed. Night wakings are the only open records this controller
//!   creates.
//! - An action outside `legal_actions` is rejected before any write.
//! - On write failure the session keeps only the steps that were persisted.
//! - `&mut self` on `perform_action` serializes writes per controller.

use crate::model::child::ChildId;
use crate::model::event::{EventPatch, EventRecord, EventType, MAX_DELAY_MINUTES};
use crate::model::sleep::{
    legal_actions, primary_action, ButtonConfig, SleepAction, SleepProfile, SleepStatus,
};
use crate::repo::event_repo::{EventRecordStore, RepoError};
use crate::service::sleep_resolver::resolve_profile;
use chrono::{DateTime, FixedOffset, Timelike};
use log::{info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

const MINUTE_MS: i64 = 60 * 1000;

/// Errors from sleep-cycle actions.
#[derive(Debug)]
pub enum SleepCycleError {
    /// Action is not legal for the current status; nothing was written.
    InvalidTransition {
        status: SleepStatus,
        action: SleepAction,
    },
    ChildNotFound(ChildId),
    /// Store unreachable; caller decides whether to retry.
    StoreUnavailable(RepoError),
    /// Any other persistence failure.
    Store(RepoError),
}

impl Display for SleepCycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTransition { status, action } => {
                write!(f, "action `{action}` is not valid while `{status}`")
            }
            Self::ChildNotFound(id) => write!(f, "child not found: {id}"),
            Self::StoreUnavailable(err) => write!(f, "event store unavailable: {err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SleepCycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StoreUnavailable(err) | Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for SleepCycleError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::ChildNotFound(id) => Self::ChildNotFound(id),
            other if other.is_unavailable() => Self::StoreUnavailable(other),
            other => Self::Store(other),
        }
    }
}

/// Interval kinds whose onset can be deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredKind {
    Sleep,
    Nap,
}

impl DeferredKind {
    pub fn event_type(self) -> EventType {
        match self {
            Self::Sleep => EventType::Sleep,
            Self::Nap => EventType::Nap,
        }
    }

    fn status(self) -> SleepStatus {
        match self {
            Self::Sleep => SleepStatus::Sleeping,
            Self::Nap => SleepStatus::Napping,
        }
    }
}

/// Sleep/nap onset held client-side until the interval closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredInterval {
    pub kind: DeferredKind,
    /// Unix epoch milliseconds.
    pub start_time: i64,
    pub sleep_delay: Option<u32>,
}

/// Client-held state for one child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SleepSession {
    /// Bedtime registered, onset not yet confirmed.
    pub bedtime_at: Option<i64>,
    pub deferred: Option<DeferredInterval>,
}

impl SleepSession {
    fn is_empty(&self) -> bool {
        self.bedtime_at.is_none() && self.deferred.is_none()
    }

    /// Overlays client-held state on the persisted profile.
    ///
    /// Persisted open intervals always win; client state only refines an
    /// `awake` persisted status.
    fn overlay(&self, persisted: SleepProfile) -> SleepProfile {
        if persisted.status != SleepStatus::Awake {
            return persisted;
        }
        if let Some(bedtime_at) = self.bedtime_at {
            return SleepProfile {
                status: SleepStatus::GoingToSleep,
                since: Some(bedtime_at),
                open_event_id: None,
            };
        }
        match self.deferred {
            Some(deferred) => SleepProfile {
                status: deferred.kind.status(),
                since: Some(deferred.start_time),
                open_event_id: None,
            },
            None => persisted,
        }
    }
}

/// Stateful controller behind the caregiver's sleep button.
pub struct SleepCycleController<S: EventRecordStore> {
    store: S,
    sessions: HashMap<ChildId, SleepSession>,
}

impl<S: EventRecordStore> SleepCycleController<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            sessions: HashMap::new(),
        }
    }

    /// Client-held state for `child_id`, if any.
    pub fn session(&self, child_id: ChildId) -> Option<&SleepSession> {
        self.sessions.get(&child_id)
    }

    /// Drops client-held state, losing any deferred onset.
    pub fn discard_session(&mut self, child_id: ChildId) -> Option<SleepSession> {
        self.sessions.remove(&child_id)
    }

    /// Current profile: persisted status refined by the session.
    pub fn profile(
        &self,
        child_id: ChildId,
        now: DateTime<FixedOffset>,
    ) -> Result<SleepProfile, SleepCycleError> {
        let persisted = self.persisted_profile(child_id, now.timestamp_millis())?;
        Ok(self.session_for(child_id).overlay(persisted))
    }

    /// Primary button for `child_id` at local instant `now`.
    pub fn button_config(
        &self,
        child_id: ChildId,
        now: DateTime<FixedOffset>,
    ) -> Result<ButtonConfig, SleepCycleError> {
        let profile = self.profile(child_id, now)?;
        let action = primary_action(profile.status, now.hour());
        Ok(ButtonConfig {
            label: action.label(),
            action,
        })
    }

    /// Applies one caregiver action and returns the reconciled profile. When
    /// the read-back after a successful write fails, the optimistic profile is
    /// returned instead.
    ///
    /// # Errors
    /// - `InvalidTransition` when `action` is not legal now; nothing written.
    /// - `ChildNotFound` when the child does not resolve.
    /// - `StoreUnavailable`/`Store` when a write fails; the session is rolled
    ///   back to the last persisted step.
    pub fn perform_action(
        &mut self,
        child_id: ChildId,
        action: SleepAction,
        now: DateTime<FixedOffset>,
    ) -> Result<SleepProfile, SleepCycleError> {
        let now_ms = now.timestamp_millis();
        self.store.get(child_id)?;

        let persisted = self.persisted_profile(child_id, now_ms)?;
        let mut session = self.session_for(child_id);
        if persisted.status != SleepStatus::Awake && !session.is_empty() {
            // Another writer opened an interval; persisted state wins.
            warn!(
                "event=sleep_reconcile module=sleep status=session_dropped child_id={} persisted={}",
                child_id, persisted.status
            );
            session = SleepSession::default();
        }
        let current = session.overlay(persisted);

        if !legal_actions(current.status, now.hour()).contains(&action) {
            warn!(
                "event=sleep_action module=sleep status=rejected child_id={} action={} current={}",
                child_id, action, current.status
            );
            return Err(SleepCycleError::InvalidTransition {
                status: current.status,
                action,
            });
        }

        let optimistic = expected_status(action);
        info!(
            "event=sleep_action module=sleep status=start child_id={} action={} current={} optimistic={}",
            child_id, action, current.status, optimistic
        );

        let outcome = self.apply(child_id, action, now_ms, current, &mut session);
        self.store_session(child_id, session);

        if let Err(err) = outcome {
            warn!(
                "event=sleep_action module=sleep status=rolled_back child_id={} action={} error={}",
                child_id, action, err
            );
            return Err(err);
        }

        // Writes are durable from here on.
        let confirmed = match self.profile(child_id, now) {
            Ok(confirmed) => confirmed,
            Err(err) => {
                warn!(
                    "event=sleep_reconcile module=sleep status=read_failed child_id={} optimistic={} error={}",
                    child_id, optimistic, err
                );
                return Ok(SleepProfile {
                    status: optimistic,
                    since: Some(now_ms),
                    open_event_id: None,
                });
            }
        };
        if confirmed.status != optimistic {
            warn!(
                "event=sleep_reconcile module=sleep status=mismatch child_id={} optimistic={} confirmed={}",
                child_id, optimistic, confirmed.status
            );
        }
        info!(
            "event=sleep_action module=sleep status=ok child_id={} action={} confirmed={}",
            child_id, action, confirmed.status
        );
        Ok(confirmed)
    }

    /// Performs the writes for `action`. `session` is updated only after the
    /// write that makes each change durable has succeeded.
    fn apply(
        &self,
        child_id: ChildId,
        action: SleepAction,
        now_ms: i64,
        current: SleepProfile,
        session: &mut SleepSession,
    ) -> Result<(), SleepCycleError> {
        match action {
            SleepAction::RegisterBedtime => {
                session.bedtime_at = Some(now_ms);
            }
            SleepAction::CancelBedtime => {
                session.bedtime_at = None;
            }
            SleepAction::StartSleep => {
                let sleep_delay = session
                    .bedtime_at
                    .map(|bedtime_at| delay_minutes(bedtime_at, now_ms));
                session.bedtime_at = None;
                session.deferred = Some(DeferredInterval {
                    kind: DeferredKind::Sleep,
                    start_time: now_ms,
                    sleep_delay,
                });
            }
            SleepAction::StartNap => {
                session.deferred = Some(DeferredInterval {
                    kind: DeferredKind::Nap,
                    start_time: now_ms,
                    sleep_delay: None,
                });
            }
            SleepAction::Wake => {
                self.close_current(child_id, now_ms, current, session)?;
            }
            SleepAction::NightWake => {
                self.close_current(child_id, now_ms, current, session)?;
                let waking = EventRecord::new(child_id, EventType::NightWaking, Some(now_ms));
                self.store.create(&waking)?;
            }
            SleepAction::ResumeSleep => {
                self.close_current(child_id, now_ms, current, session)?;
                session.deferred = Some(DeferredInterval {
                    kind: DeferredKind::Sleep,
                    start_time: now_ms,
                    sleep_delay: None,
                });
            }
        }
        Ok(())
    }

    /// Closes whatever interval backs `current`: a deferred onset becomes one
    /// closed record, a persisted open record gets its `end_time`.
    fn close_current(
        &self,
        child_id: ChildId,
        now_ms: i64,
        current: SleepProfile,
        session: &mut SleepSession,
    ) -> Result<(), SleepCycleError> {
        if let Some(open_id) = current.open_event_id {
            self.store.update(open_id, EventPatch { end_time: now_ms })?;
            return Ok(());
        }

        if let Some(deferred) = session.deferred {
            let mut record = EventRecord::interval(
                child_id,
                deferred.kind.event_type(),
                deferred.start_time,
                now_ms,
            );
            record.sleep_delay = deferred.sleep_delay;
            self.store.create(&record)?;
            session.deferred = None;
        }
        Ok(())
    }

    fn persisted_profile(
        &self,
        child_id: ChildId,
        now_ms: i64,
    ) -> Result<SleepProfile, SleepCycleError> {
        let records = self.store.list_indexed(child_id)?;
        Ok(resolve_profile(&records, now_ms))
    }

    fn session_for(&self, child_id: ChildId) -> SleepSession {
        self.sessions.get(&child_id).copied().unwrap_or_default()
    }

    fn store_session(&mut self, child_id: ChildId, session: SleepSession) {
        if session.is_empty() {
            self.sessions.remove(&child_id);
        } else {
            self.sessions.insert(child_id, session);
        }
    }
}

fn expected_status(action: SleepAction) -> SleepStatus {
    match action {
        SleepAction::RegisterBedtime => SleepStatus::GoingToSleep,
        SleepAction::CancelBedtime | SleepAction::Wake => SleepStatus::Awake,
        SleepAction::StartSleep | SleepAction::ResumeSleep => SleepStatus::Sleeping,
        SleepAction::StartNap => SleepStatus::Napping,
        SleepAction::NightWake => SleepStatus::NightWaking,
    }
}

fn delay_minutes(from_ms: i64, to_ms: i64) -> u32 {
    let minutes = (to_ms - from_ms).max(0) / MINUTE_MS;
    u32::try_from(minutes)
        .unwrap_or(MAX_DELAY_MINUTES)
        .min(MAX_DELAY_MINUTES)
}
