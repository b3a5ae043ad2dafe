//! Event record domain model.
//!
//! # Responsibility
//! - Define the canonical event record shared by both storage representations.
//! - Provide the closed `EventType` tag and interval helpers.
//!
//! # Invariants
//! - `id` is stable and never reused for another record.
//! - `start_time` is present for every type except `extra_activities`.
//! - `end_time` should not be earlier than `start_time` when both are set.
//! - A `sleep`, `nap` or `night_waking` record without `end_time` is open.

use crate::model::child::ChildId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for one event record.
pub type EventId = Uuid;

/// Upper bound for `sleep_delay` and `awake_delay`, in minutes.
pub const MAX_DELAY_MINUTES: u32 = 180;

/// Closed set of loggable event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Sleep,
    Nap,
    Wake,
    NightWaking,
    Bedtime,
    Feeding,
    NightFeeding,
    Medication,
    ExtraActivities,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::Sleep,
        EventType::Nap,
        EventType::Wake,
        EventType::NightWaking,
        EventType::Bedtime,
        EventType::Feeding,
        EventType::NightFeeding,
        EventType::Medication,
        EventType::ExtraActivities,
    ];

    /// Storage/wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Nap => "nap",
            Self::Wake => "wake",
            Self::NightWaking => "night_waking",
            Self::Bedtime => "bedtime",
            Self::Feeding => "feeding",
            Self::NightFeeding => "night_feeding",
            Self::Medication => "medication",
            Self::ExtraActivities => "extra_activities",
        }
    }

    /// Parses a storage tag. Unknown tags are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sleep" => Some(Self::Sleep),
            "nap" => Some(Self::Nap),
            "wake" => Some(Self::Wake),
            "night_waking" => Some(Self::NightWaking),
            "bedtime" => Some(Self::Bedtime),
            "feeding" => Some(Self::Feeding),
            "night_feeding" => Some(Self::NightFeeding),
            "medication" => Some(Self::Medication),
            "extra_activities" => Some(Self::ExtraActivities),
            _ => None,
        }
    }

    /// Whether a record of this type is an open interval when `end_time` is unset.
    pub fn is_sleep_interval(self) -> bool {
        match self {
            Self::Sleep | Self::Nap | Self::NightWaking => true,
            Self::Wake
            | Self::Bedtime
            | Self::Feeding
            | Self::NightFeeding
            | Self::Medication
            | Self::ExtraActivities => false,
        }
    }

    /// Whether `end_time` may be set on this type at all.
    pub fn accepts_end_time(self) -> bool {
        match self {
            Self::Sleep
            | Self::Nap
            | Self::NightWaking
            | Self::Feeding
            | Self::NightFeeding
            | Self::ExtraActivities => true,
            Self::Wake | Self::Bedtime | Self::Medication => false,
        }
    }

    /// Whether `start_time` is mandatory.
    pub fn requires_start_time(self) -> bool {
        !matches!(self, Self::ExtraActivities)
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caregiver-reported mood attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalState {
    Calm,
    Restless,
    Upset,
}

impl EmotionalState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calm => "calm",
            Self::Restless => "restless",
            Self::Upset => "upset",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "calm" => Some(Self::Calm),
            "restless" => Some(Self::Restless),
            "upset" => Some(Self::Upset),
            _ => None,
        }
    }
}

/// Validation errors for event records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventValidationError {
    NilId,
    MissingStartTime(EventType),
    EndBeforeStart { start_time: i64, end_time: i64 },
    EndTimeNotAllowed(EventType),
    DelayOutOfRange { field: &'static str, minutes: u32 },
}

impl Display for EventValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "event id must not be nil"),
            Self::MissingStartTime(kind) => write!(f, "`{kind}` events require a start time"),
            Self::EndBeforeStart {
                start_time,
                end_time,
            } => write!(
                f,
                "end_time ({end_time}) must be >= start_time ({start_time})"
            ),
            Self::EndTimeNotAllowed(kind) => write!(f, "`{kind}` events cannot carry an end time"),
            Self::DelayOutOfRange { field, minutes } => write!(
                f,
                "{field} must be within 0..={MAX_DELAY_MINUTES} minutes, got {minutes}"
            ),
        }
    }
}

impl Error for EventValidationError {}

/// Canonical event record.
///
/// Serialized form is the embedded representation stored on the child row,
/// so the back-reference `child_id` is skipped there and restored by the
/// repository from the owning child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    #[serde(skip)]
    pub child_id: ChildId,
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Unix epoch milliseconds.
    pub start_time: Option<i64>,
    /// Unix epoch milliseconds. Set once an interval is closed.
    pub end_time: Option<i64>,
    pub sleep_delay: Option<u32>,
    pub awake_delay: Option<u32>,
    pub emotional_state: Option<EmotionalState>,
    pub notes: Option<String>,
    /// Type-specific fields (feeding amount, medication name, ...).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl EventRecord {
    /// Creates a record with a generated id starting at `start_time`.
    pub fn new(child_id: ChildId, kind: EventType, start_time: Option<i64>) -> Self {
        Self::with_id(Uuid::new_v4(), child_id, kind, start_time)
    }

    /// Creates a record with a caller-provided id.
    pub fn with_id(id: EventId, child_id: ChildId, kind: EventType, start_time: Option<i64>) -> Self {
        Self {
            id,
            child_id,
            kind,
            start_time,
            end_time: None,
            sleep_delay: None,
            awake_delay: None,
            emotional_state: None,
            notes: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Creates a closed interval record.
    pub fn interval(child_id: ChildId, kind: EventType, start_time: i64, end_time: i64) -> Self {
        let mut record = Self::new(child_id, kind, Some(start_time));
        record.end_time = Some(end_time);
        record
    }

    /// Whether this record is a sleep-relevant interval still in progress.
    pub fn is_open(&self) -> bool {
        self.kind.is_sleep_interval() && self.end_time.is_none()
    }

    /// Key used to compare the two storage representations.
    pub fn key(&self) -> EventKey {
        EventKey::new(self.kind, self.start_time)
    }

    /// Validates record-level invariants.
    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.id.is_nil() {
            return Err(EventValidationError::NilId);
        }
        if self.kind.requires_start_time() && self.start_time.is_none() {
            return Err(EventValidationError::MissingStartTime(self.kind));
        }
        if let Some(end_time) = self.end_time {
            if !self.kind.accepts_end_time() {
                return Err(EventValidationError::EndTimeNotAllowed(self.kind));
            }
            if let Some(start_time) = self.start_time {
                if end_time < start_time {
                    return Err(EventValidationError::EndBeforeStart {
                        start_time,
                        end_time,
                    });
                }
            }
        }
        for (field, value) in [
            ("sleep_delay", self.sleep_delay),
            ("awake_delay", self.awake_delay),
        ] {
            if let Some(minutes) = value {
                if minutes > MAX_DELAY_MINUTES {
                    return Err(EventValidationError::DelayOutOfRange { field, minutes });
                }
            }
        }
        Ok(())
    }
}

/// The only mutation allowed on a persisted record: closing an open interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPatch {
    pub end_time: i64,
}

/// Comparison key `(event type, start second)`.
///
/// Start instants are truncated to whole seconds so that sub-second
/// differences between the two representations do not count as drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EventKey {
    pub kind: EventType,
    pub start_second: Option<i64>,
}

impl EventKey {
    pub fn new(kind: EventType, start_time: Option<i64>) -> Self {
        Self {
            kind,
            start_second: start_time.map(|millis| millis.div_euclid(1000)),
        }
    }
}

impl Display for EventKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.start_second {
            Some(second) => write!(f, "{}@{second}", self.kind),
            None => write!(f, "{}@-", self.kind),
        }
    }
}
