//! Sleep-cycle status model and action table.
//!
//! # Responsibility
//! - Define the derived sleep status and the actions a caregiver can take.
//! - Map `(status, local hour)` to the primary and legal actions.
//!
//! # Invariants
//! - Every status has exactly one primary action at every hour.
//! - The primary action is always contained in the legal action set.
//! - `GoingToSleep` exists only client-side; nothing persisted maps to it.

use crate::model::event::EventId;
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Nocturnal window: `hour >= 19 || hour < 5`.
pub const NOCTURNAL_START_HOUR: u32 = 19;
pub const NOCTURNAL_END_HOUR: u32 = 5;
/// Nap window: `8 <= hour < 17`.
pub const NAP_START_HOUR: u32 = 8;
pub const NAP_END_HOUR: u32 = 17;
/// Night-wake window: `hour >= 22 || hour < 6`.
pub const NIGHT_WAKE_START_HOUR: u32 = 22;
pub const NIGHT_WAKE_END_HOUR: u32 = 6;

pub fn is_nocturnal(hour: u32) -> bool {
    hour >= NOCTURNAL_START_HOUR || hour < NOCTURNAL_END_HOUR
}

pub fn is_nap_window(hour: u32) -> bool {
    (NAP_START_HOUR..NAP_END_HOUR).contains(&hour)
}

pub fn is_night_wake_window(hour: u32) -> bool {
    hour >= NIGHT_WAKE_START_HOUR || hour < NIGHT_WAKE_END_HOUR
}

/// What the child is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStatus {
    Awake,
    GoingToSleep,
    Sleeping,
    Napping,
    NightWaking,
}

impl SleepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Awake => "awake",
            Self::GoingToSleep => "going_to_sleep",
            Self::Sleeping => "sleeping",
            Self::Napping => "napping",
            Self::NightWaking => "night_waking",
        }
    }
}

impl Display for SleepStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caregiver action on the sleep control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepAction {
    /// Hold bedtime client-side before onset is confirmed.
    RegisterBedtime,
    /// Drop a registered bedtime without writing anything.
    CancelBedtime,
    StartSleep,
    StartNap,
    Wake,
    NightWake,
    ResumeSleep,
}

impl SleepAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RegisterBedtime => "register_bedtime",
            Self::CancelBedtime => "cancel_bedtime",
            Self::StartSleep => "start_sleep",
            Self::StartNap => "start_nap",
            Self::Wake => "wake",
            Self::NightWake => "night_wake",
            Self::ResumeSleep => "resume_sleep",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "register_bedtime" => Some(Self::RegisterBedtime),
            "cancel_bedtime" => Some(Self::CancelBedtime),
            "start_sleep" => Some(Self::StartSleep),
            "start_nap" => Some(Self::StartNap),
            "wake" => Some(Self::Wake),
            "night_wake" => Some(Self::NightWake),
            "resume_sleep" => Some(Self::ResumeSleep),
            _ => None,
        }
    }

    /// Button label for this action.
    pub fn label(self) -> &'static str {
        match self {
            Self::RegisterBedtime => "Bedtime",
            Self::CancelBedtime => "Cancel bedtime",
            Self::StartSleep => "Start sleep",
            Self::StartNap => "Start nap",
            Self::Wake => "Wake up",
            Self::NightWake => "Night waking",
            Self::ResumeSleep => "Back to sleep",
        }
    }
}

impl Display for SleepAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived, never-persisted snapshot of a child's sleep state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SleepProfile {
    pub status: SleepStatus,
    /// Unix epoch milliseconds the current status began, if known.
    pub since: Option<i64>,
    /// Persisted open interval backing the status, if any.
    pub open_event_id: Option<EventId>,
}

impl SleepProfile {
    pub fn awake() -> Self {
        Self {
            status: SleepStatus::Awake,
            since: None,
            open_event_id: None,
        }
    }
}

/// Primary control configuration for the caregiver UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ButtonConfig {
    pub label: &'static str,
    pub action: SleepAction,
}

/// The single primary action for `status` at local `hour`.
pub fn primary_action(status: SleepStatus, hour: u32) -> SleepAction {
    match status {
        SleepStatus::Awake => {
            if is_nocturnal(hour) {
                SleepAction::StartSleep
            } else if is_nap_window(hour) {
                SleepAction::StartNap
            } else if hour >= NAP_END_HOUR {
                // 17:00-19:00 is treated as an early bedtime.
                SleepAction::StartSleep
            } else {
                SleepAction::StartNap
            }
        }
        SleepStatus::GoingToSleep => SleepAction::StartSleep,
        SleepStatus::Sleeping => {
            if is_night_wake_window(hour) {
                SleepAction::NightWake
            } else {
                SleepAction::Wake
            }
        }
        SleepStatus::Napping => SleepAction::Wake,
        SleepStatus::NightWaking => SleepAction::ResumeSleep,
    }
}

/// Every action accepted for `status` at local `hour`.
pub fn legal_actions(status: SleepStatus, hour: u32) -> Vec<SleepAction> {
    let primary = primary_action(status, hour);
    match status {
        SleepStatus::Awake => {
            if primary == SleepAction::StartSleep {
                vec![primary, SleepAction::RegisterBedtime]
            } else {
                vec![primary]
            }
        }
        SleepStatus::GoingToSleep => vec![primary, SleepAction::CancelBedtime],
        SleepStatus::Sleeping => {
            if primary == SleepAction::NightWake {
                vec![primary, SleepAction::Wake]
            } else {
                vec![primary]
            }
        }
        SleepStatus::Napping => vec![primary],
        SleepStatus::NightWaking => vec![primary, SleepAction::Wake],
    }
}
