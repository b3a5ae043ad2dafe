//! Household directory model: parents and the children they own.
//!
//! # Invariants
//! - A child belongs to at most one owning parent.
//! - The parent's reference list is a separate record and may lag behind
//!   child deletion; cascade delete clears it last.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a child.
pub type ChildId = Uuid;

/// Stable identifier for a caregiver account owning children.
pub type ParentId = Uuid;

/// Caregiver account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parent {
    pub id: ParentId,
    pub display_name: String,
}

impl Parent {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
        }
    }
}

/// Child record. The embedded event list is loaded separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Child {
    pub id: ChildId,
    pub parent_id: Option<ParentId>,
    pub name: String,
    /// Unix epoch milliseconds.
    pub birth_date: Option<i64>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl Child {
    pub fn new(parent_id: Option<ParentId>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id,
            name: name.into(),
            birth_date: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
