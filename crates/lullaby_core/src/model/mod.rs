//! Domain model for the infant event log.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep one event shape for both storage representations.
//!
//! # Invariants
//! - Every record is identified by a stable UUID.
//! - Sleep status is derived from records, never persisted.

pub mod child;
pub mod event;
pub mod sleep;
