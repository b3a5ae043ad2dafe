//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes enforce `EventRecord::validate()` before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `ChildNotFound`) in
//!   addition to DB transport errors.

pub mod child_repo;
pub mod document_repo;
pub mod event_repo;
