//! Core use-case services.
//!
//! # Responsibility
//! - Sleep-cycle resolution and the caregiver action controller.
//! - Integrity maintenance over the two event representations.
//! - Keep CLI layers decoupled from storage details.

pub mod cascade_service;
pub mod consistency_service;
pub mod contamination_service;
pub mod health_service;
pub mod repair_service;
pub mod sleep_controller;
pub mod sleep_resolver;
