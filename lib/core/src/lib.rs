//! Core domain types for the leadflow automation engine.
//!
//! This crate provides the identifiers and the error-handling foundation
//! shared by the workflow engine, the scheduler and the engine binary.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{JobId, LeadId, ParseIdError, ParticipantId, WorkflowId};
