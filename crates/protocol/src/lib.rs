//! # baton-protocol
//!
//! Core protocol definitions and data models for baton.
//!
//! This crate defines all shared data structures used for:
//! - Configuration file parsing (YAML agent and template catalogues)
//! - Persisted pipeline state (pipelines, steps, handoffs, approvals, audit log)
//! - HTTP API request/response bodies
//! - The event-stream envelope forwarded to subscribers
//!
//! ## Modules
//!
//! - [`agent_models`]: Agent profile configuration records
//! - [`pipeline_models`]: Pipeline templates and template steps
//! - [`process_models`]: Persisted pipeline/step/approval/audit state
//! - [`handoff`]: The structured handoff schema and preamble rendering
//! - [`api`]: Request/response bodies for the pipeline lifecycle API
//! - [`events`]: The `{event, data}` envelope for fanned-out events
//!
//! ## Design Principles
//!
//! - Minimal dependencies: serde, serde_json, chrono, thiserror
//! - Independent compilation: no dependencies on other baton crates

pub mod agent_models;
pub mod api;
pub mod events;
pub mod handoff;
pub mod pipeline_models;
pub mod process_models;

// Re-export all public types for convenience
pub use agent_models::*;
pub use api::*;
pub use events::*;
pub use handoff::*;
pub use pipeline_models::*;
pub use process_models::*;
