//! # baton-core
//!
//! Core pipeline engine, registry, and event fan-out for baton.
//!
//! This crate provides:
//! - The agent/template registry with hot reload and per-project overrides
//! - Deterministic handoff extraction from agent output
//! - The durable, resumable pipeline runner with approval gates
//! - The approval suspend/resume coordinator
//! - The single-upstream event broker with per-subscriber inboxes
//! - Lifecycle tracking and crash recovery for executor tasks
//! - SQLite persistence and the operations facade the API layer calls
//!
//! ## Modules
//!
//! - [`registry`]: Catalogue loading, validation, hot reload, overrides
//! - [`handoff`]: Structured handoff extraction
//! - [`client`]: The agent-runner client trait (and a scripted mock)
//! - [`runner`]: Pipeline execution
//! - [`approval`]: Approval-gate signalling
//! - [`broker`]: Event fan-out
//! - [`lifecycle`]: Executor task tracking and recovery
//! - [`store`]: Persistence
//! - [`service`]: The operations facade
//! - [`settings`]: Runtime options

pub mod approval;
pub mod broker;
pub mod client;
pub mod error;
pub mod handoff;
pub mod lifecycle;
pub mod registry;
pub mod runner;
pub mod service;
pub mod settings;
pub mod store;

pub use approval::ApprovalCoordinator;
pub use broker::{BrokerMessage, EventBroker, Subscription};
pub use client::{AgentClient, ClientError};
pub use error::CoreError;
pub use lifecycle::{DispatchMode, LifecycleManager};
pub use registry::Registry;
pub use runner::PipelineRunner;
pub use service::{CreatePipeline, PipelineService};
pub use settings::Settings;
pub use store::Store;
