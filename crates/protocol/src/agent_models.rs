//! Agent profile configuration models for `agents.yaml`.
//!
//! This module defines the records of the agent catalogue. The global
//! catalogue is a flat YAML list; a working directory may additionally carry
//! per-project override files, each holding a single profile.

use serde::{Deserialize, Serialize};

/// Represents one agent known to the orchestrator.
///
/// The `name` is how templates and pipeline steps refer to the agent; the
/// `agent_id` is the identifier the external agent runner understands.
///
/// # Example
///
/// ```yaml
/// - name: developer
///   description: Implements the requested change
///   agent_id: dev-workhorse
///   default_model: sonnet
///   system_prompt_additions: |
///     Prefer minimal diffs.
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    /// Unique identifier used to reference the agent in pipeline steps.
    pub name: String,

    /// Human-readable description of the agent's purpose.
    pub description: String,

    /// Identifier the external agent runner resolves this agent by.
    pub agent_id: String,

    /// Model used when a step does not pin one.
    ///
    /// `None` leaves the choice to the agent runner.
    #[serde(default)]
    pub default_model: Option<String>,

    /// Extra instructions prepended to every prompt sent to this agent.
    #[serde(default)]
    pub system_prompt_additions: Option<String>,
}
