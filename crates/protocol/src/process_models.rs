//! Persisted pipeline state models.
//!
//! This module defines the row types for everything the orchestrator writes
//! to its store: pipelines, steps, handoffs, approvals, and the append-only
//! audit log. These are the durable counterparts of one end-to-end run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handoff::HandoffSchema;
use crate::pipeline_models::APPROVAL_STEP;

/// Raised when a status string read back from the store is unknown.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} status: {value}")]
pub struct StatusParseError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle status of a pipeline.
///
/// Normal progression:
/// `pending -> running -> (waiting_for_approval <-> running) -> done | failed`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Created, executor not yet dispatched.
    Pending,

    /// A background executor is driving the steps.
    Running,

    /// Suspended on an approval gate until a decision arrives.
    WaitingForApproval,

    /// All steps finished; terminal.
    Done,

    /// At least one step failed or the run was aborted; terminal.
    Failed,
}

impl PipelineStatus {
    /// Stable string form used in the store and the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::WaitingForApproval => "waiting_for_approval",
            PipelineStatus::Done => "done",
            PipelineStatus::Failed => "failed",
        }
    }

    /// Whether a background executor is (or should be) associated.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Running | PipelineStatus::WaitingForApproval
        )
    }

    pub fn parse(value: &str) -> Result<Self, StatusParseError> {
        match value {
            "pending" => Ok(PipelineStatus::Pending),
            "running" => Ok(PipelineStatus::Running),
            "waiting_for_approval" => Ok(PipelineStatus::WaitingForApproval),
            "done" => Ok(PipelineStatus::Done),
            "failed" => Ok(PipelineStatus::Failed),
            other => Err(StatusParseError {
                kind: "pipeline",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a single step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Whether the step needs no further execution on resume.
    pub fn is_complete(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Skipped)
    }

    pub fn parse(value: &str) -> Result<Self, StatusParseError> {
        match value {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "done" => Ok(StepStatus::Done),
            "failed" => Ok(StepStatus::Failed),
            "skipped" => Ok(StepStatus::Skipped),
            other => Err(StatusParseError {
                kind: "step",
                value: other.to_string(),
            }),
        }
    }
}

/// Decision state of an approval record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StatusParseError> {
        match value {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            other => Err(StatusParseError {
                kind: "approval",
                value: other.to_string(),
            }),
        }
    }
}

/// One end-to-end run: a plan of steps plus the record of executing them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub id: i64,

    /// Human title shown in listings.
    pub title: String,

    /// Name of the template this run was created from, or
    /// [`CUSTOM_TEMPLATE`](crate::pipeline_models::CUSTOM_TEMPLATE) for
    /// inline step lists.
    pub template: String,

    /// The initial prompt, after any issue-context enrichment.
    pub prompt: String,

    /// Project directory the agents are asked to work in.
    pub working_dir: Option<String>,

    /// Branch hint forwarded to agents; informational only.
    pub branch: Option<String>,

    pub status: PipelineStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One stage of a pipeline: an agent invocation or an approval gate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Step {
    pub id: i64,
    pub pipeline_id: i64,

    /// 0-based position within the pipeline; dense and unique per pipeline.
    pub order_index: u32,

    /// Agent profile name, or the `__approval__` sentinel for gates.
    pub agent_name: String,

    pub status: StepStatus,

    /// Model pinned at creation (per-step override), if any.
    pub model: Option<String>,

    /// Failure detail once the step has failed.
    pub error_message: Option<String>,

    /// Reminder delay copied from the template/custom step at creation, so
    /// resume never needs to consult the template again.
    pub remind_after_hours: Option<f64>,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Step {
    /// Whether this step is an approval gate rather than an agent call.
    pub fn is_approval_gate(&self) -> bool {
        self.agent_name == APPROVAL_STEP
    }
}

/// Persisted output of one agent step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Handoff {
    pub id: i64,
    pub step_id: i64,

    /// Raw text returned by the agent.
    pub content: String,

    /// Structured form, when extraction succeeded.
    pub metadata: Option<HandoffSchema>,

    pub created_at: DateTime<Utc>,
}

/// Decision record for one approval-gate step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Approval {
    pub id: i64,
    pub step_id: i64,
    pub status: ApprovalStatus,

    /// Free-text note from the decider, surfaced to the next agent step.
    pub comment: Option<String>,

    /// Identifier of whoever decided; not authenticated here.
    pub decided_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Append-only log record of something the orchestrator did.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub id: i64,
    pub pipeline_id: i64,
    pub step_id: Option<i64>,
    pub event_type: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// The audit event types the orchestrator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    StepStarted,
    HandoffCreated,
    HandoffExtractionFailed,
    StepFailed,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalRejected,
    ApprovalReminder,
    PipelineFailed,
    PipelineCompleted,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::StepStarted => "step_started",
            AuditKind::HandoffCreated => "handoff_created",
            AuditKind::HandoffExtractionFailed => "handoff_extraction_failed",
            AuditKind::StepFailed => "step_failed",
            AuditKind::ApprovalRequested => "approval_requested",
            AuditKind::ApprovalGranted => "approval_granted",
            AuditKind::ApprovalRejected => "approval_rejected",
            AuditKind::ApprovalReminder => "approval_reminder",
            AuditKind::PipelineFailed => "pipeline_failed",
            AuditKind::PipelineCompleted => "pipeline_completed",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
