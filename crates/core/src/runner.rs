//! Pipeline execution engine.
//!
//! The runner owns the lifecycle of a single pipeline execution: it walks
//! the persisted steps in order, calls agents through the [`AgentClient`],
//! suspends on approval gates, and converts every failure into persisted
//! state. It never surfaces agent failures to its caller: a completed
//! executor always leaves the pipeline row terminal or resumable.
//!
//! Persistence discipline: every state mutation commits before the next
//! suspension point, and nothing re-uses row data read before a long wait;
//! after an agent call or an approval the relevant rows are re-fetched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, warn};

use baton_protocol::{
    AgentProfile, Approval, ApprovalStatus, AuditKind, EventFrame, Pipeline, PipelineStatus, Step,
    StepStatus,
};

use crate::approval::{wait_with_reminder, ApprovalCoordinator, WaitOutcome};
use crate::broker::EventBroker;
use crate::client::AgentClient;
use crate::error::CoreError;
use crate::handoff;
use crate::registry::Registry;
use crate::store::Store;

/// How a step left the executor loop.
enum StepOutcome {
    /// The step finished; move on to the next one.
    Continue,

    /// The pipeline reached a terminal state; stop executing.
    Stopped,
}

/// Executes pipelines against the store, registry, and agent client.
///
/// The runner holds no per-pipeline state beyond the active-session map
/// used to target aborts; all coordination goes through the store and the
/// [`ApprovalCoordinator`].
pub struct PipelineRunner {
    store: Arc<Store>,
    registry: Arc<Registry>,
    client: Arc<dyn AgentClient>,
    approvals: Arc<ApprovalCoordinator>,
    broker: Arc<EventBroker>,
    step_timeout: Duration,

    /// pipeline id → agent-runner session currently serving it.
    active_sessions: Mutex<HashMap<i64, String>>,
}

impl PipelineRunner {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<Registry>,
        client: Arc<dyn AgentClient>,
        approvals: Arc<ApprovalCoordinator>,
        broker: Arc<EventBroker>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            client,
            approvals,
            broker,
            step_timeout,
            active_sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a freshly created pipeline from its first step.
    pub async fn run(&self, pipeline_id: i64) -> Result<(), CoreError> {
        info!(pipeline = pipeline_id, "starting pipeline");
        self.execute(pipeline_id).await
    }

    /// Continue a pipeline from its first incomplete step.
    ///
    /// If every step is already complete the pipeline is marked done
    /// immediately. The continuation prompt is the last successful
    /// handoff's preamble (raw text when no structured data exists), or
    /// the stored initial prompt when no agent step has finished yet.
    pub async fn resume(&self, pipeline_id: i64) -> Result<(), CoreError> {
        info!(pipeline = pipeline_id, "resuming pipeline");
        self.execute(pipeline_id).await
    }

    async fn execute(&self, pipeline_id: i64) -> Result<(), CoreError> {
        let pipeline = self.store.get_pipeline(pipeline_id).await?;
        self.store
            .set_pipeline_status(pipeline_id, PipelineStatus::Running)
            .await?;

        let steps = self.store.steps_for_pipeline(pipeline_id).await?;
        let Some(start) = steps.iter().position(|s| !s.status.is_complete()) else {
            self.store.complete_pipeline(pipeline_id).await?;
            self.publish(
                AuditKind::PipelineCompleted,
                json!({ "pipeline_id": pipeline_id }),
            );
            return Ok(());
        };

        let mut current_prompt = match self.store.last_successful_handoff(pipeline_id).await? {
            Some((step, handoff)) => match handoff.metadata {
                Some(schema) => schema.to_preamble(Some(&step.agent_name)),
                None => handoff.content,
            },
            None => pipeline.prompt.clone(),
        };

        for step in steps.iter().skip(start) {
            match self.run_step(&pipeline, step, &mut current_prompt).await? {
                StepOutcome::Continue => {}
                StepOutcome::Stopped => return Ok(()),
            }
        }

        self.store.complete_pipeline(pipeline_id).await?;
        self.publish(
            AuditKind::PipelineCompleted,
            json!({ "pipeline_id": pipeline_id }),
        );
        info!(pipeline = pipeline_id, "pipeline completed");
        Ok(())
    }

    async fn run_step(
        &self,
        pipeline: &Pipeline,
        step: &Step,
        current_prompt: &mut String,
    ) -> Result<StepOutcome, CoreError> {
        self.store.start_step(pipeline.id, step.id).await?;
        self.publish(
            AuditKind::StepStarted,
            json!({
                "pipeline_id": pipeline.id,
                "step_id": step.id,
                "order_index": step.order_index,
                "agent": step.agent_name,
            }),
        );

        if step.is_approval_gate() {
            self.run_approval_step(pipeline, step, current_prompt).await
        } else {
            self.run_agent_step(pipeline, step, current_prompt).await
        }
    }

    // ------------------------------------------------------------------
    // Agent steps
    // ------------------------------------------------------------------

    async fn run_agent_step(
        &self,
        pipeline: &Pipeline,
        step: &Step,
        current_prompt: &mut String,
    ) -> Result<StepOutcome, CoreError> {
        let snapshot = self.registry.effective_for(pipeline.working_dir.as_deref());
        let Some(profile) = snapshot.get_agent(&step.agent_name).cloned() else {
            let message = format!("unknown agent: {}", step.agent_name);
            return self.fail(pipeline, step, &message).await;
        };
        drop(snapshot);

        let prompt = compose_prompt(pipeline, &profile, current_prompt);
        let model = step.model.clone().or_else(|| profile.default_model.clone());

        let session_id = match self.client.create_session(Some(&pipeline.title)).await {
            Ok(session_id) => session_id,
            Err(error) => return self.fail(pipeline, step, &error.message).await,
        };
        self.track_session(pipeline.id, &session_id);

        let send = self
            .client
            .send_message(&session_id, &prompt, &profile.agent_id, model.as_deref());
        let outcome = match tokio::time::timeout(self.step_timeout, send).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error)) => Err(error.message),
            Err(_) => {
                if let Err(error) = self.client.abort_session(&session_id).await {
                    warn!(session = %session_id, %error, "abort of timed-out session failed");
                }
                Err(format!(
                    "Step timed out after {}s",
                    self.step_timeout.as_secs()
                ))
            }
        };

        // Guarded cleanup; a cleanup failure must not mask the outcome.
        if let Err(error) = self.client.delete_session(&session_id).await {
            warn!(session = %session_id, %error, "session cleanup failed");
        }
        self.untrack_session(pipeline.id);

        let output = match outcome {
            Ok(output) => output,
            Err(message) => return self.fail(pipeline, step, &message).await,
        };

        let schema = handoff::extract(&output);
        self.store
            .record_handoff(pipeline.id, step.id, &output, schema.as_ref())
            .await?;
        self.publish(
            AuditKind::HandoffCreated,
            json!({
                "pipeline_id": pipeline.id,
                "step_id": step.id,
                "has_structured": schema.is_some(),
            }),
        );
        if schema.is_none() {
            self.publish(
                AuditKind::HandoffExtractionFailed,
                json!({ "pipeline_id": pipeline.id, "step_id": step.id }),
            );
        }

        *current_prompt = match &schema {
            Some(schema) => schema.to_preamble(Some(&step.agent_name)),
            None => output,
        };

        self.store.finish_step(step.id).await?;
        Ok(StepOutcome::Continue)
    }

    // ------------------------------------------------------------------
    // Approval gates
    // ------------------------------------------------------------------

    async fn run_approval_step(
        &self,
        pipeline: &Pipeline,
        step: &Step,
        current_prompt: &mut String,
    ) -> Result<StepOutcome, CoreError> {
        // `step` still carries its pre-entry status: `running` means the
        // previous executor was interrupted mid-gate. A decision recorded
        // in that window is authoritative; re-entry must not ask the
        // approver again. A reset gate (restart after rejection) enters as
        // `pending` and always requests a fresh decision.
        let interrupted = step.status == StepStatus::Running;
        let prior = self.store.latest_approval_for_step(step.id).await?;

        let decision = match prior {
            Some(resolved) if interrupted && resolved.status != ApprovalStatus::Pending => resolved,
            prior => {
                let pending = prior.filter(|a| a.status == ApprovalStatus::Pending);
                self.await_decision(pipeline, step, pending).await?
            }
        };

        match decision.status {
            ApprovalStatus::Approved => {
                self.store
                    .grant_approval_step(pipeline.id, step.id, decision.decided_by.as_deref())
                    .await?;
                self.publish(
                    AuditKind::ApprovalGranted,
                    json!({ "pipeline_id": pipeline.id, "step_id": step.id }),
                );

                if let Some(comment) = decision
                    .comment
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                {
                    current_prompt.push_str(&format!("\n\nReviewer note: {comment}"));
                }
                Ok(StepOutcome::Continue)
            }
            ApprovalStatus::Rejected => {
                let message = match decision.comment.as_deref().filter(|c| !c.trim().is_empty()) {
                    Some(comment) => format!("Approval rejected: {comment}"),
                    None => "Approval rejected".to_string(),
                };
                error!(pipeline = pipeline.id, step = step.id, %message, "approval rejected");

                self.store
                    .reject_approval_step(
                        pipeline.id,
                        step.id,
                        &message,
                        decision.decided_by.as_deref(),
                    )
                    .await?;
                self.publish(
                    AuditKind::ApprovalRejected,
                    json!({ "pipeline_id": pipeline.id, "step_id": step.id }),
                );
                self.publish(
                    AuditKind::StepFailed,
                    json!({
                        "pipeline_id": pipeline.id,
                        "step_id": step.id,
                        "error": message,
                    }),
                );
                self.publish(
                    AuditKind::PipelineFailed,
                    json!({ "pipeline_id": pipeline.id }),
                );
                Ok(StepOutcome::Stopped)
            }
            // `await_decision` only returns a resolved row.
            ApprovalStatus::Pending => Ok(StepOutcome::Stopped),
        }
    }

    /// Suspend until the gate's approval row is resolved.
    ///
    /// Re-entry with the pending row intact reuses it silently; only a
    /// fresh entry creates (and announces) a new request.
    async fn await_decision(
        &self,
        pipeline: &Pipeline,
        step: &Step,
        pending: Option<Approval>,
    ) -> Result<Approval, CoreError> {
        let signal = self.approvals.enlist(pipeline.id);

        let approval = match pending {
            Some(existing) => existing,
            None => {
                let approval = self.store.create_approval(pipeline.id, step.id).await?;
                self.publish(
                    AuditKind::ApprovalRequested,
                    json!({ "pipeline_id": pipeline.id, "step_id": step.id }),
                );
                approval
            }
        };

        self.store
            .set_pipeline_status(pipeline.id, PipelineStatus::WaitingForApproval)
            .await?;

        // The reminder clock runs from the persisted request time, so a
        // re-entered gate does not restart it from scratch.
        let mut reminder = remaining_reminder(step.remind_after_hours, approval.created_at);

        let decision = loop {
            // Check the row before waiting: the decision may have landed
            // before this signal registration (or the wake was spurious).
            if let Some(current) = self.store.latest_approval_for_step(step.id).await? {
                if current.status != ApprovalStatus::Pending {
                    break current;
                }
            }

            match wait_with_reminder(&signal, reminder).await {
                WaitOutcome::Signalled => continue,
                WaitOutcome::ReminderElapsed => {
                    warn!(
                        pipeline = pipeline.id,
                        step = step.id,
                        "approval still pending past its reminder deadline"
                    );
                    self.store
                        .insert_audit(pipeline.id, Some(step.id), AuditKind::ApprovalReminder, None)
                        .await?;
                    self.publish(
                        AuditKind::ApprovalReminder,
                        json!({ "pipeline_id": pipeline.id, "step_id": step.id }),
                    );
                    // One reminder per entry; afterwards wait indefinitely.
                    reminder = None;
                }
            }
        };

        self.approvals.unregister(pipeline.id);
        Ok(decision)
    }

    // ------------------------------------------------------------------
    // Failure & abort bookkeeping
    // ------------------------------------------------------------------

    /// Fail the step and the pipeline, persisting the error message and
    /// publishing the corresponding live events.
    async fn fail(
        &self,
        pipeline: &Pipeline,
        step: &Step,
        message: &str,
    ) -> Result<StepOutcome, CoreError> {
        error!(pipeline = pipeline.id, step = step.id, %message, "step failed");

        self.store.fail_step(pipeline.id, step.id, message).await?;
        self.publish(
            AuditKind::StepFailed,
            json!({
                "pipeline_id": pipeline.id,
                "step_id": step.id,
                "error": message,
            }),
        );

        self.store
            .fail_pipeline(pipeline.id, Some(json!({ "error": message })))
            .await?;
        self.publish(
            AuditKind::PipelineFailed,
            json!({ "pipeline_id": pipeline.id }),
        );

        Ok(StepOutcome::Stopped)
    }

    /// Bookkeeping after an abort request has cancelled the executor task:
    /// abort the live agent session if one is tracked, fail any step left
    /// `running`, and mark the pipeline failed.
    pub async fn finalize_abort(&self, pipeline_id: i64) -> Result<(), CoreError> {
        if let Some(session_id) = self.take_session(pipeline_id) {
            match self.client.abort_session(&session_id).await {
                Ok(_) => info!(session = %session_id, "aborted active session"),
                Err(error) => warn!(session = %session_id, %error, "session abort failed"),
            }
        }
        self.approvals.unregister(pipeline_id);

        let steps = self.store.steps_for_pipeline(pipeline_id).await?;
        for step in steps.iter().filter(|s| s.status == StepStatus::Running) {
            self.store
                .fail_step(pipeline_id, step.id, "Aborted")
                .await?;
            self.publish(
                AuditKind::StepFailed,
                json!({ "pipeline_id": pipeline_id, "step_id": step.id, "error": "Aborted" }),
            );
        }

        self.store
            .fail_pipeline(pipeline_id, Some(json!({ "error": "aborted" })))
            .await?;
        self.publish(
            AuditKind::PipelineFailed,
            json!({ "pipeline_id": pipeline_id }),
        );
        Ok(())
    }

    fn publish(&self, kind: AuditKind, data: serde_json::Value) {
        self.broker.publish(&EventFrame::new(kind.as_str(), data));
    }

    fn track_session(&self, pipeline_id: i64, session_id: &str) {
        self.sessions().insert(pipeline_id, session_id.to_string());
    }

    fn untrack_session(&self, pipeline_id: i64) {
        self.sessions().remove(&pipeline_id);
    }

    fn take_session(&self, pipeline_id: i64) -> Option<String> {
        self.sessions().remove(&pipeline_id)
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<i64, String>> {
        match self.active_sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Assemble the prompt actually sent to the agent: working-directory
/// preamble, then the profile's system prompt additions, then the carried
/// step context.
fn compose_prompt(pipeline: &Pipeline, profile: &AgentProfile, current: &str) -> String {
    let mut prompt = String::new();

    if let Some(dir) = pipeline.working_dir.as_deref().filter(|d| !d.is_empty()) {
        prompt.push_str(&format!("Work inside the project directory {dir}.\n\n"));
    }
    if let Some(additions) = profile
        .system_prompt_additions
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        prompt.push_str(additions.trim_end());
        prompt.push_str("\n\n");
    }

    prompt.push_str(current);
    prompt
}

/// Time left until the reminder should fire, measured from the persisted
/// approval request time. `None` when the step carries no reminder.
fn remaining_reminder(hours: Option<f64>, requested_at: DateTime<Utc>) -> Option<Duration> {
    let hours = hours.filter(|h| *h > 0.0)?;
    let total = Duration::from_secs_f64(hours * 3600.0);
    let elapsed = (Utc::now() - requested_at).to_std().unwrap_or_default();
    Some(total.saturating_sub(elapsed))
}
