//! Operations facade over the core subsystems.
//!
//! The HTTP layer delegates here; every method checks its precondition and
//! maps violations onto the error taxonomy (`NotFound`/`Conflict`/
//! `Validation`) so handlers stay thin.

use std::sync::Arc;

use tracing::info;

use baton_protocol::{
    ApprovalStatus, Pipeline, PipelineDetail, PipelineStatus, StepDetail, TemplateStep,
    CUSTOM_TEMPLATE,
};

use crate::approval::ApprovalCoordinator;
use crate::error::CoreError;
use crate::lifecycle::{DispatchMode, LifecycleManager};
use crate::registry::Registry;
use crate::store::{NewPipeline, NewStep, Store};

/// Everything needed to create a pipeline, with the prompt already
/// enriched (issue-context folding happens at the edge).
#[derive(Debug, Clone)]
pub struct CreatePipeline {
    pub template: Option<String>,
    pub custom_steps: Option<Vec<TemplateStep>>,
    pub title: String,
    pub prompt: String,
    pub branch: Option<String>,
    pub working_dir: Option<String>,
    pub step_models: std::collections::HashMap<u32, String>,
}

/// The operations facade.
pub struct PipelineService {
    store: Arc<Store>,
    registry: Arc<Registry>,
    approvals: Arc<ApprovalCoordinator>,
    lifecycle: Arc<LifecycleManager>,
}

impl PipelineService {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<Registry>,
        approvals: Arc<ApprovalCoordinator>,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            store,
            registry,
            approvals,
            lifecycle,
        }
    }

    /// Create a pipeline from a template or an inline step list, persist
    /// its plan, and launch the background executor.
    pub async fn create_and_run(&self, request: CreatePipeline) -> Result<Pipeline, CoreError> {
        let steps = self.plan_steps(&request)?;
        let template_name = match &request.template {
            Some(name) => name.clone(),
            None => CUSTOM_TEMPLATE.to_string(),
        };

        let pipeline = self
            .store
            .create_pipeline(
                NewPipeline {
                    title: request.title,
                    template: template_name,
                    prompt: request.prompt,
                    working_dir: request.working_dir,
                    branch: request.branch,
                },
                &steps,
            )
            .await?;

        info!(pipeline = pipeline.id, template = %pipeline.template, "pipeline created");
        self.lifecycle.dispatch(pipeline.id, DispatchMode::Fresh);
        Ok(pipeline)
    }

    /// Resolve the step plan from the request: exactly one of `template` /
    /// `custom_steps`, with per-index model overrides applied.
    fn plan_steps(&self, request: &CreatePipeline) -> Result<Vec<NewStep>, CoreError> {
        let template_steps: Vec<TemplateStep> =
            match (&request.template, &request.custom_steps) {
                (Some(_), Some(_)) | (None, None) => {
                    return Err(CoreError::Validation(
                        "exactly one of template or custom_steps is required".to_string(),
                    ));
                }
                (Some(name), None) => {
                    let snapshot = self.registry.effective_for(request.working_dir.as_deref());
                    let template = snapshot
                        .get_template(name)
                        .ok_or_else(|| CoreError::NotFound(format!("template {name} not found")))?;
                    template.steps.clone()
                }
                (None, Some(steps)) => {
                    if steps.is_empty() {
                        return Err(CoreError::Validation(
                            "custom_steps must not be empty".to_string(),
                        ));
                    }
                    steps.clone()
                }
            };

        let steps = template_steps
            .iter()
            .enumerate()
            .map(|(index, step)| NewStep {
                agent_name: step.agent_name().to_string(),
                model: request
                    .step_models
                    .get(&(index as u32))
                    .cloned()
                    .or_else(|| step.model().map(str::to_string)),
                remind_after_hours: step.remind_after_hours(),
            })
            .collect();
        Ok(steps)
    }

    /// All pipelines, newest first.
    pub async fn list(&self) -> Result<Vec<Pipeline>, CoreError> {
        Ok(self.store.list_pipelines().await?)
    }

    /// One pipeline with its step breakdown and latest handoffs.
    pub async fn detail(&self, pipeline_id: i64) -> Result<PipelineDetail, CoreError> {
        let pipeline = self.store.get_pipeline(pipeline_id).await?;
        let steps = self.store.steps_for_pipeline(pipeline_id).await?;

        let mut details = Vec::with_capacity(steps.len());
        for step in steps {
            let latest_handoff = self.store.latest_handoff_for_step(step.id).await?;
            details.push(StepDetail {
                step,
                latest_handoff,
            });
        }

        Ok(PipelineDetail {
            pipeline,
            steps: details,
        })
    }

    /// Abort a live pipeline. Conflict unless it is running or waiting.
    pub async fn abort(&self, pipeline_id: i64) -> Result<Pipeline, CoreError> {
        let pipeline = self.store.get_pipeline(pipeline_id).await?;
        if !pipeline.status.is_active() {
            return Err(CoreError::Conflict(format!(
                "pipeline {pipeline_id} is {}; only running or waiting_for_approval pipelines can be aborted",
                pipeline.status.as_str()
            )));
        }

        self.lifecycle.abort(pipeline_id).await?;
        Ok(self.store.get_pipeline(pipeline_id).await?)
    }

    /// Approve the gate a pipeline is currently suspended on.
    pub async fn approve(
        &self,
        pipeline_id: i64,
        comment: Option<String>,
        decided_by: Option<String>,
    ) -> Result<Pipeline, CoreError> {
        self.decide(pipeline_id, ApprovalStatus::Approved, comment, decided_by)
            .await
    }

    /// Reject the gate a pipeline is currently suspended on.
    pub async fn reject(
        &self,
        pipeline_id: i64,
        comment: Option<String>,
        decided_by: Option<String>,
    ) -> Result<Pipeline, CoreError> {
        self.decide(pipeline_id, ApprovalStatus::Rejected, comment, decided_by)
            .await
    }

    async fn decide(
        &self,
        pipeline_id: i64,
        status: ApprovalStatus,
        comment: Option<String>,
        decided_by: Option<String>,
    ) -> Result<Pipeline, CoreError> {
        let pipeline = self.store.get_pipeline(pipeline_id).await?;
        if pipeline.status != PipelineStatus::WaitingForApproval {
            return Err(CoreError::Conflict(format!(
                "pipeline {pipeline_id} is {}; decisions require waiting_for_approval",
                pipeline.status.as_str()
            )));
        }

        let gate = self
            .store
            .running_approval_step(pipeline_id)
            .await?
            .ok_or_else(|| {
                CoreError::Conflict(format!(
                    "pipeline {pipeline_id} has no approval gate awaiting a decision"
                ))
            })?;
        let approval = self
            .store
            .pending_approval_for_step(gate.id)
            .await?
            .ok_or_else(|| {
                CoreError::Conflict(format!(
                    "pipeline {pipeline_id} has no pending approval record"
                ))
            })?;

        // Persist the decision first, then wake the executor; the waiter
        // re-reads the row after the signal.
        self.store
            .resolve_approval(approval.id, status, comment.as_deref(), decided_by.as_deref())
            .await?;
        self.approvals.signal(pipeline_id);

        info!(
            pipeline = pipeline_id,
            decision = status.as_str(),
            "approval decision recorded"
        );
        Ok(self.store.get_pipeline(pipeline_id).await?)
    }

    /// Restart a failed pipeline: reset its failed steps and re-dispatch.
    pub async fn restart(&self, pipeline_id: i64) -> Result<Pipeline, CoreError> {
        let pipeline = self.store.get_pipeline(pipeline_id).await?;
        if pipeline.status != PipelineStatus::Failed {
            return Err(CoreError::Conflict(format!(
                "pipeline {pipeline_id} is {}; only failed pipelines can be restarted",
                pipeline.status.as_str()
            )));
        }

        self.store.reset_for_restart(pipeline_id).await?;
        self.lifecycle.dispatch(pipeline_id, DispatchMode::Resume);
        Ok(self.store.get_pipeline(pipeline_id).await?)
    }

    /// Live pipelines bound to the same working directory.
    ///
    /// An empty `working_dir` answers `[]` without touching the store;
    /// pipelines with no working directory never conflict with anything.
    pub async fn conflicts(&self, working_dir: &str) -> Result<Vec<Pipeline>, CoreError> {
        if working_dir.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.conflicts_for_working_dir(working_dir).await?)
    }

    /// Audit log of one pipeline, oldest first.
    pub async fn audit_events(
        &self,
        pipeline_id: i64,
    ) -> Result<Vec<baton_protocol::AuditEvent>, CoreError> {
        // Surface 404 for unknown pipelines rather than an empty log.
        self.store.get_pipeline(pipeline_id).await?;
        Ok(self.store.audit_events(pipeline_id).await?)
    }
}
