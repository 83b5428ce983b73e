//! Request/response bodies for the pipeline lifecycle API.
//!
//! These are the JSON shapes exchanged with the thin HTTP layer; the
//! handlers deserialize into them and delegate to the core facade.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pipeline_models::TemplateStep;
use crate::process_models::{Handoff, Pipeline, Step};

/// Body of `POST /pipelines`.
///
/// Exactly one of `template` / `custom_steps` must be supplied. When the
/// GitHub issue fields are present the prompt is enriched with the issue
/// context before persistence; a fetch failure degrades to the raw prompt.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreatePipelineRequest {
    /// Name of a registered template.
    #[serde(default)]
    pub template: Option<String>,

    /// Inline one-off step list; stored under the `__custom__` sentinel.
    #[serde(default)]
    pub custom_steps: Option<Vec<TemplateStep>>,

    pub title: String,
    pub prompt: String,

    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    /// Per-step model overrides keyed by 0-based step index.
    #[serde(default)]
    pub step_models: Option<HashMap<u32, String>>,

    /// `owner/repo` of an issue to fold into the prompt.
    #[serde(default)]
    pub github_issue_repo: Option<String>,

    #[serde(default)]
    pub github_issue_number: Option<u64>,
}

/// Body of the approve/reject endpoints.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DecisionRequest {
    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    pub decided_by: Option<String>,
}

/// One step plus its most recent handoff, as returned by the detail view.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StepDetail {
    #[serde(flatten)]
    pub step: Step,
    pub latest_handoff: Option<Handoff>,
}

/// Full pipeline view: the row plus a step breakdown.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PipelineDetail {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    pub steps: Vec<StepDetail>,
}
