//! Pipeline template models for `templates.yaml`.
//!
//! A template is a reusable, named plan: an ordered list of agent
//! invocations and approval gates, with no prompt bound. Templates are
//! instantiated into concrete pipelines at creation time.

use serde::{Deserialize, Serialize};

/// Step sentinel stored in a persisted step that marks an approval gate.
///
/// Real agent names never collide with this: the registry rejects agent
/// profiles whose name starts with `__`.
pub const APPROVAL_STEP: &str = "__approval__";

/// Template-name sentinel stored on pipelines created from an inline
/// `custom_steps` list rather than a named template.
pub const CUSTOM_TEMPLATE: &str = "__custom__";

/// One entry in a template's ordered step list.
///
/// Steps are written in YAML with an explicit `type` tag:
///
/// ```yaml
/// steps:
///   - type: agent
///     agent: developer
///   - type: approval
///     description: Review the change before it ships
///     remind_after_hours: 4
///   - type: agent
///     agent: reviewer
///     model: opus
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemplateStep {
    /// Invoke a named agent.
    Agent {
        /// Name of an [`AgentProfile`](crate::agent_models::AgentProfile).
        agent: String,

        /// Per-step model override; falls back to the profile's default.
        #[serde(default)]
        model: Option<String>,

        /// Accepted for schema compatibility; has no effect on agent steps.
        #[serde(default)]
        remind_after_hours: Option<f64>,
    },

    /// Pause the pipeline until an external decision arrives.
    Approval {
        /// Shown to the reviewer alongside the pending decision.
        #[serde(default)]
        description: String,

        /// Hours of waiting after which a single reminder is emitted.
        #[serde(default)]
        remind_after_hours: Option<f64>,
    },
}

impl TemplateStep {
    /// The agent name this step is persisted under.
    ///
    /// Approval gates persist the [`APPROVAL_STEP`] sentinel.
    pub fn agent_name(&self) -> &str {
        match self {
            TemplateStep::Agent { agent, .. } => agent,
            TemplateStep::Approval { .. } => APPROVAL_STEP,
        }
    }

    /// Per-step model override, if any.
    pub fn model(&self) -> Option<&str> {
        match self {
            TemplateStep::Agent { model, .. } => model.as_deref(),
            TemplateStep::Approval { .. } => None,
        }
    }

    /// Reminder delay carried by this step.
    ///
    /// Only meaningful on approval gates; agent steps return `None`.
    pub fn remind_after_hours(&self) -> Option<f64> {
        match self {
            TemplateStep::Agent { .. } => None,
            TemplateStep::Approval {
                remind_after_hours, ..
            } => *remind_after_hours,
        }
    }

    /// Whether this step is an approval gate.
    pub fn is_approval(&self) -> bool {
        matches!(self, TemplateStep::Approval { .. })
    }
}

/// A reusable, named pipeline plan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineTemplate {
    /// Unique name identifying this template.
    pub name: String,

    /// Human-readable description of what the template is for.
    #[serde(default)]
    pub description: String,

    /// Ordered list of steps executed when the template is run.
    pub steps: Vec<TemplateStep>,
}

impl PipelineTemplate {
    /// Names of all agents referenced by this template's agent steps.
    pub fn referenced_agents(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|step| match step {
            TemplateStep::Agent { agent, .. } => Some(agent.as_str()),
            TemplateStep::Approval { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_name_for_approval_is_sentinel() {
        let step = TemplateStep::Approval {
            description: "check it".to_string(),
            remind_after_hours: Some(2.0),
        };
        assert_eq!(step.agent_name(), APPROVAL_STEP);
        assert!(step.is_approval());
        assert_eq!(step.remind_after_hours(), Some(2.0));
    }

    #[test]
    fn test_remind_after_ignored_on_agent_steps() {
        let step = TemplateStep::Agent {
            agent: "developer".to_string(),
            model: None,
            remind_after_hours: Some(1.0),
        };
        assert_eq!(step.remind_after_hours(), None);
        assert_eq!(step.agent_name(), "developer");
    }

    #[test]
    fn test_referenced_agents_skips_gates() {
        let template = PipelineTemplate {
            name: "quick_fix".to_string(),
            description: String::new(),
            steps: vec![
                TemplateStep::Agent {
                    agent: "developer".to_string(),
                    model: None,
                    remind_after_hours: None,
                },
                TemplateStep::Approval {
                    description: String::new(),
                    remind_after_hours: None,
                },
                TemplateStep::Agent {
                    agent: "reviewer".to_string(),
                    model: Some("opus".to_string()),
                    remind_after_hours: None,
                },
            ],
        };

        let agents: Vec<&str> = template.referenced_agents().collect();
        assert_eq!(agents, vec!["developer", "reviewer"]);
    }
}
