//! The structured handoff schema.
//!
//! When an agent step completes, its raw output is parsed into this schema
//! (see the extractor in baton-core). The schema renders to a compact
//! Markdown preamble that becomes the next step's prompt.

use serde::{Deserialize, Serialize};

/// Structured form of one agent's handoff.
///
/// All four fields are optional; a schema with every field empty is never
/// persisted (extraction fails instead).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffSchema {
    /// Summary of the work the agent completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what_was_done: Option<String>,

    /// Choices the agent made and why.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decisions_made: Option<String>,

    /// Unresolved items the next agent should be aware of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_questions: Option<String>,

    /// Direct instructions addressed to the next agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_agent_context: Option<String>,
}

impl HandoffSchema {
    /// Whether every field is missing or blank.
    pub fn is_empty(&self) -> bool {
        [
            &self.what_was_done,
            &self.decisions_made,
            &self.open_questions,
            &self.next_agent_context,
        ]
        .iter()
        .all(|field| field.as_deref().map_or(true, |s| s.trim().is_empty()))
    }

    /// Render the Markdown context block injected as the next step's prompt.
    ///
    /// Empty fields are omitted entirely; the heading names the previous
    /// agent when one is supplied.
    pub fn to_preamble(&self, prev_agent_name: Option<&str>) -> String {
        let mut sections = Vec::new();

        match prev_agent_name {
            Some(name) => sections.push(format!("## Handoff from previous step ({name})")),
            None => sections.push("## Handoff from previous step".to_string()),
        }

        let fields = [
            ("What was done", &self.what_was_done),
            ("Decisions made", &self.decisions_made),
            ("Open questions", &self.open_questions),
            ("Next agent context", &self.next_agent_context),
        ];

        for (label, value) in fields {
            if let Some(text) = value.as_deref().filter(|s| !s.trim().is_empty()) {
                sections.push(format!("**{label}:** {}", text.trim()));
            }
        }

        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_names_previous_agent() {
        let schema = HandoffSchema {
            what_was_done: Some("Fixed the login flow".to_string()),
            ..Default::default()
        };

        let preamble = schema.to_preamble(Some("developer"));
        assert!(preamble.starts_with("## Handoff from previous step (developer)"));
        assert!(preamble.contains("**What was done:** Fixed the login flow"));
    }

    #[test]
    fn test_preamble_without_agent_name() {
        let schema = HandoffSchema {
            next_agent_context: Some("Review the fix".to_string()),
            ..Default::default()
        };

        let preamble = schema.to_preamble(None);
        assert!(preamble.starts_with("## Handoff from previous step\n"));
        assert!(preamble.contains("**Next agent context:** Review the fix"));
    }

    #[test]
    fn test_preamble_omits_empty_fields() {
        let schema = HandoffSchema {
            what_was_done: Some("Done".to_string()),
            decisions_made: Some("   ".to_string()),
            open_questions: None,
            next_agent_context: Some("Continue".to_string()),
        };

        let preamble = schema.to_preamble(None);
        assert!(!preamble.contains("Decisions made"));
        assert!(!preamble.contains("Open questions"));
        assert!(preamble.contains("**What was done:** Done"));
        assert!(preamble.contains("**Next agent context:** Continue"));
    }

    #[test]
    fn test_preamble_field_order_is_fixed() {
        let schema = HandoffSchema {
            what_was_done: Some("a".to_string()),
            decisions_made: Some("b".to_string()),
            open_questions: Some("c".to_string()),
            next_agent_context: Some("d".to_string()),
        };

        let preamble = schema.to_preamble(None);
        let what = preamble.find("What was done").unwrap();
        let decisions = preamble.find("Decisions made").unwrap();
        let questions = preamble.find("Open questions").unwrap();
        let context = preamble.find("Next agent context").unwrap();
        assert!(what < decisions && decisions < questions && questions < context);
    }

    #[test]
    fn test_is_empty_treats_blank_as_empty() {
        let schema = HandoffSchema {
            what_was_done: Some("  \n ".to_string()),
            ..Default::default()
        };
        assert!(schema.is_empty());
        assert!(HandoffSchema::default().is_empty());
    }
}
