//! Deterministic extraction of structured handoffs from agent output.
//!
//! Agents are asked to end their reply with four Markdown sections (`What
//! Was Done`, `Decisions Made`, `Open Questions`, `Next Agent Context`).
//! This module recovers those sections with a plain line scanner; there is
//! no model call involved, so extraction is cheap and repeatable.

use baton_protocol::HandoffSchema;

/// The four recognized headings in normalized form.
const FIELD_WHAT_WAS_DONE: &str = "whatwasdone";
const FIELD_DECISIONS_MADE: &str = "decisionsmade";
const FIELD_OPEN_QUESTIONS: &str = "openquestions";
const FIELD_NEXT_AGENT_CONTEXT: &str = "nextagentcontext";

/// Parse raw agent output into a [`HandoffSchema`].
///
/// Returns `None` when the input is blank or no recognized section carries
/// any content. The scan is line-based:
///
/// - a heading is any line starting with `#` (any level);
/// - heading text is matched after lower-casing and stripping every
///   non-alphanumeric character, so `## What Was Done:` and `# what-was-done`
///   both count;
/// - a section runs until the next heading of any level;
/// - the first occurrence of a field wins, later duplicates are discarded;
/// - text before the first recognized heading is ignored.
pub fn extract(raw: &str) -> Option<HandoffSchema> {
    if raw.trim().is_empty() {
        return None;
    }

    let mut schema = HandoffSchema::default();
    let mut seen: Vec<&'static str> = Vec::new();
    // Field currently being collected, if the last heading was a fresh match.
    let mut current: Option<&'static str> = None;
    let mut buffer: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if let Some(heading) = heading_text(line) {
            flush(&mut schema, current.take(), &mut buffer);

            if let Some(field) = match_field(&heading) {
                if !seen.contains(&field) {
                    seen.push(field);
                    current = Some(field);
                }
            }
        } else if current.is_some() {
            buffer.push(line);
        }
    }
    flush(&mut schema, current, &mut buffer);

    if schema.is_empty() {
        None
    } else {
        Some(schema)
    }
}

/// Heading text of a Markdown heading line, or `None` for body lines.
fn heading_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    trimmed
        .starts_with('#')
        .then(|| trimmed.trim_start_matches('#').trim())
}

/// Match a heading against the four field names.
fn match_field(heading: &str) -> Option<&'static str> {
    let normalized: String = heading
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();

    match normalized.as_str() {
        FIELD_WHAT_WAS_DONE => Some(FIELD_WHAT_WAS_DONE),
        FIELD_DECISIONS_MADE => Some(FIELD_DECISIONS_MADE),
        FIELD_OPEN_QUESTIONS => Some(FIELD_OPEN_QUESTIONS),
        FIELD_NEXT_AGENT_CONTEXT => Some(FIELD_NEXT_AGENT_CONTEXT),
        _ => None,
    }
}

/// Store the collected section body into its schema slot.
fn flush(schema: &mut HandoffSchema, field: Option<&'static str>, buffer: &mut Vec<&str>) {
    let content = buffer.join("\n").trim().to_string();
    buffer.clear();

    let Some(field) = field else { return };
    if content.is_empty() {
        return;
    }

    let slot = match field {
        FIELD_WHAT_WAS_DONE => &mut schema.what_was_done,
        FIELD_DECISIONS_MADE => &mut schema.decisions_made,
        FIELD_OPEN_QUESTIONS => &mut schema.open_questions,
        _ => &mut schema.next_agent_context,
    };
    *slot = Some(content);
}
