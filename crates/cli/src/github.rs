//! GitHub issue context folded into pipeline prompts.
//!
//! Creation requests may name an issue; its title, body, and labels are
//! rendered as a Markdown block ahead of the user prompt. Any fetch
//! failure degrades to the original prompt; issue context is best-effort.

use serde::Deserialize;
use tracing::warn;

const GITHUB_API: &str = "https://api.github.com";

#[derive(Deserialize, Debug)]
pub struct Issue {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Deserialize, Debug)]
pub struct Label {
    pub name: String,
}

/// Prepend the issue block to `prompt`, or return the prompt unchanged if
/// the issue cannot be fetched.
pub async fn enrich_prompt(prompt: &str, repo: &str, number: u64) -> String {
    match fetch_issue(repo, number).await {
        Ok(issue) => render_issue_block(&issue, number, prompt),
        Err(error) => {
            warn!(%repo, number, %error, "issue fetch failed; using prompt as-is");
            prompt.to_string()
        }
    }
}

async fn fetch_issue(repo: &str, number: u64) -> Result<Issue, reqwest::Error> {
    let mut request = reqwest::Client::new()
        .get(format!("{GITHUB_API}/repos/{repo}/issues/{number}"))
        .header("user-agent", "baton")
        .header("accept", "application/vnd.github+json");

    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        request = request.bearer_auth(token);
    }

    request.send().await?.error_for_status()?.json().await
}

fn render_issue_block(issue: &Issue, number: u64, prompt: &str) -> String {
    let labels = issue
        .labels
        .iter()
        .map(|label| label.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "## GitHub Issue #{number}: {title}\n\n{body}\n\nLabels: {labels}\n\n{prompt}",
        title = issue.title,
        body = issue.body.as_deref().unwrap_or(""),
    )
}
