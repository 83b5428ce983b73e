//! Configuration file loading for the registry.
//!
//! The global catalogue lives in two flat YAML documents inside the config
//! directory: `agents.yaml` and `templates.yaml`. A working directory may
//! additionally carry `.baton/agents/*.yaml` override files, each holding a
//! single agent profile.

use std::path::Path;

use tracing::warn;
use walkdir::WalkDir;

use baton_protocol::{AgentProfile, PipelineTemplate};

use crate::registry::error::{ConfigError, ConfigResult};

/// File name of the global agent catalogue.
pub const AGENTS_FILE: &str = "agents.yaml";

/// File name of the global template catalogue.
pub const TEMPLATES_FILE: &str = "templates.yaml";

/// Well-known per-project override location, relative to a working dir.
pub const LOCAL_AGENTS_DIR: &str = ".baton/agents";

/// Load the global agent catalogue. A missing file yields an empty list.
pub fn load_agents(config_dir: &Path) -> ConfigResult<Vec<AgentProfile>> {
    load_yaml_list(&config_dir.join(AGENTS_FILE))
}

/// Load the global template catalogue. A missing file yields an empty list.
pub fn load_templates(config_dir: &Path) -> ConfigResult<Vec<PipelineTemplate>> {
    load_yaml_list(&config_dir.join(TEMPLATES_FILE))
}

fn load_yaml_list<T: serde::de::DeserializeOwned>(path: &Path) -> ConfigResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    // An empty document deserializes as null, not as an empty sequence.
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load per-project agent overrides from `<working_dir>/.baton/agents/*.yaml`.
///
/// Each file holds one profile. Malformed files are skipped with a warning
/// so a broken local override never takes down the derived view. Files are
/// visited in path order for determinism.
pub fn load_local_agents(working_dir: &Path) -> Vec<AgentProfile> {
    let overrides_dir = working_dir.join(LOCAL_AGENTS_DIR);
    if !overrides_dir.is_dir() {
        return Vec::new();
    }

    let mut agents = Vec::new();
    for entry in WalkDir::new(&overrides_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(dir = %overrides_dir.display(), %error, "skipping unreadable override entry");
                continue;
            }
        };

        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
            continue;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) => {
                warn!(file = %path.display(), %error, "skipping unreadable local agent file");
                continue;
            }
        };

        match serde_yaml::from_str::<AgentProfile>(&content) {
            Ok(agent) => agents.push(agent),
            Err(error) => {
                warn!(file = %path.display(), %error, "skipping malformed local agent file");
            }
        }
    }

    agents
}
