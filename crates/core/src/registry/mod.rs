//! Agent/template catalogue with hot reload and per-project overrides.
//!
//! The registry owns an immutable, validated snapshot of the configured
//! agents and templates. Reloads parse and validate a candidate snapshot
//! first and only then swap the current pointer, so readers always observe
//! a referentially intact catalogue. Readers hold their snapshot for the
//! duration of one logical operation; the lock is never held across an
//! await point.

pub mod error;
pub mod loader;
pub mod watcher;
mod writer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use baton_protocol::{AgentProfile, PipelineTemplate};

pub use error::{ConfigError, ConfigResult};

/// An immutable, consistent view of the catalogue.
///
/// Snapshots built from the global configuration are validated; merged
/// per-project views are deliberately not re-validated (a global template
/// may reference an agent the local overrides do not carry; the global
/// agent remains available).
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    agents: BTreeMap<String, AgentProfile>,
    templates: BTreeMap<String, PipelineTemplate>,
}

impl RegistrySnapshot {
    /// Build and validate a snapshot: unique names, no reserved `__…__`
    /// names, and every template step referencing a defined agent.
    pub fn validated(
        agents: Vec<AgentProfile>,
        templates: Vec<PipelineTemplate>,
    ) -> ConfigResult<Self> {
        let mut agent_map = BTreeMap::new();
        for agent in agents {
            if agent.name.starts_with("__") {
                return Err(ConfigError::ReservedName { name: agent.name });
            }
            if agent_map.insert(agent.name.clone(), agent.clone()).is_some() {
                return Err(ConfigError::DuplicateAgent { name: agent.name });
            }
        }

        let mut template_map = BTreeMap::new();
        for template in templates {
            if template.name.starts_with("__") {
                return Err(ConfigError::ReservedName {
                    name: template.name,
                });
            }
            for agent in template.referenced_agents() {
                if !agent_map.contains_key(agent) {
                    return Err(ConfigError::UnknownAgent {
                        template: template.name.clone(),
                        agent: agent.to_string(),
                    });
                }
            }
            if template_map
                .insert(template.name.clone(), template.clone())
                .is_some()
            {
                return Err(ConfigError::DuplicateTemplate {
                    name: template.name,
                });
            }
        }

        Ok(Self {
            agents: agent_map,
            templates: template_map,
        })
    }

    pub fn get_agent(&self, name: &str) -> Option<&AgentProfile> {
        self.agents.get(name)
    }

    pub fn get_template(&self, name: &str) -> Option<&PipelineTemplate> {
        self.templates.get(name)
    }

    /// All agents, sorted by name.
    pub fn agents(&self) -> Vec<AgentProfile> {
        self.agents.values().cloned().collect()
    }

    /// All templates, sorted by name.
    pub fn templates(&self) -> Vec<PipelineTemplate> {
        self.templates.values().cloned().collect()
    }

    /// Name of some template referencing `agent_name`, if any.
    pub fn template_referencing(&self, agent_name: &str) -> Option<&str> {
        self.templates
            .values()
            .find(|template| template.referenced_agents().any(|a| a == agent_name))
            .map(|template| template.name.as_str())
    }
}

/// The catalogue holder: current snapshot plus the config directory it was
/// loaded from.
pub struct Registry {
    config_dir: PathBuf,
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl Registry {
    /// Load and validate the catalogue from `config_dir`.
    ///
    /// At initial load a validation failure is fatal; the process should
    /// refuse to start on a broken catalogue.
    pub fn load(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let snapshot = Self::load_snapshot(&config_dir)?;
        Ok(Self {
            config_dir,
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Build a registry from in-memory catalogues, without a backing
    /// directory. Intended for tests and embedding; writer operations
    /// persist to the (empty) config dir and should not be used here.
    pub fn from_catalogue(
        agents: Vec<AgentProfile>,
        templates: Vec<PipelineTemplate>,
    ) -> ConfigResult<Self> {
        let snapshot = RegistrySnapshot::validated(agents, templates)?;
        Ok(Self {
            config_dir: PathBuf::new(),
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// The current snapshot. Cheap; callers keep the `Arc` for the duration
    /// of one logical operation.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Parse and validate a candidate snapshot from disk; swap it in on
    /// success. On failure the prior snapshot stays current and the error
    /// is returned for the caller to log.
    pub fn reload(&self) -> ConfigResult<()> {
        let snapshot = Self::load_snapshot(&self.config_dir)?;
        self.swap(Arc::new(snapshot));
        Ok(())
    }

    /// Derived per-project view: local agent files override globals by
    /// name, new names are added, templates are inherited unchanged. The
    /// merged set is not re-validated.
    pub fn effective_for(&self, working_dir: Option<&str>) -> Arc<RegistrySnapshot> {
        let base = self.snapshot();

        let Some(dir) = working_dir.filter(|d| !d.is_empty()) else {
            return base;
        };

        let local = loader::load_local_agents(Path::new(dir));
        if local.is_empty() {
            return base;
        }

        let mut merged = (*base).clone();
        for agent in local {
            merged.agents.insert(agent.name.clone(), agent);
        }
        Arc::new(merged)
    }

    pub(crate) fn swap(&self, snapshot: Arc<RegistrySnapshot>) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = snapshot;
    }

    fn load_snapshot(config_dir: &Path) -> ConfigResult<RegistrySnapshot> {
        let agents = loader::load_agents(config_dir)?;
        let templates = loader::load_templates(config_dir)?;
        RegistrySnapshot::validated(agents, templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_protocol::TemplateStep;

    fn agent(name: &str) -> AgentProfile {
        AgentProfile {
            name: name.to_string(),
            description: format!("{name} agent"),
            agent_id: name.to_string(),
            default_model: None,
            system_prompt_additions: None,
        }
    }

    fn template(name: &str, agents: &[&str]) -> PipelineTemplate {
        PipelineTemplate {
            name: name.to_string(),
            description: String::new(),
            steps: agents
                .iter()
                .map(|a| TemplateStep::Agent {
                    agent: a.to_string(),
                    model: None,
                    remind_after_hours: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_validated_rejects_unknown_agent_reference() {
        let err = RegistrySnapshot::validated(
            vec![agent("developer")],
            vec![template("broken", &["developer", "ghost"])],
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::UnknownAgent { agent, .. } if agent == "ghost"));
    }

    #[test]
    fn test_validated_rejects_duplicates_and_reserved_names() {
        let err =
            RegistrySnapshot::validated(vec![agent("dev"), agent("dev")], vec![]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateAgent { .. }));

        let err = RegistrySnapshot::validated(vec![agent("__approval__")], vec![]).unwrap_err();
        assert!(matches!(err, ConfigError::ReservedName { .. }));
    }

    #[test]
    fn test_snapshot_lookup() {
        let registry = Registry::from_catalogue(
            vec![agent("developer"), agent("reviewer")],
            vec![template("quick_fix", &["developer", "reviewer"])],
        )
        .unwrap();

        let snapshot = registry.snapshot();
        assert!(snapshot.get_agent("developer").is_some());
        assert!(snapshot.get_agent("ghost").is_none());
        assert_eq!(
            snapshot.get_template("quick_fix").unwrap().steps.len(),
            2
        );
        assert_eq!(snapshot.template_referencing("reviewer"), Some("quick_fix"));
        assert_eq!(snapshot.template_referencing("nobody"), None);
    }

    #[test]
    fn test_effective_for_overrides_by_name_without_revalidation() {
        let registry = Registry::from_catalogue(
            vec![agent("developer")],
            vec![template("quick_fix", &["developer"])],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let overrides = dir.path().join(loader::LOCAL_AGENTS_DIR);
        std::fs::create_dir_all(&overrides).unwrap();
        std::fs::write(
            overrides.join("developer.yaml"),
            "name: developer\ndescription: project-tuned\nagent_id: dev-local\n",
        )
        .unwrap();
        std::fs::write(
            overrides.join("extra.yaml"),
            "name: extra\ndescription: project-only\nagent_id: extra\n",
        )
        .unwrap();

        let view = registry.effective_for(dir.path().to_str());
        assert_eq!(view.get_agent("developer").unwrap().agent_id, "dev-local");
        assert!(view.get_agent("extra").is_some());
        // Templates are inherited unchanged.
        assert!(view.get_template("quick_fix").is_some());

        // The global view is untouched.
        let global = registry.snapshot();
        assert_eq!(global.get_agent("developer").unwrap().agent_id, "developer");
        assert!(global.get_agent("extra").is_none());
    }

    #[test]
    fn test_effective_for_empty_dir_is_global_view() {
        let registry = Registry::from_catalogue(vec![agent("developer")], vec![]).unwrap();
        let view = registry.effective_for(Some(""));
        assert!(view.get_agent("developer").is_some());
    }

    #[test]
    fn test_reload_keeps_prior_snapshot_on_broken_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(loader::AGENTS_FILE),
            "- name: developer\n  description: d\n  agent_id: dev\n",
        )
        .unwrap();

        let registry = Registry::load(dir.path()).unwrap();
        assert!(registry.snapshot().get_agent("developer").is_some());

        std::fs::write(dir.path().join(loader::AGENTS_FILE), "- name: [broken").unwrap();
        assert!(registry.reload().is_err());

        // Readers still see the last good catalogue.
        assert!(registry.snapshot().get_agent("developer").is_some());
    }
}
