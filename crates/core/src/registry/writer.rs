//! Catalogue writes: agent/template CRUD persisted to the config files.
//!
//! Every write validates the full candidate catalogue first, persists both
//! documents with a write-temp-then-rename so the hot-reload watcher never
//! observes a partial file, and only then swaps the in-memory snapshot.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use baton_protocol::{AgentProfile, PipelineTemplate};

use crate::error::CoreError;
use crate::registry::loader::{AGENTS_FILE, TEMPLATES_FILE};
use crate::registry::{ConfigError, Registry, RegistrySnapshot};

impl Registry {
    /// Add a new agent. Conflict if the name is taken.
    pub fn create_agent(&self, profile: AgentProfile) -> Result<AgentProfile, CoreError> {
        let snapshot = self.snapshot();
        if snapshot.get_agent(&profile.name).is_some() {
            return Err(CoreError::Conflict(format!(
                "agent {} already exists",
                profile.name
            )));
        }

        let mut agents = snapshot.agents();
        agents.push(profile.clone());
        self.commit(agents, snapshot.templates())?;
        Ok(profile)
    }

    /// Replace an existing agent's profile.
    pub fn update_agent(
        &self,
        name: &str,
        profile: AgentProfile,
    ) -> Result<AgentProfile, CoreError> {
        let snapshot = self.snapshot();
        if snapshot.get_agent(name).is_none() {
            return Err(CoreError::NotFound(format!("agent {name} not found")));
        }
        if profile.name != name && snapshot.get_agent(&profile.name).is_some() {
            return Err(CoreError::Conflict(format!(
                "agent {} already exists",
                profile.name
            )));
        }

        let mut agents = snapshot.agents();
        agents.retain(|a| a.name != name);
        agents.push(profile.clone());
        self.commit(agents, snapshot.templates())?;
        Ok(profile)
    }

    /// Remove an agent. Conflict while any template references it.
    pub fn delete_agent(&self, name: &str) -> Result<(), CoreError> {
        let snapshot = self.snapshot();
        if snapshot.get_agent(name).is_none() {
            return Err(CoreError::NotFound(format!("agent {name} not found")));
        }
        if let Some(template) = snapshot.template_referencing(name) {
            return Err(CoreError::Conflict(format!(
                "agent {name} is referenced by template {template}"
            )));
        }

        let mut agents = snapshot.agents();
        agents.retain(|a| a.name != name);
        self.commit(agents, snapshot.templates())
    }

    /// Add a new template. Conflict if the name is taken; validation
    /// failure (unknown agent reference) surfaces as a config error.
    pub fn create_template(
        &self,
        template: PipelineTemplate,
    ) -> Result<PipelineTemplate, CoreError> {
        let snapshot = self.snapshot();
        if snapshot.get_template(&template.name).is_some() {
            return Err(CoreError::Conflict(format!(
                "template {} already exists",
                template.name
            )));
        }

        let mut templates = snapshot.templates();
        templates.push(template.clone());
        self.commit(snapshot.agents(), templates)?;
        Ok(template)
    }

    /// Replace an existing template.
    pub fn update_template(
        &self,
        name: &str,
        template: PipelineTemplate,
    ) -> Result<PipelineTemplate, CoreError> {
        let snapshot = self.snapshot();
        if snapshot.get_template(name).is_none() {
            return Err(CoreError::NotFound(format!("template {name} not found")));
        }
        if template.name != name && snapshot.get_template(&template.name).is_some() {
            return Err(CoreError::Conflict(format!(
                "template {} already exists",
                template.name
            )));
        }

        let mut templates = snapshot.templates();
        templates.retain(|t| t.name != name);
        templates.push(template.clone());
        self.commit(snapshot.agents(), templates)?;
        Ok(template)
    }

    /// Remove a template.
    pub fn delete_template(&self, name: &str) -> Result<(), CoreError> {
        let snapshot = self.snapshot();
        if snapshot.get_template(name).is_none() {
            return Err(CoreError::NotFound(format!("template {name} not found")));
        }

        let mut templates = snapshot.templates();
        templates.retain(|t| t.name != name);
        self.commit(snapshot.agents(), templates)
    }

    fn commit(
        &self,
        agents: Vec<AgentProfile>,
        templates: Vec<PipelineTemplate>,
    ) -> Result<(), CoreError> {
        let candidate = RegistrySnapshot::validated(agents, templates)?;

        persist_yaml(
            &self.config_dir().join(AGENTS_FILE),
            "agents",
            &candidate.agents(),
        )?;
        persist_yaml(
            &self.config_dir().join(TEMPLATES_FILE),
            "templates",
            &candidate.templates(),
        )?;

        self.swap(Arc::new(candidate));
        Ok(())
    }
}

/// Serialize `items` to `path` atomically: write a sibling temp file, then
/// rename over the target.
fn persist_yaml<T: Serialize>(path: &Path, what: &'static str, items: &[T]) -> Result<(), ConfigError> {
    let content =
        serde_yaml::to_string(items).map_err(|source| ConfigError::Serialize { what, source })?;

    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, content).map_err(|source| ConfigError::FileWrite {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| ConfigError::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}
