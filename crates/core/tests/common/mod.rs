//! Shared fixtures for the core scenario tests.
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use baton_core::client::mock::ScriptedClient;
use baton_core::client::AgentClient;
use baton_core::{
    ApprovalCoordinator, CreatePipeline, EventBroker, LifecycleManager, PipelineRunner,
    PipelineService, Registry, Store,
};
use baton_protocol::{AgentProfile, Pipeline, PipelineStatus, PipelineTemplate, TemplateStep};

/// A fully wired core with a scripted client and an in-memory store.
pub struct Harness {
    pub store: Arc<Store>,
    pub client: Arc<ScriptedClient>,
    pub lifecycle: Arc<LifecycleManager>,
    pub service: PipelineService,
}

#[allow(dead_code)]
pub fn harness(client: ScriptedClient) -> Harness {
    harness_with(client, Duration::from_secs(30), None)
}

pub fn harness_with(
    client: ScriptedClient,
    step_timeout: Duration,
    store: Option<Arc<Store>>,
) -> Harness {
    let store = store.unwrap_or_else(|| Arc::new(Store::open_in_memory().unwrap()));
    let registry = Arc::new(test_registry());
    let client = Arc::new(client);
    let approvals = Arc::new(ApprovalCoordinator::new());
    let broker = Arc::new(EventBroker::new(
        Arc::clone(&client) as Arc<dyn AgentClient>,
        64,
        Duration::from_secs(1),
    ));
    let runner = Arc::new(PipelineRunner::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&client) as Arc<dyn AgentClient>,
        Arc::clone(&approvals),
        broker,
        step_timeout,
    ));
    let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&store), runner));
    let service = PipelineService::new(
        Arc::clone(&store),
        registry,
        approvals,
        Arc::clone(&lifecycle),
    );

    Harness {
        store,
        client,
        lifecycle,
        service,
    }
}

/// developer + reviewer agents, `quick_fix` and `review_gate` templates.
pub fn test_registry() -> Registry {
    let agents = vec![
        agent("developer", None, None),
        agent("reviewer", Some("sonnet"), None),
        agent(
            "architect",
            None,
            Some("Favor boring, well-trodden designs."),
        ),
    ];
    let templates = vec![
        template(
            "quick_fix",
            vec![agent_step("developer", None), agent_step("reviewer", None)],
        ),
        template(
            "review_gate",
            vec![
                agent_step("developer", None),
                TemplateStep::Approval {
                    description: "Check the change before review".to_string(),
                    remind_after_hours: None,
                },
                agent_step("reviewer", None),
            ],
        ),
        template(
            "reminded_gate",
            vec![
                agent_step("developer", None),
                TemplateStep::Approval {
                    description: String::new(),
                    remind_after_hours: Some(1.0),
                },
                agent_step("reviewer", None),
            ],
        ),
    ];

    Registry::from_catalogue(agents, templates).unwrap()
}

pub fn agent(name: &str, default_model: Option<&str>, additions: Option<&str>) -> AgentProfile {
    AgentProfile {
        name: name.to_string(),
        description: format!("{name} agent"),
        agent_id: format!("{name}-runner"),
        default_model: default_model.map(str::to_string),
        system_prompt_additions: additions.map(str::to_string),
    }
}

pub fn agent_step(name: &str, model: Option<&str>) -> TemplateStep {
    TemplateStep::Agent {
        agent: name.to_string(),
        model: model.map(str::to_string),
        remind_after_hours: None,
    }
}

pub fn template(name: &str, steps: Vec<TemplateStep>) -> PipelineTemplate {
    PipelineTemplate {
        name: name.to_string(),
        description: String::new(),
        steps,
    }
}

/// A minimal create request against a named template.
pub fn create_request(template: &str, title: &str, prompt: &str) -> CreatePipeline {
    CreatePipeline {
        template: Some(template.to_string()),
        custom_steps: None,
        title: title.to_string(),
        prompt: prompt.to_string(),
        branch: None,
        working_dir: None,
        step_models: Default::default(),
    }
}

/// Structured agent output with the two fields the scenarios rely on.
pub fn structured_output(done: &str, context: &str) -> String {
    format!("## What Was Done\n{done}\n## Next Agent Context\n{context}")
}

/// Poll the store until the pipeline reaches `status` or the deadline hits.
pub async fn wait_for_status(
    store: &Store,
    pipeline_id: i64,
    status: PipelineStatus,
    deadline: Duration,
) -> Pipeline {
    let started = tokio::time::Instant::now();
    loop {
        let pipeline = store.get_pipeline(pipeline_id).await.unwrap();
        if pipeline.status == status {
            return pipeline;
        }
        if started.elapsed() > deadline {
            panic!(
                "pipeline {pipeline_id} stuck in {:?} while waiting for {:?}",
                pipeline.status, status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
