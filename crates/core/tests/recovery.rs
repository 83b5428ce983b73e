//! Scenario tests for crash recovery, abort, restart, and working-dir
//! conflict detection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use baton_core::client::mock::ScriptedClient;
use baton_core::CoreError;
use baton_protocol::{PipelineStatus, StepStatus};
use common::*;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_crash_recovery_resumes_from_last_handoff() {
    // First process: step 0 completes, then the process "crashes" while
    // step 1 is in flight.
    let client = ScriptedClient::new()
        .with_reply(&structured_output("Fixed the login flow.", "Review the fix."))
        .with_hang();
    let h1 = harness(client);

    let pipeline = h1
        .service
        .create_and_run(create_request("quick_fix", "crashy", "Login broken"))
        .await
        .unwrap();

    // Wait until the second step is actually running, then drop the
    // executor without any row cleanup.
    let started = tokio::time::Instant::now();
    loop {
        let steps = h1.store.steps_for_pipeline(pipeline.id).await.unwrap();
        if steps[1].status == StepStatus::Running {
            break;
        }
        assert!(started.elapsed() < WAIT, "second step never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h1.lifecycle.shutdown().await;

    let interrupted = h1.store.get_pipeline(pipeline.id).await.unwrap();
    assert_eq!(interrupted.status, PipelineStatus::Running);

    // Second process over the same store: recovery re-dispatches the
    // pipeline and the interrupted step is re-attempted from scratch.
    let h2 = harness_with(
        ScriptedClient::new().with_reply(&structured_output("Looks good.", "Done.")),
        Duration::from_secs(30),
        Some(Arc::clone(&h1.store)),
    );

    let recovered = h2.lifecycle.recover().await.unwrap();
    assert_eq!(recovered, 1);

    wait_for_status(&h2.store, pipeline.id, PipelineStatus::Done, WAIT).await;

    // The resumed step was prompted with step 0's rendered preamble, not
    // the original user prompt.
    let sent = h2.client.sent_messages();
    assert_eq!(sent.len(), 1);
    assert!(sent[0]
        .prompt
        .starts_with("## Handoff from previous step (developer)"));
    assert!(sent[0].prompt.contains("Fixed the login flow."));

    let steps = h2.store.steps_for_pipeline(pipeline.id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Done));
}

#[tokio::test]
async fn test_recover_with_nothing_active_is_a_no_op() {
    let h = harness(ScriptedClient::new());
    assert_eq!(h.lifecycle.recover().await.unwrap(), 0);
    assert_eq!(h.lifecycle.tracked_count(), 0);
}

#[tokio::test]
async fn test_abort_running_pipeline() {
    let client = ScriptedClient::new().with_hang();
    let h = harness(client);

    let pipeline = h
        .service
        .create_and_run(create_request("quick_fix", "doomed", "Prompt"))
        .await
        .unwrap();
    wait_for_status(&h.store, pipeline.id, PipelineStatus::Running, WAIT).await;

    // Let the executor reach the agent call before pulling the plug; the
    // session is tracked for abort by the time send_message is recorded.
    let started = tokio::time::Instant::now();
    while h.client.sent_messages().is_empty() {
        assert!(started.elapsed() < WAIT, "agent call never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let aborted = h.service.abort(pipeline.id).await.unwrap();
    assert_eq!(aborted.status, PipelineStatus::Failed);

    let steps = h.store.steps_for_pipeline(pipeline.id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Failed);
    assert_eq!(steps[0].error_message.as_deref(), Some("Aborted"));

    // The in-flight agent session was aborted.
    assert_eq!(h.client.aborted_sessions().len(), 1);

    let audit = h.service.audit_events(pipeline.id).await.unwrap();
    assert!(audit.iter().any(|e| e.event_type == "pipeline_failed"));

    // Aborting a terminal pipeline is a precondition violation.
    let err = h.service.abort(pipeline.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn test_abort_waiting_pipeline_wakes_and_fails_it() {
    let client =
        ScriptedClient::new().with_reply(&structured_output("Implemented.", "Review it."));
    let h = harness(client);

    let pipeline = h
        .service
        .create_and_run(create_request("review_gate", "gated", "Prompt"))
        .await
        .unwrap();
    wait_for_status(
        &h.store,
        pipeline.id,
        PipelineStatus::WaitingForApproval,
        WAIT,
    )
    .await;

    h.service.abort(pipeline.id).await.unwrap();

    let pipeline = h.store.get_pipeline(pipeline.id).await.unwrap();
    assert_eq!(pipeline.status, PipelineStatus::Failed);

    let steps = h.store.steps_for_pipeline(pipeline.id).await.unwrap();
    assert_eq!(steps[1].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_restart_failed_pipeline_runs_to_completion() {
    let client = ScriptedClient::new().with_failure("first attempt exploded");
    let h = harness(client);

    let pipeline = h
        .service
        .create_and_run(create_request("quick_fix", "retry me", "Prompt"))
        .await
        .unwrap();
    wait_for_status(&h.store, pipeline.id, PipelineStatus::Failed, WAIT).await;

    // Script the replies the retry will consume.
    h.client.push(baton_core::client::mock::ScriptedResponse::Reply(
        structured_output("Fixed on retry.", "Review."),
    ));
    h.client.push(baton_core::client::mock::ScriptedResponse::Reply(
        structured_output("Reviewed.", "Done."),
    ));

    h.service.restart(pipeline.id).await.unwrap();
    wait_for_status(&h.store, pipeline.id, PipelineStatus::Done, WAIT).await;

    let steps = h.store.steps_for_pipeline(pipeline.id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Done));
    // The failed step's error was cleared by the restart reset.
    assert!(steps.iter().all(|s| s.error_message.is_none()));
}

#[tokio::test]
async fn test_restart_requires_failed_status() {
    let client = ScriptedClient::new()
        .with_reply(&structured_output("Done.", "Next."))
        .with_reply(&structured_output("Done.", "Next."));
    let h = harness(client);

    let pipeline = h
        .service
        .create_and_run(create_request("quick_fix", "fine", "Prompt"))
        .await
        .unwrap();
    wait_for_status(&h.store, pipeline.id, PipelineStatus::Done, WAIT).await;

    let err = h.service.restart(pipeline.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn test_conflicts_lists_only_active_pipelines_in_same_dir() {
    let client = ScriptedClient::new()
        .with_reply(&structured_output("Done.", "Next."))
        .with_reply(&structured_output("Done.", "Next."))
        .with_hang();
    let h = harness(client);

    // One pipeline runs to completion in /tmp/p.
    let mut finished = create_request("quick_fix", "done", "Prompt");
    finished.working_dir = Some("/tmp/p".to_string());
    let finished = h.service.create_and_run(finished).await.unwrap();
    wait_for_status(&h.store, finished.id, PipelineStatus::Done, WAIT).await;

    // Another is still running in /tmp/p.
    let mut live = create_request("quick_fix", "live", "Prompt");
    live.working_dir = Some("/tmp/p".to_string());
    let live = h.service.create_and_run(live).await.unwrap();
    wait_for_status(&h.store, live.id, PipelineStatus::Running, WAIT).await;

    let conflicts = h.service.conflicts("/tmp/p").await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].id, live.id);

    // Empty working dir answers [] without consulting the store.
    assert!(h.service.conflicts("").await.unwrap().is_empty());

    h.service.abort(live.id).await.unwrap();
}

#[tokio::test]
async fn test_detail_view_carries_latest_handoff_and_errors() {
    let client = ScriptedClient::new()
        .with_reply("no structure here")
        .with_failure("reviewer unavailable");
    let h = harness(client);

    let pipeline = h
        .service
        .create_and_run(create_request("quick_fix", "detail", "Prompt"))
        .await
        .unwrap();
    wait_for_status(&h.store, pipeline.id, PipelineStatus::Failed, WAIT).await;

    let detail = h.service.detail(pipeline.id).await.unwrap();
    assert_eq!(detail.pipeline.id, pipeline.id);
    assert_eq!(detail.steps.len(), 2);

    let first = &detail.steps[0];
    assert_eq!(first.step.status, StepStatus::Done);
    assert_eq!(
        first.latest_handoff.as_ref().unwrap().content,
        "no structure here"
    );

    let second = &detail.steps[1];
    assert_eq!(second.step.status, StepStatus::Failed);
    assert_eq!(
        second.step.error_message.as_deref(),
        Some("reviewer unavailable")
    );
    assert!(second.latest_handoff.is_none());
}
