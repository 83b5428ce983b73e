//! Scenario tests for approval gates: suspend/resume, comments, rejection,
//! reminders, and decision preconditions.

mod common;

use std::sync::Arc;
use std::time::Duration;

use baton_core::client::mock::ScriptedClient;
use baton_core::CoreError;
use baton_protocol::{ApprovalStatus, PipelineStatus, StepStatus};
use common::*;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_approval_approved_with_comment() {
    let client = ScriptedClient::new()
        .with_reply(&structured_output("Implemented.", "Please review."))
        .with_reply(&structured_output("Reviewed.", "Ship it."));
    let h = harness(client);

    let pipeline = h
        .service
        .create_and_run(create_request("review_gate", "gated", "Fix the bug"))
        .await
        .unwrap();

    wait_for_status(
        &h.store,
        pipeline.id,
        PipelineStatus::WaitingForApproval,
        WAIT,
    )
    .await;

    // A pending approval row exists for the gate step.
    let steps = h.store.steps_for_pipeline(pipeline.id).await.unwrap();
    let gate = &steps[1];
    assert!(gate.is_approval_gate());
    assert_eq!(gate.status, StepStatus::Running);
    let approval = h
        .store
        .pending_approval_for_step(gate.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(approval.status, ApprovalStatus::Pending);

    h.service
        .approve(
            pipeline.id,
            Some("focus on perf".to_string()),
            Some("alex".to_string()),
        )
        .await
        .unwrap();

    wait_for_status(&h.store, pipeline.id, PipelineStatus::Done, WAIT).await;

    // The reviewer saw the handoff plus the reviewer note.
    let sent = h.client.sent_messages();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].prompt.contains("Reviewer note: focus on perf"));

    let resolved = h
        .store
        .latest_approval_for_step(gate.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.status, ApprovalStatus::Approved);
    assert_eq!(resolved.decided_by.as_deref(), Some("alex"));
    assert!(resolved.decided_at.is_some());

    let audit = h.service.audit_events(pipeline.id).await.unwrap();
    assert!(audit.iter().any(|e| e.event_type == "approval_requested"));
    assert!(audit.iter().any(|e| e.event_type == "approval_granted"));
}

#[tokio::test]
async fn test_approval_rejected_fails_pipeline() {
    let client =
        ScriptedClient::new().with_reply(&structured_output("Implemented.", "Please review."));
    let h = harness(client);

    let pipeline = h
        .service
        .create_and_run(create_request("review_gate", "gated", "Fix the bug"))
        .await
        .unwrap();

    wait_for_status(
        &h.store,
        pipeline.id,
        PipelineStatus::WaitingForApproval,
        WAIT,
    )
    .await;

    h.service
        .reject(pipeline.id, Some("not like this".to_string()), None)
        .await
        .unwrap();

    wait_for_status(&h.store, pipeline.id, PipelineStatus::Failed, WAIT).await;

    let steps = h.store.steps_for_pipeline(pipeline.id).await.unwrap();
    assert_eq!(steps[1].status, StepStatus::Failed);
    assert_eq!(
        steps[1].error_message.as_deref(),
        Some("Approval rejected: not like this")
    );
    // The step after the gate was never started.
    assert_eq!(steps[2].status, StepStatus::Pending);
    assert_eq!(h.client.sent_messages().len(), 1);

    let audit = h.service.audit_events(pipeline.id).await.unwrap();
    assert!(audit.iter().any(|e| e.event_type == "approval_rejected"));
    assert!(audit.iter().any(|e| e.event_type == "pipeline_failed"));
}

#[tokio::test]
async fn test_decision_requires_waiting_pipeline() {
    let client = ScriptedClient::new()
        .with_reply(&structured_output("Done.", "Next."))
        .with_reply(&structured_output("Done.", "Next."));
    let h = harness(client);

    let pipeline = h
        .service
        .create_and_run(create_request("quick_fix", "plain", "Prompt"))
        .await
        .unwrap();
    wait_for_status(&h.store, pipeline.id, PipelineStatus::Done, WAIT).await;

    let err = h.service.approve(pipeline.id, None, None).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let err = h.service.reject(pipeline.id, None, None).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test(start_paused = true)]
async fn test_reminder_fires_once_then_wait_continues() {
    let client = ScriptedClient::new()
        .with_reply(&structured_output("Implemented.", "Please review."))
        .with_reply(&structured_output("Reviewed.", "Done."));
    let h = harness(client);

    // reminded_gate's approval step carries remind_after_hours = 1.0.
    let pipeline = h
        .service
        .create_and_run(create_request("reminded_gate", "slow gate", "Prompt"))
        .await
        .unwrap();

    wait_for_status(
        &h.store,
        pipeline.id,
        PipelineStatus::WaitingForApproval,
        WAIT,
    )
    .await;

    // Let virtual time pass the one-hour reminder deadline.
    tokio::time::sleep(Duration::from_secs(3700)).await;

    let audit = h.service.audit_events(pipeline.id).await.unwrap();
    let reminders = audit
        .iter()
        .filter(|e| e.event_type == "approval_reminder")
        .count();
    assert_eq!(reminders, 1);

    // Much later, the reminder has still fired only once...
    tokio::time::sleep(Duration::from_secs(7200)).await;
    let audit = h.service.audit_events(pipeline.id).await.unwrap();
    assert_eq!(
        audit
            .iter()
            .filter(|e| e.event_type == "approval_reminder")
            .count(),
        1
    );

    // ...and a decision arriving after the reminder is still observed.
    h.service.approve(pipeline.id, None, None).await.unwrap();
    wait_for_status(&h.store, pipeline.id, PipelineStatus::Done, WAIT).await;
}

#[tokio::test]
async fn test_gate_without_reminder_waits_silently() {
    let client = ScriptedClient::new()
        .with_reply(&structured_output("Implemented.", "Please review."))
        .with_reply(&structured_output("Reviewed.", "Done."));
    let h = harness(client);

    let pipeline = h
        .service
        .create_and_run(create_request("review_gate", "quiet gate", "Prompt"))
        .await
        .unwrap();

    wait_for_status(
        &h.store,
        pipeline.id,
        PipelineStatus::WaitingForApproval,
        WAIT,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let audit = h.service.audit_events(pipeline.id).await.unwrap();
    assert!(!audit.iter().any(|e| e.event_type == "approval_reminder"));

    h.service.approve(pipeline.id, None, None).await.unwrap();
    wait_for_status(&h.store, pipeline.id, PipelineStatus::Done, WAIT).await;
}

#[tokio::test]
async fn test_decision_recorded_before_crash_is_not_asked_again() {
    // First process: reach the gate, then die while suspended on it.
    let client =
        ScriptedClient::new().with_reply(&structured_output("Implemented.", "Please review."));
    let h1 = harness(client);

    let pipeline = h1
        .service
        .create_and_run(create_request("review_gate", "gated", "Fix the bug"))
        .await
        .unwrap();
    wait_for_status(
        &h1.store,
        pipeline.id,
        PipelineStatus::WaitingForApproval,
        WAIT,
    )
    .await;
    h1.lifecycle.shutdown().await;

    // The decision lands while no executor is alive, exactly as if the
    // process had crashed between recording it and completing the step.
    let steps = h1.store.steps_for_pipeline(pipeline.id).await.unwrap();
    let gate = &steps[1];
    let approval = h1
        .store
        .pending_approval_for_step(gate.id)
        .await
        .unwrap()
        .unwrap();
    h1.store
        .resolve_approval(
            approval.id,
            ApprovalStatus::Approved,
            Some("go ahead"),
            Some("alex"),
        )
        .await
        .unwrap();

    // Second process: recovery honors the recorded decision instead of
    // asking the approver a second time.
    let h2 = harness_with(
        ScriptedClient::new().with_reply(&structured_output("Reviewed.", "Done.")),
        Duration::from_secs(30),
        Some(Arc::clone(&h1.store)),
    );
    assert_eq!(h2.lifecycle.recover().await.unwrap(), 1);

    wait_for_status(&h2.store, pipeline.id, PipelineStatus::Done, WAIT).await;

    // Same approval row; no orphaned duplicate, no second request.
    let latest = h2
        .store
        .latest_approval_for_step(gate.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, approval.id);
    assert_eq!(latest.decided_by.as_deref(), Some("alex"));

    let audit = h2.service.audit_events(pipeline.id).await.unwrap();
    assert_eq!(
        audit
            .iter()
            .filter(|e| e.event_type == "approval_requested")
            .count(),
        1
    );
    assert!(audit.iter().any(|e| e.event_type == "approval_granted"));

    // The pre-crash comment still reaches the next step.
    let sent = h2.client.sent_messages();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].prompt.contains("Reviewer note: go ahead"));
}

#[tokio::test]
async fn test_restart_after_rejection_asks_for_a_new_decision() {
    let client =
        ScriptedClient::new().with_reply(&structured_output("Implemented.", "Please review."));
    let h = harness(client);

    let pipeline = h
        .service
        .create_and_run(create_request("review_gate", "gated", "Fix the bug"))
        .await
        .unwrap();
    wait_for_status(
        &h.store,
        pipeline.id,
        PipelineStatus::WaitingForApproval,
        WAIT,
    )
    .await;

    let steps = h.store.steps_for_pipeline(pipeline.id).await.unwrap();
    let gate = &steps[1];
    let first = h
        .store
        .pending_approval_for_step(gate.id)
        .await
        .unwrap()
        .unwrap();

    h.service.reject(pipeline.id, None, None).await.unwrap();
    wait_for_status(&h.store, pipeline.id, PipelineStatus::Failed, WAIT).await;

    // Restarting the failed pipeline resets the gate; the old rejection
    // must not be replayed against the fresh attempt.
    h.service.restart(pipeline.id).await.unwrap();
    wait_for_status(
        &h.store,
        pipeline.id,
        PipelineStatus::WaitingForApproval,
        WAIT,
    )
    .await;

    let second = h
        .store
        .pending_approval_for_step(gate.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(second.id, first.id);

    let audit = h.service.audit_events(pipeline.id).await.unwrap();
    assert_eq!(
        audit
            .iter()
            .filter(|e| e.event_type == "approval_requested")
            .count(),
        2
    );

    // This time the reviewer says yes.
    h.client.push(baton_core::client::mock::ScriptedResponse::Reply(
        structured_output("Reviewed.", "Done."),
    ));
    h.service.approve(pipeline.id, None, None).await.unwrap();
    wait_for_status(&h.store, pipeline.id, PipelineStatus::Done, WAIT).await;
}

#[tokio::test]
async fn test_empty_comment_adds_no_reviewer_note() {
    let client = ScriptedClient::new()
        .with_reply(&structured_output("Implemented.", "Please review."))
        .with_reply(&structured_output("Reviewed.", "Done."));
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
    h.service
        .approve(pipeline.id, Some("   ".to_string()), None)
        .await
        .unwrap();
    wait_for_status(&h.store, pipeline.id, PipelineStatus::Done, WAIT).await;

    let sent = h.client.sent_messages();
    assert!(!sent[1].prompt.contains("Reviewer note"));
}
