//! End-to-end session flows through the session handle
//!
//! These tests run entirely in-process against the in-memory checkpoint
//! store and the built-in placeholder workers; no LLM is needed because
//! plans are supplied explicitly.

use async_trait::async_trait;
use sdk::capability::{Capability, StepInput};
use sdk::{
    EngineError, ExecutionEvent, HitlResponse, OutputFormat, RenderedContent, ResumeInput,
    SessionFilter, SessionHandle, SessionStatus, StepStatus, TurnOutcome, TurnRequest,
};
use std::sync::Arc;
use waypoint_engine::conductor::CapabilityRegistry;
use waypoint_engine::config::OrchestratorConfig;
use waypoint_engine::db::MemoryCheckpointStore;
use waypoint_engine::orchestrator::Orchestrator;

const EXAMPLE_PLAN: &str = r#"[
    {"capability": "search", "description": "Find last quarter's sales"},
    {"capability": "human-approval", "description": "Confirm the data", "hitl_question": "confirm?"},
    {"capability": "document", "description": "Write the summary"}
]"#;

/// Worker whose data source is always down
struct Offline;

#[async_trait]
impl Capability for Offline {
    fn name(&self) -> &str {
        "offline"
    }

    fn description(&self) -> &str {
        "always fails"
    }

    async fn run(&self, _input: &StepInput) -> Result<String, EngineError> {
        Err(EngineError::Worker("source offline".to_string()))
    }
}

fn orchestrator() -> Arc<Orchestrator> {
    let mut capabilities = CapabilityRegistry::with_defaults();
    capabilities.register(Arc::new(Offline)).unwrap();
    Arc::new(Orchestrator::new(
        Arc::new(MemoryCheckpointStore::new()),
        capabilities,
        None,
        OrchestratorConfig::default(),
    ))
}

fn request(session_id: &str, format: OutputFormat) -> TurnRequest {
    TurnRequest {
        session_id: session_id.to_string(),
        owner: "alice".to_string(),
        message: "analyse last quarter's sales".to_string(),
        output_format: format,
    }
}

async fn park(orchestrator: &Arc<Orchestrator>, session_id: &str) -> (SessionHandle, String) {
    let outcome = orchestrator
        .start_plan(request(session_id, OutputFormat::Chat), EXAMPLE_PLAN)
        .await
        .unwrap();
    let token = outcome.interrupt.expect("plan should park at step 2").token;
    (Arc::clone(orchestrator).handle(), token)
}

fn text_of(outcome: &TurnOutcome) -> String {
    match &outcome.output.as_ref().expect("finished turns carry output").content {
        RenderedContent::Text(text) => text.clone(),
        other => panic!("expected text output, got {:?}", other),
    }
}

#[tokio::test]
async fn test_example_flow_parks_then_completes() {
    let orchestrator = orchestrator();
    let outcome = orchestrator
        .start_plan(request("flow", OutputFormat::Chat), EXAMPLE_PLAN)
        .await
        .unwrap();

    assert_eq!(outcome.session.status, SessionStatus::WaitingHuman);
    assert!(outcome.output.is_none());
    let token = outcome.interrupt.unwrap();
    assert_eq!(token.step_id, 2);
    assert_eq!(token.question, "confirm?");

    let handle = Arc::clone(&orchestrator).handle();
    let state = handle.get_session("flow").await.unwrap();
    let steps = &state.plan.as_ref().unwrap().steps;
    assert_eq!(state.cursor, 1);
    assert_eq!(steps[0].status, StepStatus::Completed);
    assert_eq!(steps[1].status, StepStatus::WaitingHuman);
    assert_eq!(steps[2].status, StepStatus::Pending);

    let outcome = handle
        .resume("flow", Some(token.token), ResumeInput::Approve)
        .await
        .unwrap();
    assert_eq!(outcome.session.status, SessionStatus::Completed);
    assert!(outcome.interrupt.is_none());
    assert!(text_of(&outcome).contains("Executed 3 steps: 3 completed, 0 failed"));

    let state = handle.get_session("flow").await.unwrap();
    let result = state.aggregated.unwrap();
    assert_eq!(result.summary.completed_steps, 3);
    assert_eq!(result.summary.hitl_interactions, 1);
    assert!(state.pending_interrupt.is_none());
}

#[tokio::test]
async fn test_token_is_single_use() {
    let orchestrator = orchestrator();
    let (handle, token) = park(&orchestrator, "once").await;

    handle
        .resume("once", Some(token.clone()), ResumeInput::Approve)
        .await
        .unwrap();
    let sequences = handle.checkpoints("once").await.unwrap().len();

    let again = handle
        .resume("once", Some(token), ResumeInput::Approve)
        .await;
    assert!(matches!(again, Err(EngineError::StaleToken(_))));
    assert_eq!(handle.checkpoints("once").await.unwrap().len(), sequences);
}

#[tokio::test]
async fn test_wrong_token_leaves_session_parked() {
    let orchestrator = orchestrator();
    let (handle, token) = park(&orchestrator, "wrong").await;

    let result = handle
        .resume("wrong", Some("bogus".to_string()), ResumeInput::Approve)
        .await;
    assert!(matches!(result, Err(EngineError::StaleToken(_))));

    let state = handle.get_session("wrong").await.unwrap();
    assert_eq!(state.session.status, SessionStatus::WaitingHuman);
    assert_eq!(state.pending_interrupt.as_ref().unwrap().token, token);

    let outcome = handle
        .resume("wrong", None, ResumeInput::Approve)
        .await
        .unwrap();
    assert_eq!(outcome.session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_auto_approval_differs_from_text_answer() {
    let orchestrator = orchestrator();
    let (handle, approve_token) = park(&orchestrator, "auto").await;
    let (_, answer_token) = park(&orchestrator, "text").await;

    handle
        .resume("auto", Some(approve_token), ResumeInput::Approve)
        .await
        .unwrap();
    handle
        .resume("text", Some(answer_token), ResumeInput::Respond("yes".into()))
        .await
        .unwrap();

    let auto = handle.get_session("auto").await.unwrap();
    let text = handle.get_session("text").await.unwrap();
    let auto_step = &auto.plan.as_ref().unwrap().steps[1];
    let text_step = &text.plan.as_ref().unwrap().steps[1];

    assert_eq!(auto_step.hitl_response, Some(HitlResponse::AutoApproved));
    assert_eq!(
        text_step.hitl_response,
        Some(HitlResponse::Text("yes".to_string()))
    );
    assert_eq!(text_step.result.as_deref(), Some("confirm? -> yes"));
    assert_ne!(auto_step.result, text_step.result);
}

#[tokio::test]
async fn test_failed_step_does_not_stop_the_plan() {
    let orchestrator = orchestrator();
    let plan = r#"[
        {"capability": "offline", "description": "A"},
        {"capability": "search", "description": "B"}
    ]"#;

    let outcome = orchestrator
        .start_plan(request("partial", OutputFormat::Chat), plan)
        .await
        .unwrap();
    assert_eq!(outcome.session.status, SessionStatus::Completed);

    let state = Arc::clone(&orchestrator)
        .handle()
        .get_session("partial")
        .await
        .unwrap();
    let steps = &state.plan.as_ref().unwrap().steps;
    assert_eq!(steps[0].status, StepStatus::Failed);
    assert!(steps[0].error.as_deref().unwrap().contains("source offline"));
    assert_eq!(steps[1].status, StepStatus::Completed);
    assert_eq!(state.cursor, 2);
}

#[tokio::test]
async fn test_session_fails_only_when_every_step_fails() {
    let orchestrator = orchestrator();
    let plan = r#"[{"capability": "offline", "description": "A"}]"#;

    let outcome = orchestrator
        .start_plan(request("doomed", OutputFormat::Chat), plan)
        .await
        .unwrap();
    assert_eq!(outcome.session.status, SessionStatus::Failed);
    assert!(outcome.output.is_some());
}

#[tokio::test]
async fn test_dispatch_on_finished_session_writes_nothing() {
    let orchestrator = orchestrator();
    let plan = r#"[{"capability": "search", "description": "A"}]"#;
    let first = orchestrator
        .start_plan(request("done", OutputFormat::Chat), plan)
        .await
        .unwrap();

    let handle = Arc::clone(&orchestrator).handle();
    let before = handle.checkpoints("done").await.unwrap();
    let mut events = handle.subscribe("done").await;

    let again = handle.dispatch("done").await.unwrap();
    assert_eq!(again.session.status, SessionStatus::Completed);
    assert_eq!(text_of(&again), text_of(&first));
    assert_eq!(handle.checkpoints("done").await.unwrap(), before);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_dispatch_on_parked_session_returns_same_token() {
    let orchestrator = orchestrator();
    let (handle, token) = park(&orchestrator, "parked").await;

    let outcome = handle.dispatch("parked").await.unwrap();
    assert_eq!(outcome.session.status, SessionStatus::WaitingHuman);
    assert_eq!(outcome.interrupt.unwrap().token, token);
}

#[tokio::test]
async fn test_events_arrive_in_order() {
    let orchestrator = orchestrator();
    let handle = Arc::clone(&orchestrator).handle();
    let mut events = handle.subscribe("events").await;

    let plan = r#"[
        {"capability": "search", "description": "A"},
        {"capability": "document", "description": "B"}
    ]"#;
    orchestrator
        .start_plan(request("events", OutputFormat::Chat), plan)
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec![
            "execution_started",
            "step_started",
            "step_completed",
            "step_started",
            "step_completed",
            "final_result",
            "execution_completed",
        ]
    );
}

#[tokio::test]
async fn test_parking_emits_hitl_waiting() {
    let orchestrator = orchestrator();
    let handle = Arc::clone(&orchestrator).handle();
    let mut events = handle.subscribe("hitl").await;

    let outcome = orchestrator
        .start_plan(request("hitl", OutputFormat::Chat), EXAMPLE_PLAN)
        .await
        .unwrap();
    let token = outcome.interrupt.unwrap();

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    match last {
        Some(ExecutionEvent::HitlWaiting {
            step_id,
            question,
            token: sent,
        }) => {
            assert_eq!(step_id, 2);
            assert_eq!(question, "confirm?");
            assert_eq!(sent, token.token);
        }
        other => panic!("expected hitl_waiting last, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_sessions_are_isolated() {
    let orchestrator = orchestrator();
    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..8 {
        let orchestrator = Arc::clone(&orchestrator);
        tasks.spawn(async move {
            let id = format!("c{}", n);
            let outcome = orchestrator
                .start_plan(request(&id, OutputFormat::Chat), EXAMPLE_PLAN)
                .await
                .unwrap();
            (id, outcome.interrupt.unwrap().token)
        });
    }

    let mut parked = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        parked.push(joined.unwrap());
    }

    let handle = Arc::clone(&orchestrator).handle();
    let waiting = handle
        .list_sessions(SessionFilter {
            owner: Some("alice".into()),
            status: Some(SessionStatus::WaitingHuman),
        })
        .await
        .unwrap();
    assert_eq!(waiting.len(), 8);

    // Tokens are per session
    let (first_id, _) = &parked[0];
    let (_, other_token) = &parked[1];
    let crossed = handle
        .resume(first_id, Some(other_token.clone()), ResumeInput::Approve)
        .await;
    assert!(matches!(crossed, Err(EngineError::StaleToken(_))));

    for (id, token) in parked {
        let outcome = handle
            .resume(&id, Some(token), ResumeInput::Approve)
            .await
            .unwrap();
        assert_eq!(outcome.session.status, SessionStatus::Completed);
    }
}

#[tokio::test]
async fn test_delete_while_parked() {
    let orchestrator = orchestrator();
    let (handle, token) = park(&orchestrator, "gone").await;

    assert!(handle.delete_session("gone").await.unwrap());
    assert!(matches!(
        handle.get_session("gone").await,
        Err(EngineError::SessionNotFound(_))
    ));
    assert!(matches!(
        handle.resume("gone", Some(token), ResumeInput::Approve).await,
        Err(EngineError::SessionNotFound(_))
    ));
    assert!(!handle.delete_session("gone").await.unwrap());
}

#[tokio::test]
async fn test_report_rendering_is_stable() {
    let orchestrator = orchestrator();
    let plan = r#"[
        {"capability": "search", "description": "A"},
        {"capability": "offline", "description": "B"}
    ]"#;
    let outcome = orchestrator
        .start_plan(request("report", OutputFormat::Report), plan)
        .await
        .unwrap();
    let report = text_of(&outcome);
    assert!(report.starts_with("# Report: analyse last quarter's sales"));
    assert!(report.contains("1 of 2 steps completed successfully."));

    let handle = Arc::clone(&orchestrator).handle();
    let first = handle.render("report", OutputFormat::Report).await.unwrap();
    let second = handle.render("report", OutputFormat::Report).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.to_text(), report);

    let graph = handle.render("report", OutputFormat::Graph).await.unwrap();
    assert!(matches!(graph.content, RenderedContent::Graph(_)));
}

#[tokio::test]
async fn test_new_turn_replaces_finished_plan() {
    let orchestrator = orchestrator();
    let plan = r#"[{"capability": "search", "description": "A"}]"#;
    orchestrator
        .start_plan(request("multi", OutputFormat::Chat), plan)
        .await
        .unwrap();

    let plan = r#"[
        {"capability": "search", "description": "A"},
        {"capability": "document", "description": "B"}
    ]"#;
    let outcome = orchestrator
        .start_plan(request("multi", OutputFormat::Chat), plan)
        .await
        .unwrap();
    assert_eq!(outcome.session.status, SessionStatus::Completed);

    let handle = Arc::clone(&orchestrator).handle();
    let state = handle.get_session("multi").await.unwrap();
    assert_eq!(state.plan.as_ref().unwrap().len(), 2);
    assert_eq!(state.aggregated.unwrap().summary.total_steps, 2);

    // Request, plan, one line per step and the final answer, for each turn
    let page = handle.history("multi", 100).await.unwrap();
    assert_eq!(page.total_messages, 4 + 5);
    assert_eq!(page.messages[4].content, "analyse last quarter's sales");
}
