//! Planning and aggregation through a mocked Ollama server

use sdk::{InsightCategory, OutputFormat, SessionStatus, StepStatus, TurnRequest, ERROR_REPORT};
use serde_json::json;
use std::sync::Arc;
use waypoint_engine::conductor::CapabilityRegistry;
use waypoint_engine::config::OrchestratorConfig;
use waypoint_engine::db::MemoryCheckpointStore;
use waypoint_engine::llm::ollama::OllamaProvider;
use waypoint_engine::orchestrator::Orchestrator;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "llama3.1:8b",
        "message": { "role": "assistant", "content": content },
        "done": true
    }))
}

fn orchestrator(server: &MockServer) -> Arc<Orchestrator> {
    let llm = Arc::new(OllamaProvider::new(server.uri(), "llama3.1:8b"));
    Arc::new(Orchestrator::new(
        Arc::new(MemoryCheckpointStore::new()),
        CapabilityRegistry::with_defaults(),
        Some(llm),
        OrchestratorConfig::default(),
    ))
}

fn request(message: &str) -> TurnRequest {
    TurnRequest {
        session_id: String::new(),
        owner: "alice".to_string(),
        message: message.to_string(),
        output_format: OutputFormat::Chat,
    }
}

#[tokio::test]
async fn test_turn_planned_and_summarised_by_llm() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("You classify"))
        .respond_with(reply(
            r#"{"category": "data_analysis", "subject": "sales", "expected_output": "summary", "complexity": "medium"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("planning agent"))
        .respond_with(reply(
            "Here is the plan:\n```json\n[\
            {\"step_id\": 1, \"capability\": \"search\", \"description\": \"Find the sales data\"},\
            {\"step_id\": 2, \"capability\": \"analysis\", \"description\": \"Find the trend\"}]\n```",
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("You summarise"))
        .respond_with(reply(
            r#"{"insights": [
                {"category": "recommendation", "description": "Restock early", "importance": 0.4, "related_steps": [2]},
                {"category": "trend", "description": "Sales grew", "importance": 0.9, "related_steps": [1, 2]}
            ], "final_answer": "Sales grew 12%."}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator(&server);
    let handle = Arc::clone(&orchestrator).handle();
    let outcome = handle
        .start_turn(request("How did sales do last quarter?"))
        .await
        .unwrap();
    assert_eq!(outcome.session.status, SessionStatus::Completed);
    assert!(!outcome.session.session_id.is_empty());

    let state = handle.get_session(&outcome.session.session_id).await.unwrap();
    let plan = state.plan.as_ref().unwrap();
    assert!(!plan.degraded);
    assert_eq!(plan.intent, "data_analysis: sales");
    assert_eq!(plan.len(), 2);
    assert!(plan.steps.iter().all(|s| s.status == StepStatus::Completed));

    let result = state.aggregated.unwrap();
    assert_eq!(result.final_answer, "Sales grew 12%.");
    assert_eq!(result.insights.len(), 2);
    assert_eq!(result.insights[0].category, InsightCategory::Trend);
    assert_eq!(result.insights[1].category, InsightCategory::Recommendation);
}

#[tokio::test]
async fn test_unavailable_llm_degrades_to_error_report() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let orchestrator = orchestrator(&server);
    let handle = Arc::clone(&orchestrator).handle();
    let outcome = handle
        .start_turn(request("How did sales do last quarter?"))
        .await
        .unwrap();

    // The error-report step itself succeeds, so the session completes
    assert_eq!(outcome.session.status, SessionStatus::Completed);

    let state = handle.get_session(&outcome.session.session_id).await.unwrap();
    let plan = state.plan.as_ref().unwrap();
    assert!(plan.degraded);
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.steps[0].capability, ERROR_REPORT);

    // Fallback insight and narrative stand in for the LLM summary
    let result = state.aggregated.unwrap();
    assert_eq!(result.insights.len(), 1);
    assert!(result
        .final_answer
        .starts_with("Processed \"How did sales do last quarter?\""));
}

#[tokio::test]
async fn test_unknown_capability_in_plan_degrades() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("You classify"))
        .respond_with(reply(r#"{"category": "comparison", "subject": "vendors"}"#))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("planning agent"))
        .respond_with(reply(
            r#"[{"capability": "translate", "description": "Translate the brochure"}]"#,
        ))
        .mount(&server)
        .await;

    let orchestrator = orchestrator(&server);
    let handle = Arc::clone(&orchestrator).handle();
    let outcome = handle.start_turn(request("Compare vendors")).await.unwrap();

    let state = handle.get_session(&outcome.session.session_id).await.unwrap();
    let plan = state.plan.as_ref().unwrap();
    assert!(plan.degraded);
    assert!(plan.steps[0].description.contains("translate"));
}
