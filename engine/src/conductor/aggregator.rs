//! Aggregator
//!
//! Folds a finished plan into one [`AggregatedResult`]. Insights and the
//! final narrative come from the LLM when one is configured; any failure
//! there falls back to deterministic text so a plan always reaches a result.

use crate::llm::{extract_json, LLMProvider, Message};
use sdk::errors::EngineError;
use sdk::outcome::{
    AggregatedResult, ExecutionSummary, Insight, InsightCategory, ResultMetadata, StepOutcome,
};
use sdk::types::{SessionState, SessionStatus, StepStatus};
use serde::Deserialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Insights kept after ranking
pub const MAX_INSIGHTS: usize = 5;

#[derive(Debug, Deserialize)]
struct RawInsight {
    #[serde(default, alias = "type")]
    category: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    importance: f64,
    #[serde(default)]
    related_steps: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct RawAggregation {
    #[serde(default)]
    insights: Vec<RawInsight>,
    #[serde(default)]
    final_answer: String,
}

pub struct Aggregator {
    llm: Option<Arc<dyn LLMProvider>>,
}

impl Aggregator {
    pub fn new(llm: Option<Arc<dyn LLMProvider>>) -> Self {
        Self { llm }
    }

    /// Build the aggregated result of a session whose cursor is exhausted
    pub async fn aggregate(&self, state: &SessionState) -> AggregatedResult {
        let generated_at = chrono::Utc::now().timestamp();
        let steps = outcomes(state);
        let summary = summarize(&steps);

        let (request, intent) = state
            .plan
            .as_ref()
            .map(|p| (p.request.clone(), p.intent.clone()))
            .unwrap_or_default();

        let (insights, final_answer) = match self.synthesize(&request, &steps).await {
            Ok((insights, answer)) => (insights, answer),
            Err(e) => {
                warn!("Insight generation failed, using fallback: {}", e);
                (Vec::new(), String::new())
            }
        };

        let insights = if insights.is_empty() {
            vec![fallback_insight(&summary, &steps)]
        } else {
            rank(insights)
        };

        let final_answer = if final_answer.trim().is_empty() {
            fallback_narrative(&request, &summary, &steps)
        } else {
            final_answer
        };

        debug!(
            "Aggregated session {}: {}/{} completed, {} failed",
            state.session.session_id,
            summary.completed_steps,
            summary.total_steps,
            summary.failed_steps
        );

        AggregatedResult {
            summary,
            steps,
            insights,
            final_answer,
            metadata: ResultMetadata {
                request,
                intent,
                generated_at,
            },
        }
    }

    async fn synthesize(
        &self,
        request: &str,
        steps: &[StepOutcome],
    ) -> Result<(Vec<Insight>, String), EngineError> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| EngineError::LLMProvider("no LLM provider configured".to_string()))?;

        let results = steps
            .iter()
            .map(|s| {
                let body = match (&s.result, &s.error) {
                    (Some(result), _) => result.clone(),
                    (None, Some(error)) => format!("FAILED: {}", error),
                    (None, None) => "(no result)".to_string(),
                };
                format!("Step {} [{}] {}: {}", s.step_id, s.capability, s.status, body)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let system = Message::system(
            "You summarise the results of a multi-step task.\n\
            Output ONLY a JSON object with:\n\
            - \"insights\": array of {\"category\": \"trend\" | \"anomaly\" | \"recommendation\", \
            \"description\", \"importance\": number between 0 and 1, \"related_steps\": [step ids]}\n\
            - \"final_answer\": a short answer to the user's request",
        );
        let user = Message::user(format!("Request: {}\n\nStep results:\n{}", request, results));

        let content = llm.generate(&[system, user]).await?;
        let json = extract_json(&content)
            .ok_or_else(|| EngineError::Serialization("insight response contained no JSON".to_string()))?;
        let raw: RawAggregation = serde_json::from_str(json)?;

        let insights = raw
            .insights
            .into_iter()
            .filter(|i| !i.description.trim().is_empty())
            .map(|i| Insight {
                category: parse_category(&i.category),
                description: i.description,
                importance: i.importance,
                related_steps: i.related_steps,
            })
            .collect();

        Ok((insights, raw.final_answer))
    }
}

/// Terminal session status for a finished plan
///
/// Failed only when every step failed.
pub fn terminal_status(summary: &ExecutionSummary) -> SessionStatus {
    if summary.total_steps > 0 && summary.failed_steps == summary.total_steps {
        SessionStatus::Failed
    } else {
        SessionStatus::Completed
    }
}

/// Order insights by importance, descending, keeping at most [`MAX_INSIGHTS`]
///
/// Importance is clamped to `[0, 1]` (NaN reads as 0). Ties are broken by the
/// earliest related step; insights without related steps sort last among
/// equals, and the sort is stable.
pub fn rank(mut insights: Vec<Insight>) -> Vec<Insight> {
    for insight in &mut insights {
        insight.importance = if insight.importance.is_nan() {
            0.0
        } else {
            insight.importance.clamp(0.0, 1.0)
        };
    }

    insights.sort_by(|a, b| {
        b.importance
            .total_cmp(&a.importance)
            .then_with(|| first_step_order(a, b))
    });
    insights.truncate(MAX_INSIGHTS);
    insights
}

fn first_step_order(a: &Insight, b: &Insight) -> Ordering {
    match (a.related_steps.iter().min(), b.related_steps.iter().min()) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn parse_category(raw: &str) -> InsightCategory {
    match raw.trim().to_ascii_lowercase().as_str() {
        "anomaly" | "anomalies" => InsightCategory::Anomaly,
        "recommendation" | "recommendations" => InsightCategory::Recommendation,
        _ => InsightCategory::Trend,
    }
}

fn outcomes(state: &SessionState) -> Vec<StepOutcome> {
    state
        .plan
        .iter()
        .flat_map(|plan| plan.steps.iter())
        .map(|step| StepOutcome {
            step_id: step.step_id,
            capability: step.capability.clone(),
            description: step.description.clone(),
            status: step.status,
            result: step.result.clone(),
            error: step.error.clone(),
            hitl_response: step.hitl_response.clone(),
        })
        .collect()
}

fn summarize(steps: &[StepOutcome]) -> ExecutionSummary {
    ExecutionSummary {
        total_steps: steps.len(),
        completed_steps: steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count(),
        failed_steps: steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count(),
        hitl_interactions: steps
            .iter()
            .filter(|s| s.capability == sdk::types::HUMAN_APPROVAL)
            .count(),
    }
}

fn fallback_insight(summary: &ExecutionSummary, steps: &[StepOutcome]) -> Insight {
    Insight {
        category: InsightCategory::Trend,
        description: format!(
            "{} of {} steps completed",
            summary.completed_steps, summary.total_steps
        ),
        importance: 0.5,
        related_steps: steps.iter().map(|s| s.step_id).collect(),
    }
}

fn fallback_narrative(request: &str, summary: &ExecutionSummary, steps: &[StepOutcome]) -> String {
    let mut text = format!(
        "Processed \"{}\": {} of {} steps completed",
        request, summary.completed_steps, summary.total_steps
    );
    if summary.failed_steps > 0 {
        text.push_str(&format!(", {} failed", summary.failed_steps));
    }
    text.push('.');

    if let Some(last) = steps.iter().rev().find_map(|s| s.result.as_deref()) {
        text.push_str("\n\n");
        text.push_str(last);
    }
    text
}
