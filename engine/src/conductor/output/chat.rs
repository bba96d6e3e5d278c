//! Conversational rendering

use super::status_marker;
use sdk::outcome::AggregatedResult;
use std::fmt::Write;

const CHAT_INSIGHTS: usize = 3;

pub fn render(result: &AggregatedResult) -> String {
    let summary = &result.summary;
    let mut out = String::new();

    out.push_str(result.final_answer.trim());
    out.push_str("\n\n");

    let _ = write!(
        out,
        "Executed {} steps: {} completed, {} failed",
        summary.total_steps, summary.completed_steps, summary.failed_steps
    );
    if summary.hitl_interactions > 0 {
        let _ = write!(out, ", {} approval(s)", summary.hitl_interactions);
    }
    out.push('\n');

    if !result.insights.is_empty() {
        out.push_str("\nKey insights:\n");
        for insight in result.insights.iter().take(CHAT_INSIGHTS) {
            let _ = writeln!(
                out,
                "- ({}) {}",
                insight.category.as_str(),
                insight.description
            );
        }
    }

    out.push_str("\nSteps:\n");
    for step in &result.steps {
        let _ = write!(
            out,
            "{} {}. {}: {}",
            status_marker(step.status),
            step.step_id,
            step.capability,
            step.description
        );
        if let Some(error) = &step.error {
            let _ = write!(out, " ({})", error);
        }
        out.push('\n');
    }

    out
}
