//! Markdown report rendering
//!
//! The timestamp comes from the aggregated result, never the wall clock, so
//! the same result always renders to the same bytes.

use sdk::outcome::{AggregatedResult, InsightCategory};
use std::fmt::Write;

pub fn render(result: &AggregatedResult) -> String {
    let meta = &result.metadata;
    let summary = &result.summary;
    let mut out = String::new();

    let _ = writeln!(out, "# Report: {}\n", meta.request);
    let _ = writeln!(out, "- **Intent:** {}", meta.intent);
    let _ = writeln!(out, "- **Generated:** {}\n", format_timestamp(meta.generated_at));

    out.push_str("## Summary\n\n");
    let _ = writeln!(out, "{}\n", result.final_answer.trim());

    out.push_str("## Statistics\n\n");
    out.push_str("| Metric | Value |\n|---|---|\n");
    let _ = writeln!(out, "| Total steps | {} |", summary.total_steps);
    let _ = writeln!(out, "| Completed | {} |", summary.completed_steps);
    let _ = writeln!(out, "| Failed | {} |", summary.failed_steps);
    let _ = writeln!(out, "| Human interactions | {} |", summary.hitl_interactions);
    let rate = if summary.total_steps == 0 {
        0.0
    } else {
        summary.completed_steps as f64 * 100.0 / summary.total_steps as f64
    };
    let _ = writeln!(out, "| Success rate | {:.1}% |\n", rate);

    out.push_str("## Steps\n\n");
    for step in &result.steps {
        let _ = writeln!(
            out,
            "### Step {}: {} ({})\n",
            step.step_id, step.capability, step.status
        );
        let _ = writeln!(out, "{}\n", step.description);
        if let Some(result) = &step.result {
            let _ = writeln!(out, "**Result:** {}\n", result);
        }
        if let Some(error) = &step.error {
            let _ = writeln!(out, "**Error:** {}\n", error);
        }
        if let Some(response) = &step.hitl_response {
            let _ = writeln!(out, "**Human response:** {}\n", response);
        }
    }

    out.push_str("## Insights\n\n");
    if result.insights.is_empty() {
        out.push_str("No insights were produced.\n\n");
    }
    for category in [
        InsightCategory::Trend,
        InsightCategory::Anomaly,
        InsightCategory::Recommendation,
    ] {
        let group: Vec<_> = result
            .insights
            .iter()
            .filter(|i| i.category == category)
            .collect();
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(out, "### {}\n", heading(category));
        for insight in group {
            let _ = writeln!(
                out,
                "- {} (importance {:.2})",
                insight.description, insight.importance
            );
        }
        out.push('\n');
    }

    out.push_str("## Conclusion\n\n");
    let _ = writeln!(
        out,
        "{} of {} steps completed successfully.",
        summary.completed_steps, summary.total_steps
    );

    out
}

fn heading(category: InsightCategory) -> &'static str {
    match category {
        InsightCategory::Trend => "Trends",
        InsightCategory::Anomaly => "Anomalies",
        InsightCategory::Recommendation => "Recommendations",
    }
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::output::fixtures::sample;

    #[test]
    fn test_report_is_byte_identical() {
        let result = sample();
        assert_eq!(render(&result), render(&result));
    }

    #[test]
    fn test_report_uses_result_timestamp() {
        let text = render(&sample());
        assert!(text.contains("2023-11-14 22:13:20 UTC"));
    }

    #[test]
    fn test_report_sections() {
        let text = render(&sample());
        assert!(text.starts_with("# Report: Analyse quarterly sales"));
        assert!(text.contains("| Success rate | 66.7% |"));
        assert!(text.contains("**Human response:** yes"));
        assert!(text.contains("**Error:** disk full"));
        assert!(text.contains("### Anomalies"));
        assert!(!text.contains("### Trends"));
        assert!(text.contains("2 of 3 steps completed successfully."));
    }
}
