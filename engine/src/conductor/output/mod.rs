//! Output Router
//!
//! Picks a renderer for an [`AggregatedResult`]. Every renderer is a pure
//! function of the result, so repeated renders of the same session yield
//! identical content.

pub mod chat;
pub mod graph;
pub mod report;

use sdk::outcome::{AggregatedResult, OutputFormat, RenderedContent, RenderedOutput};
use sdk::types::StepStatus;

pub fn render(result: &AggregatedResult, format: OutputFormat) -> RenderedOutput {
    let content = match format {
        OutputFormat::Chat => RenderedContent::Text(chat::render(result)),
        OutputFormat::Graph => RenderedContent::Graph(graph::render(result)),
        OutputFormat::Report => RenderedContent::Text(report::render(result)),
    };
    RenderedOutput { format, content }
}

/// Text marker for a step status, shared by the text renderers
pub(crate) fn status_marker(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Completed => "[ok]",
        StepStatus::Failed => "[failed]",
        StepStatus::WaitingHuman => "[waiting]",
        StepStatus::Running => "[running]",
        StepStatus::Pending => "[pending]",
    }
}
