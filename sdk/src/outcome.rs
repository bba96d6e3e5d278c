//! Aggregated results and rendered outputs

use crate::types::{HitlResponse, StepStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Counts over a finished plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub hitl_interactions: usize,
}

/// Per-step entry of an aggregated result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepOutcome {
    pub step_id: u32,
    pub capability: String,
    pub description: String,
    pub status: StepStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub hitl_response: Option<HitlResponse>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InsightCategory {
    Trend,
    Anomaly,
    Recommendation,
}

impl InsightCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightCategory::Trend => "trend",
            InsightCategory::Anomaly => "anomaly",
            InsightCategory::Recommendation => "recommendation",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insight {
    pub category: InsightCategory,
    pub description: String,
    /// Ranking key in `[0, 1]`
    pub importance: f64,
    pub related_steps: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultMetadata {
    pub request: String,
    pub intent: String,
    /// Unix seconds, captured once when the result was built
    pub generated_at: i64,
}

/// Structured summary of a fully executed plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedResult {
    pub summary: ExecutionSummary,
    pub steps: Vec<StepOutcome>,
    /// Ranked by importance, descending; ties keep step order
    pub insights: Vec<Insight>,
    pub final_answer: String,
    pub metadata: ResultMetadata,
}

/// Presentation generator selected by the output router
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Chat,
    Graph,
    Report,
}

impl OutputFormat {
    /// Unknown or missing formats fall back to chat
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("graph") => OutputFormat::Graph,
            Some("report") => OutputFormat::Report,
            _ => OutputFormat::Chat,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Chat => "chat",
            OutputFormat::Graph => "graph",
            OutputFormat::Report => "report",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
    pub color: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Node/edge document consumed by graph front-ends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphDocument {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metadata: ExecutionSummary,
    pub summary: String,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RenderedContent {
    Text(String),
    Graph(GraphDocument),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderedOutput {
    pub format: OutputFormat,
    pub content: RenderedContent,
}

impl RenderedOutput {
    /// Text form of the output; graphs are pretty-printed JSON
    pub fn to_text(&self) -> String {
        match &self.content {
            RenderedContent::Text(text) => text.clone(),
            RenderedContent::Graph(graph) => {
                serde_json::to_string_pretty(graph).unwrap_or_else(|_| "{}".to_string())
            }
        }
    }
}
