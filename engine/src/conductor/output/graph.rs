//! Graph rendering
//!
//! Produces a node/edge document: `start`, one node per step in plan order,
//! `end`, and dashed annotation nodes for high-importance insights.

use sdk::outcome::{AggregatedResult, GraphDocument, GraphEdge, GraphNode};
use sdk::types::StepStatus;
use serde_json::json;
use std::collections::BTreeSet;

/// Insights above this importance get their own annotation node
const ANNOTATION_THRESHOLD: f64 = 0.7;

fn color(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Completed => "#22c55e",
        StepStatus::Failed => "#ef4444",
        StepStatus::WaitingHuman => "#f59e0b",
        StepStatus::Running => "#3b82f6",
        StepStatus::Pending => "#9ca3af",
    }
}

fn step_node_id(step_id: u32) -> String {
    format!("step_{}", step_id)
}

fn edge(source: &str, target: &str, label: &str, kind: &str) -> GraphEdge {
    GraphEdge {
        id: format!("{}->{}", source, target),
        source: source.to_string(),
        target: target.to_string(),
        label: label.to_string(),
        kind: kind.to_string(),
    }
}

pub fn render(result: &AggregatedResult) -> GraphDocument {
    let mut nodes = vec![GraphNode {
        id: "start".into(),
        label: result.metadata.request.clone(),
        kind: "start".into(),
        status: None,
        color: "#6366f1".into(),
        metadata: json!({ "intent": result.metadata.intent }),
    }];
    let mut edges = Vec::new();

    let mut previous = "start".to_string();
    for step in &result.steps {
        let id = step_node_id(step.step_id);
        nodes.push(GraphNode {
            id: id.clone(),
            label: format!("{}: {}", step.capability, step.description),
            kind: "step".into(),
            status: Some(step.status),
            color: color(step.status).into(),
            metadata: json!({
                "step_id": step.step_id,
                "capability": step.capability,
                "result": step.result,
                "error": step.error,
            }),
        });
        edges.push(edge(&previous, &id, "next", "sequential"));
        previous = id;
    }

    nodes.push(GraphNode {
        id: "end".into(),
        label: "Done".into(),
        kind: "end".into(),
        status: None,
        color: "#6366f1".into(),
        metadata: json!({
            "completed_steps": result.summary.completed_steps,
            "failed_steps": result.summary.failed_steps,
        }),
    });
    edges.push(edge(&previous, "end", "next", "sequential"));

    let annotated = result
        .insights
        .iter()
        .enumerate()
        .filter(|(_, i)| i.importance > ANNOTATION_THRESHOLD);
    for (n, insight) in annotated {
        let id = format!("insight_{}", n + 1);
        nodes.push(GraphNode {
            id: id.clone(),
            label: insight.description.clone(),
            kind: "annotation".into(),
            status: None,
            color: "#a855f7".into(),
            metadata: json!({
                "category": insight.category.as_str(),
                "importance": insight.importance,
            }),
        });
        // Edge ids must stay unique when an insight repeats a step
        let related: BTreeSet<u32> = insight.related_steps.iter().copied().collect();
        for step_id in related {
            if result.steps.iter().any(|s| s.step_id == step_id) {
                edges.push(edge(&id, &step_node_id(step_id), "annotates", "dashed"));
            }
        }
    }

    GraphDocument {
        nodes,
        edges,
        metadata: result.summary.clone(),
        summary: result.final_answer.clone(),
        insights: result.insights.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::output::fixtures::sample;

    #[test]
    fn test_graph_chain() {
        let doc = render(&sample());
        let ids: Vec<_> = doc.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["start", "step_1", "step_2", "step_3", "end", "insight_1"]
        );

        let sequential: Vec<_> = doc
            .edges
            .iter()
            .filter(|e| e.kind == "sequential")
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        assert_eq!(
            sequential,
            vec![
                ("start", "step_1"),
                ("step_1", "step_2"),
                ("step_2", "step_3"),
                ("step_3", "end")
            ]
        );
    }

    #[test]
    fn test_graph_colours_and_annotations() {
        let doc = render(&sample());
        let failed = doc.nodes.iter().find(|n| n.id == "step_3").unwrap();
        assert_eq!(failed.color, "#ef4444");
        assert_eq!(failed.status, Some(StepStatus::Failed));

        let dashed: Vec<_> = doc.edges.iter().filter(|e| e.kind == "dashed").collect();
        assert_eq!(dashed.len(), 1);
        assert_eq!(dashed[0].source, "insight_1");
        assert_eq!(dashed[0].target, "step_1");
    }

    #[test]
    fn test_repeated_related_steps_give_one_edge() {
        let mut result = sample();
        result.insights[0].related_steps = vec![2, 1, 2, 1];
        let doc = render(&result);

        let mut ids: Vec<_> = doc.edges.iter().map(|e| e.id.as_str()).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);

        let dashed: Vec<_> = doc
            .edges
            .iter()
            .filter(|e| e.kind == "dashed")
            .map(|e| e.target.as_str())
            .collect();
        assert_eq!(dashed, vec!["step_1", "step_2"]);
    }

    #[test]
    fn test_graph_serializes_type_field() {
        let value = serde_json::to_value(render(&sample())).unwrap();
        assert_eq!(value["nodes"][0]["type"], "start");
        assert_eq!(value["metadata"]["total_steps"], 3);
    }
}
