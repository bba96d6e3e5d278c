//! Execution events streamed to session subscribers

use crate::outcome::{ExecutionSummary, RenderedOutput};
use crate::types::{SessionStatus, StepStatus};
use serde::{Deserialize, Serialize};

/// Ordered events emitted while a session executes
///
/// Serialized as `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Connected {
        message: String,
    },
    ExecutionStarted {
        total_steps: usize,
        cursor: usize,
    },
    StepStarted {
        step_id: u32,
        capability: String,
        description: String,
    },
    StepCompleted {
        step_id: u32,
        capability: String,
        status: StepStatus,
        result: Option<String>,
        error: Option<String>,
    },
    HitlWaiting {
        step_id: u32,
        question: String,
        token: String,
    },
    FinalResult {
        summary: ExecutionSummary,
        output: RenderedOutput,
    },
    ExecutionCompleted {
        status: SessionStatus,
    },
    Error {
        error: String,
        hint: String,
    },
}

impl ExecutionEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionEvent::Connected { .. } => "connected",
            ExecutionEvent::ExecutionStarted { .. } => "execution_started",
            ExecutionEvent::StepStarted { .. } => "step_started",
            ExecutionEvent::StepCompleted { .. } => "step_completed",
            ExecutionEvent::HitlWaiting { .. } => "hitl_waiting",
            ExecutionEvent::FinalResult { .. } => "final_result",
            ExecutionEvent::ExecutionCompleted { .. } => "execution_completed",
            ExecutionEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = ExecutionEvent::HitlWaiting {
            step_id: 2,
            question: "confirm?".to_string(),
            token: "tok".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "hitl_waiting");
        assert_eq!(value["data"]["question"], "confirm?");
        assert_eq!(event.name(), "hitl_waiting");
    }
}
