//! Session, plan and checkpoint types
//!
//! These are the versioned records persisted in every checkpoint. Fields are
//! fixed; new ones are added together with a bump of [`SCHEMA_VERSION`] and a
//! migration in the engine's checkpoint decoder.

use crate::errors::EngineError;
use crate::outcome::{AggregatedResult, OutputFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved capability name for steps that wait for a human answer
pub const HUMAN_APPROVAL: &str = "human-approval";

/// Capability used by degraded plans
pub const ERROR_REPORT: &str = "error-report";

/// Current snapshot schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    WaitingHuman,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::WaitingHuman => "waiting_human",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// Completed and failed sessions only change when a new turn starts
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "waiting_human" => Ok(SessionStatus::WaitingHuman),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(EngineError::InvalidState(format!(
                "unknown session status '{}'",
                other
            ))),
        }
    }
}

/// Session record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub owner: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub status: SessionStatus,
}

/// Status of a single plan step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    WaitingHuman,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::WaitingHuman => "waiting_human",
        }
    }

    /// Allowed moves: pending -> running -> {completed | failed},
    /// pending -> waiting_human -> completed. Completed and failed are final.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Pending, StepStatus::WaitingHuman)
                | (StepStatus::Running, StepStatus::Completed)
                | (StepStatus::Running, StepStatus::Failed)
                | (StepStatus::WaitingHuman, StepStatus::Completed)
        )
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer recorded on a human-approval step
///
/// Auto-approval and free text are kept apart; an empty string is never
/// read as approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum HitlResponse {
    AutoApproved,
    Text(String),
}

impl fmt::Display for HitlResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HitlResponse::AutoApproved => f.write_str("[auto-approved]"),
            HitlResponse::Text(text) => f.write_str(text),
        }
    }
}

/// One unit of work bound to a named capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// 1-based position in the plan
    pub step_id: u32,
    pub capability: String,
    pub status: StepStatus,
    pub description: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub hitl_question: Option<String>,
    #[serde(default)]
    pub hitl_response: Option<HitlResponse>,
}

impl Step {
    pub fn new(step_id: u32, capability: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step_id,
            capability: capability.into(),
            status: StepStatus::Pending,
            description: description.into(),
            result: None,
            error: None,
            hitl_question: None,
            hitl_response: None,
        }
    }

    /// Create a human-approval step with its question
    pub fn approval(step_id: u32, description: impl Into<String>, question: impl Into<String>) -> Self {
        let mut step = Self::new(step_id, HUMAN_APPROVAL, description);
        step.hitl_question = Some(question.into());
        step
    }

    pub fn is_human_approval(&self) -> bool {
        self.capability == HUMAN_APPROVAL
    }

    /// Move the step to `next`, refusing any non-monotonic transition
    pub fn transition(&mut self, next: StepStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidState(format!(
                "step {} cannot move from {} to {}",
                self.step_id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// Ordered list of steps compiled from one user request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub request: String,
    pub intent: String,
    pub steps: Vec<Step>,
    /// True when compilation failed and the plan is a single error-report step
    #[serde(default)]
    pub degraded: bool,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// One line per step, used in history and logs
    pub fn outline(&self) -> String {
        self.steps
            .iter()
            .map(|s| format!("Step {}: [{}] {}", s.step_id, s.capability, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Handle for a step parked in `waiting_human`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterruptToken {
    pub token: String,
    pub session_id: String,
    /// Index into the plan (equals the cursor while parked)
    pub step_index: usize,
    pub step_id: u32,
    pub question: String,
    pub issued_at: i64,
}

/// The two ways a parked step can be resumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeInput {
    Approve,
    Respond(String),
}

impl ResumeInput {
    /// Build from the REST shape `{approve, response?}`
    ///
    /// Exactly one of `approve=true` or a non-empty `response` is accepted.
    pub fn from_request(approve: bool, response: Option<String>) -> Result<Self, EngineError> {
        let response = response.filter(|r| !r.trim().is_empty());
        match (approve, response) {
            (true, None) => Ok(ResumeInput::Approve),
            (false, Some(text)) => Ok(ResumeInput::Respond(text)),
            (true, Some(_)) => Err(EngineError::InvalidResume(
                "approve and response are mutually exclusive".to_string(),
            )),
            (false, None) => Err(EngineError::InvalidResume(
                "either approve must be true or a non-empty response provided".to_string(),
            )),
        }
    }
}

/// Speaker of a history entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One message in a session's conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Everything a checkpoint captures about a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub schema_version: u32,
    pub session: Session,
    #[serde(default)]
    pub plan: Option<Plan>,
    /// Index of the next step to execute, `0 <= cursor <= plan.len()`
    #[serde(default)]
    pub cursor: usize,
    #[serde(default)]
    pub pending_interrupt: Option<InterruptToken>,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub aggregated: Option<AggregatedResult>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl SessionState {
    pub fn new(session: Session) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            session,
            plan: None,
            cursor: 0,
            pending_interrupt: None,
            output_format: OutputFormat::default(),
            aggregated: None,
            history: Vec::new(),
        }
    }

    /// True when every step of the plan has been passed
    pub fn cursor_exhausted(&self) -> bool {
        match &self.plan {
            Some(plan) => self.cursor >= plan.len(),
            None => true,
        }
    }
}

/// Immutable snapshot of a session, tagged with a per-session sequence number
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub session_id: String,
    pub sequence: u64,
    pub created_at: i64,
    pub state: SessionState,
}

/// Listing row for a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointInfo {
    pub session_id: String,
    pub sequence: u64,
    pub created_at: i64,
    pub status: SessionStatus,
    pub cursor: usize,
}

impl From<&Checkpoint> for CheckpointInfo {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            session_id: cp.session_id.clone(),
            sequence: cp.sequence,
            created_at: cp.created_at,
            status: cp.state.session.status,
            cursor: cp.state.cursor,
        }
    }
}

/// Filter for session listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    pub owner: Option<String>,
    pub status: Option<SessionStatus>,
}

impl SessionFilter {
    pub fn matches(&self, session: &Session) -> bool {
        self.owner.as_deref().map_or(true, |o| o == session.owner)
            && self.status.map_or(true, |s| s == session.status)
    }
}

/// History entries returned when no limit is given
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Largest history page a caller may request
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Tail of a session's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub session_id: String,
    pub total_messages: usize,
    pub returned_messages: usize,
    pub messages: Vec<HistoryEntry>,
}
