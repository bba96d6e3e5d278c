//! HITL Gate
//!
//! Parks a human-approval step behind a single-use [`InterruptToken`] and
//! applies the answer when it arrives. A session holds at most one
//! outstanding token; the token is cleared before the step is completed, so
//! an answer can never be applied to a second step.
//!
//! Both functions mutate the in-memory state only. The caller writes the
//! checkpoint afterwards.

use sdk::errors::EngineError;
use sdk::types::{
    HitlResponse, InterruptToken, ResumeInput, SessionState, SessionStatus, StepStatus,
};
use tracing::info;

/// Park the step under the cursor and issue its token
pub fn suspend(state: &mut SessionState) -> Result<InterruptToken, EngineError> {
    if state.pending_interrupt.is_some() {
        return Err(EngineError::InvalidState(format!(
            "session {} already has an outstanding interrupt",
            state.session.session_id
        )));
    }

    let step_index = state.cursor;
    let session_id = state.session.session_id.clone();
    let step = state
        .plan
        .as_mut()
        .and_then(|plan| plan.steps.get_mut(step_index))
        .ok_or_else(|| {
            EngineError::InvalidState(format!("no step at cursor {} to suspend", step_index))
        })?;

    if !step.is_human_approval() {
        return Err(EngineError::InvalidState(format!(
            "step {} is not a {} step",
            step.step_id,
            sdk::types::HUMAN_APPROVAL
        )));
    }

    let question = step
        .hitl_question
        .clone()
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| {
            EngineError::InvalidState(format!("step {} has no question", step.step_id))
        })?;

    step.transition(StepStatus::WaitingHuman)?;

    let token = InterruptToken {
        token: uuid::Uuid::new_v4().to_string(),
        session_id,
        step_index,
        step_id: step.step_id,
        question,
        issued_at: chrono::Utc::now().timestamp(),
    };

    state.pending_interrupt = Some(token.clone());
    state.session.status = SessionStatus::WaitingHuman;

    info!(
        "Session {} suspended at step {}",
        state.session.session_id, token.step_id
    );
    Ok(token)
}

/// Consume the outstanding token and complete the parked step
///
/// `token = None` uses the outstanding token. A mismatched token, a session
/// that is not waiting, or a token that was already consumed all fail with
/// `StaleToken`.
pub fn resume(
    state: &mut SessionState,
    token: Option<&str>,
    input: ResumeInput,
) -> Result<InterruptToken, EngineError> {
    let session_id = state.session.session_id.clone();

    if state.session.status != SessionStatus::WaitingHuman {
        return Err(EngineError::StaleToken(format!(
            "session {} is {}, not waiting for input",
            session_id, state.session.status
        )));
    }

    let outstanding = state
        .pending_interrupt
        .as_ref()
        .ok_or_else(|| EngineError::StaleToken(format!("session {} has no outstanding token", session_id)))?;

    if let Some(token) = token {
        if token != outstanding.token {
            return Err(EngineError::StaleToken(format!(
                "token does not match the outstanding interrupt of session {}",
                session_id
            )));
        }
    }

    // Single use: the token is gone before the step changes
    let consumed = state
        .pending_interrupt
        .take()
        .ok_or_else(|| EngineError::StaleToken(session_id.clone()))?;

    let step = state
        .plan
        .as_mut()
        .and_then(|plan| plan.steps.get_mut(consumed.step_index))
        .ok_or_else(|| {
            EngineError::InvalidState(format!(
                "interrupt points at missing step index {}",
                consumed.step_index
            ))
        })?;

    let response = match input {
        ResumeInput::Approve => HitlResponse::AutoApproved,
        ResumeInput::Respond(text) => HitlResponse::Text(text),
    };

    step.transition(StepStatus::Completed)?;
    step.result = Some(format!("{} -> {}", consumed.question, response));
    step.hitl_response = Some(response);

    state.cursor = consumed.step_index + 1;
    state.session.status = SessionStatus::Active;

    info!(
        "Session {} resumed past step {}",
        session_id, consumed.step_id
    );
    Ok(consumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::{Plan, Session, Step};

    fn parked_state() -> SessionState {
        let mut state = SessionState::new(Session {
            session_id: "s1".into(),
            owner: "alice".into(),
            created_at: 0,
            updated_at: 0,
            status: SessionStatus::Active,
        });
        let mut search = Step::new(1, "search", "find data");
        search.status = StepStatus::Completed;
        state.plan = Some(Plan {
            request: "r".into(),
            intent: "i".into(),
            steps: vec![
                search,
                Step::approval(2, "confirm", "confirm?"),
                Step::new(3, "document", "write"),
            ],
            degraded: false,
        });
        state.cursor = 1;
        state
    }

    #[test]
    fn test_suspend_issues_single_token() {
        let mut state = parked_state();
        let token = suspend(&mut state).unwrap();

        assert_eq!(token.step_id, 2);
        assert_eq!(token.step_index, 1);
        assert_eq!(token.question, "confirm?");
        assert_eq!(state.session.status, SessionStatus::WaitingHuman);
        assert_eq!(
            state.plan.as_ref().unwrap().steps[1].status,
            StepStatus::WaitingHuman
        );

        assert!(matches!(
            suspend(&mut state),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn test_suspend_refuses_worker_step() {
        let mut state = parked_state();
        state.cursor = 2;
        assert!(suspend(&mut state).is_err());
        assert!(state.pending_interrupt.is_none());
    }

    #[test]
    fn test_resume_consumes_token_once() {
        let mut state = parked_state();
        let token = suspend(&mut state).unwrap();

        resume(&mut state, Some(&token.token), ResumeInput::Approve).unwrap();
        assert_eq!(state.cursor, 2);
        assert_eq!(state.session.status, SessionStatus::Active);
        assert!(state.pending_interrupt.is_none());

        let again = resume(&mut state, Some(&token.token), ResumeInput::Approve);
        assert!(matches!(again, Err(EngineError::StaleToken(_))));
        assert_eq!(state.cursor, 2);
    }

    #[test]
    fn test_resume_rejects_mismatched_token() {
        let mut state = parked_state();
        suspend(&mut state).unwrap();

        let err = resume(&mut state, Some("forged"), ResumeInput::Approve).unwrap_err();
        assert!(matches!(err, EngineError::StaleToken(_)));
        assert!(state.pending_interrupt.is_some());
        assert_eq!(state.session.status, SessionStatus::WaitingHuman);
    }

    #[test]
    fn test_auto_approve_and_text_are_distinct() {
        let mut approved = parked_state();
        suspend(&mut approved).unwrap();
        resume(&mut approved, None, ResumeInput::Approve).unwrap();

        let mut answered = parked_state();
        suspend(&mut answered).unwrap();
        resume(&mut answered, None, ResumeInput::Respond("yes".into())).unwrap();

        let a = &approved.plan.as_ref().unwrap().steps[1];
        let b = &answered.plan.as_ref().unwrap().steps[1];
        assert_eq!(a.status, StepStatus::Completed);
        assert_eq!(b.status, StepStatus::Completed);
        assert_eq!(a.hitl_response, Some(HitlResponse::AutoApproved));
        assert_eq!(b.hitl_response, Some(HitlResponse::Text("yes".into())));
        assert_ne!(a.hitl_response, b.hitl_response);
    }
}
