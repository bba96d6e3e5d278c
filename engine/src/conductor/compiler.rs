//! Plan Compiler
//!
//! Turns a user request into a validated [`Plan`] in two LLM calls: intent
//! classification, then decomposition into capability steps. Every failure
//! degrades to a single `error-report` step, so callers always get a plan.

use crate::conductor::capabilities::CapabilityRegistry;
use crate::llm::{extract_json, LLMProvider, Message};
use sdk::errors::EngineError;
use sdk::types::{HistoryEntry, Plan, Role, Step, ERROR_REPORT, HUMAN_APPROVAL};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many history entries are replayed to the compiler as context
const HISTORY_CONTEXT: usize = 6;

const INTENT_CATEGORIES: [&str; 5] = [
    "simple_search",
    "data_analysis",
    "multi_step_task",
    "document_generation",
    "comparison",
];

/// Classified user intent
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Intent {
    pub category: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub complexity: String,
}

impl Intent {
    /// Short form stored on the plan
    pub fn summary(&self) -> String {
        if self.subject.is_empty() {
            self.category.clone()
        } else {
            format!("{}: {}", self.category, self.subject)
        }
    }
}

/// Step as produced by the LLM or read from a plan file
#[derive(Debug, Clone, Deserialize)]
pub struct RawStep {
    #[serde(default)]
    pub step_id: Option<u32>,
    #[serde(alias = "agent")]
    pub capability: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hitl_question: Option<String>,
}

/// Decomposition output: a bare list or `{"steps": [...]}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPlan {
    Steps(Vec<RawStep>),
    Wrapped { steps: Vec<RawStep> },
}

impl RawPlan {
    fn into_steps(self) -> Vec<RawStep> {
        match self {
            RawPlan::Steps(steps) | RawPlan::Wrapped { steps } => steps,
        }
    }
}

pub struct PlanCompiler {
    llm: Option<Arc<dyn LLMProvider>>,
    capabilities: Arc<CapabilityRegistry>,
    max_steps: usize,
}

impl PlanCompiler {
    pub fn new(
        llm: Option<Arc<dyn LLMProvider>>,
        capabilities: Arc<CapabilityRegistry>,
        max_steps: usize,
    ) -> Self {
        Self {
            llm,
            capabilities,
            max_steps,
        }
    }

    /// Compile a request into a plan, degrading instead of failing
    pub async fn compile(&self, request: &str, history: &[HistoryEntry]) -> Plan {
        match self.try_compile(request, history).await {
            Ok(plan) => {
                info!("Compiled plan with {} steps", plan.len());
                debug!("Plan outline:\n{}", plan.outline());
                plan
            }
            Err(e) => {
                warn!("Plan compilation failed, using degraded plan: {}", e);
                Self::degraded(request, &e.to_string())
            }
        }
    }

    /// Validate an explicit step list (e.g. from a plan file), degrading on error
    pub fn compile_explicit(&self, request: &str, raw_json: &str) -> Plan {
        let result = serde_json::from_str::<RawPlan>(raw_json)
            .map_err(|e| EngineError::Compiler(format!("invalid plan file: {}", e)))
            .and_then(|raw| self.compile_steps(request, "explicit plan", raw.into_steps()));

        match result {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Explicit plan rejected, using degraded plan: {}", e);
                Self::degraded(request, &e.to_string())
            }
        }
    }

    async fn try_compile(&self, request: &str, history: &[HistoryEntry]) -> Result<Plan, EngineError> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| EngineError::Compiler("no LLM provider configured".to_string()))?;

        let intent = self.understand_intent(llm.as_ref(), request, history).await?;
        info!("Intent classified as {}", intent.category);

        let raw_steps = self.decompose(llm.as_ref(), request, &intent).await?;
        self.compile_steps(request, &intent.summary(), raw_steps)
    }

    async fn understand_intent(
        &self,
        llm: &dyn LLMProvider,
        request: &str,
        history: &[HistoryEntry],
    ) -> Result<Intent, EngineError> {
        let system = Message::system(format!(
            "You classify user requests for a multi-step assistant.\n\
            Output ONLY a JSON object with:\n\
            - \"category\": one of {}\n\
            - \"subject\": what the request is about\n\
            - \"expected_output\": what the user wants to receive\n\
            - \"complexity\": \"simple\", \"medium\" or \"complex\"",
            INTENT_CATEGORIES.join(", ")
        ));

        let mut messages = vec![system];
        let start = history.len().saturating_sub(HISTORY_CONTEXT);
        for entry in &history[start..] {
            messages.push(match entry.role {
                Role::User => Message::user(&entry.content),
                Role::Assistant => Message::assistant(&entry.content),
                Role::System => Message::system(&entry.content),
            });
        }
        messages.push(Message::user(request));

        let content = llm.generate(&messages).await?;
        let json = extract_json(&content)
            .ok_or_else(|| EngineError::Compiler("intent response contained no JSON".to_string()))?;

        let mut intent: Intent = serde_json::from_str(json)
            .map_err(|e| EngineError::Compiler(format!("malformed intent: {}", e)))?;

        intent.category = intent.category.trim().to_ascii_lowercase();
        if !INTENT_CATEGORIES.contains(&intent.category.as_str()) {
            return Err(EngineError::Compiler(format!(
                "unknown intent category '{}'",
                intent.category
            )));
        }

        Ok(intent)
    }

    async fn decompose(
        &self,
        llm: &dyn LLMProvider,
        request: &str,
        intent: &Intent,
    ) -> Result<Vec<RawStep>, EngineError> {
        let system = Message::system(format!(
            "You are a planning agent. Break the request into sequential steps.\n\n\
            Available capabilities:\n{}\n\n\
            Rules:\n\
            1. A capability may be used several times.\n\
            2. Put {} steps before important decisions and include a \"hitl_question\".\n\
            3. Every step needs a clear \"description\".\n\
            4. Use at most {} steps.\n\n\
            Output ONLY a JSON array such as:\n\
            [{{\"step_id\":1,\"capability\":\"search\",\"description\":\"Find last quarter's sales\"}},\
            {{\"step_id\":2,\"capability\":\"{}\",\"description\":\"Confirm the data\",\"hitl_question\":\"Is this the right data?\"}},\
            {{\"step_id\":3,\"capability\":\"document\",\"description\":\"Write the summary\"}}]",
            self.capabilities.describe(),
            HUMAN_APPROVAL,
            self.max_steps,
            HUMAN_APPROVAL,
        ));

        let user = Message::user(format!(
            "Request: {}\nIntent: {} (subject: {}, expected output: {}, complexity: {})",
            request,
            intent.category,
            intent.subject,
            intent.expected_output,
            intent.complexity
        ));

        let content = llm.generate(&[system, user]).await?;
        let json = extract_json(&content)
            .ok_or_else(|| EngineError::Compiler("plan response contained no JSON".to_string()))?;

        let raw: RawPlan = serde_json::from_str(json)
            .map_err(|e| EngineError::Compiler(format!("malformed plan: {}", e)))?;

        Ok(raw.into_steps())
    }

    /// Validate raw steps and build the plan
    ///
    /// Capabilities are normalised (`hitl` is read as `human-approval`),
    /// steps keep their listed order and are renumbered 1..N.
    pub fn compile_steps(
        &self,
        request: &str,
        intent: &str,
        raw_steps: Vec<RawStep>,
    ) -> Result<Plan, EngineError> {
        if raw_steps.is_empty() {
            return Err(EngineError::Compiler("plan has no steps".to_string()));
        }
        if raw_steps.len() > self.max_steps {
            return Err(EngineError::Compiler(format!(
                "plan has {} steps, the limit is {}",
                raw_steps.len(),
                self.max_steps
            )));
        }

        let mut steps = Vec::with_capacity(raw_steps.len());
        for (index, raw) in raw_steps.into_iter().enumerate() {
            let step_id = (index + 1) as u32;
            let mut capability = raw.capability.trim().to_ascii_lowercase();
            if capability == "hitl" {
                capability = HUMAN_APPROVAL.to_string();
            }

            if !self.capabilities.knows(&capability) {
                return Err(EngineError::Compiler(format!(
                    "step {} uses unknown capability '{}'",
                    step_id, capability
                )));
            }

            let description = match raw.description.trim() {
                "" => format!("Run {}", capability),
                text => text.to_string(),
            };

            if capability == HUMAN_APPROVAL {
                let question = raw
                    .hitl_question
                    .as_deref()
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .ok_or_else(|| {
                        EngineError::Compiler(format!(
                            "approval step {} has no hitl_question",
                            step_id
                        ))
                    })?;
                steps.push(Step::approval(step_id, description, question));
            } else {
                steps.push(Step::new(step_id, capability, description));
            }
        }

        Ok(Plan {
            request: request.to_string(),
            intent: intent.to_string(),
            steps,
            degraded: false,
        })
    }

    /// Single-step plan reporting a compilation failure
    pub fn degraded(request: &str, reason: &str) -> Plan {
        Plan {
            request: request.to_string(),
            intent: "unknown".to_string(),
            steps: vec![Step::new(1, ERROR_REPORT, format!("Reason: {}", reason))],
            degraded: true,
        }
    }
}
