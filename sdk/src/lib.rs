//! Waypoint SDK
//!
//! Shared library providing the data model, error taxonomy and traits used by
//! the engine, the worker capabilities and the transport surfaces.

/// Worker capability trait
pub mod capability;

/// Error types and handling
pub mod errors;

/// Execution events
pub mod events;

/// Session handle used by transports
pub mod handle;

/// Aggregated results and rendered outputs
pub mod outcome;

/// Session, plan and checkpoint types
pub mod types;

// Re-export commonly used types
pub use capability::{Capability, PriorResult, StepInput};
pub use errors::{EngineError, EngineErrorExt};
pub use events::ExecutionEvent;
pub use handle::{SessionHandle, SessionHandleImpl, TurnOutcome, TurnRequest};
pub use outcome::{
    AggregatedResult, ExecutionSummary, GraphDocument, GraphEdge, GraphNode, Insight,
    InsightCategory, OutputFormat, RenderedContent, RenderedOutput, ResultMetadata, StepOutcome,
};
pub use types::{
    Checkpoint, CheckpointInfo, HistoryEntry, HistoryPage, HitlResponse, InterruptToken, Plan,
    ResumeInput, Role, Session, SessionFilter, SessionState, SessionStatus, Step, StepStatus,
    DEFAULT_HISTORY_LIMIT, ERROR_REPORT, HUMAN_APPROVAL, MAX_HISTORY_LIMIT, SCHEMA_VERSION,
};
