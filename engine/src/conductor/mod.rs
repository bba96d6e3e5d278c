//! Conductor System
//!
//! Compiles requests into plans, dispatches them step by step, parks at
//! human-approval steps and folds finished plans into a rendered result.

pub mod aggregator;
pub mod capabilities;
pub mod compiler;
pub mod context;
pub mod dispatcher;
pub mod hitl;
pub mod output;

pub use aggregator::Aggregator;
pub use capabilities::CapabilityRegistry;
pub use compiler::PlanCompiler;
pub use context::ExecutionContext;
pub use dispatcher::{Dispatcher, NextAction};
