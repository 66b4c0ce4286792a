//! `engine` crate: domain models, control tree compilation, variable
//! scopes, expression evaluation and the execution state machine.

pub mod models;
pub mod error;
pub mod variables;
pub mod tree;
pub mod expression;
pub mod history;
pub mod clock;
pub mod config;
pub mod locks;
pub mod executor;
pub mod runtime;

pub use models::{ControlDefinition, Execution, History, LoopFrame, Workflow, WorkflowDefinition};
pub use error::EngineError;
pub use variables::{Scope, ScopeKind, Variables};
pub use tree::{CompiledWorkflow, ControlKind, ControlTree};
pub use config::{EngineConfig, LocalScopePolicy, ResponseMerge};
pub use executor::{StepOutcome, WorkflowExecutor};
pub use runtime::WorkflowEngine;
pub use db::models::ExecutionStatus;
pub use invoker::{Payload, Service};
