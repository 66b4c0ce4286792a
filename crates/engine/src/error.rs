//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use db::models::ExecutionStatus;

/// Errors produced by the workflow engine (definition checks, lookups and
/// stepping).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Lookup misses ------

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    // ------ Definition errors ------

    /// A control carries a `type` discriminator the engine does not know.
    #[error("unknown control kind '{kind}' at {path}")]
    InvalidControlKind { kind: String, path: String },

    /// An `if` or `loop` control has no expression.
    #[error("{kind} control at {path} has no expression")]
    MissingExpression { kind: &'static str, path: String },

    /// A control references a service the workflow does not define.
    #[error("control at {path} references unknown service '{service}'")]
    UnknownService { service: String, path: String },

    #[error("service '{0}' is defined more than once")]
    DuplicateService(String),

    /// A variable scope document is not a JSON object.
    #[error("invalid variable scope: {0}")]
    InvalidVariables(String),

    #[error("malformed workflow definition: {0}")]
    Definition(#[from] serde_json::Error),

    /// A persisted row could not be mapped back to the domain.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    // ------ State errors ------

    /// The operation is not allowed in the execution's current state.
    #[error("cannot {operation} execution {execution_id} in state {state}")]
    InvalidState {
        execution_id: Uuid,
        state: ExecutionStatus,
        operation: &'static str,
    },

    #[error("workflow '{0}' is still referenced by executions")]
    WorkflowInUse(String),

    // ------ Step failures (the execution is marked failed) ------

    #[error("execution {execution_id} failed at control {position}: service '{service}': {message}")]
    ServiceInvocation {
        execution_id: Uuid,
        position: usize,
        service: String,
        message: String,
    },

    #[error("execution {execution_id} failed at control {position}: expression '{expression}': {message}")]
    ExpressionEvaluation {
        execution_id: Uuid,
        position: usize,
        expression: String,
        message: String,
    },

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
