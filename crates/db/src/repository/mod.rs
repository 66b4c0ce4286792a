//! Persistence functions and the [`Repository`] trait.
//!
//! `workflows`, `executions` and `history` hold one function per SQL
//! statement; every function takes any Postgres executor (pool or open
//! transaction) and returns a `Result<T, DbError>`. [`Repository`] is the
//! boundary the engine persists through: each method is one atomic unit.

use async_trait::async_trait;
use uuid::Uuid;

use crate::DbError;
use crate::models::{ExecutionRow, HistoryRow, WorkflowRow};

pub mod workflows;
pub mod executions;
pub mod history;
pub mod postgres;
pub mod memory;

/// Load/save access to workflows, executions and their history.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert `row` unless a workflow with the same name already exists.
    ///
    /// Returns the stored row: the new one, or the existing one untouched.
    async fn store_workflow(&self, row: WorkflowRow) -> Result<WorkflowRow, DbError>;

    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowRow>, DbError>;

    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<WorkflowRow>, DbError>;

    /// Delete a workflow.
    ///
    /// Fails with [`DbError::InUse`] while any execution references it and
    /// with [`DbError::NotFound`] if it does not exist.
    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError>;

    async fn create_execution(&self, row: &ExecutionRow) -> Result<(), DbError>;

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRow>, DbError>;

    /// Persist one engine step: the updated execution and, optionally, the
    /// history row it produced, in a single transaction.
    ///
    /// The stored execution must still carry `expected_version`, otherwise
    /// nothing is written and [`DbError::Conflict`] is returned.
    async fn commit_step(
        &self,
        execution: &ExecutionRow,
        expected_version: i64,
        history: Option<&HistoryRow>,
    ) -> Result<(), DbError>;

    /// History rows of an execution ordered by step number.
    async fn list_history(&self, execution_id: Uuid) -> Result<Vec<HistoryRow>, DbError>;
}
