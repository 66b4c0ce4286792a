//! In-memory [`Repository`] with the same semantics as the Postgres one.
//!
//! Used by tests and by embedders that do not need durability.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::DbError;
use crate::models::{ExecutionRow, HistoryRow, WorkflowRow};
use crate::repository::Repository;

#[derive(Debug, Default)]
struct Tables {
    workflows: HashMap<Uuid, WorkflowRow>,
    executions: HashMap<Uuid, ExecutionRow>,
    history: HashMap<Uuid, Vec<HistoryRow>>,
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored workflows.
    pub fn workflow_count(&self) -> usize {
        self.tables().workflows.len()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn store_workflow(&self, row: WorkflowRow) -> Result<WorkflowRow, DbError> {
        let mut tables = self.tables();
        if let Some(existing) = tables.workflows.values().find(|w| w.name == row.name) {
            return Ok(existing.clone());
        }
        tables.workflows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowRow>, DbError> {
        Ok(self.tables().workflows.get(&id).cloned())
    }

    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<WorkflowRow>, DbError> {
        Ok(self.tables().workflows.values().find(|w| w.name == name).cloned())
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        let mut tables = self.tables();
        if tables.executions.values().any(|e| e.workflow_id == id) {
            return Err(DbError::InUse(format!("workflow {id} has executions")));
        }
        tables.workflows.remove(&id).map(|_| ()).ok_or(DbError::NotFound)
    }

    async fn create_execution(&self, row: &ExecutionRow) -> Result<(), DbError> {
        let mut tables = self.tables();
        if !tables.workflows.contains_key(&row.workflow_id) {
            return Err(DbError::NotFound);
        }
        tables.executions.insert(row.id, row.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRow>, DbError> {
        Ok(self.tables().executions.get(&id).cloned())
    }

    async fn commit_step(
        &self,
        execution: &ExecutionRow,
        expected_version: i64,
        history: Option<&HistoryRow>,
    ) -> Result<(), DbError> {
        let mut tables = self.tables();

        match tables.executions.get(&execution.id) {
            Some(stored) if stored.version == expected_version => {}
            _ => return Err(DbError::Conflict(execution.id)),
        }
        if let Some(row) = history {
            let taken = tables
                .history
                .get(&row.execution_id)
                .is_some_and(|rows| rows.iter().any(|r| r.step_number == row.step_number));
            if taken {
                return Err(DbError::Conflict(row.execution_id));
            }
        }

        tables.executions.insert(execution.id, execution.clone());
        if let Some(row) = history {
            tables.history.entry(row.execution_id).or_default().push(row.clone());
        }
        Ok(())
    }

    async fn list_history(&self, execution_id: Uuid) -> Result<Vec<HistoryRow>, DbError> {
        let mut rows = self.tables().history.get(&execution_id).cloned().unwrap_or_default();
        rows.sort_by_key(|r| r.step_number);
        Ok(rows)
    }
}
