//! Postgres-backed [`Repository`].

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::DbError;
use crate::models::{ExecutionRow, HistoryRow, WorkflowRow};
use crate::repository::{executions, history, workflows, Repository};

/// Type alias for the shared Postgres pool used across the whole application.
pub type DbPool = PgPool;

#[derive(Clone)]
pub struct PgRepository {
    pool: DbPool,
}

impl PgRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with at most `max_connections` pooled
    /// connections.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, DbError> {
        info!("Connecting to database (max_connections={})", max_connections);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded migrations from `./migrations` at the workspace root.
    pub async fn migrate(&self) -> Result<(), DbError> {
        info!("Running database migrations");
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn store_workflow(&self, row: WorkflowRow) -> Result<WorkflowRow, DbError> {
        let mut tx = self.pool.begin().await?;

        let stored = match workflows::insert_workflow_if_absent(&mut *tx, &row).await? {
            Some(inserted) => inserted,
            None => workflows::find_workflow_by_name(&mut *tx, &row.name)
                .await?
                .ok_or(DbError::NotFound)?,
        };

        tx.commit().await?;
        Ok(stored)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowRow>, DbError> {
        workflows::get_workflow(&self.pool, id).await
    }

    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<WorkflowRow>, DbError> {
        workflows::find_workflow_by_name(&self.pool, name).await
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        if executions::workflow_has_executions(&mut *tx, id).await? {
            tx.rollback().await?;
            return Err(DbError::InUse(format!("workflow {id} has executions")));
        }
        workflows::delete_workflow(&mut *tx, id).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_execution(&self, row: &ExecutionRow) -> Result<(), DbError> {
        executions::insert_execution(&self.pool, row).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRow>, DbError> {
        executions::get_execution(&self.pool, id).await
    }

    async fn commit_step(
        &self,
        execution: &ExecutionRow,
        expected_version: i64,
        history_row: Option<&HistoryRow>,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        executions::update_execution(&mut *tx, execution, expected_version).await?;
        if let Some(row) = history_row {
            history::insert_history(&mut *tx, row).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_history(&self, execution_id: Uuid) -> Result<Vec<HistoryRow>, DbError> {
        history::list_history(&self.pool, execution_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    /// A migrated repository, or `None` when `DATABASE_URL` is not set.
    async fn repository() -> Option<PgRepository> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let repo = PgRepository::connect(&url, 2).await.unwrap();
        repo.migrate().await.unwrap();
        Some(repo)
    }

    fn workflow() -> WorkflowRow {
        let id = Uuid::new_v4();
        WorkflowRow {
            id,
            name: format!("wf-{id}"),
            definition: json!({ "controls": [] }),
            created_at: Utc::now(),
        }
    }

    fn execution(workflow_id: Uuid) -> ExecutionRow {
        let now = Utc::now();
        ExecutionRow {
            id: Uuid::new_v4(),
            workflow_id,
            status: "running".into(),
            current_control: 0,
            global_variables: json!({}),
            local_variables: json!({}),
            loop_frames: json!([]),
            next_step: 0,
            failure: None,
            version: 0,
            started_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn referenced_workflow_delete_reports_in_use_from_the_constraint() {
        let Some(repo) = repository().await else {
            eprintln!("DATABASE_URL not set, skipping");
            return;
        };
        let wf = repo.store_workflow(workflow()).await.unwrap();
        repo.create_execution(&execution(wf.id)).await.unwrap();

        // Straight to the DELETE, as if the execution arrived after the
        // existence check.
        let err = workflows::delete_workflow(repo.pool(), wf.id).await.unwrap_err();

        assert!(matches!(err, DbError::InUse(_)));
        assert!(repo.get_workflow(wf.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unreferenced_workflow_is_deleted() {
        let Some(repo) = repository().await else {
            eprintln!("DATABASE_URL not set, skipping");
            return;
        };
        let wf = repo.store_workflow(workflow()).await.unwrap();

        repo.delete_workflow(wf.id).await.unwrap();

        assert!(repo.get_workflow(wf.id).await.unwrap().is_none());
        assert!(matches!(repo.delete_workflow(wf.id).await, Err(DbError::NotFound)));
    }
}
