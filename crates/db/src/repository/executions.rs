//! Execution queries.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{DbError, models::ExecutionRow};

const COLUMNS: &str = "id, workflow_id, status, current_control, global_variables, \
    local_variables, loop_frames, next_step, failure, version, started_at, updated_at";

/// Insert a freshly created execution.
pub async fn insert_execution<'e>(
    executor: impl PgExecutor<'e>,
    row: &ExecutionRow,
) -> Result<(), DbError> {
    sqlx::query(&format!(
        "INSERT INTO executions ({COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
    ))
    .bind(row.id)
    .bind(row.workflow_id)
    .bind(&row.status)
    .bind(row.current_control)
    .bind(&row.global_variables)
    .bind(&row.local_variables)
    .bind(&row.loop_frames)
    .bind(row.next_step)
    .bind(&row.failure)
    .bind(row.version)
    .bind(row.started_at)
    .bind(row.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn get_execution<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<ExecutionRow>, DbError> {
    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {COLUMNS} FROM executions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Overwrite the mutable columns of an execution, provided the stored row is
/// still at `expected_version`.
///
/// Returns `DbError::Conflict` if another writer got there first (or the row
/// is gone).
pub async fn update_execution<'e>(
    executor: impl PgExecutor<'e>,
    row: &ExecutionRow,
    expected_version: i64,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE executions
        SET status = $1, current_control = $2, global_variables = $3,
            local_variables = $4, loop_frames = $5, next_step = $6,
            failure = $7, version = $8, updated_at = $9
        WHERE id = $10 AND version = $11
        "#,
    )
    .bind(&row.status)
    .bind(row.current_control)
    .bind(&row.global_variables)
    .bind(&row.local_variables)
    .bind(&row.loop_frames)
    .bind(row.next_step)
    .bind(&row.failure)
    .bind(row.version)
    .bind(row.updated_at)
    .bind(row.id)
    .bind(expected_version)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::Conflict(row.id));
    }

    Ok(())
}

/// Whether any execution still references the workflow.
pub async fn workflow_has_executions<'e>(
    executor: impl PgExecutor<'e>,
    workflow_id: Uuid,
) -> Result<bool, DbError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM executions WHERE workflow_id = $1)",
    )
    .bind(workflow_id)
    .fetch_one(executor)
    .await?;

    Ok(exists)
}
