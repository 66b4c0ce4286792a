//! Workflow queries. Workflows are write-once per name.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{DbError, models::WorkflowRow};

/// Insert a workflow unless its name is taken.
///
/// Returns `None` when a workflow with the same name already exists.
pub async fn insert_workflow_if_absent<'e>(
    executor: impl PgExecutor<'e>,
    row: &WorkflowRow,
) -> Result<Option<WorkflowRow>, DbError> {
    let inserted = sqlx::query_as::<_, WorkflowRow>(
        r#"
        INSERT INTO workflows (id, name, definition, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO NOTHING
        RETURNING id, name, definition, created_at
        "#,
    )
    .bind(row.id)
    .bind(&row.name)
    .bind(&row.definition)
    .bind(row.created_at)
    .fetch_optional(executor)
    .await?;

    Ok(inserted)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<WorkflowRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"SELECT id, name, definition, created_at FROM workflows WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its unique name.
pub async fn find_workflow_by_name<'e>(
    executor: impl PgExecutor<'e>,
    name: &str,
) -> Result<Option<WorkflowRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"SELECT id, name, definition, created_at FROM workflows WHERE name = $1"#,
    )
    .bind(name)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// SQLSTATE raised when a delete would orphan referencing rows.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Permanently delete a workflow by its primary key.
///
/// Returns `DbError::NotFound` if no row was deleted and `DbError::InUse`
/// if executions still reference it.
pub async fn delete_workflow<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<(), DbError> {
    let result = match sqlx::query("DELETE FROM workflows WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await
    {
        Ok(result) => result,
        Err(sqlx::Error::Database(err)) if err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
            return Err(DbError::InUse(format!("workflow {id} has executions")));
        }
        Err(err) => return Err(err.into()),
    };

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
