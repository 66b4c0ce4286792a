//! History queries. Rows are only ever inserted and read.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{DbError, models::HistoryRow};

const COLUMNS: &str = "id, execution_id, step_number, control_index, service, request_data, \
    request_mime, response_data, response_mime, local_snapshot, global_snapshot, failure, \
    executed_at";

pub async fn insert_history<'e>(
    executor: impl PgExecutor<'e>,
    row: &HistoryRow,
) -> Result<(), DbError> {
    sqlx::query(&format!(
        "INSERT INTO history ({COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
    ))
    .bind(row.id)
    .bind(row.execution_id)
    .bind(row.step_number)
    .bind(row.control_index)
    .bind(&row.service)
    .bind(&row.request_data)
    .bind(&row.request_mime)
    .bind(&row.response_data)
    .bind(&row.response_mime)
    .bind(&row.local_snapshot)
    .bind(&row.global_snapshot)
    .bind(&row.failure)
    .bind(row.executed_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Return the history of one execution ordered by step number.
pub async fn list_history<'e>(
    executor: impl PgExecutor<'e>,
    execution_id: Uuid,
) -> Result<Vec<HistoryRow>, DbError> {
    let rows = sqlx::query_as::<_, HistoryRow>(&format!(
        "SELECT {COLUMNS} FROM history WHERE execution_id = $1 ORDER BY step_number ASC"
    ))
    .bind(execution_id)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}
