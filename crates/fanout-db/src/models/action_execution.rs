//! `ActionExecution` model: one invocation attempt chain of one action
//! against one event. The action-side analogue of a delivery attempt.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Execution lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Succeeded => write!(f, "succeeded"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::TimedOut => write!(f, "timed_out"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "timed_out" => Ok(ExecutionStatus::TimedOut),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            _ => Err(format!("Unknown execution status: {s}")),
        }
    }
}

/// Record of one action invocation against one event.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ActionExecution {
    pub id: Uuid,
    pub action_id: Uuid,
    pub event_id: Uuid,
    pub status: ExecutionStatus,
    /// Number of retries consumed (0 = first attempt succeeded or failed
    /// without retry budget).
    pub retry_count: i32,
    pub duration_ms: Option<i32>,
    pub error: Option<String>,
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Data needed to open an execution record.
#[derive(Debug, Clone)]
pub struct CreateActionExecution {
    pub action_id: Uuid,
    pub event_id: Uuid,
}

impl ActionExecution {
    /// Open an execution record in `running` state.
    pub async fn create(pool: &PgPool, data: CreateActionExecution) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO action_executions (action_id, event_id, status)
            VALUES ($1, $2, 'running')
            RETURNING *
            ",
        )
        .bind(data.action_id)
        .bind(data.event_id)
        .fetch_one(pool)
        .await
    }

    /// Close the record with its final outcome.
    pub async fn complete(
        pool: &PgPool,
        id: Uuid,
        status: ExecutionStatus,
        retry_count: i32,
        duration_ms: i32,
        error: Option<&str>,
        detail: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE action_executions
            SET status = $2, retry_count = $3, duration_ms = $4,
                error = $5, detail = $6, completed_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status)
        .bind(retry_count)
        .bind(duration_ms)
        .bind(error)
        .bind(detail)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Recent executions of one action, newest first.
    pub async fn list_by_action(
        pool: &PgPool,
        action_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM action_executions
            WHERE action_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            ",
        )
        .bind(action_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Executions triggered by one event.
    pub async fn list_by_event(pool: &PgPool, event_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM action_executions
            WHERE event_id = $1
            ORDER BY started_at
            ",
        )
        .bind(event_id)
        .fetch_all(pool)
        .await
    }
}
