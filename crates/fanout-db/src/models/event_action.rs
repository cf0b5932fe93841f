//! `EventAction` model: a configurable automation rule binding
//! event-matching criteria to a handler invocation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// The fixed set of handler kinds an action can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HandlerType {
    Webhook,
    Email,
    Sms,
    Slack,
    Function,
    Workflow,
}

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerType::Webhook => write!(f, "webhook"),
            HandlerType::Email => write!(f, "email"),
            HandlerType::Sms => write!(f, "sms"),
            HandlerType::Slack => write!(f, "slack"),
            HandlerType::Function => write!(f, "function"),
            HandlerType::Workflow => write!(f, "workflow"),
        }
    }
}

impl FromStr for HandlerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "webhook" => Ok(HandlerType::Webhook),
            "email" => Ok(HandlerType::Email),
            "sms" => Ok(HandlerType::Sms),
            "slack" => Ok(HandlerType::Slack),
            "function" => Ok(HandlerType::Function),
            "workflow" => Ok(HandlerType::Workflow),
            _ => Err(format!("Unknown handler type: {s}")),
        }
    }
}

/// How an action's handler invocation relates to the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Awaited before the event's dispatch completes.
    Sync,
    /// Fired without blocking the loop.
    Async,
    /// Enqueued for a separate worker pool.
    Queued,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sync => write!(f, "sync"),
            ExecutionMode::Async => write!(f, "async"),
            ExecutionMode::Queued => write!(f, "queued"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sync" => Ok(ExecutionMode::Sync),
            "async" => Ok(ExecutionMode::Async),
            "queued" => Ok(ExecutionMode::Queued),
            _ => Err(format!("Unknown execution mode: {s}")),
        }
    }
}

/// Action lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Active,
    Paused,
    Disabled,
    Archived,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Active => write!(f, "active"),
            ActionStatus::Paused => write!(f, "paused"),
            ActionStatus::Disabled => write!(f, "disabled"),
            ActionStatus::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ActionStatus::Active),
            "paused" => Ok(ActionStatus::Paused),
            "disabled" => Ok(ActionStatus::Disabled),
            "archived" => Ok(ActionStatus::Archived),
            _ => Err(format!("Unknown action status: {s}")),
        }
    }
}

/// A configurable automation rule.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventAction {
    pub id: Uuid,
    pub name: String,
    pub handler_type: HandlerType,
    /// Handler-specific configuration document.
    pub configuration: serde_json::Value,
    /// Event type patterns this action listens to.
    pub event_types: Vec<String>,
    /// JSON array of filter conditions (fanout-core format).
    pub conditions: serde_json::Value,
    /// Context filter map; empty object matches every context.
    pub context_filters: serde_json::Value,
    pub execution_mode: ExecutionMode,
    pub priority: i32,
    pub timeout_secs: i32,
    pub max_retries: i32,
    pub retry_delay_secs: i32,
    pub status: ActionStatus,
    /// Restricts the action to one tenant; `None` applies platform-wide.
    pub tenant_id: Option<Uuid>,
    pub trigger_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to create an action.
#[derive(Debug, Clone)]
pub struct CreateEventAction {
    pub name: String,
    pub handler_type: HandlerType,
    pub configuration: serde_json::Value,
    pub event_types: Vec<String>,
    pub conditions: serde_json::Value,
    pub context_filters: serde_json::Value,
    pub execution_mode: ExecutionMode,
    pub priority: i32,
    pub timeout_secs: i32,
    pub max_retries: i32,
    pub retry_delay_secs: i32,
    pub tenant_id: Option<Uuid>,
}

impl EventAction {
    /// Create a new action, active by default.
    pub async fn create(pool: &PgPool, data: CreateEventAction) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO event_actions (
                name, handler_type, configuration, event_types, conditions,
                context_filters, execution_mode, priority, timeout_secs,
                max_retries, retry_delay_secs, tenant_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            ",
        )
        .bind(&data.name)
        .bind(data.handler_type)
        .bind(&data.configuration)
        .bind(&data.event_types)
        .bind(&data.conditions)
        .bind(&data.context_filters)
        .bind(data.execution_mode)
        .bind(data.priority)
        .bind(data.timeout_secs)
        .bind(data.max_retries)
        .bind(data.retry_delay_secs)
        .bind(data.tenant_id)
        .fetch_one(pool)
        .await
    }

    /// Fetch one action by id.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(r"SELECT * FROM event_actions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All actions eligible for dispatch (status `active`), highest priority
    /// first. The registry caches this set.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM event_actions
            WHERE status = 'active'
            ORDER BY priority DESC, created_at
            ",
        )
        .fetch_all(pool)
        .await
    }

    /// Atomically bump the trigger counter.
    pub async fn record_trigger(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE event_actions
            SET trigger_count = trigger_count + 1, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Atomically record the outcome of one invocation.
    pub async fn record_outcome(pool: &PgPool, id: Uuid, success: bool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE event_actions
            SET success_count = success_count + CASE WHEN $2 THEN 1 ELSE 0 END,
                failure_count = failure_count + CASE WHEN $2 THEN 0 ELSE 1 END,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(success)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Move an action to a new lifecycle status.
    pub async fn set_status(
        pool: &PgPool,
        id: Uuid,
        status: ActionStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"UPDATE event_actions SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Disable a misconfigured action so it stops matching.
    pub async fn disable(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        Self::set_status(pool, id, ActionStatus::Disabled).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_type_round_trip() {
        for ht in [
            HandlerType::Webhook,
            HandlerType::Email,
            HandlerType::Sms,
            HandlerType::Slack,
            HandlerType::Function,
            HandlerType::Workflow,
        ] {
            let parsed: HandlerType = ht.to_string().parse().unwrap();
            assert_eq!(parsed, ht);
        }
    }

    #[test]
    fn test_handler_type_invalid() {
        assert!("pagerduty".parse::<HandlerType>().is_err());
    }

    #[test]
    fn test_execution_mode_round_trip() {
        for mode in [
            ExecutionMode::Sync,
            ExecutionMode::Async,
            ExecutionMode::Queued,
        ] {
            let parsed: ExecutionMode = mode.to_string().parse().unwrap();
            assert_eq!(parsed, mode);
        }
    }

    #[test]
    fn test_action_status_round_trip() {
        for status in [
            ActionStatus::Active,
            ActionStatus::Paused,
            ActionStatus::Disabled,
            ActionStatus::Archived,
        ] {
            let parsed: ActionStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_handler_type_serde_snake_case() {
        let json = serde_json::to_string(&HandlerType::Webhook).unwrap();
        assert_eq!(json, "\"webhook\"");
    }
}
