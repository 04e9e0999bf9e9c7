//! Persistence collaborators for rules, runs, and conversation history.
//!
//! The core only talks to the traits below. [`postgres::PgStore`] is the
//! production backend; [`memory::MemoryStore`] backs tests and database-less
//! development runs. Every write method is atomic per call.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::category::Category;
use crate::models::pagination::Pagination;
use crate::models::response::{QuickResponse, ResponseFilters};
use crate::models::run::{Run, RunFilters};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Category and rule counts for the statistics query.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RuleCounts {
    pub categories: i64,
    pub rules: i64,
    pub active_rules: i64,
}

/// Storage for categories and responses (with nested actions).
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Categories in display order (ordinal, then creation time).
    async fn list_categories(&self, owner_id: Option<Uuid>) -> Result<Vec<Category>, AppError>;

    async fn get_category(&self, id: Uuid) -> Result<Option<Category>, AppError>;

    async fn insert_category(&self, category: &Category) -> Result<(), AppError>;

    /// Returns `false` when the category does not exist.
    async fn update_category(&self, category: &Category) -> Result<bool, AppError>;

    /// Delete a category, nulling `category_id` on dependent responses and
    /// stamping their `updated_at` with `now`. Returns `false` when missing.
    async fn delete_category(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError>;

    /// Responses with their actions, ordered by ordinal then creation time.
    async fn list_responses(
        &self,
        filters: &ResponseFilters,
    ) -> Result<Vec<QuickResponse>, AppError>;

    async fn get_response(&self, id: Uuid) -> Result<Option<QuickResponse>, AppError>;

    async fn insert_response(&self, response: &QuickResponse) -> Result<(), AppError>;

    /// Replace a response row and its whole action list.
    async fn update_response(&self, response: &QuickResponse) -> Result<bool, AppError>;

    /// Delete a response; its actions go with it.
    async fn delete_response(&self, id: Uuid) -> Result<bool, AppError>;

    async fn rule_counts(&self, owner_id: Option<Uuid>) -> Result<RuleCounts, AppError>;
}

/// Durable run history. Runs are saved on every state change and cursor
/// advance so an interrupted run can be re-entered at its cursor.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Insert or overwrite a run by id.
    ///
    /// Fails with [`AppError::AlreadyRunning`] when inserting a second
    /// non-terminal run for the same (rule, conversation) pair.
    async fn save_run(&self, run: &Run) -> Result<(), AppError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, AppError>;

    /// Runs newest first, with the total count for pagination.
    async fn list_runs(
        &self,
        filters: &RunFilters,
        pagination: &Pagination,
    ) -> Result<(Vec<Run>, i64), AppError>;

    /// Finish time of the latest completed run per rule for a conversation.
    async fn last_completed_runs(
        &self,
        conversation_id: &str,
    ) -> Result<HashMap<Uuid, DateTime<Utc>>, AppError>;

    /// Runs left `Pending` or `Running`, oldest first.
    async fn incomplete_runs(&self) -> Result<Vec<Run>, AppError>;

    /// Count runs, optionally scoped to an owner and a start-time floor.
    async fn count_runs(
        &self,
        owner_id: Option<Uuid>,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64, AppError>;
}

/// Conversation history signal owned outside the rule engine.
#[async_trait]
pub trait ConversationHistory: Send + Sync {
    /// Record an inbound message, returning `true` when it is the first one
    /// ever recorded for the conversation. Reopens an ended conversation.
    async fn record_inbound(&self, conversation_id: &str, at: DateTime<Utc>)
        -> Result<bool, AppError>;

    /// Conversations that clock ticks should be evaluated against.
    async fn open_conversations(&self) -> Result<Vec<String>, AppError>;

    /// Mark a conversation ended. Returns `false` when it was never seen.
    async fn end_conversation(&self, conversation_id: &str, at: DateTime<Utc>)
        -> Result<bool, AppError>;

    /// Whether the conversation is currently ended, with the end recorded
    /// at or after `since`.
    async fn ended_since(&self, conversation_id: &str, since: DateTime<Utc>)
        -> Result<bool, AppError>;
}
