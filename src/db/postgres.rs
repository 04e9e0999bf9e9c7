//! PostgreSQL-backed store.
//!
//! Multi-row writes run inside a transaction. The partial unique index
//! `automation_runs_in_flight` backs the one-run-in-flight-per-pair claim
//! across processes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::{ConversationHistory, RuleCounts, RuleRepository, RunRepository};
use crate::errors::AppError;
use crate::models::action::Action;
use crate::models::category::Category;
use crate::models::pagination::Pagination;
use crate::models::response::{QuickResponse, ResponseFilters};
use crate::models::run::{Run, RunFilters};

/// Name of the partial unique index guarding in-flight runs.
const IN_FLIGHT_INDEX: &str = "automation_runs_in_flight";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Attach ordered actions to each response with one query.
    async fn attach_actions(&self, responses: &mut [QuickResponse]) -> Result<(), AppError> {
        if responses.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = responses.iter().map(|r| r.id).collect();
        let actions = sqlx::query_as::<_, Action>(
            "SELECT * FROM response_actions WHERE response_id = ANY($1) ORDER BY response_id, ordinal",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<Action>> = HashMap::new();
        for action in actions {
            grouped.entry(action.response_id).or_default().push(action);
        }
        for response in responses.iter_mut() {
            response.actions = grouped.remove(&response.id).unwrap_or_default();
        }
        Ok(())
    }
}

/// Insert a response's actions inside an open transaction.
async fn insert_actions(
    tx: &mut Transaction<'_, Postgres>,
    actions: &[Action],
) -> Result<(), AppError> {
    for action in actions {
        sqlx::query(
            r#"
            INSERT INTO response_actions (id, response_id, action_type, content, ordinal, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(action.id)
        .bind(action.response_id)
        .bind(action.action_type)
        .bind(&action.content)
        .bind(action.ordinal)
        .bind(action.is_active)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl RuleRepository for PgStore {
    async fn list_categories(&self, owner_id: Option<Uuid>) -> Result<Vec<Category>, AppError> {
        let categories = sqlx::query_as::<_, Category>(
            r#"
            SELECT * FROM categories
            WHERE ($1::uuid IS NULL OR owner_id = $1)
            ORDER BY ordinal ASC, created_at ASC, id ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    async fn get_category(&self, id: Uuid) -> Result<Option<Category>, AppError> {
        let category = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(category)
    }

    async fn insert_category(&self, category: &Category) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name, description, color, icon, ordinal, is_active, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(category.id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.color)
        .bind(&category.icon)
        .bind(category.ordinal)
        .bind(category.is_active)
        .bind(category.owner_id)
        .bind(category.created_at)
        .bind(category.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_category(&self, category: &Category) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE categories
            SET name = $1, description = $2, color = $3, icon = $4,
                ordinal = $5, is_active = $6, updated_at = $7
            WHERE id = $8
            "#,
        )
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.color)
        .bind(&category.icon)
        .bind(category.ordinal)
        .bind(category.is_active)
        .bind(category.updated_at)
        .bind(category.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_category(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE quick_responses SET category_id = NULL, updated_at = $2 WHERE category_id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn list_responses(
        &self,
        filters: &ResponseFilters,
    ) -> Result<Vec<QuickResponse>, AppError> {
        let mut responses = sqlx::query_as::<_, QuickResponse>(
            r#"
            SELECT * FROM quick_responses
            WHERE ($1::uuid IS NULL OR owner_id = $1)
              AND ($2::uuid IS NULL OR category_id = $2)
              AND ($3::bool IS NULL OR is_active = $3)
              AND ($4::bool IS NULL OR is_paused = $4)
            ORDER BY ordinal ASC, created_at ASC, id ASC
            "#,
        )
        .bind(filters.owner_id)
        .bind(filters.category_id)
        .bind(filters.is_active)
        .bind(filters.is_paused)
        .fetch_all(&self.pool)
        .await?;

        self.attach_actions(&mut responses).await?;
        Ok(responses)
    }

    async fn get_response(&self, id: Uuid) -> Result<Option<QuickResponse>, AppError> {
        let Some(response) =
            sqlx::query_as::<_, QuickResponse>("SELECT * FROM quick_responses WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let mut responses = [response];
        self.attach_actions(&mut responses).await?;
        let [response] = responses;
        Ok(Some(response))
    }

    async fn insert_response(&self, response: &QuickResponse) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO quick_responses
                (id, title, description, category_id, trigger_keywords, trigger_type,
                 is_active, is_paused, schedule_config, ordinal, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(response.id)
        .bind(&response.title)
        .bind(&response.description)
        .bind(response.category_id)
        .bind(&response.trigger_keywords)
        .bind(response.trigger_type)
        .bind(response.is_active)
        .bind(response.is_paused)
        .bind(&response.schedule_config)
        .bind(response.ordinal)
        .bind(response.owner_id)
        .bind(response.created_at)
        .bind(response.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_actions(&mut tx, &response.actions).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_response(&self, response: &QuickResponse) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE quick_responses
            SET title = $1, description = $2, category_id = $3, trigger_keywords = $4,
                trigger_type = $5, is_active = $6, is_paused = $7, schedule_config = $8,
                ordinal = $9, updated_at = $10
            WHERE id = $11
            "#,
        )
        .bind(&response.title)
        .bind(&response.description)
        .bind(response.category_id)
        .bind(&response.trigger_keywords)
        .bind(response.trigger_type)
        .bind(response.is_active)
        .bind(response.is_paused)
        .bind(&response.schedule_config)
        .bind(response.ordinal)
        .bind(response.updated_at)
        .bind(response.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM response_actions WHERE response_id = $1")
            .bind(response.id)
            .execute(&mut *tx)
            .await?;
        insert_actions(&mut tx, &response.actions).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_response(&self, id: Uuid) -> Result<bool, AppError> {
        // response_actions rows cascade via the foreign key.
        let result = sqlx::query("DELETE FROM quick_responses WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn rule_counts(&self, owner_id: Option<Uuid>) -> Result<RuleCounts, AppError> {
        let (categories, (rules, active_rules)) = tokio::try_join!(
            async {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM categories WHERE ($1::uuid IS NULL OR owner_id = $1)",
                )
                .bind(owner_id)
                .fetch_one(&self.pool)
                .await
            },
            async {
                sqlx::query_as::<_, (i64, i64)>(
                    r#"
                    SELECT
                        COUNT(*) AS rules,
                        COALESCE(SUM(CASE WHEN is_active AND NOT is_paused THEN 1 ELSE 0 END), 0) AS active_rules
                    FROM quick_responses
                    WHERE ($1::uuid IS NULL OR owner_id = $1)
                    "#,
                )
                .bind(owner_id)
                .fetch_one(&self.pool)
                .await
            },
        )?;

        Ok(RuleCounts {
            categories,
            rules,
            active_rules,
        })
    }
}

#[async_trait]
impl RunRepository for PgStore {
    async fn save_run(&self, run: &Run) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO automation_runs
                (id, rule_id, conversation_id, owner_id, cursor, state, trigger_reason,
                 started_at, last_action_at, finished_at, failure_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE
            SET cursor = EXCLUDED.cursor,
                state = EXCLUDED.state,
                last_action_at = EXCLUDED.last_action_at,
                finished_at = EXCLUDED.finished_at,
                failure_reason = EXCLUDED.failure_reason
            "#,
        )
        .bind(run.id)
        .bind(run.rule_id)
        .bind(&run.conversation_id)
        .bind(run.owner_id)
        .bind(run.cursor)
        .bind(run.state)
        .bind(&run.trigger_reason)
        .bind(run.started_at)
        .bind(run.last_action_at)
        .bind(run.finished_at)
        .bind(&run.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err)
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some(IN_FLIGHT_INDEX) =>
            {
                AppError::AlreadyRunning(format!(
                    "Rule {} already has a run in flight for conversation {}",
                    run.rule_id, run.conversation_id
                ))
            }
            other => AppError::Database(other),
        })?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, AppError> {
        let run = sqlx::query_as::<_, Run>("SELECT * FROM automation_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    async fn list_runs(
        &self,
        filters: &RunFilters,
        pagination: &Pagination,
    ) -> Result<(Vec<Run>, i64), AppError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut param_index = 0u32;

        if filters.owner_id.is_some() {
            param_index += 1;
            conditions.push(format!("owner_id = ${param_index}"));
        }
        if filters.rule_id.is_some() {
            param_index += 1;
            conditions.push(format!("rule_id = ${param_index}"));
        }
        if filters.conversation_id.is_some() {
            param_index += 1;
            conditions.push(format!("conversation_id = ${param_index}"));
        }
        if filters.state.is_some() {
            param_index += 1;
            conditions.push(format!("state = ${param_index}"));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM automation_runs {where_clause}");
        let data_sql = format!(
            "SELECT * FROM automation_runs {where_clause} \
             ORDER BY started_at DESC, id DESC \
             LIMIT {} OFFSET {}",
            pagination.limit(),
            pagination.offset()
        );

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        let mut data_query = sqlx::query_as::<_, Run>(&data_sql);

        macro_rules! bind_both {
            ($val:expr) => {
                count_query = count_query.bind($val);
                data_query = data_query.bind($val);
            };
        }

        if let Some(owner_id) = filters.owner_id {
            bind_both!(owner_id);
        }
        if let Some(rule_id) = filters.rule_id {
            bind_both!(rule_id);
        }
        if let Some(ref conversation_id) = filters.conversation_id {
            bind_both!(conversation_id);
        }
        if let Some(state) = filters.state {
            bind_both!(state);
        }

        let total = count_query.fetch_one(&self.pool).await?;
        let items = data_query.fetch_all(&self.pool).await?;
        Ok((items, total))
    }

    async fn last_completed_runs(
        &self,
        conversation_id: &str,
    ) -> Result<HashMap<Uuid, DateTime<Utc>>, AppError> {
        let rows = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r#"
            SELECT rule_id, MAX(finished_at)
            FROM automation_runs
            WHERE conversation_id = $1 AND state = 'Completed' AND finished_at IS NOT NULL
            GROUP BY rule_id
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn incomplete_runs(&self) -> Result<Vec<Run>, AppError> {
        let runs = sqlx::query_as::<_, Run>(
            "SELECT * FROM automation_runs WHERE state IN ('Pending', 'Running') ORDER BY started_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    async fn count_runs(
        &self,
        owner_id: Option<Uuid>,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM automation_runs
            WHERE ($1::uuid IS NULL OR owner_id = $1)
              AND ($2::timestamptz IS NULL OR started_at >= $2)
            "#,
        )
        .bind(owner_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl ConversationHistory for PgStore {
    async fn record_inbound(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO conversations (conversation_id, first_inbound_at, last_inbound_at)
            VALUES ($1, $2, $2)
            ON CONFLICT (conversation_id) DO UPDATE
            SET last_inbound_at = EXCLUDED.last_inbound_at, ended_at = NULL
            RETURNING (xmax = 0)
            "#,
        )
        .bind(conversation_id)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    async fn open_conversations(&self) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT conversation_id FROM conversations WHERE ended_at IS NULL ORDER BY conversation_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn end_conversation(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE conversations SET ended_at = $2 WHERE conversation_id = $1")
                .bind(conversation_id)
                .bind(at)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ended_since(
        &self,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let ended = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM conversations WHERE conversation_id = $1 AND ended_at >= $2)",
        )
        .bind(conversation_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(ended)
    }
}
