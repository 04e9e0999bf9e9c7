//! In-memory store used by tests and when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::{ConversationHistory, RuleCounts, RuleRepository, RunRepository};
use crate::errors::AppError;
use crate::models::category::Category;
use crate::models::pagination::Pagination;
use crate::models::response::{QuickResponse, ResponseFilters};
use crate::models::run::{Run, RunFilters, RunState};

#[derive(Debug, Clone)]
struct ConversationEntry {
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    categories: HashMap<Uuid, Category>,
    responses: HashMap<Uuid, QuickResponse>,
    runs: HashMap<Uuid, Run>,
    conversations: HashMap<String, ConversationEntry>,
}

/// Single-lock store; each trait call is one critical section, which gives
/// the same per-write atomicity as a database transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_responses(responses: &mut [QuickResponse]) {
    responses.sort_by(|a, b| {
        (a.ordinal, a.created_at, a.id).cmp(&(b.ordinal, b.created_at, b.id))
    });
}

#[async_trait]
impl RuleRepository for MemoryStore {
    async fn list_categories(&self, owner_id: Option<Uuid>) -> Result<Vec<Category>, AppError> {
        let state = self.state.read().await;
        let mut categories: Vec<Category> = state
            .categories
            .values()
            .filter(|c| owner_id.map_or(true, |o| c.owner_id == o))
            .cloned()
            .collect();
        categories.sort_by_key(Category::sort_key);
        Ok(categories)
    }

    async fn get_category(&self, id: Uuid) -> Result<Option<Category>, AppError> {
        Ok(self.state.read().await.categories.get(&id).cloned())
    }

    async fn insert_category(&self, category: &Category) -> Result<(), AppError> {
        self.state
            .write()
            .await
            .categories
            .insert(category.id, category.clone());
        Ok(())
    }

    async fn update_category(&self, category: &Category) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        match state.categories.get_mut(&category.id) {
            Some(existing) => {
                *existing = category.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_category(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        if state.categories.remove(&id).is_none() {
            return Ok(false);
        }
        for response in state.responses.values_mut() {
            if response.category_id == Some(id) {
                response.category_id = None;
                response.updated_at = now;
            }
        }
        Ok(true)
    }

    async fn list_responses(
        &self,
        filters: &ResponseFilters,
    ) -> Result<Vec<QuickResponse>, AppError> {
        let state = self.state.read().await;
        let mut responses: Vec<QuickResponse> = state
            .responses
            .values()
            .filter(|r| filters.matches(r))
            .cloned()
            .collect();
        sort_responses(&mut responses);
        Ok(responses)
    }

    async fn get_response(&self, id: Uuid) -> Result<Option<QuickResponse>, AppError> {
        Ok(self.state.read().await.responses.get(&id).cloned())
    }

    async fn insert_response(&self, response: &QuickResponse) -> Result<(), AppError> {
        self.state
            .write()
            .await
            .responses
            .insert(response.id, response.clone());
        Ok(())
    }

    async fn update_response(&self, response: &QuickResponse) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        match state.responses.get_mut(&response.id) {
            Some(existing) => {
                *existing = response.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_response(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.state.write().await.responses.remove(&id).is_some())
    }

    async fn rule_counts(&self, owner_id: Option<Uuid>) -> Result<RuleCounts, AppError> {
        let state = self.state.read().await;
        let owned = |o: Uuid| owner_id.map_or(true, |want| want == o);
        let rules: Vec<&QuickResponse> =
            state.responses.values().filter(|r| owned(r.owner_id)).collect();
        Ok(RuleCounts {
            categories: state.categories.values().filter(|c| owned(c.owner_id)).count() as i64,
            rules: rules.len() as i64,
            active_rules: rules.iter().filter(|r| r.is_live()).count() as i64,
        })
    }
}

#[async_trait]
impl RunRepository for MemoryStore {
    async fn save_run(&self, run: &Run) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if !state.runs.contains_key(&run.id) && !run.state.is_terminal() {
            let clash = state.runs.values().any(|r| {
                r.rule_id == run.rule_id
                    && r.conversation_id == run.conversation_id
                    && !r.state.is_terminal()
            });
            if clash {
                return Err(AppError::AlreadyRunning(format!(
                    "Rule {} already has a run in flight for conversation {}",
                    run.rule_id, run.conversation_id
                )));
            }
        }
        state.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, AppError> {
        Ok(self.state.read().await.runs.get(&id).cloned())
    }

    async fn list_runs(
        &self,
        filters: &RunFilters,
        pagination: &Pagination,
    ) -> Result<(Vec<Run>, i64), AppError> {
        let state = self.state.read().await;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|r| filters.matches(r))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        let total = runs.len() as i64;
        let page = runs
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .collect();
        Ok((page, total))
    }

    async fn last_completed_runs(
        &self,
        conversation_id: &str,
    ) -> Result<HashMap<Uuid, DateTime<Utc>>, AppError> {
        let state = self.state.read().await;
        let mut last: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
        for run in state.runs.values().filter(|r| {
            r.conversation_id == conversation_id && r.state == RunState::Completed
        }) {
            let Some(finished) = run.finished_at else {
                continue;
            };
            last.entry(run.rule_id)
                .and_modify(|t| *t = (*t).max(finished))
                .or_insert(finished);
        }
        Ok(last)
    }

    async fn incomplete_runs(&self) -> Result<Vec<Run>, AppError> {
        let state = self.state.read().await;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    async fn count_runs(
        &self,
        owner_id: Option<Uuid>,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64, AppError> {
        let state = self.state.read().await;
        Ok(state
            .runs
            .values()
            .filter(|r| owner_id.map_or(true, |o| r.owner_id == o))
            .filter(|r| since.map_or(true, |s| r.started_at >= s))
            .count() as i64)
    }
}

#[async_trait]
impl ConversationHistory for MemoryStore {
    async fn record_inbound(
        &self,
        conversation_id: &str,
        _at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        match state.conversations.get_mut(conversation_id) {
            Some(entry) => {
                entry.ended_at = None;
                Ok(false)
            }
            None => {
                state
                    .conversations
                    .insert(conversation_id.to_string(), ConversationEntry { ended_at: None });
                Ok(true)
            }
        }
    }

    async fn open_conversations(&self) -> Result<Vec<String>, AppError> {
        let state = self.state.read().await;
        let mut open: Vec<String> = state
            .conversations
            .iter()
            .filter(|(_, entry)| entry.ended_at.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        open.sort();
        Ok(open)
    }

    async fn end_conversation(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        match state.conversations.get_mut(conversation_id) {
            Some(entry) => {
                entry.ended_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ended_since(
        &self,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .get(conversation_id)
            .and_then(|entry| entry.ended_at)
            .is_some_and(|ended| ended >= since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(rule_id: Uuid, conversation: &str) -> Run {
        Run::new(rule_id, conversation, Uuid::nil(), "test")
    }

    #[tokio::test]
    async fn second_in_flight_run_for_pair_rejected() {
        let store = MemoryStore::new();
        let rule_id = Uuid::new_v4();
        store.save_run(&run(rule_id, "c1")).await.unwrap();

        let err = store.save_run(&run(rule_id, "c1")).await.unwrap_err();
        assert!(err.is_already_running());

        // Different conversation is independent.
        store.save_run(&run(rule_id, "c2")).await.unwrap();
    }

    #[tokio::test]
    async fn terminal_run_frees_pair() {
        let store = MemoryStore::new();
        let rule_id = Uuid::new_v4();
        let mut first = run(rule_id, "c1");
        store.save_run(&first).await.unwrap();
        first.transition(RunState::Running).unwrap();
        first.transition(RunState::Completed).unwrap();
        store.save_run(&first).await.unwrap();

        store.save_run(&run(rule_id, "c1")).await.unwrap();
        assert_eq!(store.count_runs(None, None).await.unwrap(), 2);

        let last = store.last_completed_runs("c1").await.unwrap();
        assert_eq!(last.get(&rule_id), first.finished_at.as_ref());
    }

    #[tokio::test]
    async fn first_inbound_detection() {
        let store = MemoryStore::new();
        let now = Utc::now();
        assert!(store.record_inbound("c1", now).await.unwrap());
        assert!(!store.record_inbound("c1", now).await.unwrap());

        assert!(store.end_conversation("c1", now).await.unwrap());
        assert!(store.open_conversations().await.unwrap().is_empty());
        assert!(store.ended_since("c1", now).await.unwrap());
        assert!(!store
            .ended_since("c1", now + chrono::Duration::seconds(1))
            .await
            .unwrap());

        // Reopening is not a first message.
        assert!(!store.record_inbound("c1", now).await.unwrap());
        assert_eq!(store.open_conversations().await.unwrap(), vec!["c1"]);
        assert!(!store.end_conversation("unknown", now).await.unwrap());
    }

    #[tokio::test]
    async fn list_runs_paginates_newest_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut r = run(Uuid::new_v4(), &format!("c{i}"));
            r.started_at = Utc::now() + chrono::Duration::seconds(i);
            store.save_run(&r).await.unwrap();
        }
        let pagination = Pagination {
            page: Some(1),
            per_page: Some(2),
        };
        let (page, total) = store
            .list_runs(&RunFilters::default(), &pagination)
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].conversation_id, "c4");
    }
}
