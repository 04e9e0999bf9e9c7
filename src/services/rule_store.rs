//! Rule Store: validated CRUD over categories and quick responses.
//!
//! Validation runs before any write so a rejected request persists nothing.
//! Writes to the same response are serialized through a per-rule lock;
//! reads take no lock at all.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::db::{RuleCounts, RuleRepository};
use crate::errors::AppError;
use crate::models::category::{Category, CreateCategory, UpdateCategory, DEFAULT_COLOR, DEFAULT_ICON};
use crate::models::response::{CreateResponse, QuickResponse, ResponseFilters, UpdateResponse};
use crate::services::locks::KeyedLocks;
use crate::services::validation;

#[derive(Clone)]
pub struct RuleStore {
    repo: Arc<dyn RuleRepository>,
    rule_locks: Arc<KeyedLocks<Uuid>>,
}

/// Restrict a lookup to one owner; `None` means unrestricted.
fn visible(owner_id: Option<Uuid>, actual: Uuid) -> bool {
    owner_id.map_or(true, |o| o == actual)
}

impl RuleStore {
    pub fn new(repo: Arc<dyn RuleRepository>) -> Self {
        Self {
            repo,
            rule_locks: Arc::new(KeyedLocks::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Categories
    // -----------------------------------------------------------------------

    pub async fn list_categories(&self, owner_id: Option<Uuid>) -> Result<Vec<Category>, AppError> {
        self.repo.list_categories(owner_id).await
    }

    pub async fn get_category(
        &self,
        id: Uuid,
        owner_id: Option<Uuid>,
    ) -> Result<Category, AppError> {
        self.repo
            .get_category(id)
            .await?
            .filter(|c| visible(owner_id, c.owner_id))
            .ok_or_else(|| AppError::NotFound(format!("Category {id} not found")))
    }

    pub async fn create_category(
        &self,
        owner_id: Uuid,
        input: &CreateCategory,
    ) -> Result<Category, AppError> {
        input.validate()?;
        let now = Utc::now();
        let category = Category {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            description: input.description.clone(),
            color: input.color.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            icon: input.icon.clone().unwrap_or_else(|| DEFAULT_ICON.to_string()),
            ordinal: input.ordinal.unwrap_or(0),
            is_active: input.is_active.unwrap_or(true),
            owner_id,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert_category(&category).await?;
        tracing::info!(category_id = %category.id, owner_id = %owner_id, "Category created");
        Ok(category)
    }

    pub async fn update_category(
        &self,
        id: Uuid,
        owner_id: Option<Uuid>,
        input: &UpdateCategory,
    ) -> Result<Category, AppError> {
        input.validate()?;
        let mut category = self.get_category(id, owner_id).await?;

        if let Some(ref name) = input.name {
            category.name = name.trim().to_string();
        }
        if input.description.is_some() {
            category.description = input.description.clone();
        }
        if let Some(ref color) = input.color {
            category.color = color.clone();
        }
        if let Some(ref icon) = input.icon {
            category.icon = icon.clone();
        }
        if let Some(ordinal) = input.ordinal {
            category.ordinal = ordinal;
        }
        if let Some(is_active) = input.is_active {
            category.is_active = is_active;
        }
        category.updated_at = Utc::now();

        if !self.repo.update_category(&category).await? {
            return Err(AppError::NotFound(format!("Category {id} not found")));
        }
        Ok(category)
    }

    /// Delete a category; its responses survive with `category_id` cleared.
    pub async fn delete_category(&self, id: Uuid, owner_id: Option<Uuid>) -> Result<(), AppError> {
        self.get_category(id, owner_id).await?;
        if !self.repo.delete_category(id, Utc::now()).await? {
            return Err(AppError::NotFound(format!("Category {id} not found")));
        }
        tracing::info!(category_id = %id, "Category deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Responses
    // -----------------------------------------------------------------------

    pub async fn list_responses(
        &self,
        filters: &ResponseFilters,
    ) -> Result<Vec<QuickResponse>, AppError> {
        self.repo.list_responses(filters).await
    }

    /// Responses the Trigger Matcher may consider: active and not paused.
    pub async fn live_responses(&self, owner_id: Option<Uuid>) -> Result<Vec<QuickResponse>, AppError> {
        let filters = ResponseFilters {
            owner_id,
            is_active: Some(true),
            is_paused: Some(false),
            ..Default::default()
        };
        self.repo.list_responses(&filters).await
    }

    pub async fn get_response(
        &self,
        id: Uuid,
        owner_id: Option<Uuid>,
    ) -> Result<QuickResponse, AppError> {
        self.repo
            .get_response(id)
            .await?
            .filter(|r| visible(owner_id, r.owner_id))
            .ok_or_else(|| AppError::NotFound(format!("Response {id} not found")))
    }

    pub async fn create_response(
        &self,
        owner_id: Uuid,
        input: &CreateResponse,
    ) -> Result<QuickResponse, AppError> {
        input.validate()?;
        if let Some(category_id) = input.category_id {
            self.ensure_category(category_id, owner_id).await?;
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let response = QuickResponse {
            id,
            title: input.title.trim().to_string(),
            description: input.description.clone(),
            category_id: input.category_id,
            trigger_keywords: clean_keywords(&input.trigger_keywords),
            trigger_type: input.trigger_type,
            is_active: input.is_active.unwrap_or(true),
            is_paused: input.is_paused.unwrap_or(false),
            schedule_config: input.schedule_config.clone(),
            ordinal: input.ordinal.unwrap_or(0),
            owner_id,
            created_at: now,
            updated_at: now,
            actions: validation::build_actions(id, &input.actions)?,
        };
        validation::validate_response(&response)?;

        self.repo.insert_response(&response).await?;
        tracing::info!(
            response_id = %response.id,
            trigger_type = ?response.trigger_type,
            actions = response.actions.len(),
            "Response created"
        );
        Ok(response)
    }

    pub async fn update_response(
        &self,
        id: Uuid,
        owner_id: Option<Uuid>,
        input: &UpdateResponse,
    ) -> Result<QuickResponse, AppError> {
        input.validate()?;
        let _guard = self.rule_locks.lock(&id).await;
        let mut response = self.get_response(id, owner_id).await?;

        if let Some(Some(category_id)) = input.category_id {
            self.ensure_category(category_id, response.owner_id).await?;
        }

        if let Some(ref title) = input.title {
            response.title = title.trim().to_string();
        }
        if input.description.is_some() {
            response.description = input.description.clone();
        }
        if let Some(category_id) = input.category_id {
            response.category_id = category_id;
        }
        if let Some(ref keywords) = input.trigger_keywords {
            response.trigger_keywords = clean_keywords(keywords);
        }
        if let Some(trigger_type) = input.trigger_type {
            response.trigger_type = trigger_type;
        }
        if let Some(is_active) = input.is_active {
            response.is_active = is_active;
        }
        if let Some(is_paused) = input.is_paused {
            response.is_paused = is_paused;
        }
        if let Some(ref schedule_config) = input.schedule_config {
            response.schedule_config = schedule_config.clone();
        }
        if let Some(ordinal) = input.ordinal {
            response.ordinal = ordinal;
        }
        if let Some(ref actions) = input.actions {
            response.actions = validation::build_actions(id, actions)?;
        }
        response.updated_at = Utc::now();
        validation::validate_response(&response)?;

        if !self.repo.update_response(&response).await? {
            return Err(AppError::NotFound(format!("Response {id} not found")));
        }
        tracing::info!(response_id = %id, "Response updated");
        Ok(response)
    }

    /// Set the paused flag explicitly.
    pub async fn set_paused(
        &self,
        id: Uuid,
        owner_id: Option<Uuid>,
        paused: bool,
    ) -> Result<QuickResponse, AppError> {
        let _guard = self.rule_locks.lock(&id).await;
        let mut response = self.get_response(id, owner_id).await?;
        if response.is_paused == paused {
            return Ok(response);
        }
        response.is_paused = paused;
        response.updated_at = Utc::now();
        if !self.repo.update_response(&response).await? {
            return Err(AppError::NotFound(format!("Response {id} not found")));
        }
        tracing::info!(response_id = %id, paused, "Response pause state changed");
        Ok(response)
    }

    /// Flip the paused flag.
    pub async fn toggle_pause(
        &self,
        id: Uuid,
        owner_id: Option<Uuid>,
    ) -> Result<QuickResponse, AppError> {
        let _guard = self.rule_locks.lock(&id).await;
        let mut response = self.get_response(id, owner_id).await?;
        response.is_paused = !response.is_paused;
        response.updated_at = Utc::now();
        if !self.repo.update_response(&response).await? {
            return Err(AppError::NotFound(format!("Response {id} not found")));
        }
        tracing::info!(response_id = %id, paused = response.is_paused, "Response pause toggled");
        Ok(response)
    }

    /// Delete a response together with its actions.
    pub async fn delete_response(&self, id: Uuid, owner_id: Option<Uuid>) -> Result<(), AppError> {
        {
            let _guard = self.rule_locks.lock(&id).await;
            self.get_response(id, owner_id).await?;
            if !self.repo.delete_response(id).await? {
                return Err(AppError::NotFound(format!("Response {id} not found")));
            }
        }
        self.rule_locks.forget(&id);
        tracing::info!(response_id = %id, "Response deleted");
        Ok(())
    }

    pub async fn counts(&self, owner_id: Option<Uuid>) -> Result<RuleCounts, AppError> {
        self.repo.rule_counts(owner_id).await
    }

    async fn ensure_category(&self, category_id: Uuid, owner_id: Uuid) -> Result<(), AppError> {
        match self.repo.get_category(category_id).await? {
            Some(c) if c.owner_id == owner_id => Ok(()),
            _ => Err(AppError::validation(
                "category_id",
                format!("category {category_id} does not exist"),
            )),
        }
    }
}

/// Trim keywords and drop blanks and case-insensitive duplicates.
fn clean_keywords(raw: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::action::{ActionInput, ActionType};
    use crate::models::response::TriggerType;
    use serde_json::json;

    fn store() -> RuleStore {
        RuleStore::new(Arc::new(MemoryStore::new()))
    }

    fn owner() -> Uuid {
        Uuid::from_u128(42)
    }

    fn category_input(name: &str, ordinal: i32) -> CreateCategory {
        CreateCategory {
            name: name.to_string(),
            description: None,
            color: Some("#10B981".to_string()),
            icon: None,
            ordinal: Some(ordinal),
            is_active: None,
        }
    }

    fn keyword_input(category_id: Option<Uuid>) -> CreateResponse {
        CreateResponse {
            title: "Preço".to_string(),
            description: Some("Responde dúvidas de preço".to_string()),
            category_id,
            trigger_keywords: vec!["preço".to_string(), "valor".to_string()],
            trigger_type: TriggerType::Keyword,
            is_active: None,
            is_paused: None,
            schedule_config: None,
            ordinal: None,
            actions: vec![
                ActionInput {
                    action_type: ActionType::Text,
                    content: json!({"body": "Nosso plano custa R$ 49,90"}),
                    ordinal: None,
                    is_active: None,
                },
                ActionInput {
                    action_type: ActionType::Pix,
                    content: json!({"key": "loja@pix.com", "amount_cents": 4990}),
                    ordinal: None,
                    is_active: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn create_and_read_back_preserves_actions() {
        let store = store();
        let input = keyword_input(None);
        let created = store.create_response(owner(), &input).await.unwrap();
        let fetched = store.get_response(created.id, Some(owner())).await.unwrap();

        assert_eq!(fetched.actions.len(), 2);
        for (i, (action, supplied)) in fetched.actions.iter().zip(&input.actions).enumerate() {
            assert_eq!(action.ordinal, i as i32);
            assert_eq!(action.action_type, supplied.action_type);
            assert_eq!(action.content, supplied.content);
        }
        let json = serde_json::to_value(&fetched.actions).unwrap();
        assert_eq!(json[1]["action_type"], "pix");
        assert_eq!(json[1]["content"]["amount_cents"], 4990);
    }

    #[tokio::test]
    async fn invalid_response_is_not_persisted() {
        let store = store();
        let mut input = keyword_input(None);
        input.trigger_keywords = vec!["   ".to_string()];
        let err = store.create_response(owner(), &input).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "trigger_keywords"));
        assert!(store
            .list_responses(&ResponseFilters::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_category_rejected() {
        let store = store();
        let err = store
            .create_response(owner(), &keyword_input(Some(Uuid::new_v4())))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "category_id"));
    }

    #[tokio::test]
    async fn deleting_category_nulls_reference() {
        let store = store();
        let category = store
            .create_category(owner(), &category_input("Vendas", 0))
            .await
            .unwrap();
        let response = store
            .create_response(owner(), &keyword_input(Some(category.id)))
            .await
            .unwrap();

        store.delete_category(category.id, Some(owner())).await.unwrap();

        let after = store.get_response(response.id, None).await.unwrap();
        assert_eq!(after.category_id, None);
        assert!(after.updated_at >= response.updated_at);
        assert!(store.get_category(category.id, None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn update_replaces_actions_and_bumps_timestamp() {
        let store = store();
        let created = store.create_response(owner(), &keyword_input(None)).await.unwrap();

        let update = UpdateResponse {
            actions: Some(vec![ActionInput {
                action_type: ActionType::Text,
                content: json!({"body": "Só texto agora"}),
                ordinal: None,
                is_active: None,
            }]),
            ..Default::default()
        };
        let updated = store.update_response(created.id, Some(owner()), &update).await.unwrap();
        assert_eq!(updated.actions.len(), 1);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.trigger_keywords, created.trigger_keywords);
    }

    #[tokio::test]
    async fn invalid_update_leaves_stored_copy_untouched() {
        let store = store();
        let created = store.create_response(owner(), &keyword_input(None)).await.unwrap();
        let update = UpdateResponse {
            trigger_keywords: Some(Vec::new()),
            title: Some("Novo título".to_string()),
            ..Default::default()
        };
        assert!(store.update_response(created.id, None, &update).await.is_err());
        let stored = store.get_response(created.id, None).await.unwrap();
        assert_eq!(stored.title, "Preço");
    }

    #[tokio::test]
    async fn other_owner_cannot_see_response() {
        let store = store();
        let created = store.create_response(owner(), &keyword_input(None)).await.unwrap();
        let err = store
            .get_response(created.id, Some(Uuid::from_u128(7)))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn pause_toggle_and_live_listing() {
        let store = store();
        let created = store.create_response(owner(), &keyword_input(None)).await.unwrap();
        assert_eq!(store.live_responses(None).await.unwrap().len(), 1);

        let paused = store.toggle_pause(created.id, Some(owner())).await.unwrap();
        assert!(paused.is_paused);
        assert!(paused.is_active);
        assert!(store.live_responses(None).await.unwrap().is_empty());

        let resumed = store.set_paused(created.id, None, false).await.unwrap();
        assert!(!resumed.is_paused);

        let counts = store.counts(Some(owner())).await.unwrap();
        assert_eq!(counts.rules, 1);
        assert_eq!(counts.active_rules, 1);
    }

    #[tokio::test]
    async fn delete_response_then_not_found() {
        let store = store();
        let created = store.create_response(owner(), &keyword_input(None)).await.unwrap();
        store.delete_response(created.id, Some(owner())).await.unwrap();
        assert!(store.get_response(created.id, None).await.unwrap_err().is_not_found());
        assert!(store
            .delete_response(created.id, None)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn keywords_cleaned() {
        let cleaned = clean_keywords(&[
            " Preço ".to_string(),
            "preço".to_string(),
            "".to_string(),
            "valor".to_string(),
        ]);
        assert_eq!(cleaned, vec!["Preço", "valor"]);
    }
}
