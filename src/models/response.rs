//! Quick response (automation rule) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::models::action::{Action, ActionInput};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "trigger_type")]
pub enum TriggerType {
    #[serde(rename = "manual")]
    #[sqlx(rename = "manual")]
    Manual,
    #[serde(rename = "primeira_mensagem")]
    #[sqlx(rename = "primeira_mensagem")]
    FirstMessage,
    #[serde(rename = "palavra_chave")]
    #[sqlx(rename = "palavra_chave")]
    Keyword,
    #[serde(rename = "horario")]
    #[sqlx(rename = "horario")]
    Schedule,
    #[serde(rename = "intervalo")]
    #[sqlx(rename = "intervalo")]
    Interval,
}

impl TriggerType {
    /// Trigger types driven by `clock_tick` events.
    pub fn is_clock_driven(self) -> bool {
        matches!(self, TriggerType::Schedule | TriggerType::Interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct QuickResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub trigger_keywords: Vec<String>,
    pub trigger_type: TriggerType,
    pub is_active: bool,
    pub is_paused: bool,
    pub schedule_config: Option<serde_json::Value>,
    pub ordinal: i32,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ordered by ordinal; loaded separately from `response_actions`.
    #[sqlx(skip)]
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl QuickResponse {
    /// Eligible for matching and scheduling.
    pub fn is_live(&self) -> bool {
        self.is_active && !self.is_paused
    }

    /// Keywords with surrounding whitespace removed and blanks dropped.
    pub fn normalized_keywords(&self) -> impl Iterator<Item = &str> {
        self.trigger_keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateResponse {
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    pub trigger_type: TriggerType,
    pub is_active: Option<bool>,
    pub is_paused: Option<bool>,
    pub schedule_config: Option<serde_json::Value>,
    pub ordinal: Option<i32>,
    #[serde(default)]
    pub actions: Vec<ActionInput>,
}

/// Partial update. `actions`, when present, replaces the whole list.
#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate)]
pub struct UpdateResponse {
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub title: Option<String>,
    pub description: Option<String>,
    /// `Some(None)` clears the category.
    #[serde(default, with = "double_option")]
    pub category_id: Option<Option<Uuid>>,
    pub trigger_keywords: Option<Vec<String>>,
    pub trigger_type: Option<TriggerType>,
    pub is_active: Option<bool>,
    pub is_paused: Option<bool>,
    #[serde(default, with = "double_option")]
    pub schedule_config: Option<Option<serde_json::Value>>,
    pub ordinal: Option<i32>,
    pub actions: Option<Vec<ActionInput>>,
}

/// List filters for responses.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponseFilters {
    pub owner_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub is_active: Option<bool>,
    pub is_paused: Option<bool>,
}

impl ResponseFilters {
    pub fn matches(&self, response: &QuickResponse) -> bool {
        self.owner_id.map_or(true, |o| response.owner_id == o)
            && self
                .category_id
                .map_or(true, |c| response.category_id == Some(c))
            && self.is_active.map_or(true, |a| response.is_active == a)
            && self.is_paused.map_or(true, |p| response.is_paused == p)
    }
}

/// Distinguishes an absent JSON field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&TriggerType::Keyword).unwrap(),
            "\"palavra_chave\""
        );
        let parsed: TriggerType = serde_json::from_str("\"primeira_mensagem\"").unwrap();
        assert_eq!(parsed, TriggerType::FirstMessage);
        assert!(TriggerType::Interval.is_clock_driven());
        assert!(!TriggerType::Manual.is_clock_driven());
    }

    #[test]
    fn update_distinguishes_null_from_absent() {
        let absent: UpdateResponse = serde_json::from_str("{}").unwrap();
        assert!(absent.category_id.is_none());

        let cleared: UpdateResponse = serde_json::from_str(r#"{"category_id": null}"#).unwrap();
        assert_eq!(cleared.category_id, Some(None));

        let id = Uuid::new_v4();
        let set: UpdateResponse =
            serde_json::from_str(&format!(r#"{{"category_id": "{id}"}}"#)).unwrap();
        assert_eq!(set.category_id, Some(Some(id)));
    }

    #[test]
    fn normalized_keywords_drop_blanks() {
        let now = Utc::now();
        let response = QuickResponse {
            id: Uuid::new_v4(),
            title: "Preço".to_string(),
            description: None,
            category_id: None,
            trigger_keywords: vec![" preço ".to_string(), "  ".to_string(), "valor".to_string()],
            trigger_type: TriggerType::Keyword,
            is_active: true,
            is_paused: false,
            schedule_config: None,
            ordinal: 0,
            owner_id: Uuid::nil(),
            created_at: now,
            updated_at: now,
            actions: Vec::new(),
        };
        let keywords: Vec<&str> = response.normalized_keywords().collect();
        assert_eq!(keywords, vec!["preço", "valor"]);
        assert!(response.is_live());
    }
}
