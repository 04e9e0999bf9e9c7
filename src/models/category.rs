//! Category model: a named display grouping for quick responses.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// `#RRGGBB` display color.
pub static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("static color regex"));

pub const DEFAULT_COLOR: &str = "#3B82F6";
pub const DEFAULT_ICON: &str = "message-square";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub icon: String,
    pub ordinal: i32,
    pub is_active: bool,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    /// Display ordering: ordinal ascending, ties broken by creation time.
    pub fn sort_key(&self) -> (i32, DateTime<Utc>, Uuid) {
        (self.ordinal, self.created_at, self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCategory {
    #[validate(length(min = 1, max = 120, message = "name must be 1-120 characters"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(regex(path = *COLOR_RE, message = "color must be #RRGGBB"))]
    pub color: Option<String>,
    #[validate(length(min = 1, max = 60, message = "icon must be 1-60 characters"))]
    pub icon: Option<String>,
    pub ordinal: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate)]
pub struct UpdateCategory {
    #[validate(length(min = 1, max = 120, message = "name must be 1-120 characters"))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(regex(path = *COLOR_RE, message = "color must be #RRGGBB"))]
    pub color: Option<String>,
    #[validate(length(min = 1, max = 60, message = "icon must be 1-60 characters"))]
    pub icon: Option<String>,
    pub ordinal: Option<i32>,
    pub is_active: Option<bool>,
}
