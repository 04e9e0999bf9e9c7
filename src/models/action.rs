//! Action model: one typed step of a quick response's execution sequence.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Upper bound for a single `delay` step.
pub const MAX_DELAY_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "action_type", rename_all = "lowercase")]
pub enum ActionType {
    #[serde(rename = "texto")]
    #[sqlx(rename = "texto")]
    Text,
    #[serde(rename = "imagem")]
    #[sqlx(rename = "imagem")]
    Image,
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "arquivo")]
    #[sqlx(rename = "arquivo")]
    File,
    #[serde(rename = "pix")]
    Pix,
    #[serde(rename = "delay")]
    Delay,
}

impl ActionType {
    /// Media kind for media-bearing action types.
    pub fn media_kind(self) -> Option<MediaKind> {
        match self {
            ActionType::Image => Some(MediaKind::Image),
            ActionType::Audio => Some(MediaKind::Audio),
            ActionType::Video => Some(MediaKind::Video),
            ActionType::File => Some(MediaKind::Document),
            ActionType::Text | ActionType::Pix | ActionType::Delay => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

/// Persisted action row. `content` holds the type-specific payload as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Action {
    pub id: Uuid,
    pub response_id: Uuid,
    pub action_type: ActionType,
    pub content: serde_json::Value,
    pub ordinal: i32,
    pub is_active: bool,
}

impl Action {
    /// Decode the typed payload for this action's type.
    pub fn payload(&self) -> Result<ActionPayload, String> {
        ActionPayload::decode(self.action_type, &self.content)
    }
}

/// Action as supplied by the administration surface when creating or
/// replacing a response's action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInput {
    pub action_type: ActionType,
    pub content: serde_json::Value,
    /// Omitted ordinals are assigned from list position.
    pub ordinal: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextContent {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaContent {
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PixContent {
    pub key: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelayContent {
    pub duration_ms: u64,
}

/// Decoded, validated action payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    Text(TextContent),
    Media(MediaKind, MediaContent),
    Pix(PixContent),
    Delay(DelayContent),
}

impl ActionPayload {
    /// Parse and check `content` against the shape required by `action_type`.
    pub fn decode(action_type: ActionType, content: &serde_json::Value) -> Result<Self, String> {
        fn parse<T: for<'de> Deserialize<'de>>(value: &serde_json::Value) -> Result<T, String> {
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())
        }

        match action_type {
            ActionType::Text => {
                let text: TextContent = parse(content)?;
                if text.body.trim().is_empty() {
                    return Err("text body must not be empty".to_string());
                }
                Ok(Self::Text(text))
            }
            ActionType::Image | ActionType::Audio | ActionType::Video | ActionType::File => {
                let media: MediaContent = parse(content)?;
                if media.url.trim().is_empty() {
                    return Err("media url must not be empty".to_string());
                }
                let kind = action_type
                    .media_kind()
                    .ok_or_else(|| "not a media action".to_string())?;
                Ok(Self::Media(kind, media))
            }
            ActionType::Pix => {
                let pix: PixContent = parse(content)?;
                if pix.key.trim().is_empty() {
                    return Err("pix key must not be empty".to_string());
                }
                if pix.amount_cents <= 0 {
                    return Err("pix amount must be positive".to_string());
                }
                Ok(Self::Pix(pix))
            }
            ActionType::Delay => {
                let delay: DelayContent = parse(content)?;
                if delay.duration_ms > MAX_DELAY_MS {
                    return Err(format!("delay must not exceed {MAX_DELAY_MS} ms"));
                }
                Ok(Self::Delay(delay))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_type_wire_names() {
        assert_eq!(serde_json::to_string(&ActionType::Text).unwrap(), "\"texto\"");
        assert_eq!(serde_json::to_string(&ActionType::File).unwrap(), "\"arquivo\"");
        let parsed: ActionType = serde_json::from_str("\"imagem\"").unwrap();
        assert_eq!(parsed, ActionType::Image);
    }

    #[test]
    fn decode_text() {
        let payload = ActionPayload::decode(ActionType::Text, &json!({"body": "Olá!"})).unwrap();
        assert_eq!(
            payload,
            ActionPayload::Text(TextContent {
                body: "Olá!".to_string()
            })
        );
    }

    #[test]
    fn decode_rejects_blank_text() {
        assert!(ActionPayload::decode(ActionType::Text, &json!({"body": "   "})).is_err());
        assert!(ActionPayload::decode(ActionType::Text, &json!({"url": "x"})).is_err());
    }

    #[test]
    fn decode_media_carries_kind() {
        let payload = ActionPayload::decode(
            ActionType::File,
            &json!({"url": "https://cdn/x.pdf", "file_name": "tabela.pdf"}),
        )
        .unwrap();
        match payload {
            ActionPayload::Media(kind, media) => {
                assert_eq!(kind, MediaKind::Document);
                assert_eq!(media.file_name.as_deref(), Some("tabela.pdf"));
                assert!(media.caption.is_none());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn decode_pix_requires_positive_amount() {
        assert!(ActionPayload::decode(
            ActionType::Pix,
            &json!({"key": "loja@pix.com", "amount_cents": 0})
        )
        .is_err());
        assert!(ActionPayload::decode(
            ActionType::Pix,
            &json!({"key": "loja@pix.com", "amount_cents": 4990, "description": "Plano"})
        )
        .is_ok());
    }

    #[test]
    fn decode_delay_bounds() {
        assert!(ActionPayload::decode(ActionType::Delay, &json!({"duration_ms": 1500})).is_ok());
        assert!(
            ActionPayload::decode(ActionType::Delay, &json!({"duration_ms": MAX_DELAY_MS + 1}))
                .is_err()
        );
        assert!(ActionPayload::decode(ActionType::Delay, &json!({"duration_ms": -1})).is_err());
    }
}
