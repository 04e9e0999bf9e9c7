//! Trigger Matcher: decides which live rules an event fires.
//!
//! Pure logic with no storage access. The caller supplies the live rules,
//! the categories used for ordering, and the last completed run per rule
//! for the event's conversation.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::category::Category;
use crate::models::response::{QuickResponse, TriggerType};
use crate::models::schedule::{IntervalSpec, TimeWindow};

/// What produced the event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    Manual,
    InboundMessage,
    ClockTick,
}

/// Inbound event evaluated against the rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub conversation_id: String,
    pub kind: InvocationKind,
    /// Inbound message text, for `inbound_message` events.
    pub text: Option<String>,
    /// First inbound message ever recorded for the conversation.
    #[serde(default)]
    pub first_message: bool,
    /// Rule explicitly named by a `manual` invocation.
    pub rule_id: Option<Uuid>,
    /// Restrict evaluation to one owner's rules.
    pub owner_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn inbound(conversation_id: &str, text: &str, first_message: bool) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            kind: InvocationKind::InboundMessage,
            text: Some(text.to_string()),
            first_message,
            rule_id: None,
            owner_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn manual(conversation_id: &str, rule_id: Uuid) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            kind: InvocationKind::Manual,
            text: None,
            first_message: false,
            rule_id: Some(rule_id),
            owner_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn clock_tick(conversation_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            kind: InvocationKind::ClockTick,
            text: None,
            first_message: false,
            rule_id: None,
            owner_id: None,
            timestamp: at,
        }
    }
}

/// Why a rule matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum MatchReason {
    Manual,
    FirstMessage,
    Keyword(String),
    TimeWindow,
    Interval,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchReason::Manual => write!(f, "manual invocation"),
            MatchReason::FirstMessage => write!(f, "first inbound message"),
            MatchReason::Keyword(k) => write!(f, "keyword \"{k}\""),
            MatchReason::TimeWindow => write!(f, "inside time window"),
            MatchReason::Interval => write!(f, "interval elapsed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub rule: QuickResponse,
    pub reason: MatchReason,
}

/// Lookups the matcher needs beyond the rules themselves.
#[derive(Debug, Default)]
pub struct MatchContext<'a> {
    pub categories: HashMap<Uuid, &'a Category>,
    /// Last completed run per rule for the event's conversation.
    pub last_completed: HashMap<Uuid, DateTime<Utc>>,
}

impl<'a> MatchContext<'a> {
    pub fn new(categories: &'a [Category], last_completed: HashMap<Uuid, DateTime<Utc>>) -> Self {
        Self {
            categories: categories.iter().map(|c| (c.id, c)).collect(),
            last_completed,
        }
    }
}

/// Return every live rule the event fires, in execution order.
///
/// Order: category ordinal (ties by category creation), then rule ordinal,
/// then rule creation time. Uncategorized rules sort after all categories.
/// Every match is returned; picking among them is the caller's business.
pub fn match_event(
    event: &TriggerEvent,
    rules: &[QuickResponse],
    ctx: &MatchContext<'_>,
) -> Vec<RuleMatch> {
    let mut matches: Vec<RuleMatch> = rules
        .iter()
        .filter(|rule| rule.is_live())
        .filter(|rule| event.owner_id.map_or(true, |o| rule.owner_id == o))
        .filter_map(|rule| {
            evaluate(event, rule, ctx).map(|reason| RuleMatch {
                rule: rule.clone(),
                reason,
            })
        })
        .collect();

    matches.sort_by(|a, b| order_key(&a.rule, ctx).cmp(&order_key(&b.rule, ctx)));
    matches
}

type OrderKey = (bool, i32, Option<DateTime<Utc>>, i32, DateTime<Utc>, Uuid);

fn order_key(rule: &QuickResponse, ctx: &MatchContext<'_>) -> OrderKey {
    let category = rule.category_id.and_then(|id| ctx.categories.get(&id));
    (
        category.is_none(),
        category.map_or(0, |c| c.ordinal),
        category.map(|c| c.created_at),
        rule.ordinal,
        rule.created_at,
        rule.id,
    )
}

/// Apply one rule's trigger policy to the event.
fn evaluate(event: &TriggerEvent, rule: &QuickResponse, ctx: &MatchContext<'_>) -> Option<MatchReason> {
    if event.kind == InvocationKind::Manual {
        return (event.rule_id == Some(rule.id)).then_some(MatchReason::Manual);
    }

    match (rule.trigger_type, event.kind) {
        (TriggerType::FirstMessage, InvocationKind::InboundMessage) => {
            event.first_message.then_some(MatchReason::FirstMessage)
        }
        (TriggerType::Keyword, InvocationKind::InboundMessage) => {
            let text = event.text.as_deref()?;
            keyword_hit(text, rule.normalized_keywords()).map(MatchReason::Keyword)
        }
        (TriggerType::Schedule, InvocationKind::ClockTick) => {
            let window = TimeWindow::from_value(rule.schedule_config.as_ref()?).ok()?;
            let occurrence = window.occurrence_start(event.timestamp)?;
            // One run per window occurrence.
            match ctx.last_completed.get(&rule.id) {
                Some(last) if *last >= occurrence => None,
                _ => Some(MatchReason::TimeWindow),
            }
        }
        (TriggerType::Interval, InvocationKind::ClockTick) => {
            let spec = IntervalSpec::from_value(rule.schedule_config.as_ref()?).ok()?;
            match ctx.last_completed.get(&rule.id) {
                Some(last) if event.timestamp - *last <= spec.duration() => None,
                _ => Some(MatchReason::Interval),
            }
        }
        _ => None,
    }
}

/// First keyword found in `text` as a case-insensitive substring.
pub fn keyword_hit<'k>(text: &str, keywords: impl IntoIterator<Item = &'k str>) -> Option<String> {
    let haystack = text.to_lowercase();
    keywords
        .into_iter()
        .find(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
        .map(String::from)
}
