//! Structural invariants for quick responses and their actions.
//!
//! Pure checks, no storage access. Every failure names the offending field
//! so the administration surface can show it next to the input.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::errors::AppError;
use crate::models::action::{Action, ActionInput};
use crate::models::response::{QuickResponse, TriggerType};
use crate::models::schedule::{IntervalSpec, TimeWindow};

/// Turn admin-supplied actions into stored actions for `response_id`.
///
/// Missing ordinals take their list position. The result is sorted by
/// ordinal and checked to be a dense zero-based sequence.
pub fn build_actions(response_id: Uuid, inputs: &[ActionInput]) -> Result<Vec<Action>, AppError> {
    let mut actions = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let ordinal = match input.ordinal {
            Some(o) => o,
            None => i32::try_from(index)
                .map_err(|_| AppError::validation("actions", "too many actions"))?,
        };
        actions.push(Action {
            id: Uuid::new_v4(),
            response_id,
            action_type: input.action_type,
            content: input.content.clone(),
            ordinal,
            is_active: input.is_active.unwrap_or(true),
        });
    }
    validate_actions(&actions)?;
    actions.sort_by_key(|a| a.ordinal);
    Ok(actions)
}

/// Check ordinals and payloads of an action list.
pub fn validate_actions(actions: &[Action]) -> Result<(), AppError> {
    let mut seen = BTreeSet::new();
    for (index, action) in actions.iter().enumerate() {
        if action.ordinal < 0 {
            return Err(AppError::validation(
                format!("actions[{index}].ordinal"),
                "action ordinal must not be negative",
            ));
        }
        if !seen.insert(action.ordinal) {
            return Err(AppError::validation(
                format!("actions[{index}].ordinal"),
                format!("duplicate action ordinal {}", action.ordinal),
            ));
        }
        if let Err(reason) = action.payload() {
            return Err(AppError::validation(
                format!("actions[{index}].content"),
                reason,
            ));
        }
    }

    // BTreeSet iterates sorted, so a dense sequence equals 0..len.
    if let Some((expected, _)) = seen
        .iter()
        .enumerate()
        .find(|(expected, ordinal)| **ordinal as usize != *expected)
    {
        return Err(AppError::validation(
            "actions",
            format!("action ordinals must be contiguous from 0; missing {expected}"),
        ));
    }
    Ok(())
}

/// Check every structural invariant of a response before it is written.
pub fn validate_response(response: &QuickResponse) -> Result<(), AppError> {
    if response.title.trim().is_empty() {
        return Err(AppError::validation("title", "title must not be empty"));
    }

    if response.trigger_type == TriggerType::Keyword && response.normalized_keywords().next().is_none()
    {
        return Err(AppError::validation(
            "trigger_keywords",
            "empty trigger set for keyword rule",
        ));
    }

    if response.trigger_type.is_clock_driven() {
        let config = response.schedule_config.as_ref().ok_or_else(|| {
            AppError::validation(
                "schedule_config",
                "schedule configuration is required for scheduled and interval rules",
            )
        })?;
        let parsed = match response.trigger_type {
            TriggerType::Schedule => TimeWindow::from_value(config).map(|_| ()),
            _ => IntervalSpec::from_value(config).map(|_| ()),
        };
        parsed.map_err(|reason| AppError::validation("schedule_config", reason))?;
    }

    if let Some(action) = response.actions.iter().find(|a| a.response_id != response.id) {
        return Err(AppError::validation(
            "actions",
            format!("action {} belongs to another response", action.id),
        ));
    }

    validate_actions(&response.actions)
}
