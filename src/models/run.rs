//! Run model: one execution of a quick response against one conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "run_state")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }
}

/// Check whether a run state transition follows the state machine graph.
pub fn is_valid_transition(from: RunState, to: RunState) -> bool {
    matches!(
        (from, to),
        (RunState::Pending, RunState::Running)
            | (RunState::Pending, RunState::Cancelled)
            | (RunState::Running, RunState::Completed)
            | (RunState::Running, RunState::Failed)
            | (RunState::Running, RunState::Cancelled)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Run {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub conversation_id: String,
    pub owner_id: Uuid,
    /// Ordinal of the next action to execute.
    pub cursor: i32,
    pub state: RunState,
    /// Why the trigger matched (e.g. `keyword "preço"`).
    pub trigger_reason: String,
    pub started_at: DateTime<Utc>,
    pub last_action_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Run {
    pub fn new(
        rule_id: Uuid,
        conversation_id: &str,
        owner_id: Uuid,
        trigger_reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            rule_id,
            conversation_id: conversation_id.to_string(),
            owner_id,
            cursor: 0,
            state: RunState::Pending,
            trigger_reason: trigger_reason.into(),
            started_at: Utc::now(),
            last_action_at: None,
            finished_at: None,
            failure_reason: None,
        }
    }

    /// Move to `to`, stamping `finished_at` on terminal states.
    ///
    /// Terminal states are immutable: any transition out of one fails.
    pub fn transition(&mut self, to: RunState) -> Result<(), AppError> {
        if !is_valid_transition(self.state, to) {
            return Err(AppError::InvalidTransition(format!(
                "Run {} cannot move from {:?} to {:?}",
                self.id, self.state, to
            )));
        }
        self.state = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), AppError> {
        self.transition(RunState::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }
}

/// Filters for the run history query.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunFilters {
    pub owner_id: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub conversation_id: Option<String>,
    pub state: Option<RunState>,
}

impl RunFilters {
    pub fn matches(&self, run: &Run) -> bool {
        self.owner_id.map_or(true, |o| run.owner_id == o)
            && self.rule_id.map_or(true, |r| run.rule_id == r)
            && self
                .conversation_id
                .as_deref()
                .map_or(true, |c| run.conversation_id == c)
            && self.state.map_or(true, |s| run.state == s)
    }
}
