//! Action Executor: drives one run through its actions in ordinal order.
//!
//! Actions are dispatched one at a time. The cursor is persisted after every
//! step, so a run interrupted by a restart re-enters at the first action it
//! has not finished. Dispatches carry an idempotency key derived from
//! `(run id, ordinal)`, which makes re-sending an unacknowledged action safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::db::RunRepository;
use crate::errors::AppError;
use crate::models::action::{Action, ActionPayload};
use crate::models::run::{Run, RunState};
use crate::services::delivery::{DeliveryChannel, DeliveryRequest, DispatchError, OutboundContent};

/// Bounded retry for a single dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per action, first try included.
    pub max_attempts: u32,
    /// Wait before the second attempt; doubled for each further attempt.
    pub base_backoff: Duration,
    pub dispatch_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            dispatch_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Backoff after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << exponent)
    }
}

pub struct ActionExecutor {
    channel: Arc<dyn DeliveryChannel>,
    runs: Arc<dyn RunRepository>,
    retry: RetryPolicy,
}

enum Step {
    Advance,
    Cancelled,
    Failed(String),
}

impl ActionExecutor {
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        runs: Arc<dyn RunRepository>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            channel,
            runs,
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Execute `run` to a terminal state and return it.
    ///
    /// `actions` is the rule's action list as it was when the run started.
    /// Cancellation is honored at every action boundary and during delays;
    /// a dispatch already under way is allowed to finish. Delivery failures
    /// end the run as `Failed`.
    ///
    /// A failed save mid-run also ends it as `Failed`, so the stored record
    /// does not keep its (rule, conversation) pair claimed. The error is
    /// returned only when that final save fails too.
    pub async fn run(
        &self,
        mut run: Run,
        actions: &[Action],
        cancel: &CancellationToken,
    ) -> Result<Run, AppError> {
        if run.state.is_terminal() {
            return Ok(run);
        }
        match self.drive(&mut run, actions, cancel).await {
            Ok(()) => Ok(run),
            Err(e) => {
                tracing::error!(
                    run_id = %run.id,
                    rule_id = %run.rule_id,
                    cursor = run.cursor,
                    error = %e,
                    "Run state could not be saved"
                );
                if !run.state.is_terminal() {
                    run.fail(format!("run state could not be persisted: {e}"))?;
                }
                self.runs.save_run(&run).await?;
                Ok(run)
            }
        }
    }

    async fn drive(
        &self,
        run: &mut Run,
        actions: &[Action],
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        if run.state == RunState::Pending {
            run.transition(RunState::Running)?;
            self.runs.save_run(run).await?;
        }

        let mut pending: Vec<&Action> = actions.iter().filter(|a| a.ordinal >= run.cursor).collect();
        pending.sort_by_key(|a| a.ordinal);

        tracing::info!(
            run_id = %run.id,
            rule_id = %run.rule_id,
            conversation_id = %run.conversation_id,
            cursor = run.cursor,
            remaining = pending.len(),
            "Run started"
        );

        for action in pending {
            if cancel.is_cancelled() {
                return self.finish_cancelled(run).await;
            }

            match self.step(run, action, cancel).await {
                Step::Advance => {
                    run.cursor = action.ordinal + 1;
                    run.last_action_at = Some(Utc::now());
                    self.runs.save_run(run).await?;
                }
                Step::Cancelled => return self.finish_cancelled(run).await,
                Step::Failed(reason) => {
                    tracing::error!(
                        run_id = %run.id,
                        rule_id = %run.rule_id,
                        ordinal = action.ordinal,
                        error = %reason,
                        "Run failed"
                    );
                    run.fail(reason)?;
                    return self.runs.save_run(run).await;
                }
            }
        }

        run.transition(RunState::Completed)?;
        self.runs.save_run(run).await?;
        tracing::info!(run_id = %run.id, rule_id = %run.rule_id, "Run completed");
        Ok(())
    }

    async fn step(&self, run: &Run, action: &Action, cancel: &CancellationToken) -> Step {
        if !action.is_active {
            tracing::debug!(run_id = %run.id, ordinal = action.ordinal, "Skipping inactive action");
            return Step::Advance;
        }

        let payload = match action.payload() {
            Ok(p) => p,
            Err(e) => return Step::Failed(format!("action {} has invalid content: {e}", action.ordinal)),
        };

        if let ActionPayload::Delay(delay) = &payload {
            let duration = Duration::from_millis(delay.duration_ms);
            return tokio::select! {
                _ = tokio::time::sleep(duration) => Step::Advance,
                _ = cancel.cancelled() => Step::Cancelled,
            };
        }

        let Some(content) = OutboundContent::render(payload) else {
            return Step::Advance;
        };
        let request = DeliveryRequest {
            run_id: run.id,
            ordinal: action.ordinal,
            conversation_id: run.conversation_id.clone(),
            content,
        };

        match self.dispatch(&request).await {
            Ok(()) => Step::Advance,
            Err((attempts, e)) => Step::Failed(format!(
                "action {} failed after {attempts} attempt(s): {e}",
                action.ordinal
            )),
        }
    }

    /// Send with timeout and bounded retry. On failure returns the number of
    /// attempts made and the last error.
    async fn dispatch(&self, request: &DeliveryRequest) -> Result<(), (u32, DispatchError)> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome =
                match tokio::time::timeout(self.retry.dispatch_timeout, self.channel.send(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(DispatchError::Timeout(self.retry.dispatch_timeout)),
                };

            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= max_attempts => return Err((attempt, e)),
                Err(e) => {
                    let wait = self.retry.backoff(attempt);
                    tracing::warn!(
                        run_id = %request.run_id,
                        ordinal = request.ordinal,
                        attempt,
                        error = %e,
                        backoff_ms = wait.as_millis() as u64,
                        "Dispatch failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn finish_cancelled(&self, run: &mut Run) -> Result<(), AppError> {
        run.transition(RunState::Cancelled)?;
        self.runs.save_run(run).await?;
        tracing::info!(run_id = %run.id, cursor = run.cursor, "Run cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant;

    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::json;
    use uuid::Uuid;

    use crate::db::MemoryStore;
    use crate::models::action::ActionType;
    use crate::models::pagination::Pagination;
    use crate::models::run::RunFilters;
    use crate::services::delivery::idempotency_key;

    #[derive(Default)]
    struct ScriptedChannel {
        sent: Mutex<Vec<(i32, String, Instant)>>,
        attempts: Mutex<HashMap<i32, u32>>,
        fail_ordinal: Option<i32>,
        stall: Option<Duration>,
    }

    impl ScriptedChannel {
        fn ordinals(&self) -> Vec<i32> {
            self.sent.lock().unwrap().iter().map(|(o, _, _)| *o).collect()
        }

        fn attempts_for(&self, ordinal: i32) -> u32 {
            self.attempts.lock().unwrap().get(&ordinal).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl DeliveryChannel for ScriptedChannel {
        async fn send(&self, request: &DeliveryRequest) -> Result<(), DispatchError> {
            *self.attempts.lock().unwrap().entry(request.ordinal).or_default() += 1;
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.fail_ordinal == Some(request.ordinal) {
                return Err(DispatchError::Rejected("503: unavailable".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((request.ordinal, request.idempotency_key(), Instant::now()));
            Ok(())
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            dispatch_timeout: Duration::from_secs(2),
        }
    }

    fn action(ordinal: i32, action_type: ActionType, content: serde_json::Value) -> Action {
        Action {
            id: Uuid::new_v4(),
            response_id: Uuid::nil(),
            action_type,
            content,
            ordinal,
            is_active: true,
        }
    }

    fn text(ordinal: i32) -> Action {
        action(ordinal, ActionType::Text, json!({"body": format!("msg {ordinal}")}))
    }

    fn delay(ordinal: i32, ms: u64) -> Action {
        action(ordinal, ActionType::Delay, json!({"duration_ms": ms}))
    }

    fn setup(channel: ScriptedChannel, retry: RetryPolicy) -> (ActionExecutor, Arc<ScriptedChannel>, Arc<MemoryStore>) {
        let channel = Arc::new(channel);
        let store = Arc::new(MemoryStore::new());
        let executor = ActionExecutor::new(channel.clone(), store.clone(), retry);
        (executor, channel, store)
    }

    fn new_run() -> Run {
        Run::new(Uuid::new_v4(), "5511988887777", Uuid::nil(), "test")
    }

    #[tokio::test]
    async fn dispatches_in_ordinal_order() {
        let (executor, channel, store) = setup(ScriptedChannel::default(), fast_retry());
        let actions = vec![text(2), text(0), text(1)];

        let run = executor
            .run(new_run(), &actions, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Completed);
        assert_eq!(channel.ordinals(), vec![0, 1, 2]);
        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.state, RunState::Completed);
        assert_eq!(stored.cursor, 3);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn exhausted_retries_fail_run_without_resending_earlier_actions() {
        let channel = ScriptedChannel {
            fail_ordinal: Some(1),
            ..Default::default()
        };
        let (executor, channel, _) = setup(channel, fast_retry());
        let actions = vec![
            text(0),
            action(1, ActionType::Pix, json!({"key": "loja@pix", "amount_cents": 4990})),
            text(2),
        ];

        let run = executor
            .run(new_run(), &actions, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.cursor, 1);
        assert_eq!(channel.attempts_for(0), 1);
        assert_eq!(channel.attempts_for(1), 3);
        assert_eq!(channel.attempts_for(2), 0);
        let reason = run.failure_reason.unwrap();
        assert!(reason.contains("action 1 failed after 3 attempt(s)"), "{reason}");
    }

    #[tokio::test]
    async fn delay_suspends_between_dispatches() {
        let (executor, channel, _) = setup(ScriptedChannel::default(), fast_retry());
        let actions = vec![text(0), delay(1, 60), text(2)];

        let run = executor
            .run(new_run(), &actions, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Completed);
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].2.duration_since(sent[0].2) >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn delay_does_not_block_other_runs() {
        let (executor, channel, _) = setup(ScriptedChannel::default(), fast_retry());
        let executor = Arc::new(executor);

        let slow = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .run(new_run(), &[delay(0, 300), text(1)], &CancellationToken::new())
                    .await
            })
        };
        let started = Instant::now();
        executor
            .run(new_run(), &[text(0)], &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(channel.ordinals(), vec![0]);

        slow.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_at_next_boundary() {
        let (executor, channel, _) = setup(ScriptedChannel::default(), fast_retry());
        let cancel = CancellationToken::new();
        let actions = vec![text(0), delay(1, 5_000), text(2)];

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let run = executor.run(new_run(), &actions, &cancel).await.unwrap();
        assert_eq!(run.state, RunState::Cancelled);
        assert_eq!(run.cursor, 1);
        assert_eq!(channel.ordinals(), vec![0]);
    }

    #[tokio::test]
    async fn resumes_from_cursor_with_stable_keys() {
        let (executor, channel, _) = setup(ScriptedChannel::default(), fast_retry());
        let mut run = new_run();
        run.transition(RunState::Running).unwrap();
        run.cursor = 1;
        let run_id = run.id;

        let run = executor
            .run(run, &[text(0), text(1), text(2)], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Completed);
        let sent = channel.sent.lock().unwrap();
        let ordinals: Vec<i32> = sent.iter().map(|(o, _, _)| *o).collect();
        assert_eq!(ordinals, vec![1, 2]);
        assert_eq!(sent[0].1, idempotency_key(run_id, 1));
    }

    #[tokio::test]
    async fn timeout_counts_as_failed_attempt() {
        let channel = ScriptedChannel {
            stall: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        let retry = RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
            dispatch_timeout: Duration::from_millis(20),
        };
        let (executor, channel, _) = setup(channel, retry);

        let run = executor
            .run(new_run(), &[text(0)], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(channel.attempts_for(0), 2);
        assert!(run.failure_reason.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn inactive_actions_are_skipped() {
        let (executor, channel, _) = setup(ScriptedChannel::default(), fast_retry());
        let mut skipped = text(1);
        skipped.is_active = false;

        let run = executor
            .run(new_run(), &[text(0), skipped, text(2)], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Completed);
        assert_eq!(channel.ordinals(), vec![0, 2]);
        assert_eq!(run.cursor, 3);
    }

    /// Run history that refuses the save recording cursor 1, once.
    struct SaveBlip {
        inner: MemoryStore,
        tripped: Mutex<bool>,
    }

    #[async_trait]
    impl RunRepository for SaveBlip {
        async fn save_run(&self, run: &Run) -> Result<(), AppError> {
            if run.state == RunState::Running && run.cursor == 1 {
                let mut tripped = self.tripped.lock().unwrap();
                if !*tripped {
                    *tripped = true;
                    return Err(AppError::Internal("connection reset".to_string()));
                }
            }
            self.inner.save_run(run).await
        }

        async fn get_run(&self, id: Uuid) -> Result<Option<Run>, AppError> {
            self.inner.get_run(id).await
        }

        async fn list_runs(
            &self,
            filters: &RunFilters,
            pagination: &Pagination,
        ) -> Result<(Vec<Run>, i64), AppError> {
            self.inner.list_runs(filters, pagination).await
        }

        async fn last_completed_runs(
            &self,
            conversation_id: &str,
        ) -> Result<HashMap<Uuid, DateTime<Utc>>, AppError> {
            self.inner.last_completed_runs(conversation_id).await
        }

        async fn incomplete_runs(&self) -> Result<Vec<Run>, AppError> {
            self.inner.incomplete_runs().await
        }

        async fn count_runs(
            &self,
            owner_id: Option<Uuid>,
            since: Option<DateTime<Utc>>,
        ) -> Result<i64, AppError> {
            self.inner.count_runs(owner_id, since).await
        }
    }

    #[tokio::test]
    async fn failed_cursor_save_ends_run_and_frees_pair() {
        let channel = Arc::new(ScriptedChannel::default());
        let store = Arc::new(SaveBlip {
            inner: MemoryStore::new(),
            tripped: Mutex::new(false),
        });
        let executor = ActionExecutor::new(channel.clone(), store.clone(), fast_retry());
        let first = new_run();
        let (rule_id, conversation_id) = (first.rule_id, first.conversation_id.clone());

        let run = executor
            .run(first, &[text(0), text(1)], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(channel.ordinals(), vec![0]);
        assert!(run
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("could not be persisted"));
        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.state, RunState::Failed);
        assert!(store.incomplete_runs().await.unwrap().is_empty());

        let next = Run::new(rule_id, &conversation_id, Uuid::nil(), "test");
        store.save_run(&next).await.unwrap();
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }
}
