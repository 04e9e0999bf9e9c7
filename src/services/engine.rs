//! Automation engine: wires Trigger Matcher, Run Scheduler and Action
//! Executor together and owns the background clock.
//!
//! Every scheduled run executes on its own tokio task; the engine only
//! waits for scheduling, never for execution.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::db::{ConversationHistory, RunRepository};
use crate::errors::AppError;
use crate::models::action::Action;
use crate::models::response::QuickResponse;
use crate::models::run::{Run, RunState};
use crate::services::executor::ActionExecutor;
use crate::services::rule_store::RuleStore;
use crate::services::scheduler::{RunScheduler, ScheduledRun};
use crate::services::trigger::{match_event, InvocationKind, MatchContext, TriggerEvent};

/// A run created in response to an event.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledSummary {
    pub run_id: Uuid,
    pub rule_id: Uuid,
    pub reason: String,
}

/// A matched rule that did not get a run.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedSummary {
    pub rule_id: Uuid,
    pub reason: String,
}

/// What one event produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventOutcome {
    pub first_message: bool,
    pub matched: usize,
    pub scheduled: Vec<ScheduledSummary>,
    pub skipped: Vec<SkippedSummary>,
}

pub struct AutomationEngine {
    rules: RuleStore,
    scheduler: RunScheduler,
    executor: ActionExecutor,
    runs: Arc<dyn RunRepository>,
    history: Arc<dyn ConversationHistory>,
    tasks: TaskTracker,
}

impl AutomationEngine {
    pub fn new(
        rules: RuleStore,
        executor: ActionExecutor,
        runs: Arc<dyn RunRepository>,
        history: Arc<dyn ConversationHistory>,
    ) -> Self {
        Self {
            rules,
            scheduler: RunScheduler::new(runs.clone()),
            executor,
            runs,
            history,
            tasks: TaskTracker::new(),
        }
    }

    pub fn scheduler(&self) -> &RunScheduler {
        &self.scheduler
    }

    /// Record an inbound message and evaluate it against the live rules.
    pub async fn inbound_message(
        self: &Arc<Self>,
        conversation_id: &str,
        text: &str,
        owner_id: Option<Uuid>,
    ) -> Result<EventOutcome, AppError> {
        let now = Utc::now();
        let first_message = self.history.record_inbound(conversation_id, now).await?;

        let mut event = TriggerEvent::inbound(conversation_id, text, first_message);
        event.owner_id = owner_id;
        event.timestamp = now;

        let mut outcome = self.handle_event(&event).await?;
        outcome.first_message = first_message;
        Ok(outcome)
    }

    /// Match an event and schedule a run for every match.
    ///
    /// All matches run independently. Pairs already in flight and rules
    /// paused in the meantime are reported as skipped, not as errors.
    pub async fn handle_event(self: &Arc<Self>, event: &TriggerEvent) -> Result<EventOutcome, AppError> {
        let (rules, categories) = tokio::try_join!(
            self.rules.live_responses(event.owner_id),
            self.rules.list_categories(event.owner_id),
        )?;
        let last_completed = if event.kind == InvocationKind::ClockTick {
            self.runs.last_completed_runs(&event.conversation_id).await?
        } else {
            Default::default()
        };

        let ctx = MatchContext::new(&categories, last_completed);
        let matches = match_event(event, &rules, &ctx);

        let mut outcome = EventOutcome {
            matched: matches.len(),
            ..Default::default()
        };

        for m in matches {
            let reason = m.reason.to_string();
            match self
                .schedule_checked(&m.rule, &event.conversation_id, &reason, event.timestamp)
                .await
            {
                Ok(scheduled) => {
                    outcome.scheduled.push(ScheduledSummary {
                        run_id: scheduled.run.id,
                        rule_id: m.rule.id,
                        reason,
                    });
                    self.spawn_run(scheduled, m.rule.actions);
                }
                Err(e @ (AppError::AlreadyRunning(_) | AppError::Paused(_) | AppError::NotFound(_))) => {
                    outcome.skipped.push(SkippedSummary {
                        rule_id: m.rule.id,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!(
                        rule_id = %m.rule.id,
                        conversation_id = %event.conversation_id,
                        error = %e,
                        "Failed to schedule run"
                    );
                    outcome.skipped.push(SkippedSummary {
                        rule_id: m.rule.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if outcome.matched > 0 {
            tracing::debug!(
                conversation_id = %event.conversation_id,
                kind = ?event.kind,
                matched = outcome.matched,
                scheduled = outcome.scheduled.len(),
                "Event evaluated"
            );
        }
        Ok(outcome)
    }

    /// Manual "execute now" of one rule against a conversation.
    pub async fn execute_now(
        self: &Arc<Self>,
        rule_id: Uuid,
        conversation_id: &str,
        owner_id: Option<Uuid>,
    ) -> Result<Run, AppError> {
        let rule = self.rules.get_response(rule_id, owner_id).await?;
        let event = TriggerEvent::manual(conversation_id, rule_id);
        let matched = match_event(&event, std::slice::from_ref(&rule), &MatchContext::default())
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Paused(format!("Rule {rule_id} is paused or inactive")))?;

        let scheduled = self
            .schedule_checked(
                &rule,
                conversation_id,
                &matched.reason.to_string(),
                event.timestamp,
            )
            .await?;
        let run = scheduled.run.clone();
        self.spawn_run(scheduled, rule.actions);
        Ok(run)
    }

    /// Evaluate a clock tick against every open conversation.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Result<usize, AppError> {
        let conversations = self.history.open_conversations().await?;
        let mut scheduled = 0;
        for conversation_id in conversations {
            let event = TriggerEvent::clock_tick(&conversation_id, now);
            match self.handle_event(&event).await {
                Ok(outcome) => scheduled += outcome.scheduled.len(),
                Err(e) => tracing::error!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Clock tick evaluation failed"
                ),
            }
        }
        Ok(scheduled)
    }

    /// Emit clock ticks every `period` until `shutdown` fires.
    pub fn spawn_clock(self: &Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        match engine.tick(Utc::now()).await {
                            Ok(0) => {}
                            Ok(scheduled) => tracing::info!(scheduled, "Clock tick scheduled runs"),
                            Err(e) => tracing::error!(error = %e, "Clock tick failed"),
                        }
                    }
                }
            }
            tracing::info!("Clock stopped");
        })
    }

    /// Delete a rule and cancel its in-flight runs.
    pub async fn delete_rule(&self, rule_id: Uuid, owner_id: Option<Uuid>) -> Result<usize, AppError> {
        self.rules.delete_response(rule_id, owner_id).await?;
        Ok(self.cancel_rule(rule_id))
    }

    /// Cancel in-flight runs of a rule at their next action boundary.
    pub fn cancel_rule(&self, rule_id: Uuid) -> usize {
        let cancelled = self.scheduler.cancel_rule(rule_id);
        if cancelled > 0 {
            tracing::info!(rule_id = %rule_id, cancelled, "Cancelling runs of rule");
        }
        cancelled
    }

    /// End a conversation and cancel its in-flight runs.
    ///
    /// Fails with `NotFound` when the conversation was never seen and had
    /// nothing in flight.
    pub async fn end_conversation(&self, conversation_id: &str) -> Result<usize, AppError> {
        let known = self
            .history
            .end_conversation(conversation_id, Utc::now())
            .await?;
        let cancelled = self.scheduler.cancel_conversation(conversation_id);
        if !known && cancelled == 0 {
            return Err(AppError::NotFound(format!(
                "Conversation {conversation_id} not found"
            )));
        }
        tracing::info!(conversation_id, cancelled, "Conversation ended");
        Ok(cancelled)
    }

    /// Re-enter persisted `Pending`/`Running` runs at their cursor.
    ///
    /// Runs whose rule no longer exists are cancelled.
    pub async fn resume_incomplete(self: &Arc<Self>) -> Result<usize, AppError> {
        let incomplete = self.runs.incomplete_runs().await?;
        let mut resumed = 0;

        for mut run in incomplete {
            let rule = match self.rules.get_response(run.rule_id, None).await {
                Ok(rule) => rule,
                Err(e) if e.is_not_found() => {
                    run.transition(RunState::Cancelled)?;
                    self.runs.save_run(&run).await?;
                    tracing::warn!(run_id = %run.id, rule_id = %run.rule_id, "Rule gone, run cancelled");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let Some(cancel) = self.scheduler.claim(&run) else {
                tracing::warn!(run_id = %run.id, "Pair already claimed, run left for later");
                continue;
            };

            tracing::info!(run_id = %run.id, cursor = run.cursor, "Resuming run");
            self.spawn_run(ScheduledRun { run, cancel }, rule.actions);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Stop accepting runs and wait up to `grace` for running ones.
    /// Returns `true` when every run finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tasks.close();
        tokio::time::timeout(grace, self.tasks.wait()).await.is_ok()
    }

    pub fn running_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Claim a run, then confirm the rule and the conversation survived
    /// matching. A delete or end that lands before the claim exists finds
    /// nothing to cancel, so the recheck runs after it; the run is
    /// withdrawn as `Cancelled` when either went away.
    async fn schedule_checked(
        &self,
        rule: &QuickResponse,
        conversation_id: &str,
        reason: &str,
        event_at: DateTime<Utc>,
    ) -> Result<ScheduledRun, AppError> {
        let mut scheduled = self.scheduler.schedule(rule, conversation_id, reason).await?;
        let refusal = match self.still_eligible(rule.id, conversation_id, event_at).await {
            Ok(None) => return Ok(scheduled),
            Ok(Some(refusal)) => refusal,
            Err(e) => e,
        };

        scheduled.run.transition(RunState::Cancelled)?;
        let saved = self.runs.save_run(&scheduled.run).await;
        self.scheduler.release(&scheduled.run);
        saved?;
        tracing::info!(
            run_id = %scheduled.run.id,
            rule_id = %rule.id,
            conversation_id,
            reason = %refusal,
            "Run withdrawn before start"
        );
        Err(refusal)
    }

    async fn still_eligible(
        &self,
        rule_id: Uuid,
        conversation_id: &str,
        event_at: DateTime<Utc>,
    ) -> Result<Option<AppError>, AppError> {
        if self.history.ended_since(conversation_id, event_at).await? {
            return Ok(Some(AppError::NotFound(format!(
                "Conversation {conversation_id} has ended"
            ))));
        }
        match self.rules.get_response(rule_id, None).await {
            Ok(rule) if rule.is_live() => Ok(None),
            Ok(_) => Ok(Some(AppError::Paused(format!(
                "Rule {rule_id} is paused or inactive"
            )))),
            Err(e) if e.is_not_found() => Ok(Some(AppError::NotFound(format!(
                "Rule {rule_id} was deleted"
            )))),
            Err(e) => Err(e),
        }
    }

    fn spawn_run(self: &Arc<Self>, scheduled: ScheduledRun, actions: Vec<Action>) {
        let engine = Arc::clone(self);
        self.tasks.spawn(async move {
            let ScheduledRun { run, cancel } = scheduled;
            let claim = run.clone();
            match engine.executor.run(run, &actions, &cancel).await {
                Ok(finished) => tracing::debug!(
                    run_id = %finished.id,
                    state = ?finished.state,
                    "Run finished"
                ),
                Err(e) => tracing::error!(
                    run_id = %claim.id,
                    error = %e,
                    "Run aborted by persistence failure"
                ),
            }
            engine.scheduler.release(&claim);
        });
    }
}
