//! Run Scheduler: at most one in-flight run per (rule, conversation) pair.
//!
//! The claim is a [`DashMap`] entry keyed by the pair. Taking the entry is
//! the critical section for "check not already running, then create the
//! Pending run"; different pairs land on independent entries and never
//! wait on each other. The database's partial unique index on in-flight
//! runs backs the same guarantee across processes.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::RunRepository;
use crate::errors::AppError;
use crate::models::response::QuickResponse;
use crate::models::run::Run;

type PairKey = (Uuid, String);

#[derive(Debug)]
struct InFlight {
    run_id: Uuid,
    cancel: CancellationToken,
}

/// A freshly claimed run plus the token that cancels it.
#[derive(Debug, Clone)]
pub struct ScheduledRun {
    pub run: Run,
    pub cancel: CancellationToken,
}

pub struct RunScheduler {
    in_flight: DashMap<PairKey, InFlight>,
    runs: Arc<dyn RunRepository>,
}

impl RunScheduler {
    pub fn new(runs: Arc<dyn RunRepository>) -> Self {
        Self {
            in_flight: DashMap::new(),
            runs,
        }
    }

    /// Create a `Pending` run for `rule` in `conversation_id`.
    ///
    /// Fails with [`AppError::Paused`] for a paused or inactive rule and with
    /// [`AppError::AlreadyRunning`] while the pair has a run in flight.
    pub async fn schedule(
        &self,
        rule: &QuickResponse,
        conversation_id: &str,
        reason: &str,
    ) -> Result<ScheduledRun, AppError> {
        if !rule.is_live() {
            return Err(AppError::Paused(format!(
                "Rule {} is paused or inactive",
                rule.id
            )));
        }

        let run = Run::new(rule.id, conversation_id, rule.owner_id, reason);
        let cancel = CancellationToken::new();
        let key = (rule.id, conversation_id.to_string());

        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                tracing::info!(
                    rule_id = %rule.id,
                    conversation_id,
                    in_flight_run = %existing.get().run_id,
                    "Run already in flight, event dropped"
                );
                return Err(AppError::AlreadyRunning(format!(
                    "Rule {} already running in conversation {}",
                    rule.id, conversation_id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    run_id: run.id,
                    cancel: cancel.clone(),
                });
            }
        }

        // Persist after the shard guard is gone; release the claim on failure.
        if let Err(e) = self.runs.save_run(&run).await {
            self.in_flight
                .remove_if(&key, |_, flight| flight.run_id == run.id);
            return Err(e);
        }

        tracing::debug!(run_id = %run.id, rule_id = %rule.id, conversation_id, "Run scheduled");
        Ok(ScheduledRun { run, cancel })
    }

    /// Re-claim a persisted, non-terminal run (restart resume).
    ///
    /// Returns `None` when the pair is already claimed by another run.
    pub fn claim(&self, run: &Run) -> Option<CancellationToken> {
        match self
            .in_flight
            .entry((run.rule_id, run.conversation_id.clone()))
        {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let cancel = CancellationToken::new();
                slot.insert(InFlight {
                    run_id: run.id,
                    cancel: cancel.clone(),
                });
                Some(cancel)
            }
        }
    }

    /// Free the pair once `run` reached a terminal state.
    pub fn release(&self, run: &Run) {
        self.in_flight
            .remove_if(&(run.rule_id, run.conversation_id.clone()), |_, flight| {
                flight.run_id == run.id
            });
    }

    /// Signal cancellation to every in-flight run of `rule_id`.
    pub fn cancel_rule(&self, rule_id: Uuid) -> usize {
        self.cancel_where(|(rule, _)| *rule == rule_id)
    }

    /// Signal cancellation to every in-flight run in `conversation_id`.
    pub fn cancel_conversation(&self, conversation_id: &str) -> usize {
        self.cancel_where(|(_, conversation)| conversation == conversation_id)
    }

    fn cancel_where(&self, predicate: impl Fn(&PairKey) -> bool) -> usize {
        let mut cancelled = 0;
        for entry in self.in_flight.iter().filter(|e| predicate(e.key())) {
            entry.value().cancel.cancel();
            cancelled += 1;
        }
        cancelled
    }

    pub fn is_in_flight(&self, rule_id: Uuid, conversation_id: &str) -> bool {
        self.in_flight
            .contains_key(&(rule_id, conversation_id.to_string()))
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
