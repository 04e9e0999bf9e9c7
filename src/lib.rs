pub mod config;
pub mod db;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use sqlx::PgPool;

use crate::db::{ConversationHistory, RuleRepository, RunRepository};
use crate::services::delivery::DeliveryChannel;
use crate::services::engine::AutomationEngine;
use crate::services::executor::ActionExecutor;
use crate::services::rule_store::RuleStore;

/// Shared application state passed to all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: RuleStore,
    pub engine: Arc<AutomationEngine>,
    pub runs: Arc<dyn RunRepository>,
    /// Present when running against PostgreSQL; used by readiness checks.
    pub db: Option<PgPool>,
    pub config: config::AppConfig,
}

impl AppState {
    /// Wire the rule store, engine and run history over one storage backend.
    pub fn new<B>(
        backend: Arc<B>,
        db: Option<PgPool>,
        channel: Arc<dyn DeliveryChannel>,
        config: config::AppConfig,
    ) -> Self
    where
        B: RuleRepository + RunRepository + ConversationHistory + 'static,
    {
        let store = RuleStore::new(backend.clone());
        let runs: Arc<dyn RunRepository> = backend.clone();
        let history: Arc<dyn ConversationHistory> = backend;
        let executor = ActionExecutor::new(channel, runs.clone(), config.retry_policy());
        let engine = Arc::new(AutomationEngine::new(
            store.clone(),
            executor,
            runs.clone(),
            history,
        ));

        Self {
            store,
            engine,
            runs,
            db,
            config,
        }
    }
}
