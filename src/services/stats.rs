//! Execution statistics for the administration overview.

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::RunRepository;
use crate::errors::AppError;
use crate::services::rule_store::RuleStore;

/// Counts shown on the quick responses overview.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionStats {
    pub categories: i64,
    pub rules: i64,
    pub active_rules: i64,
    pub total_runs: i64,
    pub runs_today: i64,
}

/// Fetch all statistics concurrently. "Today" starts at UTC midnight of `now`.
pub async fn get_stats(
    rules: &RuleStore,
    runs: &dyn RunRepository,
    owner_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<ExecutionStats, AppError> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();

    let (counts, total_runs, runs_today) = tokio::try_join!(
        rules.counts(owner_id),
        runs.count_runs(owner_id, None),
        runs.count_runs(owner_id, Some(midnight)),
    )?;

    Ok(ExecutionStats {
        categories: counts.categories,
        rules: counts.rules,
        active_rules: counts.active_rules,
        total_runs,
        runs_today,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};

    use crate::db::MemoryStore;
    use crate::models::run::Run;

    #[tokio::test]
    async fn counts_runs_today_from_midnight() {
        let store = Arc::new(MemoryStore::new());
        let rules = RuleStore::new(store.clone());
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        let owner = Uuid::from_u128(7);

        for (offset_hours, conv) in [(-20, "a"), (-2, "b"), (-1, "c")] {
            let mut run = Run::new(Uuid::new_v4(), conv, owner, "manual");
            run.started_at = now + Duration::hours(offset_hours);
            store.save_run(&run).await.unwrap();
        }
        // Another owner's run is not counted.
        store
            .save_run(&Run::new(Uuid::new_v4(), "d", Uuid::from_u128(8), "manual"))
            .await
            .unwrap();

        let stats = get_stats(&rules, store.as_ref(), Some(owner), now).await.unwrap();
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.runs_today, 2);
        assert_eq!(stats.rules, 0);
    }
}
