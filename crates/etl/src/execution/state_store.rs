//! Durable execution state.
//!
//! The in-memory registry is lost on restart. The state store keeps what is
//! needed to resume: attempt counts, last status and the due time of a
//! scheduled retry, plus the one-shot materialization claim per request.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use log::warn;

use crate::errors::Result;
use crate::models::{ExecutionDescriptor, ExecutionOutcome, ExecutionPlan, ExecutionStatus};

/// Persisted state of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionState {
    pub descriptor: ExecutionDescriptor,
    pub attempts: u32,
    pub status: ExecutionStatus,
    pub last_error: Option<String>,
    /// When a `WAITING` execution should run again (UTC).
    pub retry_due_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

impl ExecutionState {
    pub fn pending(descriptor: ExecutionDescriptor) -> Self {
        Self {
            descriptor,
            attempts: 0,
            status: ExecutionStatus::Pending,
            last_error: None,
            retry_due_at: None,
            updated_at: Utc::now().naive_utc(),
        }
    }
}

#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    /// Persists every execution of the plan as `PENDING`. Executions already
    /// present are left unchanged.
    async fn register(&self, plan: &ExecutionPlan) -> Result<()>;

    /// Marks the execution `IN_PROGRESS`, increments its attempt counter and
    /// returns the new attempt number (1 for the first attempt).
    ///
    /// Returns `None` when the execution is not tracked (never registered or
    /// already forgotten). Nothing is written in that case.
    async fn begin_attempt(&self, descriptor: &ExecutionDescriptor) -> Result<Option<u32>>;

    /// Records the outcome of the current attempt. Returns false, writing
    /// nothing, when the execution is not tracked.
    async fn record_outcome(
        &self,
        outcome: &ExecutionOutcome,
        retry_due_at: Option<NaiveDateTime>,
    ) -> Result<bool>;

    async fn load_all(&self) -> Result<Vec<ExecutionState>>;

    /// Returns true for the first caller only, for a given request id.
    async fn claim_materialization(&self, request_id: &str) -> Result<bool>;

    /// Drops execution states of a finished request. Claims are kept.
    async fn forget(&self, request_id: &str) -> Result<()>;
}

type StateKey = (String, String);

/// Process-local state store for tests and single-run tools.
#[derive(Default)]
pub struct InMemoryExecutionStateStore {
    states: Mutex<HashMap<StateKey, ExecutionState>>,
    claims: Mutex<HashSet<String>>,
}

impl InMemoryExecutionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<StateKey, ExecutionState>> {
        self.states.lock().unwrap_or_else(|poisoned| {
            warn!("Execution state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_claims(&self) -> MutexGuard<'_, HashSet<String>> {
        self.claims.lock().unwrap_or_else(|poisoned| {
            warn!("Materialization claims mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, request_id: &str, source_id: &str) -> Option<ExecutionState> {
        self.lock_states()
            .get(&(request_id.to_string(), source_id.to_string()))
            .cloned()
    }
}

fn key(descriptor: &ExecutionDescriptor) -> StateKey {
    (descriptor.request_id.clone(), descriptor.source_id.clone())
}

#[async_trait]
impl ExecutionStateStore for InMemoryExecutionStateStore {
    async fn register(&self, plan: &ExecutionPlan) -> Result<()> {
        let mut states = self.lock_states();
        for descriptor in &plan.executions {
            states
                .entry(key(descriptor))
                .or_insert_with(|| ExecutionState::pending(descriptor.clone()));
        }
        Ok(())
    }

    async fn begin_attempt(&self, descriptor: &ExecutionDescriptor) -> Result<Option<u32>> {
        let mut states = self.lock_states();
        let Some(state) = states.get_mut(&key(descriptor)) else {
            return Ok(None);
        };
        state.attempts += 1;
        state.status = ExecutionStatus::InProgress;
        state.retry_due_at = None;
        state.updated_at = Utc::now().naive_utc();
        Ok(Some(state.attempts))
    }

    async fn record_outcome(
        &self,
        outcome: &ExecutionOutcome,
        retry_due_at: Option<NaiveDateTime>,
    ) -> Result<bool> {
        let mut states = self.lock_states();
        let Some(state) = states.get_mut(&key(&outcome.descriptor)) else {
            return Ok(false);
        };
        state.status = outcome.status;
        state.last_error = outcome.error_message.clone();
        state.retry_due_at = retry_due_at;
        state.updated_at = Utc::now().naive_utc();
        Ok(true)
    }

    async fn load_all(&self) -> Result<Vec<ExecutionState>> {
        let mut all: Vec<_> = self.lock_states().values().cloned().collect();
        all.sort_by(|a, b| {
            (&a.descriptor.request_id, &a.descriptor.source_id)
                .cmp(&(&b.descriptor.request_id, &b.descriptor.source_id))
        });
        Ok(all)
    }

    async fn claim_materialization(&self, request_id: &str) -> Result<bool> {
        Ok(self.lock_claims().insert(request_id.to_string()))
    }

    async fn forget(&self, request_id: &str) -> Result<()> {
        self.lock_states()
            .retain(|(request, _), _| request.as_str() != request_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventWindow, Marketplace, MarketplaceEvent};
    use chrono::NaiveDate;

    fn descriptor(source: &str) -> ExecutionDescriptor {
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        ExecutionDescriptor {
            request_id: "req".into(),
            account_id: 1,
            event: MarketplaceEvent::FactFinance,
            window: EventWindow::new(day, day).unwrap(),
            marketplace: Marketplace::Ozon,
            source_id: source.into(),
            raw_table: "raw_ozon_finance".into(),
        }
    }

    #[tokio::test]
    async fn attempts_survive_register_and_count_up() {
        let store = InMemoryExecutionStateStore::new();
        let d = descriptor("finance");
        let plan = ExecutionPlan {
            request_id: "req".into(),
            account_id: 1,
            event: d.event,
            window: d.window,
            executions: vec![d.clone()],
        };
        store.register(&plan).await.unwrap();
        assert_eq!(store.begin_attempt(&d).await.unwrap(), Some(1));
        assert_eq!(store.begin_attempt(&d).await.unwrap(), Some(2));

        store.register(&plan).await.unwrap();
        let state = store.get("req", "finance").unwrap();
        assert_eq!(state.attempts, 2);
        assert_eq!(state.status, ExecutionStatus::InProgress);
    }

    fn plan_of(descriptors: Vec<ExecutionDescriptor>) -> ExecutionPlan {
        let first = descriptors[0].clone();
        ExecutionPlan {
            request_id: first.request_id,
            account_id: first.account_id,
            event: first.event,
            window: first.window,
            executions: descriptors,
        }
    }

    #[tokio::test]
    async fn records_waiting_with_due_time() {
        let store = InMemoryExecutionStateStore::new();
        let d = descriptor("finance");
        store.register(&plan_of(vec![d.clone()])).await.unwrap();
        store.begin_attempt(&d).await.unwrap();
        let due = Utc::now().naive_utc() + chrono::Duration::seconds(30);
        let outcome = ExecutionOutcome::waiting(
            d.clone(),
            std::time::Duration::from_secs(30),
            "HTTP 503".into(),
        );
        assert!(store.record_outcome(&outcome, Some(due)).await.unwrap());

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ExecutionStatus::Waiting);
        assert_eq!(all[0].retry_due_at, Some(due));
        assert_eq!(all[0].last_error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn claims_are_one_shot_and_survive_forget() {
        let store = InMemoryExecutionStateStore::new();
        store.register(&plan_of(vec![descriptor("a")])).await.unwrap();
        assert!(store.claim_materialization("req").await.unwrap());
        assert!(!store.claim_materialization("req").await.unwrap());

        store.forget("req").await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(!store.claim_materialization("req").await.unwrap());
    }

    #[tokio::test]
    async fn untracked_executions_are_not_recreated() {
        let store = InMemoryExecutionStateStore::new();
        let d = descriptor("finance");
        assert_eq!(store.begin_attempt(&d).await.unwrap(), None);

        store.register(&plan_of(vec![d.clone()])).await.unwrap();
        store.forget("req").await.unwrap();
        let late = ExecutionOutcome::success(d.clone(), 3);
        assert!(!store.record_outcome(&late, None).await.unwrap());
        assert_eq!(store.begin_attempt(&d).await.unwrap(), None);
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
