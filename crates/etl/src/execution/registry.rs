//! In-memory per-request execution tracking.
//!
//! Each request owns an [`EventState`] behind its own lock, so reports for
//! different requests never contend and reports for the same request are
//! applied one at a time. Callers only ever see [`EventAggregation`] values.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, Utc};
use log::{debug, warn};

use super::EventStatusPolicy;
use crate::models::{
    EventAggregation, EventWindow, ExecutionOutcome, ExecutionPlan, ExecutionStatus,
    MarketplaceEvent,
};

#[derive(Debug)]
struct EventState {
    request_id: String,
    account_id: i64,
    event: MarketplaceEvent,
    window: EventWindow,
    statuses: BTreeMap<String, ExecutionStatus>,
    failed_sources: BTreeSet<String>,
    /// Set on the first `SUCCESS`, never cleared.
    has_data: bool,
    finalized: bool,
    started_at: NaiveDateTime,
    touched_at: Instant,
}

impl EventState {
    fn from_plan(plan: &ExecutionPlan) -> Self {
        Self {
            request_id: plan.request_id.clone(),
            account_id: plan.account_id,
            event: plan.event,
            window: plan.window,
            statuses: plan
                .executions
                .iter()
                .map(|d| (d.source_id.clone(), ExecutionStatus::Pending))
                .collect(),
            failed_sources: BTreeSet::new(),
            has_data: false,
            finalized: false,
            started_at: Utc::now().naive_utc(),
            touched_at: Instant::now(),
        }
    }

    fn apply(&mut self, source_id: &str, status: ExecutionStatus) {
        self.statuses.insert(source_id.to_string(), status);
        match status {
            ExecutionStatus::Error => {
                self.failed_sources.insert(source_id.to_string());
            }
            ExecutionStatus::Success => self.has_data = true,
            _ => {}
        }
        self.touched_at = Instant::now();
    }

    fn aggregation(&self) -> EventAggregation {
        EventAggregation {
            request_id: self.request_id.clone(),
            account_id: self.account_id,
            event: self.event,
            window: self.window,
            status: EventStatusPolicy::resolve(self.statuses.values().copied()),
            execution_statuses: self.statuses.clone(),
            failed_sources: self.failed_sources.clone(),
            has_data: self.has_data,
            started_at: self.started_at,
        }
    }

    fn all_terminal(&self) -> bool {
        self.statuses.values().all(|s| s.is_terminal())
    }
}

#[derive(Default)]
pub struct ExecutionRegistry {
    states: Mutex<HashMap<String, Arc<Mutex<EventState>>>>,
}

fn lock_state(state: &Mutex<EventState>) -> MutexGuard<'_, EventState> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!("Event state mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<EventState>>>> {
        self.states.lock().unwrap_or_else(|poisoned| {
            warn!("Execution registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn state(&self, request_id: &str) -> Option<Arc<Mutex<EventState>>> {
        self.lock_states().get(request_id).cloned()
    }

    /// Seeds every source of the plan as `PENDING`.
    ///
    /// Returns `None` and leaves the existing state untouched when the
    /// request id is already tracked. Check and insert happen under one lock.
    pub fn register_plan(&self, plan: &ExecutionPlan) -> Option<EventAggregation> {
        let mut states = self.lock_states();
        if states.contains_key(&plan.request_id) {
            return None;
        }
        let state = EventState::from_plan(plan);
        let aggregation = state.aggregation();
        states.insert(plan.request_id.clone(), Arc::new(Mutex::new(state)));
        debug!(
            "Registered plan {} with {} executions",
            plan.request_id,
            plan.executions.len()
        );
        Some(aggregation)
    }

    /// Rebuilds a request from persisted execution statuses.
    pub fn restore(
        &self,
        plan: &ExecutionPlan,
        statuses: &HashMap<String, ExecutionStatus>,
    ) -> EventAggregation {
        let mut state = EventState::from_plan(plan);
        for (source_id, status) in statuses {
            if state.statuses.contains_key(source_id) {
                state.apply(source_id, *status);
            }
        }
        let aggregation = state.aggregation();
        self.lock_states()
            .insert(plan.request_id.clone(), Arc::new(Mutex::new(state)));
        aggregation
    }

    /// Applies one outcome and returns the recomputed aggregation.
    ///
    /// Returns `None` when the request is unknown (late or duplicate report
    /// after cleanup) or the source is not part of the request.
    pub fn update(&self, outcome: &ExecutionOutcome) -> Option<EventAggregation> {
        let descriptor = &outcome.descriptor;
        let Some(state) = self.state(&descriptor.request_id) else {
            debug!(
                "Ignoring {} for unknown request {}",
                outcome.status,
                descriptor.label()
            );
            return None;
        };
        let mut state = lock_state(&state);
        if !state.statuses.contains_key(&descriptor.source_id) {
            warn!(
                "Ignoring {} for source {} which is not part of request {}",
                outcome.status, descriptor.source_id, descriptor.request_id
            );
            return None;
        }
        state.apply(&descriptor.source_id, outcome.status);
        Some(state.aggregation())
    }

    /// Marks the request finalized and returns its aggregation, exactly once,
    /// as soon as every execution is terminal.
    pub fn try_finalize(&self, request_id: &str) -> Option<EventAggregation> {
        let state = self.state(request_id)?;
        let mut state = lock_state(&state);
        if state.finalized || !state.all_terminal() {
            return None;
        }
        state.finalized = true;
        Some(state.aggregation())
    }

    pub fn get(&self, request_id: &str) -> Option<EventAggregation> {
        let state = self.state(request_id)?;
        let aggregation = lock_state(&state).aggregation();
        Some(aggregation)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.lock_states().contains_key(request_id)
    }

    pub fn remove(&self, request_id: &str) -> bool {
        self.lock_states().remove(request_id).is_some()
    }

    /// Drops requests not updated within `ttl`. Returns how many were evicted.
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        let mut states = self.lock_states();
        let before = states.len();
        states.retain(|request_id, state| {
            let keep = lock_state(state).touched_at.elapsed() <= ttl;
            if !keep {
                warn!("Evicting stale request {}", request_id);
            }
            keep
        });
        before - states.len()
    }

    pub fn len(&self) -> usize {
        self.lock_states().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
