//! The orchestrator: intake, execution dispatch, outcome reporting and
//! finalization of event requests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    AccountConnections, CompletionNotifier, ExecutionPlanFactory, ExecutionQueue, ExecutionWorker,
    SnapshotIngestor,
};
use crate::batch::{EtlBatchDispatcher, RawStore};
use crate::config::EtlConfig;
use crate::errors::{EtlError, Result};
use crate::execution::{
    ExecutionRegistry, ExecutionState, ExecutionStateStore, MaterializationGate,
};
use crate::models::{
    EventAggregation, ExecutionDescriptor, ExecutionOutcome, ExecutionPlan, ExecutionStatus,
    MarketplaceEvent, OrchestrationCommand,
};
use crate::resilience::{ResilienceFactory, RetryDecision};
use crate::sinks::{AuditRecord, AuditSink, MaterializationRequest, Materializer};
use crate::snapshot::SnapshotLayoutRegistry;
use crate::source::SourceRegistry;

/// Collaborators of the orchestrator.
pub struct OrchestratorDeps {
    pub sources: Arc<SourceRegistry>,
    pub connections: Arc<dyn AccountConnections>,
    pub dispatcher: Arc<EtlBatchDispatcher>,
    pub layouts: Arc<SnapshotLayoutRegistry>,
    pub raw_store: Arc<dyn RawStore>,
    pub state_store: Arc<dyn ExecutionStateStore>,
    pub materializer: Arc<dyn Materializer>,
    pub audit: Arc<dyn AuditSink>,
}

pub struct EtlOrchestrator {
    planner: ExecutionPlanFactory,
    worker: ExecutionWorker,
    registry: ExecutionRegistry,
    state_store: Arc<dyn ExecutionStateStore>,
    materializer: Arc<dyn Materializer>,
    audit: Arc<dyn AuditSink>,
    notifier: CompletionNotifier,
    queue: ExecutionQueue,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ExecutionDescriptor>>>,
    registry_ttl: Duration,
    /// Events with registered sources; only these are checked as dependencies.
    wired_events: BTreeSet<MarketplaceEvent>,
    dependency_retry_delay: Duration,
}

impl EtlOrchestrator {
    /// Validates the configuration and the wiring, then builds the
    /// orchestrator. Nothing runs until [`EtlOrchestrator::start`].
    ///
    /// Fails when a registered source has no batch handler for its raw table
    /// or targets a marketplace without configuration. Required events
    /// without sources are logged and left unchecked.
    pub fn new(config: EtlConfig, deps: OrchestratorDeps) -> Result<Arc<Self>> {
        config.validate()?;
        let wired_events: BTreeSet<MarketplaceEvent> = deps.sources.events().into_iter().collect();
        let mut unwired: BTreeSet<MarketplaceEvent> = BTreeSet::new();
        for event in &wired_events {
            for source in deps.sources.sources(*event)? {
                config.marketplace(source.marketplace)?;
                if !deps.dispatcher.has_handler(&source.raw_table) {
                    return Err(EtlError::HandlerNotFound(source.raw_table.clone()));
                }
            }
            unwired.extend(
                event
                    .required_events()
                    .iter()
                    .copied()
                    .filter(|required| !wired_events.contains(required)),
            );
        }
        for required in unwired {
            warn!("No sources registered for {}; events requiring it run unchecked", required);
        }

        let config = Arc::new(config);
        let ingestor = SnapshotIngestor::new(
            deps.dispatcher,
            deps.raw_store,
            deps.layouts,
            config.batch_size,
            config.delete_snapshots,
        );
        let worker = ExecutionWorker::new(
            Arc::clone(&deps.sources),
            Arc::new(ResilienceFactory::new(Arc::clone(&config))),
            Arc::new(ingestor),
            config.max_pages,
        );
        let (queue, receiver) = ExecutionQueue::channel();

        Ok(Arc::new(Self {
            planner: ExecutionPlanFactory::new(deps.sources, deps.connections),
            worker,
            registry: ExecutionRegistry::new(),
            state_store: deps.state_store,
            materializer: deps.materializer,
            audit: deps.audit,
            notifier: CompletionNotifier::new(),
            queue,
            receiver: Mutex::new(Some(receiver)),
            registry_ttl: config.registry_ttl,
            wired_events,
            dependency_retry_delay: config.dependency_retry_delay,
        }))
    }

    /// Starts the dispatch loop. Each dequeued execution runs on its own
    /// task; the marketplace guards bound how many fetch at once.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|poisoned| {
                warn!("Orchestrator receiver mutex was poisoned, recovering");
                poisoned.into_inner()
            })
            .take();
        let Some(mut receiver) = receiver else {
            return Err(EtlError::InvalidArgument(
                "orchestrator is already started".to_string(),
            ));
        };

        let orchestrator: Weak<Self> = Arc::downgrade(self);
        Ok(tokio::spawn(async move {
            info!("Execution dispatch loop started");
            while let Some(descriptor) = receiver.recv().await {
                let Some(this) = orchestrator.upgrade() else {
                    break;
                };
                tokio::spawn(async move { this.execute(descriptor).await });
            }
            info!("Execution dispatch loop stopped");
        }))
    }

    /// Plans the command and enqueues its executions. Returns the request id.
    pub async fn submit(&self, command: OrchestrationCommand) -> Result<String> {
        let plan = self.planner.build(&command).await?;
        self.launch(&plan, false).await?;
        Ok(plan.request_id)
    }

    /// Submits the command and waits for its terminal aggregation.
    pub async fn submit_and_wait(&self, command: OrchestrationCommand) -> Result<EventAggregation> {
        let plan = self.planner.build(&command).await?;
        let waiter = self.launch(&plan, true).await?;
        let waiter = waiter.ok_or_else(|| {
            EtlError::InvalidArgument(format!("request {} is already running", plan.request_id))
        })?;
        waiter.await.map_err(|_| {
            EtlError::InvalidArgument(format!("request {} was evicted before completion", plan.request_id))
        })
    }

    /// Waits for a running request. `None` when the request is unknown,
    /// already finished or evicted.
    ///
    /// The subscription is taken when this is called, not when the returned
    /// future is first polled.
    pub fn wait_for(&self, request_id: &str) -> impl Future<Output = Option<EventAggregation>> {
        let waiter = self.notifier.subscribe(request_id);
        async move { waiter?.await.ok() }
    }

    /// Current aggregation of a running request.
    pub fn status(&self, request_id: &str) -> Option<EventAggregation> {
        self.registry.get(request_id)
    }

    async fn launch(
        &self,
        plan: &ExecutionPlan,
        subscribe: bool,
    ) -> Result<Option<tokio::sync::oneshot::Receiver<EventAggregation>>> {
        let Some(aggregation) = self.registry.register_plan(plan) else {
            warn!("Request {} is already running, ignoring resubmission", plan.request_id);
            return Ok(None);
        };
        if let Err(e) = self.state_store.register(plan).await {
            self.registry.remove(&plan.request_id);
            return Err(e);
        }
        self.notifier.track(&plan.request_id);
        let waiter = if subscribe {
            self.notifier.subscribe(&plan.request_id)
        } else {
            None
        };
        info!(
            "Registered request {} ({} for account {}, {}) with {} executions, status {}",
            plan.request_id,
            plan.event,
            plan.account_id,
            plan.window,
            plan.executions.len(),
            aggregation.status
        );
        for descriptor in &plan.executions {
            self.queue.enqueue(descriptor.clone());
        }
        Ok(waiter)
    }

    /// Runs one attempt of an execution and reports its outcome.
    pub async fn execute(&self, descriptor: ExecutionDescriptor) {
        if !self.registry.contains(&descriptor.request_id) {
            debug!("Skipping {}: request is no longer tracked", descriptor.label());
            return;
        }

        let attempt = match self.state_store.begin_attempt(&descriptor).await {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                debug!("Skipping {}: execution state is no longer tracked", descriptor.label());
                return;
            }
            Err(e) => {
                error!("Failed to record attempt start for {}: {}", descriptor.label(), e);
                let message = e.to_string();
                self.report(ExecutionOutcome::error(descriptor, message), None).await;
                return;
            }
        };
        info!("Attempt {} of {}", attempt, descriptor.label());
        self.registry.update(&ExecutionOutcome::in_progress(descriptor.clone()));

        let result = match self.check_dependencies(&descriptor).await {
            Ok(()) => self.worker.run(&descriptor).await,
            Err(e) => Err(e),
        };
        let (outcome, retry_due_at) = match result {
            Ok(0) => {
                info!("{} returned no data", descriptor.label());
                (ExecutionOutcome::no_data(descriptor), None)
            }
            Ok(rows) => {
                info!("{} ingested {} rows", descriptor.label(), rows);
                (ExecutionOutcome::success(descriptor, rows), None)
            }
            Err(e) => self.failure_outcome(descriptor, attempt, e),
        };

        let retry = match (&outcome.status, outcome.retry_after) {
            (ExecutionStatus::Waiting, Some(delay)) => Some((outcome.descriptor.clone(), delay)),
            _ => None,
        };
        self.report(outcome, retry_due_at).await;
        if let Some((descriptor, delay)) = retry {
            self.queue.schedule(descriptor, delay);
        }
    }

    /// Fails with [`EtlError::DependencyNotSatisfied`] while a required event
    /// has not completed for the account.
    async fn check_dependencies(&self, descriptor: &ExecutionDescriptor) -> Result<()> {
        let mut missing = Vec::new();
        for required in descriptor.event.required_events() {
            if !self.wired_events.contains(required) {
                continue;
            }
            if !self.audit.has_completed(descriptor.account_id, *required).await? {
                missing.push(*required);
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        Err(EtlError::DependencyNotSatisfied {
            account_id: descriptor.account_id,
            event: descriptor.event,
            missing,
            retry_after: self.dependency_retry_delay,
        })
    }

    fn failure_outcome(
        &self,
        descriptor: ExecutionDescriptor,
        attempt: u32,
        error: EtlError,
    ) -> (ExecutionOutcome, Option<NaiveDateTime>) {
        let decision = match self.worker.resilience().guards(descriptor.marketplace) {
            Ok(guards) => guards.retry_policy.decide(attempt, &error),
            Err(_) => RetryDecision::GiveUp,
        };
        match decision {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    "Attempt {} of {} failed, retrying in {:?}: {}",
                    attempt,
                    descriptor.label(),
                    delay,
                    error
                );
                let due = due_at(delay);
                (
                    ExecutionOutcome::waiting(descriptor, delay, error.to_string()),
                    Some(due),
                )
            }
            RetryDecision::GiveUp => {
                error!(
                    "Giving up on {} after attempt {}: {}",
                    descriptor.label(),
                    attempt,
                    error
                );
                (ExecutionOutcome::error(descriptor, error.to_string()), None)
            }
        }
    }

    /// Persists the outcome, folds it into the registry and finalizes the
    /// request once every execution is terminal.
    ///
    /// Reports for executions the state store no longer tracks are dropped.
    pub async fn report(&self, outcome: ExecutionOutcome, retry_due_at: Option<NaiveDateTime>) {
        match self.state_store.record_outcome(&outcome, retry_due_at).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    "Dropping late {} for {}: execution is no longer tracked",
                    outcome.status,
                    outcome.descriptor.label()
                );
                return;
            }
            Err(e) => error!(
                "Failed to persist {} for {}: {}",
                outcome.status,
                outcome.descriptor.label(),
                e
            ),
        }
        let Some(aggregation) = self.registry.update(&outcome) else {
            return;
        };
        debug!(
            "Request {} is {} after {} reported {}",
            aggregation.request_id, aggregation.status, outcome.descriptor.source_id, outcome.status
        );
        if aggregation.all_terminal() {
            self.finalize(&aggregation.request_id).await;
        }
    }

    async fn finalize(&self, request_id: &str) {
        let Some(aggregation) = self.registry.try_finalize(request_id) else {
            return;
        };
        info!(
            "Request {} finished with {} (failed sources: {:?})",
            request_id, aggregation.status, aggregation.failed_sources
        );

        if MaterializationGate::ready_for_materialization(&aggregation) {
            self.materialize(&aggregation).await;
        } else {
            debug!("Request {} is not eligible for materialization", request_id);
        }

        if let Err(e) = self
            .audit
            .record(&AuditRecord::from_aggregation(&aggregation))
            .await
        {
            error!("Failed to write audit record for request {}: {}", request_id, e);
        }

        self.registry.remove(request_id);
        if let Err(e) = self.state_store.forget(request_id).await {
            warn!("Failed to clear execution state of request {}: {}", request_id, e);
        }
        self.notifier.complete(&aggregation);
    }

    async fn materialize(&self, aggregation: &EventAggregation) {
        let request_id = &aggregation.request_id;
        match self.state_store.claim_materialization(request_id).await {
            Ok(true) => {
                info!(
                    "Triggering materialization of {} for account {} ({})",
                    aggregation.event, aggregation.account_id, aggregation.window
                );
                let request = MaterializationRequest::from(aggregation);
                if let Err(e) = self.materializer.materialize(&request).await {
                    error!("Materialization of request {} failed: {}", request_id, e);
                }
            }
            Ok(false) => info!("Request {} was already materialized", request_id),
            Err(e) => error!("Failed to claim materialization of request {}: {}", request_id, e),
        }
    }

    /// Re-enqueues unfinished executions persisted by a previous process.
    ///
    /// `PENDING` and `IN_PROGRESS` executions run immediately, `WAITING` ones at
    /// their retry due time. Requests whose executions are all terminal are
    /// finalized. Returns the number of executions re-enqueued.
    pub async fn recover(&self) -> Result<usize> {
        let mut requests: BTreeMap<String, Vec<ExecutionState>> = BTreeMap::new();
        for state in self.state_store.load_all().await? {
            requests
                .entry(state.descriptor.request_id.clone())
                .or_default()
                .push(state);
        }

        let mut resumed = 0;
        let now = Utc::now().naive_utc();
        for (request_id, states) in requests {
            if self.registry.contains(&request_id) {
                continue;
            }
            let Some(first) = states.first() else {
                continue;
            };
            let plan = ExecutionPlan {
                request_id: request_id.clone(),
                account_id: first.descriptor.account_id,
                event: first.descriptor.event,
                window: first.descriptor.window,
                executions: states.iter().map(|s| s.descriptor.clone()).collect(),
            };
            let statuses: HashMap<String, ExecutionStatus> = states
                .iter()
                .map(|s| (s.descriptor.source_id.clone(), s.status))
                .collect();
            let aggregation = self.registry.restore(&plan, &statuses);
            self.notifier.track(&request_id);
            info!(
                "Recovered request {} with status {} ({} executions)",
                request_id,
                aggregation.status,
                states.len()
            );

            for state in states {
                match state.status {
                    ExecutionStatus::Pending | ExecutionStatus::InProgress => {
                        self.queue.enqueue(state.descriptor);
                        resumed += 1;
                    }
                    ExecutionStatus::Waiting => {
                        let delay = state
                            .retry_due_at
                            .and_then(|due| (due - now).to_std().ok())
                            .unwrap_or(Duration::ZERO);
                        self.queue.schedule(state.descriptor, delay);
                        resumed += 1;
                    }
                    _ => {}
                }
            }

            if aggregation.all_terminal() {
                self.finalize(&request_id).await;
            }
        }
        if resumed > 0 {
            info!("Re-enqueued {} executions", resumed);
        }
        Ok(resumed)
    }

    /// Drops requests idle for longer than the registry TTL, releasing their
    /// waiters.
    pub fn evict_expired(&self) -> usize {
        let evicted = self.registry.evict_expired(self.registry_ttl);
        if evicted > 0 {
            self.notifier.retain(|request_id| self.registry.contains(request_id));
        }
        evicted
    }

    pub fn running_requests(&self) -> usize {
        self.registry.len()
    }
}

fn due_at(delay: Duration) -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(now)
}
