use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use log::warn;
use tokio::sync::oneshot;

use crate::models::EventAggregation;

#[derive(Default)]
struct Waiters {
    /// Requests that have not completed yet, with their subscribers.
    open: HashMap<String, Vec<oneshot::Sender<EventAggregation>>>,
}

/// Hands the terminal aggregation of a request to everyone waiting on it.
///
/// Tracking, subscribing and completing share one lock, so a subscriber either
/// sees the request open and is notified later, or is told it is unknown.
#[derive(Default)]
pub struct CompletionNotifier {
    waiters: Mutex<Waiters>,
}

impl CompletionNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(|poisoned| {
            warn!("Completion notifier mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn track(&self, request_id: &str) {
        self.lock().open.entry(request_id.to_string()).or_default();
    }

    /// Returns `None` when the request is not open.
    pub fn subscribe(&self, request_id: &str) -> Option<oneshot::Receiver<EventAggregation>> {
        let mut waiters = self.lock();
        let subscribers = waiters.open.get_mut(request_id)?;
        let (tx, rx) = oneshot::channel();
        subscribers.push(tx);
        Some(rx)
    }

    /// Sends the aggregation to every subscriber and closes the request.
    pub fn complete(&self, aggregation: &EventAggregation) -> usize {
        let subscribers = self.lock().open.remove(&aggregation.request_id);
        let mut delivered = 0;
        for tx in subscribers.into_iter().flatten() {
            if tx.send(aggregation.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Closes open requests rejected by `keep`; their subscribers observe a
    /// closed channel.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) {
        self.lock().open.retain(|request_id, _| keep(request_id));
    }

    pub fn open_requests(&self) -> usize {
        self.lock().open.len()
    }
}
