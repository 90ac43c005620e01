//! Work queue of execution descriptors, with delayed re-enqueue for retries.

use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::models::ExecutionDescriptor;

/// Sending half of the execution queue.
///
/// Retries never block a worker: [`ExecutionQueue::schedule`] parks the
/// descriptor on a timer task and enqueues it when the delay elapses.
#[derive(Clone, Debug)]
pub struct ExecutionQueue {
    tx: mpsc::UnboundedSender<ExecutionDescriptor>,
}

impl ExecutionQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionDescriptor>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false when the consumer has shut down.
    pub fn enqueue(&self, descriptor: ExecutionDescriptor) -> bool {
        let label = descriptor.label();
        match self.tx.send(descriptor) {
            Ok(()) => true,
            Err(_) => {
                warn!("Execution queue closed, dropping {}", label);
                false
            }
        }
    }

    pub fn schedule(&self, descriptor: ExecutionDescriptor, delay: Duration) {
        if delay.is_zero() {
            self.enqueue(descriptor);
            return;
        }
        debug!("Scheduling {} in {:?}", descriptor.label(), delay);
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(descriptor);
        });
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
