//! Background delivery of "capacity freed" notices to the waitlist.
//!
//! Callers submit and move on. A single worker task owns delivery; its
//! failures go to the log and the counters, never back to the caller.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collaborators::WaitlistService;
use crate::models::{BookingId, EventId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityFreed {
    pub event_id: EventId,
    pub booking_id: BookingId,
    pub seat_count: i32,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotifierStats {
    pub delivered: u64,
    pub failed: u64,
    /// Rejected at submission because the queue was full or closed.
    pub dropped: u64,
}

pub struct WaitlistNotifier {
    sender: Mutex<Option<mpsc::Sender<CapacityFreed>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl WaitlistNotifier {
    /// Starts the delivery worker. Must be called inside a tokio runtime.
    pub fn spawn(waitlist: Arc<dyn WaitlistService>, queue_capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<CapacityFreed>(queue_capacity.max(1));
        let counters = Arc::new(Counters::default());

        let worker_counters = counters.clone();
        let worker = tokio::spawn(async move {
            while let Some(notice) = receiver.recv().await {
                match waitlist
                    .notify_capacity_freed(notice.event_id, notice.seat_count)
                    .await
                {
                    Ok(()) => {
                        worker_counters.delivered.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            event_id = notice.event_id,
                            booking_id = notice.booking_id,
                            seat_count = notice.seat_count,
                            "Waitlist notified of freed capacity"
                        );
                    }
                    Err(e) => {
                        worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(
                            event_id = notice.event_id,
                            booking_id = notice.booking_id,
                            error = %e,
                            "Failed to notify waitlist"
                        );
                    }
                }
            }
            info!("Waitlist notifier drained");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            counters,
        }
    }

    /// Queues a notice without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, notice: CapacityFreed) -> bool {
        let sender = self.sender.lock().ok().and_then(|s| s.clone());
        let Some(sender) = sender else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(event_id = notice.event_id, "Notifier shut down, notice dropped");
            return false;
        };

        match sender.try_send(notice) {
            Ok(()) => true,
            Err(TrySendError::Full(n)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(event_id = n.event_id, booking_id = n.booking_id, "Notifier queue full, notice dropped");
                false
            }
            Err(TrySendError::Closed(n)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(event_id = n.event_id, booking_id = n.booking_id, "Notifier worker gone, notice dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting notices and waits until every queued one was handled.
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Waitlist notifier worker panicked");
            }
        }
    }
}
