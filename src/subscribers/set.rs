//! # SubscriberSet: non-blocking fan-out over multiple subscribers
//!
//! [`SubscriberSet`] distributes each [`Event`] to multiple subscribers
//! **without awaiting** their processing.
//!
//! ## What it guarantees
//! - `emit(&Event)` returns immediately.
//! - Per-subscriber FIFO (queue order).
//! - Panics inside subscribers are caught and logged (isolation).
//!
//! ## What it does **not** guarantee
//! - No global ordering across different subscribers.
//! - No retries on per-subscriber queue overflow.
//!
//! ## Diagram
//! ```text
//!    emit(&Event)
//!        │                        (Arc-clone per subscriber)
//!        ├────────────────► [queue S1] ─► worker S1 ─► on_event()
//!        ├────────────────► [queue S2] ─► worker S2 ─► on_event()
//!        └────────────────► [queue SN] ─► worker SN ─► on_event()
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::warn;

use crate::events::Event;

use super::Subscribe;

/// Queue feeding one subscriber worker.
struct Lane {
    sub: Arc<dyn Subscribe>,
    tx: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
}

/// Fan-out to registry subscribers, one bounded lane and worker each.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let (lanes, workers) = subs.into_iter().map(spawn_lane).unzip();
        Self { lanes, workers }
    }

    /// Queues `event` for every subscriber interested in its kind; never waits.
    ///
    /// A full or closed lane drops the event for that subscriber only.
    pub fn emit(&self, event: &Event) {
        let ev = Arc::new(event.clone());
        for lane in self.lanes.iter().filter(|l| l.sub.interested(event.kind)) {
            let why = match lane.tx.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "queue full",
                Err(mpsc::error::TrySendError::Closed(_)) => "worker closed",
            };
            lane.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(subscriber = lane.sub.name(), seq = ev.seq, kind = ?ev.kind, "dropped event: {why}");
        }
    }

    /// Events dropped so far, per subscriber name.
    pub fn dropped(&self) -> Vec<(&'static str, u64)> {
        self.lanes
            .iter()
            .map(|l| (l.sub.name(), l.dropped.load(Ordering::Relaxed)))
            .collect()
    }

    /// Closes every lane and waits for the workers to drain them.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for h in self.workers {
            let _ = h.await;
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}

fn spawn_lane(sub: Arc<dyn Subscribe>) -> (Lane, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
    let worker = Arc::clone(&sub);
    let handle = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            let fut = worker.on_event(ev.as_ref());
            if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                warn!(subscriber = worker.name(), seq = ev.seq, "subscriber panicked: {:?}", panic);
            }
        }
    });
    let lane = Lane {
        sub,
        tx,
        dropped: AtomicU64::new(0),
    };
    (lane, handle)
}
