//! Live subscription: drives a `FleetAggregate` off the event feed and hands
//! refreshed snapshots to the caller.

use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::aggregate::{AggregateView, FleetAggregate};
use crate::error::FeedError;
use crate::types::MetricSample;

/// Connection health as observed through a subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamHealth {
    /// Transport not established yet.
    Connecting,
    /// Events are flowing.
    Streaming,
    /// The connection died. Aggregated state is retained but frozen; a new
    /// subscription is the only way back to a live feed.
    Errored,
    /// Torn down by the caller. Terminal.
    Closed,
}

const HEALTH_CONNECTING: u8 = 0;
const HEALTH_STREAMING: u8 = 1;
const HEALTH_ERRORED: u8 = 2;
const HEALTH_CLOSED: u8 = 3;

struct Shared {
    latest: RwLock<AggregateView>,
    health: AtomicU8,
    dropped: AtomicU64,
    closed: AtomicBool,
    cancel: Notify,
}

impl Shared {
    // Closed is sticky; nothing overwrites it once teardown has started.
    fn set_health(&self, h: u8) {
        let _ = self
            .health
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                if cur == HEALTH_CLOSED {
                    None
                } else {
                    Some(h)
                }
            });
    }
}

/// One live view over the fleet. Owns a background task that reads the feed,
/// folds events into the aggregate, and invokes the caller's callbacks.
/// Dropping the handle tears the task down.
pub struct Subscription {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Open a subscription. `connect` resolves to the feed; each subscription
    /// drives exactly one connection and never reconnects on its own.
    /// `on_update` fires after every applied event with a detached snapshot;
    /// `on_error` fires at most once, when the connection dies. Must be
    /// called from within a tokio runtime.
    pub fn spawn<C, S, U, E>(connect: C, on_update: U, on_error: E) -> Subscription
    where
        C: Future<Output = Result<S, FeedError>> + Send + 'static,
        S: Stream<Item = Result<String, FeedError>> + Send + Unpin + 'static,
        U: FnMut(AggregateView) + Send + 'static,
        E: FnOnce(FeedError) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            latest: RwLock::new(AggregateView::default()),
            health: AtomicU8::new(HEALTH_CONNECTING),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            cancel: Notify::new(),
        });
        let task = tokio::spawn(drive(shared.clone(), connect, on_update, on_error));
        Subscription { shared, task }
    }

    /// Latest published snapshot. Never waits on the feed; before the first
    /// event this is an empty view.
    pub fn snapshot(&self) -> AggregateView {
        self.shared.latest.read().expect("snapshot lock").clone()
    }

    pub fn health(&self) -> StreamHealth {
        match self.shared.health.load(Ordering::Acquire) {
            HEALTH_CONNECTING => StreamHealth::Connecting,
            HEALTH_STREAMING => StreamHealth::Streaming,
            HEALTH_ERRORED => StreamHealth::Errored,
            _ => StreamHealth::Closed,
        }
    }

    /// Events discarded as malformed since the subscription opened.
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Tear the subscription down. Idempotent. No further callbacks are
    /// dispatched once this returns; the last snapshot stays readable.
    pub fn unsubscribe(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.health.store(HEALTH_CLOSED, Ordering::Release);
        self.shared.cancel.notify_waiters();
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn drive<C, S, U, E>(shared: Arc<Shared>, connect: C, mut on_update: U, on_error: E)
where
    C: Future<Output = Result<S, FeedError>>,
    S: Stream<Item = Result<String, FeedError>> + Unpin,
    U: FnMut(AggregateView),
    E: FnOnce(FeedError),
{
    let mut feed = tokio::select! {
        _ = shared.cancel.notified() => return,
        res = connect => match res {
            Ok(feed) => feed,
            Err(err) => {
                fail(&shared, err, on_error);
                return;
            }
        },
    };
    shared.set_health(HEALTH_STREAMING);
    debug!("feed connected");

    let mut agg = FleetAggregate::new();
    loop {
        if shared.closed.load(Ordering::Acquire) {
            return;
        }
        let item = tokio::select! {
            _ = shared.cancel.notified() => return,
            item = feed.next() => item,
        };
        match item {
            Some(Ok(payload)) => match serde_json::from_str::<MetricSample>(&payload) {
                Ok(sample) => {
                    agg.apply(sample);
                    let view = agg.view();
                    *shared.latest.write().expect("snapshot lock") = view.clone();
                    if shared.closed.load(Ordering::Acquire) {
                        return;
                    }
                    on_update(view);
                }
                Err(err) => {
                    // malformed events are dropped, never fatal
                    let n = shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(%err, dropped = n, "dropping malformed feed event");
                }
            },
            Some(Err(err)) => {
                fail(&shared, err, on_error);
                return;
            }
            None => {
                fail(&shared, FeedError::RemoteClosed, on_error);
                return;
            }
        }
    }
}

fn fail<E: FnOnce(FeedError)>(shared: &Shared, err: FeedError, on_error: E) {
    shared.set_health(HEALTH_ERRORED);
    warn!(error = %err, "feed failed");
    if !shared.closed.load(Ordering::Acquire) {
        on_error(err);
    }
}
