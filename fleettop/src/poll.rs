//! Poll watchers: fixed-interval pull loops over the request/response
//! endpoints, with the same handle/teardown shape as the live subscription.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::api::FleetApi;
use crate::error::ApiError;
use crate::types::{Agent, MetricSample, Policy};

// Refresh cadences used by the console views.
pub const AGENTS_INTERVAL: Duration = Duration::from_secs(5);
pub const POLICIES_INTERVAL: Duration = Duration::from_secs(10);
pub const HOST_METRICS_INTERVAL: Duration = Duration::from_secs(2);

struct Stop {
    stopped: AtomicBool,
    cancel: Notify,
}

/// Handle for one polling loop. Stops on `stop()` or drop.
pub struct PollWatch {
    stop: Arc<Stop>,
    task: JoinHandle<()>,
}

impl PollWatch {
    /// Poll the agents list.
    pub fn agents<U, E>(api: FleetApi, every: Duration, on_update: U, on_error: E) -> PollWatch
    where
        U: FnMut(Vec<Agent>) + Send + 'static,
        E: FnMut(ApiError) + Send + 'static,
    {
        Self::spawn(
            every,
            move || {
                let api = api.clone();
                async move { api.agents().await }
            },
            on_update,
            on_error,
        )
    }

    /// Poll the policies list.
    pub fn policies<U, E>(api: FleetApi, every: Duration, on_update: U, on_error: E) -> PollWatch
    where
        U: FnMut(Vec<Policy>) + Send + 'static,
        E: FnMut(ApiError) + Send + 'static,
    {
        Self::spawn(
            every,
            move || {
                let api = api.clone();
                async move { api.policies().await }
            },
            on_update,
            on_error,
        )
    }

    /// Poll one host's latest reading.
    pub fn host_metrics<U, E>(
        api: FleetApi,
        hostname: String,
        every: Duration,
        on_update: U,
        on_error: E,
    ) -> PollWatch
    where
        U: FnMut(MetricSample) + Send + 'static,
        E: FnMut(ApiError) + Send + 'static,
    {
        Self::spawn(
            every,
            move || {
                let api = api.clone();
                let hostname = hostname.clone();
                async move { api.host_metrics(&hostname).await }
            },
            on_update,
            on_error,
        )
    }

    /// Generic loop: fetch once immediately, then on every tick. A failed
    /// tick goes to `on_error` and the loop keeps running; nothing short of
    /// `stop()` ends it. Must be called from within a tokio runtime.
    pub fn spawn<F, Fut, T, U, E>(
        every: Duration,
        mut fetch: F,
        mut on_update: U,
        mut on_error: E,
    ) -> PollWatch
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send,
        T: Send + 'static,
        U: FnMut(T) + Send + 'static,
        E: FnMut(ApiError) + Send + 'static,
    {
        let stop = Arc::new(Stop {
            stopped: AtomicBool::new(false),
            cancel: Notify::new(),
        });
        let stop2 = stop.clone();
        let task = tokio::spawn(async move {
            loop {
                if stop2.stopped.load(Ordering::Acquire) {
                    return;
                }
                let res = tokio::select! {
                    _ = stop2.cancel.notified() => return,
                    res = fetch() => res,
                };
                if stop2.stopped.load(Ordering::Acquire) {
                    return;
                }
                match res {
                    Ok(value) => on_update(value),
                    Err(err) => on_error(err),
                }
                tokio::select! {
                    _ = stop2.cancel.notified() => return,
                    _ = sleep(every) => {}
                }
            }
        });
        PollWatch { stop, task }
    }

    /// Idempotent stop; no callbacks are dispatched after this returns.
    pub fn stop(&self) {
        if self.stop.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.cancel.notify_waiters();
        self.task.abort();
    }
}

impl Drop for PollWatch {
    fn drop(&mut self) {
        self.stop();
    }
}
