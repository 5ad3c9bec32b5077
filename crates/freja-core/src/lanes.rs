// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Execution lanes.
//!
//! Two lane families gate every core operation: a **session lane** per
//! session key (strict mutual exclusion — one session never has two model
//! calls in flight) and a **global lane** per route label (a semaphore
//! bounding total in-flight calls for that route, typically the provider).
//!
//! Acquisition order is session → global, released in reverse.  The
//! session lane is a fair tokio mutex, so submissions queue FIFO and are
//! never coalesced.  Nested submission to an already-held session lane
//! (a turn spawning a turn on the same session) is short-circuited to
//! direct execution via a task-local set of held keys.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, Semaphore};

use crate::abort::AbortHandle;

tokio::task_local! {
    static HELD_LANES: RefCell<HashSet<String>>;
}

/// Returned when queued work observes its abort signal before starting.
#[derive(Debug, thiserror::Error)]
#[error("cancelled before lane acquisition")]
pub struct LaneCancelled;

pub struct LaneManager {
    sessions: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    globals: StdMutex<HashMap<String, Arc<Semaphore>>>,
    global_width: usize,
}

impl LaneManager {
    /// `global_width` bounds concurrent in-flight work per route label.
    pub fn new(global_width: usize) -> Self {
        Self {
            sessions: StdMutex::new(HashMap::new()),
            globals: StdMutex::new(HashMap::new()),
            global_width: global_width.max(1),
        }
    }

    fn session_lane(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.sessions.lock().expect("lane map poisoned");
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn global_lane(&self, route: &str) -> Arc<Semaphore> {
        let mut map = self.globals.lock().expect("lane map poisoned");
        map.entry(route.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.global_width)))
            .clone()
    }

    /// True when the current task already holds `key`'s session lane.
    pub fn holds(key: &str) -> bool {
        HELD_LANES
            .try_with(|held| held.borrow().contains(key))
            .unwrap_or(false)
    }

    /// Run `fut` holding the session lane for `key` and a permit on the
    /// `route` global lane.
    ///
    /// Work queued behind a busy lane observes `abort` while waiting and
    /// returns [`LaneCancelled`] without ever starting.  A nested call
    /// from a task that already holds `key` executes `fut` directly.
    pub async fn run<F>(
        &self,
        key: &str,
        route: &str,
        abort: &AbortHandle,
        fut: F,
    ) -> Result<F::Output, LaneCancelled>
    where
        F: Future,
    {
        if Self::holds(key) {
            return Ok(fut.await);
        }
        if abort.is_aborted() {
            return Err(LaneCancelled);
        }

        let lane = self.session_lane(key);
        let guard = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(LaneCancelled),
            guard = lane.lock() => guard,
        };
        if abort.is_aborted() {
            return Err(LaneCancelled);
        }

        let sem = self.global_lane(route);
        let permit = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(LaneCancelled),
            permit = sem.acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return Err(LaneCancelled),
            },
        };

        let mut held = HELD_LANES
            .try_with(|h| h.borrow().clone())
            .unwrap_or_default();
        held.insert(key.to_string());
        let out = HELD_LANES.scope(RefCell::new(held), fut).await;

        // Release in reverse: global permit first, then the session lane.
        drop(permit);
        drop(guard);
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_session_work_is_serialized_fifo() {
        let lanes = Arc::new(LaneManager::new(8));
        let order = Arc::new(StdMutex::new(Vec::new()));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..5 {
            let lanes = lanes.clone();
            let order = order.clone();
            let in_flight = in_flight.clone();
            handles.push(tokio::spawn(async move {
                let abort = AbortHandle::new();
                lanes
                    .run("session-a", "mock", &abort, async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(now, 0, "two tasks entered the same session lane");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        order.lock().unwrap().push(i);
                    })
                    .await
                    .unwrap();
            }));
            // Give each submission time to queue so FIFO order is observable.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn distinct_sessions_run_in_parallel() {
        let lanes = Arc::new(LaneManager::new(8));
        let peak = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let lanes = lanes.clone();
            let peak = peak.clone();
            let in_flight = in_flight.clone();
            handles.push(tokio::spawn(async move {
                let abort = AbortHandle::new();
                lanes
                    .run(&format!("session-{i}"), "mock", &abort, async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(
            peak.load(Ordering::SeqCst) > 1,
            "distinct sessions should overlap"
        );
    }

    #[tokio::test]
    async fn global_lane_bounds_cross_session_concurrency() {
        let lanes = Arc::new(LaneManager::new(1));
        let peak = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let lanes = lanes.clone();
            let peak = peak.clone();
            let in_flight = in_flight.clone();
            handles.push(tokio::spawn(async move {
                let abort = AbortHandle::new();
                lanes
                    .run(&format!("session-{i}"), "provider-x", &abort, async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1, "width-1 lane must serialize");
    }

    #[tokio::test]
    async fn nested_submission_to_held_lane_short_circuits() {
        let lanes = Arc::new(LaneManager::new(4));
        let abort = AbortHandle::new();
        let inner_lanes = lanes.clone();
        let inner_abort = abort.clone();
        let out = lanes
            .run("session-a", "mock", &abort, async move {
                assert!(LaneManager::holds("session-a"));
                // Without the short-circuit this would deadlock on itself.
                inner_lanes
                    .run("session-a", "mock", &inner_abort, async { 42 })
                    .await
                    .unwrap()
            })
            .await
            .unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn queued_work_is_drained_on_abort() {
        let lanes = Arc::new(LaneManager::new(4));
        let abort_first = AbortHandle::new();

        // Occupy the lane.
        let lanes2 = lanes.clone();
        let blocker = tokio::spawn(async move {
            let abort = AbortHandle::new();
            lanes2
                .run("session-a", "mock", &abort, async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                })
                .await
                .unwrap();
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Queue work, then abort it before the lane frees up.
        let lanes3 = lanes.clone();
        let abort_queued = abort_first.clone();
        let queued = tokio::spawn(async move {
            lanes3
                .run("session-a", "mock", &abort_queued, async { "ran" })
                .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        abort_first.abort();

        let result = queued.await.unwrap();
        assert!(result.is_err(), "aborted queued work must not run");
        blocker.await.unwrap();
    }

    #[tokio::test]
    async fn already_aborted_submission_never_waits() {
        let lanes = LaneManager::new(4);
        let abort = AbortHandle::new();
        abort.abort();
        let result = lanes.run("s", "r", &abort, async { () }).await;
        assert!(result.is_err());
    }
}
