// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    job::{CronJob, WakeMode},
    store::CronStore,
};

/// Fires one job's payload into the message pipeline.
///
/// The host wires this to the board router so scheduled turns enter the
/// exact same routing / lanes / failover path as live messages.
#[async_trait]
pub trait CronDispatch: Send + Sync {
    async fn dispatch(&self, job: &CronJob) -> anyhow::Result<String>;
}

pub struct Scheduler {
    store: Arc<CronStore>,
    dispatch: Arc<dyn CronDispatch>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<CronStore>, dispatch: Arc<dyn CronDispatch>, tick_interval_ms: u64) -> Self {
        Self {
            store,
            dispatch,
            tick_interval: Duration::from_millis(tick_interval_ms.max(100)),
        }
    }

    pub fn store(&self) -> &Arc<CronStore> {
        &self.store
    }

    /// Fire every due job once.  Returns the number of jobs fired.
    ///
    /// `wake_mode` gates how the payload runs: `Now` dispatches inline so
    /// the tick observes the outcome; `Background` spawns the dispatch
    /// detached so one slow turn cannot delay other due jobs.  Either way
    /// the job is rescheduled at fire time: exhausted one-shots are
    /// deleted when marked `delete_after_run`, otherwise disabled so they
    /// stay inspectable.
    pub async fn tick(&self) -> usize {
        let now = Utc::now();
        let due = self.store.due(now).await;
        let fired = due.len();
        for mut job in due {
            info!(job = %job.name, id = %job.id, "cron job firing");
            match job.wake_mode {
                WakeMode::Now => {
                    if let Err(e) = self.dispatch.dispatch(&job).await {
                        warn!(job = %job.id, error = %e, "cron dispatch failed");
                    }
                }
                WakeMode::Background => {
                    let dispatch = self.dispatch.clone();
                    let snapshot = job.clone();
                    tokio::spawn(async move {
                        if let Err(e) = dispatch.dispatch(&snapshot).await {
                            warn!(job = %snapshot.id, error = %e, "cron dispatch failed");
                        }
                    });
                }
            }

            job.state.last_run_at = Some(Utc::now());
            job.state.next_run_at = job.schedule.next_after(Utc::now());
            let exhausted = job.state.next_run_at.is_none();
            let result = if exhausted && job.schedule.is_one_shot() && job.delete_after_run {
                debug!(job = %job.id, "one-shot job deleted after run");
                self.store.remove(&job.id).await
            } else {
                if exhausted {
                    job.enabled = false;
                }
                self.store.put(job).await
            };
            if let Err(e) = result {
                warn!(error = %e, "cron store update failed");
            }
        }
        fired
    }

    /// Tick forever.  Callers spawn this and drop the future to stop.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CronPayload, Schedule};
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatch {
        fired: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl CronDispatch for RecordingDispatch {
        async fn dispatch(&self, job: &CronJob) -> anyhow::Result<String> {
            self.fired.lock().unwrap().push(job.name.clone());
            if self.fail {
                anyhow::bail!("dispatch exploded");
            }
            Ok("done".into())
        }
    }

    fn due_one_shot(name: &str, delete_after_run: bool) -> CronJob {
        let mut job = CronJob::new(
            name,
            Schedule::At {
                at: Utc::now() + ChronoDuration::hours(1),
            },
            "cli:x",
            CronPayload::AgentTurn {
                message: "wake up".into(),
            },
        );
        job.state.next_run_at = Some(Utc::now() - ChronoDuration::seconds(1));
        job.delete_after_run = delete_after_run;
        job
    }

    async fn scheduler_with(
        dir: &tempfile::TempDir,
        dispatch: Arc<RecordingDispatch>,
    ) -> Scheduler {
        let store = Arc::new(CronStore::open(dir.path().join("cron.json")).unwrap());
        Scheduler::new(store, dispatch, 1_000)
    }

    #[tokio::test]
    async fn tick_fires_due_jobs_only() {
        let dir = tempfile::tempdir().unwrap();
        let dispatch = Arc::new(RecordingDispatch::default());
        let scheduler = scheduler_with(&dir, dispatch.clone()).await;

        scheduler.store().put(due_one_shot("due", false)).await.unwrap();
        scheduler
            .store()
            .put(CronJob::new(
                "future",
                Schedule::At {
                    at: Utc::now() + ChronoDuration::hours(2),
                },
                "cli:x",
                CronPayload::AgentTurn {
                    message: "later".into(),
                },
            ))
            .await
            .unwrap();

        assert_eq!(scheduler.tick().await, 1);
        assert_eq!(*dispatch.fired.lock().unwrap(), vec!["due"]);
    }

    #[tokio::test]
    async fn exhausted_one_shot_with_delete_flag_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let dispatch = Arc::new(RecordingDispatch::default());
        let scheduler = scheduler_with(&dir, dispatch).await;
        let job = due_one_shot("gone", true);
        let id = job.id.clone();
        scheduler.store().put(job).await.unwrap();

        scheduler.tick().await;
        assert!(scheduler.store().get(&id).await.is_none());
    }

    #[tokio::test]
    async fn exhausted_one_shot_without_delete_flag_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let dispatch = Arc::new(RecordingDispatch::default());
        let scheduler = scheduler_with(&dir, dispatch).await;
        let job = due_one_shot("kept", false);
        let id = job.id.clone();
        scheduler.store().put(job).await.unwrap();

        scheduler.tick().await;
        let kept = scheduler.store().get(&id).await.unwrap();
        assert!(!kept.enabled);
        assert!(kept.state.last_run_at.is_some());
    }

    #[tokio::test]
    async fn recurring_job_gets_a_new_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let dispatch = Arc::new(RecordingDispatch::default());
        let scheduler = scheduler_with(&dir, dispatch.clone()).await;
        let mut job = CronJob::new(
            "hourly",
            Schedule::Cron {
                expr: "0 0 * * * *".into(),
                tz: "UTC".into(),
            },
            "cli:x",
            CronPayload::AgentTurn {
                message: "hourly check".into(),
            },
        );
        job.state.next_run_at = Some(Utc::now() - ChronoDuration::seconds(1));
        let id = job.id.clone();
        scheduler.store().put(job).await.unwrap();

        scheduler.tick().await;
        let updated = scheduler.store().get(&id).await.unwrap();
        assert!(updated.enabled);
        assert!(updated.state.next_run_at.unwrap() > Utc::now());
        // Second tick right away: nothing due any more.
        assert_eq!(scheduler.tick().await, 0);
    }

    #[tokio::test]
    async fn background_job_dispatches_detached_and_reschedules_at_fire_time() {
        let dir = tempfile::tempdir().unwrap();
        let dispatch = Arc::new(RecordingDispatch::default());
        let scheduler = scheduler_with(&dir, dispatch.clone()).await;
        let mut job = due_one_shot("detached", false);
        job.wake_mode = WakeMode::Background;
        let id = job.id.clone();
        scheduler.store().put(job).await.unwrap();

        assert_eq!(scheduler.tick().await, 1);
        // Rescheduling happened on the tick, not after the dispatch.
        let after = scheduler.store().get(&id).await.unwrap();
        assert!(!after.enabled);
        assert!(after.state.last_run_at.is_some());

        // The detached dispatch lands shortly after.
        for _ in 0..50 {
            if !dispatch.fired.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(*dispatch.fired.lock().unwrap(), vec!["detached"]);
    }

    #[tokio::test]
    async fn failed_dispatch_still_reschedules() {
        let dir = tempfile::tempdir().unwrap();
        let dispatch = Arc::new(RecordingDispatch {
            fail: true,
            ..Default::default()
        });
        let scheduler = scheduler_with(&dir, dispatch.clone()).await;
        let job = due_one_shot("boom", false);
        let id = job.id.clone();
        scheduler.store().put(job).await.unwrap();

        scheduler.tick().await;
        assert_eq!(dispatch.fired.lock().unwrap().len(), 1);
        let after = scheduler.store().get(&id).await.unwrap();
        assert!(!after.enabled, "a failed one-shot does not refire forever");
    }
}
