// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use crate::job::CronJob;

/// Durable job store.  Writes are write-through: every mutation lands on
/// disk before the call returns, so a restart picks up exactly the
/// pending jobs.
pub struct CronStore {
    path: PathBuf,
    jobs: Mutex<HashMap<String, CronJob>>,
}

impl CronStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let mut jobs = HashMap::new();
        if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            match serde_json::from_str::<Vec<CronJob>>(&text) {
                Ok(list) => {
                    for job in list {
                        jobs.insert(job.id.clone(), job);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cron store unreadable; starting empty");
                }
            }
        }
        Ok(Self {
            path,
            jobs: Mutex::new(jobs),
        })
    }

    pub async fn put(&self, job: CronJob) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().await;
        jobs.insert(job.id.clone(), job);
        self.persist(&jobs)
    }

    pub async fn remove(&self, id: &str) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().await;
        jobs.remove(id);
        self.persist(&jobs)
    }

    pub async fn get(&self, id: &str) -> Option<CronJob> {
        self.jobs.lock().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<CronJob> {
        let mut list: Vec<CronJob> = self.jobs.lock().await.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Enabled jobs whose next run is at or before `now`.
    pub async fn due(&self, now: DateTime<Utc>) -> Vec<CronJob> {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|j| j.is_due(now))
            .cloned()
            .collect()
    }

    fn persist(&self, jobs: &HashMap<String, CronJob>) -> anyhow::Result<()> {
        let mut list: Vec<&CronJob> = jobs.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        let json = serde_json::to_string_pretty(&list)?;
        write_atomic(&self.path, &json)
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CronPayload, Schedule};
    use chrono::Duration;

    fn job(name: &str) -> CronJob {
        CronJob::new(
            name,
            Schedule::At {
                at: Utc::now() + Duration::hours(1),
            },
            "cli:x",
            CronPayload::AgentTurn {
                message: "ping".into(),
            },
        )
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CronStore::open(dir.path().join("cron.json")).unwrap();
        let j = job("a");
        store.put(j.clone()).await.unwrap();
        assert_eq!(store.get(&j.id).await, Some(j));
    }

    #[tokio::test]
    async fn jobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cron.json");
        let j = job("persistent");
        {
            let store = CronStore::open(&path).unwrap();
            store.put(j.clone()).await.unwrap();
        }
        let reopened = CronStore::open(&path).unwrap();
        assert_eq!(reopened.get(&j.id).await, Some(j));
    }

    #[tokio::test]
    async fn remove_is_write_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cron.json");
        let j = job("gone");
        {
            let store = CronStore::open(&path).unwrap();
            store.put(j.clone()).await.unwrap();
            store.remove(&j.id).await.unwrap();
        }
        let reopened = CronStore::open(&path).unwrap();
        assert!(reopened.get(&j.id).await.is_none());
    }

    #[tokio::test]
    async fn due_filters_on_time_and_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = CronStore::open(dir.path().join("cron.json")).unwrap();

        let mut due_job = job("due");
        due_job.state.next_run_at = Some(Utc::now() - Duration::seconds(5));
        let mut disabled = job("disabled");
        disabled.state.next_run_at = Some(Utc::now() - Duration::seconds(5));
        disabled.enabled = false;
        let future = job("future");

        store.put(due_job.clone()).await.unwrap();
        store.put(disabled).await.unwrap();
        store.put(future).await.unwrap();

        let due = store.due(Utc::now()).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, due_job.id);
    }

    #[tokio::test]
    async fn corrupt_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cron.json");
        std::fs::write(&path, "][").unwrap();
        let store = CronStore::open(&path).unwrap();
        assert!(store.list().await.is_empty());
    }
}
