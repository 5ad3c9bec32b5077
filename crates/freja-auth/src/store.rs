// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use freja_config::AuthConfig;
use freja_model::FailureReason;

use crate::profile::{cooldown_duration, AuthProfile};

/// Durable pool of provider credentials with per-profile cooldown state.
///
/// Profiles are seeded from config; cooldown/usage state is merged in from
/// the store file on open so restarts preserve holds.  Mutations are
/// write-behind except `mark_good`, which flushes before returning — a
/// profile must never be reported healthy on state the disk does not have.
pub struct AuthStore {
    path: PathBuf,
    cooldown: freja_config::CooldownConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    /// Config order is preserved; ordering for rotation is computed per call.
    profiles: Vec<AuthProfile>,
    dirty: bool,
}

impl AuthStore {
    /// Build the store from config, merging any persisted state at `path`.
    pub fn open(cfg: &AuthConfig, path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let mut profiles: Vec<AuthProfile> = cfg
            .profiles
            .iter()
            .map(|p| {
                let mut profile = AuthProfile::new(&p.id, &p.provider, &p.credential_ref);
                profile.disabled = p.disabled;
                profile
            })
            .collect();

        if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            match serde_json::from_str::<HashMap<String, AuthProfile>>(&text) {
                Ok(saved) => {
                    for profile in &mut profiles {
                        if let Some(s) = saved.get(&profile.id) {
                            profile.cooldown_until = s.cooldown_until;
                            profile.last_used_at = s.last_used_at;
                            profile.consecutive_failures = s.consecutive_failures;
                        }
                    }
                }
                Err(e) => {
                    // A corrupt store must not take the whole pool down;
                    // profiles restart with clean state.
                    warn!(path = %path.display(), error = %e, "auth store unreadable; starting fresh");
                }
            }
        }

        Ok(Self {
            path,
            cooldown: cfg.cooldown.clone(),
            inner: Mutex::new(Inner {
                profiles,
                dirty: false,
            }),
        })
    }

    /// Ordered candidate profile ids for `provider`.
    ///
    /// The explicit `preferred` id (when usable) comes first, then the
    /// remaining usable profiles least-recently-used first.  Disabled and
    /// cooldown-active profiles are excluded entirely.
    pub async fn order(&self, provider: &str, preferred: Option<&str>) -> Vec<String> {
        let now = Utc::now();
        let inner = self.inner.lock().await;
        let mut candidates: Vec<&AuthProfile> = inner
            .profiles
            .iter()
            .filter(|p| p.provider == provider && p.is_usable(now))
            .collect();
        candidates.sort_by_key(|p| p.last_used_at);
        let mut ids: Vec<String> = candidates.iter().map(|p| p.id.clone()).collect();
        if let Some(pref) = preferred {
            if let Some(pos) = ids.iter().position(|id| id == pref) {
                let id = ids.remove(pos);
                ids.insert(0, id);
            }
        }
        ids
    }

    /// True when any profile (enabled or not, cooldown or not) is
    /// configured for `provider`.  Distinguishes "pool exhausted" from
    /// "provider needs no pool".
    pub async fn has_profiles(&self, provider: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.profiles.iter().any(|p| p.provider == provider)
    }

    /// Resolve the credential for a profile from its environment reference.
    pub async fn credential(&self, id: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        let profile = inner.profiles.iter().find(|p| p.id == id)?;
        std::env::var(&profile.credential_ref).ok()
    }

    pub async fn is_in_cooldown(&self, id: &str) -> bool {
        let now = Utc::now();
        let inner = self.inner.lock().await;
        inner
            .profiles
            .iter()
            .find(|p| p.id == id)
            .map_or(false, |p| p.is_in_cooldown(now))
    }

    /// Record a successful call.  Resets the failure streak, clears any
    /// cooldown, and flushes the store before returning.
    pub async fn mark_good(&self, id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(p) = inner.profiles.iter_mut().find(|p| p.id == id) {
            p.consecutive_failures = 0;
            p.cooldown_until = None;
        }
        inner.dirty = true;
        self.flush_locked(&mut inner)
    }

    /// Stamp `last_used_at`.  Write-behind.
    pub async fn mark_used(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(p) = inner.profiles.iter_mut().find(|p| p.id == id) {
            p.last_used_at = Some(Utc::now());
        }
        inner.dirty = true;
    }

    /// Record a failure and start the reason-specific cooldown.  Write-behind.
    pub async fn mark_failure(&self, id: &str, reason: FailureReason) {
        let mut inner = self.inner.lock().await;
        if let Some(p) = inner.profiles.iter_mut().find(|p| p.id == id) {
            p.consecutive_failures += 1;
            let hold = cooldown_duration(reason, p.consecutive_failures, &self.cooldown);
            p.cooldown_until = Some(Utc::now() + hold);
            debug!(
                profile = %id,
                %reason,
                failures = p.consecutive_failures,
                hold_ms = hold.num_milliseconds(),
                "profile placed in cooldown"
            );
        }
        inner.dirty = true;
    }

    /// Persist pending write-behind state.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut Inner) -> anyhow::Result<()> {
        if !inner.dirty {
            return Ok(());
        }
        let map: HashMap<&str, &AuthProfile> = inner
            .profiles
            .iter()
            .map(|p| (p.id.as_str(), p))
            .collect();
        let json = serde_json::to_string_pretty(&map)?;
        write_atomic(&self.path, &json)
            .with_context(|| format!("writing {}", self.path.display()))?;
        inner.dirty = false;
        Ok(())
    }

    /// Snapshot a profile's state (for result metadata and tests).
    pub async fn get(&self, id: &str) -> Option<AuthProfile> {
        let inner = self.inner.lock().await;
        inner.profiles.iter().find(|p| p.id == id).cloned()
    }
}

/// Write via a temp file + rename so readers never observe a torn file.
fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
