// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use freja_config::CooldownConfig;
use freja_model::FailureReason;

/// One credential in the provider pool.
///
/// The credential itself never appears here: `credential_ref` names the
/// environment variable (or secret-store key) holding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthProfile {
    pub id: String,
    pub provider: String,
    pub credential_ref: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl AuthProfile {
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        credential_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            credential_ref: credential_ref.into(),
            disabled: false,
            cooldown_until: None,
            last_used_at: None,
            consecutive_failures: 0,
        }
    }

    /// A profile is usable iff it is enabled and any cooldown has passed.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.disabled && self.cooldown_until.map_or(true, |until| until <= now)
    }

    pub fn is_in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map_or(false, |until| until > now)
    }
}

/// Cooldown applied after a failure, as a function of the reason and the
/// profile's consecutive-failure count.
///
/// Rate limits back off exponentially with ±12.5% jitter so a pool of
/// profiles does not thunder back in lockstep; the auth hold is long (the
/// credential is likely bad until someone fixes it); timeouts get a short
/// hold; everything else a medium one.
pub fn cooldown_duration(
    reason: FailureReason,
    consecutive_failures: u32,
    cfg: &CooldownConfig,
) -> Duration {
    let ms = match reason {
        FailureReason::RateLimit => {
            let exp = consecutive_failures.saturating_sub(1).min(16);
            let base = cfg.rate_limit_base_ms.saturating_mul(1u64 << exp);
            let capped = base.min(cfg.rate_limit_cap_ms);
            if capped >= cfg.rate_limit_cap_ms {
                capped
            } else {
                jitter(capped)
            }
        }
        FailureReason::Auth => cfg.auth_hold_ms,
        FailureReason::Timeout => cfg.timeout_hold_ms,
        _ => cfg.unknown_hold_ms,
    };
    Duration::milliseconds(ms as i64)
}

/// ±12.5% multiplicative jitter.
fn jitter(ms: u64) -> u64 {
    let spread = ms / 8;
    if spread == 0 {
        return ms;
    }
    let offset = rand::thread_rng().gen_range(0..=spread * 2);
    ms - spread + offset
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
