// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The failover & compaction controller.
//!
//! Wraps the attempt engine with the per-turn recovery ladder: transcript
//! compaction on context overflow, thinking-level step-down, a one-shot
//! rate-limit wait, auth-profile rotation, and — when every in-controller
//! strategy is exhausted — a [`FailoverError`] telling the caller to move
//! to the next model in the fallback chain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use freja_auth::AuthStore;
use freja_config::{Config, ModelRef, ToolResultFormat};
use freja_model::{
    classify::{classify, is_unsupported_thinking},
    DriverRegistry, FailureReason, ModelDescriptor,
};
use freja_session::{LogEvent, SessionStore};

use crate::{
    attempt::{run_attempt, AttemptCtx},
    events::TurnEvent,
    lanes::LaneManager,
    request::{Attempt, Payload, RunMeta, RunRequest, RunResult},
    tools::ToolRuntime,
};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Freja, a helpful personal assistant. Reply concisely and plainly.";

/// Escalation signal: the current model cannot serve this turn; switch to
/// the next model in the fallback chain.  Not a user-visible error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failover from {model} ({reason}, status {status}): {message}")]
pub struct FailoverError {
    pub reason: FailureReason,
    pub status: u16,
    /// `provider/model` tag of the model that gave up.
    pub model: String,
    pub message: String,
}

impl FailoverError {
    fn new(reason: FailureReason, model: &str, message: impl Into<String>) -> Self {
        Self {
            reason,
            status: reason.status(),
            model: model.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Failover(#[from] FailoverError),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// Drives one user turn to completion against the model fallback chain.
///
/// The whole controller runs inside the session lane and a global provider
/// lane, so a session never has two attempts in flight and provider
/// concurrency stays bounded.
pub struct TurnRunner {
    config: Arc<Config>,
    registry: Arc<DriverRegistry>,
    auth: Arc<AuthStore>,
    sessions: Arc<SessionStore>,
    lanes: Arc<LaneManager>,
    tools: Arc<dyn ToolRuntime>,
}

impl TurnRunner {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<DriverRegistry>,
        auth: Arc<AuthStore>,
        sessions: Arc<SessionStore>,
        lanes: Arc<LaneManager>,
        tools: Arc<dyn ToolRuntime>,
    ) -> Self {
        Self {
            config,
            registry,
            auth,
            sessions,
            lanes,
            tools,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Run a turn, walking the configured model fallback chain on each
    /// [`FailoverError`].  When the chain is exhausted the last provider
    /// message is surfaced as a user-visible error payload.
    pub async fn run_with_fallbacks(
        &self,
        req: &RunRequest,
        events: mpsc::Sender<TurnEvent>,
    ) -> anyhow::Result<RunResult> {
        let started = std::time::Instant::now();
        let mut chain = vec![ModelRef {
            provider: req.provider.clone(),
            model: req.model.clone(),
        }];
        for raw in &self.config.agents.defaults.fallbacks {
            match raw.parse::<ModelRef>() {
                Ok(m) => chain.push(m),
                Err(e) => warn!(fallback = %raw, error = %e, "skipping malformed fallback entry"),
            }
        }

        let mut user_appended = false;
        let mut last_failover: Option<FailoverError> = None;
        for model in &chain {
            match self
                .run_model(req, model, &mut user_appended, events.clone())
                .await
            {
                Ok(mut result) => {
                    result.meta.duration_ms = started.elapsed().as_millis() as u64;
                    return Ok(result);
                }
                Err(TurnError::Failover(fe)) => {
                    warn!(
                        model = %fe.model,
                        reason = %fe.reason,
                        status = fe.status,
                        "model failed over; trying next in chain"
                    );
                    last_failover = Some(fe);
                }
                Err(TurnError::Fatal(e)) => return Err(e),
            }
        }

        // Chain exhausted: surface the normalized provider message.
        let Some(fe) = last_failover else {
            anyhow::bail!("model fallback chain was empty");
        };
        let mut result = error_result(
            &fe.model,
            fe.reason,
            format!("The model request failed: {}", fe.message),
        );
        result.meta.duration_ms = started.elapsed().as_millis() as u64;
        result.meta.session_id = req.session_key.to_string();
        let _ = events.send(TurnEvent::Completed).await;
        Ok(result)
    }

    /// Run a turn against a single model.  Raises [`TurnError::Failover`]
    /// when this model cannot serve the turn and the caller should try the
    /// next one.
    pub async fn run_once(
        &self,
        req: &RunRequest,
        events: mpsc::Sender<TurnEvent>,
    ) -> Result<RunResult, TurnError> {
        let model = ModelRef {
            provider: req.provider.clone(),
            model: req.model.clone(),
        };
        let mut user_appended = false;
        self.run_model(req, &model, &mut user_appended, events).await
    }

    async fn run_model(
        &self,
        req: &RunRequest,
        model: &ModelRef,
        user_appended: &mut bool,
        events: mpsc::Sender<TurnEvent>,
    ) -> Result<RunResult, TurnError> {
        let fut = self.run_in_lane(req, model, user_appended, events);
        match self
            .lanes
            .run(req.session_key.as_str(), &model.provider, &req.abort, fut)
            .await
        {
            Ok(result) => result,
            Err(_) => Ok(aborted_result(req, &model.to_string())),
        }
    }

    async fn run_in_lane(
        &self,
        req: &RunRequest,
        model: &ModelRef,
        user_appended: &mut bool,
        events: mpsc::Sender<TurnEvent>,
    ) -> Result<RunResult, TurnError> {
        let tag = model.to_string();

        // Resolve the driver and apply the context-window guard BEFORE any
        // driver call.
        let (descriptor, driver) = self
            .registry
            .resolve(&model.provider, &model.model)
            .map_err(|e| FailoverError::new(FailureReason::Unknown, &tag, e.to_string()))?;
        let window = &self.config.agents.context_window;
        if descriptor.context_window_tokens < window.hard_min_tokens {
            return Err(FailoverError::new(
                FailureReason::Unknown,
                &tag,
                format!(
                    "context window of {} ({} tokens) is below the usable floor ({} tokens)",
                    descriptor.tag(),
                    descriptor.context_window_tokens,
                    window.hard_min_tokens
                ),
            )
            .into());
        }
        if descriptor.context_window_tokens < window.warn_below_tokens {
            warn!(
                model = %descriptor.tag(),
                window = descriptor.context_window_tokens,
                "model context window is below the warning threshold"
            );
        }

        let mut log = self
            .sessions
            .open(&req.session_key)
            .map_err(TurnError::Fatal)?;
        if !*user_appended {
            let event = if req.images.is_empty() {
                LogEvent::user(&req.prompt)
            } else {
                LogEvent::user_with_images(&req.prompt, req.images.clone())
            };
            log.append(event).map_err(TurnError::Fatal)?;
            *user_appended = true;
        }

        let candidates = self
            .auth
            .order(&model.provider, req.preferred_profile.as_deref())
            .await;
        // Providers without key auth (mock, local servers) run without a
        // profile when none is configured at all.  An exhausted pool is a
        // different situation: that surfaces as an error below.
        let anonymous = !self.auth.has_profiles(&model.provider).await
            && freja_model::get_driver_meta(&model.provider)
                .map_or(false, |m| m.default_api_key_env.is_none());
        if candidates.is_empty() && !anonymous {
            return Err(FailoverError::new(
                FailureReason::Unknown,
                &tag,
                format!("no usable auth profile for provider '{}'", model.provider),
            )
            .into());
        }

        let token_budget = descriptor
            .context_window_tokens
            .saturating_sub(descriptor.max_output_tokens)
            .saturating_sub(self.config.agents.compaction_reserve_tokens)
            as usize;
        let system_prompt = req
            .extra_system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let timeout = (self.config.agents.attempt_timeout_secs > 0)
            .then(|| Duration::from_secs(self.config.agents.attempt_timeout_secs));

        let mut think_level = req.think_level;
        let mut overflow_recovery_attempted = false;
        let mut rate_limit_wait_attempted = false;
        let mut profile_idx = 0usize;
        let mut last_failure: Option<(FailureReason, String)> = None;

        loop {
            if req.abort.is_aborted() {
                return Ok(aborted_result(req, &tag));
            }

            // Select the next usable profile, skipping any that entered
            // cooldown since the candidate list was built.
            let profile_id: Option<String> = if anonymous {
                None
            } else {
                loop {
                    match candidates.get(profile_idx) {
                        Some(id) if self.auth.is_in_cooldown(id).await => profile_idx += 1,
                        Some(id) => break Some(id.clone()),
                        None => {
                            let (reason, message) = last_failure.clone().unwrap_or((
                                FailureReason::Unknown,
                                "no usable auth profile".to_string(),
                            ));
                            return Err(FailoverError::new(reason, &tag, message).into());
                        }
                    }
                }
            };
            let api_key = match &profile_id {
                Some(id) => self.auth.credential(id).await,
                None => None,
            };

            debug!(
                session = %req.session_key,
                model = %descriptor.tag(),
                profile = profile_id.as_deref().unwrap_or("-"),
                think = %think_level,
                "starting attempt"
            );
            let attempt = run_attempt(AttemptCtx {
                driver: driver.as_ref(),
                tools: self.tools.as_ref(),
                store: self.sessions.as_ref(),
                log: &mut log,
                key: &req.session_key,
                system_prompt: system_prompt.clone(),
                api_key,
                think_level,
                token_budget: Some(token_budget),
                timeout,
                require_final_tag: req.require_final_tag,
                abort: req.abort.clone(),
                events: events.clone(),
            })
            .await;

            match attempt.terminal_signal() {
                Some(FailureReason::Aborted) => {
                    return Ok(aborted_result(req, &tag));
                }
                Some(FailureReason::Timeout) => {
                    // A silent stall is indistinguishable from throttling:
                    // rotate like a rate limit.
                    warn!(model = %descriptor.tag(), "attempt timed out");
                    last_failure = Some((FailureReason::Timeout, "attempt timed out".into()));
                    match &profile_id {
                        Some(id) => {
                            self.auth.mark_failure(id, FailureReason::Timeout).await;
                            profile_idx += 1;
                            continue;
                        }
                        None => {
                            return Err(FailoverError::new(
                                FailureReason::Timeout,
                                &tag,
                                "attempt timed out",
                            )
                            .into())
                        }
                    }
                }
                _ => {}
            }

            if let Some(error_text) = attempt.error_text().map(str::to_string) {
                if is_unsupported_thinking(&error_text) {
                    if let Some(lower) = think_level.step_down() {
                        debug!(from = %think_level, to = %lower, "stepping thinking level down");
                        think_level = lower;
                        continue;
                    }
                    // No lower level left: fall through to general failover.
                }

                match classify(&error_text) {
                    FailureReason::ContextOverflow => {
                        if overflow_recovery_attempted {
                            let _ = events.send(TurnEvent::Completed).await;
                            return Ok(context_overflow_result(req, &tag));
                        }
                        overflow_recovery_attempted = true;
                        match self
                            .sessions
                            .compact(&mut log, &req.session_key, driver.as_ref())
                            .await
                        {
                            Ok(summary) => {
                                let _ = events.send(TurnEvent::Compacted { summary }).await;
                                continue;
                            }
                            Err(e) => {
                                warn!(error = %e, "compaction failed; surfacing overflow");
                                let _ = self
                                    .sessions
                                    .record_compaction_failure(&mut log, &e.to_string());
                                let _ = events.send(TurnEvent::Completed).await;
                                return Ok(context_overflow_result(req, &tag));
                            }
                        }
                    }
                    FailureReason::CompactionFailure => {
                        let _ = events.send(TurnEvent::Completed).await;
                        return Ok(context_overflow_result(req, &tag));
                    }
                    FailureReason::RoleOrdering => {
                        let _ = events.send(TurnEvent::Completed).await;
                        return Ok(error_result(
                            &tag,
                            FailureReason::RoleOrdering,
                            "The provider rejected the conversation's message ordering. \
                             Starting a fresh session should resolve this.",
                        ));
                    }
                    FailureReason::ImageSize => {
                        let _ = events.send(TurnEvent::Completed).await;
                        return Ok(error_result(
                            &tag,
                            FailureReason::ImageSize,
                            "The provider rejected an attached image: it is too large. \
                             Please compress the image and try again.",
                        ));
                    }
                    FailureReason::ImageDimension => {
                        let _ = events.send(TurnEvent::Completed).await;
                        return Ok(error_result(
                            &tag,
                            FailureReason::ImageDimension,
                            "The provider rejected an attached image: its dimensions are \
                             too large. Please resize the image and try again.",
                        ));
                    }
                    FailureReason::ToolError => {
                        // A fatal tool failure is not a credential problem;
                        // rotating or falling back would re-run it for nothing.
                        let _ = events.send(TurnEvent::Completed).await;
                        return Ok(error_result(
                            &tag,
                            FailureReason::ToolError,
                            format!("A required tool failed: {error_text}"),
                        ));
                    }
                    FailureReason::RateLimit => {
                        if !rate_limit_wait_attempted {
                            rate_limit_wait_attempted = true;
                            let wait_ms = self.config.agents.rate_limit.wait_ms;
                            let _ = events.send(TurnEvent::RateLimitWait { wait_ms }).await;
                            tokio::select! {
                                biased;
                                _ = req.abort.cancelled() => return Ok(aborted_result(req, &tag)),
                                _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
                            }
                            continue;
                        }
                        last_failure = Some((FailureReason::RateLimit, error_text.clone()));
                        match &profile_id {
                            Some(id) => {
                                self.auth.mark_failure(id, FailureReason::RateLimit).await;
                                profile_idx += 1;
                                think_level = req.think_level;
                                continue;
                            }
                            None => {
                                return Err(FailoverError::new(
                                    FailureReason::RateLimit,
                                    &tag,
                                    error_text,
                                )
                                .into())
                            }
                        }
                    }
                    reason => {
                        // Auth and unclassified failures: mark, rotate,
                        // reset the thinking level, retry.
                        last_failure = Some((reason, error_text.clone()));
                        match &profile_id {
                            Some(id) => {
                                self.auth.mark_failure(id, reason).await;
                                profile_idx += 1;
                                think_level = req.think_level;
                                continue;
                            }
                            None => {
                                return Err(FailoverError::new(reason, &tag, error_text).into())
                            }
                        }
                    }
                }
            }

            // Success.
            if let Some(id) = &profile_id {
                self.auth.mark_good(id).await.map_err(TurnError::Fatal)?;
                self.auth.mark_used(id).await;
            }
            let _ = events.send(TurnEvent::Completed).await;
            return Ok(build_success(req, &descriptor, attempt, profile_id));
        }
    }
}

fn aborted_result(req: &RunRequest, model_tag: &str) -> RunResult {
    RunResult {
        payloads: Vec::new(),
        meta: RunMeta {
            session_id: req.session_key.to_string(),
            model: model_tag.to_string(),
            aborted: true,
            ..Default::default()
        },
        pending_tool_calls: Vec::new(),
    }
}

fn context_overflow_result(req: &RunRequest, model_tag: &str) -> RunResult {
    let mut result = error_result(
        model_tag,
        FailureReason::ContextOverflow,
        "This conversation no longer fits the model's context window and could not be \
         summarised automatically. Please start a fresh session.",
    );
    result.meta.session_id = req.session_key.to_string();
    result
}

fn error_result(model_tag: &str, reason: FailureReason, message: impl Into<String>) -> RunResult {
    let message = message.into();
    RunResult {
        payloads: vec![Payload::error(&message)],
        meta: RunMeta {
            model: model_tag.to_string(),
            error: Some(format!("{reason}: {message}")),
            ..Default::default()
        },
        pending_tool_calls: Vec::new(),
    }
}

fn build_success(
    req: &RunRequest,
    descriptor: &ModelDescriptor,
    attempt: Attempt,
    profile_id: Option<String>,
) -> RunResult {
    let mut payloads: Vec<Payload> = attempt
        .assistant_texts
        .iter()
        .map(|t| Payload::text(t.clone()))
        .collect();

    match req.tool_result_format {
        ToolResultFormat::Hidden => {}
        ToolResultFormat::Compact if !attempt.tool_metas.is_empty() => {
            let lines: Vec<String> = attempt
                .tool_metas
                .iter()
                .map(|m| {
                    format!(
                        "• {} — {}",
                        m.name,
                        if m.is_error { "failed" } else { "ok" }
                    )
                })
                .collect();
            payloads.push(Payload::text(lines.join("\n")));
        }
        ToolResultFormat::Compact => {}
        ToolResultFormat::Full => {
            for m in &attempt.tool_metas {
                payloads.push(Payload::text(format!(
                    "[{}] {}\n{}",
                    m.name,
                    if m.is_error { "failed" } else { "ok" },
                    m.output
                )));
            }
        }
    }

    let stop_reason = if attempt.client_tool_call.is_some() {
        Some("tool_calls".to_string())
    } else {
        attempt
            .last_assistant
            .as_ref()
            .and_then(|a| a.stop_reason.clone())
            .or(Some("stop".to_string()))
    };

    RunResult {
        meta: RunMeta {
            duration_ms: 0,
            session_id: req.session_key.to_string(),
            provider: descriptor.provider.clone(),
            model: descriptor.id.clone(),
            usage: attempt.usage,
            stop_reason,
            error: None,
            profile_id,
            aborted: false,
        },
        pending_tool_calls: attempt.client_tool_call.into_iter().collect(),
        payloads,
    }
}
