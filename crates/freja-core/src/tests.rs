// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// End-to-end tests for the turn runner: failover ladder, compaction
/// recovery, lanes, and payload construction.
///
/// Uses ScriptedMockDriver so every scenario is deterministic and requires
/// no network access.
#[cfg(test)]
mod turn_runner_tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use freja_auth::AuthStore;
    use freja_config::{AuthProfileConfig, Config, ToolResultFormat};
    use freja_model::{
        DriverRegistry, FailureReason, ModelDriver, ScriptedCall, ScriptedMockDriver, StreamChunk,
    };
    use freja_session::{LogEvent, SessionKey, SessionStore};

    use crate::{
        AbortHandle, LaneManager, NullToolRuntime, RunRequest, StaticToolRuntime, ToolOutcome,
        ToolRuntime, TurnError, TurnEvent, TurnRunner,
    };

    // ── Helpers ───────────────────────────────────────────────────────────────

    struct Harness {
        runner: TurnRunner,
        driver: Arc<ScriptedMockDriver>,
        auth: Arc<AuthStore>,
        store: Arc<SessionStore>,
        _dir: tempfile::TempDir,
    }

    fn config_with_profiles(ids: &[&str]) -> Config {
        let mut config = Config::default();
        config.agents.rate_limit.wait_ms = 10;
        config.auth.profiles = ids
            .iter()
            .map(|id| AuthProfileConfig {
                id: id.to_string(),
                provider: "mock".into(),
                credential_ref: format!("FREJA_TEST_{}", id.to_uppercase()),
                disabled: false,
            })
            .collect();
        config
    }

    fn harness_with(driver: ScriptedMockDriver, config: Config) -> Harness {
        harness_with_tools(driver, config, Arc::new(NullToolRuntime))
    }

    fn harness_with_tools(
        driver: ScriptedMockDriver,
        config: Config,
        tools: Arc<dyn ToolRuntime>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(driver);
        let factory_driver = driver.clone();
        let mut registry = DriverRegistry::new();
        registry.register("mock", move |_model: &str| {
            Ok(factory_driver.clone() as Arc<dyn ModelDriver>)
        });

        let auth = Arc::new(AuthStore::open(&config.auth, dir.path().join("auth.json")).unwrap());
        let store = Arc::new(SessionStore::at_root(
            dir.path().join("sessions"),
            config.sessions.history_turn_limit,
            config.agents.compaction_keep_recent,
        ));
        let runner = TurnRunner::new(
            Arc::new(config),
            Arc::new(registry),
            auth.clone(),
            store.clone(),
            Arc::new(LaneManager::new(4)),
            tools,
        );
        Harness {
            runner,
            driver,
            auth,
            store,
            _dir: dir,
        }
    }

    fn harness(driver: ScriptedMockDriver, profile_ids: &[&str]) -> Harness {
        harness_with(driver, config_with_profiles(profile_ids))
    }

    fn request(session: &str, prompt: &str) -> RunRequest {
        RunRequest::new(SessionKey::new(session), prompt, "mock", "mock-model")
    }

    fn events() -> (mpsc::Sender<TurnEvent>, mpsc::Receiver<TurnEvent>) {
        mpsc::channel(256)
    }

    async fn drain(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn assistant_events(h: &Harness, session: &str) -> Vec<LogEvent> {
        let log = h.store.open(&SessionKey::new(session)).unwrap();
        log.events()
            .iter()
            .filter(|e| matches!(e, LogEvent::Assistant { .. }))
            .cloned()
            .collect()
    }

    // ── Scenario: happy path ──────────────────────────────────────────────────

    #[tokio::test]
    async fn happy_path_single_attempt() {
        let h = harness(ScriptedMockDriver::always_text("4"), &["p1"]);
        let (tx, rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:alice", "What's 2+2?"), tx)
            .await
            .unwrap();

        assert_eq!(result.payloads.len(), 1);
        assert_eq!(result.payloads[0].text, "4");
        assert!(!result.payloads[0].is_error);
        assert_eq!(result.meta.provider, "mock");
        assert_eq!(result.meta.profile_id.as_deref(), Some("p1"));
        assert_eq!(h.driver.calls(), 1);

        let profile = h.auth.get("p1").await.unwrap();
        assert_eq!(profile.consecutive_failures, 0);
        assert!(profile.last_used_at.is_some());

        // Exactly one assistant message entered the log.
        assert_eq!(assistant_events(&h, "cli:alice").len(), 1);

        let evs = drain(rx).await;
        assert!(evs
            .iter()
            .any(|e| matches!(e, TurnEvent::PartialText(t) if t == "4")));
        assert!(matches!(evs.last(), Some(TurnEvent::Completed)));
    }

    #[tokio::test]
    async fn replayed_turn_produces_identical_payloads() {
        let run = |text: &'static str| async move {
            let h = harness(ScriptedMockDriver::always_text(text), &["p1"]);
            let (tx, _rx) = events();
            h.runner
                .run_with_fallbacks(&request("cli:replay", "same prompt"), tx)
                .await
                .unwrap()
        };
        let a = run("deterministic").await;
        let b = run("deterministic").await;
        assert_eq!(a.payloads, b.payloads);
    }

    // ── Scenario: profile rotation on auth failure ────────────────────────────

    #[tokio::test]
    async fn auth_failure_rotates_to_next_profile() {
        let driver = ScriptedMockDriver::fail_then_text("401 invalid x-api-key", "hello");
        let h = harness(driver, &["pa", "pb"]);
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:alice", "hi"), tx)
            .await
            .unwrap();

        assert_eq!(result.reply_text(), "hello");
        assert_eq!(result.meta.profile_id.as_deref(), Some("pb"));
        assert_eq!(h.driver.calls(), 2);

        let pa = h.auth.get("pa").await.unwrap();
        assert_eq!(pa.consecutive_failures, 1);
        assert!(pa.cooldown_until.unwrap() > chrono::Utc::now());

        assert_eq!(assistant_events(&h, "cli:alice").len(), 1);
    }

    // ── Scenario: rate-limit wait, then failover ──────────────────────────────

    #[tokio::test]
    async fn rate_limit_waits_once_then_raises_failover() {
        let driver = ScriptedMockDriver::new(vec![
            ScriptedCall::OpenError("429 rate limit exceeded".into()),
            ScriptedCall::OpenError("429 rate limit exceeded".into()),
        ]);
        let h = harness(driver, &["only"]);
        let (tx, rx) = events();

        let err = h
            .runner
            .run_once(&request("cli:alice", "hi"), tx)
            .await
            .unwrap_err();

        match err {
            TurnError::Failover(fe) => {
                assert_eq!(fe.reason, FailureReason::RateLimit);
                assert_eq!(fe.status, 429);
                assert_eq!(fe.model, "mock/mock-model");
            }
            other => panic!("expected failover, got {other:?}"),
        }
        // One wait happened between the two attempts.
        assert_eq!(h.driver.calls(), 2);
        let evs = drain(rx).await;
        assert!(evs
            .iter()
            .any(|e| matches!(e, TurnEvent::RateLimitWait { wait_ms } if *wait_ms == 10)));
    }

    #[tokio::test]
    async fn fallback_chain_switches_model_on_rate_limit() {
        let driver = ScriptedMockDriver::new(vec![
            ScriptedCall::OpenError("429 rate limit exceeded".into()),
            ScriptedCall::OpenError("429 rate limit exceeded".into()),
            ScriptedCall::Chunks(vec![
                StreamChunk::TextDelta("via fallback".into()),
                StreamChunk::Done,
            ]),
        ]);
        let mut config = config_with_profiles(&["only"]);
        config.agents.defaults.fallbacks = vec!["mock/mock-model".into()];
        let h = harness_with(driver, config);
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:alice", "hi"), tx)
            .await
            .unwrap();
        assert_eq!(result.reply_text(), "via fallback");
        assert_eq!(h.driver.calls(), 3);
        // The user message was appended exactly once across both models.
        let log = h.store.open(&SessionKey::new("cli:alice")).unwrap();
        let users = log
            .events()
            .iter()
            .filter(|e| matches!(e, LogEvent::User { .. }))
            .count();
        assert_eq!(users, 1);
    }

    #[tokio::test]
    async fn exhausted_chain_surfaces_provider_message() {
        let driver = ScriptedMockDriver::new(vec![
            ScriptedCall::OpenError("429 rate limit exceeded".into()),
            ScriptedCall::OpenError("429 rate limit exceeded".into()),
        ]);
        let h = harness(driver, &["only"]);
        let (tx, _rx) = events();
        let result = h
            .runner
            .run_with_fallbacks(&request("cli:alice", "hi"), tx)
            .await
            .unwrap();
        assert!(result.is_error());
        assert!(result.payloads[0].text.contains("rate limit"));
    }

    // ── Scenario: context overflow recovery ───────────────────────────────────

    async fn seed_history(h: &Harness, session: &str, turns: usize) {
        let key = SessionKey::new(session);
        let mut log = h.store.open(&key).unwrap();
        for i in 0..turns {
            log.append(LogEvent::user(format!("old question {i}"))).unwrap();
            log.append(LogEvent::assistant(format!("old answer {i}"))).unwrap();
        }
    }

    #[tokio::test]
    async fn overflow_compacts_once_then_succeeds() {
        let driver = ScriptedMockDriver::new(vec![
            ScriptedCall::OpenError("prompt is too long: maximum context exceeded".into()),
            ScriptedCall::Chunks(vec![
                StreamChunk::TextDelta("recovered".into()),
                StreamChunk::Done,
            ]),
        ])
        .script_compact(Ok("summary of the early conversation".into()));
        let h = harness(driver, &["p1"]);
        seed_history(&h, "cli:long", 6).await;
        let (tx, rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:long", "continue"), tx)
            .await
            .unwrap();

        assert_eq!(result.reply_text(), "recovered");
        assert!(!result.is_error());

        // The log gained a branch; the original events are still there.
        let log = h.store.open(&SessionKey::new("cli:long")).unwrap();
        assert_eq!(log.branch_count(), 1);
        assert!(log
            .events()
            .iter()
            .any(|e| matches!(e, LogEvent::User { content, .. } if content == "old question 0")));

        let evs = drain(rx).await;
        assert!(evs
            .iter()
            .any(|e| matches!(e, TurnEvent::Compacted { summary } if summary.contains("summary"))));
    }

    #[tokio::test]
    async fn second_overflow_is_terminal_not_a_loop() {
        let driver = ScriptedMockDriver::new(vec![
            ScriptedCall::OpenError("prompt is too long".into()),
            ScriptedCall::OpenError("prompt is too long".into()),
        ])
        .script_compact(Ok("summary".into()));
        let h = harness(driver, &["p1"]);
        seed_history(&h, "cli:long", 6).await;
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:long", "continue"), tx)
            .await
            .unwrap();

        assert!(result.is_error());
        assert!(result.payloads[0].text.contains("fresh session"));
        assert_eq!(h.driver.calls(), 2, "no infinite compaction loop");
    }

    #[tokio::test]
    async fn failed_compaction_surfaces_overflow_and_records_marker() {
        let driver = ScriptedMockDriver::new(vec![ScriptedCall::OpenError(
            "prompt is too long".into(),
        )])
        .script_compact(Err("summariser refused".into()));
        let h = harness(driver, &["p1"]);
        seed_history(&h, "cli:long", 6).await;
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:long", "continue"), tx)
            .await
            .unwrap();
        assert!(result.is_error());
        assert_eq!(h.driver.calls(), 1);

        let log = h.store.open(&SessionKey::new("cli:long")).unwrap();
        assert!(log.events().iter().any(|e| matches!(
            e,
            LogEvent::System { kind, .. } if kind.as_deref() == Some("compaction_failed")
        )));
    }

    // ── Terminal classifications ──────────────────────────────────────────────

    #[tokio::test]
    async fn role_ordering_error_is_terminal_without_rotation() {
        let driver = ScriptedMockDriver::new(vec![ScriptedCall::OpenError(
            "messages: roles must alternate".into(),
        )]);
        let h = harness(driver, &["pa", "pb"]);
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:a", "hi"), tx)
            .await
            .unwrap();
        assert!(result.is_error());
        assert!(result.payloads[0].text.contains("fresh session"));
        assert_eq!(h.driver.calls(), 1, "no rotation on ordering conflicts");
        // Neither profile was penalised.
        assert_eq!(h.auth.get("pa").await.unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn image_size_error_gives_user_guidance() {
        let driver = ScriptedMockDriver::new(vec![ScriptedCall::OpenError(
            "image exceeds 5 MB maximum".into(),
        )]);
        let h = harness(driver, &["pa", "pb"]);
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:a", "look"), tx)
            .await
            .unwrap();
        assert!(result.is_error());
        assert!(result.payloads[0].text.contains("compress"));
        assert_eq!(h.driver.calls(), 1, "image errors never retry");
    }

    // ── Context-window guard ──────────────────────────────────────────────────

    #[tokio::test]
    async fn tiny_context_window_is_rejected_before_any_driver_call() {
        let driver = ScriptedMockDriver::always_text("unreachable").with_model("mock-tiny");
        let h = harness(driver, &["p1"]);
        let mut req = request("cli:a", "hi");
        req.model = "mock-tiny".into();
        let (tx, _rx) = events();

        let err = h.runner.run_once(&req, tx).await.unwrap_err();
        match err {
            TurnError::Failover(fe) => {
                assert_eq!(fe.reason, FailureReason::Unknown);
                assert!(fe.message.contains("usable floor"));
                assert!(fe.model.contains("mock-tiny"));
            }
            other => panic!("expected failover, got {other:?}"),
        }
        assert_eq!(h.driver.calls(), 0, "guard fires before the driver");
    }

    // ── Profile pool exhaustion ───────────────────────────────────────────────

    #[tokio::test]
    async fn all_profiles_in_cooldown_returns_single_error_without_driver_call() {
        let h = harness(ScriptedMockDriver::always_text("nope"), &["pa", "pb"]);
        h.auth.mark_failure("pa", FailureReason::Auth).await;
        h.auth.mark_failure("pb", FailureReason::Auth).await;
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:a", "hi"), tx)
            .await
            .unwrap();
        assert!(result.is_error());
        assert_eq!(result.payloads.len(), 1);
        assert!(result.payloads[0].text.contains("no usable auth profile"));
        assert_eq!(h.driver.calls(), 0);
    }

    // ── Thinking-level fallback ───────────────────────────────────────────────

    #[tokio::test]
    async fn unsupported_thinking_steps_down_and_retries() {
        let driver = ScriptedMockDriver::new(vec![
            ScriptedCall::OpenError("thinking is not supported on this model".into()),
            ScriptedCall::Chunks(vec![
                StreamChunk::TextDelta("ok without thinking".into()),
                StreamChunk::Done,
            ]),
        ]);
        let h = harness(driver, &["p1"]);
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(
                &request("cli:a", "hi").with_think_level(freja_config::ThinkLevel::High),
                tx,
            )
            .await
            .unwrap();
        assert_eq!(result.reply_text(), "ok without thinking");
        assert_eq!(h.driver.calls(), 2);
        // The profile was not penalised for a capability mismatch.
        assert_eq!(h.auth.get("p1").await.unwrap().consecutive_failures, 0);
    }

    // ── Abort ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn pre_aborted_request_never_runs() {
        let h = harness(ScriptedMockDriver::always_text("nope"), &["p1"]);
        let abort = AbortHandle::new();
        abort.abort();
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:a", "hi").with_abort(abort), tx)
            .await
            .unwrap();
        assert!(result.meta.aborted);
        assert!(result.payloads.is_empty(), "aborted turns carry no error");
        assert_eq!(h.driver.calls(), 0);
    }

    #[tokio::test]
    async fn abort_during_rate_limit_wait_is_observed() {
        let driver = ScriptedMockDriver::new(vec![ScriptedCall::OpenError(
            "429 rate limit exceeded".into(),
        )]);
        let mut config = config_with_profiles(&["p1"]);
        config.agents.rate_limit.wait_ms = 30_000;
        let h = harness_with(driver, config);
        let abort = AbortHandle::new();
        let req = request("cli:a", "hi").with_abort(abort.clone());
        let (tx, _rx) = events();

        let aborter = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            abort.abort();
        });
        let started = std::time::Instant::now();
        let result = h.runner.run_with_fallbacks(&req, tx).await.unwrap();
        aborter.await.unwrap();

        assert!(result.meta.aborted);
        assert!(
            started.elapsed() < std::time::Duration::from_secs(5),
            "abort must cut the rate-limit sleep short"
        );
    }

    // ── Tool calls ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn tool_call_is_dispatched_and_logged() {
        let driver =
            ScriptedMockDriver::tool_then_text("call-1", "calc", r#"{"expr":"2+2"}"#, "it is 4");
        let tools = Arc::new(StaticToolRuntime::new().with_tool("calc", ToolOutcome::ok("4")));
        let h = harness_with_tools(driver, config_with_profiles(&["p1"]), tools.clone());
        let (tx, rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:a", "2+2?"), tx)
            .await
            .unwrap();

        assert_eq!(result.payloads[0].text, "it is 4");
        // Compact format: one extra payload summarising tool activity.
        assert_eq!(result.payloads.len(), 2);
        assert!(result.payloads[1].text.contains("calc — ok"));
        assert_eq!(tools.invocations().len(), 1);

        let log = h.store.open(&SessionKey::new("cli:a")).unwrap();
        assert!(log
            .events()
            .iter()
            .any(|e| matches!(e, LogEvent::ToolCall { name, .. } if name == "calc")));
        assert!(log
            .events()
            .iter()
            .any(|e| matches!(e, LogEvent::ToolResult { content, .. } if content == "4")));

        let evs = drain(rx).await;
        assert!(evs
            .iter()
            .any(|e| matches!(e, TurnEvent::ToolStarted { name, .. } if name == "calc")));
        assert!(evs
            .iter()
            .any(|e| matches!(e, TurnEvent::ToolFinished { is_error, .. } if !is_error)));
    }

    #[tokio::test]
    async fn failing_tool_is_reported_in_band_without_ending_turn() {
        let driver =
            ScriptedMockDriver::tool_then_text("call-1", "calc", "{}", "done anyway");
        let tools = Arc::new(
            StaticToolRuntime::new().with_tool("calc", ToolOutcome::err("division by zero", None)),
        );
        let h = harness_with_tools(driver, config_with_profiles(&["p1"]), tools);
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:a", "1/0"), tx)
            .await
            .unwrap();
        assert_eq!(result.payloads[0].text, "done anyway");
        assert!(result.payloads[1].text.contains("calc — failed"));
        assert!(!result.is_error(), "tool errors are in-band, not terminal");
    }

    #[tokio::test]
    async fn fatal_tool_failure_ends_the_turn_without_rotation() {
        let driver = ScriptedMockDriver::tool_then_text("c", "calc", "{}", "never reached");
        let tools = Arc::new(
            StaticToolRuntime::new()
                .with_tool("calc", ToolOutcome::err("backend unreachable", Some("fatal".into()))),
        );
        let h = harness_with_tools(driver, config_with_profiles(&["pa", "pb"]), tools);
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:a", "compute"), tx)
            .await
            .unwrap();
        assert!(result.is_error());
        assert!(result.payloads[0].text.contains("calc"));
        assert_eq!(h.driver.calls(), 1, "fatal tool errors never rotate");
        assert_eq!(h.auth.get("pa").await.unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn hidden_tool_format_omits_tool_payloads() {
        let driver = ScriptedMockDriver::tool_then_text("c", "calc", "{}", "answer");
        let tools = Arc::new(StaticToolRuntime::new().with_tool("calc", ToolOutcome::ok("4")));
        let h = harness_with_tools(driver, config_with_profiles(&["p1"]), tools);
        let mut req = request("cli:a", "q");
        req.tool_result_format = ToolResultFormat::Hidden;
        let (tx, _rx) = events();

        let result = h.runner.run_with_fallbacks(&req, tx).await.unwrap();
        assert_eq!(result.payloads.len(), 1);
    }

    #[tokio::test]
    async fn client_hosted_tool_surfaces_pending_call() {
        let driver = ScriptedMockDriver::new(vec![ScriptedCall::Chunks(vec![
            StreamChunk::ToolCall {
                index: 0,
                id: "b-1".into(),
                name: "browser".into(),
                arguments: r#"{"url":"https://example.com"}"#.into(),
            },
            StreamChunk::ToolCallEnd { index: 0 },
            StreamChunk::Done,
        ])]);
        let tools = Arc::new(StaticToolRuntime::new().with_client_hosted("browser"));
        let h = harness_with_tools(driver, config_with_profiles(&["p1"]), tools.clone());
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:a", "open it"), tx)
            .await
            .unwrap();
        assert_eq!(result.meta.stop_reason.as_deref(), Some("tool_calls"));
        assert_eq!(result.pending_tool_calls.len(), 1);
        assert_eq!(result.pending_tool_calls[0].name, "browser");
        assert!(tools.invocations().is_empty(), "host tools are not invoked here");
    }

    // ── Final tag ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn final_tag_is_stripped_from_reply() {
        let driver = ScriptedMockDriver::always_text("the answer [[final]]");
        let h = harness(driver, &["p1"]);
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:a", "q"), tx)
            .await
            .unwrap();
        assert_eq!(result.reply_text(), "the answer");
    }

    #[tokio::test]
    async fn missing_final_tag_is_soft() {
        let driver = ScriptedMockDriver::always_text("no tag here");
        let h = harness(driver, &["p1"]);
        let mut req = request("cli:a", "q");
        req.require_final_tag = true;
        let (tx, _rx) = events();

        let result = h.runner.run_with_fallbacks(&req, tx).await.unwrap();
        assert!(!result.is_error(), "missing sentinel must not fail the turn");
        assert_eq!(result.reply_text(), "no tag here");
    }

    // ── Timeout ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn timeout_rotates_like_a_rate_limit() {
        let driver = ScriptedMockDriver::new(vec![
            ScriptedCall::DelayedChunks(
                5_000,
                vec![StreamChunk::TextDelta("too late".into()), StreamChunk::Done],
            ),
            ScriptedCall::Chunks(vec![
                StreamChunk::TextDelta("fast".into()),
                StreamChunk::Done,
            ]),
        ]);
        let mut config = config_with_profiles(&["slow", "fast"]);
        config.agents.attempt_timeout_secs = 1;
        let h = harness_with(driver, config);
        let (tx, _rx) = events();

        let result = h
            .runner
            .run_with_fallbacks(&request("cli:a", "hi"), tx)
            .await
            .unwrap();
        assert_eq!(result.reply_text(), "fast");
        let slow = h.auth.get("slow").await.unwrap();
        assert_eq!(slow.consecutive_failures, 1);
    }
}
