//! End-to-end runs against scripted backends on virtual time

mod common;

use chorus_core::{
    estimate_tokens, AgentOutcome, BackendError, BudgetKind, BudgetScope, ChatMessage, ChorusError,
    ChunkKind, DoneStatus, LongestAnswer, Orchestrator, StreamChunk, TimeoutConfig,
    ORCHESTRATOR_SOURCE,
};
use common::*;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn question() -> Vec<ChatMessage> {
    vec![ChatMessage::user("Why is the sky blue?")]
}

async fn collect(orchestrator: &Orchestrator) -> Vec<StreamChunk> {
    orchestrator.chat(question(), None).collect().await
}

#[tokio::test(start_paused = true)]
async fn test_all_agents_complete() {
    let fast = ScriptedBackend::new(vec![sleep(1), text("Rayleigh "), text("scattering."), done(12, 4)]);
    let slow = ScriptedBackend::new(vec![sleep(3), text("Because of scattering."), done(12, 6)]);
    let orchestrator = Orchestrator::new(
        vec![agent("fast", fast), agent("slow", slow)],
        TimeoutConfig::default(),
    );

    let summary = orchestrator.run(question(), None).await.unwrap();

    assert_single_terminal_done(&summary.chunks);
    assert_eq!(summary.status, DoneStatus::Completed);
    assert_eq!(summary.answer.as_deref(), Some("Rayleigh scattering."));
    assert!(summary.errors.is_empty());
    assert_eq!(summary.content_from("fast"), "Rayleigh scattering.");
    assert_eq!(summary.content_from("slow"), "Because of scattering.");
    assert!(summary.agents.iter().all(|a| a.outcome == AgentOutcome::Completed));

    let done = summary.chunks.last().unwrap();
    assert_eq!(done.source(), ORCHESTRATOR_SOURCE);

    // Agent done chunks are not relayed
    assert!(summary.chunks[..summary.chunks.len() - 1].iter().all(|c| !c.is_done()));

    let statuses = orchestrator.agent_statuses();
    assert_eq!(statuses[0].backend.token_usage.total_tokens(), 16);
    assert_eq!(statuses[1].backend.token_usage.total_tokens(), 18);
}

#[tokio::test(start_paused = true)]
async fn test_chunks_are_relayed_as_they_arrive() {
    let a = ScriptedBackend::new(vec![sleep(1), text("a1"), sleep(2), text("a2"), done(1, 1)]);
    let b = ScriptedBackend::new(vec![sleep(2), text("b1"), sleep(2), text("b2"), done(1, 1)]);
    let orchestrator = Orchestrator::new(vec![agent("a", a), agent("b", b)], TimeoutConfig::default());

    let chunks = collect(&orchestrator).await;

    let order: Vec<&str> = chunks.iter().filter(|c| c.is_content()).map(|c| c.text()).collect();
    assert_eq!(order, vec!["a1", "b1", "a2", "b2"]);
    assert_single_terminal_done(&chunks);
}

#[tokio::test(start_paused = true)]
async fn test_agent_timeout_is_contained() {
    let steps = vec![text("Once upon a time "), Step::Hang];
    let orchestrator = Orchestrator::new(
        vec![agent("storyteller", ScriptedBackend::new(steps))],
        timeouts(10, 1000, 600, 75_000, true),
    );

    let started = Instant::now();
    let chunks = collect(&orchestrator).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(10) && elapsed <= Duration::from_secs(11));
    assert_single_terminal_done(&chunks);

    let error = chunks.iter().find(|c| c.is_error()).unwrap();
    assert_eq!(error.source(), "storyteller");
    assert!(error.error.as_deref().unwrap().contains("time limit exceeded"));

    let done = chunks.last().unwrap();
    assert_eq!(done.status, Some(DoneStatus::Degraded));
    assert_eq!(done.text(), "Once upon a time ");
}

#[tokio::test(start_paused = true)]
async fn test_silent_agent_timeout_is_degraded() {
    let orchestrator = Orchestrator::new(
        vec![agent("solo", ScriptedBackend::new(vec![Step::Hang]))],
        timeouts(10, 1000, 600, 75_000, true),
    );

    let started = Instant::now();
    let chunks: Vec<_> = orchestrator.chat_simple("Are you there?").collect().await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    assert_eq!(chunks.len(), 2);
    assert_eq!(
        chunks[0].error.as_deref(),
        Some("agent 'solo' time limit exceeded after 10.0s (limit 10s)")
    );
    let done = &chunks[1];
    assert_eq!(done.source(), ORCHESTRATOR_SOURCE);
    assert_eq!(done.status, Some(DoneStatus::Degraded));
    assert_eq!(done.content, None);
}

#[tokio::test(start_paused = true)]
async fn test_huge_timeouts_do_not_overflow() {
    let orchestrator = Orchestrator::new(
        vec![agent("a", ScriptedBackend::new(vec![sleep(1), text("fine"), done(2, 1)]))],
        timeouts(u64::MAX, 1000, u64::MAX, 75_000, true),
    );

    let summary = orchestrator.run(question(), None).await.unwrap();

    assert_eq!(summary.status, DoneStatus::Completed);
    assert_eq!(summary.answer.as_deref(), Some("fine"));
    assert!(summary.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_agent_is_reported_failed() {
    let orchestrator = Orchestrator::new(
        vec![
            agent("boom", ScriptedBackend::new(vec![Step::Panic])),
            agent("steady", ScriptedBackend::new(vec![sleep(1), text("still here"), done(1, 1)])),
        ],
        TimeoutConfig::default(),
    );

    let summary = orchestrator.run(question(), None).await.unwrap();

    assert_single_terminal_done(&summary.chunks);
    assert_eq!(summary.status, DoneStatus::Completed);
    assert_eq!(summary.answer.as_deref(), Some("still here"));
    assert_eq!(summary.errors, vec!["agent stopped unexpectedly".to_string()]);
    let boom = summary.agents.iter().find(|a| a.id == "boom").unwrap();
    assert_eq!(boom.outcome, AgentOutcome::Failed);
    assert!(summary.agents.iter().all(|a| a.outcome != AgentOutcome::Active));
}

#[tokio::test(start_paused = true)]
async fn test_tool_calls_are_relayed_and_metered() {
    let call = format!(r#"{{"name":"search","arguments":"{}"}}"#, "q".repeat(368));
    let steps = vec![
        Step::Chunk(StreamChunk::tool_calls(call.clone(), "scripted")),
        Step::Chunk(StreamChunk::done(DoneStatus::Completed, "scripted")),
    ];
    let orchestrator = Orchestrator::new(
        vec![agent("caller", ScriptedBackend::new(steps))],
        timeouts(120, 1000, 600, 50, true),
    );

    let summary = orchestrator.run(question(), None).await.unwrap();

    let kinds: Vec<_> = summary.chunks.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChunkKind::ToolCalls, ChunkKind::Error, ChunkKind::Done]);
    assert_eq!(summary.chunks[0].source(), "caller");
    assert_eq!(summary.chunks[0].text(), call);
    assert_eq!(summary.chunks[1].breach.map(|b| b.kind), Some(BudgetKind::Tokens));
    assert_eq!(summary.status, DoneStatus::Degraded);
    assert_eq!(summary.agents[0].tokens, estimate_tokens(&call));
}

#[tokio::test(start_paused = true)]
async fn test_backend_error_chunk_ends_agent() {
    let flaky = ScriptedBackend::new(vec![
        text("partial"),
        Step::Chunk(StreamChunk::error("model overloaded", "scripted")),
        text("never relayed"),
        done(1, 1),
    ]);
    let steady = ScriptedBackend::new(vec![sleep(1), text("answer"), done(1, 1)]);
    let orchestrator = Orchestrator::new(
        vec![agent("flaky", flaky), agent("steady", steady)],
        TimeoutConfig::default(),
    );

    let summary = orchestrator.run(question(), None).await.unwrap();

    assert_eq!(summary.errors, vec!["model overloaded".to_string()]);
    assert_eq!(summary.content_from("flaky"), "partial");
    let outcomes: Vec<_> = summary.agents.iter().map(|a| a.outcome).collect();
    assert_eq!(outcomes, vec![AgentOutcome::Failed, AgentOutcome::Completed]);
    assert_eq!(summary.status, DoneStatus::Completed);
    assert_eq!(summary.answer.as_deref(), Some("answer"));
}

#[tokio::test(start_paused = true)]
async fn test_one_agent_times_out_while_other_completes() {
    let slow = ScriptedBackend::new(drip(100, 1, "zzz "));
    let quick = ScriptedBackend::new(vec![sleep(2), text("42"), done(3, 1)]);
    let orchestrator = Orchestrator::new(
        vec![agent("slow", slow), agent("quick", quick)],
        timeouts(5, 1000, 600, 75_000, true),
    );

    let summary = orchestrator.run(question(), None).await.unwrap();

    assert_eq!(summary.status, DoneStatus::Completed);
    assert_eq!(summary.answer.as_deref(), Some("42"));
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("agent 'slow' time limit exceeded"));
    let slow_report = summary.agents.iter().find(|a| a.id == "slow").unwrap();
    assert_eq!(slow_report.outcome, AgentOutcome::Degraded);
}

#[tokio::test(start_paused = true)]
async fn test_orchestrator_timeout_cancels_every_agent() {
    let dropped = DropCounter::default();
    let agents = ["a", "b", "c"]
        .iter()
        .map(|id| agent(id, ScriptedBackend::new(drip(100, 3, "part ")).with_drop_counter(dropped.clone())))
        .collect();
    let orchestrator = Orchestrator::new(agents, timeouts(120, 20_000, 10, 75_000, true));

    let started = Instant::now();
    let chunks = collect(&orchestrator).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    assert_single_terminal_done(&chunks);

    let error = &chunks[chunks.len() - 2];
    assert_eq!(error.source(), ORCHESTRATOR_SOURCE);
    assert!(error.error.as_deref().unwrap().contains("time limit exceeded"));

    let done = chunks.last().unwrap();
    assert_eq!(done.status, Some(DoneStatus::TimedOut));
    // Best-effort answer from partial content
    assert_eq!(done.text(), "part part part ");

    // Let the aborted tasks unwind
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(dropped.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_backend_error() {
    let failing = ScriptedBackend::failing(BackendError::Connection("connection refused".to_string()));
    let orchestrator = Orchestrator::new(vec![agent("solo", failing)], TimeoutConfig::default());

    let started = Instant::now();
    let chunks = collect(&orchestrator).await;

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(chunks.len(), 2);
    assert!(chunks[0].is_error());
    assert_eq!(chunks[0].source(), "solo");
    assert_eq!(chunks[0].error.as_deref(), Some("Connection error: connection refused"));
    assert_eq!(chunks[1].status, Some(DoneStatus::Failed));
    assert_eq!(chunks[1].content, None);
}

#[tokio::test(start_paused = true)]
async fn test_mid_stream_failure_keeps_other_agents() {
    let broken = ScriptedBackend::new(vec![
        text("partial"),
        sleep(1),
        Step::Fail(BackendError::Api {
            status: 500,
            message: "server error".to_string(),
        }),
    ]);
    let healthy = ScriptedBackend::new(vec![sleep(2), text("full answer"), done(5, 5)]);
    let orchestrator = Orchestrator::new(
        vec![agent("broken", broken), agent("healthy", healthy)],
        TimeoutConfig::default(),
    );

    let summary = orchestrator.run(question(), None).await.unwrap();

    assert_eq!(summary.status, DoneStatus::Completed);
    assert_eq!(summary.answer.as_deref(), Some("full answer"));
    assert_eq!(summary.errors, vec!["API error (500): server error".to_string()]);
    let outcomes: Vec<_> = summary.agents.iter().map(|a| a.outcome).collect();
    assert_eq!(outcomes, vec![AgentOutcome::Failed, AgentOutcome::Completed]);
}

#[tokio::test(start_paused = true)]
async fn test_all_agents_failing_is_not_fatal() {
    let orchestrator = Orchestrator::new(
        vec![
            agent("a", ScriptedBackend::failing(BackendError::MissingApiKey("OpenAI".to_string()))),
            agent("b", ScriptedBackend::failing(BackendError::RateLimited { retry_after: Some(30) })),
        ],
        TimeoutConfig::default(),
    );

    let summary = orchestrator.run(question(), None).await.unwrap();

    assert_eq!(summary.status, DoneStatus::Failed);
    assert_eq!(summary.answer, None);
    assert_eq!(summary.errors.len(), 2);
    assert_single_terminal_done(&summary.chunks);
}

#[tokio::test(start_paused = true)]
async fn test_agent_budget_without_fallback_is_fatal() {
    let orchestrator = Orchestrator::new(
        vec![
            agent("stuck", ScriptedBackend::new(vec![Step::Hang])),
            agent("fine", ScriptedBackend::new(vec![sleep(1), text("ok"), done(1, 1)])),
        ],
        timeouts(10, 1000, 600, 75_000, false),
    );

    let err = orchestrator.run(question(), None).await.unwrap_err();
    assert!(matches!(
        err,
        ChorusError::BudgetExceeded {
            scope: BudgetScope::Agent,
            kind: BudgetKind::Time
        }
    ));

    // The stream itself still terminates with a single done
    let chunks = collect(&orchestrator).await;
    assert_single_terminal_done(&chunks);
    assert_eq!(chunks.last().unwrap().status, Some(DoneStatus::Aborted));
}

#[tokio::test(start_paused = true)]
async fn test_orchestrator_budget_without_fallback_is_fatal() {
    let orchestrator = Orchestrator::new(
        vec![agent("a", ScriptedBackend::new(drip(100, 1, "x ")))],
        timeouts(120, 20_000, 10, 75_000, false),
    );

    let err = orchestrator.run(question(), None).await.unwrap_err();
    assert!(matches!(
        err,
        ChorusError::BudgetExceeded {
            scope: BudgetScope::Orchestrator,
            kind: BudgetKind::Time
        }
    ));
    assert_eq!(err.to_string(), "orchestrator time limit exceeded");
}

#[tokio::test(start_paused = true)]
async fn test_orchestrator_token_budget() {
    // 40 chars per chunk is 10 estimated tokens; two agents cross 100 combined
    let piece = "y".repeat(40);
    let orchestrator = Orchestrator::new(
        vec![
            agent("a", ScriptedBackend::new(drip(50, 1, &piece))),
            agent("b", ScriptedBackend::new(drip(50, 1, &piece))),
        ],
        timeouts(120, 20_000, 600, 100, true),
    );

    let started = Instant::now();
    let chunks = collect(&orchestrator).await;

    assert!(started.elapsed() < Duration::from_secs(7));
    assert_single_terminal_done(&chunks);
    let error = &chunks[chunks.len() - 2];
    assert_eq!(error.source(), ORCHESTRATOR_SOURCE);
    assert!(error.error.as_deref().unwrap().contains("time limit exceeded"));
    assert_eq!(error.breach.map(|b| b.kind), Some(BudgetKind::Tokens));
    assert_eq!(chunks.last().unwrap().status, Some(DoneStatus::Degraded));
    let relayed = chunks.iter().filter(|c| c.is_content()).count();
    assert_eq!(relayed, 11);
}

#[tokio::test(start_paused = true)]
async fn test_caller_cancellation() {
    let dropped = DropCounter::default();
    let orchestrator = Orchestrator::new(
        vec![
            agent("a", ScriptedBackend::new(vec![text("thinking"), Step::Hang]).with_drop_counter(dropped.clone())),
            agent("b", ScriptedBackend::new(vec![Step::Hang]).with_drop_counter(dropped.clone())),
        ],
        TimeoutConfig::default(),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let chunks: Vec<_> = orchestrator.chat_with_cancellation(question(), None, cancel).collect().await;

    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_single_terminal_done(&chunks);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text(), "thinking");
    let done = chunks.last().unwrap();
    assert_eq!(done.status, Some(DoneStatus::Cancelled));
    assert_eq!(done.content, None);

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(dropped.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_longest_answer_policy() {
    let terse = ScriptedBackend::new(vec![sleep(1), text("Blue light."), done(1, 1)]);
    let verbose = ScriptedBackend::new(vec![sleep(2), text("Shorter wavelengths scatter more."), done(1, 1)]);
    let orchestrator = Orchestrator::new(
        vec![agent("terse", terse), agent("verbose", verbose)],
        TimeoutConfig::default(),
    )
    .with_policy(Arc::new(LongestAnswer));

    let summary = orchestrator.run(question(), None).await.unwrap();
    assert_eq!(summary.answer.as_deref(), Some("Shorter wavelengths scatter more."));
}

#[tokio::test(start_paused = true)]
async fn test_agent_override_replaces_run_defaults() {
    use chorus_core::{AgentConfig, SingleAgent};

    let patient = SingleAgent::from_config(
        AgentConfig::new(
            "patient",
            Arc::new(ScriptedBackend::new(vec![sleep(20), text("worth the wait"), done(1, 1)])),
            "",
        )
        .with_timeout_config(timeouts(30, 1000, 600, 75_000, true)),
    );
    let orchestrator = Orchestrator::new(vec![patient], timeouts(5, 1000, 600, 75_000, true));

    let summary = orchestrator.run(question(), None).await.unwrap();
    assert_eq!(summary.status, DoneStatus::Completed);
    assert_eq!(summary.answer.as_deref(), Some("worth the wait"));
}

#[tokio::test(start_paused = true)]
async fn test_chat_simple() {
    let orchestrator = Orchestrator::new(
        vec![agent("a", ScriptedBackend::new(vec![text("hi"), done(1, 1)]))],
        TimeoutConfig::default(),
    );
    let chunks: Vec<_> = orchestrator.chat_simple("hello").collect().await;
    assert_single_terminal_done(&chunks);
    assert_eq!(chunks.last().unwrap().text(), "hi");
}
