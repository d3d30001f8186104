//! Integration tests for the shared engine session
//!
//! These tests drive the public coordinator API against the scripted
//! provider, so no model runtime is needed.

use futures_util::future::join_all;
use local_inference::engine::{ChatMessage, LoadCall, ScriptedProvider, ScriptedReply};
use local_inference::persona::{greeter_question, GREETER_FALLBACK_QUESTION};
use local_inference::{
    Coordinator, DeviceHints, ExecutionMode, InferenceError, LoadStage, OrchestratorConfig,
    ProgressEvent, Status, SubmitOptions,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn capable_device() -> DeviceHints {
    DeviceHints::default()
        .with_memory_gb(16.0)
        .with_logical_cores(8)
        .with_accelerator(true)
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_model("primary")
        .with_fallback_model(Some("light".to_string()))
        .with_worker(true)
        .with_system_prompt("You are helpful.")
}

fn coordinator(provider: &Arc<ScriptedProvider>) -> Coordinator {
    Coordinator::new(config(), provider.clone(), capable_device())
}

#[tokio::test]
async fn test_concurrent_ensure_loads_once() {
    let provider = Arc::new(ScriptedProvider::new().with_load_delay(Duration::from_millis(50)));
    let coordinator = coordinator(&provider);

    let callers = (0..8).map(|_| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.ensure(None).await })
    });
    let results = join_all(callers).await;

    for result in results {
        assert_eq!(result.unwrap(), Ok(()));
    }
    assert_eq!(provider.call_count(), 1);
    assert_eq!(coordinator.status(), Status::Ready);
}

#[tokio::test]
async fn test_fallback_chain_order() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .fail("primary", ExecutionMode::Worker, "worker crashed")
            .fail("primary", ExecutionMode::MainThread, "out of memory"),
    );
    let coordinator = coordinator(&provider);

    coordinator.ensure(None).await.unwrap();

    assert_eq!(
        provider.calls(),
        vec![
            LoadCall::new("primary", ExecutionMode::Worker),
            LoadCall::new("primary", ExecutionMode::MainThread),
            LoadCall::new("light", ExecutionMode::MainThread),
        ]
    );
    assert_eq!(coordinator.model_id().as_deref(), Some("light"));
    assert_eq!(coordinator.execution_mode(), Some(ExecutionMode::MainThread));

    let session = coordinator.session().expect("session is ready");
    assert_eq!(session.stage, LoadStage::FallbackModel);
    assert_eq!(session.queue().pending(), 0);
}

#[tokio::test]
async fn test_worker_disabled_starts_on_main_thread() {
    let provider = Arc::new(ScriptedProvider::new());
    let coordinator = Coordinator::new(config().with_worker(false), provider.clone(), capable_device());

    coordinator.ensure(None).await.unwrap();

    assert_eq!(
        provider.calls(),
        vec![LoadCall::new("primary", ExecutionMode::MainThread)]
    );
}

#[tokio::test]
async fn test_load_failure_is_terminal() {
    let provider = Arc::new(ScriptedProvider::new().fail_all());
    let coordinator = coordinator(&provider);

    let err = coordinator.ensure(None).await.unwrap_err();
    assert_eq!(err, InferenceError::LoadFailed { attempts: 3 });
    assert_eq!(coordinator.status(), Status::Failed);
    assert_eq!(provider.call_count(), 3);

    let again = coordinator.ensure(Some("retry".to_string())).await;
    assert_eq!(again, Err(InferenceError::LoadFailed { attempts: 3 }));
    assert_eq!(provider.call_count(), 3);

    let submitted = coordinator.submit("hello", SubmitOptions::default()).await;
    assert_eq!(submitted, Err(InferenceError::NotReady));
}

#[tokio::test]
async fn test_submit_before_ensure_is_not_ready() {
    let provider = Arc::new(ScriptedProvider::new());
    let coordinator = coordinator(&provider);

    let result = coordinator.submit("hello", SubmitOptions::default()).await;

    assert_eq!(result, Err(InferenceError::NotReady));
    assert_eq!(coordinator.status(), Status::Idle);
    assert_eq!(provider.call_count(), 0);
    assert_eq!(provider.engine().request_count(), 0);
}

#[tokio::test]
async fn test_prompt_change_applies_to_queued_requests() {
    let provider = Arc::new(ScriptedProvider::new());
    let engine = provider.engine();
    engine.add_replies([ScriptedReply::text("one"), ScriptedReply::text("two")]);
    let coordinator = coordinator(&provider);
    coordinator.ensure(None).await.unwrap();

    engine.hold();
    let first = coordinator.submit("first", SubmitOptions::default());
    engine.wait_for_requests(1).await;
    let second = coordinator.submit("second", SubmitOptions::default());
    coordinator.set_system_prompt("You are a pirate.");
    engine.release(2);

    assert_eq!(first.await, Ok("one".to_string()));
    assert_eq!(second.await, Ok("two".to_string()));

    let requests = engine.requests();
    assert_eq!(requests[0].system_prompt(), Some("You are helpful."));
    assert_eq!(requests[1].system_prompt(), Some("You are a pirate."));
}

#[tokio::test]
async fn test_trigger_prompt_is_used_by_first_request() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.engine().add_reply(ScriptedReply::text("ahoy"));
    let coordinator = coordinator(&provider);

    coordinator
        .ensure(Some("Speak like a sailor.".to_string()))
        .await
        .unwrap();
    coordinator
        .submit("hi", SubmitOptions::default())
        .await
        .unwrap();

    let requests = provider.engine().requests();
    assert_eq!(requests[0].system_prompt(), Some("Speak like a sailor."));
}

#[tokio::test]
async fn test_conversation_submission() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.engine().add_reply(ScriptedReply::text("It is 4."));
    let coordinator = coordinator(&provider);
    coordinator.ensure(None).await.unwrap();

    let answer = coordinator
        .submit_conversation(
            vec![
                ChatMessage::user("What is 2 + 2?"),
                ChatMessage::assistant("Let me think."),
                ChatMessage::user("Well?"),
            ],
            SubmitOptions::default(),
        )
        .await;

    assert_eq!(answer, Ok("It is 4.".to_string()));
    let request = &provider.engine().requests()[0];
    assert_eq!(request.messages.len(), 4);
    assert_eq!(request.system_prompt(), Some("You are helpful."));
}

#[tokio::test]
async fn test_attached_caller_override_applies_after_load() {
    let provider = Arc::new(ScriptedProvider::new().with_load_delay(Duration::from_millis(60)));
    let coordinator = coordinator(&provider);

    let trigger = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.ensure(Some("first".to_string())).await })
    };
    tokio::time::sleep(Duration::from_millis(15)).await;
    coordinator.ensure(Some("second".to_string())).await.unwrap();
    trigger.await.unwrap().unwrap();

    assert_eq!(provider.call_count(), 1);
    assert_eq!(coordinator.system_prompt(), "second");
}

#[tokio::test]
async fn test_progress_subscribers_see_the_load() {
    let provider = Arc::new(ScriptedProvider::new().fail("primary", ExecutionMode::Worker, "boom"));
    let coordinator = coordinator(&provider);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = coordinator.on_progress(Arc::new(move |event: &ProgressEvent| {
        sink.lock().unwrap().push(event.clone());
    }));

    coordinator.ensure(None).await.unwrap();

    let events = seen.lock().unwrap();
    assert!(matches!(events.first(), Some(ProgressEvent::StageStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::StageFailed { error, .. } if error.contains("boom"))));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Ready { mode: ExecutionMode::MainThread, .. })
    ));
}

#[tokio::test]
async fn test_greeter_retries_until_answer() {
    let provider = Arc::new(ScriptedProvider::new());
    let engine = provider.engine();
    engine.add_replies([
        ScriptedReply::fail("generation error"),
        ScriptedReply::text("   "),
        ScriptedReply::text("Do you write code for a living?\n"),
    ]);
    let coordinator = coordinator(&provider);
    coordinator.ensure(None).await.unwrap();

    let question = greeter_question(&coordinator, 3, Duration::ZERO).await;

    assert_eq!(question, "Do you write code for a living?");
    assert_eq!(engine.request_count(), 3);
}

#[tokio::test]
async fn test_greeter_falls_back_after_attempts() {
    let provider = Arc::new(ScriptedProvider::new());
    let engine = provider.engine();
    engine.add_replies([
        ScriptedReply::fail("a"),
        ScriptedReply::fail("b"),
        ScriptedReply::fail("c"),
    ]);
    let coordinator = coordinator(&provider);
    coordinator.ensure(None).await.unwrap();

    let question = greeter_question(&coordinator, 3, Duration::ZERO).await;

    assert_eq!(question, GREETER_FALLBACK_QUESTION);
    assert_eq!(engine.request_count(), 3);
}

#[tokio::test]
async fn test_greeter_without_engine_uses_fallback() {
    let provider = Arc::new(ScriptedProvider::new().fail_all());
    let coordinator = coordinator(&provider);
    let _ = coordinator.ensure(None).await;

    let question = greeter_question(&coordinator, 3, Duration::ZERO).await;

    assert_eq!(question, GREETER_FALLBACK_QUESTION);
    assert_eq!(provider.engine().request_count(), 0);
}

#[tokio::test]
async fn test_abandoned_ensure_keeps_loading() {
    let provider = Arc::new(ScriptedProvider::new().with_load_delay(Duration::from_millis(100)));
    let coordinator = coordinator(&provider);

    let waited = tokio::time::timeout(Duration::from_millis(20), coordinator.ensure(None)).await;
    assert!(waited.is_err());
    assert_eq!(coordinator.status(), Status::Loading);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(coordinator.status(), Status::Ready);
    assert_eq!(
        provider.calls(),
        vec![LoadCall::new("primary", ExecutionMode::Worker)]
    );

    coordinator.ensure(None).await.unwrap();
    assert_eq!(provider.call_count(), 1);
    assert_eq!(coordinator.execution_mode(), Some(ExecutionMode::Worker));
}

#[tokio::test]
async fn test_abandoned_ensure_still_walks_fallbacks() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_load_delay(Duration::from_millis(40))
            .fail("primary", ExecutionMode::Worker, "worker crashed"),
    );
    let coordinator = coordinator(&provider);

    let waited = tokio::time::timeout(Duration::from_millis(10), coordinator.ensure(None)).await;
    assert!(waited.is_err());

    // A later caller attaches to the same load instead of starting over
    coordinator.ensure(None).await.unwrap();

    assert_eq!(
        provider.calls(),
        vec![
            LoadCall::new("primary", ExecutionMode::Worker),
            LoadCall::new("primary", ExecutionMode::MainThread),
        ]
    );
    assert_eq!(coordinator.execution_mode(), Some(ExecutionMode::MainThread));
}

#[tokio::test]
async fn test_ready_status_implies_session() {
    let provider = Arc::new(ScriptedProvider::new().with_load_delay(Duration::from_millis(30)));
    provider.engine().add_reply(ScriptedReply::text("hello"));
    let coordinator = coordinator(&provider);
    let mut status = coordinator.watch_status();

    let trigger = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.ensure(None).await })
    };
    status.wait_for(|s| *s == Status::Ready).await.unwrap();

    assert!(coordinator.session().is_some());
    let reply = coordinator.submit("hi", SubmitOptions::default()).await;
    assert_eq!(reply, Ok("hello".to_string()));
    trigger.await.unwrap().unwrap();
}
