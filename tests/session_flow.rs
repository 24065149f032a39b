//! End-to-end tests for token accounting, persistence and summarization

mod common;

use common::*;
use session_engine::config::{PersistenceConfig, SummarizationConfig};
use session_engine::context::{collect_recent_exchanges, ConversationItem, Role, TokenTracker};
use session_engine::session::{
    ChannelProgressSink, NoopProgressSink, PersistenceCoordinator, ProgressKind, Session, SessionParts,
    SessionRepopulator,
};
use session_engine::storage::{ItemStore, MemoryHistoryStore, MemoryItemStoreProvider, MemoryMetadataStore};
use session_engine::{SessionError, SessionManager};
use std::sync::Arc;

#[test]
fn test_trigger_is_fraction_of_window() {
    let tracker = TokenTracker::new(word_tokenizer(), "test-model", 10000, 0.8).unwrap();
    assert_eq!(tracker.trigger_tokens(), 8000);

    tracker.set_total_tokens(7000);
    assert!(!tracker.should_summarize());
    tracker.set_total_tokens(8500);
    assert!(tracker.should_summarize());
}

#[test]
fn test_last_two_of_three_exchanges_kept() {
    let items = exchanges(3);
    let recent = collect_recent_exchanges(&items, 2);
    assert_eq!(recent, items[2..].to_vec());
}

#[tokio::test]
async fn test_add_items_refreshes_total_and_threshold_stays_crossed() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(dir.path(), Arc::new(ScriptedCompletion::replying("unused")));
    let meta = manager.create(None).await.unwrap();
    let session = manager.open(&meta.session_id).await.unwrap();

    // 15 tokens per exchange with a 50-token trigger.
    let history = exchanges(4);
    session.add_items(&history[..6]).await.unwrap();
    assert_eq!(session.total_tokens(), 45);
    assert!(!session.should_summarize());

    session.update_with_tool_tokens(10);
    assert_eq!(session.total_tokens(), 55);
    assert!(session.should_summarize());

    session.add_items(&history[6..]).await.unwrap();
    assert_eq!(session.total_tokens(), 60 + 10);
    assert!(session.should_summarize());
}

#[tokio::test]
async fn test_missing_history_store_refuses_write() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(
        test_config(dir.path()),
        Arc::new(MemoryMetadataStore::new()),
        Arc::new(MemoryItemStoreProvider::new()),
        None,
        Arc::new(ScriptedCompletion::replying("unused")),
        word_tokenizer(),
    );
    let meta = manager.create(None).await.unwrap();
    let session = manager.open(&meta.session_id).await.unwrap();

    let result = session.add_items(&exchanges(1)).await;
    assert!(matches!(result, Err(SessionError::Configuration(_))));
    assert!(session.get_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_history_outage_rolls_back_working_context() {
    let items = Arc::new(BrittleItemStore::new("sess_rollback"));
    items.add_items(&exchanges(1)).await.unwrap();
    let coordinator = PersistenceCoordinator::new(
        items.clone(),
        Some(Arc::new(DownHistory)),
        PersistenceConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            backoff_multiplier: 2.0,
        },
    );

    let before = items.get_items().await.unwrap();
    let result = coordinator.save_items(&[ConversationItem::user("lost")]).await;

    assert!(matches!(result, Err(SessionError::Persistence { attempts: 3, .. })));
    assert_eq!(items.get_items().await.unwrap(), before);
}

#[tokio::test]
async fn test_failed_rollback_is_critical() {
    let items = Arc::new(BrittleItemStore::new("sess_critical"));
    items.add_items(&exchanges(1)).await.unwrap();
    items.fail_clear.store(true, std::sync::atomic::Ordering::SeqCst);
    let coordinator = PersistenceCoordinator::new(
        items.clone(),
        Some(Arc::new(DownHistory)),
        PersistenceConfig {
            max_attempts: 2,
            initial_backoff_ms: 1,
            backoff_multiplier: 2.0,
        },
    );

    let err = coordinator
        .save_items(&[ConversationItem::user("orphan")])
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, SessionError::CriticalInconsistency { .. }));
}

#[tokio::test]
async fn test_summarize_compacts_working_context_but_not_history() {
    let dir = tempfile::tempdir().unwrap();
    let completion = Arc::new(ScriptedCompletion::replying("User asked five questions."));
    let (sink, mut events) = ChannelProgressSink::channel();
    let history = Arc::new(MemoryHistoryStore::new());
    let manager = SessionManager::new(
        test_config(dir.path()),
        Arc::new(MemoryMetadataStore::new()),
        Arc::new(MemoryItemStoreProvider::new()),
        Some(history.clone()),
        completion.clone(),
        word_tokenizer(),
    )
    .with_progress(Arc::new(sink));

    let meta = manager.create(None).await.unwrap();
    let session = manager.open(&meta.session_id).await.unwrap();
    let items = exchanges(5);
    session.add_items(&items).await.unwrap();
    session.update_with_tool_tokens(20);
    assert!(session.should_summarize());

    let summary = session.summarize_default(false).await;
    assert_eq!(summary, "User asked five questions.");

    let working = session.get_items().await.unwrap();
    assert_eq!(working.len(), 5);
    assert_eq!(working[0].role(), Role::System);
    let kept: Vec<ConversationItem> = items[6..].iter().map(|i| i.without_identity().unwrap()).collect();
    assert_eq!(working[1..], kept[..]);

    assert_eq!(session.accumulated_tool_tokens(), 0);
    assert_eq!(session.total_tokens(), session.tracker().calculate_total_tokens(&working));
    assert!(!session.should_summarize());

    let stored = manager.get(&meta.session_id).await.unwrap().unwrap();
    assert_eq!(stored.accumulated_tool_tokens, 0);

    use session_engine::storage::HistoryStore;
    assert_eq!(history.get_message_count(&meta.session_id).await.unwrap(), 10);
    assert!(session.validate_consistency().await.unwrap().consistent);

    let sent = completion.last_input.lock().unwrap().clone();
    assert_eq!(sent.len(), 11);
    assert!(sent.iter().all(|item| item.id().is_none()));

    assert_eq!(events.recv().await.unwrap().kind, ProgressKind::Start);
    let done = events.recv().await.unwrap();
    assert_eq!(done.success, Some(true));
}

#[tokio::test]
async fn test_concurrent_summarize_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let completion = Arc::new(common::GatedCompletion::new());
    let manager = manager_with(dir.path(), completion.clone());
    let meta = manager.create(None).await.unwrap();
    let session = manager.open(&meta.session_id).await.unwrap();
    session.add_items(&exchanges(5)).await.unwrap();

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.summarize(2, true).await })
    };
    completion.entered.notified().await;

    let second = session.summarize(2, true).await;
    assert_eq!(second, "");

    completion.release.notify_one();
    let first = first.await.unwrap();
    assert_eq!(first, "gated summary");

    assert_eq!(completion.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(session.get_items().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_summarization_failure_leaves_session_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(dir.path(), Arc::new(ScriptedCompletion::failing("rate limited")));
    let meta = manager.create(None).await.unwrap();
    let session = manager.open(&meta.session_id).await.unwrap();
    session.add_items(&exchanges(5)).await.unwrap();
    session.update_with_tool_tokens(7);
    let before = session.total_tokens();

    assert_eq!(session.summarize(2, false).await, "");
    assert_eq!(session.get_items().await.unwrap().len(), 10);
    assert_eq!(session.total_tokens(), before);
    assert_eq!(session.accumulated_tool_tokens(), 7);
}

#[tokio::test]
async fn test_delete_storage_clears_both_layers() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(dir.path(), Arc::new(ScriptedCompletion::replying("unused")));
    let meta = manager.create(None).await.unwrap();
    let session = manager.open(&meta.session_id).await.unwrap();
    session.add_items(&exchanges(2)).await.unwrap();

    session.delete_storage().await.unwrap();

    assert!(session.get_items().await.unwrap().is_empty());
    assert_eq!(session.total_tokens(), 0);
    let report = session.validate_consistency().await.unwrap();
    assert_eq!(report.layer1_count, 0);
    assert_eq!(report.layer2_count, 0);
}

fn fast_retry() -> PersistenceConfig {
    PersistenceConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        backoff_multiplier: 2.0,
    }
}

fn session_over(items: Arc<BrittleItemStore>, completion: Arc<ScriptedCompletion>) -> Session {
    let tracker = TokenTracker::new(word_tokenizer(), "test-model", 100, 0.5).unwrap();
    Session::new(
        tracker,
        SessionParts {
            items,
            history: Some(Arc::new(MemoryHistoryStore::new())),
            metadata: None,
            completion,
            progress: Arc::new(NoopProgressSink),
            persistence: fast_retry(),
            summarization: SummarizationConfig::default(),
        },
    )
}

#[tokio::test]
async fn test_failed_rebuild_restores_working_context() {
    let items = Arc::new(BrittleItemStore::new("sess_rebuild"));
    let session = session_over(items.clone(), Arc::new(ScriptedCompletion::replying("the gist")));
    session.add_items(&exchanges(5)).await.unwrap();
    session.update_with_tool_tokens(5);
    let before = session.get_items().await.unwrap();
    assert_eq!(session.total_tokens(), 80);

    items.fail_next_adds(1);
    assert_eq!(session.summarize(2, true).await, "");

    assert_eq!(session.get_items().await.unwrap(), before);
    assert_eq!(session.total_tokens(), 80);
    assert_eq!(session.accumulated_tool_tokens(), 5);
    assert_eq!(
        session.tracker().calculate_total_tokens(&before) + session.accumulated_tool_tokens(),
        session.total_tokens()
    );

    // Once the store recovers the same session compacts normally.
    assert_eq!(session.summarize(2, true).await, "the gist");
    assert_eq!(session.get_items().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_failed_restore_after_rebuild_is_critical() {
    let items = Arc::new(BrittleItemStore::new("sess_restore"));
    let persistence = Arc::new(PersistenceCoordinator::new(
        items.clone(),
        Some(Arc::new(MemoryHistoryStore::new())),
        fast_retry(),
    ));
    let tracker = Arc::new(TokenTracker::new(word_tokenizer(), "test-model", 100, 0.5).unwrap());
    let history = exchanges(3);
    persistence.save_items(&history).await.unwrap();
    tracker.refresh(&history);
    let repopulator = SessionRepopulator::new(tracker.clone(), persistence, None);

    items.fail_next_adds(2);
    let err = repopulator
        .repopulate_with_summary("the gist", &history[2..])
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, SessionError::CriticalInconsistency { .. }));
    assert_eq!(tracker.total_tokens(), 45);
}
