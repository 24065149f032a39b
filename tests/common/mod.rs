//! Shared test doubles for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use session_engine::config::Config;
use session_engine::context::{CompletionError, ConversationItem, LlmCompletion, WordTokenizer};
use session_engine::error::{Result, SessionError};
use session_engine::storage::{HistoryStore, ItemStore, MemoryItemStore};
use session_engine::SessionManager;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Completion returning a fixed reply and recording its inputs
pub struct ScriptedCompletion {
    reply: std::result::Result<String, String>,
    pub calls: AtomicUsize,
    pub last_input: Mutex<Vec<ConversationItem>>,
}

impl ScriptedCompletion {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmCompletion for ScriptedCompletion {
    async fn run(
        &self,
        _instructions: &str,
        input: &[ConversationItem],
    ) -> std::result::Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = input.to_vec();
        self.reply.clone().map_err(CompletionError::ApiError)
    }
}

/// Completion that blocks until released, for overlapping calls
pub struct GatedCompletion {
    pub entered: Notify,
    pub release: Notify,
    pub calls: AtomicUsize,
}

impl GatedCompletion {
    pub fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmCompletion for GatedCompletion {
    async fn run(
        &self,
        _instructions: &str,
        _input: &[ConversationItem],
    ) -> std::result::Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok("gated summary".to_string())
    }
}

/// History store that always fails
pub struct DownHistory;

#[async_trait]
impl HistoryStore for DownHistory {
    async fn save_message(&self, _session_id: &str, _item: &ConversationItem) -> Result<()> {
        Err(SessionError::Storage("history database unreachable".to_string()))
    }

    async fn get_messages(&self, _session_id: &str) -> Result<Vec<ConversationItem>> {
        Ok(Vec::new())
    }

    async fn get_message_count(&self, _session_id: &str) -> Result<usize> {
        Ok(0)
    }

    async fn clear_session(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Layer-1 store whose `clear` and `add_items` can be made to fail
pub struct BrittleItemStore {
    pub inner: MemoryItemStore,
    pub fail_clear: AtomicBool,
    failing_adds: AtomicU32,
}

impl BrittleItemStore {
    pub fn new(session_id: &str) -> Self {
        Self {
            inner: MemoryItemStore::new(session_id),
            fail_clear: AtomicBool::new(false),
            failing_adds: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` calls to `add_items`
    pub fn fail_next_adds(&self, count: u32) {
        self.failing_adds.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ItemStore for BrittleItemStore {
    fn session_id(&self) -> &str {
        self.inner.session_id()
    }

    async fn get_items(&self) -> Result<Vec<ConversationItem>> {
        self.inner.get_items().await
    }

    async fn add_items(&self, items: &[ConversationItem]) -> Result<()> {
        let armed = self
            .failing_adds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(SessionError::Storage("working context write rejected".to_string()));
        }
        self.inner.add_items(items).await
    }

    async fn clear(&self) -> Result<()> {
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(SessionError::Storage("working context locked".to_string()));
        }
        self.inner.clear().await
    }
}

/// Config with a small window, fast retries and a private data directory
pub fn test_config(data_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.tokens.model = "test-model".to_string();
    config.tokens.max_tokens = 100;
    config.tokens.threshold = 0.5;
    config.persistence.initial_backoff_ms = 1;
    config.summarization.keep_recent = 2;
    config.summarization.min_messages = 4;
    config.sessions.data_dir = data_dir.to_path_buf();
    config
}

pub fn word_tokenizer() -> Arc<WordTokenizer> {
    Arc::new(WordTokenizer::new(1.0))
}

pub fn manager_with(data_dir: &std::path::Path, completion: Arc<dyn LlmCompletion>) -> SessionManager {
    SessionManager::in_memory(test_config(data_dir), completion, word_tokenizer())
}

/// `n` identified user/assistant exchanges
pub fn exchanges(n: usize) -> Vec<ConversationItem> {
    (0..n)
        .flat_map(|i| {
            vec![
                ConversationItem::user(format!("question number {}", i)).with_id(format!("u{}", i)),
                ConversationItem::assistant(format!("a fairly long answer number {}", i))
                    .with_id(format!("a{}", i)),
            ]
        })
        .collect()
}
