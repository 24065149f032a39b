//! Session lifecycle: creation, listing, deletion, cleanup and titles

use super::conversation::{Session, SessionParts};
use super::metadata::{SessionMetadata, SessionSettings};
use super::progress::{NoopProgressSink, ProgressSink};
use super::registry::SessionRegistry;
use super::title::{sanitize_title, truncate_title};
use super::workspace::Workspace;
use crate::config::Config;
use crate::context::{ConversationItem, LlmCompletion, TokenTracker, Tokenizer};
use crate::error::{Result, SessionError};
use crate::metrics::METRICS;
use crate::storage::{
    HistoryStore, ItemStoreProvider, MemoryHistoryStore, MemoryItemStoreProvider, MemoryMetadataStore,
    MetadataStore,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TITLE_INSTRUCTIONS: &str = "You write short titles for chat conversations. Reply with a title of \
three to seven words that captures the main topic. No quotes, no trailing punctuation, no preamble.";

const TITLE_DIRECTIVE: &str = "Write a title for the conversation above.";

/// Most recent messages shown to the model when generating a title
const TITLE_CONTEXT_MESSAGES: usize = 6;

/// Owns session metadata, workspaces and open session handles
pub struct SessionManager {
    config: Config,
    metadata: Arc<dyn MetadataStore>,
    item_stores: Arc<dyn ItemStoreProvider>,
    history: Option<Arc<dyn HistoryStore>>,
    completion: Arc<dyn LlmCompletion>,
    tokenizer: Arc<dyn Tokenizer>,
    progress: Arc<dyn ProgressSink>,
    registry: SessionRegistry,
    current: RwLock<Option<String>>,
}

impl SessionManager {
    pub fn new(
        config: Config,
        metadata: Arc<dyn MetadataStore>,
        item_stores: Arc<dyn ItemStoreProvider>,
        history: Option<Arc<dyn HistoryStore>>,
        completion: Arc<dyn LlmCompletion>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            config,
            metadata,
            item_stores,
            history,
            completion,
            tokenizer,
            progress: Arc::new(NoopProgressSink),
            registry: SessionRegistry::new(),
            current: RwLock::new(None),
        }
    }

    /// Manager backed entirely by in-memory stores
    pub fn in_memory(config: Config, completion: Arc<dyn LlmCompletion>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self::new(
            config,
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryItemStoreProvider::new()),
            Some(Arc::new(MemoryHistoryStore::new())),
            completion,
            tokenizer,
        )
    }

    /// Route summarization progress of sessions opened from now on to `sink`
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn new_session_id(&self) -> String {
        format!("{}{}", self.config.sessions.id_prefix, Uuid::new_v4().simple())
    }

    async fn require(&self, session_id: &str) -> Result<SessionMetadata> {
        self.metadata
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(format!("session {}", session_id)))
    }

    /// Create a session with its workspace and make it current
    pub async fn create(&self, title: Option<String>) -> Result<SessionMetadata> {
        let session_id = self.new_session_id();

        Workspace::provision(
            &self.config.sessions.data_dir,
            &session_id,
            self.config.sessions.templates_dir.as_deref(),
        )
        .await?;

        let title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let metadata = SessionMetadata::new(&session_id, title, self.config.tokens.model.clone());
        if let Err(e) = self.metadata.put(&metadata).await {
            if let Err(cleanup) = Workspace::remove(&self.config.sessions.data_dir, &session_id).await {
                warn!("Failed to remove workspace of unsaved session {}: {}", session_id, cleanup);
            }
            return Err(e);
        }

        *self.current.write().await = Some(session_id.clone());
        METRICS.sessions_created.inc();
        info!("Created session {}", session_id);

        Ok(metadata)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        self.metadata.get(session_id).await
    }

    /// Sessions ordered pinned first, then most recently used
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<SessionMetadata>> {
        let mut sessions = self.metadata.list().await?;
        sessions.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then_with(|| b.last_used_at.cmp(&a.last_used_at))
        });
        if let Some(limit) = limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    /// Open (or reuse) the live handle of a session
    pub async fn open(&self, session_id: &str) -> Result<Arc<Session>> {
        if let Some(session) = self.registry.get(session_id) {
            return Ok(session);
        }

        let metadata = self.require(session_id).await?;

        let mut tokens = self.config.tokens.clone();
        tokens.model = metadata.model.clone();
        let tracker = TokenTracker::from_config(self.tokenizer.clone(), &tokens)?;
        tracker.restore(metadata.total_tokens, metadata.accumulated_tool_tokens);

        let parts = SessionParts {
            items: self.item_stores.open(session_id),
            history: self.history.clone(),
            metadata: Some(self.metadata.clone()),
            completion: self.completion.clone(),
            progress: self.progress.clone(),
            persistence: self.config.persistence.clone(),
            summarization: self.config.summarization.clone(),
        };

        debug!("Opening session {}", session_id);
        Ok(self
            .registry
            .get_or_insert_with(session_id, || Session::new(tracker, parts)))
    }

    /// Delete a session; returns `false` if it had no metadata
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        self.delete_with_reason(session_id, "explicit").await
    }

    async fn delete_with_reason(&self, session_id: &str, reason: &str) -> Result<bool> {
        let existed = self.metadata.delete(session_id).await?;
        if let Some(session) = self.registry.remove(session_id) {
            session.close();
        }
        if !existed {
            debug!("Session {} has no metadata, nothing to delete", session_id);
            return Ok(false);
        }

        if let Err(e) = self.item_stores.open(session_id).clear().await {
            warn!("Failed to clear working context of session {}: {}", session_id, e);
        }
        self.item_stores.discard(session_id);

        if let Some(history) = &self.history {
            if let Err(e) = history.clear_session(session_id).await {
                warn!("Failed to clear history of session {}: {}", session_id, e);
            }
        }

        if let Err(e) = Workspace::remove(&self.config.sessions.data_dir, session_id).await {
            warn!("Failed to remove workspace of session {}: {}", session_id, e);
        }

        {
            let mut current = self.current.write().await;
            if current.as_deref() == Some(session_id) {
                *current = None;
            }
        }

        METRICS.record_session_deleted(reason);
        info!("Deleted session {} ({})", session_id, reason);
        Ok(true)
    }

    pub async fn rename(&self, session_id: &str, title: &str) -> Result<SessionMetadata> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SessionError::Validation("title must not be empty".to_string()));
        }

        let mut metadata = self.require(session_id).await?;
        metadata.title = truncate_title(title, self.config.sessions.title_max_chars);
        metadata.is_named = true;
        self.metadata.put(&metadata).await?;
        Ok(metadata)
    }

    pub async fn set_pinned(&self, session_id: &str, pinned: bool) -> Result<SessionMetadata> {
        let mut metadata = self.require(session_id).await?;
        metadata.pinned = pinned;
        self.metadata.put(&metadata).await?;
        Ok(metadata)
    }

    pub async fn update_settings(&self, session_id: &str, settings: SessionSettings) -> Result<SessionMetadata> {
        let mut metadata = self.require(session_id).await?;
        if let Some(model) = settings.model {
            metadata.model = model;
        }
        if let Some(effort) = settings.reasoning_effort {
            metadata.reasoning_effort = Some(effort);
        }
        if let Some(mcp) = settings.mcp_config {
            metadata.mcp_config = Some(mcp);
        }
        self.metadata.put(&metadata).await?;
        Ok(metadata)
    }

    /// Update counters after a completed turn
    pub async fn record_turn(&self, session_id: &str, message_count: usize) -> Result<SessionMetadata> {
        let mut metadata = self.require(session_id).await?;
        metadata.turn_count += 1;
        metadata.message_count = message_count;
        if let Some(session) = self.registry.get(session_id) {
            metadata.total_tokens = session.total_tokens();
            metadata.accumulated_tool_tokens = session.accumulated_tool_tokens();
        }
        metadata.touch();
        self.metadata.put(&metadata).await?;
        Ok(metadata)
    }

    pub async fn current(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    pub async fn set_current(&self, session_id: &str) -> Result<()> {
        let mut metadata = self.require(session_id).await?;
        metadata.touch();
        self.metadata.put(&metadata).await?;
        *self.current.write().await = Some(session_id.to_string());
        Ok(())
    }

    /// Delete message-less sessions created more than `max_age` ago
    ///
    /// A session counts as message-less when neither its metadata nor the
    /// history store hold any message for it.
    pub async fn cleanup_empty_sessions(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| SessionError::Validation(format!("invalid max age: {}", e)))?;
        let cutoff = Utc::now() - max_age;

        let mut deleted = 0usize;
        for metadata in self.metadata.list().await? {
            if !metadata.is_empty() || metadata.created_at >= cutoff {
                continue;
            }
            if self.has_history(&metadata.session_id).await {
                debug!("Session {} has history without recorded turns, keeping it", metadata.session_id);
                continue;
            }
            match self.delete_with_reason(&metadata.session_id, "cleanup").await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to clean up session {}: {}", metadata.session_id, e),
            }
        }

        if deleted > 0 {
            info!("Cleaned up {} empty sessions", deleted);
        }
        Ok(deleted)
    }

    async fn has_history(&self, session_id: &str) -> bool {
        let Some(history) = &self.history else {
            return false;
        };
        match history.get_message_count(session_id).await {
            Ok(count) => count > 0,
            Err(e) => {
                warn!("Failed to count history of session {}, keeping it: {}", session_id, e);
                true
            }
        }
    }

    /// Cleanup with the configured retention
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let hours = self.config.sessions.empty_session_max_age_hours;
        self.cleanup_empty_sessions(Duration::from_secs(hours * 3600)).await
    }

    /// Give an unnamed session a generated title
    ///
    /// Best effort: any failure leaves the current title untouched.
    pub async fn generate_title(&self, session_id: &str, messages: &[ConversationItem]) -> bool {
        match self.try_generate_title(session_id, messages).await {
            Ok(Some(title)) => {
                METRICS.record_title(true);
                info!("Titled session {}: {}", session_id, title);
                true
            }
            Ok(None) => false,
            Err(e) => {
                METRICS.record_title(false);
                warn!("Title generation failed for session {}: {}", session_id, e);
                false
            }
        }
    }

    async fn try_generate_title(&self, session_id: &str, messages: &[ConversationItem]) -> Result<Option<String>> {
        let Some(metadata) = self.metadata.get(session_id).await? else {
            return Ok(None);
        };
        if metadata.is_named || messages.len() < 2 {
            return Ok(None);
        }

        let start = messages.len().saturating_sub(TITLE_CONTEXT_MESSAGES);
        let mut input: Vec<ConversationItem> = messages[start..].iter().map(ConversationItem::sanitized).collect();
        input.push(ConversationItem::user(TITLE_DIRECTIVE));

        let raw = self.completion.run(TITLE_INSTRUCTIONS, &input).await?;
        let title = sanitize_title(&raw, self.config.sessions.title_max_chars)
            .ok_or_else(|| SessionError::Llm("model returned an empty title".to_string()))?;

        // Re-read so a rename during the model call wins.
        let Some(mut latest) = self.metadata.get(session_id).await? else {
            return Ok(None);
        };
        if latest.is_named {
            return Ok(None);
        }
        latest.title = title.clone();
        latest.is_named = true;
        self.metadata.put(&latest).await?;

        Ok(Some(title))
    }
}
