//! Per-session facade used by the turn-processing caller

use super::orchestrator::SummarizationOrchestrator;
use super::persistence::{ConsistencyReport, PersistenceCoordinator};
use super::progress::ProgressSink;
use super::repopulator::SessionRepopulator;
use crate::config::{PersistenceConfig, SummarizationConfig};
use crate::context::{ConversationItem, LlmCompletion, TokenState, TokenTracker};
use crate::error::{Result, SessionError};
use crate::storage::{HistoryStore, ItemStore, MetadataStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Collaborators a [`Session`] is assembled from
pub struct SessionParts {
    pub items: Arc<dyn ItemStore>,
    pub history: Option<Arc<dyn HistoryStore>>,
    pub metadata: Option<Arc<dyn MetadataStore>>,
    pub completion: Arc<dyn LlmCompletion>,
    pub progress: Arc<dyn ProgressSink>,
    pub persistence: PersistenceConfig,
    pub summarization: SummarizationConfig,
}

/// One conversation: token accounting, dual-layer storage and summarization
pub struct Session {
    session_id: String,
    tracker: Arc<TokenTracker>,
    persistence: Arc<PersistenceCoordinator>,
    orchestrator: SummarizationOrchestrator,
    default_keep_recent: usize,
    /// Set once the session is deleted; stale handles must not write
    closed: AtomicBool,
}

impl Session {
    pub fn new(tracker: TokenTracker, parts: SessionParts) -> Self {
        let tracker = Arc::new(tracker);
        let persistence = Arc::new(PersistenceCoordinator::new(
            parts.items,
            parts.history,
            parts.persistence,
        ));
        let repopulator = SessionRepopulator::new(tracker.clone(), persistence.clone(), parts.metadata);
        let orchestrator = SummarizationOrchestrator::new(
            tracker.clone(),
            persistence.clone(),
            repopulator,
            parts.completion,
            parts.progress,
            parts.summarization.min_messages,
        );

        Self {
            session_id: persistence.session_id().to_string(),
            tracker,
            persistence,
            orchestrator,
            default_keep_recent: parts.summarization.keep_recent,
            closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Refuse further writes through this handle
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::NotFound(format!("session {} was deleted", self.session_id)));
        }
        Ok(())
    }

    /// Persist items to both layers and refresh the token total
    pub async fn add_items(&self, items: &[ConversationItem]) -> Result<()> {
        self.ensure_open()?;
        self.persistence.save_items(items).await?;
        let all = self.persistence.get_items().await?;
        self.tracker.refresh(&all);
        Ok(())
    }

    /// Working-context items (Layer 1)
    pub async fn get_items(&self) -> Result<Vec<ConversationItem>> {
        self.persistence.get_items().await
    }

    pub fn should_summarize(&self) -> bool {
        self.tracker.should_summarize()
    }

    /// See [`SummarizationOrchestrator::summarize`]
    pub async fn summarize(&self, keep_recent: usize, force: bool) -> String {
        if self.is_closed() {
            debug!("Session {} was deleted, not summarizing", self.session_id);
            return String::new();
        }
        self.orchestrator.summarize(keep_recent, force).await
    }

    /// Summarize with the configured number of preserved exchanges
    pub async fn summarize_default(&self, force: bool) -> String {
        self.summarize(self.default_keep_recent, force).await
    }

    pub fn update_with_tool_tokens(&self, tokens: usize) {
        self.tracker.update_with_tool_tokens(tokens);
    }

    pub fn total_tokens(&self) -> usize {
        self.tracker.total_tokens()
    }

    pub fn accumulated_tool_tokens(&self) -> usize {
        self.tracker.accumulated_tool_tokens()
    }

    pub fn token_state(&self) -> TokenState {
        self.tracker.state()
    }

    pub fn tracker(&self) -> &TokenTracker {
        &self.tracker
    }

    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        self.persistence.validate_consistency().await
    }

    /// Remove both storage layers of this session and reset token state
    pub async fn delete_storage(&self) -> Result<()> {
        self.persistence.clear_all().await?;
        self.tracker.clear_cache();
        self.tracker.restore(0, 0);
        info!("Deleted storage for session {}", self.session_id);
        Ok(())
    }
}
