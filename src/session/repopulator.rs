//! Rebuilds a session's working context from a summary and recent exchanges

use super::persistence::PersistenceCoordinator;
use crate::context::{ConversationItem, TokenTracker};
use crate::error::{Result, SessionError};
use crate::metrics::METRICS;
use crate::storage::MetadataStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Prefix of the system item that carries the summary
pub const SUMMARY_PREFIX: &str = "Previous conversation summary:\n";

/// Token figures of a completed repopulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepopulationReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub tokens_saved: usize,
    pub summary_tokens: usize,
    pub recent_tokens: usize,
}

pub struct SessionRepopulator {
    tracker: Arc<TokenTracker>,
    persistence: Arc<PersistenceCoordinator>,
    metadata: Option<Arc<dyn MetadataStore>>,
}

impl SessionRepopulator {
    pub fn new(
        tracker: Arc<TokenTracker>,
        persistence: Arc<PersistenceCoordinator>,
        metadata: Option<Arc<dyn MetadataStore>>,
    ) -> Self {
        Self {
            tracker,
            persistence,
            metadata,
        }
    }

    /// Replace Layer 1 with `summary` followed by `recent_items`
    ///
    /// Layer 2 is left untouched. Recent items are re-inserted without their
    /// provider identifiers, which are no longer valid out of sequence.
    pub async fn repopulate_with_summary(
        &self,
        summary: &str,
        recent_items: &[ConversationItem],
    ) -> Result<RepopulationReport> {
        let session_id = self.persistence.session_id().to_string();

        let summary_item = ConversationItem::system(format!("{}{}", SUMMARY_PREFIX, summary));
        let stripped: Vec<ConversationItem> = recent_items
            .iter()
            .filter_map(ConversationItem::without_identity)
            .collect();

        if !recent_items.is_empty() && stripped.is_empty() {
            return Err(SessionError::Validation(format!(
                "all {} recent items of session {} were invalid after stripping identity",
                recent_items.len(),
                session_id
            )));
        }
        if stripped.len() < recent_items.len() {
            warn!(
                "Dropped {} invalid recent items while repopulating session {}",
                recent_items.len() - stripped.len(),
                session_id
            );
        }

        let tokens_before = self.tracker.total_tokens();
        let summary_tokens = self.tracker.count_item_tokens(&summary_item);
        let recent_tokens = self.tracker.calculate_total_tokens(&stripped);

        let snapshot = self.persistence.get_items().await?;
        if let Err(e) = self.rebuild_working_context(&summary_item, &stripped).await {
            return Err(self.restore_snapshot(&session_id, &snapshot, e).await);
        }
        self.tracker.clear_cache();

        let tokens_after = summary_tokens + recent_tokens;
        self.tracker.reset_after_repopulation(tokens_after);
        self.persist_token_counters(&session_id, tokens_after).await;

        let report = RepopulationReport {
            tokens_before,
            tokens_after,
            tokens_saved: tokens_before.saturating_sub(tokens_after),
            summary_tokens,
            recent_tokens,
        };

        info!(
            "Repopulated session {}: {} -> {} tokens ({} recent items)",
            session_id,
            tokens_before,
            tokens_after,
            stripped.len()
        );

        Ok(report)
    }

    async fn rebuild_working_context(&self, summary_item: &ConversationItem, recent: &[ConversationItem]) -> Result<()> {
        let _layer_one_only = self.persistence.skip_history_scope();
        self.persistence.clear_working_context().await?;
        self.persistence.save_items(std::slice::from_ref(summary_item)).await?;
        self.persistence.save_items(recent).await
    }

    /// Put the pre-repopulation items back after a failed rebuild
    async fn restore_snapshot(&self, session_id: &str, snapshot: &[ConversationItem], cause: SessionError) -> SessionError {
        warn!(
            "Repopulation of session {} failed, restoring {} items: {}",
            session_id,
            snapshot.len(),
            cause
        );

        match self.persistence.replace_working_context(snapshot).await {
            Ok(()) => cause,
            Err(restore_error) => {
                METRICS.critical_inconsistencies.inc();
                error!(
                    "CRITICAL: could not restore working context of session {}: {}",
                    session_id, restore_error
                );
                SessionError::CriticalInconsistency {
                    session_id: session_id.to_string(),
                    message: format!("repopulation failed ({}); restore failed ({})", cause, restore_error),
                }
            }
        }
    }

    async fn persist_token_counters(&self, session_id: &str, total_tokens: usize) {
        let Some(store) = &self.metadata else {
            return;
        };

        match store.get(session_id).await {
            Ok(Some(mut metadata)) => {
                metadata.accumulated_tool_tokens = 0;
                metadata.total_tokens = total_tokens;
                if let Err(e) = store.put(&metadata).await {
                    warn!("Failed to persist token counters for session {}: {}", session_id, e);
                }
            }
            Ok(None) => warn!("No metadata for session {}; token counters not persisted", session_id),
            Err(e) => warn!("Failed to load metadata for session {}: {}", session_id, e),
        }
    }
}
