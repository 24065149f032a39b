//! Dual-layer persistence with retry and rollback
//!
//! Every write lands in Layer 1 (working context) first and is then mirrored
//! to Layer 2 (full history). When Layer 2 cannot be written after the
//! configured retries, Layer 1 is restored to its pre-write snapshot so the
//! session never holds working-context items its history lacks. A failed
//! restore is reported as [`SessionError::CriticalInconsistency`].

use crate::config::PersistenceConfig;
use crate::context::ConversationItem;
use crate::error::{Result, SessionError};
use crate::metrics::METRICS;
use crate::storage::{HistoryStore, ItemStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Coordinates writes across both storage layers of one session
pub struct PersistenceCoordinator {
    session_id: String,
    items: Arc<dyn ItemStore>,
    history: Option<Arc<dyn HistoryStore>>,
    retry: PersistenceConfig,
    skip_history: Arc<AtomicBool>,
}

/// Restores the previous skip-history flag when dropped
pub struct SkipHistoryGuard {
    flag: Arc<AtomicBool>,
    previous: bool,
}

impl Drop for SkipHistoryGuard {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

/// Outcome of a layer comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub consistent: bool,
    pub layer1_count: usize,
    pub layer2_count: usize,
    pub diagnostic: Option<String>,
}

impl PersistenceCoordinator {
    pub fn new(
        items: Arc<dyn ItemStore>,
        history: Option<Arc<dyn HistoryStore>>,
        retry: PersistenceConfig,
    ) -> Self {
        Self {
            session_id: items.session_id().to_string(),
            items,
            history,
            retry,
            skip_history: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn has_history(&self) -> bool {
        self.history.is_some()
    }

    /// Route writes to Layer 1 only until the guard is dropped
    pub(crate) fn skip_history_scope(&self) -> SkipHistoryGuard {
        let previous = self.skip_history.swap(true, Ordering::SeqCst);
        SkipHistoryGuard {
            flag: self.skip_history.clone(),
            previous,
        }
    }

    pub fn is_skipping_history(&self) -> bool {
        self.skip_history.load(Ordering::SeqCst)
    }

    pub async fn get_items(&self) -> Result<Vec<ConversationItem>> {
        self.items.get_items().await
    }

    /// Write `items` to Layer 1 and, unless skipping, to Layer 2
    pub async fn save_items(&self, items: &[ConversationItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let skipping = self.is_skipping_history();
        let history = match (&self.history, skipping) {
            (_, true) => {
                self.items.add_items(items).await?;
                debug!(
                    "Wrote {} items to working context only for session {}",
                    items.len(),
                    self.session_id
                );
                return Ok(());
            }
            (Some(history), false) => history.clone(),
            (None, false) => {
                return Err(SessionError::Configuration(format!(
                    "no history store configured for session {}; refusing to write working context alone",
                    self.session_id
                )));
            }
        };

        let snapshot = self.items.get_items().await?;
        self.items.add_items(items).await?;

        // Every typed item carries a role, so all of them are mirrored.
        if let Err((attempts, message)) = self.write_history(history.as_ref(), items).await {
            return Err(self.rollback(snapshot, attempts, message).await);
        }

        debug!("Persisted {} items for session {}", items.len(), self.session_id);
        Ok(())
    }

    /// Mirror items to Layer 2, resuming after the last item written on retry
    async fn write_history(
        &self,
        history: &dyn HistoryStore,
        items: &[ConversationItem],
    ) -> std::result::Result<(), (u32, String)> {
        let mut written = 0usize;
        let mut failures = 0u32;

        while written < items.len() {
            match history.save_message(&self.session_id, &items[written]).await {
                Ok(()) => written += 1,
                Err(e) => {
                    failures += 1;
                    if failures >= self.retry.max_attempts {
                        warn!(
                            "History write failed for session {} after {} attempts ({}/{} items written): {}",
                            self.session_id,
                            failures,
                            written,
                            items.len(),
                            e
                        );
                        return Err((failures, e.to_string()));
                    }

                    let delay = self.retry.backoff_for(failures);
                    warn!(
                        "History write failed for session {} (attempt {}), retrying in {:?}: {}",
                        self.session_id, failures, delay, e
                    );
                    METRICS.persistence_retries.inc();
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Ok(())
    }

    async fn rollback(&self, snapshot: Vec<ConversationItem>, attempts: u32, message: String) -> SessionError {
        error!(
            "Rolling back working context for session {} to {} items",
            self.session_id,
            snapshot.len()
        );

        match self.replace_working_context(&snapshot).await {
            Ok(()) => {
                METRICS.persistence_rollbacks.inc();
                info!("Rollback succeeded for session {}", self.session_id);
                SessionError::Persistence {
                    session_id: self.session_id.clone(),
                    attempts,
                    message,
                }
            }
            Err(rollback_error) => {
                METRICS.critical_inconsistencies.inc();
                error!(
                    "CRITICAL: rollback failed for session {}; working context and history have diverged. \
                     history error: {}; rollback error: {}",
                    self.session_id, message, rollback_error
                );
                SessionError::CriticalInconsistency {
                    session_id: self.session_id.clone(),
                    message: format!("history write failed ({}); rollback failed ({})", message, rollback_error),
                }
            }
        }
    }

    /// Compare role-bearing item counts of both layers
    ///
    /// Layer 2 is a superset in intent, so the layers are consistent while
    /// Layer 1 holds no more items than Layer 2.
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        let layer1_count = self.items.get_items().await?.len();

        let Some(history) = &self.history else {
            return Ok(ConsistencyReport {
                consistent: false,
                layer1_count,
                layer2_count: 0,
                diagnostic: Some("no history store configured".to_string()),
            });
        };

        let layer2_count = history.get_message_count(&self.session_id).await?;
        let consistent = layer1_count <= layer2_count;
        let diagnostic = (!consistent).then(|| {
            format!(
                "working context has {} items but history only {} for session {}",
                layer1_count, layer2_count, self.session_id
            )
        });

        Ok(ConsistencyReport {
            consistent,
            layer1_count,
            layer2_count,
            diagnostic,
        })
    }

    /// Overwrite Layer 1 with `items`, leaving Layer 2 untouched
    pub(crate) async fn replace_working_context(&self, items: &[ConversationItem]) -> Result<()> {
        self.items.clear().await?;
        self.items.add_items(items).await
    }

    /// Clear Layer 1 only
    pub async fn clear_working_context(&self) -> Result<()> {
        self.items.clear().await
    }

    /// Clear both layers for this session
    pub async fn clear_all(&self) -> Result<()> {
        self.items.clear().await?;
        if let Some(history) = &self.history {
            history.clear_session(&self.session_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryHistoryStore, MemoryItemStore};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// History store failing `failures` writes once it holds `fail_at` rows
    struct FlakyHistory {
        inner: MemoryHistoryStore,
        fail_at: usize,
        remaining_failures: AtomicU32,
    }

    impl FlakyHistory {
        fn new(failures: u32) -> Self {
            Self::failing_at(0, failures)
        }

        fn failing_at(fail_at: usize, failures: u32) -> Self {
            Self {
                inner: MemoryHistoryStore::new(),
                fail_at,
                remaining_failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl HistoryStore for FlakyHistory {
        async fn save_message(&self, session_id: &str, item: &ConversationItem) -> Result<()> {
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            let rows = self.inner.get_message_count(session_id).await?;
            if remaining > 0 && rows == self.fail_at {
                self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(SessionError::Storage("history unavailable".to_string()));
            }
            self.inner.save_message(session_id, item).await
        }

        async fn get_messages(&self, session_id: &str) -> Result<Vec<ConversationItem>> {
            self.inner.get_messages(session_id).await
        }

        async fn get_message_count(&self, session_id: &str) -> Result<usize> {
            self.inner.get_message_count(session_id).await
        }

        async fn clear_session(&self, session_id: &str) -> Result<()> {
            self.inner.clear_session(session_id).await
        }
    }

    fn fast_retry() -> PersistenceConfig {
        PersistenceConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            backoff_multiplier: 2.0,
        }
    }

    fn exchange() -> Vec<ConversationItem> {
        vec![ConversationItem::user("hello"), ConversationItem::assistant("hi")]
    }

    #[tokio::test]
    async fn test_missing_history_store_fails_fast() {
        let items = Arc::new(MemoryItemStore::new("sess_1"));
        let coordinator = PersistenceCoordinator::new(items.clone(), None, fast_retry());

        let result = coordinator.save_items(&exchange()).await;
        assert!(matches!(result, Err(SessionError::Configuration(_))));
        assert!(items.get_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skip_scope_writes_layer_one_only_and_restores_flag() {
        let items = Arc::new(MemoryItemStore::new("sess_1"));
        let coordinator = PersistenceCoordinator::new(items.clone(), None, fast_retry());

        {
            let _guard = coordinator.skip_history_scope();
            assert!(coordinator.is_skipping_history());
            {
                let _nested = coordinator.skip_history_scope();
            }
            assert!(coordinator.is_skipping_history());
            coordinator.save_items(&exchange()).await.unwrap();
        }

        assert!(!coordinator.is_skipping_history());
        assert_eq!(items.get_items().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transient_history_failure_is_retried() {
        let items = Arc::new(MemoryItemStore::new("sess_1"));
        let history = Arc::new(FlakyHistory::new(2));
        let coordinator = PersistenceCoordinator::new(items.clone(), Some(history.clone()), fast_retry());

        coordinator.save_items(&exchange()).await.unwrap();

        assert_eq!(items.get_items().await.unwrap().len(), 2);
        assert_eq!(history.get_message_count("sess_1").await.unwrap(), 2);
        assert!(coordinator.validate_consistency().await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_exhausted_retries_roll_back_layer_one() {
        let items = Arc::new(MemoryItemStore::new("sess_1"));
        items.add_items(&[ConversationItem::user("earlier")]).await.unwrap();
        let history = Arc::new(FlakyHistory::new(10));
        let coordinator = PersistenceCoordinator::new(items.clone(), Some(history), fast_retry());

        let result = coordinator.save_items(&exchange()).await;

        match result {
            Err(SessionError::Persistence { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected persistence error, got {:?}", other),
        }
        assert_eq!(items.get_items().await.unwrap(), vec![ConversationItem::user("earlier")]);
    }

    #[tokio::test]
    async fn test_retry_resumes_after_partial_write() {
        let items = Arc::new(MemoryItemStore::new("sess_1"));
        let history = Arc::new(FlakyHistory::failing_at(1, 1));
        let coordinator = PersistenceCoordinator::new(items.clone(), Some(history.clone()), fast_retry());
        let batch = vec![
            ConversationItem::user("one"),
            ConversationItem::assistant("two"),
            ConversationItem::user("three"),
        ];

        coordinator.save_items(&batch).await.unwrap();

        assert_eq!(history.get_messages("sess_1").await.unwrap(), batch);
        assert_eq!(items.get_items().await.unwrap(), batch);
    }

    #[tokio::test]
    async fn test_partial_write_rolls_back_and_stays_consistent() {
        let items = Arc::new(MemoryItemStore::new("sess_1"));
        let history = Arc::new(FlakyHistory::failing_at(2, 10));
        let coordinator = PersistenceCoordinator::new(items.clone(), Some(history.clone()), fast_retry());
        coordinator.save_items(&[ConversationItem::user("earlier")]).await.unwrap();

        let result = coordinator
            .save_items(&[
                ConversationItem::assistant("one"),
                ConversationItem::user("two"),
                ConversationItem::assistant("three"),
            ])
            .await;

        assert!(matches!(result, Err(SessionError::Persistence { attempts: 3, .. })));
        assert_eq!(items.get_items().await.unwrap(), vec![ConversationItem::user("earlier")]);

        let report = coordinator.validate_consistency().await.unwrap();
        assert_eq!(report.layer1_count, 1);
        assert_eq!(report.layer2_count, 2);
        assert!(report.consistent);
    }

    #[tokio::test]
    async fn test_consistency_detects_orphaned_items() {
        let items = Arc::new(MemoryItemStore::new("sess_1"));
        let history = Arc::new(MemoryHistoryStore::new());
        let coordinator = PersistenceCoordinator::new(items.clone(), Some(history), fast_retry());

        coordinator.save_items(&exchange()).await.unwrap();
        items.add_items(&[ConversationItem::user("orphan")]).await.unwrap();

        let report = coordinator.validate_consistency().await.unwrap();
        assert!(!report.consistent);
        assert_eq!(report.layer1_count, 3);
        assert_eq!(report.layer2_count, 2);
        assert!(report.diagnostic.is_some());
    }
}
