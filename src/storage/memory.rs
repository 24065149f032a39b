//! In-memory storage implementations

use super::{HistoryRecord, HistoryStore, ItemStore, ItemStoreProvider, MetadataStore};
use crate::context::ConversationItem;
use crate::error::Result;
use crate::session::SessionMetadata;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Layer-1 store held in memory
pub struct MemoryItemStore {
    session_id: String,
    items: RwLock<Vec<ConversationItem>>,
}

impl MemoryItemStore {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            items: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn get_items(&self) -> Result<Vec<ConversationItem>> {
        Ok(self.items.read().await.clone())
    }

    async fn add_items(&self, items: &[ConversationItem]) -> Result<()> {
        self.items.write().await.extend_from_slice(items);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.items.write().await.clear();
        Ok(())
    }
}

/// Hands out one shared [`MemoryItemStore`] per session
#[derive(Default)]
pub struct MemoryItemStoreProvider {
    stores: DashMap<String, Arc<MemoryItemStore>>,
}

impl MemoryItemStoreProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItemStoreProvider for MemoryItemStoreProvider {
    fn open(&self, session_id: &str) -> Arc<dyn ItemStore> {
        let store = self
            .stores
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(MemoryItemStore::new(session_id)))
            .clone();
        store
    }

    fn discard(&self, session_id: &str) {
        self.stores.remove(session_id);
    }
}

/// Layer-2 store held in memory
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: RwLock<HashMap<String, Vec<HistoryRecord>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw rows of a session
    pub async fn records(&self, session_id: &str) -> Vec<HistoryRecord> {
        self.records
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn save_message(&self, session_id: &str, item: &ConversationItem) -> Result<()> {
        let record = HistoryRecord::from_item(session_id, item)?;
        self.records
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<ConversationItem>> {
        self.records(session_id)
            .await
            .iter()
            .map(HistoryRecord::to_item)
            .collect()
    }

    async fn get_message_count(&self, session_id: &str) -> Result<usize> {
        Ok(self
            .records
            .read()
            .await
            .get(session_id)
            .map(Vec::len)
            .unwrap_or(0))
    }

    async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.records.write().await.remove(session_id);
        Ok(())
    }
}

/// Metadata table held in memory
#[derive(Default)]
pub struct MemoryMetadataStore {
    rows: RwLock<HashMap<String, SessionMetadata>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        Ok(self.rows.read().await.get(session_id).cloned())
    }

    async fn put(&self, metadata: &SessionMetadata) -> Result<()> {
        self.rows
            .write()
            .await
            .insert(metadata.session_id.clone(), metadata.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        Ok(self.rows.write().await.remove(session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<SessionMetadata>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }
}
