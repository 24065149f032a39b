//! Storage collaborators
//!
//! - Layer 1 ([`ItemStore`]): the replayable working context of one session
//! - Layer 2 ([`HistoryStore`]): append-only full history keyed by session
//! - [`MetadataStore`]: one [`SessionMetadata`] row per session

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileMetadataStore;
pub use memory::{MemoryHistoryStore, MemoryItemStore, MemoryItemStoreProvider, MemoryMetadataStore};

use crate::context::{ConversationItem, Role};
use crate::error::Result;
use crate::session::SessionMetadata;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Layer 1: the working context bound to one session
#[async_trait]
pub trait ItemStore: Send + Sync {
    fn session_id(&self) -> &str;

    async fn get_items(&self) -> Result<Vec<ConversationItem>>;

    async fn add_items(&self, items: &[ConversationItem]) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Opens the Layer-1 store of a session
pub trait ItemStoreProvider: Send + Sync {
    fn open(&self, session_id: &str) -> Arc<dyn ItemStore>;

    /// Forget a deleted session's store
    fn discard(&self, _session_id: &str) {}
}

/// Layer 2: full history shared by all sessions
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save_message(&self, session_id: &str, item: &ConversationItem) -> Result<()>;

    async fn get_messages(&self, session_id: &str) -> Result<Vec<ConversationItem>>;

    async fn get_message_count(&self, session_id: &str) -> Result<usize>;

    async fn clear_session(&self, session_id: &str) -> Result<()>;
}

/// Session metadata persistence
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>>;

    async fn put(&self, metadata: &SessionMetadata) -> Result<()>;

    /// Remove a row, returning whether it existed
    async fn delete(&self, session_id: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<SessionMetadata>>;
}

/// One Layer-2 row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_arguments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Full item, kept so history can be replayed for display
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_item(session_id: &str, item: &ConversationItem) -> Result<Self> {
        let mut record = Self {
            session_id: session_id.to_string(),
            role: item.role(),
            content: item.text(),
            tool_call_id: None,
            tool_name: None,
            tool_arguments: None,
            tool_result: None,
            success: None,
            metadata: serde_json::to_value(item)?,
            created_at: Utc::now(),
        };

        match item {
            ConversationItem::ToolCall { call_id, name, arguments, .. } => {
                record.tool_call_id = Some(call_id.clone());
                record.tool_name = Some(name.clone());
                record.tool_arguments = Some(arguments.clone());
            }
            ConversationItem::ToolResult { call_id, output, ok, .. } => {
                record.tool_call_id = Some(call_id.clone());
                record.tool_result = Some(output.clone());
                record.success = Some(*ok);
            }
            ConversationItem::Message { .. } => {}
        }

        Ok(record)
    }

    pub fn to_item(&self) -> Result<ConversationItem> {
        Ok(serde_json::from_value(self.metadata.clone())?)
    }
}
