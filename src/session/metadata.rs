//! Session metadata row

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to sessions nobody has named yet
pub const DEFAULT_TITLE: &str = "New Chat";

/// Metadata describing one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub title: String,
    /// Set once a title was chosen explicitly or generated
    #[serde(default)]
    pub is_named: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub turn_count: usize,
    #[serde(default)]
    pub accumulated_tool_tokens: usize,
    #[serde(default)]
    pub total_tokens: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_config: Option<serde_json::Value>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub pinned: bool,
}

impl SessionMetadata {
    pub fn new(session_id: impl Into<String>, title: Option<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        let is_named = title.is_some();
        Self {
            session_id: session_id.into(),
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            is_named,
            created_at: now,
            last_used_at: now,
            message_count: 0,
            turn_count: 0,
            accumulated_tool_tokens: 0,
            total_tokens: 0,
            mcp_config: None,
            model: model.into(),
            reasoning_effort: None,
            pinned: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }

    pub fn touch(&mut self) {
        self.last_used_at = Utc::now();
    }
}

/// Optional per-session settings changed through the manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    pub mcp_config: Option<serde_json::Value>,
}
