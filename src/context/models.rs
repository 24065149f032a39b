//! Data models for conversation items and token state

use serde::{Deserialize, Serialize};

/// Placeholder substituted for image parts when only text is wanted
pub const IMAGE_PLACEHOLDER: &str = "[image]";

/// Speaker of a conversation item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One part of a multi-part message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Output { output: String },
    Image { url: String },
    File { name: String },
}

impl ContentPart {
    /// Text that counts toward the token budget; binary parts have none
    pub fn countable_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            ContentPart::Output { output } => Some(output),
            ContentPart::Image { .. } | ContentPart::File { .. } => None,
        }
    }

    /// Text rendering with placeholders for binary parts
    pub fn display_text(&self) -> String {
        match self {
            ContentPart::Text { text } => text.clone(),
            ContentPart::Output { output } => output.clone(),
            ContentPart::Image { .. } => IMAGE_PLACEHOLDER.to_string(),
            ContentPart::File { name } => format!("[file: {}]", name),
        }
    }
}

/// Message body: plain text or a list of parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.trim().is_empty(),
            Content::Parts(parts) => parts.is_empty(),
        }
    }

    /// Concatenated text with binary parts replaced by placeholders
    pub fn display_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .map(ContentPart::display_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

/// Tool invocation requested inside an assistant message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

/// A single entry of a conversation
///
/// `id` is assigned by the upstream provider and is only meaningful until the
/// session is repopulated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        role: Role,
        content: Content,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        output: String,
        ok: bool,
    },
}

impl ConversationItem {
    pub fn message(role: Role, content: impl Into<Content>) -> Self {
        ConversationItem::Message {
            id: None,
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::message(Role::User, content)
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::message(Role::Assistant, content)
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self::message(Role::System, content)
    }

    pub fn tool_call(call_id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        ConversationItem::ToolCall {
            id: None,
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, output: impl Into<String>, ok: bool) -> Self {
        ConversationItem::ToolResult {
            id: None,
            call_id: call_id.into(),
            output: output.into(),
            ok,
        }
    }

    /// Attach a provider identifier
    pub fn with_id(mut self, new_id: impl Into<String>) -> Self {
        let new_id = Some(new_id.into());
        match &mut self {
            ConversationItem::Message { id, .. }
            | ConversationItem::ToolCall { id, .. }
            | ConversationItem::ToolResult { id, .. } => *id = new_id,
        }
        self
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ConversationItem::Message { id, .. }
            | ConversationItem::ToolCall { id, .. }
            | ConversationItem::ToolResult { id, .. } => id.as_deref(),
        }
    }

    /// Role the item is attributed to; tool calls are issued by the assistant
    pub fn role(&self) -> Role {
        match self {
            ConversationItem::Message { role, .. } => *role,
            ConversationItem::ToolCall { .. } => Role::Assistant,
            ConversationItem::ToolResult { .. } => Role::Tool,
        }
    }

    /// Role when the item is a user or assistant message, which is what
    /// delimits an exchange. Tool traffic never does.
    pub fn exchange_role(&self) -> Option<Role> {
        match self {
            ConversationItem::Message { role, .. } if matches!(role, Role::User | Role::Assistant) => {
                Some(*role)
            }
            _ => None,
        }
    }

    /// Text rendering used for summarization and titles
    pub fn text(&self) -> String {
        match self {
            ConversationItem::Message { content, .. } => content.display_text(),
            ConversationItem::ToolCall { name, arguments, .. } => {
                format!("[tool call] {}({})", name, arguments)
            }
            ConversationItem::ToolResult { output, ok, .. } => {
                let status = if *ok { "ok" } else { "error" };
                format!("[tool result: {}] {}", status, output)
            }
        }
    }

    /// Text-only copy suitable for a side request to the model
    pub fn sanitized(&self) -> Self {
        let role = match self {
            ConversationItem::Message { role, .. } => *role,
            // Provider APIs reject dangling tool traffic; replay it as narration.
            ConversationItem::ToolCall { .. } | ConversationItem::ToolResult { .. } => Role::Assistant,
        };
        Self::message(role, self.text())
    }

    /// Copy holding only role and content, or `None` if that would not be a
    /// valid standalone message
    pub fn without_identity(&self) -> Option<Self> {
        match self {
            ConversationItem::Message { role, content, .. } if !content.is_empty() => {
                Some(Self::message(*role, content.clone()))
            }
            _ => None,
        }
    }
}

/// Snapshot of a session's token accounting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenState {
    pub model: String,
    pub max_tokens: usize,
    pub trigger_tokens: usize,
    pub total_tokens: usize,
    pub accumulated_tool_tokens: usize,
}
