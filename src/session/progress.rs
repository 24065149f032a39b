//! Progress notifications consumed by the streaming layer

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Event phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Start,
    Completed,
}

/// A start or completion notification for a long-running step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ProgressEvent {
    pub fn start(call_id: impl Into<String>, name: impl Into<String>, arguments: Option<String>) -> Self {
        Self {
            kind: ProgressKind::Start,
            call_id: call_id.into(),
            name: Some(name.into()),
            arguments,
            success: None,
            error: None,
            output: None,
        }
    }

    pub fn succeeded(call_id: impl Into<String>, name: impl Into<String>, output: String) -> Self {
        Self {
            kind: ProgressKind::Completed,
            call_id: call_id.into(),
            name: Some(name.into()),
            arguments: None,
            success: Some(true),
            error: None,
            output: Some(output),
        }
    }

    pub fn failed(call_id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Completed,
            call_id: call_id.into(),
            name: Some(name.into()),
            arguments: None,
            success: Some(false),
            error: Some(error.into()),
            output: None,
        }
    }
}

/// Receiver of progress events
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Drops every event
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events to an unbounded channel
pub struct ChannelProgressSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn new(sender: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            debug!("Progress receiver dropped, event discarded");
        }
    }
}
