//! Locked summarization workflow for one session
//!
//! At most one summarization runs per session. A call arriving while another
//! holds the lock returns immediately with an empty summary instead of
//! queueing. Failures never propagate: they are logged, reported as a failed
//! progress event and turned into an empty summary.

use super::persistence::PersistenceCoordinator;
use super::progress::{ProgressEvent, ProgressSink};
use super::repopulator::{RepopulationReport, SessionRepopulator};
use crate::context::{collect_recent_exchanges, ConversationItem, LlmCompletion, TokenTracker};
use crate::error::Result;
use crate::metrics::METRICS;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tool name reported in progress events
pub const SUMMARIZE_EVENT_NAME: &str = "summarize_context";

const SUMMARIZATION_INSTRUCTIONS: &str = "You are summarizing a conversation between a user and an AI assistant \
so that the assistant can continue it with a much smaller context. Write a dense summary that preserves: \
the user's goals and preferences, facts and decisions established so far, results of tool calls that \
later turns depend on, open questions and pending tasks, and exact names, numbers, file paths and \
identifiers. Do not continue the conversation and do not answer any question in it. Output only the summary.";

const SUMMARIZATION_DIRECTIVE: &str = "Please summarize the conversation above.";

/// Drives summarization and repopulation for one session
pub struct SummarizationOrchestrator {
    tracker: Arc<TokenTracker>,
    persistence: Arc<PersistenceCoordinator>,
    repopulator: SessionRepopulator,
    completion: Arc<dyn LlmCompletion>,
    progress: Arc<dyn ProgressSink>,
    min_messages: usize,
    lock: Mutex<()>,
}

enum Outcome {
    Completed(String),
    Skipped,
}

impl SummarizationOrchestrator {
    pub fn new(
        tracker: Arc<TokenTracker>,
        persistence: Arc<PersistenceCoordinator>,
        repopulator: SessionRepopulator,
        completion: Arc<dyn LlmCompletion>,
        progress: Arc<dyn ProgressSink>,
        min_messages: usize,
    ) -> Self {
        Self {
            tracker,
            persistence,
            repopulator,
            completion,
            progress,
            min_messages,
            lock: Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Summarize everything but the last `keep_recent` exchanges
    ///
    /// Returns the summary text, or an empty string when nothing was done.
    pub async fn summarize(&self, keep_recent: usize, force: bool) -> String {
        let session_id = self.persistence.session_id();

        let _guard = match self.lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("Summarization already running for session {}, skipping", session_id);
                METRICS.record_summarization("skipped");
                return String::new();
            }
        };

        if !force && !self.tracker.should_summarize() {
            debug!(
                "Session {} below trigger ({} <= {}), not summarizing",
                session_id,
                self.tracker.total_tokens(),
                self.tracker.trigger_tokens()
            );
            return String::new();
        }

        let call_id = format!("sum_{}", Uuid::new_v4().simple());
        match self.run(&call_id, keep_recent).await {
            Ok(Outcome::Completed(summary)) => {
                METRICS.record_summarization("completed");
                summary
            }
            Ok(Outcome::Skipped) => {
                METRICS.record_summarization("skipped");
                String::new()
            }
            Err(e) => {
                warn!("Summarization failed for session {}: {}", session_id, e);
                METRICS.record_summarization("failed");
                self.progress
                    .emit(ProgressEvent::failed(&call_id, SUMMARIZE_EVENT_NAME, e.to_string()));
                String::new()
            }
        }
    }

    async fn run(&self, call_id: &str, keep_recent: usize) -> Result<Outcome> {
        let session_id = self.persistence.session_id();
        let items = self.persistence.get_items().await?;

        if items.len() < self.min_messages {
            debug!(
                "Session {} has {} items (< {}), not summarizing",
                session_id,
                items.len(),
                self.min_messages
            );
            return Ok(Outcome::Skipped);
        }

        let recent = collect_recent_exchanges(&items, keep_recent);
        let tokens_before = self.tracker.total_tokens();

        if recent.len() == items.len() {
            info!("Nothing old enough to summarize in session {}", session_id);
            self.emit_start(call_id, items.len(), tokens_before);
            self.progress.emit(ProgressEvent::failed(
                call_id,
                SUMMARIZE_EVENT_NAME,
                "all items belong to recent exchanges; nothing to summarize",
            ));
            return Ok(Outcome::Skipped);
        }

        self.emit_start(call_id, items.len(), tokens_before);
        info!(
            "Summarizing session {}: {} items, {} tokens, keeping {} recent items",
            session_id,
            items.len(),
            tokens_before,
            recent.len()
        );

        let mut input: Vec<ConversationItem> = items.iter().map(ConversationItem::sanitized).collect();
        input.push(ConversationItem::user(SUMMARIZATION_DIRECTIVE));

        let summary = self.completion.run(SUMMARIZATION_INSTRUCTIONS, &input).await?;
        let summary = summary.trim();

        if summary.is_empty() {
            warn!("Summarization of session {} returned no text", session_id);
            self.progress.emit(ProgressEvent::failed(
                call_id,
                SUMMARIZE_EVENT_NAME,
                "summarization returned an empty result",
            ));
            return Ok(Outcome::Skipped);
        }

        let report = self.repopulator.repopulate_with_summary(summary, &recent).await?;
        METRICS.record_tokens_saved(report.tokens_saved);
        self.progress.emit(ProgressEvent::succeeded(
            call_id,
            SUMMARIZE_EVENT_NAME,
            completion_output(summary, &report),
        ));

        Ok(Outcome::Completed(summary.to_string()))
    }

    fn emit_start(&self, call_id: &str, items_count: usize, tokens_before: usize) {
        let arguments = serde_json::json!({
            "items_count": items_count,
            "tokens_before": tokens_before,
            "threshold": self.tracker.trigger_tokens(),
        });
        self.progress.emit(ProgressEvent::start(
            call_id,
            SUMMARIZE_EVENT_NAME,
            Some(arguments.to_string()),
        ));
    }
}

fn completion_output(summary: &str, report: &RepopulationReport) -> String {
    serde_json::json!({
        "summary": summary,
        "tokens_before": report.tokens_before,
        "tokens_after": report.tokens_after,
        "tokens_saved": report.tokens_saved,
    })
    .to_string()
}
