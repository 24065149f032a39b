//! Per-session token accounting
//!
//! Counts are exact (tokenizer-backed) and cached by item identifier. The
//! running total is `sum(item tokens) + accumulated_tool_tokens`; tool-call
//! cost is tracked out of band because tool output may not exist as an item
//! yet when it is counted.

use super::models::{Content, ConversationItem, TokenState};
use super::tokenizer::Tokenizer;
use crate::config::TokenConfig;
use crate::error::{Result, SessionError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Token tracker for one session
pub struct TokenTracker {
    tokenizer: Arc<dyn Tokenizer>,
    model: String,
    max_tokens: usize,
    trigger_tokens: usize,
    message_overhead: usize,
    total_tokens: AtomicUsize,
    accumulated_tool_tokens: AtomicUsize,
    cache: DashMap<String, usize>,
}

impl TokenTracker {
    /// Create a tracker; `threshold` must lie in `(0.0, 1.0]`
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        model: impl Into<String>,
        max_tokens: usize,
        threshold: f64,
    ) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(SessionError::Validation(format!(
                "threshold must be in (0.0, 1.0], got {}",
                threshold
            )));
        }

        Ok(Self {
            tokenizer,
            model: model.into(),
            max_tokens,
            trigger_tokens: (max_tokens as f64 * threshold) as usize,
            message_overhead: 3,
            total_tokens: AtomicUsize::new(0),
            accumulated_tool_tokens: AtomicUsize::new(0),
            cache: DashMap::new(),
        })
    }

    /// Create from the `[tokens]` configuration section
    pub fn from_config(tokenizer: Arc<dyn Tokenizer>, config: &TokenConfig) -> Result<Self> {
        Ok(Self::new(tokenizer, config.model.clone(), config.max_tokens, config.threshold)?
            .with_message_overhead(config.message_overhead))
    }

    pub fn with_message_overhead(mut self, overhead: usize) -> Self {
        self.message_overhead = overhead;
        self
    }

    fn count(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text, &self.model)
    }

    /// Exact token count of one item, including the per-message framing tax
    pub fn count_item_tokens(&self, item: &ConversationItem) -> usize {
        let body = match item {
            ConversationItem::Message { content, tool_calls, .. } => {
                let content_tokens = match content {
                    Content::Text(text) => self.count(text),
                    Content::Parts(parts) => parts
                        .iter()
                        .filter_map(|part| part.countable_text())
                        .map(|text| self.count(text))
                        .sum(),
                };
                let call_tokens: usize = tool_calls.iter().map(|call| self.count(&call.arguments)).sum();
                content_tokens + call_tokens
            }
            ConversationItem::ToolCall { name, arguments, .. } => self.count(name) + self.count(arguments),
            ConversationItem::ToolResult { output, .. } => self.count(output),
        };
        body + self.message_overhead
    }

    /// Sum item tokens, serving identified items from the cache
    pub fn calculate_total_tokens(&self, items: &[ConversationItem]) -> usize {
        let mut hits = 0usize;
        let total = items
            .iter()
            .map(|item| match item.id() {
                Some(id) => {
                    if let Some(cached) = self.cache.get(id) {
                        hits += 1;
                        return *cached;
                    }
                    let tokens = self.count_item_tokens(item);
                    self.cache.insert(id.to_string(), tokens);
                    tokens
                }
                None => self.count_item_tokens(item),
            })
            .sum();

        debug!(
            "Counted {} items ({} cached): {} tokens",
            items.len(),
            hits,
            total
        );
        total
    }

    /// Recompute the running total from the working-context items
    pub fn refresh(&self, items: &[ConversationItem]) -> usize {
        let total = self.calculate_total_tokens(items) + self.accumulated_tool_tokens();
        self.total_tokens.store(total, Ordering::SeqCst);
        total
    }

    /// Add out-of-band tool-call cost
    pub fn update_with_tool_tokens(&self, delta: usize) {
        self.accumulated_tool_tokens.fetch_add(delta, Ordering::SeqCst);
        self.total_tokens.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn should_summarize(&self) -> bool {
        self.total_tokens() > self.trigger_tokens
    }

    /// Invalidate every cached count
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens.load(Ordering::SeqCst)
    }

    pub fn set_total_tokens(&self, total: usize) {
        self.total_tokens.store(total, Ordering::SeqCst);
    }

    pub fn accumulated_tool_tokens(&self) -> usize {
        self.accumulated_tool_tokens.load(Ordering::SeqCst)
    }

    /// Restore counters, e.g. from persisted session metadata
    pub fn restore(&self, total_tokens: usize, accumulated_tool_tokens: usize) {
        self.accumulated_tool_tokens.store(accumulated_tool_tokens, Ordering::SeqCst);
        self.total_tokens.store(total_tokens, Ordering::SeqCst);
    }

    /// Overwrite the counters after a repopulation
    pub(crate) fn reset_after_repopulation(&self, total_tokens: usize) {
        self.restore(total_tokens, 0);
    }

    pub fn trigger_tokens(&self) -> usize {
        self.trigger_tokens
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> TokenState {
        TokenState {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            trigger_tokens: self.trigger_tokens,
            total_tokens: self.total_tokens(),
            accumulated_tool_tokens: self.accumulated_tool_tokens(),
        }
    }
}
