//! Selection of the most recent complete user/assistant exchanges
//!
//! The scan runs backward, pairing the most recent unmatched assistant
//! message with the nearest user message before it. Tool traffic and system
//! messages never open or close an exchange.

use super::models::{ConversationItem, Role};
use tracing::debug;

/// Return the last `keep_recent` exchanges from `items`, in chronological order
///
/// An assistant message left without a preceding user message is kept on its
/// own when fewer than `keep_recent` exchanges were found.
pub fn collect_recent_exchanges(items: &[ConversationItem], keep_recent: usize) -> Vec<ConversationItem> {
    if items.is_empty() || keep_recent == 0 {
        return Vec::new();
    }

    let mut selected: Vec<usize> = Vec::with_capacity(keep_recent * 2 + 1);
    let mut pending_assistant: Option<usize> = None;
    let mut exchanges = 0usize;

    for (idx, item) in items.iter().enumerate().rev() {
        match item.exchange_role() {
            Some(Role::Assistant) => {
                // Keep the latest reply; earlier partial replies in the same
                // exchange are dropped.
                if pending_assistant.is_none() {
                    pending_assistant = Some(idx);
                }
            }
            Some(Role::User) => {
                if let Some(assistant_idx) = pending_assistant.take() {
                    selected.push(assistant_idx);
                    selected.push(idx);
                    exchanges += 1;
                    if exchanges >= keep_recent {
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    if exchanges < keep_recent {
        if let Some(assistant_idx) = pending_assistant {
            debug!("Keeping unmatched assistant message at index {}", assistant_idx);
            selected.push(assistant_idx);
        }
    }

    selected.sort_unstable();

    let recent: Vec<ConversationItem> = selected
        .into_iter()
        .map(|idx| &items[idx])
        .filter(|item| matches!(item.role(), Role::User | Role::Assistant))
        .cloned()
        .collect();

    debug!(
        "Collected {} exchanges ({} items) from {} items",
        exchanges,
        recent.len(),
        items.len()
    );

    recent
}
