//! Conversation items, token accounting and context compaction primitives

pub mod completion;
pub mod exchanges;
pub mod models;
pub mod token_tracker;
pub mod tokenizer;

pub use completion::{CompletionError, LlmCompletion, OpenAiCompletion};
pub use exchanges::collect_recent_exchanges;
pub use models::{Content, ContentPart, ConversationItem, Role, TokenState, ToolCallRequest};
pub use token_tracker::TokenTracker;
pub use tokenizer::{TiktokenTokenizer, Tokenizer, WordTokenizer};
