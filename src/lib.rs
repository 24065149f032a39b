//! Token-aware, dual-layer conversation session engine
//!
//! Keeps a long-running conversation's working context bounded and durable:
//! exact per-item token accounting, writes mirrored to a full-history store
//! with rollback on failure, and locked summarization that compacts the
//! working context down to a summary plus the most recent exchanges.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod session;
pub mod storage;

pub use config::Config;
pub use context::{ConversationItem, Role, TokenTracker};
pub use error::{Result, SessionError};
pub use session::{Session, SessionManager, SessionMetadata};
