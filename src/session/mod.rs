//! Session engine: dual-layer persistence, summarization and lifecycle
//!
//! A turn-processing caller writes through [`Session::add_items`] and, after
//! each turn, asks [`Session::should_summarize`] / [`Session::summarize`].
//! [`SessionManager`] owns the metadata table, per-session workspaces and the
//! registry of open session handles.

pub mod conversation;
pub mod manager;
pub mod metadata;
pub mod orchestrator;
pub mod persistence;
pub mod progress;
pub mod registry;
pub mod repopulator;
pub mod title;
pub mod workspace;

pub use conversation::{Session, SessionParts};
pub use manager::SessionManager;
pub use metadata::{SessionMetadata, SessionSettings, DEFAULT_TITLE};
pub use orchestrator::{SummarizationOrchestrator, SUMMARIZE_EVENT_NAME};
pub use persistence::{ConsistencyReport, PersistenceCoordinator, SkipHistoryGuard};
pub use progress::{ChannelProgressSink, NoopProgressSink, ProgressEvent, ProgressKind, ProgressSink};
pub use registry::SessionRegistry;
pub use repopulator::{RepopulationReport, SessionRepopulator, SUMMARY_PREFIX};
pub use title::{sanitize_title, truncate_title};
pub use workspace::Workspace;
