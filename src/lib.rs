//! symdex: a project symbol-indexing core.
//!
//! The crate maintains a cross-referenced symbol graph for one project on
//! disk (definitions, references, targets, per-file include dependencies)
//! and keeps it consistent as source files change. Parsing is delegated to
//! an external indexer: the core submits [`IndexerJob`]s to a
//! [`JobScheduler`], receives per-translation-unit [`IndexData`] deltas
//! back, batches them, and folds them into ordered persistent tables during
//! a sync. A filesystem watcher plus a family of dirty detectors decide
//! which translation units to re-index when files change underneath the
//! index.
//!
//! The [`Project`] orchestrator is single-threaded; drive it either
//! directly (calling its event methods from your own loop) or through the
//! provided [`EventLoop`].

pub mod config;
pub mod dirty;
pub mod matcher;
pub mod model;
pub mod project;
pub mod registry;
pub mod tables;
pub mod telemetry;
pub mod utils;

pub use config::Config;
pub use dirty::Dirty;
pub use matcher::PathMatch;
pub use model::{
    Diagnostic, FileId, FixIt, IndexData, IndexFlags, Location, PendingReference, Severity,
    Source, SourceFlags, SymbolInfo, SymbolKind, NULL_FILE_ID,
};
pub use project::{
    match_symbol_name, DependencyMode, EventLoop, IndexerJob, JobScheduler, NameFlavor,
    NullScheduler, Project, ProjectEvent, ProjectHandle, ProjectStats, ReindexMode, SortFlag,
    SortedCursor, State, SyncMode, SyncOutcome, VisitTracker,
};
pub use registry::FileRegistry;

/// Version stamped into every persisted artifact (tables, registry, the
/// visited-files blob); a mismatch on load is treated as absent or invalid
/// data depending on the artifact.
pub const DATABASE_VERSION: u32 = 3;
