//! Indexer jobs and the external scheduler contract.

use crate::model::{IndexFlags, Source};
use std::sync::Arc;

/// One unit of indexing work handed to the external scheduler. Jobs are
/// compared by identity (`Arc::ptr_eq`): a completion for a replaced
/// instance is stale even though it carries the same key.
#[derive(Debug)]
pub struct IndexerJob {
    pub source: Source,
    pub flags: u32,
}

impl IndexerJob {
    /// A job admitted from a compile command.
    pub fn compile(source: Source) -> Arc<Self> {
        Arc::new(Self {
            source,
            flags: IndexFlags::COMPILE,
        })
    }

    /// A job scheduled by dirty detection.
    pub fn dirty(source: Source) -> Arc<Self> {
        Arc::new(Self {
            source,
            flags: IndexFlags::DIRTY,
        })
    }

    pub fn key(&self) -> u64 {
        self.source.key()
    }

    pub fn is_compile(&self) -> bool {
        self.flags & IndexFlags::COMPILE != 0
    }

    pub fn is_dirty_job(&self) -> bool {
        self.flags & IndexFlags::DIRTY != 0
    }
}

/// The external scheduler the core hands jobs to.
///
/// `abort` must be idempotent and must not call back into
/// `Project::on_job_finished` for the aborted job; the core treats an abort
/// as fire-and-forget.
pub trait JobScheduler: Send + Sync {
    fn add(&self, job: &Arc<IndexerJob>);
    fn abort(&self, job: &Arc<IndexerJob>);
}

/// Scheduler that drops every job; handy for purely query-side use of a
/// loaded project.
pub struct NullScheduler;

impl JobScheduler for NullScheduler {
    fn add(&self, _job: &Arc<IndexerJob>) {}
    fn abort(&self, _job: &Arc<IndexerJob>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_flags() {
        let source = Source::new(1, 0, vec!["-c".into()]);
        let compile = IndexerJob::compile(source.clone());
        assert!(compile.is_compile());
        assert!(!compile.is_dirty_job());

        let dirty = IndexerJob::dirty(source);
        assert!(dirty.is_dirty_job());
        assert_eq!(dirty.key(), compile.key());
    }

    #[test]
    fn test_identity_distinguishes_instances() {
        let source = Source::new(1, 0, vec!["-c".into()]);
        let a = IndexerJob::compile(source.clone());
        let b = IndexerJob::compile(source);
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &a.clone()));
    }
}
