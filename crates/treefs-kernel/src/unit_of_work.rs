//! Three-phase mutation protocol.
//!
//! Every mutation of the tree runs as a unit of work:
//!
//! 1. `before` speculatively updates in-memory state (usually [`TxCell`]s),
//! 2. `act` builds the backend job from that state, which the worker runs
//!    inside one transaction,
//! 3. `on_fail` restores the in-memory state when the job failed.
//!
//! On success the caller commits its cells. On failure the undo has already
//! run, a warning is logged, and the error is returned to the caller.
//!
//! [`TxCell`]: crate::cell::TxCell

use crate::backend::{Backend, BackendResult, EntityRef, Query, Record};
use crate::error::FsResult;
use crate::worker::Worker;

/// One named mutation bound to the worker that will persist it.
#[derive(Debug, Clone, Copy)]
pub struct UnitOfWork<'w> {
    worker: &'w Worker,
    op: &'static str,
}

impl<'w> UnitOfWork<'w> {
    pub fn new(worker: &'w Worker, op: &'static str) -> Self {
        Self { worker, op }
    }

    /// Run the full protocol over `state`.
    pub fn execute<S, R, B, A, J, F>(self, state: &mut S, before: B, act: A, on_fail: F) -> FsResult<R>
    where
        B: FnOnce(&mut S),
        A: FnOnce(&S) -> J,
        J: FnOnce(&mut dyn Backend) -> BackendResult<R> + Send + 'static,
        F: FnOnce(&mut S),
        R: Send + 'static,
    {
        before(state);
        let job = act(state);
        match self.worker.transact(self.op, job) {
            Ok(value) => Ok(value),
            Err(e) => {
                on_fail(state);
                tracing::warn!(op = self.op, error = %e, "unit of work failed, in-memory state restored");
                Err(e)
            }
        }
    }

    /// Run a job with no speculative state to undo.
    pub fn run<R, J>(self, job: J) -> FsResult<R>
    where
        J: FnOnce(&mut dyn Backend) -> BackendResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.worker.transact(self.op, job).inspect_err(|e| {
            tracing::warn!(op = self.op, error = %e, "unit of work failed");
        })
    }
}

/// Ready-made backend jobs.
pub mod jobs {
    use super::*;

    pub fn insert(record: Record) -> impl FnOnce(&mut dyn Backend) -> BackendResult<()> + Send + 'static {
        move |backend| backend.insert(&record)
    }

    pub fn update(record: Record) -> impl FnOnce(&mut dyn Backend) -> BackendResult<()> + Send + 'static {
        move |backend| backend.update(&record)
    }

    pub fn delete(entity: EntityRef) -> impl FnOnce(&mut dyn Backend) -> BackendResult<()> + Send + 'static {
        move |backend| backend.delete(&entity)
    }

    pub fn select(query: Query) -> impl FnOnce(&mut dyn Backend) -> BackendResult<Vec<Record>> + Send + 'static {
        move |backend| backend.select(&query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOp, MemoryBackend};
    use crate::cell::TxCell;
    use treefs_types::{VolumeId, VolumeRecord};

    fn setup() -> (MemoryBackend, Worker, VolumeRecord) {
        let backend = MemoryBackend::new();
        let shared = backend.clone();
        let worker = Worker::spawn(backend).unwrap();
        let volume = VolumeRecord {
            id: VolumeId::new(),
            label: "before".into(),
            cluster_size: 8,
            root_name: "root".into(),
        };
        worker
            .transact("seed", jobs::insert(Record::Volume(volume.clone())))
            .unwrap();
        (shared, worker, volume)
    }

    #[test]
    fn test_success_keeps_speculative_state() {
        let (shared, worker, volume) = setup();
        let mut label = TxCell::new(volume.label.clone());

        UnitOfWork::new(&worker, "relabel")
            .execute(
                &mut label,
                |l| l.set("after".into()),
                |l| {
                    jobs::update(Record::Volume(VolumeRecord {
                        label: l.get().clone(),
                        ..volume.clone()
                    }))
                },
                |l| {
                    l.undo();
                },
            )
            .unwrap();
        label.commit();

        assert_eq!(label.get(), "after");
        assert_eq!(shared.volume(volume.id).unwrap().label, "after");
    }

    #[test]
    fn test_failure_runs_undo_and_surfaces() {
        let (shared, worker, volume) = setup();
        shared.fail_next(BackendOp::Update);
        let mut label = TxCell::new(volume.label.clone());

        let err = UnitOfWork::new(&worker, "relabel")
            .execute(
                &mut label,
                |l| l.set("after".into()),
                |l| {
                    jobs::update(Record::Volume(VolumeRecord {
                        label: l.get().clone(),
                        ..volume.clone()
                    }))
                },
                |l| {
                    l.undo();
                },
            )
            .unwrap_err();

        assert!(err.is_persistence_failure());
        assert_eq!(label.get(), "before");
        assert!(!label.is_pending());
        assert_eq!(shared.volume(volume.id).unwrap().label, "before");
    }
}
