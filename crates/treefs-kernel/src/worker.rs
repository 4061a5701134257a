//! The persistence worker.
//!
//! A single dedicated thread owns the backend. Every backend call, mutation or
//! uncached read, is sent to it as a job and runs inside its own
//! `begin` … `commit`/`rollback`, so persistence side effects are strictly
//! ordered and no two jobs interleave inside a transaction.
//!
//! Callers block on a oneshot reply. The tree layer above never blocks
//! anywhere else.
//!
//! Must not be called from inside an async runtime: `transact` uses
//! `blocking_recv`.

use std::thread;

use tokio::sync::{mpsc, oneshot};

use crate::backend::{Backend, BackendResult};
use crate::error::{FsError, FsResult};

/// Type-erased job as it travels to the worker thread.
type Job = Box<dyn FnOnce(&mut dyn Backend) + Send + 'static>;

/// Handle to the worker thread. Dropping it drains queued jobs and joins.
pub struct Worker {
    tx: Option<mpsc::UnboundedSender<Job>>,
    handle: Option<thread::JoinHandle<()>>,
    backend_name: &'static str,
}

impl Worker {
    /// Move `backend` onto a new worker thread.
    pub fn spawn<B: Backend>(mut backend: B) -> FsResult<Self> {
        let backend_name = backend.name();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let handle = thread::Builder::new()
            .name("treefs-worker".into())
            .spawn(move || {
                tracing::debug!(backend = backend_name, "persistence worker started");
                while let Some(job) = rx.blocking_recv() {
                    job(&mut backend);
                }
                tracing::debug!(backend = backend_name, "persistence worker stopped");
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            backend_name,
        })
    }

    /// Run `job` inside one backend transaction on the worker thread.
    ///
    /// Commits when the job succeeds. When the job (or the commit) fails the
    /// transaction is rolled back and the error is returned as
    /// [`FsError::PersistenceFailed`] tagged with `op`.
    pub fn transact<R, F>(&self, op: &'static str, job: F) -> FsResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn Backend) -> BackendResult<R> + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(FsError::Closed)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        let envelope: Job = Box::new(move |backend: &mut dyn Backend| {
            let outcome = run_transaction(backend, op, job);
            // Caller may have given up; nothing else to do with the result.
            let _ = reply_tx.send(outcome);
        });

        tx.send(envelope).map_err(|_| FsError::Closed)?;
        reply_rx
            .blocking_recv()
            .map_err(|_| FsError::Closed)?
            .map_err(|source| FsError::persistence(op, source))
    }

    /// Stop accepting jobs, let queued ones finish, and join the thread.
    pub fn shutdown(&mut self) {
        if self.tx.take().is_none() {
            return;
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!(backend = self.backend_name, "persistence worker panicked");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("backend", &self.backend_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn run_transaction<R, F>(backend: &mut dyn Backend, op: &'static str, job: F) -> BackendResult<R>
where
    F: FnOnce(&mut dyn Backend) -> BackendResult<R>,
{
    backend.begin()?;

    let outcome = job(&mut *backend).and_then(|value| backend.commit().map(|()| value));
    match outcome {
        Ok(value) => {
            tracing::debug!(op, "committed");
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = backend.rollback() {
                tracing::error!(op, error = %rollback_err, "rollback failed");
            }
            tracing::debug!(op, error = %e, "rolled back");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendOp, MemoryBackend, Query, Record};
    use treefs_types::{VolumeId, VolumeRecord};

    fn volume() -> VolumeRecord {
        VolumeRecord {
            id: VolumeId::new(),
            label: "W".into(),
            cluster_size: 16,
            root_name: "root".into(),
        }
    }

    #[test]
    fn test_transact_commits() {
        let backend = MemoryBackend::new();
        let shared = backend.clone();
        let worker = Worker::spawn(backend).unwrap();
        let v = volume();

        let record = Record::Volume(v.clone());
        worker
            .transact("insert volume", move |b| b.insert(&record))
            .unwrap();

        assert_eq!(shared.volume(v.id), Some(v));
        assert!(!shared.in_transaction());
    }

    #[test]
    fn test_failed_job_rolls_back() {
        let backend = MemoryBackend::new();
        let shared = backend.clone();
        let worker = Worker::spawn(backend).unwrap();
        let v = volume();

        let record = Record::Volume(v.clone());
        let err = worker
            .transact("insert then fail", move |b| {
                b.insert(&record)?;
                Err::<(), _>(BackendError::conflict("forced"))
            })
            .unwrap_err();

        assert!(err.is_persistence_failure());
        assert!(shared.volume(v.id).is_none());
        assert!(!shared.in_transaction());
    }

    #[test]
    fn test_commit_failure_rolls_back() {
        let backend = MemoryBackend::new();
        let shared = backend.clone();
        shared.fail_next(BackendOp::Commit);
        let worker = Worker::spawn(backend).unwrap();
        let v = volume();

        let record = Record::Volume(v.clone());
        let err = worker
            .transact("insert volume", move |b| b.insert(&record))
            .unwrap_err();

        assert!(matches!(
            err,
            FsError::PersistenceFailed {
                source: BackendError::Injected(BackendOp::Commit),
                ..
            }
        ));
        assert!(shared.volume(v.id).is_none());
    }

    #[test]
    fn test_sequential_jobs_all_commit() {
        let worker = Worker::spawn(MemoryBackend::new()).unwrap();
        let mut ids: Vec<VolumeId> = (0..5)
            .map(|_| {
                let v = volume();
                let id = v.id;
                worker
                    .transact("insert volume", move |b| b.insert(&Record::Volume(v)))
                    .unwrap();
                id
            })
            .collect();

        let listed = worker
            .transact("list volumes", |b| b.select(&Query::Volumes))
            .unwrap();
        let mut listed: Vec<VolumeId> = listed
            .into_iter()
            .filter_map(Record::into_volume)
            .map(|v| v.id)
            .collect();
        listed.sort();
        ids.sort();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_closed_worker_rejects_jobs() {
        let mut worker = Worker::spawn(MemoryBackend::new()).unwrap();
        worker.shutdown();
        assert!(worker.is_closed());

        let err = worker
            .transact("list volumes", |b| b.select(&Query::Volumes))
            .unwrap_err();
        assert!(matches!(err, FsError::Closed));
    }
}
