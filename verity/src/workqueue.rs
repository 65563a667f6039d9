//! Dedicated thread pool for verification work.
//!
//! Read completions that need verification are handed to this pool instead of
//! being verified on the completing thread. The pool runs nothing but
//! verification, so a blocked read never waits behind unrelated background work.
//!
//! The process-wide pool is created with [`init_workqueue`], used through
//! [`enqueue_verify_work`] and torn down with [`exit_workqueue`].

use lazy_static::lazy_static;
use log::debug;
use parking_lot::RwLock;
use threadpool::ThreadPool;

use crate::config::VerityConfig;
use crate::def::WORKQUEUE_NAME;
use crate::error::VerityError;

pub struct VerifyWorkqueue {
    pool: ThreadPool,
}

impl VerifyWorkqueue {
    pub fn new(threads: usize) -> Self {
        Self {
            pool: ThreadPool::with_name(WORKQUEUE_NAME.to_string(), usize::max(threads, 1)),
        }
    }

    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.execute(task);
    }

    pub fn threads(&self) -> usize {
        self.pool.max_count()
    }

    /// Number of tasks waiting for a thread.
    pub fn queued_count(&self) -> usize {
        self.pool.queued_count()
    }

    /// Waits until every queued task has run.
    pub fn join(&self) {
        self.pool.join();
    }
}

lazy_static! {
    static ref VERIFY_WORKQUEUE: RwLock<Option<VerifyWorkqueue>> = RwLock::new(None);
}

/// Creates the process-wide verification work queue.
pub fn init_workqueue(config: &VerityConfig) -> Result<(), VerityError> {
    let mut wq = VERIFY_WORKQUEUE.write();
    if wq.is_some() {
        return Err(VerityError::WorkqueueAlreadyInitialized);
    }
    *wq = Some(VerifyWorkqueue::new(config.workqueue_threads));
    debug!(
        "{} started with {} threads",
        WORKQUEUE_NAME, config.workqueue_threads
    );
    Ok(())
}

/// Hands verification work to the process-wide work queue.
pub fn enqueue_verify_work<F>(task: F) -> Result<(), VerityError>
where
    F: FnOnce() + Send + 'static,
{
    match VERIFY_WORKQUEUE.read().as_ref() {
        Some(wq) => {
            wq.execute(task);
            Ok(())
        }
        None => Err(VerityError::WorkqueueNotInitialized),
    }
}

pub fn workqueue_initialized() -> bool {
    VERIFY_WORKQUEUE.read().is_some()
}

/// Tears down the process-wide work queue after running every queued task.
///
/// Returns false if there was no queue.
pub fn exit_workqueue() -> bool {
    let wq = VERIFY_WORKQUEUE.write().take();
    match wq {
        Some(wq) => {
            wq.join();
            debug!("{} stopped", WORKQUEUE_NAME);
            true
        }
        None => false,
    }
}
