//! The in-flight computation token installed by `compute_if_absent`.

use std::{
    sync::{Condvar, Mutex},
    thread::{self, ThreadId},
};

use crate::{Error, Result};

enum Progress<V> {
    /// The compute function is running on this thread
    Running(ThreadId),
    Done(V),
    Failed,
}

/// A guarded placeholder for a value being computed.
///
/// Only the thread that installed the token runs the compute function; every other reader
/// blocks in [`Computation::wait`] until the token settles. The token remembers the thread it
/// runs on so that a re-entrant read from that same thread fails instead of waiting on itself.
pub(crate) struct Computation<V> {
    progress: Mutex<Progress<V>>,
    settled: Condvar,
}

impl<V: Clone> Computation<V> {
    /// A token owned by the calling thread.
    pub(crate) fn started() -> Self {
        Computation {
            progress: Mutex::new(Progress::Running(thread::current().id())),
            settled: Condvar::new(),
        }
    }

    /// Settle the token and wake every waiter. `None` marks a failed computation.
    pub(crate) fn complete(&self, outcome: Option<V>) {
        let mut progress = lock!(self.progress);
        *progress = match outcome {
            Some(value) => Progress::Done(value),
            None => Progress::Failed,
        };
        self.settled.notify_all();
    }

    /// Wait for the token to settle.
    ///
    /// Returns the computed value, or `None` if the computation failed.
    ///
    /// # Errors
    /// Returns [`Error::RecursiveInvocation`] when called from the thread that is running the
    /// computation.
    pub(crate) fn wait(&self) -> Result<Option<V>> {
        let me = thread::current().id();
        let mut progress = lock!(self.progress);
        loop {
            match &*progress {
                Progress::Done(value) => return Ok(Some(value.clone())),
                Progress::Failed => return Ok(None),
                Progress::Running(owner) if *owner == me => return Err(Error::RecursiveInvocation),
                Progress::Running(_) => {
                    progress = self
                        .settled
                        .wait(progress)
                        .expect("Failed to wait for computation");
                }
            }
        }
    }
}
