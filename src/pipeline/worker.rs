//! The dedicated background offload worker.
//!
//! Expensive pipeline work - member-table scans and batched recompilation
//! submissions - must never run on a runtime callback thread that forbids
//! blocking. One [`OffloadWorker`] per engine drains a FIFO queue of boxed
//! closures on its own thread: enqueue never blocks, dequeue blocks until an
//! item or the termination sentinel arrives, at which point the thread exits.

use std::sync::Mutex;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;

use crate::{Error, Result};

enum Job {
    Task(Box<dyn FnOnce() + Send + 'static>),
    Shutdown,
}

/// Handle to the single background worker thread.
pub struct OffloadWorker {
    tx: Sender<Job>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OffloadWorker {
    /// Spawn the worker thread.
    ///
    /// # Errors
    /// Returns [`crate::Error::IoError`] if the thread cannot be spawned.
    pub fn start() -> Result<OffloadWorker> {
        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("cilweave-offload".to_string())
            .spawn(move || Self::drain(&rx))?;

        Ok(OffloadWorker {
            tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn drain(rx: &Receiver<Job>) {
        debug!("offload worker running");
        while let Ok(job) = rx.recv() {
            match job {
                Job::Task(task) => task(),
                Job::Shutdown => break,
            }
        }
        debug!("offload worker exiting");
    }

    /// Enqueue a closure for execution on the worker thread.
    ///
    /// Never blocks; the queue is unbounded.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if the worker has already shut down.
    pub fn enqueue<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Job::Task(Box::new(task)))
            .map_err(|_| Error::Error("offload worker has shut down".to_string()))
    }

    /// Send the termination sentinel and join the worker thread.
    ///
    /// Queued work that precedes the sentinel still runs. Safe to call more
    /// than once.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for OffloadWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_jobs_in_order() {
        let worker = OffloadWorker::start().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let seen = Arc::clone(&seen);
            worker.enqueue(move || seen.lock().unwrap().push(i)).unwrap();
        }
        worker.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_new_work() {
        let worker = OffloadWorker::start().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let counter = Arc::clone(&counter);
            worker
                .enqueue(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        worker.shutdown();
        worker.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(worker.enqueue(|| {}).is_err());
    }
}
