//! Single fixed delivery context for completion callbacks.
//!
//! Callbacks run one at a time, in submission order, on a dedicated thread, so
//! callers never need their own synchronization.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
}

impl Dispatcher {
    /// Start the dispatch thread. It exits once every clone of the dispatcher is dropped.
    ///
    /// # Errors
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();

        thread::Builder::new().name(name.to_string()).spawn(move || {
            for job in rx {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("Location callback panicked");
                }
            }
            tracing::debug!("Dispatch thread exiting");
        })?;

        Ok(Self { tx })
    }

    /// Queue a job for the dispatch thread.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            tracing::warn!("Dispatch thread is gone; dropping callback");
        }
    }
}
