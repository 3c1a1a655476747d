//! In-order work streams.
//!
//! A [`Stream`] is a queue serviced by one worker thread. Work enqueued on the same
//! stream runs in issue order; each enqueued item hands back a [`Pending`] whose
//! value may only be observed through [`Pending::wait`], the synchronisation point
//! for that one result. The control thread keeps preparing work while earlier items
//! run, which is how batch encoding and host→device transfers overlap with compute.
//!
//! There is no cancellation and no timeout: work either completes or the worker
//! dies, in which case every outstanding [`Pending`] reports a device error.

use crate::error::{Result, SeqConvError};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// An in-order queue of host-side work.
#[derive(Debug)]
pub struct Stream {
    name: String,
    tx: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Stream {
    /// Spawns the worker thread backing a new stream.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            })
            .map_err(|e| SeqConvError::Device(format!("failed to spawn stream `{name}`: {e}")))?;

        log::debug!("stream `{name}` started");
        Ok(Self {
            name,
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// The stream's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues `work`; it runs after everything enqueued before it.
    pub fn enqueue<F, R>(&self, work: F) -> Pending<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            // the receiver may already be gone if the caller dropped its Pending
            let _ = result_tx.send(work());
        });

        if let Some(tx) = &self.tx {
            if tx.send(job).is_err() {
                log::warn!("stream `{}` worker is gone; work dropped", self.name);
            }
        }

        Pending { rx: result_rx }
    }

    /// Blocks until everything enqueued so far has run.
    pub fn synchronize(&self) -> Result<()> {
        self.enqueue(|| ()).wait()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        // closing the sender lets the worker drain its queue and exit
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("stream `{}` worker panicked", self.name);
            }
        }
    }
}

/// The not-yet-observed result of work enqueued on a [`Stream`].
#[derive(Debug)]
pub struct Pending<R> {
    rx: Receiver<R>,
}

impl<R> Pending<R> {
    /// A pending value that is already complete.
    pub fn ready(value: R) -> Self {
        let (tx, rx): (SyncSender<R>, Receiver<R>) = mpsc::sync_channel(1);
        // capacity 1 and a live receiver: cannot fail
        let _ = tx.send(value);
        Self { rx }
    }

    /// Blocks until the work has run and returns its result.
    pub fn wait(self) -> Result<R> {
        self.rx.recv().map_err(|_| {
            SeqConvError::Device("stream worker terminated before completing enqueued work".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn work_runs_in_issue_order() {
        let stream = Stream::new("test-order").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pending: Vec<_> = (0..16)
            .map(|i| {
                let log = Arc::clone(&log);
                stream.enqueue(move || {
                    log.lock().unwrap().push(i);
                    i * 2
                })
            })
            .collect();

        // waiting out of order still observes each result
        let last = pending.into_iter().rev().map(|p| p.wait().unwrap()).next();
        assert_eq!(last, Some(30));
        stream.synchronize().unwrap();
        assert_eq!(*log.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_work_is_reported() {
        let stream = Stream::new("test-panic").unwrap();
        let pending = stream.enqueue(|| -> u32 { panic!("boom") });
        assert!(pending.wait().is_err());
    }

    #[test]
    fn ready_is_immediately_available() {
        assert_eq!(Pending::ready(5).wait().unwrap(), 5);
    }
}
