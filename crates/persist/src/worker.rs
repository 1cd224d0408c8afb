//! Background I/O thread.
//!
//! Jobs run in submission order on one dedicated thread; each job's result
//! comes back on its own single-slot channel, so the caller can await it
//! without blocking the frame loop.

use std::thread::{self, JoinHandle};

use async_channel::{Receiver, Sender};

type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct IoWorker {
    jobs: Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl IoWorker {
    pub(crate) fn spawn(name: &str) -> std::io::Result<Self> {
        let (jobs, queue) = async_channel::unbounded::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(queue))?;
        Ok(Self {
            jobs,
            handle: Some(handle),
        })
    }

    /// Queue `job` and return the channel its result arrives on.
    ///
    /// If the worker has stopped the returned channel is already closed.
    pub(crate) fn submit<T, F>(&self, job: F) -> Receiver<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply, result) = async_channel::bounded(1);
        let job: Job = Box::new(move || {
            // The requester may have given up; nothing to do then.
            let _ = reply.send_blocking(job());
        });
        if self.jobs.send_blocking(job).is_err() {
            tracing::warn!("I/O worker is gone, dropping request");
        }
        result
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        self.jobs.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("I/O worker panicked");
            }
        }
    }
}

fn worker_loop(queue: Receiver<Job>) {
    while let Ok(job) = queue.recv_blocking() {
        job();
    }
    tracing::debug!("I/O worker stopped");
}
