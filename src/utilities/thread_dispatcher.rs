use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Provides multithreading dispatch primitives and a thread count for the evolution to use.
///
/// The evolution does not require a true load balancing for loop implementation. All that's needed
/// is a way to jumpstart some threads; island solving does its own job stealing on top of that.
pub trait IThreadDispatcher: Send + Sync {
    /// Gets the number of workers available in the thread dispatcher.
    fn thread_count(&self) -> usize;

    /// Dispatches up to `maximum_worker_count` workers, invoking `worker_body` with each worker's index.
    /// Returns once every dispatched worker has returned.
    fn dispatch_workers(&self, worker_body: &(dyn Fn(usize) + Sync), maximum_worker_count: usize);
}

/// Runs every worker inline on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineDispatcher;

impl IThreadDispatcher for InlineDispatcher {
    fn thread_count(&self) -> usize {
        1
    }

    fn dispatch_workers(&self, worker_body: &(dyn Fn(usize) + Sync), _maximum_worker_count: usize) {
        worker_body(0);
    }
}

/// Dispatcher that spawns scoped worker threads for every dispatch.
#[derive(Clone, Debug)]
pub struct ThreadDispatcher {
    thread_count: usize,
}

impl ThreadDispatcher {
    /// Creates a new thread dispatcher with the given number of workers. Zero is promoted to one.
    pub fn new(thread_count: usize) -> Self {
        Self {
            thread_count: thread_count.max(1),
        }
    }

    /// Creates a dispatcher with one worker per available hardware thread.
    pub fn with_available_parallelism() -> Self {
        let count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(count)
    }
}

impl IThreadDispatcher for ThreadDispatcher {
    fn thread_count(&self) -> usize {
        self.thread_count
    }

    fn dispatch_workers(&self, worker_body: &(dyn Fn(usize) + Sync), maximum_worker_count: usize) {
        let worker_count = self.thread_count.min(maximum_worker_count).max(1);
        if worker_count == 1 {
            worker_body(0);
            return;
        }
        let result = crossbeam_utils::thread::scope(|scope| {
            for worker_index in 1..worker_count {
                scope.spawn(move |_| worker_body(worker_index));
            }
            // The calling thread is worker zero.
            worker_body(0);
        });
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }
}

/// Runs `job(worker_index, job_index)` for every job in `0..job_count`. Workers claim jobs through a
/// shared atomic counter, so the mapping of jobs to workers is not deterministic but every job runs
/// exactly once.
pub fn dispatch_jobs<F>(dispatcher: &dyn IThreadDispatcher, job_count: usize, job: F)
where
    F: Fn(usize, usize) + Sync,
{
    if job_count == 0 {
        return;
    }
    let next_job = CachePadded::new(AtomicUsize::new(0));
    let worker_body = |worker_index: usize| loop {
        let job_index = next_job.fetch_add(1, Ordering::Relaxed);
        if job_index >= job_count {
            break;
        }
        job(worker_index, job_index);
    };
    dispatcher.dispatch_workers(&worker_body, job_count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_job_runs_once() {
        let dispatcher = ThreadDispatcher::new(4);
        let hits: Vec<AtomicUsize> = (0..100).map(|_| AtomicUsize::new(0)).collect();
        dispatch_jobs(&dispatcher, hits.len(), |_, job| {
            hits[job].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn inline_dispatcher_uses_worker_zero() {
        let seen = AtomicUsize::new(usize::MAX);
        dispatch_jobs(&InlineDispatcher, 3, |worker, _| {
            seen.store(worker, Ordering::Relaxed);
        });
        assert_eq!(seen.load(Ordering::Relaxed), 0);
    }
}
