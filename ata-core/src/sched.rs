//! Ordered parallel map with a bounded window.
//!
//! Tasks are pulled lazily on the calling thread, processed on a rayon pool
//! and handed to the sink strictly in input order. Results that finish early
//! wait in a fixed ring of `workers + queue_depth` slots indexed by
//! `seq % window`; the producer is not pulled while the ring is full.

use crate::error::{AtaError, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub const DEFAULT_QUEUE_DEPTH: usize = 2;

/// Cooperative cancellation flag shared between a caller and a running job.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Scheduler {
    workers: usize,
    queue_depth: usize,
    pool: Option<rayon::ThreadPool>,
}

impl Scheduler {
    pub fn new(workers: usize, queue_depth: usize) -> Result<Self> {
        if workers == 0 {
            return Err(AtaError::InvalidOption("worker count must be at least 1".into()));
        }
        let pool = if workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("ata-worker-{i}"))
                    .build()
                    .map_err(|e| AtaError::InvalidState(format!("thread pool: {e}")))?,
            )
        } else {
            None
        };
        Ok(Self {
            workers,
            queue_depth,
            pool,
        })
    }

    pub fn default_workers() -> usize {
        num_cpus::get().max(1)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Maximum number of tasks dispatched but not yet handed to the sink.
    pub fn window(&self) -> usize {
        self.workers + self.queue_depth
    }

    /// Run `work` over `tasks`, feeding results to `sink` in input order.
    /// Returns the number of results delivered.
    ///
    /// A producer error or cancellation stops dispatch; tasks already in
    /// flight still finish and reach the sink before the error is returned.
    /// A sink error or a worker panic also stops delivery: in-flight tasks
    /// are drained and their results dropped.
    pub fn run<I, T, R, F, S>(
        &self,
        tasks: I,
        work: F,
        sink: S,
        cancel: &CancelToken,
    ) -> Result<u64>
    where
        I: IntoIterator<Item = Result<T>>,
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
        S: FnMut(R) -> Result<()>,
    {
        match &self.pool {
            None => run_inline(tasks, work, sink, cancel),
            Some(pool) => self.run_pooled(pool, tasks, work, sink, cancel),
        }
    }

    fn run_pooled<I, T, R, F, S>(
        &self,
        pool: &rayon::ThreadPool,
        tasks: I,
        work: F,
        mut sink: S,
        cancel: &CancelToken,
    ) -> Result<u64>
    where
        I: IntoIterator<Item = Result<T>>,
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
        S: FnMut(R) -> Result<()>,
    {
        let window = self.window();
        let mut slots: Vec<Option<R>> = (0..window).map(|_| None).collect();
        let (tx, rx) = crossbeam_channel::bounded::<(u64, std::thread::Result<R>)>(window);
        let mut tasks = tasks.into_iter();
        let work = &work;

        let mut next_seq = 0u64; // next to dispatch
        let mut base = 0u64; // next to deliver
        let mut outstanding = 0usize; // dispatched, result not yet received
        let mut exhausted = false;
        // `stop` ends dispatch but dispatched results are still delivered;
        // `failure` ends delivery as well.
        let mut stop: Option<AtaError> = None;
        let mut failure: Option<AtaError> = None;

        pool.in_place_scope(|scope| {
            loop {
                while failure.is_none() && stop.is_none() && !exhausted {
                    if next_seq - base >= window as u64 {
                        break;
                    }
                    if cancel.is_cancelled() {
                        stop = Some(AtaError::Cancelled);
                        break;
                    }
                    match tasks.next() {
                        None => exhausted = true,
                        Some(Err(e)) => stop = Some(e),
                        Some(Ok(task)) => {
                            let seq = next_seq;
                            next_seq += 1;
                            outstanding += 1;
                            let tx = tx.clone();
                            scope.spawn(move |_| {
                                let r = panic::catch_unwind(AssertUnwindSafe(|| work(task)));
                                // The receiver outlives the scope; a send cannot fail.
                                let _ = tx.send((seq, r));
                            });
                        }
                    }
                }

                while failure.is_none() {
                    let Some(r) = slots[(base % window as u64) as usize].take() else {
                        break;
                    };
                    base += 1;
                    if let Err(e) = sink(r) {
                        failure = Some(e);
                    }
                }

                if outstanding == 0 {
                    if failure.is_some() || stop.is_some() || exhausted {
                        break;
                    }
                    continue;
                }

                if stop.is_none() && cancel.is_cancelled() {
                    stop = Some(AtaError::Cancelled);
                }
                let Ok((seq, r)) = rx.recv() else {
                    failure.get_or_insert(AtaError::InvalidState("worker channel closed".into()));
                    break;
                };
                outstanding -= 1;
                match r {
                    Ok(v) => slots[(seq % window as u64) as usize] = Some(v),
                    Err(_) => {
                        failure.get_or_insert(AtaError::WorkerPanicked { seq });
                    }
                }
            }
        });

        match failure.or(stop) {
            Some(e) => {
                debug!(delivered = base, dispatched = next_seq, error = %e, "scheduler stopped");
                Err(e)
            }
            None => Ok(base),
        }
    }
}

fn run_inline<I, T, R, F, S>(tasks: I, work: F, mut sink: S, cancel: &CancelToken) -> Result<u64>
where
    I: IntoIterator<Item = Result<T>>,
    F: Fn(T) -> R,
    S: FnMut(R) -> Result<()>,
{
    let mut seq = 0u64;
    for task in tasks {
        if cancel.is_cancelled() {
            return Err(AtaError::Cancelled);
        }
        let task = task?;
        let r = panic::catch_unwind(AssertUnwindSafe(|| work(task)))
            .map_err(|_| AtaError::WorkerPanicked { seq })?;
        sink(r)?;
        seq += 1;
    }
    Ok(seq)
}
