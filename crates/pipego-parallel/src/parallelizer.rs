//! Chunked parallel work distribution.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use pipego_core::DEFAULT_PARALLELISM;

/// Tuning knobs for [`parallelize_until`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    chunk_size: Option<usize>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand pieces to workers in chunks of `chunk_size` instead of the
    /// computed default. Worth it when there are far more pieces than
    /// workers and each piece is cheap.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }
}

/// Run `work` once for every index in `0..pieces` across at most `workers`
/// concurrent workers, until done or `cancel` fires.
///
/// `work` cannot fail: it records its own outcome in a caller-owned sink
/// indexed by piece. On cancellation each worker finishes the piece it is
/// running and exits without touching the rest of its chunk. Returns once
/// every worker has exited.
pub async fn parallelize_until<F, Fut>(
    cancel: &CancellationToken,
    workers: usize,
    pieces: usize,
    work: F,
    options: Options,
) where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = ()>,
{
    if pieces == 0 {
        return;
    }

    let workers = workers.max(1);
    let chunk_size = options
        .chunk_size
        .unwrap_or_else(|| chunk_size_for(pieces, workers))
        .max(1);
    let chunks = ceil_div(pieces, chunk_size);
    let workers = workers.min(chunks);

    trace!(pieces, chunk_size, chunks, workers, "distributing work");

    let cursor = AtomicUsize::new(0);
    let cursor = &cursor;
    let work = &work;

    let handles = (0..workers).map(move |_| async move {
        loop {
            let chunk = cursor.fetch_add(1, Ordering::Relaxed);
            if chunk >= chunks {
                return;
            }

            let start = chunk * chunk_size;
            let end = (start + chunk_size).min(pieces);

            for piece in start..end {
                if cancel.is_cancelled() {
                    return;
                }
                work(piece).await;
            }
        }
    });

    join_all(handles).await;
}

/// Chunk size aiming for good utilization:
/// `max(1, min(sqrt(pieces), pieces / parallelism + 1))`.
pub fn chunk_size_for(pieces: usize, parallelism: usize) -> usize {
    let root = pieces.isqrt();
    let per_worker = pieces / parallelism.max(1) + 1;
    root.min(per_worker).max(1)
}

pub fn ceil_div(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

/// Work distributor carrying the configured parallelism.
#[derive(Debug)]
pub struct Parallelizer {
    parallelism: AtomicUsize,
}

impl Parallelizer {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: AtomicUsize::new(parallelism.max(1)),
        }
    }

    /// Set the worker count used by [`Parallelizer::until`]. Zero means one.
    pub fn init(&self, parallelism: usize) {
        self.parallelism.store(parallelism.max(1), Ordering::Relaxed);
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism.load(Ordering::Relaxed)
    }

    /// [`parallelize_until`] with the configured parallelism and a chunk size
    /// from [`chunk_size_for`].
    pub async fn until<F, Fut>(&self, cancel: &CancellationToken, pieces: usize, work: F)
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = ()>,
    {
        let workers = self.parallelism();
        let options = Options::new().with_chunk_size(chunk_size_for(pieces, workers));
        parallelize_until(cancel, workers, pieces, work, options).await;
    }
}

impl Default for Parallelizer {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLELISM)
    }
}
