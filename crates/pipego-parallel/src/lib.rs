//! pipego-parallel: bounded fan-out of independent work pieces.
//!
//! Splits `pieces` units of work into contiguous chunks and hands them to a
//! bounded set of workers that pull from a shared cursor. Workers stop
//! dequeuing as soon as the cancellation token fires; a piece already in
//! progress always runs to completion.
//!
//! ```text
//! parallelize_until(cancel, workers, pieces, work, options)
//!   ├── chunk_size  = options.chunk_size or chunk_size_for(pieces, workers)
//!   ├── chunks      = ceil(pieces / chunk_size)
//!   └── min(workers, chunks) workers
//!       └── loop: next chunk → for each piece: check cancel → work(piece)
//! ```

pub mod parallelizer;

pub use parallelizer::{Options, Parallelizer, ceil_div, chunk_size_for, parallelize_until};
