//! # castor-writer
//!
//! The asynchronous writer pipeline: a bounded FIFO of page snapshots
//! drained by a small worker pool. Workers persist snapshots into the
//! content store in batches and clear the cache dirty bit on success.
//!
//! `enqueue` never blocks: at capacity it refuses the request
//! (backpressure) and the page simply stays dirty in the cache, to be
//! persisted by a later eviction or checkpoint.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod queue;

pub use queue::{WriteRequest, WriterQueue, WriterStats, WriterStatsSnapshot};
