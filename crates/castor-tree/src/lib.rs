//! # castor-tree
//!
//! The B+-tree index over content-addressed pages.
//!
//! Generic over an ordered, serialisable key and a fixed-width value.
//! Every mutation is copy-on-write: the affected page is cloned, changed,
//! put back into the cache as a new dirty entry, and a snapshot is handed
//! to the writer pipeline. Splits are applied preemptively on the way
//! down, so an insert never backtracks; deletes rebalance proactively
//! (borrow from a sibling, else merge) so underflow never propagates
//! upward.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod tree;

pub use tree::{BTree, TreeStats};
