//! # castor-engine
//!
//! The CastorDB storage engine façade.
//!
//! [`Engine`] wires the content store, page cache, writer pipeline, WAL,
//! B+-tree, job scheduler, and checkpoint manager together. Every
//! mutating operation runs in its own transaction with the WAL written
//! before the mutation becomes visible; commit fsyncs, which is the
//! durability boundary. On open, the engine replays the log to rebuild
//! the tree (page blobs live in memory only, so recovery is a full
//! logical REDO of committed transactions).

#![warn(missing_docs)]
#![warn(clippy::all)]

mod checkpoint;
mod engine;
mod meta;
mod recovery;

pub use checkpoint::{CheckpointManager, CheckpointStats};
pub use engine::{Engine, EngineStats};
pub use meta::EngineMeta;

pub use castor_common::config::EngineConfig;
pub use castor_common::{CastorError, CastorResult, FixedBytes, KeyCodec, ValueCodec};
