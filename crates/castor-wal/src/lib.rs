//! # castor-wal
//!
//! The write-ahead log for CastorDB.
//!
//! An append-only file of framed records. Every mutating tree operation
//! is logged before the mutation becomes visible; commit forces an fsync,
//! which is the durability boundary. Periodic checkpoints bound the log,
//! and replay after a crash re-applies the logical operations of
//! committed transactions through a [`ReplayHandler`](replay::ReplayHandler).
//!
//! Record framing (all integers little-endian):
//!
//! ```text
//! offset 0  : u8   type       (1=INSERT 2=DELETE 3=UPDATE 4=CHECKPOINT 5=COMMIT 6=ABORT)
//! offset 1  : u32  record_size (total bytes including this header)
//! offset 5  : u64  transaction_id
//! offset 13 : u64  lsn
//! offset 21 : u32  checksum   (CRC32 over the record with this field zeroed)
//! offset 25 : i64  timestamp_millis
//! offset 33 : payload         (empty for CHECKPOINT/COMMIT/ABORT)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod record;
pub mod replay;
pub mod wal;

pub use record::{DataPayload, RecordHeader, RecordType, WalRecord};
pub use replay::{ReplayHandler, ReplayStats};
pub use wal::{Wal, WalStatsSnapshot};
