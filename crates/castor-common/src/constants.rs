//! System-wide constants.

/// Size of the WAL record header in bytes.
///
/// Layout: type (1) + record_size (4) + transaction_id (8) + lsn (8) +
/// checksum (4) + timestamp_millis (8).
pub const WAL_RECORD_HEADER_SIZE: usize = 33;

/// Size of the serialised page header in bytes.
///
/// Layout: page_id (2) + flags (1) + checksum (32) + content_hash (32).
pub const PAGE_HEADER_SIZE: usize = 67;

/// Default WAL file name inside the data directory.
pub const WAL_FILE_NAME: &str = "btree.wal";

/// Default metadata file name inside the data directory.
pub const META_FILE_NAME: &str = "castor.meta";

/// Default maximum keys per B+-tree node.
pub const DEFAULT_MAX_KEYS_PER_NODE: usize = 64;

/// Default page cache capacity (pages).
pub const DEFAULT_MAX_CACHE_SIZE: usize = 100;

/// Default writer queue capacity (requests).
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Default number of writer worker threads.
pub const DEFAULT_WRITER_WORKERS: usize = 2;

/// Default maximum writer batch size (requests).
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Default number of job scheduler worker threads.
pub const DEFAULT_SCHEDULER_WORKERS: usize = 4;

/// Default WAL append buffer capacity in bytes.
pub const DEFAULT_WAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Default WAL size threshold that triggers a checkpoint (bytes).
pub const DEFAULT_WAL_SIZE_THRESHOLD: u64 = 1024 * 1024;

/// Default dirty page count that triggers a checkpoint.
pub const DEFAULT_DIRTY_PAGE_THRESHOLD: usize = 100;
