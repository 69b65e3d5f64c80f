//! # castor-common
//!
//! Common types, errors, and utilities for CastorDB.
//!
//! This crate provides the foundational types and abstractions used across
//! all CastorDB components:
//!
//! - **Types**: Core identifiers (`PageId`, `TxnId`, `Lsn`, `JobId`)
//! - **Hash**: SHA-256 content hashing used for content addressing
//! - **Codec**: Key and value serialisation traits for the B+-tree
//! - **Errors**: Unified error handling with `CastorError`
//! - **Config**: Engine configuration structures
//!
//! ## Example
//!
//! ```rust
//! use castor_common::types::{PageId, TxnId};
//! use castor_common::hash::sha256;
//!
//! let page_id = PageId::new(42);
//! let txn_id = TxnId::new(1);
//! let digest = sha256(b"hello");
//! assert_eq!(digest.to_hex().len(), 64);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod hash;
pub mod types;

// Re-export commonly used items at the crate root
pub use codec::{FixedBytes, KeyCodec, ValueCodec};
pub use error::{CastorError, CastorResult, ErrorCode};
pub use hash::ContentHash;
pub use types::{JobId, Lsn, PageId, TxnId};
