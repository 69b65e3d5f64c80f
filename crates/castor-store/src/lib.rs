//! # castor-store
//!
//! Pages and the content-addressed store (CAS) for CastorDB.
//!
//! A [`Page`](page::Page) is the unit of B+-tree node storage. Every page
//! has a canonical byte image; the SHA-256 hash of that image is its
//! content address. The [`ContentStore`](cas::ContentStore) maps content
//! hashes to immutable blobs and logical page IDs to content hashes, so
//! logically distinct pages with identical content share one blob.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cas;
pub mod page;

pub use cas::{ContentStore, StoreStats};
pub use page::{Page, PageFlags, PageHeader};
