//! Backing memory for tiles.
//!
//! A [`BlobStore`] hands out fixed-size [`Blob`]s. The bytes of a blob are resident
//! while somebody holds one of its pages, and are kept compressed otherwise.

mod blob;

pub use blob::{Blob, BlobStore, ConstPage, Page, StoreStats};
