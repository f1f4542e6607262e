//! Object storage module for shared JSON documents and file attachments.
//!
//! This module provides the `StorageBucket` handle for uploading and
//! downloading bucket objects: the weekly focus document, AAC card sets,
//! shared document blobs, and their signed-URL access for private reads.
//!
//! A missing object on download is an absent result, not an error; uploads
//! overwrite in place by default.

pub mod bucket;

pub use bucket::StorageBucket;
