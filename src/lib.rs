//! Client library for the STAR caregiving app backend.
//!
//! The backend is a Supabase-style hosted service: REST-over-tables at
//! `/rest/v1`, object storage at `/storage/v1`, and GoTrue-compatible auth
//! at `/auth/v1`. This crate owns the client-side contract for talking to
//! it:
//!
//! - `auth`: session persistence, payload normalization, and lazy token
//!   refresh before authenticated calls
//! - `api`: the authenticated request gateway and a chainable query builder
//!   for common CRUD shapes
//! - `storage`: JSON/binary object upload, download, and signed URLs
//!
//! All page-level concerns (rendering, caching, retries) live with callers;
//! the client performs exactly one network round trip per resolved
//! operation.

pub mod api;
pub mod auth;
pub mod config;
pub mod storage;

#[cfg(test)]
mod testsupport;

pub use api::{ApiError, Client, FilterValue, Query, NO_ROWS_CODE};
pub use auth::{
    AuthOutcome, FileSessionStore, MemorySessionStore, RefreshError, Session, SessionProvider,
    SessionStore, StoreError, UserIdentity,
};
pub use config::{Config, DemoIdentity};
pub use storage::StorageBucket;
