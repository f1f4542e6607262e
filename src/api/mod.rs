//! REST gateway module for the hosted backend.
//!
//! This module provides the `Client` for authenticated calls against the
//! tabular REST endpoint and the auth service, plus the chainable `Query`
//! builder for common CRUD shapes.
//!
//! Requests carry the static API key and, when a session exists, a bearer
//! token renewed lazily by the session provider.

pub mod client;
pub mod error;
pub mod query;

pub use client::Client;
pub use error::{ApiError, NO_ROWS_CODE};
pub use query::{FilterValue, Query};
