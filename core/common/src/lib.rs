//! Common utilities and types shared across the omnisync crates.
//!
//! This module provides the error taxonomy, identifiers and endpoint types
//! that every layer of the synchronization engine agrees on.

pub mod endpoint;
pub mod error;
pub mod types;

pub use endpoint::{Endpoint, Secret};
pub use error::{Error, FailureScope, Result};
pub use types::{EntityKind, ExecutionMode, RecordId, RemoteId};
