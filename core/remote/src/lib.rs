//! Remote instance access for omnisync.
//!
//! This module provides a trait-based interface over the remote procedure
//! interface of a business-management instance, plus two implementations:
//! a JSON-RPC transport for real servers and an in-memory instance used by
//! tests and dry runs.
//!
//! # Design Principles
//! - One generic `call(model, method, args, kwargs)` seam; typed helpers live
//!   in [`RemoteModels`] on top of it
//! - Authentication happens once per connect, never cached across runs
//! - Transport timeouts are enforced by the HTTP client at connection level

pub mod domain;
pub mod jsonrpc;
pub mod memory;
pub mod session;

pub use domain::Domain;
pub use jsonrpc::{JsonRpcConnector, JsonRpcSession};
pub use memory::{MemoryRemote, RecordedCall};
pub use session::{Connector, Page, RemoteModels, RemoteSession};
