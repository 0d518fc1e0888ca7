//! Local record store for omnisync.
//!
//! Holds the local side of every synchronization: products, price lists,
//! sale orders, customer invoices, the sync configurations themselves, the
//! run ledger and the per-configuration run lock.
//!
//! # Design Principles
//! - Records are JSON documents keyed by table and id, with an optional
//!   lookup key (product code, price list name)
//! - The [`Backend`] trait is the only persistence seam; [`Store`] adds types
//! - A run header leaves `InProgress` exactly once

pub mod backend;
pub mod config;
pub mod ledger;
pub mod models;
pub mod sqlite;
pub mod store;

pub use backend::{Backend, MemoryBackend};
pub use config::{is_all_brands, EntityFlags, SyncConfiguration, SyncStatistics, ALL_BRANDS};
pub use ledger::{Outcome, RunCounts, RunLine, RunStatus, RunSubject, SyncRun};
pub use models::{
    AppliedOn, Invoice, InvoiceKind, InvoiceLine, LineSyncStatus, OrderState, Partner, PriceList,
    PriceListItem, Product, PurchaseState, PurchaseSyncRecord, SaleOrder, SaleOrderLine,
    SummaryStatus, SyncMarkers, SyncSummary, TrackingDocument,
};
pub use sqlite::SqliteBackend;
pub use store::{Record, RunToken, SalesStats, Store};
