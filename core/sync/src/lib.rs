//! omnisync synchronization engine.
//!
//! This module provides the cross-instance reconciliation engine:
//! - Field capability negotiation before every create/update payload
//! - Ordered-key reconciliation against remote records
//! - Entity syncers for products, images, price lists, sale orders and
//!   purchase orders
//! - A per-configuration orchestrator with explicit failure containment
//! - A run recorder and a scheduler for periodic runs

pub mod capability;
pub mod notification;
pub mod orchestrator;
pub mod reconciler;
pub mod recorder;
pub mod scheduler;
pub mod syncers;

// Re-export main types
pub use capability::{allowed_fields, Capabilities, PayloadBuilder};
pub use notification::{Notification, Severity};
pub use orchestrator::{ConfigurationReport, KindOutcome, KindReport, Orchestrator};
pub use reconciler::{MatchKeys, Reconciler, Resolution};
pub use recorder::RunRecorder;
pub use scheduler::{RunRequest, RunSummary, ScheduleMode, Scheduler, SchedulerHandle};
pub use syncers::SyncContext;
