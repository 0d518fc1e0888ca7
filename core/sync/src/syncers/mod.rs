//! Entity syncers.
//!
//! Every syncer follows the same shape: resolve dependencies, resolve or
//! create the entity, resolve or create its lines, mark the engine-owned
//! attributes, record the outcome. Item-scoped failures become ledger lines;
//! wider failures are returned to the orchestrator.

pub mod image;
pub mod pricelist;
pub mod product;
pub mod purchase_order;
pub mod sale_order;

use omnisync_common::{Error, ExecutionMode, FailureScope, Result};
use omnisync_remote::RemoteModels;
use omnisync_store::{Store, SyncConfiguration};

use crate::reconciler::Reconciler;

/// Everything a syncer needs, passed explicitly down the call chain.
#[derive(Clone, Copy)]
pub struct SyncContext<'a> {
    pub store: &'a Store,
    pub remote: RemoteModels<'a>,
    pub config: &'a SyncConfiguration,
    pub mode: ExecutionMode,
}

impl<'a> SyncContext<'a> {
    pub fn new(
        store: &'a Store,
        remote: RemoteModels<'a>,
        config: &'a SyncConfiguration,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            store,
            remote,
            config,
            mode,
        }
    }

    pub fn reconciler(&self) -> Reconciler<'a> {
        Reconciler::new(self.remote)
    }

    /// Database name of the remote session.
    pub fn database(&self) -> &'a str {
        self.remote.session().database()
    }
}

/// Keep item-scoped errors for the ledger and propagate the rest.
pub(crate) fn contain_item<T>(result: Result<T>) -> Result<std::result::Result<T, Error>> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(err) if err.scope() == FailureScope::Item => Ok(Err(err)),
        Err(err) => Err(err),
    }
}
