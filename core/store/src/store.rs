//! Typed store API over a [`Backend`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

use omnisync_common::{Error, RecordId, Result};

use crate::backend::{Backend, MemoryBackend};
use crate::config::SyncConfiguration;
use crate::ledger::{RunCounts, RunLine, RunStatus, SyncRun};
use crate::models::{
    Invoice, OrderState, PriceList, Product, PurchaseState, PurchaseSyncRecord, SaleOrder,
};
use crate::sqlite::SqliteBackend;

/// A document type with its own table.
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: &'static str;

    fn id(&self) -> RecordId;

    fn set_id(&mut self, id: RecordId);

    /// Secondary key indexed by the backend.
    fn lookup_key(&self) -> Option<String> {
        None
    }
}

impl Record for SyncConfiguration {
    const TABLE: &'static str = "configurations";

    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
}

impl Record for Product {
    const TABLE: &'static str = "products";

    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn lookup_key(&self) -> Option<String> {
        self.code().map(str::to_string)
    }
}

impl Record for PriceList {
    const TABLE: &'static str = "price_lists";

    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn lookup_key(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

impl Record for SaleOrder {
    const TABLE: &'static str = "sale_orders";

    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn lookup_key(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

impl Record for Invoice {
    const TABLE: &'static str = "invoices";

    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn lookup_key(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

impl Record for PurchaseSyncRecord {
    const TABLE: &'static str = "purchase_records";

    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn lookup_key(&self) -> Option<String> {
        Some(purchase_key(self.config_id, self.invoice_id))
    }
}

impl Record for SyncRun {
    const TABLE: &'static str = "runs";

    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
}

fn purchase_key(config_id: RecordId, invoice_id: RecordId) -> String {
    format!("{}:{}", config_id, invoice_id)
}

fn lock_key(config_id: RecordId) -> String {
    format!("config:{}", config_id)
}

/// Proof of holding a configuration's run lock.
#[derive(Debug, PartialEq, Eq)]
pub struct RunToken {
    config_id: RecordId,
    token: String,
}

impl RunToken {
    pub fn config_id(&self) -> RecordId {
        self.config_id
    }
}

/// Aggregate over synced sale orders.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SalesStats {
    pub total_count: u64,
    pub avg_value: f64,
}

/// Local record store.
pub struct Store {
    backend: Box<dyn Backend>,
}

impl Store {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Store over a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Store over a SQLite file.
    pub fn open_sqlite(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(SqliteBackend::open(path)?))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    // ---- generic document access ----

    /// Insert a record, assigning it a fresh id.
    pub fn insert<R: Record>(&self, mut record: R) -> Result<R> {
        let id = self.backend.next_id(R::TABLE)?;
        record.set_id(RecordId::new(id));
        self.write(&record)?;
        debug!(table = R::TABLE, id, "Inserted record");
        Ok(record)
    }

    /// Replace a stored record.
    ///
    /// # Errors
    /// - `NotFound` if the record was never inserted
    pub fn update<R: Record>(&self, record: &R) -> Result<()> {
        if self.backend.get(R::TABLE, record.id().get())?.is_none() {
            return Err(Error::NotFound(format!("{} #{}", R::TABLE, record.id())));
        }
        self.write(record)
    }

    fn write<R: Record>(&self, record: &R) -> Result<()> {
        let data = serde_json::to_string(record)?;
        let lookup = record.lookup_key();
        self.backend
            .put(R::TABLE, record.id().get(), lookup.as_deref(), &data)
    }

    /// Fetch a record.
    ///
    /// # Errors
    /// - `NotFound` if no record has this id
    pub fn get<R: Record>(&self, id: RecordId) -> Result<R> {
        match self.backend.get(R::TABLE, id.get())? {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(Error::NotFound(format!("{} #{}", R::TABLE, id))),
        }
    }

    /// Fetch by lookup key.
    pub fn find<R: Record>(&self, lookup: &str) -> Result<Option<R>> {
        match self.backend.find(R::TABLE, lookup)? {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// All records of a type, in id order.
    pub fn list<R: Record>(&self) -> Result<Vec<R>> {
        self.backend
            .scan(R::TABLE)?
            .iter()
            .map(|data| serde_json::from_str(data).map_err(Error::from))
            .collect()
    }

    pub fn remove<R: Record>(&self, id: RecordId) -> Result<bool> {
        self.backend.delete(R::TABLE, id.get())
    }

    // ---- configurations ----

    /// Validate and store a new configuration.
    pub fn add_configuration(&self, config: SyncConfiguration) -> Result<SyncConfiguration> {
        config.validate()?;
        let config = self.insert(config)?;
        info!(config = %config.name, id = %config.id, "Configuration saved");
        Ok(config)
    }

    /// Validate and replace a configuration.
    pub fn save_configuration(&self, config: &SyncConfiguration) -> Result<()> {
        config.validate()?;
        self.update(config)
    }

    pub fn configuration(&self, id: RecordId) -> Result<SyncConfiguration> {
        self.get(id)
    }

    pub fn configurations(&self) -> Result<Vec<SyncConfiguration>> {
        self.list()
    }

    pub fn active_configurations(&self) -> Result<Vec<SyncConfiguration>> {
        Ok(self
            .configurations()?
            .into_iter()
            .filter(|c| c.active)
            .collect())
    }

    // ---- products ----

    pub fn product_by_code(&self, code: &str) -> Result<Option<Product>> {
        self.find(code.trim())
    }

    pub fn products(&self) -> Result<Vec<Product>> {
        self.list()
    }

    // ---- price lists ----

    /// Lists flagged for export.
    pub fn price_lists_for_export(&self) -> Result<Vec<PriceList>> {
        Ok(self
            .list::<PriceList>()?
            .into_iter()
            .filter(|p| p.sync_to_remote)
            .collect())
    }

    // ---- sale orders ----

    pub fn sale_order(&self, id: RecordId) -> Result<SaleOrder> {
        self.get(id)
    }

    /// Confirmed orders not yet pushed anywhere.
    pub fn unsynced_confirmed_orders(&self) -> Result<Vec<SaleOrder>> {
        Ok(self
            .list::<SaleOrder>()?
            .into_iter()
            .filter(|o| o.state == OrderState::Sale && !o.markers.is_synced)
            .collect())
    }

    /// Count and average total of synced orders.
    pub fn sales_stats(&self) -> Result<SalesStats> {
        let synced: Vec<SaleOrder> = self
            .list::<SaleOrder>()?
            .into_iter()
            .filter(|o| o.markers.is_synced)
            .collect();
        let total_count = synced.len() as u64;
        let avg_value = if total_count > 0 {
            synced.iter().map(|o| o.amount_total).sum::<f64>() / total_count as f64
        } else {
            0.0
        };
        Ok(SalesStats {
            total_count,
            avg_value,
        })
    }

    // ---- invoices and purchase records ----

    pub fn invoice(&self, id: RecordId) -> Result<Invoice> {
        self.get(id)
    }

    /// Posted customer invoices with no purchase record for `config_id`.
    pub fn invoices_pending_purchase(&self, config_id: RecordId) -> Result<Vec<Invoice>> {
        let mut pending = Vec::new();
        for invoice in self.list::<Invoice>()? {
            if invoice.posted
                && invoice.is_customer_invoice()
                && self.purchase_record(config_id, invoice.id)?.is_none()
            {
                pending.push(invoice);
            }
        }
        Ok(pending)
    }

    pub fn purchase_record(
        &self,
        config_id: RecordId,
        invoice_id: RecordId,
    ) -> Result<Option<PurchaseSyncRecord>> {
        self.find(&purchase_key(config_id, invoice_id))
    }

    pub fn purchase_records(&self, config_id: RecordId) -> Result<Vec<PurchaseSyncRecord>> {
        Ok(self
            .list::<PurchaseSyncRecord>()?
            .into_iter()
            .filter(|r| r.config_id == config_id)
            .collect())
    }

    /// Remote purchase orders created but never confirmed.
    pub fn unconfirmed_purchases(&self, config_id: RecordId) -> Result<Vec<PurchaseSyncRecord>> {
        Ok(self
            .purchase_records(config_id)?
            .into_iter()
            .filter(|r| r.state == PurchaseState::Created)
            .collect())
    }

    // ---- run ledger ----

    /// Persist a new in-progress run header.
    pub fn start_run(&self, run: SyncRun) -> Result<SyncRun> {
        if run.status != RunStatus::InProgress {
            return Err(Error::InvalidInput(
                "A run must start in progress".to_string(),
            ));
        }
        self.insert(run)
    }

    /// Close a run with its lines. Fails if the stored run is already closed.
    pub fn finish_run(
        &self,
        id: RecordId,
        status: RunStatus,
        counts: RunCounts,
        lines: Vec<RunLine>,
        error: Option<String>,
    ) -> Result<SyncRun> {
        let mut run: SyncRun = self.get(id)?;
        run.finish(status, counts, lines, error)?;
        self.update(&run)?;
        Ok(run)
    }

    /// Runs, newest first, optionally for one configuration.
    pub fn runs(&self, config_id: Option<RecordId>) -> Result<Vec<SyncRun>> {
        let mut runs: Vec<SyncRun> = self
            .list::<SyncRun>()?
            .into_iter()
            .filter(|r| config_id.map_or(true, |id| r.config_id == id))
            .collect();
        runs.reverse();
        Ok(runs)
    }

    // ---- run lock ----

    /// Take the run lock of a configuration.
    ///
    /// # Errors
    /// - `AlreadyRunning` when another run holds it
    pub fn acquire_run_lock(&self, config_id: RecordId) -> Result<RunToken> {
        let token = Uuid::new_v4().to_string();
        let key = lock_key(config_id);
        if self.backend.compare_and_set(&key, None, Some(&token))? {
            debug!(config = %config_id, "Run lock acquired");
            Ok(RunToken { config_id, token })
        } else {
            Err(Error::AlreadyRunning(format!(
                "configuration {} is already being synchronized",
                config_id
            )))
        }
    }

    /// Give the lock back. Returns false if it was force-released meanwhile.
    pub fn release_run_lock(&self, token: RunToken) -> Result<bool> {
        let released = self.backend.compare_and_set(
            &lock_key(token.config_id),
            Some(&token.token),
            None,
        )?;
        if !released {
            warn!(config = %token.config_id, "Run lock was taken over before release");
        }
        Ok(released)
    }

    /// Drop a stale lock regardless of its holder.
    pub fn force_release_run_lock(&self, config_id: RecordId) -> Result<bool> {
        let key = lock_key(config_id);
        match self.backend.lock_holder(&key)? {
            Some(holder) => {
                let released = self.backend.compare_and_set(&key, Some(&holder), None)?;
                if released {
                    warn!(config = %config_id, "Run lock force-released");
                }
                Ok(released)
            }
            None => Ok(false),
        }
    }

    pub fn is_locked(&self, config_id: RecordId) -> Result<bool> {
        Ok(self.backend.lock_holder(&lock_key(config_id))?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Outcome, RunSubject};
    use crate::models::{InvoiceKind, Partner};
    use chrono::Utc;
    use omnisync_common::{Endpoint, ExecutionMode, RemoteId, Secret};
    use tempfile::TempDir;

    fn config() -> SyncConfiguration {
        SyncConfiguration::new(
            "Warehouse",
            Endpoint::new("https://erp.example.com", "prod", "sync", Secret::new("pw")),
        )
    }

    #[test]
    fn test_insert_assigns_ids() {
        let store = Store::in_memory();
        let a = store.insert(Product::new("Drill", Some("D-1".into()))).unwrap();
        let b = store.insert(Product::new("Saw", None)).unwrap();
        assert_eq!(a.id, RecordId::new(1));
        assert_eq!(b.id, RecordId::new(2));

        assert_eq!(store.product_by_code("D-1").unwrap().unwrap().name, "Drill");
        assert!(store.product_by_code("S-1").unwrap().is_none());
    }

    #[test]
    fn test_update_requires_existing() {
        let store = Store::in_memory();
        let mut product = Product::new("Drill", Some("D-1".into()));
        product.id = RecordId::new(42);
        assert!(matches!(store.update(&product), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_add_configuration_validates() {
        let store = Store::in_memory();
        let mut bad = config();
        bad.endpoint.url = "no-scheme.example.com".into();
        assert!(matches!(store.add_configuration(bad), Err(Error::Validation(_))));

        let mut inactive = store.add_configuration(config()).unwrap();
        store.add_configuration(config()).unwrap();
        inactive.active = false;
        store.save_configuration(&inactive).unwrap();
        assert_eq!(store.active_configurations().unwrap().len(), 1);
    }

    #[test]
    fn test_unsynced_confirmed_orders() {
        let store = Store::in_memory();
        let mut confirmed = SaleOrder::new("S001", Partner::new("Acme"));
        confirmed.state = OrderState::Sale;
        let mut synced = confirmed.clone();
        synced.name = "S002".into();
        synced.markers.mark_pushed("R-9");
        let draft = SaleOrder::new("S003", Partner::new("Acme"));

        store.insert(confirmed).unwrap();
        store.insert(synced).unwrap();
        store.insert(draft).unwrap();

        let pending = store.unsynced_confirmed_orders().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "S001");
    }

    #[test]
    fn test_sales_stats() {
        let store = Store::in_memory();
        assert_eq!(store.sales_stats().unwrap(), SalesStats::default());

        for (name, total) in [("S1", 100.0), ("S2", 50.0)] {
            let mut order = SaleOrder::new(name, Partner::new("Acme"));
            order.amount_total = total;
            order.markers.mark_pushed(name);
            store.insert(order).unwrap();
        }
        let stats = store.sales_stats().unwrap();
        assert_eq!(stats.total_count, 2);
        assert!((stats.avg_value - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invoices_pending_purchase() {
        let store = Store::in_memory();
        let config_id = RecordId::new(1);
        let posted = store
            .insert(Invoice {
                name: "INV/001".into(),
                posted: true,
                ..Invoice::default()
            })
            .unwrap();
        store
            .insert(Invoice {
                name: "BILL/001".into(),
                posted: true,
                move_type: InvoiceKind::InInvoice,
                ..Invoice::default()
            })
            .unwrap();
        assert_eq!(store.invoices_pending_purchase(config_id).unwrap().len(), 1);

        store
            .insert(PurchaseSyncRecord {
                id: RecordId::default(),
                config_id,
                invoice_id: posted.id,
                invoice_name: posted.name.clone(),
                remote_id: RemoteId::new(7),
                state: PurchaseState::Created,
                lines_synced: 1,
                error: None,
                created_at: Utc::now(),
                confirmed_at: None,
            })
            .unwrap();
        assert!(store.invoices_pending_purchase(config_id).unwrap().is_empty());
        assert_eq!(store.unconfirmed_purchases(config_id).unwrap().len(), 1);
        assert!(store.unconfirmed_purchases(RecordId::new(2)).unwrap().is_empty());
    }

    #[test]
    fn test_run_finishes_once() {
        let store = Store::in_memory();
        let run = store
            .start_run(SyncRun::start(RecordId::new(1), RunSubject::Products, ExecutionMode::Manual))
            .unwrap();
        let lines = vec![RunLine::new("Drill", Some("D-1"), Outcome::Synced, "created")];

        let done = store
            .finish_run(run.id, RunStatus::Completed, RunCounts::tally(1, &lines), lines, None)
            .unwrap();
        assert_eq!(done.counts.synced, 1);

        let again = store.finish_run(run.id, RunStatus::Failed, RunCounts::default(), vec![], None);
        assert!(again.is_err());
        assert_eq!(store.runs(None).unwrap()[0].status, RunStatus::Completed);
    }

    #[test]
    fn test_run_lock() {
        let store = Store::in_memory();
        let config_id = RecordId::new(3);

        let token = store.acquire_run_lock(config_id).unwrap();
        assert!(matches!(
            store.acquire_run_lock(config_id),
            Err(Error::AlreadyRunning(_))
        ));
        assert!(store.acquire_run_lock(RecordId::new(4)).is_ok());

        assert!(store.release_run_lock(token).unwrap());
        assert!(!store.is_locked(config_id).unwrap());
    }

    #[test]
    fn test_force_release() {
        let store = Store::in_memory();
        let config_id = RecordId::new(1);
        let stale = store.acquire_run_lock(config_id).unwrap();

        assert!(store.force_release_run_lock(config_id).unwrap());
        let fresh = store.acquire_run_lock(config_id).unwrap();
        assert!(!store.release_run_lock(stale).unwrap());
        assert!(store.is_locked(config_id).unwrap());
        assert!(store.release_run_lock(fresh).unwrap());
    }

    #[test]
    fn test_sqlite_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("omnisync.db");

        let id = {
            let store = Store::open_sqlite(&path).unwrap();
            store.add_configuration(config()).unwrap().id
        };

        let store = Store::open_sqlite(&path).unwrap();
        assert_eq!(store.backend_name(), "sqlite");
        let loaded = store.configuration(id).unwrap();
        assert_eq!(loaded.name, "Warehouse");
        assert_eq!(loaded.endpoint.credential.expose(), "pw");
    }
}
