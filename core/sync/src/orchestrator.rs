//! Sync orchestrator.
//!
//! Runs the enabled entity kinds of a configuration in fixed order. Which
//! failures stop what is decided here, by matching on [`FailureScope`]:
//! an entity-kind failure is recorded and the next kind runs, a
//! configuration failure stops the remaining kinds, and one configuration
//! never stops another.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use omnisync_common::{EntityKind, Error, ExecutionMode, FailureScope, RecordId, Result};
use omnisync_remote::{Connector, RemoteModels, RemoteSession};
use omnisync_store::{
    OrderState, Outcome, RunCounts, RunSubject, SaleOrder, SalesStats, Store, SummaryStatus,
    SyncConfiguration, SyncStatistics,
};

use crate::notification::Notification;
use crate::recorder::RunRecorder;
use crate::syncers::purchase_order::PurchasePush;
use crate::syncers::sale_order::SalePush;
use crate::syncers::{image, pricelist, product, purchase_order, sale_order, SyncContext};

/// How one entity kind ended.
#[derive(Debug, Clone, PartialEq)]
pub enum KindOutcome {
    Completed { counts: RunCounts },
    Failed { error: String, scope: FailureScope },
}

#[derive(Debug, Clone, PartialEq)]
pub struct KindReport {
    pub kind: EntityKind,
    pub outcome: KindOutcome,
}

/// Result of one configuration run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationReport {
    pub config_id: RecordId,
    pub name: String,
    pub kinds: Vec<KindReport>,
    /// Set when the run stopped before all enabled kinds ran.
    pub aborted: Option<String>,
}

impl ConfigurationReport {
    fn new(config: &SyncConfiguration) -> Self {
        Self {
            config_id: config.id,
            name: config.name.clone(),
            kinds: Vec::new(),
            aborted: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.aborted.is_none()
            && self
                .kinds
                .iter()
                .all(|k| matches!(k.outcome, KindOutcome::Completed { .. }))
    }

    pub fn failed_kinds(&self) -> Vec<EntityKind> {
        self.kinds
            .iter()
            .filter(|k| matches!(k.outcome, KindOutcome::Failed { .. }))
            .map(|k| k.kind)
            .collect()
    }

    pub fn outcome(&self, kind: EntityKind) -> Option<&KindOutcome> {
        self.kinds.iter().find(|k| k.kind == kind).map(|k| &k.outcome)
    }
}

/// Entry point for every sync operation.
pub struct Orchestrator<C: Connector> {
    store: Arc<Store>,
    connector: C,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(store: Arc<Store>, connector: C) -> Self {
        Self { store, connector }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    async fn connect(&self, config: &SyncConfiguration) -> Result<Arc<dyn RemoteSession>> {
        debug!(config = %config.name, url = %config.endpoint.base_url(), "Connecting");
        self.connector.connect(&config.endpoint, config.timeout()).await
    }

    /// Connect, recording a failed connection run when it does not work.
    async fn connect_recorded(
        &self,
        config: &SyncConfiguration,
        mode: ExecutionMode,
    ) -> Result<Arc<dyn RemoteSession>> {
        match self.connect(config).await {
            Ok(session) => Ok(session),
            Err(err) => {
                warn!(config = %config.name, error = %err, "Connection failed");
                let recorder =
                    RunRecorder::start(&self.store, config.id, RunSubject::Connection, mode)?;
                recorder.finish(Some(&err))?;
                Err(err)
            }
        }
    }

    /// Run every active configuration, one after the other.
    pub async fn run_all(&self, mode: ExecutionMode) -> Result<Vec<ConfigurationReport>> {
        let mut reports = Vec::new();
        for config in self.store.active_configurations()? {
            match self.run_configuration(config.id, mode).await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    error!(config = %config.name, error = %err, "Configuration run failed");
                    let mut report = ConfigurationReport::new(&config);
                    report.aborted = Some(err.to_string());
                    reports.push(report);
                }
            }
        }
        Ok(reports)
    }

    /// Run all enabled entity kinds of one configuration under its run lock.
    ///
    /// # Errors
    /// - `AlreadyRunning` if another run holds the lock
    /// - `NotFound` if the configuration does not exist
    pub async fn run_configuration(
        &self,
        config_id: RecordId,
        mode: ExecutionMode,
    ) -> Result<ConfigurationReport> {
        let config = self.store.configuration(config_id)?;
        let token = self.store.acquire_run_lock(config_id)?;
        let result = self.run_locked(&config, mode).await;
        if let Err(err) = self.store.release_run_lock(token) {
            warn!(config = %config.name, error = %err, "Failed to release run lock");
        }
        result
    }

    async fn run_locked(
        &self,
        config: &SyncConfiguration,
        mode: ExecutionMode,
    ) -> Result<ConfigurationReport> {
        info!(config = %config.name, mode = %mode, "Configuration run started");
        let mut report = ConfigurationReport::new(config);

        let session = match self.connect_recorded(config, mode).await {
            Ok(session) => session,
            Err(err) => {
                report.aborted = Some(err.to_string());
                self.refresh_statistics(config.id)?;
                return Ok(report);
            }
        };
        let ctx = SyncContext::new(&self.store, RemoteModels::new(session.as_ref()), config, mode);

        for kind in config.flags.enabled() {
            let outcome = match self.run_kind(&ctx, kind).await {
                Ok(counts) => KindOutcome::Completed { counts },
                Err(err) => {
                    let scope = err.scope();
                    match scope {
                        FailureScope::Configuration => {
                            error!(config = %config.name, kind = %kind, error = %err, "Aborting configuration run");
                            report.aborted = Some(err.to_string());
                        }
                        FailureScope::EntityKind | FailureScope::Item => {
                            warn!(config = %config.name, kind = %kind, error = %err, "Entity kind failed");
                        }
                    }
                    KindOutcome::Failed {
                        error: err.to_string(),
                        scope,
                    }
                }
            };
            report.kinds.push(KindReport { kind, outcome });
            if report.aborted.is_some() {
                break;
            }
        }

        let mut stored = self.store.configuration(config.id)?;
        stored.stats.last_sync_date = Some(chrono::Utc::now());
        self.store.save_configuration(&stored)?;
        self.refresh_statistics(config.id)?;

        info!(
            config = %config.name,
            kinds = report.kinds.len(),
            failed = report.failed_kinds().len(),
            "Configuration run finished"
        );
        Ok(report)
    }

    async fn run_kind(&self, ctx: &SyncContext<'_>, kind: EntityKind) -> Result<RunCounts> {
        // Images record one run per brand on their own.
        if kind == EntityKind::Images {
            let report = image::sync_images(ctx, &ctx.config.brands()).await?;
            if !report.failed_brands().is_empty() {
                warn!(config = %ctx.config.name, failed = report.failed_brands().len(), "Some brands failed");
            }
            return Ok(report.counts());
        }

        let mut recorder =
            RunRecorder::start(ctx.store, ctx.config.id, RunSubject::for_kind(kind), ctx.mode)?;
        let result = match kind {
            EntityKind::Products => product::pull_products(ctx, &mut recorder).await.map(drop),
            EntityKind::PriceLists => pricelist::push_price_lists(ctx, &mut recorder).await.map(drop),
            EntityKind::Sales => sale_order::push_pending(ctx, &mut recorder).await.map(drop),
            EntityKind::Purchases => purchase_order::push_pending(ctx, &mut recorder).await.map(drop),
            EntityKind::Images => Ok(()),
        };
        let counts = recorder.counts();
        recorder.conclude(result)?;
        Ok(counts)
    }

    /// Image sync wizard: one brand, or every configured brand.
    pub async fn sync_images(
        &self,
        config_id: RecordId,
        brand: Option<String>,
        mode: ExecutionMode,
    ) -> Result<Notification> {
        let config = self.store.configuration(config_id)?;
        if !config.flags.images {
            return Err(Error::InvalidInput(format!(
                "Image sync is not enabled for '{}'",
                config.name
            )));
        }
        let brands = match brand.filter(|b| !b.trim().is_empty()) {
            Some(brand) => vec![brand],
            None => config.brands(),
        };

        let token = self.store.acquire_run_lock(config_id)?;
        let result = self.sync_images_locked(&config, &brands, mode).await;
        if let Err(err) = self.store.release_run_lock(token) {
            warn!(config = %config.name, error = %err, "Failed to release run lock");
        }
        self.refresh_statistics(config_id)?;
        result
    }

    async fn sync_images_locked(
        &self,
        config: &SyncConfiguration,
        brands: &[String],
        mode: ExecutionMode,
    ) -> Result<Notification> {
        let session = match self.connect_recorded(config, mode).await {
            Ok(session) => session,
            Err(err) => return Ok(Notification::danger("Image synchronization", err.to_string())),
        };
        let ctx = SyncContext::new(&self.store, RemoteModels::new(session.as_ref()), config, mode);
        let report = image::sync_images(&ctx, brands).await?;

        let failed = report.failed_brands();
        if failed.is_empty() {
            Ok(Notification::success(
                "Image synchronization",
                format!(
                    "Synchronized {} images in {:.2} seconds",
                    report.synced(),
                    report.elapsed_secs
                ),
            ))
        } else {
            let brands: Vec<String> = failed.iter().map(|r| r.subject.to_string()).collect();
            Ok(Notification::danger(
                "Image synchronization",
                format!(
                    "Synchronized {} images in {:.2} seconds; failed: {}",
                    report.synced(),
                    report.elapsed_secs,
                    brands.join(", ")
                ),
            ))
        }
    }

    fn sales_configuration(&self, config_id: Option<RecordId>) -> Result<SyncConfiguration> {
        if let Some(id) = config_id {
            return self.store.configuration(id);
        }
        self.store
            .active_configurations()?
            .into_iter()
            .find(|c| c.flags.sales)
            .ok_or_else(|| {
                Error::InvalidInput("No valid configuration for sales synchronization".to_string())
            })
    }

    /// Push one sale order.
    ///
    /// Without `config_id` the first active configuration with sales
    /// enabled is used.
    ///
    /// # Errors
    /// - `LoopPrevented` if the order is already synced or of remote origin
    /// - `InvalidInput` if no configuration can take the order
    pub async fn push_sale_order(
        &self,
        order_id: RecordId,
        config_id: Option<RecordId>,
    ) -> Result<Notification> {
        let order = self.store.sale_order(order_id)?;
        sale_order::check_pushable(&order)?;
        let config = self.sales_configuration(config_id)?;

        let session = self.connect_recorded(&config, ExecutionMode::Manual).await?;
        let ctx = SyncContext::new(
            &self.store,
            RemoteModels::new(session.as_ref()),
            &config,
            ExecutionMode::Manual,
        );

        let mut recorder = RunRecorder::start(&self.store, config.id, RunSubject::Sales, ctx.mode)?;
        recorder.add_total(1);
        let notification = match sale_order::push_order(&ctx, order_id).await {
            Ok(SalePush::Synced {
                remote_reference,
                lines_synced,
                lines_failed,
                ..
            }) => {
                recorder.synced(
                    &order.name,
                    Some(&remote_reference),
                    format!("{} lines synced, {} unmatched", lines_synced, lines_failed),
                );
                recorder.finish(None)?;
                let mut message = format!(
                    "Order {} synchronized as {} on {}",
                    order.name,
                    remote_reference,
                    ctx.database()
                );
                if lines_failed > 0 {
                    message.push_str(&format!(" ({} lines without a remote product)", lines_failed));
                    Notification::warning("Sales synchronization", message)
                } else {
                    Notification::success("Sales synchronization", message)
                }
            }
            Ok(SalePush::Skipped { reason }) => {
                recorder.skipped(&order.name, None, reason.as_str());
                recorder.finish(None)?;
                Notification::warning(
                    "Sales synchronization",
                    format!("Order {} skipped: {}", order.name, reason),
                )
            }
            Err(err) => {
                if let Err(e) = sale_order::record_failure(&ctx, order_id, &err) {
                    warn!(order = %order.name, error = %e, "Failed to record push failure");
                }
                recorder.failed(&order.name, None, err.to_string());
                recorder.finish(Some(&err))?;
                return Err(err);
            }
        };

        self.refresh_statistics(config.id)?;
        Ok(notification)
    }

    /// Confirm a local order and push it when it is eligible.
    ///
    /// A push failure is returned as a notification; confirmation is kept.
    pub async fn handle_order_confirmed(&self, order_id: RecordId) -> Result<Option<Notification>> {
        let mut order = self.store.sale_order(order_id)?;
        order.state = OrderState::Sale;
        self.store.update(&order)?;

        if order.markers.is_synced || order.markers.is_remote_origin {
            debug!(order = %order.name, "Confirmed order not eligible for push");
            return Ok(None);
        }
        let Ok(config) = self.sales_configuration(None) else {
            debug!(order = %order.name, "No configuration with sales enabled");
            return Ok(None);
        };

        match self.push_sale_order(order_id, Some(config.id)).await {
            Ok(notification) => Ok(Some(notification)),
            Err(err) => {
                warn!(order = %order.name, error = %err, "Push on confirmation failed");
                Ok(Some(Notification::danger(
                    "Sales synchronization failed",
                    format!("Order {} was confirmed but not synchronized: {}", order.name, err),
                )))
            }
        }
    }

    /// Post a local invoice and push it to every configuration with
    /// purchases enabled.
    pub async fn handle_invoice_posted(&self, invoice_id: RecordId) -> Result<Vec<Notification>> {
        let mut invoice = self.store.invoice(invoice_id)?;
        invoice.posted = true;
        self.store.update(&invoice)?;
        if !invoice.is_customer_invoice() {
            return Ok(Vec::new());
        }

        let mut notifications = Vec::new();
        for config in self.store.active_configurations()? {
            if !config.flags.purchases {
                continue;
            }
            let notification = match self.push_invoice(&config, invoice_id).await {
                Ok(PurchasePush::Created {
                    record,
                    confirm_error: None,
                }) => Notification::success(
                    "Purchase synchronization",
                    format!(
                        "Invoice {} sent to {} as purchase order {} ({:?})",
                        invoice.name, config.name, record.remote_id, record.state
                    ),
                ),
                Ok(PurchasePush::Created {
                    record,
                    confirm_error: Some(err),
                }) => Notification::danger(
                    "Purchase synchronization",
                    format!(
                        "Purchase order {} created on {} but not confirmed: {}",
                        record.remote_id, config.name, err
                    ),
                ),
                Ok(PurchasePush::Skipped { reason }) => Notification::warning(
                    "Purchase synchronization",
                    format!("Invoice {} skipped for {}: {}", invoice.name, config.name, reason),
                ),
                Err(err) => Notification::danger(
                    "Purchase synchronization failed",
                    format!("Invoice {} not sent to {}: {}", invoice.name, config.name, err),
                ),
            };
            notifications.push(notification);
            self.refresh_statistics(config.id)?;
        }
        Ok(notifications)
    }

    async fn push_invoice(
        &self,
        config: &SyncConfiguration,
        invoice_id: RecordId,
    ) -> Result<PurchasePush> {
        let session = self.connect_recorded(config, ExecutionMode::Manual).await?;
        let ctx = SyncContext::new(
            &self.store,
            RemoteModels::new(session.as_ref()),
            config,
            ExecutionMode::Manual,
        );
        let (push, _run) = purchase_order::push_recorded(&ctx, invoice_id).await?;
        Ok(push)
    }

    /// Authenticate only.
    pub async fn test_connection(&self, config_id: RecordId) -> Result<Notification> {
        let config = self.store.configuration(config_id)?;
        match self.connect_recorded(&config, ExecutionMode::Manual).await {
            Ok(session) => Ok(Notification::success(
                "Connection test",
                format!("Connected to database {}", session.database()),
            )),
            Err(err) => Ok(Notification::danger("Connection test", err.to_string())),
        }
    }

    /// Confirm remote purchase orders still recorded as created.
    pub async fn confirm_pending_purchase_orders(&self, config_id: RecordId) -> Result<Notification> {
        let config = self.store.configuration(config_id)?;
        let token = self.store.acquire_run_lock(config_id)?;
        let result = self.confirm_pending_locked(&config).await;
        if let Err(err) = self.store.release_run_lock(token) {
            warn!(config = %config.name, error = %err, "Failed to release run lock");
        }
        result
    }

    async fn confirm_pending_locked(&self, config: &SyncConfiguration) -> Result<Notification> {
        let mode = ExecutionMode::Manual;
        let session = self.connect_recorded(config, mode).await?;
        let ctx = SyncContext::new(&self.store, RemoteModels::new(session.as_ref()), config, mode);

        let mut recorder =
            RunRecorder::start(&self.store, config.id, RunSubject::PurchaseConfirmation, mode)?;
        let result = purchase_order::confirm_pending(&ctx, &mut recorder).await;
        let report = recorder.conclude(result)?;

        if report.unconfirmed == 0 {
            Ok(Notification::success(
                "Purchase confirmation",
                format!("{} purchase orders confirmed", report.confirmed),
            ))
        } else {
            Ok(Notification::danger(
                "Purchase confirmation",
                format!(
                    "{} purchase orders confirmed, {} still unconfirmed",
                    report.confirmed, report.unconfirmed
                ),
            ))
        }
    }

    /// Clear the sync state of an order so it can be pushed again.
    pub fn reset_sale_order(&self, order_id: RecordId) -> Result<()> {
        let mut order = self.store.sale_order(order_id)?;
        order.markers.reset();
        order.sync_summary = None;
        for line in &mut order.lines {
            line.sync_status = None;
        }
        self.store.update(&order)?;
        info!(order = %order.name, "Sale order sync state reset");
        Ok(())
    }

    /// Recompute the statistics of a configuration from local records.
    pub fn refresh_statistics(&self, config_id: RecordId) -> Result<SyncStatistics> {
        let mut config = self.store.configuration(config_id)?;
        let mut stats = SyncStatistics {
            last_sync_date: config.stats.last_sync_date,
            ..SyncStatistics::default()
        };

        // Distinct items, so re-syncing an unchanged catalog does not add up.
        let mut products = HashSet::new();
        let mut images = HashSet::new();
        let mut price_lists = HashSet::new();
        for run in self.store.runs(Some(config_id))? {
            let seen = match run.subject {
                RunSubject::Products => &mut products,
                RunSubject::Images { .. } => &mut images,
                RunSubject::PriceLists => &mut price_lists,
                _ => continue,
            };
            for line in run.lines {
                if line.outcome == Outcome::Synced {
                    seen.insert(line.matching_key.unwrap_or(line.item));
                }
            }
        }
        stats.products = products.len() as u64;
        stats.images = images.len() as u64;
        stats.price_lists = price_lists.len() as u64;
        stats.sales = self
            .store
            .list::<SaleOrder>()?
            .iter()
            .filter(|o| o.markers.is_synced)
            .filter(|o| {
                o.sync_summary
                    .as_ref()
                    .is_some_and(|s| s.config_id == config_id && s.status == SummaryStatus::Synced)
            })
            .count() as u64;
        stats.purchases = self.store.purchase_records(config_id)?.len() as u64;

        config.stats = stats.clone();
        self.store.save_configuration(&config)?;
        Ok(stats)
    }

    pub fn sales_stats(&self) -> Result<SalesStats> {
        self.store.sales_stats()
    }
}
