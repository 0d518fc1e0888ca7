//! Sale order push.
//!
//! Orders are pushed at most once per reset. Orders that came from a remote
//! instance are refused outright. Lines whose product has no remote match
//! are dropped from the remote order and flagged on the local line; an order
//! with no matching line at all is skipped instead of creating an empty
//! remote order.

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use omnisync_common::{Error, RecordId, RemoteId, Result};
use omnisync_store::{LineSyncStatus, Partner, SaleOrder, SummaryStatus, SyncSummary};

use super::{contain_item, SyncContext};
use crate::capability::Capabilities;
use crate::reconciler::MatchKeys;
use crate::recorder::RunRecorder;

const MODEL: &str = "sale.order";
const PARTNER_MODEL: &str = "res.partner";
const CAMPAIGN_MODEL: &str = "utm.campaign";

/// Remote datetime format.
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What happened to one pushed order.
#[derive(Debug, Clone, PartialEq)]
pub enum SalePush {
    Synced {
        remote_id: RemoteId,
        remote_reference: String,
        lines_synced: usize,
        lines_failed: usize,
    },
    /// No line matched a remote product.
    Skipped { reason: String },
}

/// Counters of a batch push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SalesReport {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Refuse orders that are already synced or of remote origin.
pub fn check_pushable(order: &SaleOrder) -> Result<()> {
    if order.markers.is_remote_origin {
        return Err(Error::LoopPrevented(format!(
            "order {} comes from a remote instance and cannot be synchronized back",
            order.name
        )));
    }
    if order.markers.is_synced {
        return Err(Error::LoopPrevented(format!(
            "order {} was already synchronized",
            order.name
        )));
    }
    Ok(())
}

fn partner_values(partner: &Partner) -> Map<String, Value> {
    let mut values = Map::new();
    values.insert("name".into(), json!(partner.name));
    values.insert("vat".into(), json!(partner.vat));
    values.insert("street".into(), json!(partner.street));
    values.insert("city".into(), json!(partner.city));
    values.insert("phone".into(), json!(partner.phone));
    values.insert("email".into(), json!(partner.email));
    values.insert("is_company".into(), json!(true));
    values
}

fn summary(
    ctx: &SyncContext<'_>,
    status: SummaryStatus,
    lines_synced: usize,
    message: impl Into<String>,
) -> SyncSummary {
    SyncSummary {
        status,
        config_id: ctx.config.id,
        remote_reference: None,
        remote_id: None,
        database: ctx.database().to_string(),
        lines_synced,
        synced_at: Utc::now(),
        message: message.into(),
    }
}

/// Push one order to the remote instance.
///
/// # Errors
/// - `LoopPrevented` if the order is synced or of remote origin
/// - `FeatureUnavailable` if the remote has no sales module
/// - `InvalidInput` if the order has no company contact
pub async fn push_order(ctx: &SyncContext<'_>, order_id: RecordId) -> Result<SalePush> {
    let mut order = ctx.store.sale_order(order_id)?;
    check_pushable(&order)?;

    ctx.remote.probe(MODEL).await?;

    let partner = order.company_partner.clone().ok_or_else(|| {
        Error::InvalidInput(format!("order {} has no company contact", order.name))
    })?;
    let reconciler = ctx.reconciler();
    let remote_partner = reconciler
        .find_or_create(PARTNER_MODEL, &MatchKeys::partner(&partner), partner_values(&partner))
        .await?
        .id();

    let mut remote_lines = Vec::new();
    for line in order.lines.iter_mut() {
        match reconciler.product(line.product_code.as_deref()).await? {
            Some(product) => {
                remote_lines.push(json!([0, 0, {
                    "product_id": product.get(),
                    "product_uom_qty": line.quantity,
                    "name": line.description,
                }]));
                line.sync_status = Some(LineSyncStatus::Synced);
            }
            None => line.sync_status = Some(LineSyncStatus::Failed),
        }
    }
    let lines_failed = order.lines.len() - remote_lines.len();

    if remote_lines.is_empty() {
        let reason = "none of the order's products exist on the remote instance".to_string();
        warn!(order = %order.name, config = %ctx.config.name, "Order skipped: {}", reason);
        order.sync_summary = Some(summary(ctx, SummaryStatus::Skipped, 0, reason.clone()));
        ctx.store.update(&order)?;
        return Ok(SalePush::Skipped { reason });
    }

    let capabilities = Capabilities::probe(ctx.remote, MODEL).await?;

    let mut campaign = None;
    if let Some(name) = order.campaign.as_deref().filter(|_| capabilities.supports("campaign_id")) {
        let mut values = Map::new();
        values.insert("name".into(), json!(name));
        campaign = Some(
            reconciler
                .find_or_create(CAMPAIGN_MODEL, &MatchKeys::name(name), values)
                .await?
                .id(),
        );
    }

    let mut payload = capabilities
        .payload()
        .required("partner_id", remote_partner.get())
        .required("origin", order.origin.clone().unwrap_or_else(|| order.name.clone()))
        .required("date_order", order.date_order.format(DATETIME_FORMAT).to_string())
        .required("order_line", Value::Array(remote_lines))
        .optional("is_remote_order", true);
    if let Some(doc) = &order.tracking_document {
        payload = payload
            .optional("meli_tracking_pdf", doc.data.as_str())
            .optional("meli_tracking_filename", doc.filename.as_str());
    }
    if let Some(campaign) = campaign {
        payload = payload.optional("campaign_id", campaign.get());
    }

    let remote_id = ctx.remote.create(MODEL, payload.build()?).await?;
    // The remote order exists from here on; the order must be marked synced
    // even when its display name cannot be read back.
    let remote_reference = match ctx.remote.read(MODEL, &[remote_id], &["name"]).await {
        Ok(records) => records
            .first()
            .and_then(|r| r.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| remote_id.to_string()),
        Err(err) => {
            warn!(order = %order.name, remote_id = %remote_id, error = %err, "Could not read remote order name");
            remote_id.to_string()
        }
    };

    let lines_synced = order.lines.len() - lines_failed;
    order.markers.mark_pushed(remote_reference.clone());
    let mut done = summary(
        ctx,
        SummaryStatus::Synced,
        lines_synced,
        format!("remote order {} created", remote_reference),
    );
    done.remote_reference = Some(remote_reference.clone());
    done.remote_id = Some(remote_id);
    order.sync_summary = Some(done);
    ctx.store.update(&order)?;

    info!(
        order = %order.name,
        remote = %remote_reference,
        lines_synced,
        lines_failed,
        "Sale order pushed"
    );
    Ok(SalePush::Synced {
        remote_id,
        remote_reference,
        lines_synced,
        lines_failed,
    })
}

/// Record a failed attempt on the order without touching its markers.
pub fn record_failure(ctx: &SyncContext<'_>, order_id: RecordId, err: &Error) -> Result<()> {
    let mut order = ctx.store.sale_order(order_id)?;
    order.sync_summary = Some(summary(ctx, SummaryStatus::Failed, 0, err.to_string()));
    ctx.store.update(&order)
}

/// Push every confirmed order that is not synced yet.
pub async fn push_pending(
    ctx: &SyncContext<'_>,
    recorder: &mut RunRecorder<'_>,
) -> Result<SalesReport> {
    let mut report = SalesReport::default();
    let orders = ctx.store.unsynced_confirmed_orders()?;
    recorder.add_total(orders.len() as u64);

    for order in orders {
        if order.markers.is_remote_origin {
            report.skipped += 1;
            recorder.skipped(&order.name, None, "order came from a remote instance");
            continue;
        }

        match contain_item(push_order(ctx, order.id).await)? {
            Ok(SalePush::Synced {
                remote_reference,
                lines_synced,
                lines_failed,
                ..
            }) => {
                report.synced += 1;
                recorder.synced(
                    &order.name,
                    Some(&remote_reference),
                    format!("{} lines synced, {} unmatched", lines_synced, lines_failed),
                );
            }
            Ok(SalePush::Skipped { reason }) => {
                report.skipped += 1;
                recorder.skipped(&order.name, None, reason);
            }
            Err(err) => {
                report.failed += 1;
                record_failure(ctx, order.id, &err)?;
                recorder.failed(&order.name, None, err.to_string());
            }
        }
    }
    Ok(report)
}
