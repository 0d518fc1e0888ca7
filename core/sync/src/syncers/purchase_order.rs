//! Purchase order push from posted customer invoices.
//!
//! Creation and confirmation are two separate remote calls. The purchase
//! record is persisted as `Created` right after the first one, so an order
//! whose confirmation failed stays visible until an operator confirms it.

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use omnisync_common::{Error, RecordId, RemoteId, Result};
use omnisync_store::{
    Invoice, Partner, PurchaseState, PurchaseSyncRecord, RunSubject, SyncRun,
};

use super::sale_order::DATETIME_FORMAT;
use super::{contain_item, SyncContext};
use crate::capability::Capabilities;
use crate::reconciler::MatchKeys;
use crate::recorder::RunRecorder;

const MODEL: &str = "purchase.order";
const PARTNER_MODEL: &str = "res.partner";

/// What happened to one invoice.
#[derive(Debug, Clone, PartialEq)]
pub enum PurchasePush {
    /// Remote order exists; `confirm_error` is set when the confirm call failed.
    Created {
        record: PurchaseSyncRecord,
        confirm_error: Option<String>,
    },
    Skipped { reason: String },
}

/// Counters of a batch push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurchaseReport {
    pub created: usize,
    pub confirmed: usize,
    pub unconfirmed: usize,
    pub skipped: usize,
    pub failed: usize,
}

fn vendor_values(partner: &Partner) -> Map<String, Value> {
    let mut values = Map::new();
    values.insert("name".into(), json!(partner.name));
    values.insert("vat".into(), json!(partner.vat));
    values.insert("email".into(), json!(partner.email));
    values.insert("phone".into(), json!(partner.phone));
    values.insert("supplier_rank".into(), json!(1));
    values.insert("company_type".into(), json!("company"));
    values
}

fn check_pushable(ctx: &SyncContext<'_>, invoice: &Invoice) -> Result<()> {
    if invoice.markers.is_remote_origin {
        return Err(Error::LoopPrevented(format!(
            "invoice {} comes from a remote instance",
            invoice.name
        )));
    }
    if let Some(existing) = ctx.store.purchase_record(ctx.config.id, invoice.id)? {
        return Err(Error::LoopPrevented(format!(
            "invoice {} was already pushed as remote purchase order {}",
            invoice.name, existing.remote_id
        )));
    }
    Ok(())
}

/// Confirm a created remote order and persist the new state.
///
/// On failure the record keeps `Created` and stores the error.
pub async fn confirm(ctx: &SyncContext<'_>, record: &mut PurchaseSyncRecord) -> Result<()> {
    match ctx.remote.execute(MODEL, "button_confirm", &[record.remote_id]).await {
        Ok(_) => {
            record.mark_confirmed();
            ctx.store.update(record)?;
            info!(invoice = %record.invoice_name, remote_id = %record.remote_id, "Remote purchase order confirmed");
            Ok(())
        }
        Err(err) => {
            record.error = Some(err.to_string());
            ctx.store.update(record)?;
            warn!(
                invoice = %record.invoice_name,
                remote_id = %record.remote_id,
                error = %err,
                "Remote purchase order created but not confirmed"
            );
            Err(err)
        }
    }
}

/// Push one posted customer invoice as a remote purchase order.
///
/// # Errors
/// - `LoopPrevented` if the invoice is of remote origin or already pushed
///   for this configuration
/// - `FeatureUnavailable` if the remote has no purchase module
pub async fn push_invoice(ctx: &SyncContext<'_>, invoice_id: RecordId) -> Result<PurchasePush> {
    let invoice = ctx.store.invoice(invoice_id)?;
    if !invoice.is_customer_invoice() {
        return Ok(PurchasePush::Skipped {
            reason: "not a customer invoice".to_string(),
        });
    }
    let Some(vendor) = invoice.partner.clone() else {
        return Ok(PurchasePush::Skipped {
            reason: "invoice has no partner".to_string(),
        });
    };
    check_pushable(ctx, &invoice)?;

    ctx.remote.probe(MODEL).await?;

    let reconciler = ctx.reconciler();
    let remote_vendor = reconciler
        .find_or_create(PARTNER_MODEL, &MatchKeys::partner(&vendor), vendor_values(&vendor))
        .await?
        .id();

    let date_planned = Utc::now().format(DATETIME_FORMAT).to_string();
    let mut order_lines = Vec::new();
    for line in &invoice.lines {
        let Some(product) = reconciler.product(line.product_code.as_deref()).await? else {
            continue;
        };
        order_lines.push(json!([0, 0, {
            "name": line.description,
            "product_id": product.get(),
            "product_qty": line.quantity,
            "price_unit": line.price_unit,
            "date_planned": date_planned,
        }]));
    }

    if order_lines.is_empty() {
        warn!(invoice = %invoice.name, config = %ctx.config.name, "No invoice line matched a remote product");
        return Ok(PurchasePush::Skipped {
            reason: "no valid products found for the purchase order".to_string(),
        });
    }
    let lines_synced = order_lines.len();

    let capabilities = Capabilities::probe(ctx.remote, MODEL).await?;
    let payload = capabilities
        .payload()
        .required("partner_id", remote_vendor.get())
        .required("partner_ref", invoice.name.as_str())
        .required("order_line", Value::Array(order_lines))
        .optional("origin", invoice.name.as_str())
        .build()?;

    let remote_id: RemoteId = ctx.remote.create(MODEL, payload).await?;
    let mut record = ctx.store.insert(PurchaseSyncRecord {
        id: RecordId::default(),
        config_id: ctx.config.id,
        invoice_id: invoice.id,
        invoice_name: invoice.name.clone(),
        remote_id,
        state: PurchaseState::Created,
        lines_synced,
        error: None,
        created_at: Utc::now(),
        confirmed_at: None,
    })?;
    info!(invoice = %invoice.name, remote_id = %remote_id, config = %ctx.config.name, "Remote purchase order created");

    let mut confirm_error = None;
    if ctx.config.auto_confirm_purchase_orders {
        if let Err(err) = confirm(ctx, &mut record).await {
            confirm_error = Some(err.to_string());
        }
    }

    Ok(PurchasePush::Created {
        record,
        confirm_error,
    })
}

fn record_push(
    recorder: &mut RunRecorder<'_>,
    report: &mut PurchaseReport,
    invoice_name: &str,
    push: PurchasePush,
) {
    match push {
        PurchasePush::Created {
            record,
            confirm_error: None,
        } => {
            report.created += 1;
            let key = record.remote_id.to_string();
            if record.state == PurchaseState::Confirmed {
                report.confirmed += 1;
                recorder.synced(invoice_name, Some(&key), "purchase order created and confirmed");
            } else {
                recorder.synced(invoice_name, Some(&key), "purchase order created");
            }
        }
        PurchasePush::Created {
            record,
            confirm_error: Some(err),
        } => {
            report.created += 1;
            report.unconfirmed += 1;
            recorder.failed(
                invoice_name,
                Some(&record.remote_id.to_string()),
                format!("purchase order created but confirmation failed: {}", err),
            );
        }
        PurchasePush::Skipped { reason } => {
            report.skipped += 1;
            recorder.skipped(invoice_name, None, reason);
        }
    }
}

/// Push every posted customer invoice without a purchase record.
pub async fn push_pending(
    ctx: &SyncContext<'_>,
    recorder: &mut RunRecorder<'_>,
) -> Result<PurchaseReport> {
    let mut report = PurchaseReport::default();
    let invoices = ctx.store.invoices_pending_purchase(ctx.config.id)?;
    recorder.add_total(invoices.len() as u64);

    for invoice in invoices {
        if invoice.markers.is_remote_origin {
            report.skipped += 1;
            recorder.skipped(&invoice.name, None, "invoice came from a remote instance");
            continue;
        }
        match contain_item(push_invoice(ctx, invoice.id).await)? {
            Ok(push) => record_push(recorder, &mut report, &invoice.name, push),
            Err(err) => {
                report.failed += 1;
                recorder.failed(&invoice.name, None, err.to_string());
            }
        }
    }
    Ok(report)
}

/// Push one invoice and record it in its own run.
pub async fn push_recorded(ctx: &SyncContext<'_>, invoice_id: RecordId) -> Result<(PurchasePush, SyncRun)> {
    let invoice = ctx.store.invoice(invoice_id)?;
    let mut recorder = RunRecorder::start(ctx.store, ctx.config.id, RunSubject::Purchases, ctx.mode)?;
    recorder.add_total(1);

    match push_invoice(ctx, invoice_id).await {
        Ok(push) => {
            let mut report = PurchaseReport::default();
            record_push(&mut recorder, &mut report, &invoice.name, push.clone());
            let run = recorder.finish(None)?;
            Ok((push, run))
        }
        Err(err) => {
            recorder.failed(&invoice.name, None, err.to_string());
            recorder.finish(Some(&err))?;
            Err(err)
        }
    }
}

/// Confirm every remote order still in `Created` for this configuration.
pub async fn confirm_pending(
    ctx: &SyncContext<'_>,
    recorder: &mut RunRecorder<'_>,
) -> Result<PurchaseReport> {
    let mut report = PurchaseReport::default();
    let pending = ctx.store.unconfirmed_purchases(ctx.config.id)?;
    recorder.add_total(pending.len() as u64);

    for mut record in pending {
        let key = record.remote_id.to_string();
        match contain_item(confirm(ctx, &mut record).await)? {
            Ok(()) => {
                report.confirmed += 1;
                recorder.synced(&record.invoice_name, Some(&key), "purchase order confirmed");
            }
            Err(err) => {
                report.unconfirmed += 1;
                recorder.failed(&record.invoice_name, Some(&key), err.to_string());
            }
        }
    }
    Ok(report)
}
