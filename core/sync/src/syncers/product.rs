//! Product pull.
//!
//! Pages through the remote catalog and matches each item on its reference
//! code. Items without a code are skipped: they cannot be matched and would
//! risk duplicate creation.

use serde_json::{Map, Value};
use tracing::{debug, info};

use omnisync_common::Result;
use omnisync_remote::{Domain, Page};
use omnisync_store::{Product, SyncMarkers};

use super::{contain_item, SyncContext};
use crate::recorder::RunRecorder;

const MODEL: &str = "product.product";
const FIELDS: &[&str] = &[
    "name",
    "default_code",
    "barcode",
    "list_price",
    "standard_price",
    "type",
];

/// Counters of one product pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductPullReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Applied {
    Created,
    Updated,
    Unchanged,
}

fn text(record: &Map<String, Value>, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number(record: &Map<String, Value>, field: &str) -> f64 {
    record.get(field).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Copy the remote business fields onto `product`. Returns whether anything changed.
fn apply_remote(product: &mut Product, record: &Map<String, Value>, code: &str) -> bool {
    let before = product.clone();
    product.name = text(record, "name").unwrap_or_else(|| code.to_string());
    product.default_code = Some(code.to_string());
    product.barcode = text(record, "barcode");
    product.list_price = number(record, "list_price");
    product.standard_price = number(record, "standard_price");
    product.product_type = text(record, "type").unwrap_or_else(|| "product".to_string());
    *product != before
}

fn apply_one(ctx: &SyncContext<'_>, record: &Map<String, Value>, code: &str) -> Result<Applied> {
    match ctx.store.product_by_code(code)? {
        Some(mut local) => {
            if apply_remote(&mut local, record, code) {
                ctx.store.update(&local)?;
                Ok(Applied::Updated)
            } else {
                Ok(Applied::Unchanged)
            }
        }
        None => {
            let mut product = Product::new(code, Some(code.to_string()));
            apply_remote(&mut product, record, code);
            product.markers = SyncMarkers::inbound(code);
            ctx.store.insert(product)?;
            Ok(Applied::Created)
        }
    }
}

/// Pull active remote products into the local store.
pub async fn pull_products(
    ctx: &SyncContext<'_>,
    recorder: &mut RunRecorder<'_>,
) -> Result<ProductPullReport> {
    let mut report = ProductPullReport::default();
    let domain = Domain::new().eq("active", true);
    let mut page = Page::first(ctx.config.batch_size.max(1));

    loop {
        let records = ctx.remote.search_read(MODEL, &domain, FIELDS, Some(page)).await?;
        if records.is_empty() {
            break;
        }
        debug!(offset = page.offset, count = records.len(), "Fetched product page");
        recorder.add_total(records.len() as u64);

        for record in &records {
            let name = text(record, "name").unwrap_or_default();
            let Some(code) = text(record, "default_code") else {
                report.skipped += 1;
                recorder.skipped(name, None, "no reference code");
                continue;
            };

            match contain_item(apply_one(ctx, record, &code))? {
                Ok(Applied::Created) => {
                    report.created += 1;
                    recorder.synced(name, Some(&code), "created locally");
                }
                Ok(Applied::Updated) => {
                    report.updated += 1;
                    recorder.synced(name, Some(&code), "updated");
                }
                Ok(Applied::Unchanged) => {
                    report.unchanged += 1;
                    recorder.synced(name, Some(&code), "up to date");
                }
                Err(err) => {
                    report.failed += 1;
                    recorder.failed(name, Some(&code), err.to_string());
                }
            }
        }

        page = page.next();
    }

    info!(
        config = %ctx.config.name,
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        skipped = report.skipped,
        "Product pull finished"
    );
    Ok(report)
}
