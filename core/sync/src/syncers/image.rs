//! Image pull, one run per brand.
//!
//! Local images are never overwritten. Every skip carries its own reason so
//! the ledger shows why a product was left alone.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{info, warn};

use omnisync_common::{Error, Result};
use omnisync_remote::{Domain, Page};
use omnisync_store::{is_all_brands, RunCounts, RunSubject, SyncRun};

use super::{contain_item, SyncContext};
use crate::recorder::RunRecorder;

const MODEL: &str = "product.product";
const FIELDS: &[&str] = &["id", "default_code", "image_1920", "name"];
const BRAND_FIELD: &str = "product_brand_id.name";

pub const NO_CODE: &str = "no reference code";
pub const NO_REMOTE_IMAGE: &str = "no image on remote";
pub const NOT_FOUND_LOCALLY: &str = "not found locally";
pub const ALREADY_HAS_IMAGE: &str = "local image already present";

/// Result of an image sync over one or more brands.
#[derive(Debug, Clone, Default)]
pub struct ImageReport {
    pub runs: Vec<SyncRun>,
    pub elapsed_secs: f64,
}

impl ImageReport {
    pub fn synced(&self) -> u64 {
        self.runs.iter().map(|r| r.counts.synced).sum()
    }

    /// Counters summed over every brand run.
    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for run in &self.runs {
            counts += run.counts;
        }
        counts
    }

    pub fn failed_brands(&self) -> Vec<&SyncRun> {
        self.runs.iter().filter(|r| r.error.is_some()).collect()
    }
}

fn text<'r>(record: &'r Map<String, Value>, field: &str) -> Option<&'r str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn brand_domain(brand: &str) -> Domain {
    if is_all_brands(brand) {
        Domain::new()
    } else {
        Domain::new().eq(BRAND_FIELD, brand.trim())
    }
}

enum Copied {
    Synced,
    Skipped(&'static str),
}

fn copy_image(ctx: &SyncContext<'_>, code: &str, payload: &str) -> Result<Copied> {
    let Some(mut local) = ctx.store.product_by_code(code)? else {
        return Ok(Copied::Skipped(NOT_FOUND_LOCALLY));
    };
    if local.has_image() {
        return Ok(Copied::Skipped(ALREADY_HAS_IMAGE));
    }
    STANDARD
        .decode(payload)
        .map_err(|e| Error::InvalidInput(format!("image payload is not valid base64: {}", e)))?;

    local.image = Some(payload.to_string());
    ctx.store.update(&local)?;
    Ok(Copied::Synced)
}

async fn sync_brand(
    ctx: &SyncContext<'_>,
    brand: &str,
    recorder: &mut RunRecorder<'_>,
) -> Result<()> {
    let domain = brand_domain(brand);
    let mut page = Page::first(ctx.config.batch_size.max(1));

    loop {
        let records = ctx.remote.search_read(MODEL, &domain, FIELDS, Some(page)).await?;
        if records.is_empty() {
            return Ok(());
        }
        recorder.add_total(records.len() as u64);

        for record in &records {
            let name = text(record, "name").unwrap_or_default();
            let Some(code) = text(record, "default_code") else {
                recorder.skipped(name, None, NO_CODE);
                continue;
            };
            let Some(payload) = text(record, "image_1920") else {
                recorder.skipped(name, Some(code), NO_REMOTE_IMAGE);
                continue;
            };

            match contain_item(copy_image(ctx, code, payload))? {
                Ok(Copied::Synced) => recorder.synced(name, Some(code), "image copied"),
                Ok(Copied::Skipped(reason)) => recorder.skipped(name, Some(code), reason),
                Err(err) => recorder.failed(name, Some(code), err.to_string()),
            }
        }

        page = page.next();
    }
}

/// Copy remote images for each brand, recording one run per brand.
///
/// A brand that fails is recorded as a failed run and the next brand still
/// runs. Only ledger write failures abort the whole call.
pub async fn sync_images(ctx: &SyncContext<'_>, brands: &[String]) -> Result<ImageReport> {
    if !ctx.config.flags.images {
        return Err(Error::InvalidInput(format!(
            "Image sync is not enabled for '{}'",
            ctx.config.name
        )));
    }

    let started = Instant::now();
    let mut report = ImageReport::default();

    for brand in brands {
        let mut recorder = RunRecorder::start(
            ctx.store,
            ctx.config.id,
            RunSubject::Images {
                brand: brand.clone(),
            },
            ctx.mode,
        )?;

        let result = sync_brand(ctx, brand, &mut recorder).await;
        if let Err(err) = &result {
            warn!(config = %ctx.config.name, brand = %brand, error = %err, "Image sync failed for brand");
        }
        let run = recorder.finish(result.as_ref().err())?;
        info!(
            config = %ctx.config.name,
            brand = %brand,
            synced = run.counts.synced,
            skipped = run.counts.skipped,
            "Image sync finished for brand"
        );
        report.runs.push(run);
    }

    report.elapsed_secs = started.elapsed().as_secs_f64();
    Ok(report)
}
