//! Price list push with full rule replacement.
//!
//! Remote rules of an exported list are deleted and recreated on every push.
//! A failed run after the delete can leave the remote list empty until the
//! next successful push.

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use omnisync_common::{Error, RemoteId, Result};
use omnisync_remote::Domain;
use omnisync_store::{PriceList, PriceListItem};

use super::{contain_item, SyncContext};
use crate::capability::Capabilities;
use crate::reconciler::MatchKeys;
use crate::recorder::RunRecorder;

const LIST_MODEL: &str = "product.pricelist";
const ITEM_MODEL: &str = "product.pricelist.item";
const CURRENCY_MODEL: &str = "res.currency";

/// Counters of one price list push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceListReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rules_created: usize,
    pub rules_skipped: usize,
}

struct ListPush {
    created: bool,
    rules_created: usize,
    rules_skipped: Vec<(String, String)>,
}

fn rule_values(item: &PriceListItem, remote_list: RemoteId) -> Map<String, Value> {
    let mut values = Map::new();
    values.insert("pricelist_id".into(), json!(remote_list.get()));
    values.insert("applied_on".into(), json!(item.applied_on.as_str()));
    values.insert("min_quantity".into(), json!(item.min_quantity));
    values.insert("compute_price".into(), json!(item.compute_price));
    values.insert("fixed_price".into(), json!(item.fixed_price));
    values.insert("percent_price".into(), json!(item.percent_price));
    values.insert("price_discount".into(), json!(item.price_discount));
    values.insert("price_surcharge".into(), json!(item.price_surcharge));
    values.insert("price_round".into(), json!(item.price_round));
    values.insert("price_min_margin".into(), json!(item.price_min_margin));
    values.insert("price_max_margin".into(), json!(item.price_max_margin));
    values
}

/// Resolve the rule's product, template and category on the remote side.
async fn resolve_rule(
    ctx: &SyncContext<'_>,
    item: &PriceListItem,
    values: &mut Map<String, Value>,
) -> Result<()> {
    let reconciler = ctx.reconciler();
    let dependencies = [
        ("product_id", "product.product", "default_code", item.product_code.as_deref()),
        ("product_tmpl_id", "product.template", "name", item.template_name.as_deref()),
        ("categ_id", "product.category", "name", item.category_name.as_deref()),
    ];

    for (field, model, key, value) in dependencies {
        let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        let keys = MatchKeys::new().key(key, Some(value));
        match reconciler.find_remote(model, &keys).await? {
            Some(id) => {
                values.insert(field.into(), json!(id.get()));
            }
            None => return Err(Error::unresolved(model, value)),
        }
    }
    Ok(())
}

async fn push_list(ctx: &SyncContext<'_>, list: &PriceList) -> Result<ListPush> {
    let reconciler = ctx.reconciler();

    let currency = reconciler
        .find_remote(CURRENCY_MODEL, &MatchKeys::name(&list.currency))
        .await?
        .ok_or_else(|| Error::unresolved(CURRENCY_MODEL, list.currency.as_str()))?;

    let capabilities = Capabilities::probe(ctx.remote, LIST_MODEL).await?;
    let header = capabilities
        .payload()
        .required("name", list.name.as_str())
        .required("currency_id", currency.get())
        .optional("active", list.active)
        // Keeps the remote copy from being exported back to us.
        .optional("sync_to_remote", false)
        .build()?;

    let (remote_list, created) = match reconciler
        .find_remote(LIST_MODEL, &MatchKeys::name(&list.name))
        .await?
    {
        Some(id) => {
            ctx.remote.write(LIST_MODEL, &[id], header).await?;
            (id, false)
        }
        None => (ctx.remote.create(LIST_MODEL, header).await?, true),
    };

    let stale = ctx
        .remote
        .search(ITEM_MODEL, &Domain::new().eq("pricelist_id", remote_list.get()), None)
        .await?;
    if !stale.is_empty() {
        debug!(list = %list.name, count = stale.len(), "Deleting remote rules");
        ctx.remote.unlink(ITEM_MODEL, &stale).await?;
    }

    let mut push = ListPush {
        created,
        rules_created: 0,
        rules_skipped: Vec::new(),
    };
    for item in &list.items {
        let mut values = rule_values(item, remote_list);
        match resolve_rule(ctx, item, &mut values).await {
            Ok(()) => {
                ctx.remote.create(ITEM_MODEL, values).await?;
                push.rules_created += 1;
            }
            Err(err @ Error::DependencyUnresolved { .. }) => {
                push.rules_skipped.push((item.label(), err.to_string()));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(push)
}

/// Push every local list flagged for export.
pub async fn push_price_lists(
    ctx: &SyncContext<'_>,
    recorder: &mut RunRecorder<'_>,
) -> Result<PriceListReport> {
    let mut report = PriceListReport::default();
    ctx.remote.probe(LIST_MODEL).await?;
    let lists = ctx.store.price_lists_for_export()?;
    recorder.add_total(lists.len() as u64);

    for mut list in lists {
        if list.markers.is_remote_origin {
            report.skipped += 1;
            recorder.skipped(&list.name, Some(&list.name), "list came from a remote instance");
            continue;
        }

        match contain_item(push_list(ctx, &list).await)? {
            Ok(push) => {
                if push.created {
                    report.created += 1;
                } else {
                    report.updated += 1;
                }
                report.rules_created += push.rules_created;
                report.rules_skipped += push.rules_skipped.len();
                for (rule, reason) in &push.rules_skipped {
                    recorder.skipped(format!("{} / {}", list.name, rule), Some(&list.name), reason);
                }
                recorder.synced(
                    &list.name,
                    Some(&list.name),
                    format!(
                        "{} {} rules, {} skipped",
                        if push.created { "created with" } else { "replaced with" },
                        push.rules_created,
                        push.rules_skipped.len()
                    ),
                );

                list.markers.mark_pushed(list.name.clone());
                ctx.store.update(&list)?;
            }
            Err(err) => {
                report.failed += 1;
                recorder.failed(&list.name, Some(&list.name), err.to_string());
            }
        }
    }

    info!(
        config = %ctx.config.name,
        created = report.created,
        updated = report.updated,
        rules = report.rules_created,
        "Price list push finished"
    );
    Ok(report)
}
