//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;

use omnisync_common::{Endpoint, EntityKind, RecordId, RemoteId, Secret};
use omnisync_remote::MemoryRemote;
use omnisync_store::{
    EntityFlags, Invoice, InvoiceLine, Partner, Product, SaleOrder, SaleOrderLine, Store,
    SyncConfiguration,
};
use omnisync_sync::Orchestrator;

pub const DB: &str = "remote_db";
pub const USER: &str = "sync";
pub const PASSWORD: &str = "secret";

pub const SALE_ORDER_FIELDS: &[&str] = &[
    "name",
    "partner_id",
    "origin",
    "date_order",
    "order_line",
    "state",
];

/// A remote instance with the sales, purchase and pricing modules installed.
pub fn remote() -> MemoryRemote {
    let remote = MemoryRemote::new(DB, USER, PASSWORD);
    remote
        .define_model(
            "product.product",
            &[
                "name",
                "default_code",
                "barcode",
                "list_price",
                "standard_price",
                "type",
                "active",
                "image_1920",
                "product_brand_id",
            ],
        )
        .define_model("product.template", &["name"])
        .define_model("product.category", &["name"])
        .define_model(
            "res.partner",
            &[
                "name",
                "vat",
                "street",
                "city",
                "phone",
                "email",
                "is_company",
                "supplier_rank",
                "company_type",
            ],
        )
        .define_model("res.currency", &["name"])
        .define_model("product.pricelist", &["name", "currency_id", "active", "sync_to_remote"])
        .define_model(
            "product.pricelist.item",
            &[
                "pricelist_id",
                "applied_on",
                "min_quantity",
                "compute_price",
                "fixed_price",
                "percent_price",
                "price_discount",
                "price_surcharge",
                "price_round",
                "price_min_margin",
                "price_max_margin",
                "product_id",
                "product_tmpl_id",
                "categ_id",
            ],
        )
        .define_model("sale.order", SALE_ORDER_FIELDS)
        .define_model(
            "sale.order",
            &[
                "is_remote_order",
                "meli_tracking_pdf",
                "meli_tracking_filename",
                "campaign_id",
            ],
        )
        .define_model("sale.order.line", &["order_id", "product_id", "product_uom_qty", "name"])
        .define_model("utm.campaign", &["name"])
        .define_model(
            "purchase.order",
            &["name", "partner_id", "partner_ref", "order_line", "origin", "state"],
        )
        .define_model(
            "purchase.order.line",
            &["order_id", "name", "product_id", "product_qty", "price_unit", "date_planned"],
        );
    remote.insert("res.currency", json!({ "name": "USD" }));
    remote
}

pub fn endpoint() -> Endpoint {
    Endpoint::new("https://remote.example.com", DB, USER, Secret::new(PASSWORD))
}

pub fn flags(kinds: &[EntityKind]) -> EntityFlags {
    let mut flags = EntityFlags {
        images: false,
        ..EntityFlags::default()
    };
    for kind in kinds {
        flags.set(*kind, true);
    }
    flags
}

/// Store a configuration with only `kinds` enabled.
pub fn configuration(store: &Store, name: &str, kinds: &[EntityKind]) -> SyncConfiguration {
    let mut config = SyncConfiguration::new(name, endpoint());
    config.flags = flags(kinds);
    store.add_configuration(config).unwrap()
}

pub fn orchestrator(store: &Arc<Store>, remote: &MemoryRemote) -> Orchestrator<MemoryRemote> {
    Orchestrator::new(store.clone(), remote.clone())
}

pub fn remote_product(remote: &MemoryRemote, code: &str, name: &str) -> RemoteId {
    remote.insert(
        "product.product",
        json!({
            "name": name,
            "default_code": code,
            "active": true,
            "list_price": 12.5,
            "standard_price": 7.0,
            "type": "product",
        }),
    )
}

pub fn local_product(store: &Store, code: &str, name: &str) -> Product {
    store
        .insert(Product::new(name, Some(code.to_string())))
        .unwrap()
}

pub fn company() -> Partner {
    let mut partner = Partner::new("Acme Hardware").with_vat("AR30712345678");
    partner.city = Some("Rosario".to_string());
    partner
}

/// Confirmed order with one line per code.
pub fn confirmed_order(store: &Store, name: &str, codes: &[&str]) -> SaleOrder {
    let mut order = SaleOrder::new(name, company());
    order.state = omnisync_store::OrderState::Sale;
    order.amount_total = 100.0;
    order.lines = codes
        .iter()
        .map(|code| SaleOrderLine::new(Some(code), format!("Item {}", code), 2.0))
        .collect();
    store.insert(order).unwrap()
}

/// Unposted customer invoice with one line per code.
pub fn customer_invoice(store: &Store, name: &str, codes: &[&str]) -> Invoice {
    let invoice = Invoice {
        name: name.to_string(),
        partner: Some(company()),
        lines: codes
            .iter()
            .map(|code| InvoiceLine {
                product_code: Some(code.to_string()),
                description: format!("Item {}", code),
                quantity: 3.0,
                price_unit: 9.5,
            })
            .collect(),
        ..Invoice::default()
    };
    store.insert(invoice).unwrap()
}

/// Values of the first `create` call on `model`.
pub fn created_values(remote: &MemoryRemote, model: &str) -> serde_json::Map<String, Value> {
    remote.calls_to(model, "create")[0].args[0]
        .as_object()
        .cloned()
        .unwrap()
}

pub fn id(value: i64) -> RecordId {
    RecordId::new(value)
}
