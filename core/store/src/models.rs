//! Local business records and their sync markers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use omnisync_common::{RecordId, RemoteId};

/// Engine-owned attributes layered onto a syncable record.
///
/// A record with `is_remote_origin` set was created by an inbound sync and
/// must never be pushed back out. A record with `is_synced` set is not
/// re-submitted until it is explicitly reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMarkers {
    #[serde(default)]
    pub is_synced: bool,
    /// Human-readable identifier of the remote counterpart.
    #[serde(default)]
    pub remote_reference: Option<String>,
    #[serde(default)]
    pub is_remote_origin: bool,
}

impl SyncMarkers {
    /// Markers for a record created by an inbound sync.
    pub fn inbound(remote_reference: impl Into<String>) -> Self {
        Self {
            is_synced: true,
            remote_reference: Some(remote_reference.into()),
            is_remote_origin: true,
        }
    }

    /// Record a successful outbound push.
    pub fn mark_pushed(&mut self, remote_reference: impl Into<String>) {
        self.is_synced = true;
        self.remote_reference = Some(remote_reference.into());
    }

    /// Clear the synced state so the record can be pushed again.
    pub fn reset(&mut self) {
        self.is_synced = false;
        self.remote_reference = None;
    }
}

/// Product variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default)]
    pub id: RecordId,
    pub name: String,
    /// Internal reference; the only key products are matched on.
    #[serde(default)]
    pub default_code: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub list_price: f64,
    #[serde(default)]
    pub standard_price: f64,
    #[serde(default = "default_product_type")]
    pub product_type: String,
    #[serde(default)]
    pub brand: Option<String>,
    /// Main image, base64 encoded.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub markers: SyncMarkers,
}

fn default_product_type() -> String {
    "product".to_string()
}

impl Product {
    /// Create a product with the given name and reference code.
    pub fn new(name: impl Into<String>, default_code: Option<String>) -> Self {
        Self {
            name: name.into(),
            default_code,
            product_type: default_product_type(),
            ..Self::default()
        }
    }

    /// Reference code, if set and non-blank.
    pub fn code(&self) -> Option<&str> {
        self.default_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Check if an image is present.
    pub fn has_image(&self) -> bool {
        self.image.as_deref().is_some_and(|img| !img.is_empty())
    }
}

/// Contact data of a company or person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    pub name: String,
    #[serde(default)]
    pub vat: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Partner {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_vat(mut self, vat: impl Into<String>) -> Self {
        self.vat = Some(vat.into());
        self
    }
}

/// Scope a price rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedOn {
    #[serde(rename = "3_global")]
    Global,
    #[serde(rename = "2_product_category")]
    Category,
    #[serde(rename = "1_product")]
    Template,
    #[serde(rename = "0_product_variant")]
    Variant,
}

impl AppliedOn {
    /// Wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "3_global",
            Self::Category => "2_product_category",
            Self::Template => "1_product",
            Self::Variant => "0_product_variant",
        }
    }
}

/// One pricing rule of a price list.
///
/// Dependencies are held by their natural keys so they can be resolved on
/// the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceListItem {
    pub applied_on: AppliedOn,
    /// Variant reference code.
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub min_quantity: f64,
    /// `fixed`, `percentage` or `formula`.
    pub compute_price: String,
    #[serde(default)]
    pub fixed_price: f64,
    #[serde(default)]
    pub percent_price: f64,
    #[serde(default)]
    pub price_discount: f64,
    #[serde(default)]
    pub price_surcharge: f64,
    #[serde(default)]
    pub price_round: f64,
    #[serde(default)]
    pub price_min_margin: f64,
    #[serde(default)]
    pub price_max_margin: f64,
}

impl PriceListItem {
    /// Fixed price rule on every product.
    pub fn global_fixed(price: f64) -> Self {
        Self {
            applied_on: AppliedOn::Global,
            product_code: None,
            template_name: None,
            category_name: None,
            min_quantity: 0.0,
            compute_price: "fixed".to_string(),
            fixed_price: price,
            percent_price: 0.0,
            price_discount: 0.0,
            price_surcharge: 0.0,
            price_round: 0.0,
            price_min_margin: 0.0,
            price_max_margin: 0.0,
        }
    }

    /// Fixed price rule on one variant.
    pub fn variant_fixed(code: impl Into<String>, price: f64) -> Self {
        Self {
            applied_on: AppliedOn::Variant,
            product_code: Some(code.into()),
            ..Self::global_fixed(price)
        }
    }

    /// Short label used in the run ledger.
    pub fn label(&self) -> String {
        let target = self
            .product_code
            .as_deref()
            .or(self.template_name.as_deref())
            .or(self.category_name.as_deref())
            .unwrap_or("all products");
        format!("{} ({})", target, self.applied_on.as_str())
    }
}

/// A price list and its rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceList {
    #[serde(default)]
    pub id: RecordId,
    pub name: String,
    /// ISO currency code, matched on the remote by name.
    pub currency: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Only flagged lists are exported.
    #[serde(default)]
    pub sync_to_remote: bool,
    #[serde(default)]
    pub items: Vec<PriceListItem>,
    #[serde(default)]
    pub markers: SyncMarkers,
}

fn default_true() -> bool {
    true
}

impl PriceList {
    pub fn new(name: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            id: RecordId::default(),
            name: name.into(),
            currency: currency.into(),
            active: true,
            sync_to_remote: false,
            items: Vec::new(),
            markers: SyncMarkers::default(),
        }
    }
}

/// Sale order workflow state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    #[default]
    Draft,
    /// Confirmed.
    Sale,
    Cancel,
}

/// Per-line push result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSyncStatus {
    Synced,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaleOrderLine {
    #[serde(default)]
    pub product_code: Option<String>,
    pub description: String,
    pub quantity: f64,
    #[serde(default)]
    pub price_unit: f64,
    #[serde(default)]
    pub sync_status: Option<LineSyncStatus>,
}

impl SaleOrderLine {
    pub fn new(product_code: Option<&str>, description: impl Into<String>, quantity: f64) -> Self {
        Self {
            product_code: product_code.map(str::to_string),
            description: description.into(),
            quantity,
            ..Self::default()
        }
    }
}

/// Shipping label attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingDocument {
    pub filename: String,
    /// PDF content, base64 encoded.
    pub data: String,
}

/// Result kind of the last push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Synced,
    Skipped,
    Failed,
}

/// Structured outcome written back onto a sale order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub status: SummaryStatus,
    pub config_id: RecordId,
    #[serde(default)]
    pub remote_reference: Option<String>,
    #[serde(default)]
    pub remote_id: Option<RemoteId>,
    pub database: String,
    pub lines_synced: usize,
    pub synced_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaleOrder {
    #[serde(default)]
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub origin: Option<String>,
    pub date_order: DateTime<Utc>,
    #[serde(default)]
    pub state: OrderState,
    /// Contact of the company that owns the order.
    #[serde(default)]
    pub company_partner: Option<Partner>,
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub tracking_document: Option<TrackingDocument>,
    #[serde(default)]
    pub lines: Vec<SaleOrderLine>,
    #[serde(default)]
    pub amount_total: f64,
    #[serde(default)]
    pub markers: SyncMarkers,
    #[serde(default)]
    pub sync_summary: Option<SyncSummary>,
}

impl SaleOrder {
    pub fn new(name: impl Into<String>, company_partner: Partner) -> Self {
        Self {
            name: name.into(),
            date_order: Utc::now(),
            company_partner: Some(company_partner),
            ..Self::default()
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == OrderState::Sale
    }
}

/// Accounting move type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    #[default]
    OutInvoice,
    OutRefund,
    InInvoice,
    InRefund,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    #[serde(default)]
    pub product_code: Option<String>,
    pub description: String,
    pub quantity: f64,
    #[serde(default)]
    pub price_unit: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(default)]
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub move_type: InvoiceKind,
    #[serde(default)]
    pub posted: bool,
    #[serde(default)]
    pub partner: Option<Partner>,
    #[serde(default)]
    pub lines: Vec<InvoiceLine>,
    #[serde(default)]
    pub markers: SyncMarkers,
}

impl Invoice {
    /// Check if this is a customer invoice.
    pub fn is_customer_invoice(&self) -> bool {
        self.move_type == InvoiceKind::OutInvoice
    }
}

/// State of a remote purchase order created from an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    /// Exists remotely, not confirmed yet.
    Created,
    Confirmed,
}

/// Persistent trace of a purchase order pushed for an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseSyncRecord {
    #[serde(default)]
    pub id: RecordId,
    pub config_id: RecordId,
    pub invoice_id: RecordId,
    pub invoice_name: String,
    pub remote_id: RemoteId,
    pub state: PurchaseState,
    pub lines_synced: usize,
    /// Last confirmation failure, if any.
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl PurchaseSyncRecord {
    pub fn mark_confirmed(&mut self) {
        self.state = PurchaseState::Confirmed;
        self.error = None;
        self.confirmed_at = Some(Utc::now());
    }
}
