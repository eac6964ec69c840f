//! # Report Aggregations
//!
//! Pure rollups over ledger snapshots. The reporting engine fetches
//! medicines, batches and sales without locks and hands the slices to the
//! functions here, so every report is a deterministic function of
//! `(snapshot, today, parameters)`.
//!
//! ## Reports
//! ```text
//! ┌────────────────┬──────────────────────────────────────────────────────┐
//! │ valuation      │ Σ qty × purchase price over unexpired batches        │
//! │ low_stock      │ unexpired on-hand < reorder level (level 0 ignored)  │
//! │ expiring       │ today ≤ expiry ≤ today+horizon  vs  expiry < today   │
//! │ turnover       │ daily sales rate ÷ average stock, trailing window    │
//! │ summary        │ dashboard counters                                   │
//! │ sales_trends   │ per-day and per-month quantity / revenue             │
//! │ stock_analysis │ 30/90-day expiry exposure, top medicines by value    │
//! └────────────────┴──────────────────────────────────────────────────────┘
//! ```
//!
//! Missing data aggregates to zero. No function here returns an error for
//! sparse input.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{Medicine, SaleRecord, StockBatch};

// =============================================================================
// Report Kind & Parameters
// =============================================================================

/// Which report to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Valuation,
    LowStock,
    Expiring,
    Turnover,
    Summary,
    SalesTrends,
    StockAnalysis,
}

impl ReportKind {
    pub const ALL: [ReportKind; 7] = [
        ReportKind::Valuation,
        ReportKind::LowStock,
        ReportKind::Expiring,
        ReportKind::Turnover,
        ReportKind::Summary,
        ReportKind::SalesTrends,
        ReportKind::StockAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Valuation => "valuation",
            ReportKind::LowStock => "low_stock",
            ReportKind::Expiring => "expiring",
            ReportKind::Turnover => "turnover",
            ReportKind::Summary => "summary",
            ReportKind::SalesTrends => "sales_trends",
            ReportKind::StockAnalysis => "stock_analysis",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts snake_case or kebab-case names ("low_stock", "sales-trends").
impl FromStr for ReportKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ReportKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "report".to_string(),
                reason: format!("unknown report kind '{s}'"),
            })
    }
}

/// Optional per-request overrides. Unset fields fall back to the engine's
/// configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReportParams {
    /// Expiring-soon horizon in days.
    pub horizon_days: Option<i64>,
    /// Trailing window in days (turnover and sales trends).
    pub window_days: Option<i64>,
    /// Number of ranked rows kept.
    pub top_n: Option<usize>,
}

impl ReportParams {
    pub fn with_horizon(mut self, days: i64) -> Self {
        self.horizon_days = Some(days);
        self
    }

    pub fn with_window(mut self, days: i64) -> Self {
        self.window_days = Some(days);
        self
    }

    pub fn with_top_n(mut self, n: usize) -> Self {
        self.top_n = Some(n);
        self
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn medicine_names(medicines: &[Medicine]) -> HashMap<&str, &str> {
    medicines
        .iter()
        .map(|m| (m.id.as_str(), m.name.as_str()))
        .collect()
}

/// Units on hand per medicine. `only_unexpired` drops batches past expiry.
fn on_hand_by_medicine(
    batches: &[StockBatch],
    today: NaiveDate,
    only_unexpired: bool,
) -> HashMap<&str, i64> {
    let mut totals: HashMap<&str, i64> = HashMap::new();
    for batch in batches {
        if only_unexpired && batch.is_expired(today) {
            continue;
        }
        *totals.entry(batch.medicine_id.as_str()).or_default() += batch.quantity;
    }
    totals
}

/// Units sold per medicine with `from <= sale_date <= to`.
fn sold_by_medicine(sales: &[SaleRecord], from: NaiveDate, to: NaiveDate) -> HashMap<&str, i64> {
    let mut totals: HashMap<&str, i64> = HashMap::new();
    for sale in sales.iter().filter(|s| s.sale_date >= from && s.sale_date <= to) {
        *totals.entry(sale.medicine_id.as_str()).or_default() += sale.quantity;
    }
    totals
}

// =============================================================================
// Valuation
// =============================================================================

/// Stock value of one medicine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MedicineValuation {
    pub medicine_id: String,
    pub name: String,
    pub batch_count: usize,
    pub quantity: i64,
    pub value: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ValuationReport {
    #[ts(as = "String")]
    pub as_of: NaiveDate,
    pub total_quantity: i64,
    pub total_value: Money,
    /// Sorted by value, highest first.
    pub medicines: Vec<MedicineValuation>,
}

/// Values every unexpired batch at its purchase price.
///
/// Batches whose medicine is missing from `medicines` are still counted and
/// listed under their id.
pub fn valuation(medicines: &[Medicine], batches: &[StockBatch], today: NaiveDate) -> ValuationReport {
    let names = medicine_names(medicines);
    let mut groups: BTreeMap<&str, MedicineValuation> = BTreeMap::new();

    for batch in batches.iter().filter(|b| !b.is_expired(today)) {
        let entry = groups
            .entry(batch.medicine_id.as_str())
            .or_insert_with(|| MedicineValuation {
                medicine_id: batch.medicine_id.clone(),
                name: names
                    .get(batch.medicine_id.as_str())
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| batch.medicine_id.clone()),
                batch_count: 0,
                quantity: 0,
                value: Money::zero(),
            });
        entry.batch_count += 1;
        entry.quantity += batch.quantity;
        entry.value += batch.stock_value();
    }

    let mut rows: Vec<MedicineValuation> = groups.into_values().collect();
    rows.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)));

    ValuationReport {
        as_of: today,
        total_quantity: rows.iter().map(|r| r.quantity).sum(),
        total_value: rows.iter().map(|r| r.value).sum(),
        medicines: rows,
    }
}

// =============================================================================
// Low Stock
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LowStockItem {
    pub medicine_id: String,
    pub name: String,
    /// Units in unexpired batches.
    pub on_hand: i64,
    pub reorder_level: i64,
    pub shortfall: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LowStockReport {
    #[ts(as = "String")]
    pub as_of: NaiveDate,
    /// Largest shortfall first.
    pub items: Vec<LowStockItem>,
}

/// Medicines whose sellable stock has fallen below their reorder level.
/// A reorder level of 0 disables tracking for that medicine.
pub fn low_stock(medicines: &[Medicine], batches: &[StockBatch], today: NaiveDate) -> LowStockReport {
    let on_hand = on_hand_by_medicine(batches, today, true);

    let mut items: Vec<LowStockItem> = medicines
        .iter()
        .filter(|m| m.tracks_reorder())
        .filter_map(|m| {
            let qty = on_hand.get(m.id.as_str()).copied().unwrap_or(0);
            (qty < m.reorder_level).then(|| LowStockItem {
                medicine_id: m.id.clone(),
                name: m.name.clone(),
                on_hand: qty,
                reorder_level: m.reorder_level,
                shortfall: m.reorder_level - qty,
            })
        })
        .collect();

    items.sort_by(|a, b| b.shortfall.cmp(&a.shortfall).then_with(|| a.name.cmp(&b.name)));

    LowStockReport { as_of: today, items }
}

// =============================================================================
// Expiry Buckets
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExpiryEntry {
    pub batch_id: String,
    pub medicine_id: String,
    pub medicine_name: String,
    pub batch_number: String,
    #[ts(as = "String")]
    pub expiry_date: NaiveDate,
    pub days_until_expiry: i64,
    pub quantity: i64,
    pub value: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExpiryBucket {
    pub batch_count: usize,
    pub quantity: i64,
    pub value: Money,
    /// Soonest expiry first.
    pub batches: Vec<ExpiryEntry>,
}

impl ExpiryBucket {
    fn push(&mut self, entry: ExpiryEntry) {
        self.batch_count += 1;
        self.quantity += entry.quantity;
        self.value += entry.value;
        self.batches.push(entry);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExpiryReport {
    #[ts(as = "String")]
    pub as_of: NaiveDate,
    pub horizon_days: i64,
    pub expiring_soon: ExpiryBucket,
    pub expired: ExpiryBucket,
}

/// Splits batches into "expiring within the horizon" and "already expired".
///
/// Empty batches are included: a zero-quantity expired lot is still a
/// record to clear.
pub fn expiring(
    medicines: &[Medicine],
    batches: &[StockBatch],
    today: NaiveDate,
    horizon_days: i64,
) -> ExpiryReport {
    let names = medicine_names(medicines);
    let horizon_end = today + Duration::days(horizon_days);

    let mut sorted: Vec<&StockBatch> = batches.iter().collect();
    sorted.sort_by(|a, b| crate::allocation::fefo_order(a, b));

    let mut expiring_soon = ExpiryBucket::default();
    let mut expired = ExpiryBucket::default();

    for batch in sorted {
        let entry = || ExpiryEntry {
            batch_id: batch.id.clone(),
            medicine_id: batch.medicine_id.clone(),
            medicine_name: names
                .get(batch.medicine_id.as_str())
                .map(|n| n.to_string())
                .unwrap_or_default(),
            batch_number: batch.batch_number.clone(),
            expiry_date: batch.expiry_date,
            days_until_expiry: batch.days_until_expiry(today),
            quantity: batch.quantity,
            value: batch.stock_value(),
        };

        if batch.expiry_date < today {
            expired.push(entry());
        } else if batch.expiry_date <= horizon_end {
            expiring_soon.push(entry());
        }
    }

    ExpiryReport {
        as_of: today,
        horizon_days,
        expiring_soon,
        expired,
    }
}

// =============================================================================
// Turnover
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TurnoverItem {
    pub medicine_id: String,
    pub name: String,
    pub sold_in_window: i64,
    /// Units per day over the window, 2 decimals.
    pub daily_sales_rate: f64,
    /// Mean of opening and closing stock, 2 decimals.
    pub average_stock_level: f64,
    /// `daily_sales_rate / average_stock_level`, 4 decimals; 0 when the
    /// average is 0.
    pub turnover_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TurnoverReport {
    #[ts(as = "String")]
    pub from: NaiveDate,
    #[ts(as = "String")]
    pub to: NaiveDate,
    pub window_days: i64,
    /// Fastest movers first.
    pub items: Vec<TurnoverItem>,
}

/// First day of a trailing window of `days` days that ends on `today`
/// (inclusive at both ends).
pub fn window_start(today: NaiveDate, days: i64) -> NaiveDate {
    today - Duration::days(days - 1)
}

/// Ranks medicines by how fast their stock moves.
///
/// The window covers exactly `window_days` calendar days ending today, so
/// `sold_in_window` and the divisor describe the same span.
///
/// Stock history is not kept, so the window's opening stock is rebuilt as
/// current on-hand plus what was sold inside the window:
/// ```text
/// closing = Σ batch.quantity (all batches, now)
/// opening = closing + sold_in_window
/// average = (opening + closing) / 2
/// ```
/// Restocks inside the window are not subtracted back out.
pub fn turnover(
    medicines: &[Medicine],
    batches: &[StockBatch],
    sales: &[SaleRecord],
    today: NaiveDate,
    window_days: i64,
    top_n: usize,
) -> TurnoverReport {
    let from = window_start(today, window_days);
    let sold = sold_by_medicine(sales, from, today);
    let on_hand = on_hand_by_medicine(batches, today, false);

    let mut items: Vec<TurnoverItem> = medicines
        .iter()
        .map(|m| {
            let sold_in_window = sold.get(m.id.as_str()).copied().unwrap_or(0);
            let closing = on_hand.get(m.id.as_str()).copied().unwrap_or(0);
            let opening = closing + sold_in_window;

            let daily_rate = if window_days > 0 {
                sold_in_window as f64 / window_days as f64
            } else {
                0.0
            };
            let average = (opening + closing) as f64 / 2.0;
            let rate = if average > 0.0 { daily_rate / average } else { 0.0 };

            TurnoverItem {
                medicine_id: m.id.clone(),
                name: m.name.clone(),
                sold_in_window,
                daily_sales_rate: round_to(daily_rate, 2),
                average_stock_level: round_to(average, 2),
                turnover_rate: round_to(rate, 4),
            }
        })
        .collect();

    items.sort_by(|a, b| {
        b.turnover_rate
            .total_cmp(&a.turnover_rate)
            .then_with(|| a.name.cmp(&b.name))
    });
    items.truncate(top_n);

    TurnoverReport {
        from,
        to: today,
        window_days,
        items,
    }
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FastMover {
    pub medicine_id: String,
    pub name: String,
    pub quantity_sold: i64,
}

/// Dashboard counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SummaryReport {
    #[ts(as = "String")]
    pub as_of: NaiveDate,
    /// Batches expiring within the next 30 days (today included).
    pub expiring_soon: usize,
    /// Batches already past expiry.
    pub expired: usize,
    /// Medicines out of stock or below their reorder level.
    pub below_reorder: usize,
    /// Cost value of every batch on the shelf, expired ones included.
    pub total_stock_value: Money,
    /// Units sold in the last 30 days.
    pub monthly_sales_qty: i64,
    pub top_fast_moving: Vec<FastMover>,
}

/// Trailing window for the summary's sales counters and expiring-soon count.
pub const SUMMARY_WINDOW_DAYS: i64 = 30;
const SUMMARY_TOP_N: usize = 5;

/// Dashboard counters. Shelf totals here count every batch, expired ones
/// included, since they are still physically on hand.
pub fn summary(
    medicines: &[Medicine],
    batches: &[StockBatch],
    sales: &[SaleRecord],
    today: NaiveDate,
) -> SummaryReport {
    let soon = today + Duration::days(SUMMARY_WINDOW_DAYS);
    let expiring_soon = batches
        .iter()
        .filter(|b| b.expiry_date >= today && b.expiry_date <= soon)
        .count();
    let expired = batches.iter().filter(|b| b.is_expired(today)).count();

    let on_hand = on_hand_by_medicine(batches, today, false);
    let below_reorder = medicines
        .iter()
        .filter(|m| {
            let qty = on_hand.get(m.id.as_str()).copied().unwrap_or(0);
            qty <= 0 || qty < m.reorder_level
        })
        .count();

    let total_stock_value = batches.iter().map(StockBatch::stock_value).sum();

    let from = today - Duration::days(SUMMARY_WINDOW_DAYS);
    let sold = sold_by_medicine(sales, from, today);
    let monthly_sales_qty = sold.values().sum();

    let names = medicine_names(medicines);
    let mut top_fast_moving: Vec<FastMover> = sold
        .into_iter()
        .map(|(id, qty)| FastMover {
            medicine_id: id.to_string(),
            name: names.get(id).map(|n| n.to_string()).unwrap_or_default(),
            quantity_sold: qty,
        })
        .collect();
    top_fast_moving.sort_by(|a, b| {
        b.quantity_sold
            .cmp(&a.quantity_sold)
            .then_with(|| a.name.cmp(&b.name))
    });
    top_fast_moving.truncate(SUMMARY_TOP_N);

    SummaryReport {
        as_of: today,
        expiring_soon,
        expired,
        below_reorder,
        total_stock_value,
        monthly_sales_qty,
        top_fast_moving,
    }
}

// =============================================================================
// Sales Trends
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TrendPoint {
    /// `YYYY-MM-DD` for daily points, `YYYY-MM` for monthly points.
    pub period: String,
    pub transaction_count: usize,
    pub total_quantity: i64,
    pub total_revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SalesTrendReport {
    #[ts(as = "String")]
    pub from: NaiveDate,
    #[ts(as = "String")]
    pub to: NaiveDate,
    /// Days with at least one sale, oldest first.
    pub daily: Vec<TrendPoint>,
    /// Months with at least one sale, oldest first.
    pub monthly: Vec<TrendPoint>,
}

/// Per-day and per-month sales totals over the trailing `days`.
pub fn sales_trends(sales: &[SaleRecord], today: NaiveDate, days: i64) -> SalesTrendReport {
    let from = today - Duration::days(days);

    let mut daily: BTreeMap<NaiveDate, TrendPoint> = BTreeMap::new();
    let mut monthly: BTreeMap<(i32, u32), TrendPoint> = BTreeMap::new();

    let empty = |period: String| TrendPoint {
        period,
        transaction_count: 0,
        total_quantity: 0,
        total_revenue: Money::zero(),
    };

    for sale in sales.iter().filter(|s| s.sale_date >= from && s.sale_date <= today) {
        let date = sale.sale_date;
        for point in [
            daily
                .entry(date)
                .or_insert_with(|| empty(date.format("%Y-%m-%d").to_string())),
            monthly
                .entry((date.year(), date.month()))
                .or_insert_with(|| empty(format!("{:04}-{:02}", date.year(), date.month()))),
        ] {
            point.transaction_count += 1;
            point.total_quantity += sale.quantity;
            point.total_revenue += sale.line_total();
        }
    }

    SalesTrendReport {
        from,
        to: today,
        daily: daily.into_values().collect(),
        monthly: monthly.into_values().collect(),
    }
}

// =============================================================================
// Stock Analysis
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExpiryExposure {
    pub quantity: i64,
    pub value: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockAnalysisReport {
    #[ts(as = "String")]
    pub as_of: NaiveDate,
    pub expiring_30_days: ExpiryExposure,
    pub expiring_90_days: ExpiryExposure,
    pub top_medicines_by_value: Vec<MedicineValuation>,
}

const STOCK_ANALYSIS_TOP_N: usize = 10;

/// Expiry exposure over the next 30 and 90 days plus the most valuable
/// medicines on the shelf.
pub fn stock_analysis(
    medicines: &[Medicine],
    batches: &[StockBatch],
    today: NaiveDate,
) -> StockAnalysisReport {
    let exposure = |days: i64| {
        let end = today + Duration::days(days);
        batches
            .iter()
            .filter(|b| b.expiry_date >= today && b.expiry_date <= end)
            .fold(ExpiryExposure::default(), |mut acc, b| {
                acc.quantity += b.quantity;
                acc.value += b.stock_value();
                acc
            })
    };

    let mut top = valuation(medicines, batches, today).medicines;
    top.truncate(STOCK_ANALYSIS_TOP_N);

    StockAnalysisReport {
        as_of: today,
        expiring_30_days: exposure(30),
        expiring_90_days: exposure(90),
        top_medicines_by_value: top,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
