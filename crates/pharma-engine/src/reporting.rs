//! # Reporting Engine
//!
//! Read-only aggregates over medicines, batches and sales.
//!
//! Each report takes one unlocked snapshot of what it needs from the
//! ledger and hands it to the pure report functions in
//! `pharma_core::report`. Reports running next to live sales may see a
//! batch decremented before its sale record is visible to a later query;
//! no cross-query consistency is promised.

use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::config::ReportSettings;
use crate::error::EngineResult;
use pharma_core::report::{
    self, ExpiryReport, LowStockReport, ReportKind, ReportParams, SalesTrendReport,
    StockAnalysisReport, SummaryReport, TurnoverReport, ValuationReport, SUMMARY_WINDOW_DAYS,
};
use pharma_core::validation::validate_window_days;
use pharma_core::{ValidationError, MAX_REPORT_WINDOW_DAYS};
use pharma_db::StockLedger;

/// Produces inventory reports from a stock ledger.
#[derive(Clone)]
pub struct ReportingEngine {
    ledger: Arc<dyn StockLedger>,
    clock: Arc<dyn Clock>,
    settings: ReportSettings,
}

impl ReportingEngine {
    pub fn new(ledger: Arc<dyn StockLedger>, clock: Arc<dyn Clock>, settings: ReportSettings) -> Self {
        ReportingEngine {
            ledger,
            clock,
            settings,
        }
    }

    /// Produces any report as JSON.
    #[instrument(skip_all, fields(kind = %kind))]
    pub async fn report(&self, kind: ReportKind, params: &ReportParams) -> EngineResult<serde_json::Value> {
        let value = match kind {
            ReportKind::Valuation => to_json(self.valuation().await?)?,
            ReportKind::LowStock => to_json(self.low_stock().await?)?,
            ReportKind::Expiring => to_json(self.expiring(params).await?)?,
            ReportKind::Turnover => to_json(self.turnover(params).await?)?,
            ReportKind::Summary => to_json(self.summary().await?)?,
            ReportKind::SalesTrends => to_json(self.sales_trends(params).await?)?,
            ReportKind::StockAnalysis => to_json(self.stock_analysis().await?)?,
        };

        debug!(kind = %kind, "Report produced");
        Ok(value)
    }

    /// Stock value of every unexpired batch at purchase price.
    pub async fn valuation(&self) -> EngineResult<ValuationReport> {
        let medicines = self.ledger.list_medicines().await?;
        let batches = self.ledger.list_batches().await?;
        Ok(report::valuation(&medicines, &batches, self.clock.today()))
    }

    /// Medicines whose unexpired stock is below their reorder level.
    pub async fn low_stock(&self) -> EngineResult<LowStockReport> {
        let medicines = self.ledger.list_medicines().await?;
        let batches = self.ledger.list_batches().await?;
        Ok(report::low_stock(&medicines, &batches, self.clock.today()))
    }

    /// Batches expiring within the horizon, and batches already expired.
    pub async fn expiring(&self, params: &ReportParams) -> EngineResult<ExpiryReport> {
        let horizon = params.horizon_days.unwrap_or(self.settings.expiry_horizon_days);
        validate_horizon(horizon)?;

        let medicines = self.ledger.list_medicines().await?;
        let batches = self.ledger.list_batches().await?;
        Ok(report::expiring(&medicines, &batches, self.clock.today(), horizon))
    }

    /// Fastest-moving medicines over the trailing window.
    pub async fn turnover(&self, params: &ReportParams) -> EngineResult<TurnoverReport> {
        let window = params.window_days.unwrap_or(self.settings.turnover_window_days);
        validate_window_days(window, "window_days")?;
        let top_n = params.top_n.unwrap_or(self.settings.turnover_top_n);
        validate_top_n(top_n)?;

        let today = self.clock.today();
        let medicines = self.ledger.list_medicines().await?;
        let batches = self.ledger.list_batches().await?;
        let sales = self.ledger.list_sales(report::window_start(today, window), today).await?;
        Ok(report::turnover(&medicines, &batches, &sales, today, window, top_n))
    }

    /// Dashboard counters.
    pub async fn summary(&self) -> EngineResult<SummaryReport> {
        let today = self.clock.today();
        let medicines = self.ledger.list_medicines().await?;
        let batches = self.ledger.list_batches().await?;
        let sales = self
            .ledger
            .list_sales(today - Duration::days(SUMMARY_WINDOW_DAYS), today)
            .await?;
        Ok(report::summary(&medicines, &batches, &sales, today))
    }

    /// Daily and monthly sales totals over the trailing window.
    pub async fn sales_trends(&self, params: &ReportParams) -> EngineResult<SalesTrendReport> {
        let days = params.window_days.unwrap_or(self.settings.sales_trend_days);
        validate_window_days(days, "window_days")?;

        let today = self.clock.today();
        let sales = self.ledger.list_sales(today - Duration::days(days), today).await?;
        Ok(report::sales_trends(&sales, today, days))
    }

    pub async fn stock_analysis(&self) -> EngineResult<StockAnalysisReport> {
        let medicines = self.ledger.list_medicines().await?;
        let batches = self.ledger.list_batches().await?;
        Ok(report::stock_analysis(&medicines, &batches, self.clock.today()))
    }
}

impl std::fmt::Debug for ReportingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportingEngine")
            .field("clock", &self.clock)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn to_json<T: Serialize>(report: T) -> EngineResult<serde_json::Value> {
    Ok(serde_json::to_value(report)?)
}

fn validate_horizon(days: i64) -> Result<(), ValidationError> {
    if !(0..=MAX_REPORT_WINDOW_DAYS).contains(&days) {
        return Err(ValidationError::OutOfRange {
            field: "horizon_days".to_string(),
            min: 0,
            max: MAX_REPORT_WINDOW_DAYS,
        });
    }
    Ok(())
}

fn validate_top_n(top_n: usize) -> Result<(), ValidationError> {
    if top_n == 0 {
        return Err(ValidationError::MustBePositive {
            field: "top_n".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::SalesSettings;
    use crate::coordinator::SaleCoordinator;
    use crate::error::ErrorKind;
    use chrono::NaiveDate;
    use pharma_core::{DosageForm, Medicine, Money, SaleRequest, StockBatch};
    use pharma_db::{Database, DbConfig, InMemoryLedger};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()
    }

    struct Fixture {
        ledger: InMemoryLedger,
        reports: ReportingEngine,
        sales: SaleCoordinator,
        amox: Medicine,
        ors: Medicine,
        fresh: StockBatch,
    }

    fn fixture() -> Fixture {
        let ledger = InMemoryLedger::default();
        let amox = Medicine::new("Amoxicillin", DosageForm::Capsule, Money::from_cents(850), 20);
        let ors = Medicine::new("ORS Sachets", DosageForm::Powder, Money::from_cents(50), 0);
        ledger.insert_medicine(amox.clone()).unwrap();
        ledger.insert_medicine(ors.clone()).unwrap();

        let fresh = StockBatch::new(&amox.id, "A-1", today() + Duration::days(20), 30, Money::from_cents(400));
        let stale = StockBatch::new(&amox.id, "A-0", today() - Duration::days(3), 10, Money::from_cents(400));
        let bulk = StockBatch::new(&ors.id, "O-1", today() + Duration::days(200), 100, Money::from_cents(20));
        ledger.insert_batch(fresh.clone()).unwrap();
        ledger.insert_batch(stale).unwrap();
        ledger.insert_batch(bulk).unwrap();

        let shared: Arc<dyn StockLedger> = Arc::new(ledger.clone());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(today()));
        Fixture {
            reports: ReportingEngine::new(shared.clone(), clock.clone(), ReportSettings::default()),
            sales: SaleCoordinator::new(shared, clock, SalesSettings::default()),
            ledger,
            amox,
            ors,
            fresh,
        }
    }

    #[tokio::test]
    async fn test_valuation_is_repeatable() {
        let f = fixture();
        let first = f.reports.valuation().await.unwrap();
        let second = f.reports.valuation().await.unwrap();
        assert_eq!(first, second);

        // 30 × 4.00 + 100 × 0.20; the expired batch is excluded
        assert_eq!(first.total_value, Money::from_cents(12_000 + 2_000));
        assert_eq!(first.total_quantity, 130);

        let json_a = f.reports.report(ReportKind::Valuation, &ReportParams::default()).await.unwrap();
        let json_b = f.reports.report(ReportKind::Valuation, &ReportParams::default()).await.unwrap();
        assert_eq!(json_a, json_b);
    }

    #[tokio::test]
    async fn test_low_stock_follows_sales() {
        let f = fixture();
        assert!(f.reports.low_stock().await.unwrap().items.is_empty());

        f.sales
            .sell(SaleRequest::new(&f.amox.id, 25, Money::from_cents(850)))
            .await
            .unwrap();

        let low = f.reports.low_stock().await.unwrap();
        assert_eq!(low.items.len(), 1);
        assert_eq!(low.items[0].medicine_id, f.amox.id);
        assert_eq!(low.items[0].on_hand, 5);
        // ORS has reorder level 0 and is never reported
        assert!(low.items.iter().all(|i| i.medicine_id != f.ors.id));
    }

    #[tokio::test]
    async fn test_expiring_uses_configured_horizon() {
        let f = fixture();

        let default = f.reports.expiring(&ReportParams::default()).await.unwrap();
        assert_eq!(default.horizon_days, 30);
        assert_eq!(default.expiring_soon.batch_count, 1);
        assert_eq!(default.expiring_soon.batches[0].batch_id, f.fresh.id);
        assert_eq!(default.expired.batch_count, 1);
        assert_eq!(default.expired.quantity, 10);

        let narrow = f
            .reports
            .expiring(&ReportParams::default().with_horizon(7))
            .await
            .unwrap();
        assert_eq!(narrow.expiring_soon.batch_count, 0);

        let err = f
            .reports
            .expiring(&ReportParams::default().with_horizon(-1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_turnover_ranks_sold_medicine_first() {
        let f = fixture();
        f.sales
            .sell(SaleRequest::new(&f.amox.id, 18, Money::zero()))
            .await
            .unwrap();

        let report = f
            .reports
            .turnover(&ReportParams::default().with_window(30))
            .await
            .unwrap();
        assert_eq!(report.window_days, 30);
        assert_eq!(report.items[0].medicine_id, f.amox.id);
        assert_eq!(report.items[0].sold_in_window, 18);
        assert_eq!(report.items[0].daily_sales_rate, 0.6);

        let ors = report.items.iter().find(|i| i.medicine_id == f.ors.id).unwrap();
        assert_eq!(ors.turnover_rate, 0.0);

        let top_one = f
            .reports
            .turnover(&ReportParams::default().with_top_n(1))
            .await
            .unwrap();
        assert_eq!(top_one.items.len(), 1);

        assert!(f.reports.turnover(&ReportParams::default().with_top_n(0)).await.is_err());
        assert!(f.reports.turnover(&ReportParams::default().with_window(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_turnover_with_no_stock_is_zero() {
        let ledger = InMemoryLedger::default();
        let med = Medicine::new("Discontinued", DosageForm::Other, Money::zero(), 0);
        ledger.insert_medicine(med.clone()).unwrap();
        let reports = ReportingEngine::new(
            Arc::new(ledger),
            Arc::new(FixedClock::new(today())),
            ReportSettings::default(),
        );

        let report = reports.turnover(&ReportParams::default()).await.unwrap();
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].average_stock_level, 0.0);
        assert_eq!(report.items[0].turnover_rate, 0.0);
        assert!(!report.items[0].turnover_rate.is_nan());
    }

    #[tokio::test]
    async fn test_summary_and_trends() {
        let f = fixture();
        f.sales.sell(SaleRequest::new(&f.ors.id, 12, Money::from_cents(50))).await.unwrap();
        f.sales.sell(SaleRequest::new(&f.amox.id, 2, Money::from_cents(850))).await.unwrap();

        let summary = f.reports.summary().await.unwrap();
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.expiring_soon, 1);
        assert_eq!(summary.monthly_sales_qty, 14);
        assert_eq!(summary.top_fast_moving[0].medicine_id, f.ors.id);

        let trends = f.reports.sales_trends(&ReportParams::default()).await.unwrap();
        assert_eq!(trends.daily.len(), 1);
        assert_eq!(trends.daily[0].transaction_count, 2);
        assert_eq!(trends.daily[0].total_quantity, 14);
        assert_eq!(trends.daily[0].total_revenue, Money::from_cents(12 * 50 + 2 * 850));
    }

    #[tokio::test]
    async fn test_every_kind_renders() {
        let f = fixture();
        for kind in ReportKind::ALL {
            let value = f.reports.report(kind, &ReportParams::default()).await.unwrap();
            assert!(value.is_object(), "{kind} should render as an object");
        }
        assert_eq!(f.ledger.sales().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_reports_on_empty_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let reports = ReportingEngine::new(
            db.ledger(),
            Arc::new(FixedClock::new(today())),
            ReportSettings::default(),
        );

        let valuation = reports.valuation().await.unwrap();
        assert_eq!(valuation.total_value, Money::zero());
        assert!(valuation.medicines.is_empty());

        let summary = reports.summary().await.unwrap();
        assert_eq!(summary.monthly_sales_qty, 0);
        assert!(summary.top_fast_moving.is_empty());
    }
}
