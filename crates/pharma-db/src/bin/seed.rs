//! # Seed Data Generator
//!
//! Populates a database with a realistic pharmacy catalog, several batches
//! per medicine (some near expiry, some expired) and a few weeks of sales
//! history, then prints the dashboard summary.
//!
//! ## Usage
//! ```bash
//! cargo run -p pharma-db --bin seed -- --db ./pharmacy_dev.db --days 60
//! ```

use anyhow::{bail, Context};
use chrono::{Duration, NaiveDate, Utc};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pharma_core::allocation::{check_sellable, deduct, select_fefo};
use pharma_core::report;
use pharma_core::{DosageForm, Medicine, Money, SaleRequest, StockBatch};
use pharma_db::{Database, DbConfig};

/// (name, generic name, form, list price cents, reorder level)
const CATALOG: &[(&str, &str, DosageForm, i64, i64)] = &[
    ("Amoxil 500mg", "Amoxicillin", DosageForm::Capsule, 850, 40),
    ("Panadol 500mg", "Paracetamol", DosageForm::Tablet, 150, 100),
    ("Brufen 400mg", "Ibuprofen", DosageForm::Tablet, 220, 60),
    ("Ventolin Evohaler", "Salbutamol", DosageForm::Inhaler, 1250, 10),
    ("Augmentin 625mg", "Amoxicillin/Clavulanate", DosageForm::Tablet, 1800, 20),
    ("Glucophage 500mg", "Metformin", DosageForm::Tablet, 300, 80),
    ("Zyrtec 10mg", "Cetirizine", DosageForm::Tablet, 400, 30),
    ("Benylin Syrup", "Diphenhydramine", DosageForm::Syrup, 950, 15),
    ("Losec 20mg", "Omeprazole", DosageForm::Capsule, 700, 30),
    ("Actrapid", "Insulin (human)", DosageForm::Injection, 4200, 5),
    ("Fucidin Cream", "Fusidic acid", DosageForm::Cream, 1100, 0),
    ("Optrex Drops", "Witch hazel", DosageForm::Drops, 650, 0),
    ("ORS Sachets", "Oral rehydration salts", DosageForm::Powder, 50, 200),
];

/// Expiry offsets (days from today) and starting quantities per batch.
const BATCH_LAYOUT: &[(i64, i64)] = &[(-20, 15), (12, 25), (75, 60), (300, 120)];

fn print_help() {
    println!("Pharmacy Seed Data Generator");
    println!();
    println!("Usage: seed [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -d, --db <PATH>     Database file path (default: ./pharmacy_dev.db)");
    println!("  -n, --days <N>      Days of sales history to generate (default: 45)");
    println!("  -h, --help          Show this help message");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./pharmacy_dev.db");
    let mut history_days: i64 = 45;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                db_path = args.get(i + 1).context("--db needs a path")?.clone();
                i += 1;
            }
            "--days" | "-n" => {
                let raw = args.get(i + 1).context("--days needs a number")?;
                history_days = raw.parse().with_context(|| format!("invalid --days '{raw}'"))?;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => bail!("unknown argument '{other}' (try --help)"),
        }
        i += 1;
    }

    let db = Database::new(DbConfig::new(&db_path))
        .await
        .with_context(|| format!("opening {db_path}"))?;
    info!(path = %db_path, "Connected, migrations applied");

    let existing = db.medicines().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has medicines; skipping seed");
        return Ok(());
    }

    let today = Utc::now().date_naive();
    let start = std::time::Instant::now();

    let mut medicines = Vec::with_capacity(CATALOG.len());
    for (idx, (name, generic, form, price, reorder)) in CATALOG.iter().enumerate() {
        let mut medicine = Medicine::new(*name, *form, Money::from_cents(*price), *reorder);
        medicine.generic_name = Some(generic.to_string());
        medicine.barcode = Some(format!("616{:010}", idx + 1));
        db.medicines().insert(&medicine).await?;

        for (lot, (offset, qty)) in BATCH_LAYOUT.iter().enumerate() {
            let cost = Money::from_cents(price * (55 + (idx as i64 * 3) % 20) / 100);
            let batch = StockBatch::new(
                &medicine.id,
                format!("{}-{:02}", &generic[..3].to_uppercase(), lot + 1),
                today + Duration::days(*offset),
                *qty,
                cost,
            );
            db.batches().insert(&batch).await?;
        }
        medicines.push(medicine);
    }
    info!(medicines = medicines.len(), "Catalog and batches created");

    let sold = seed_sales(&db, &medicines, today, history_days).await?;
    info!(sales = sold, elapsed = ?start.elapsed(), "Sales history created");

    let batches = db.batches().list_all().await?;
    let sales = db
        .sales()
        .list_between(today - Duration::days(history_days), today)
        .await?;
    let summary = report::summary(&medicines, &batches, &sales, today);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

/// Sells a deterministic pattern of quantities per day through the ledger,
/// so the seeded history respects the same invariants as live sales.
async fn seed_sales(
    db: &Database,
    medicines: &[Medicine],
    today: NaiveDate,
    days: i64,
) -> anyhow::Result<usize> {
    let ledger = db.ledger();
    let mut count = 0;

    for day in (0..days).rev() {
        let sale_date = today - Duration::days(day);
        for (idx, medicine) in medicines.iter().enumerate() {
            let qty = (day + idx as i64 * 7) % 4;
            if qty == 0 {
                continue;
            }

            let candidates = ledger.list_available(&medicine.id, sale_date).await?;
            let Ok(chosen) = select_fefo(&candidates, &medicine.id, qty, sale_date) else {
                continue;
            };

            let mut tx = ledger.begin().await?;
            let locked = tx.get_for_update(&chosen.id).await?;
            if check_sellable(&locked, qty, sale_date).is_err() {
                continue;
            }
            tx.update_batch(&deduct(&locked, qty)?).await?;
            let record = SaleRequest::new(&medicine.id, qty, medicine.unit_price())
                .on(sale_date)
                .into_record(locked.id.clone(), today);
            tx.insert_sale(&record).await?;
            tx.commit().await?;
            count += 1;
        }
    }

    Ok(count)
}
