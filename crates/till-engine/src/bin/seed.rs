//! # Seed Data Generator
//!
//! Populates a development database with products and OPEN orders ready to
//! be finalized.
//!
//! ## Usage
//! ```bash
//! # 200 products, 20 orders, database from till.toml / TILL_DB_PATH
//! cargo run -p till-engine --bin seed
//!
//! # Custom amounts and path
//! cargo run -p till-engine --bin seed -- --products 500 --orders 50 --db ./data/till.db
//! ```
//!
//! Every order has one to three lines over distinct products, priced at the
//! product's list price. Stock is generous so the orders can all be sold.

use chrono::Utc;
use std::env;
use std::path::PathBuf;
use till_core::Product;
use till_db::NewOrderLine;
use till_engine::telemetry::{init_tracing, DEFAULT_FILTER};
use till_engine::{Engine, EngineConfig};
use tracing::{info, warn};
use uuid::Uuid;

/// Catalogue the generator cycles through.
const CATALOGUE: &[(&str, &[&str])] = &[
    ("BEV", &["Cola", "Sparkling Water", "Orange Juice", "Iced Tea", "Coffee Beans"]),
    ("SNK", &["Potato Chips", "Pretzels", "Chocolate Bar", "Gummy Bears", "Cookies"]),
    ("DRY", &["Whole Milk", "Cheddar", "Butter", "Greek Yogurt", "Eggs Dozen"]),
    ("HOM", &["Dish Soap", "Paper Towels", "Light Bulb", "Batteries AA", "Trash Bags"]),
];

struct Args {
    products: usize,
    orders: usize,
    db: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args() -> Option<Args> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args {
        products: 200,
        orders: 20,
        db: None,
        config: None,
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--products" | "-p", Some(v)) => {
                parsed.products = v.parse().unwrap_or(parsed.products);
                i += 1;
            }
            ("--orders" | "-o", Some(v)) => {
                parsed.orders = v.parse().unwrap_or(parsed.orders);
                i += 1;
            }
            ("--db" | "-d", Some(v)) => {
                parsed.db = Some(PathBuf::from(v));
                i += 1;
            }
            ("--config" | "-c", Some(v)) => {
                parsed.config = Some(PathBuf::from(v));
                i += 1;
            }
            ("--help" | "-h", _) => {
                println!("Till Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --products <N>   Products to generate (default: 200)");
                println!("  -o, --orders <N>     OPEN orders to generate (default: 20)");
                println!("  -d, --db <PATH>      Database file (default: from config)");
                println!("  -c, --config <PATH>  Config file (default: platform config dir)");
                println!("  -h, --help           Show this help message");
                return None;
            }
            (other, _) => warn!(arg = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }
    Some(parsed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(DEFAULT_FILTER)?;

    let Some(args) = parse_args() else {
        return Ok(());
    };

    let mut config = EngineConfig::load(args.config)?;
    if let Some(db) = args.db {
        config.database.path = db;
    }

    let engine = Engine::connect(config).await?;
    let products = engine.db().products();

    let existing = products.count().await?;
    if existing > 0 {
        warn!(existing, "Database already has products, skipping seed");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let mut seeded: Vec<Product> = Vec::with_capacity(args.products);
    for index in 0..args.products {
        let product = generate_product(index);
        match products.insert(&product).await {
            Ok(product) => seeded.push(product),
            Err(e) => warn!(sku = %product.sku, error = %e, "Failed to insert product"),
        }
    }
    info!(count = seeded.len(), elapsed = ?start.elapsed(), "Products generated");

    if seeded.is_empty() {
        return Ok(());
    }

    let orders = engine.db().orders();
    let mut created = 0;
    for index in 0..args.orders {
        let lines = order_lines(&seeded, index);
        let (order, lines) = orders.create(None, &lines).await?;
        let total: i64 = lines.iter().map(|l| l.amount().cents()).sum();
        info!(order_id = %order.id, lines = lines.len(), total_cents = total, "Order generated");
        created += 1;
    }

    info!(products = seeded.len(), orders = created, "Seed complete");
    engine.shutdown().await;
    Ok(())
}

/// A product with deterministic, realistic-looking data.
fn generate_product(index: usize) -> Product {
    let now = Utc::now();
    let (category, names) = CATALOGUE[index % CATALOGUE.len()];
    let name = names[(index / CATALOGUE.len()) % names.len()];

    Product {
        id: Uuid::new_v4().to_string(),
        sku: format!("{}-{:05}", category, index),
        name: format!("{} #{}", name, index / (CATALOGUE.len() * names.len()) + 1),
        // $0.99 - $49.99
        price_cents: 99 + ((index * 37) % 4901) as i64,
        current_stock: 50 + (index % 150) as i64,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// One to three lines over distinct products.
fn order_lines(products: &[Product], index: usize) -> Vec<NewOrderLine> {
    let count = (1 + index % 3).min(products.len());
    (0..count)
        .map(|offset| {
            let product = &products[(index * 7 + offset) % products.len()];
            NewOrderLine::new(&product.id, 1 + (offset as i64), product.price_cents)
        })
        .collect()
}
