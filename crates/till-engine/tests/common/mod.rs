//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use chrono::Utc;
use tempfile::TempDir;
use till_core::{Money, PaymentInfo, Product};
use till_db::NewOrderLine;
use till_engine::{Engine, EngineConfig};
use uuid::Uuid;

/// An engine over a fresh database. Writers wait up to 5s for the lock so
/// concurrent tests measure serialization, not the retry budget.
pub async fn temp_engine() -> (TempDir, Engine) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = EngineConfig::with_database_path(dir.path().join("till.db"));
    config.database.busy_timeout_ms = 5_000;
    config.database.max_connections = 10;
    let engine = Engine::connect(config).await.expect("engine connects");
    (dir, engine)
}

/// An engine whose writers give up on the lock after 20ms, so a held lock
/// runs the retry budget out quickly.
pub async fn impatient_engine() -> (TempDir, Engine) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = EngineConfig::with_database_path(dir.path().join("till.db"));
    config.database.busy_timeout_ms = 20;
    config.database.max_connections = 10;
    config.retry.base_delay_ms = 5;
    let engine = Engine::connect(config).await.expect("engine connects");
    (dir, engine)
}

/// Inserts an active product and returns its id.
pub async fn product(engine: &Engine, stock: i64, price_cents: i64) -> String {
    let now = Utc::now();
    let id = Uuid::new_v4().to_string();
    engine
        .db()
        .products()
        .insert(&Product {
            id: id.clone(),
            sku: format!("P-{}", &id[..8]),
            name: "Product".to_string(),
            price_cents,
            current_stock: stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("product inserted");
    id
}

/// Creates an OPEN order from `(product_id, quantity, unit_price_cents)`.
pub async fn order(engine: &Engine, lines: &[(&str, i64, i64)]) -> String {
    let lines: Vec<NewOrderLine> = lines
        .iter()
        .map(|(product_id, quantity, price)| NewOrderLine::new(*product_id, *quantity, *price))
        .collect();
    let (order, _) = engine
        .db()
        .orders()
        .create(None, &lines)
        .await
        .expect("order created");
    order.id
}

pub async fn stock_of(engine: &Engine, product_id: &str) -> i64 {
    engine
        .db()
        .products()
        .get_by_id(product_id)
        .await
        .expect("query")
        .expect("product exists")
        .current_stock
}

pub fn cash(gross_cents: i64, paid_cents: i64) -> PaymentInfo {
    PaymentInfo::cash("U1", Money::from_cents(gross_cents), Money::from_cents(paid_cents))
}

pub fn money(cents: i64) -> Money {
    Money::from_cents(cents)
}
