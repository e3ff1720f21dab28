//! # Product Repository
//!
//! Database operations for products. The product catalogue is owned by
//! another module; this core only reads products and moves their stock.
//!
//! ## Stock Updates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Stock Update Strategy                            │
//! │                                                                     │
//! │  ❌ WRONG: read, compute, write back an absolute value             │
//! │     SELECT current_stock ...        (stock = 5)                    │
//! │     UPDATE products SET current_stock = 3                          │
//! │                                                                     │
//! │  ✅ CORRECT: guarded delta inside the locked transaction           │
//! │     UPDATE products SET current_stock = current_stock - 2          │
//! │     WHERE id = ? AND current_stock >= 2                            │
//! │                                                                     │
//! │  0 rows affected → insufficient stock, whole unit rolls back.      │
//! │  The CHECK (current_stock >= 0) constraint backs this up.          │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::Product;

/// Outcome of a guarded stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockChange {
    /// Stock was decremented.
    Applied,
    /// Nothing changed; only `available` units are on hand.
    Insufficient { available: i64 },
}

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        fetch_by_id(&self.pool, id).await
    }

    /// Gets a product by SKU.
    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, price_cents, current_stock, is_active, created_at, updated_at
            FROM products
            WHERE sku = ?1
            "#,
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Inserts a new product.
    ///
    /// ## Returns
    /// * `Ok(Product)` - Inserted product
    /// * `Err(DbError::UniqueViolation)` - SKU already exists
    pub async fn insert(&self, product: &Product) -> DbResult<Product> {
        debug!(sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, price_cents, current_stock,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.current_stock)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(product.clone())
    }

    /// Takes `quantity` units from stock if at least that many are on hand.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - Product doesn't exist
    pub async fn decrement_stock(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        quantity: i64,
    ) -> DbResult<StockChange> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET current_stock = current_stock - ?2,
                updated_at = ?3
            WHERE id = ?1 AND current_stock >= ?2
            "#,
        )
        .bind(id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            debug!(id = %id, quantity, "Stock decremented");
            return Ok(StockChange::Applied);
        }

        let available: Option<i64> =
            sqlx::query_scalar("SELECT current_stock FROM products WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        match available {
            Some(available) => Ok(StockChange::Insufficient { available }),
            None => Err(DbError::not_found("Product", id)),
        }
    }

    /// Puts `quantity` units back into stock.
    pub async fn restock(&self, conn: &mut SqliteConnection, id: &str, quantity: i64) -> DbResult<()> {
        debug!(id = %id, quantity, "Restocking");

        let result = sqlx::query(
            r#"
            UPDATE products
            SET current_stock = current_stock + ?2,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        Ok(())
    }

    /// Counts active products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

async fn fetch_by_id<'e, E>(executor: E, id: &str) -> DbResult<Option<Product>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let product = sqlx::query_as::<_, Product>(
        r#"
        SELECT id, sku, name, price_cents, current_stock, is_active, created_at, updated_at
        FROM products
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(product)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{product, temp_db};

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let (_dir, db) = temp_db().await;
        let p = product(&db, "P", 5, 1000).await;

        let by_id = db.products().get_by_id(&p.id).await.unwrap().unwrap();
        assert_eq!(by_id.sku, "P");
        assert_eq!(by_id.current_stock, 5);
        assert!(by_id.is_active);

        let by_sku = db.products().get_by_sku("P").await.unwrap().unwrap();
        assert_eq!(by_sku.id, p.id);
        assert_eq!(db.products().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_sku_rejected() {
        let (_dir, db) = temp_db().await;
        let p = product(&db, "P", 5, 1000).await;

        let mut dup = p.clone();
        dup.id = "other".to_string();
        let err = db.products().insert(&dup).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_decrement_guarded() {
        let (_dir, db) = temp_db().await;
        let p = product(&db, "P", 5, 1000).await;
        let repo = db.products();

        let mut tx = db.begin_locked().await.unwrap();
        assert_eq!(
            repo.decrement_stock(tx.conn().unwrap(), &p.id, 2).await.unwrap(),
            StockChange::Applied
        );
        assert_eq!(
            repo.decrement_stock(tx.conn().unwrap(), &p.id, 4).await.unwrap(),
            StockChange::Insufficient { available: 3 }
        );
        tx.commit().await.unwrap();

        let stored = repo.get_by_id(&p.id).await.unwrap().unwrap();
        assert_eq!(stored.current_stock, 3);
    }

    #[tokio::test]
    async fn test_decrement_unknown_product() {
        let (_dir, db) = temp_db().await;
        let mut tx = db.begin_locked().await.unwrap();
        let err = db
            .products()
            .decrement_stock(tx.conn().unwrap(), "missing", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_restock() {
        let (_dir, db) = temp_db().await;
        let p = product(&db, "P", 3, 1000).await;

        let mut tx = db.begin_locked().await.unwrap();
        db.products().restock(tx.conn().unwrap(), &p.id, 2).await.unwrap();
        tx.commit().await.unwrap();

        let stored = db.products().get_by_id(&p.id).await.unwrap().unwrap();
        assert_eq!(stored.current_stock, 5);
    }
}
