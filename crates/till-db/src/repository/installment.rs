//! # Installment Repository
//!
//! Database operations for installment schedules.
//!
//! ## Guarded Transitions
//! ```text
//! mark_paid / cancel        WHERE status IN ('pending', 'overdue')
//! cancel_unsettled_for_sale WHERE sale_id = ? AND status IN ('pending', 'overdue')
//! mark_overdue              WHERE status = 'pending' AND due_date < ?
//! ```
//! Each returns how many rows moved, so callers can tell a no-op from a
//! transition without a second read.

use chrono::NaiveDate;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use till_core::{Installment, InstallmentStatus};

/// Repository for installment database operations.
#[derive(Debug, Clone)]
pub struct InstallmentRepository {
    pool: SqlitePool,
}

impl InstallmentRepository {
    /// Creates a new InstallmentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InstallmentRepository { pool }
    }

    /// Inserts one installment.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - number already used for this sale
    pub async fn insert(&self, conn: &mut SqliteConnection, installment: &Installment) -> DbResult<()> {
        debug!(
            sale_id = %installment.sale_id,
            number = installment.installment_number,
            amount_cents = installment.amount_cents,
            due_date = %installment.due_date,
            "Inserting installment"
        );

        sqlx::query(
            r#"
            INSERT INTO installments (
                id, sale_id, installment_number, total_installments,
                amount_cents, due_date, paid_date, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&installment.id)
        .bind(&installment.sale_id)
        .bind(installment.installment_number)
        .bind(installment.total_installments)
        .bind(installment.amount_cents)
        .bind(installment.due_date)
        .bind(installment.paid_date)
        .bind(installment.status)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Gets an installment by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Installment>> {
        fetch_by_id(&self.pool, id).await
    }

    /// Gets an installment by ID while holding the write lock.
    pub async fn get_by_id_locked(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Installment>> {
        fetch_by_id(conn, id).await
    }

    /// Schedule of a sale, ordered by installment number.
    pub async fn list_for_sale(&self, sale_id: &str) -> DbResult<Vec<Installment>> {
        fetch_for_sale(&self.pool, sale_id).await
    }

    /// Schedule of a sale, read under the write lock.
    pub async fn list_for_sale_locked(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<Vec<Installment>> {
        fetch_for_sale(conn, sale_id).await
    }

    /// All installments in `status`, earliest due first.
    pub async fn list_by_status(&self, status: InstallmentStatus) -> DbResult<Vec<Installment>> {
        let installments = sqlx::query_as::<_, Installment>(
            r#"
            SELECT
                id, sale_id, installment_number, total_installments,
                amount_cents, due_date, paid_date, status
            FROM installments
            WHERE status = ?1
            ORDER BY due_date, sale_id, installment_number
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(installments)
    }

    /// Number of installments already scheduled for a sale.
    pub async fn count_for_sale_locked(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM installments WHERE sale_id = ?1")
            .bind(sale_id)
            .fetch_one(conn)
            .await?;

        Ok(count)
    }

    /// PENDING/OVERDUE → PAID. Returns false if the row was not settleable.
    pub async fn mark_paid(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        paid_date: NaiveDate,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE installments
            SET status = 'paid', paid_date = ?2
            WHERE id = ?1 AND status IN ('pending', 'overdue')
            "#,
        )
        .bind(id)
        .bind(paid_date)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// PENDING/OVERDUE → CANCELLED. Returns false if the row was not settleable.
    pub async fn cancel(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE installments
            SET status = 'cancelled'
            WHERE id = ?1 AND status IN ('pending', 'overdue')
            "#,
        )
        .bind(id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Cancels every unpaid installment of a sale. PAID rows are left alone.
    pub async fn cancel_unsettled_for_sale(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE installments
            SET status = 'cancelled'
            WHERE sale_id = ?1 AND status IN ('pending', 'overdue')
            "#,
        )
        .bind(sale_id)
        .execute(conn)
        .await?;

        debug!(sale_id = %sale_id, cancelled = result.rows_affected(), "Cancelled unpaid installments");
        Ok(result.rows_affected())
    }

    /// PENDING → OVERDUE for everything due strictly before `as_of`.
    pub async fn mark_overdue(&self, conn: &mut SqliteConnection, as_of: NaiveDate) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE installments
            SET status = 'overdue'
            WHERE status = 'pending' AND due_date < ?1
            "#,
        )
        .bind(as_of)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }
}

async fn fetch_by_id<'e, E>(executor: E, id: &str) -> DbResult<Option<Installment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let installment = sqlx::query_as::<_, Installment>(
        r#"
        SELECT
            id, sale_id, installment_number, total_installments,
            amount_cents, due_date, paid_date, status
        FROM installments
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(installment)
}

async fn fetch_for_sale<'e, E>(executor: E, sale_id: &str) -> DbResult<Vec<Installment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let installments = sqlx::query_as::<_, Installment>(
        r#"
        SELECT
            id, sale_id, installment_number, total_installments,
            amount_cents, due_date, paid_date, status
        FROM installments
        WHERE sale_id = ?1
        ORDER BY installment_number
        "#,
    )
    .bind(sale_id)
    .fetch_all(executor)
    .await?;

    Ok(installments)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::test_support::{product, temp_db};
    use crate::{Database, NewOrderLine};
    use chrono::Utc;
    use till_core::{PaymentMethod, Sale, SaleStatus};

    async fn sale(db: &Database) -> String {
        let p = product(db, "P", 5, 1000).await;
        let (order, _) = db
            .orders()
            .create(None, &[NewOrderLine::new(&p.id, 2, 1000)])
            .await
            .unwrap();

        let mut tx = db.begin_locked().await.unwrap();
        db.sales()
            .insert(
                tx.conn().unwrap(),
                &Sale {
                    id: "sale-1".to_string(),
                    order_id: order.id,
                    customer_id: None,
                    operator_id: "U1".to_string(),
                    session_id: None,
                    created_at: Utc::now(),
                    gross_total_cents: 2000,
                    discount_total_cents: 0,
                    net_total_cents: 2000,
                    amount_paid_cents: 0,
                    change_due_cents: 0,
                    payment_method: PaymentMethod::Credit,
                    installment_count: 3,
                    status: SaleStatus::Completed,
                    invoice_number: None,
                    cancelled_at: None,
                    cancellation_reason: None,
                },
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
        "sale-1".to_string()
    }

    fn installment(sale_id: &str, number: i64, due: NaiveDate) -> Installment {
        Installment {
            id: format!("{}-{}", sale_id, number),
            sale_id: sale_id.to_string(),
            installment_number: number,
            total_installments: 3,
            amount_cents: if number == 3 { 666 } else { 667 },
            due_date: due,
            paid_date: None,
            status: InstallmentStatus::Pending,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    async fn scheduled(db: &Database) -> String {
        let sale_id = sale(db).await;
        let repo = db.installments();
        let mut tx = db.begin_locked().await.unwrap();
        for n in 1..=3 {
            repo.insert(tx.conn().unwrap(), &installment(&sale_id, n, day(n as u32 * 10)))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();
        sale_id
    }

    #[tokio::test]
    async fn test_insert_and_list() {
        let (_dir, db) = temp_db().await;
        let sale_id = scheduled(&db).await;

        let listed = db.installments().list_for_sale(&sale_id).await.unwrap();
        let numbers: Vec<i64> = listed.iter().map(|i| i.installment_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(listed.iter().map(|i| i.amount_cents).sum::<i64>(), 2000);
        assert_eq!(listed[0].due_date, day(10));
    }

    #[tokio::test]
    async fn test_duplicate_number_rejected() {
        let (_dir, db) = temp_db().await;
        let sale_id = scheduled(&db).await;

        let mut dup = installment(&sale_id, 2, day(20));
        dup.id = "other".to_string();
        let mut tx = db.begin_locked().await.unwrap();
        let err = db.installments().insert(tx.conn().unwrap(), &dup).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_pay_and_cancel_guards() {
        let (_dir, db) = temp_db().await;
        let sale_id = scheduled(&db).await;
        let repo = db.installments();
        let first = format!("{}-1", sale_id);

        let mut tx = db.begin_locked().await.unwrap();
        assert!(repo.mark_paid(tx.conn().unwrap(), &first, day(5)).await.unwrap());
        assert!(!repo.mark_paid(tx.conn().unwrap(), &first, day(6)).await.unwrap());
        assert!(!repo.cancel(tx.conn().unwrap(), &first).await.unwrap());
        assert_eq!(repo.cancel_unsettled_for_sale(tx.conn().unwrap(), &sale_id).await.unwrap(), 2);
        tx.commit().await.unwrap();

        let paid = repo.get_by_id(&first).await.unwrap().unwrap();
        assert_eq!(paid.status, InstallmentStatus::Paid);
        assert_eq!(paid.paid_date, Some(day(5)));
        assert_eq!(repo.list_by_status(InstallmentStatus::Cancelled).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_overdue_is_strict_and_idempotent() {
        let (_dir, db) = temp_db().await;
        scheduled(&db).await;
        let repo = db.installments();

        let mut tx = db.begin_locked().await.unwrap();
        // due dates are the 10th, 20th and 30th; the 20th is not yet overdue on the 20th
        assert_eq!(repo.mark_overdue(tx.conn().unwrap(), day(20)).await.unwrap(), 1);
        assert_eq!(repo.mark_overdue(tx.conn().unwrap(), day(20)).await.unwrap(), 0);
        tx.commit().await.unwrap();

        let overdue = repo.list_by_status(InstallmentStatus::Overdue).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].due_date, day(10));
    }
}
