//! # Installment Schedule Arithmetic
//!
//! Splits a sale's net total into installment shares and assigns due dates.
//!
//! ## Share Rule
//! ```text
//! net_total = 2000, count = 3
//!
//!   share = round_half_up(2000 / 3) = 667
//!
//!   #1  667
//!   #2  667
//!   #3  2000 - 667 × 2 = 666   ◄── last one absorbs the rounding
//!                        ─────
//!                        2000  (exact, always)
//! ```
//!
//! When rounding up would leave the last installment at zero or below
//! (e.g. 5 cents over 4 installments: 1+1+1+2 works, but 6 over 4 rounds to
//! 2+2+2+0), shares fall back to the truncated quotient and the last one
//! takes the whole remainder.

use chrono::{Days, NaiveDate};

use crate::error::ValidationError;
use crate::money::Money;

/// One row of a computed schedule, before it gets an id and a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledShare {
    /// 1-based position in the schedule.
    pub number: u32,
    pub amount: Money,
    pub due_date: NaiveDate,
}

/// Splits `net_total` into `count` positive shares that sum exactly to it.
///
/// ## Errors
/// - `count` is zero
/// - `net_total` is smaller than one cent per installment
pub fn split_into_shares(net_total: Money, count: u32) -> Result<Vec<Money>, ValidationError> {
    if count == 0 {
        return Err(ValidationError::OutOfRange {
            field: "installments".to_string(),
            min: 1,
            max: i64::from(crate::MAX_INSTALLMENTS),
        });
    }
    if net_total.cents() < i64::from(count) {
        return Err(ValidationError::invalid(
            "net_total",
            format!(
                "{} cannot be split into {} installments of at least one cent",
                net_total, count
            ),
        ));
    }

    let others = i64::from(count - 1);
    let mut share = net_total.div_round_half_up(count);
    if (net_total - share * others).cents() <= 0 {
        share = net_total.div_floor(count);
    }
    let last = net_total - share * others;

    let mut shares = vec![share; (count - 1) as usize];
    shares.push(last);
    Ok(shares)
}

/// Due dates for installments 1..=count: `sale_date + k × interval_days`.
pub fn due_dates(
    sale_date: NaiveDate,
    count: u32,
    interval_days: u32,
) -> Result<Vec<NaiveDate>, ValidationError> {
    (1..=u64::from(count))
        .map(|k| {
            sale_date
                .checked_add_days(Days::new(k * u64::from(interval_days)))
                .ok_or_else(|| {
                    ValidationError::invalid("due_date", "installment due date out of range")
                })
        })
        .collect()
}

/// Full schedule: shares paired with their due dates.
pub fn build_schedule(
    net_total: Money,
    count: u32,
    sale_date: NaiveDate,
    interval_days: u32,
) -> Result<Vec<ScheduledShare>, ValidationError> {
    let shares = split_into_shares(net_total, count)?;
    let dates = due_dates(sale_date, count, interval_days)?;

    Ok(shares
        .into_iter()
        .zip(dates)
        .zip(1u32..)
        .map(|((amount, due_date), number)| ScheduledShare {
            number,
            amount,
            due_date,
        })
        .collect())
}

// =============================================================================
// Unit Tests
// =============================================================================
