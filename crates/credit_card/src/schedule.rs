//! Installment schedules.
//!
//! A purchase of `amount` split into `n` installments pays
//! `floor(amount / n)` per installment, with the whole remainder added to
//! installment #1 so the schedule sums to `amount` exactly. Installment `k`
//! is due `k - 1` calendar months after the purchase date.

use crate::calendar;
use crate::models::{Installment, InstallmentStatus};
use chrono::NaiveDate;

pub fn generate_installments(
    amount: i64,
    total_installments: u32,
    purchase_date: NaiveDate,
) -> Result<Vec<Installment>, String> {
    if amount <= 0 {
        return Err("Amount must be greater than zero".to_string());
    }
    if total_installments == 0 {
        return Err("Installment count must be greater than zero".to_string());
    }

    let count = i64::from(total_installments);
    let base = amount / count;
    let remainder = amount - base * count;

    (1..=total_installments)
        .map(|number| {
            Ok(Installment {
                number,
                amount: if number == 1 { base + remainder } else { base },
                due_date: due_date_for(purchase_date, number)?,
                status: InstallmentStatus::Pending,
            })
        })
        .collect()
}

/// Re-anchors a schedule on a new purchase date. Numbers, amounts and
/// statuses are kept; only due dates move.
pub fn regenerate_due_dates(
    installments: &[Installment],
    new_purchase_date: NaiveDate,
) -> Result<Vec<Installment>, String> {
    installments
        .iter()
        .map(|installment| {
            Ok(Installment {
                due_date: due_date_for(new_purchase_date, installment.number)?,
                ..installment.clone()
            })
        })
        .collect()
}

fn due_date_for(purchase_date: NaiveDate, number: u32) -> Result<NaiveDate, String> {
    calendar::add_months(purchase_date, number.saturating_sub(1))
        .ok_or_else(|| format!("Installment {} falls outside the supported calendar", number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::MonthKey;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_even_split() {
        let schedule = generate_installments(12000, 3, date(2025, 1, 10)).unwrap();
        assert_eq!(schedule.len(), 3);
        assert!(schedule.iter().all(|i| i.amount == 4000));
        assert!(schedule.iter().all(|i| i.status == InstallmentStatus::Pending));
        assert_eq!(
            schedule.iter().map(|i| i.number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_remainder_goes_to_first_installment() {
        let schedule = generate_installments(10000, 3, date(2025, 1, 10)).unwrap();
        assert_eq!(
            schedule.iter().map(|i| i.amount).collect::<Vec<_>>(),
            vec![3334, 3333, 3333]
        );
    }

    #[test]
    fn test_sum_matches_amount() {
        for amount in [1, 7, 99, 1000, 123457, 9_999_999] {
            for count in [1, 2, 3, 7, 12, 36, 48] {
                let schedule = generate_installments(amount, count, date(2025, 3, 1)).unwrap();
                assert_eq!(schedule.iter().map(|i| i.amount).sum::<i64>(), amount);
                assert_eq!(schedule.len(), count as usize);
            }
        }
    }

    #[test]
    fn test_more_installments_than_cents() {
        let schedule = generate_installments(2, 5, date(2025, 3, 1)).unwrap();
        assert_eq!(
            schedule.iter().map(|i| i.amount).collect::<Vec<_>>(),
            vec![2, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_due_dates_advance_one_month_with_clamping() {
        let schedule = generate_installments(900, 3, date(2024, 1, 31)).unwrap();
        assert_eq!(schedule[0].due_date, date(2024, 1, 31));
        assert_eq!(schedule[1].due_date, date(2024, 2, 29));
        assert_eq!(schedule[2].due_date, date(2024, 3, 31));

        for pair in schedule.windows(2) {
            assert!(pair[0].due_date < pair[1].due_date);
            assert_eq!(MonthKey::of(pair[0].due_date).next(), MonthKey::of(pair[1].due_date));
        }
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(generate_installments(0, 3, date(2025, 1, 1)).is_err());
        assert!(generate_installments(-100, 3, date(2025, 1, 1)).is_err());
        assert!(generate_installments(100, 0, date(2025, 1, 1)).is_err());
        assert!(generate_installments(100, 2, NaiveDate::MAX).is_err());
    }

    #[test]
    fn test_regenerate_shifts_dates_only() {
        let mut schedule = generate_installments(10000, 3, date(2025, 1, 15)).unwrap();
        schedule[0].status = InstallmentStatus::Paid;

        let moved = regenerate_due_dates(&schedule, date(2025, 4, 30)).unwrap();
        assert_eq!(
            moved.iter().map(|i| i.due_date).collect::<Vec<_>>(),
            vec![date(2025, 4, 30), date(2025, 5, 30), date(2025, 6, 30)]
        );
        assert_eq!(
            moved.iter().map(|i| (i.number, i.amount, i.status)).collect::<Vec<_>>(),
            schedule.iter().map(|i| (i.number, i.amount, i.status)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_regenerate_is_idempotent() {
        let schedule = generate_installments(5000, 4, date(2025, 1, 31)).unwrap();
        let once = regenerate_due_dates(&schedule, date(2025, 8, 31)).unwrap();
        let twice = regenerate_due_dates(&once, date(2025, 8, 31)).unwrap();
        assert_eq!(once, twice);
    }
}
