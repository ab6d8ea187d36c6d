//! The real monthly payment flow.
//!
//! Installments are paid one month at a time: only installments due in the
//! current month may move from pending to paid, and each move needs explicit
//! confirmation. Reverting a payment is always allowed. When the last
//! pending installment of the month is paid, the fund is settled once with
//! the month's total, installments paid earlier in the month included.
//!
//! Between settlements the fund grows by its monthly contribution once per
//! calendar month (see [`accrue`]).

use crate::calendar::MonthKey;
use crate::models::{CreditCardExpense, Fund, Installment, InstallmentStatus};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;

/// Debits a month's payments from the fund. A fund with nothing accumulated
/// pays out of its monthly contribution instead. Never goes below zero.
pub fn settle(fund: &Fund, month_total_paid: i64, now: NaiveDateTime) -> Fund {
    let base = if fund.accumulated_amount > 0 {
        fund.accumulated_amount
    } else {
        fund.monthly_contribution
    };

    Fund {
        accumulated_amount: (base - month_total_paid).max(0),
        last_update_date: now,
        ..fund.clone()
    }
}

/// Rolls the fund forward to `now`, adding one monthly contribution for each
/// calendar month started since the last update. Returns `None` when `now`
/// is still in the month of the last update.
pub fn accrue(fund: &Fund, now: NaiveDateTime) -> Option<Fund> {
    let months = MonthKey::of(fund.last_update_date.date()).months_until(MonthKey::of(now.date()));
    if months <= 0 {
        return None;
    }

    let added = fund.monthly_contribution.saturating_mul(months);
    Some(Fund {
        accumulated_amount: fund.accumulated_amount.saturating_add(added),
        last_update_date: now,
        ..fund.clone()
    })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentRejection {
    #[error("Installment is due in {due}; only installments due in {current} can be paid")]
    NotDueThisMonth { due: MonthKey, current: MonthKey },
    #[error("Payment must be explicitly confirmed")]
    Unconfirmed,
    #[error("Installment is already {0}")]
    AlreadyInState(InstallmentStatus),
    #[error("Simulated expenses must be executed before paying their installments")]
    SimulatedExpense,
}

/// Checks a status change against the installment state machine.
pub fn check_transition(
    installment: &Installment,
    target: InstallmentStatus,
    today: NaiveDate,
    confirmed: bool,
) -> Result<(), PaymentRejection> {
    if installment.status == target {
        return Err(PaymentRejection::AlreadyInState(target));
    }

    match target {
        InstallmentStatus::Pending => Ok(()),
        InstallmentStatus::Paid => {
            let current = MonthKey::of(today);
            let due = installment.month();
            if due != current {
                return Err(PaymentRejection::NotDueThisMonth { due, current });
            }
            if !confirmed {
                return Err(PaymentRejection::Unconfirmed);
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentItem {
    pub expense_id: i64,
    pub description: String,
    pub installment_number: u32,
    pub amount: i64,
}

/// Pending installments of committed expenses due in one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyPayments {
    pub month: MonthKey,
    pub total: i64,
    pub items: Vec<PaymentItem>,
}

impl MonthlyPayments {
    fn empty(month: MonthKey) -> Self {
        Self { month, total: 0, items: Vec::new() }
    }

    fn push(&mut self, expense: &CreditCardExpense, installment: &Installment) {
        self.total += installment.amount;
        self.items.push(PaymentItem {
            expense_id: expense.id,
            description: expense.description.clone(),
            installment_number: installment.number,
            amount: installment.amount,
        });
    }

    /// True when paying this installment leaves the month with nothing pending.
    pub fn is_closed_by(&self, expense_id: i64, installment_number: u32) -> bool {
        matches!(
            self.items.as_slice(),
            [only] if only.expense_id == expense_id && only.installment_number == installment_number
        )
    }
}

fn committed_pending(
    expenses: &[CreditCardExpense],
) -> impl Iterator<Item = (&CreditCardExpense, &Installment)> {
    expenses
        .iter()
        .filter(|e| !e.is_simulation)
        .flat_map(|e| e.installments.iter().map(move |i| (e, i)))
        .filter(|(_, i)| i.is_pending())
}

/// Snapshot of what is still owed in `month`.
pub fn pending_for_month(expenses: &[CreditCardExpense], month: MonthKey) -> MonthlyPayments {
    let mut payments = MonthlyPayments::empty(month);
    for (expense, installment) in committed_pending(expenses).filter(|(_, i)| i.month() == month) {
        payments.push(expense, installment);
    }
    payments
}

/// Everything committed expenses owe in `month`, paid or not.
pub fn month_total(expenses: &[CreditCardExpense], month: MonthKey) -> i64 {
    expenses
        .iter()
        .filter(|e| !e.is_simulation)
        .flat_map(|e| &e.installments)
        .filter(|i| i.month() == month)
        .fold(0i64, |total, i| total.saturating_add(i.amount))
}

/// Every month with something still owed, in chronological order.
pub fn group_pending_by_month(expenses: &[CreditCardExpense]) -> Vec<MonthlyPayments> {
    let mut months: BTreeMap<MonthKey, MonthlyPayments> = BTreeMap::new();
    for (expense, installment) in committed_pending(expenses) {
        let month = installment.month();
        months
            .entry(month)
            .or_insert_with(|| MonthlyPayments::empty(month))
            .push(expense, installment);
    }
    months.into_values().collect()
}

/// Pending installments of every committed expense, the input the projection
/// treats as existing obligations.
pub fn committed_installments(expenses: &[CreditCardExpense]) -> Vec<Installment> {
    committed_pending(expenses).map(|(_, i)| i.clone()).collect()
}
