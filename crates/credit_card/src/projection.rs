//! Month-by-month projection of the fund against committed installments.
//!
//! The projection starts at the month of `now` and walks forward, carrying
//! each month's balance into the next one without flooring it, so a deficit
//! keeps dragging on every later month. Installments still pending from
//! earlier months are owed now and are counted in the first month.
//!
//! Contribution rule: the monthly contribution is added to every projected
//! month except the first one when that month has no committed payments; in
//! that case the contribution is considered already folded into the fund's
//! accumulated amount.

use crate::calendar::MonthKey;
use crate::models::{Fund, Installment};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_HORIZON_MONTHS: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonthStatus {
    Verde,
    Rojo,
}

impl MonthStatus {
    fn of(balance: i64) -> Self {
        if balance >= 0 { MonthStatus::Verde } else { MonthStatus::Rojo }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyProjection {
    pub month: MonthKey,
    pub initial_amount: i64,
    pub monthly_contribution: i64, // as applied this month
    pub accumulated_funds: i64,
    pub total_before: i64,
    pub new_payment: i64,
    pub balance_after_payments: i64,
    pub status: MonthStatus,
}

/// A temporary extra contribution on top of the fund's regular one, paid in
/// each of the first `months` projected months (the current month included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContributionBoost {
    pub extra: i64,
    pub months: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionOptions {
    /// Minimum number of months projected. The window always reaches the
    /// month of the last installment, however far that is.
    pub horizon_months: u32,
    pub boost: Option<ContributionBoost>,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            horizon_months: DEFAULT_HORIZON_MONTHS,
            boost: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationResult {
    pub can_afford: bool,
    pub can_pay_first_month: bool,
    pub can_pay_total: bool,

    pub available_funds: i64,
    pub projected_available_funds: i64,
    pub projected_available_funds_at_start: i64,

    pub required_funds: i64,
    pub monthly_required_funds: i64,
    pub total_required_funds: i64,
    pub installment_amount: i64,

    pub projected_balance: i64,
    pub total_projected_balance: i64,

    pub pending_installments: usize,
    pub pending_amount: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_monthly_contribution: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_duration_months: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceeds_max_contribution: Option<bool>,

    pub monthly_projections: Vec<MonthlyProjection>,
}

impl SimulationResult {
    /// The boost that models following the remediation suggestion.
    pub fn suggested_boost(&self, fund: &Fund) -> Option<ContributionBoost> {
        Some(ContributionBoost {
            extra: self.suggested_monthly_contribution? - fund.monthly_contribution,
            months: self.suggested_duration_months?,
        })
    }
}

pub fn project(
    fund: &Fund,
    existing: &[Installment],
    candidate: &[Installment],
    now: NaiveDate,
) -> SimulationResult {
    project_with(fund, existing, candidate, now, &ProjectionOptions::default())
}

pub fn project_with(
    fund: &Fund,
    existing: &[Installment],
    candidate: &[Installment],
    now: NaiveDate,
    options: &ProjectionOptions,
) -> SimulationResult {
    let start = MonthKey::of(now);
    let pending: Vec<&Installment> = existing.iter().filter(|i| i.is_pending()).collect();
    let table = monthly_table(fund, pending.iter().copied(), candidate, now, options);

    let index_of = |month: MonthKey| start.months_until(month.max(start)) as usize;
    let first_index = candidate.first().map(|i| index_of(i.month())).unwrap_or(0);
    let last_index = candidate.last().map(|i| index_of(i.month())).unwrap_or(first_index);
    let first = &table[first_index];

    let can_pay_first_month = first.status == MonthStatus::Verde;
    let can_pay_total = table
        .iter()
        .filter(|m| m.new_payment != 0)
        .all(|m| m.status == MonthStatus::Verde);
    let can_afford = if candidate.len() == 1 {
        can_pay_first_month
    } else {
        can_pay_total
    };

    let suggestion = if can_afford { None } else { suggest_contribution(fund, &table) };

    SimulationResult {
        can_afford,
        can_pay_first_month,
        can_pay_total,
        available_funds: fund.accumulated_amount,
        projected_available_funds: first.accumulated_funds,
        projected_available_funds_at_start: first.initial_amount,
        required_funds: first.total_before.saturating_add(first.new_payment),
        monthly_required_funds: first.total_before.saturating_add(first.new_payment),
        total_required_funds: table.iter().fold(0i64, |sum, m| sum.saturating_add(m.new_payment)),
        installment_amount: candidate.first().map(|i| i.amount).unwrap_or(0),
        projected_balance: first.balance_after_payments,
        total_projected_balance: table[last_index].balance_after_payments,
        pending_installments: pending.len(),
        pending_amount: pending.iter().fold(0i64, |sum, i| sum.saturating_add(i.amount)),
        suggested_monthly_contribution: suggestion.map(|(contribution, _)| contribution),
        suggested_duration_months: suggestion.map(|(_, months)| months),
        exceeds_max_contribution: suggestion
            .map(|(contribution, _)| contribution > fund.effective_max_contribution()),
        monthly_projections: table,
    }
}

/// Builds the projection table. `existing` should only hold pending
/// installments; every item passed is treated as still owed.
pub fn monthly_table<'a>(
    fund: &Fund,
    existing: impl IntoIterator<Item = &'a Installment>,
    candidate: &[Installment],
    now: NaiveDate,
    options: &ProjectionOptions,
) -> Vec<MonthlyProjection> {
    let start = MonthKey::of(now);
    let total_before = bucket_by_month(existing, start);
    let new_payment = bucket_by_month(candidate, start);

    let last_due = total_before
        .keys()
        .chain(new_payment.keys())
        .max()
        .copied()
        .unwrap_or(start);
    let span = start.months_until(last_due) as usize + 1;
    let len = span.max(options.horizon_months as usize);

    let mut table = Vec::with_capacity(len);
    let mut month = start;
    let mut initial_amount = fund.accumulated_amount;

    for index in 0..len {
        let before = total_before.get(&month).copied().unwrap_or(0);
        let new = new_payment.get(&month).copied().unwrap_or(0);

        let folded = index == 0 && before == 0;
        let mut contribution = if folded { 0 } else { fund.monthly_contribution };
        if let Some(boost) = options.boost {
            if (index as u32) < boost.months {
                contribution = contribution.saturating_add(boost.extra);
            }
        }

        let accumulated_funds = initial_amount.saturating_add(contribution);
        let balance = accumulated_funds.saturating_sub(before).saturating_sub(new);

        table.push(MonthlyProjection {
            month,
            initial_amount,
            monthly_contribution: contribution,
            accumulated_funds,
            total_before: before,
            new_payment: new,
            balance_after_payments: balance,
            status: MonthStatus::of(balance),
        });

        initial_amount = balance;
        month = month.next();
    }

    table
}

fn bucket_by_month<'a>(
    installments: impl IntoIterator<Item = &'a Installment>,
    start: MonthKey,
) -> BTreeMap<MonthKey, i64> {
    let mut buckets = BTreeMap::new();
    for installment in installments {
        let total = buckets.entry(installment.month().max(start)).or_insert(0i64);
        *total = total.saturating_add(installment.amount);
    }
    buckets
}

/// Sizes a contribution raise that clears the worst deficit among the months
/// carrying the new purchase. The raise is spread over every month from now
/// through the first such deficit, so it lands before any shortfall.
///
/// Returns `(suggested_monthly_contribution, duration_months)`.
fn suggest_contribution(fund: &Fund, table: &[MonthlyProjection]) -> Option<(i64, u32)> {
    let mut deficits = table
        .iter()
        .enumerate()
        .filter(|(_, m)| m.new_payment != 0 && m.status == MonthStatus::Rojo);

    let (first_index, _) = deficits.next()?;
    let worst = table
        .iter()
        .filter(|m| m.new_payment != 0)
        .map(|m| m.balance_after_payments)
        .min()?;

    // Widened so extreme balances cannot overflow the rounding.
    let deficit = -i128::from(worst);
    let duration = first_index as i128 + 1;
    let raise = (deficit + duration - 1) / duration;
    let suggested = i64::try_from(i128::from(fund.monthly_contribution) + raise).unwrap_or(i64::MAX);

    tracing::debug!(%deficit, %duration, suggested, "Suggesting contribution raise");
    Some((suggested, duration as u32))
}
