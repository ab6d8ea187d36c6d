use crate::calendar::MonthKey;
use crate::models::{
    CreateExpenseRequest, CreditCardExpense, Fund, FundRequest, InstallmentStatus, SimulationRequest,
};
use crate::projection::{self, ProjectionOptions, SimulationResult};
use crate::repository::{ExpenseRepository, FundRepository};
use crate::schedule;
use crate::settlement::{self, MonthlyPayments, PaymentRejection};
use chrono::{NaiveDate, NaiveDateTime};
use database::{self, Database, RepositoryError};
use serde::Serialize;
use tracing::instrument;

#[derive(Debug, thiserror::Error)]
pub enum CreditCardError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Credit card fund is not configured")]
    FundNotConfigured,
    #[error("Payment not allowed: {0}")]
    IneligiblePayment(String),
    #[error("Expense or installment not found")]
    NotFound,
    #[error("Database error: {0}")]
    Infrastructure(String),
}

impl From<RepositoryError> for CreditCardError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => CreditCardError::NotFound,
            RepositoryError::CheckViolation(msg) => CreditCardError::InvalidInput(msg),
            RepositoryError::Infrastructure(e) => CreditCardError::Infrastructure(e.to_string()),
            RepositoryError::InvalidData(msg) => CreditCardError::Infrastructure(msg),
        }
    }
}

impl From<PaymentRejection> for CreditCardError {
    fn from(rejection: PaymentRejection) -> Self {
        CreditCardError::IneligiblePayment(rejection.to_string())
    }
}

fn reject(rejection: PaymentRejection) -> CreditCardError {
    tracing::warn!(%rejection, "Payment rejected");
    rejection.into()
}

/// Outcome of a single installment status change. `settled_fund` is set
/// when the payment closed its month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallmentUpdate {
    pub expense: CreditCardExpense,
    pub settled_fund: Option<Fund>,
}

/// Outcome of a bulk month payment. `month_total` is what the fund was
/// charged: every installment due in the month, including ones paid before.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthSettlement {
    pub paid: MonthlyPayments,
    pub month_total: i64,
    pub fund: Fund,
}

/// Loads the fund, rolling it forward to `now` first.
async fn load_fund(conn: &mut database::Connection, now: NaiveDateTime) -> Result<Fund, CreditCardError> {
    let mut repo = FundRepository::new(conn);
    let fund = repo.find().await?.ok_or(CreditCardError::FundNotConfigured)?;

    match settlement::accrue(&fund, now) {
        Some(accrued) => {
            repo.upsert(&accrued).await?;
            tracing::info!(
                from = %fund.last_update_date,
                accumulated_amount = accrued.accumulated_amount,
                "Monthly contributions accrued"
            );
            Ok(accrued)
        }
        None => Ok(fund),
    }
}

pub struct CreditCardService;

impl CreditCardService {
    // --- Fund ---

    /// Current fund, with any monthly contributions due since the last
    /// update added and persisted.
    #[instrument(skip(db))]
    pub async fn get_fund(db: &Database, now: NaiveDateTime) -> Result<Fund, CreditCardError> {
        let mut uow = db.begin().await?;
        let fund = load_fund(uow.connection(), now).await?;

        uow.commit().await?;
        Ok(fund)
    }

    #[instrument(skip(db))]
    pub async fn upsert_fund(db: &Database, req: FundRequest, now: NaiveDateTime) -> Result<Fund, CreditCardError> {
        let mut uow = db.begin().await?;
        let mut repo = FundRepository::new(uow.connection());

        let current = repo.find().await?;
        let fund = req.apply(current.as_ref(), now);
        repo.upsert(&fund).await?;

        uow.commit().await?;
        tracing::info!(
            monthly_contribution = fund.monthly_contribution,
            accumulated_amount = fund.accumulated_amount,
            "Fund saved"
        );
        Ok(fund)
    }

    // --- Expenses ---

    #[instrument(skip(db))]
    pub async fn list_expenses(db: &Database, include_simulations: bool) -> Result<Vec<CreditCardExpense>, CreditCardError> {
        let mut uow = db.begin().await?;
        let mut repo = ExpenseRepository::new(uow.connection());

        Ok(repo.list(include_simulations).await?)
    }

    #[instrument(skip(db, req))]
    pub async fn create_expense(db: &Database, req: CreateExpenseRequest) -> Result<CreditCardExpense, CreditCardError> {
        let mut uow = db.begin().await?;
        let mut repo = ExpenseRepository::new(uow.connection());

        let id = repo.create(&req).await?;
        let expense = repo.find_by_id(id).await?.ok_or(CreditCardError::NotFound)?;

        uow.commit().await?;
        tracing::info!(id, amount = expense.amount, is_simulation = expense.is_simulation, "Expense created");
        Ok(expense)
    }

    #[instrument(skip(db))]
    pub async fn delete_expense(db: &Database, id: i64) -> Result<(), CreditCardError> {
        let mut uow = db.begin().await?;
        let mut repo = ExpenseRepository::new(uow.connection());

        repo.delete(id).await?;

        uow.commit().await?;
        Ok(())
    }

    /// Turns a simulated purchase into a committed expense.
    #[instrument(skip(db))]
    pub async fn execute_expense(db: &Database, id: i64) -> Result<CreditCardExpense, CreditCardError> {
        let mut uow = db.begin().await?;
        let mut repo = ExpenseRepository::new(uow.connection());

        let expense = repo.find_by_id(id).await?.ok_or(CreditCardError::NotFound)?;
        if !expense.is_simulation {
            return Err(CreditCardError::InvalidInput("Expense is already executed".into()));
        }

        repo.mark_executed(id).await?;
        let executed = repo.find_by_id(id).await?.ok_or(CreditCardError::NotFound)?;

        uow.commit().await?;
        Ok(executed)
    }

    #[instrument(skip(db))]
    pub async fn update_purchase_date(
        db: &Database,
        id: i64,
        purchase_date: NaiveDate,
    ) -> Result<CreditCardExpense, CreditCardError> {
        let mut uow = db.begin().await?;
        let mut repo = ExpenseRepository::new(uow.connection());

        let expense = repo.find_by_id(id).await?.ok_or(CreditCardError::NotFound)?;
        let installments = schedule::regenerate_due_dates(&expense.installments, purchase_date)
            .map_err(CreditCardError::InvalidInput)?;

        repo.update_schedule(id, purchase_date, &installments).await?;
        let updated = repo.find_by_id(id).await?.ok_or(CreditCardError::NotFound)?;

        uow.commit().await?;
        Ok(updated)
    }

    // --- Payments ---

    /// Pays or reverts one installment. Paying the last pending installment
    /// of the current month settles the fund with that month's total, paid
    /// installments included, captured before the status change.
    #[instrument(skip(db))]
    pub async fn update_installment_status(
        db: &Database,
        expense_id: i64,
        number: u32,
        target: InstallmentStatus,
        confirmed: bool,
        now: NaiveDateTime,
    ) -> Result<InstallmentUpdate, CreditCardError> {
        let today = now.date();
        let mut uow = db.begin().await?;
        let mut expenses = ExpenseRepository::new(uow.connection());

        let expense = expenses.find_by_id(expense_id).await?.ok_or(CreditCardError::NotFound)?;
        let installment = expense.installment(number).ok_or(CreditCardError::NotFound)?;

        if target == InstallmentStatus::Paid && expense.is_simulation {
            return Err(reject(PaymentRejection::SimulatedExpense));
        }
        settlement::check_transition(installment, target, today, confirmed).map_err(reject)?;

        let month = MonthKey::of(today);
        let committed = expenses.list(false).await?;
        let snapshot = settlement::pending_for_month(&committed, month);
        let month_total = settlement::month_total(&committed, month);
        let closes_month = target == InstallmentStatus::Paid && snapshot.is_closed_by(expense_id, number);

        expenses.set_installment_status(expense_id, number, target).await?;
        let updated = expenses.find_by_id(expense_id).await?.ok_or(CreditCardError::NotFound)?;

        let settled_fund = if closes_month {
            let fund = load_fund(uow.connection(), now).await?;
            let settled = settlement::settle(&fund, month_total, now);
            FundRepository::new(uow.connection()).upsert(&settled).await?;

            tracing::info!(
                month = %month,
                total = month_total,
                accumulated_amount = settled.accumulated_amount,
                "Month closed, fund settled"
            );
            Some(settled)
        } else {
            None
        };

        uow.commit().await?;
        Ok(InstallmentUpdate { expense: updated, settled_fund })
    }

    /// Pays every pending installment of the current month at once. The
    /// month's total is captured before any update, every pending installment
    /// is marked paid, and the fund is settled exactly once, all in one
    /// transaction.
    #[instrument(skip(db))]
    pub async fn pay_month(
        db: &Database,
        month: MonthKey,
        confirmed: bool,
        now: NaiveDateTime,
    ) -> Result<MonthSettlement, CreditCardError> {
        let current = MonthKey::of(now.date());
        if month != current {
            return Err(reject(PaymentRejection::NotDueThisMonth { due: month, current }));
        }
        if !confirmed {
            return Err(reject(PaymentRejection::Unconfirmed));
        }

        let mut uow = db.begin().await?;
        let fund = load_fund(uow.connection(), now).await?;

        let mut expenses = ExpenseRepository::new(uow.connection());
        let committed = expenses.list(false).await?;
        let snapshot = settlement::pending_for_month(&committed, month);
        let month_total = settlement::month_total(&committed, month);
        if snapshot.items.is_empty() {
            return Err(CreditCardError::InvalidInput(format!(
                "No pending installments due in {}",
                month
            )));
        }

        for item in &snapshot.items {
            expenses
                .set_installment_status(item.expense_id, item.installment_number, InstallmentStatus::Paid)
                .await?;
        }

        let settled = settlement::settle(&fund, month_total, now);
        FundRepository::new(uow.connection()).upsert(&settled).await?;

        uow.commit().await?;
        tracing::info!(
            month = %month,
            installments = snapshot.items.len(),
            total = month_total,
            accumulated_amount = settled.accumulated_amount,
            "Month paid in bulk"
        );
        Ok(MonthSettlement {
            paid: snapshot,
            month_total,
            fund: settled,
        })
    }

    #[instrument(skip(db))]
    pub async fn monthly_payments(db: &Database) -> Result<Vec<MonthlyPayments>, CreditCardError> {
        let mut uow = db.begin().await?;
        let mut repo = ExpenseRepository::new(uow.connection());

        let expenses = repo.list(false).await?;
        Ok(settlement::group_pending_by_month(&expenses))
    }

    // --- Simulation ---

    #[instrument(skip(db, req))]
    pub async fn simulate(
        db: &Database,
        req: SimulationRequest,
        now: NaiveDateTime,
        horizon_months: u32,
    ) -> Result<SimulationResult, CreditCardError> {
        let mut uow = db.begin().await?;
        let fund = load_fund(uow.connection(), now).await?;

        let mut expenses = ExpenseRepository::new(uow.connection());
        let committed = expenses.list(false).await?;
        uow.commit().await?;

        let result = Self::simulate_with(&fund, &committed, &req, now.date(), horizon_months);
        tracing::debug!(
            amount = req.amount(),
            start = %req.start_date(),
            can_afford = result.can_afford,
            months = result.monthly_projections.len(),
            "Simulation projected"
        );
        Ok(result)
    }

    /// Projects a hypothetical purchase against already loaded state.
    pub fn simulate_with(
        fund: &Fund,
        expenses: &[CreditCardExpense],
        req: &SimulationRequest,
        today: NaiveDate,
        horizon_months: u32,
    ) -> SimulationResult {
        let existing = settlement::committed_installments(expenses);
        let options = ProjectionOptions {
            horizon_months,
            boost: None,
        };
        projection::project_with(fund, &existing, req.installments(), today, &options)
    }
}
