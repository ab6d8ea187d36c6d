use crate::calendar;
use crate::models::{CreateExpenseRequest, CreditCardExpense, Fund, Installment, InstallmentStatus, TIMESTAMP_FORMAT};
use chrono::{NaiveDate, NaiveDateTime};
use database::{self, RepositoryError};
use sqlx::FromRow;
use std::collections::BTreeMap;

const FUND_ID: i64 = 1;

fn parse_date(raw: &str) -> Result<NaiveDate, RepositoryError> {
    calendar::parse_date(raw).map_err(RepositoryError::InvalidData)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[derive(FromRow)]
struct FundRecord {
    monthly_contribution: i64,
    max_monthly_contribution: Option<i64>,
    accumulated_amount: i64,
    last_update_date: String,
}

impl TryFrom<FundRecord> for Fund {
    type Error = RepositoryError;
    fn try_from(record: FundRecord) -> Result<Self, Self::Error> {
        let last_update_date = NaiveDateTime::parse_from_str(&record.last_update_date, TIMESTAMP_FORMAT)
            .map_err(|_| RepositoryError::InvalidData(format!("bad timestamp '{}'", record.last_update_date)))?;
        Ok(Fund {
            monthly_contribution: record.monthly_contribution,
            max_monthly_contribution: record.max_monthly_contribution,
            accumulated_amount: record.accumulated_amount,
            last_update_date,
        })
    }
}

pub(crate) struct FundRepository<'a> {
    conn: &'a mut database::Connection,
}

impl<'a> FundRepository<'a> {
    pub fn new(conn: &'a mut database::Connection) -> Self {
        Self { conn }
    }

    pub async fn find(&mut self) -> Result<Option<Fund>, RepositoryError> {
        let record = sqlx::query_as::<_, FundRecord>(
            "SELECT monthly_contribution, max_monthly_contribution, accumulated_amount, last_update_date FROM credit_card_funds WHERE id = $1",
        )
        .bind(FUND_ID)
        .fetch_optional(&mut *self.conn)
        .await?;

        record.map(Fund::try_from).transpose()
    }

    pub async fn upsert(&mut self, fund: &Fund) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO credit_card_funds (id, monthly_contribution, max_monthly_contribution, accumulated_amount, last_update_date)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(id) DO UPDATE SET
            monthly_contribution = excluded.monthly_contribution,
            max_monthly_contribution = excluded.max_monthly_contribution,
            accumulated_amount = excluded.accumulated_amount,
            last_update_date = excluded.last_update_date
            "#,
        )
        .bind(FUND_ID)
        .bind(fund.monthly_contribution)
        .bind(fund.max_monthly_contribution)
        .bind(fund.accumulated_amount)
        .bind(fund.last_update_date.format(TIMESTAMP_FORMAT).to_string())
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }
}

#[derive(FromRow)]
struct ExpenseRecord {
    id: i64,
    amount: i64,
    description: String,
    purchase_date: String,
    total_installments: i64,
    is_simulation: bool,
    created_at: String,
}

#[derive(FromRow)]
struct InstallmentRecord {
    expense_id: i64,
    number: i64,
    amount: i64,
    due_date: String,
    status: String,
}

impl TryFrom<InstallmentRecord> for Installment {
    type Error = RepositoryError;
    fn try_from(record: InstallmentRecord) -> Result<Self, Self::Error> {
        Ok(Installment {
            number: record.number as u32,
            amount: record.amount,
            due_date: parse_date(&record.due_date)?,
            status: record.status.parse().map_err(RepositoryError::InvalidData)?,
        })
    }
}

impl ExpenseRecord {
    fn into_expense(self, installments: Vec<Installment>) -> Result<CreditCardExpense, RepositoryError> {
        Ok(CreditCardExpense {
            id: self.id,
            amount: self.amount,
            description: self.description,
            purchase_date: parse_date(&self.purchase_date)?,
            total_installments: self.total_installments as u32,
            installments,
            is_simulation: self.is_simulation,
            created_at: self.created_at,
        })
    }
}

pub(crate) struct ExpenseRepository<'a> {
    conn: &'a mut database::Connection,
}

impl<'a> ExpenseRepository<'a> {
    pub fn new(conn: &'a mut database::Connection) -> Self {
        Self { conn }
    }

    pub async fn create(&mut self, req: &CreateExpenseRequest) -> Result<i64, RepositoryError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO credit_card_expenses (amount, description, purchase_date, total_installments, is_simulation) VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(req.amount())
        .bind(req.description())
        .bind(format_date(req.purchase_date()))
        .bind(req.total_installments() as i64)
        .bind(req.is_simulation())
        .fetch_one(&mut *self.conn)
        .await?;

        for installment in req.installments() {
            sqlx::query(
                "INSERT INTO credit_card_installments (expense_id, number, amount, due_date, status) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(id)
            .bind(installment.number as i64)
            .bind(installment.amount)
            .bind(format_date(installment.due_date))
            .bind(installment.status.as_str())
            .execute(&mut *self.conn)
            .await?;
        }

        Ok(id)
    }

    pub async fn find_by_id(&mut self, id: i64) -> Result<Option<CreditCardExpense>, RepositoryError> {
        let record = sqlx::query_as::<_, ExpenseRecord>(
            "SELECT id, amount, description, purchase_date, total_installments, is_simulation, created_at FROM credit_card_expenses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        let installments = sqlx::query_as::<_, InstallmentRecord>(
            "SELECT expense_id, number, amount, due_date, status FROM credit_card_installments WHERE expense_id = $1 ORDER BY number",
        )
        .bind(id)
        .fetch_all(&mut *self.conn)
        .await?
        .into_iter()
        .map(Installment::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        record.into_expense(installments).map(Some)
    }

    pub async fn list(&mut self, include_simulations: bool) -> Result<Vec<CreditCardExpense>, RepositoryError> {
        let records = sqlx::query_as::<_, ExpenseRecord>(
            "SELECT id, amount, description, purchase_date, total_installments, is_simulation, created_at FROM credit_card_expenses WHERE ($1 OR is_simulation = 0) ORDER BY purchase_date, id",
        )
        .bind(include_simulations)
        .fetch_all(&mut *self.conn)
        .await?;

        let installment_records = sqlx::query_as::<_, InstallmentRecord>(
            "SELECT expense_id, number, amount, due_date, status FROM credit_card_installments ORDER BY expense_id, number",
        )
        .fetch_all(&mut *self.conn)
        .await?;

        let mut by_expense: BTreeMap<i64, Vec<Installment>> = BTreeMap::new();
        for record in installment_records {
            let expense_id = record.expense_id;
            by_expense.entry(expense_id).or_default().push(record.try_into()?);
        }

        records
            .into_iter()
            .map(|r| {
                let installments = by_expense.remove(&r.id).unwrap_or_default();
                r.into_expense(installments)
            })
            .collect()
    }

    pub async fn mark_executed(&mut self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE credit_card_expenses SET is_simulation = 0 WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Moves the purchase date and rewrites each installment's due date.
    pub async fn update_schedule(
        &mut self,
        id: i64,
        purchase_date: NaiveDate,
        installments: &[Installment],
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE credit_card_expenses SET purchase_date = $1 WHERE id = $2")
            .bind(format_date(purchase_date))
            .bind(id)
            .execute(&mut *self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        for installment in installments {
            sqlx::query("UPDATE credit_card_installments SET due_date = $1 WHERE expense_id = $2 AND number = $3")
                .bind(format_date(installment.due_date))
                .bind(id)
                .bind(installment.number as i64)
                .execute(&mut *self.conn)
                .await?;
        }
        Ok(())
    }

    pub async fn set_installment_status(
        &mut self,
        expense_id: i64,
        number: u32,
        status: InstallmentStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE credit_card_installments SET status = $1 WHERE expense_id = $2 AND number = $3")
            .bind(status.as_str())
            .bind(expense_id)
            .bind(number as i64)
            .execute(&mut *self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    pub async fn delete(&mut self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM credit_card_expenses WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
