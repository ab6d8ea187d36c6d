use crate::calendar::{self, MonthKey};
use crate::schedule;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallmentStatus {
    Pending,
    Paid,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "pending",
            InstallmentStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for InstallmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstallmentStatus::Pending),
            "paid" => Ok(InstallmentStatus::Paid),
            other => Err(format!("Unknown installment status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub number: u32,
    pub amount: i64, // Cents
    pub due_date: NaiveDate,
    pub status: InstallmentStatus,
}

impl Installment {
    pub fn month(&self) -> MonthKey {
        MonthKey::of(self.due_date)
    }

    pub fn is_pending(&self) -> bool {
        self.status == InstallmentStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCardExpense {
    pub id: i64,
    pub amount: i64, // Cents
    pub description: String,
    pub purchase_date: NaiveDate,
    pub total_installments: u32,
    pub installments: Vec<Installment>,
    pub is_simulation: bool,
    pub created_at: String,
}

impl CreditCardExpense {
    pub fn installment(&self, number: u32) -> Option<&Installment> {
        self.installments.iter().find(|i| i.number == number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fund {
    pub monthly_contribution: i64,             // Cents
    pub max_monthly_contribution: Option<i64>, // Cents
    pub accumulated_amount: i64,               // Cents
    pub last_update_date: NaiveDateTime,
}

impl Fund {
    /// The ceiling the user is willing to raise the contribution to. Falls
    /// back to 1.5x the monthly contribution, rounded half up.
    pub fn effective_max_contribution(&self) -> i64 {
        self.max_monthly_contribution
            .unwrap_or_else(|| (self.monthly_contribution * 3 + 1) / 2)
    }
}

/// Largest amount accepted anywhere money enters the system. Keeps every sum
/// the projection builds well inside `i64`.
pub const MAX_AMOUNT_DOLLARS: f64 = 1_000_000_000.0;

fn to_cents(dollars: f64, field: &str) -> Result<i64, String> {
    if !dollars.is_finite() {
        return Err(format!("{} must be a finite number", field));
    }
    if dollars.abs() > MAX_AMOUNT_DOLLARS {
        return Err(format!("{} cannot exceed {}", field, MAX_AMOUNT_DOLLARS));
    }
    Ok((dollars * 100.0).round() as i64)
}

// --- Fund ---

#[derive(Debug, Deserialize, Validate)]
pub struct RawFundRequest {
    #[validate(range(min = 0.0, message = "Monthly contribution cannot be negative"))]
    pub monthly_contribution_dollars: f64,
    #[validate(range(min = 0.0, message = "Maximum monthly contribution cannot be negative"))]
    pub max_monthly_contribution_dollars: Option<f64>,
    #[validate(range(min = 0.0, message = "Accumulated amount cannot be negative"))]
    pub accumulated_amount_dollars: Option<f64>,
}

#[derive(Debug)]
pub struct FundRequest {
    monthly_contribution: i64,
    max_monthly_contribution: Option<i64>,
    accumulated_amount: Option<i64>,
}

impl FundRequest {
    pub fn new(raw: RawFundRequest) -> Result<Self, String> {
        raw.validate().map_err(|e| e.to_string())?;

        let monthly_contribution = to_cents(raw.monthly_contribution_dollars, "Monthly contribution")?;
        let max_monthly_contribution = raw
            .max_monthly_contribution_dollars
            .map(|d| to_cents(d, "Maximum monthly contribution"))
            .transpose()?;
        let accumulated_amount = raw
            .accumulated_amount_dollars
            .map(|d| to_cents(d, "Accumulated amount"))
            .transpose()?;

        if let Some(max) = max_monthly_contribution {
            if max < monthly_contribution {
                return Err("Maximum monthly contribution cannot be below the monthly contribution".to_string());
            }
        }

        Ok(Self {
            monthly_contribution,
            max_monthly_contribution,
            accumulated_amount,
        })
    }

    /// Applies the request on top of the stored fund, if any. An omitted
    /// accumulated amount keeps the stored one (zero for a new fund).
    pub fn apply(&self, current: Option<&Fund>, now: NaiveDateTime) -> Fund {
        Fund {
            monthly_contribution: self.monthly_contribution,
            max_monthly_contribution: self
                .max_monthly_contribution
                .or_else(|| current.and_then(|f| f.max_monthly_contribution)),
            accumulated_amount: self
                .accumulated_amount
                .or_else(|| current.map(|f| f.accumulated_amount))
                .unwrap_or(0),
            last_update_date: now,
        }
    }
}

// --- Expenses ---

#[derive(Debug, Deserialize, Validate)]
pub struct RawCreateExpenseRequest {
    pub amount_dollars: f64,
    #[validate(length(min = 1, max = 200, message = "Description must be between 1 and 200 characters"))]
    pub description: String,
    pub purchase_date: Option<String>, // 'YYYY-MM-DD', defaults to today
    #[validate(range(min = 1, message = "An expense needs at least one installment"))]
    pub total_installments: u32,
    pub is_simulation: Option<bool>,
}

#[derive(Debug)]
pub struct CreateExpenseRequest {
    amount: i64,
    description: String,
    purchase_date: NaiveDate,
    installments: Vec<Installment>,
    is_simulation: bool,
}

impl CreateExpenseRequest {
    pub fn new(raw: RawCreateExpenseRequest, today: NaiveDate) -> Result<Self, String> {
        raw.validate().map_err(|e| e.to_string())?;

        let description = raw.description.trim().to_string();
        if description.is_empty() {
            return Err("Description cannot be empty".to_string());
        }

        let purchase_date = match raw.purchase_date.as_deref() {
            Some(d) => calendar::parse_date(d)?,
            None => today,
        };
        let amount = to_cents(raw.amount_dollars, "Amount")?;
        let installments = schedule::generate_installments(amount, raw.total_installments, purchase_date)?;

        Ok(Self {
            amount,
            description,
            purchase_date,
            installments,
            is_simulation: raw.is_simulation.unwrap_or(true),
        })
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn purchase_date(&self) -> NaiveDate {
        self.purchase_date
    }

    pub fn total_installments(&self) -> u32 {
        self.installments.len() as u32
    }

    pub fn installments(&self) -> &[Installment] {
        &self.installments
    }

    pub fn is_simulation(&self) -> bool {
        self.is_simulation
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePurchaseDateRequest {
    pub purchase_date: String, // 'YYYY-MM-DD'
}

#[derive(Debug, Deserialize)]
pub struct UpdateInstallmentStatusRequest {
    pub status: InstallmentStatus,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Deserialize)]
pub struct PayMonthRequest {
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListExpensesQuery {
    pub include_simulations: Option<bool>,
}

// --- Simulation ---

#[derive(Debug, Deserialize, Validate)]
pub struct RawSimulationRequest {
    pub amount_dollars: f64,
    #[validate(range(min = 1, message = "A purchase needs at least one installment"))]
    pub total_installments: u32,
    pub start_date: Option<String>, // 'YYYY-MM-DD', defaults to today
}

/// A validated hypothetical purchase, with its schedule already generated.
#[derive(Debug)]
pub struct SimulationRequest {
    amount: i64,
    start_date: NaiveDate,
    installments: Vec<Installment>,
}

impl SimulationRequest {
    pub fn new(raw: RawSimulationRequest, today: NaiveDate) -> Result<Self, String> {
        raw.validate().map_err(|e| e.to_string())?;

        let start_date = match raw.start_date.as_deref() {
            Some(d) => calendar::parse_date(d)?,
            None => today,
        };
        let amount = to_cents(raw.amount_dollars, "Amount")?;
        let installments = schedule::generate_installments(amount, raw.total_installments, start_date)?;

        Ok(Self { amount, start_date, installments })
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn installments(&self) -> &[Installment] {
        &self.installments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 20).unwrap()
    }

    fn raw_expense(amount: f64, installments: u32) -> RawCreateExpenseRequest {
        RawCreateExpenseRequest {
            amount_dollars: amount,
            description: "Laptop".into(),
            purchase_date: Some("2025-06-10".into()),
            total_installments: installments,
            is_simulation: None,
        }
    }

    #[test]
    fn test_create_expense_request_generates_schedule() {
        let req = CreateExpenseRequest::new(raw_expense(120.0, 3), today()).unwrap();
        assert_eq!(req.amount(), 12000);
        assert_eq!(req.total_installments(), 3);
        assert!(req.is_simulation());
        assert_eq!(req.installments()[2].due_date, NaiveDate::from_ymd_opt(2025, 8, 10).unwrap());
    }

    #[test]
    fn test_create_expense_request_defaults_to_today() {
        let mut raw = raw_expense(10.0, 1);
        raw.purchase_date = None;
        let req = CreateExpenseRequest::new(raw, today()).unwrap();
        assert_eq!(req.purchase_date(), today());
    }

    #[test]
    fn test_create_expense_request_rejects_bad_input() {
        assert!(CreateExpenseRequest::new(raw_expense(0.0, 3), today()).is_err());
        assert!(CreateExpenseRequest::new(raw_expense(-5.0, 3), today()).is_err());
        assert!(CreateExpenseRequest::new(raw_expense(10.0, 0), today()).is_err());
        assert!(CreateExpenseRequest::new(raw_expense(f64::NAN, 1), today()).is_err());

        let mut blank = raw_expense(10.0, 1);
        blank.description = "   ".into();
        assert!(CreateExpenseRequest::new(blank, today()).is_err());

        let mut bad_date = raw_expense(10.0, 1);
        bad_date.purchase_date = Some("2025-13-01".into());
        assert!(CreateExpenseRequest::new(bad_date, today()).is_err());
    }

    #[test]
    fn test_amounts_above_ceiling_are_rejected() {
        assert_eq!(to_cents(MAX_AMOUNT_DOLLARS, "Amount"), Ok(100_000_000_000));
        assert!(to_cents(9.3e16, "Amount").is_err());
        assert!(to_cents(-9.3e16, "Amount").is_err());

        assert!(CreateExpenseRequest::new(raw_expense(9.3e16, 2), today()).is_err());

        let huge_fund = RawFundRequest {
            monthly_contribution_dollars: 2.0e9,
            max_monthly_contribution_dollars: None,
            accumulated_amount_dollars: None,
        };
        assert!(FundRequest::new(huge_fund).is_err());

        let huge_simulation = RawSimulationRequest {
            amount_dollars: 9.3e16,
            total_installments: 2,
            start_date: None,
        };
        assert!(SimulationRequest::new(huge_simulation, today()).is_err());
    }

    #[test]
    fn test_fund_request_validation() {
        let negative = RawFundRequest {
            monthly_contribution_dollars: -1.0,
            max_monthly_contribution_dollars: None,
            accumulated_amount_dollars: None,
        };
        assert!(FundRequest::new(negative).is_err());

        let max_below = RawFundRequest {
            monthly_contribution_dollars: 100.0,
            max_monthly_contribution_dollars: Some(50.0),
            accumulated_amount_dollars: None,
        };
        assert!(FundRequest::new(max_below).is_err());
    }

    #[test]
    fn test_fund_request_apply_keeps_stored_accumulated_amount() {
        let now = today().and_hms_opt(9, 0, 0).unwrap();
        let stored = Fund {
            monthly_contribution: 10000,
            max_monthly_contribution: Some(20000),
            accumulated_amount: 55000,
            last_update_date: now,
        };
        let req = FundRequest::new(RawFundRequest {
            monthly_contribution_dollars: 150.0,
            max_monthly_contribution_dollars: None,
            accumulated_amount_dollars: None,
        })
        .unwrap();

        let fund = req.apply(Some(&stored), now);
        assert_eq!(fund.monthly_contribution, 15000);
        assert_eq!(fund.accumulated_amount, 55000);
        assert_eq!(fund.max_monthly_contribution, Some(20000));

        let fresh = req.apply(None, now);
        assert_eq!(fresh.accumulated_amount, 0);
    }

    #[test]
    fn test_effective_max_contribution_defaults_to_one_and_a_half() {
        let fund = Fund {
            monthly_contribution: 1001,
            max_monthly_contribution: None,
            accumulated_amount: 0,
            last_update_date: today().and_hms_opt(0, 0, 0).unwrap(),
        };
        assert_eq!(fund.effective_max_contribution(), 1502);
    }

    #[test]
    fn test_simulation_request() {
        let raw = RawSimulationRequest {
            amount_dollars: 100.0,
            total_installments: 3,
            start_date: None,
        };
        let req = SimulationRequest::new(raw, today()).unwrap();
        assert_eq!(req.start_date(), today());
        assert_eq!(req.installments().iter().map(|i| i.amount).sum::<i64>(), 10000);
    }

    #[test]
    fn test_installment_status_round_trips_as_text() {
        assert_eq!("paid".parse::<InstallmentStatus>().unwrap(), InstallmentStatus::Paid);
        assert_eq!(InstallmentStatus::Pending.to_string(), "pending");
        assert!("overdue".parse::<InstallmentStatus>().is_err());
    }
}
