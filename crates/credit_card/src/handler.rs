use crate::calendar::{self, MonthKey};
use crate::models::{
    CreateExpenseRequest, CreditCardExpense, Fund, FundRequest, ListExpensesQuery, PayMonthRequest,
    RawCreateExpenseRequest, RawFundRequest, RawSimulationRequest, SimulationRequest,
    UpdateInstallmentStatusRequest, UpdatePurchaseDateRequest,
};
use crate::projection::SimulationResult;
use crate::service::{CreditCardError, CreditCardService, InstallmentUpdate, MonthSettlement};
use crate::settlement::MonthlyPayments;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::NaiveDateTime;
use common::AppState;
use serde_json::json;
use std::sync::Arc;

impl IntoResponse for CreditCardError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            CreditCardError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            CreditCardError::FundNotConfigured => (
                StatusCode::NOT_FOUND,
                "Credit card fund is not configured".to_string(),
            ),
            CreditCardError::IneligiblePayment(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            CreditCardError::NotFound => (
                StatusCode::NOT_FOUND,
                "Expense or installment not found".to_string(),
            ),
            CreditCardError::Infrastructure(err) => {
                tracing::error!(error = %err, "Credit card request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": msg }))).into_response()
    }
}

pub fn credit_card_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/fund", get(get_fund).put(put_fund))
        .route("/expenses", get(list_expenses).post(create_expense))
        .route("/expenses/{id}", delete(delete_expense))
        .route("/expenses/{id}/execute", post(execute_expense))
        .route("/expenses/{id}/purchase-date", put(update_purchase_date))
        .route("/expenses/{id}/installments/{number}", put(update_installment_status))
        .route("/payments", get(monthly_payments))
        .route("/payments/{month}/pay", post(pay_month))
        .route("/simulate", post(simulate))
        .with_state(state)
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

async fn get_fund(State(state): State<Arc<AppState>>) -> Result<Json<Fund>, CreditCardError> {
    let fund = CreditCardService::get_fund(&state.db, now()).await?;
    Ok(Json(fund))
}

async fn put_fund(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RawFundRequest>,
) -> Result<Json<Fund>, CreditCardError> {
    let req = FundRequest::new(payload).map_err(CreditCardError::InvalidInput)?;
    let fund = CreditCardService::upsert_fund(&state.db, req, now()).await?;
    Ok(Json(fund))
}

async fn list_expenses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListExpensesQuery>,
) -> Result<Json<Vec<CreditCardExpense>>, CreditCardError> {
    let include_simulations = params.include_simulations.unwrap_or(true);
    let expenses = CreditCardService::list_expenses(&state.db, include_simulations).await?;
    Ok(Json(expenses))
}

async fn create_expense(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RawCreateExpenseRequest>,
) -> Result<impl IntoResponse, CreditCardError> {
    let req = CreateExpenseRequest::new(payload, now().date()).map_err(CreditCardError::InvalidInput)?;
    let expense = CreditCardService::create_expense(&state.db, req).await?;
    Ok((StatusCode::CREATED, Json(expense)))
}

async fn delete_expense(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, CreditCardError> {
    CreditCardService::delete_expense(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn execute_expense(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<CreditCardExpense>, CreditCardError> {
    let expense = CreditCardService::execute_expense(&state.db, id).await?;
    Ok(Json(expense))
}

async fn update_purchase_date(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePurchaseDateRequest>,
) -> Result<Json<CreditCardExpense>, CreditCardError> {
    let purchase_date = calendar::parse_date(&payload.purchase_date).map_err(CreditCardError::InvalidInput)?;
    let expense = CreditCardService::update_purchase_date(&state.db, id, purchase_date).await?;
    Ok(Json(expense))
}

async fn update_installment_status(
    State(state): State<Arc<AppState>>,
    Path((id, number)): Path<(i64, u32)>,
    Json(payload): Json<UpdateInstallmentStatusRequest>,
) -> Result<Json<InstallmentUpdate>, CreditCardError> {
    let update = CreditCardService::update_installment_status(
        &state.db,
        id,
        number,
        payload.status,
        payload.confirmed,
        now(),
    )
    .await?;
    Ok(Json(update))
}

async fn monthly_payments(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<MonthlyPayments>>, CreditCardError> {
    let payments = CreditCardService::monthly_payments(&state.db).await?;
    Ok(Json(payments))
}

async fn pay_month(
    State(state): State<Arc<AppState>>,
    Path(month): Path<String>,
    Json(payload): Json<PayMonthRequest>,
) -> Result<Json<MonthSettlement>, CreditCardError> {
    let month: MonthKey = month.parse().map_err(CreditCardError::InvalidInput)?;
    let settlement = CreditCardService::pay_month(&state.db, month, payload.confirmed, now()).await?;
    Ok(Json(settlement))
}

async fn simulate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RawSimulationRequest>,
) -> Result<Json<SimulationResult>, CreditCardError> {
    let current = now();
    let req = SimulationRequest::new(payload, current.date()).map_err(CreditCardError::InvalidInput)?;
    let result = CreditCardService::simulate(
        &state.db,
        req,
        current,
        state.config.projection_horizon_months,
    )
    .await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{self, Body};
    use axum::http::Request;
    use common::Config;
    use database::get_test_db;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let db = get_test_db().await;
        let config = Config {
            database_url: "mem".into(),
            port: 0,
            projection_horizon_months: 6,
        };
        let state = Arc::new(AppState { db, config });
        credit_card_router(state.clone()).with_state(state)
    }

    async fn send(app: &Router, method: &str, uri: &str, payload: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match payload {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn configure_fund(app: &Router, monthly: f64, accumulated: f64) {
        let (status, _) = send(
            app,
            "PUT",
            "/fund",
            Some(json!({
                "monthly_contribution_dollars": monthly,
                "accumulated_amount_dollars": accumulated,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_fund_not_configured_is_404() {
        let app = test_app().await;
        let (status, body) = send(&app, "GET", "/fund", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Credit card fund is not configured");
    }

    #[tokio::test]
    async fn test_put_and_get_fund() {
        let app = test_app().await;
        configure_fund(&app, 200.0, 500.0).await;

        let (status, body) = send(&app, "GET", "/fund", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["monthly_contribution"], 20000);
        assert_eq!(body["accumulated_amount"], 50000);

        let (status, _) = send(
            &app,
            "PUT",
            "/fund",
            Some(json!({ "monthly_contribution_dollars": -1.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_and_list_expenses() {
        let app = test_app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/expenses",
            Some(json!({
                "amount_dollars": 100.0,
                "description": "Headphones",
                "purchase_date": "2025-06-10",
                "total_installments": 3,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["is_simulation"], true);
        assert_eq!(body["installments"][0]["amount"], 3334);
        assert_eq!(body["installments"][2]["due_date"], "2025-08-10");

        let (_, all) = send(&app, "GET", "/expenses", None).await;
        assert_eq!(all.as_array().unwrap().len(), 1);
        let (_, committed) = send(&app, "GET", "/expenses?include_simulations=false", None).await;
        assert!(committed.as_array().unwrap().is_empty());

        let id = body["id"].as_i64().unwrap();
        let (status, executed) = send(&app, "POST", &format!("/expenses/{}/execute", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(executed["is_simulation"], false);

        let (status, moved) = send(
            &app,
            "PUT",
            &format!("/expenses/{}/purchase-date", id),
            Some(json!({ "purchase_date": "2025-09-01" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["installments"][1]["due_date"], "2025-10-01");

        let (status, _) = send(&app, "DELETE", &format!("/expenses/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "DELETE", &format!("/expenses/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_expense_validation() {
        let app = test_app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/expenses",
            Some(json!({
                "amount_dollars": 0.0,
                "description": "Nothing",
                "total_installments": 1,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = send(
            &app,
            "PUT",
            "/expenses/1/purchase-date",
            Some(json!({ "purchase_date": "June 1st" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_pay_installment_due_this_month() {
        let app = test_app().await;
        configure_fund(&app, 10.0, 40.0).await;

        let (_, expense) = send(
            &app,
            "POST",
            "/expenses",
            Some(json!({
                "amount_dollars": 25.0,
                "description": "Books",
                "total_installments": 1,
                "is_simulation": false,
            })),
        )
        .await;
        let uri = format!("/expenses/{}/installments/1", expense["id"]);

        let (status, _) = send(&app, "PUT", &uri, Some(json!({ "status": "paid" }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = send(&app, "PUT", &uri, Some(json!({ "status": "paid", "confirmed": true }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expense"]["installments"][0]["status"], "paid");
        assert_eq!(body["settled_fund"]["accumulated_amount"], 1500);

        let (_, payments) = send(&app, "GET", "/payments", None).await;
        assert!(payments.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pay_month_endpoint() {
        let app = test_app().await;
        configure_fund(&app, 10.0, 100.0).await;

        let (status, _) = send(&app, "POST", "/payments/2000-01/pay", Some(json!({ "confirmed": true }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, "POST", "/payments/january/pay", Some(json!({ "confirmed": true }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        send(
            &app,
            "POST",
            "/expenses",
            Some(json!({
                "amount_dollars": 30.0,
                "description": "Phone",
                "total_installments": 3,
                "is_simulation": false,
            })),
        )
        .await;

        let (_, payments) = send(&app, "GET", "/payments", None).await;
        assert_eq!(payments.as_array().unwrap().len(), 3);
        let month = payments[0]["month"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/payments/{}/pay", month),
            Some(json!({ "confirmed": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paid"]["total"], 1000);
        assert_eq!(body["month_total"], 1000);
        assert_eq!(body["fund"]["accumulated_amount"], 9000);
    }

    #[tokio::test]
    async fn test_simulate_endpoint() {
        let app = test_app().await;

        let request = json!({ "amount_dollars": 120.0, "total_installments": 3 });
        let (status, _) = send(&app, "POST", "/simulate", Some(request.clone())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        configure_fund(&app, 50.0, 200.0).await;
        let (status, body) = send(&app, "POST", "/simulate", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["can_afford"], true);
        assert_eq!(body["installment_amount"], 4000);
        assert_eq!(body["monthly_projections"].as_array().unwrap().len(), 6);
        assert!(body.get("suggested_monthly_contribution").is_none());

        let (status, _) = send(
            &app,
            "POST",
            "/simulate",
            Some(json!({ "amount_dollars": 120.0, "total_installments": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
