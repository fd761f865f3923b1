//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use tracing::error;
use utoipa::OpenApi;
use validator::Validate;

use crate::app::AppState;
use crate::domain::{
    AppError, BalanceResponse, DatabaseError, ErrorDetail, ErrorResponse, HealthResponse,
    HealthStatus, OrderResponse, OrderStatus, OrderSubmission, RegisterRequest, ValidationError,
    WithdrawRequest, WithdrawalResponse,
};

/// Header carrying the caller identity, set by the upstream auth gateway
pub const USER_HEADER: &str = "x-user-login";

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Loyalty Ledger API",
        version = "0.1.0",
        description = "Loyalty points ledger: order submission, balances and withdrawals",
        license(
            name = "MIT"
        )
    ),
    paths(
        register_handler,
        submit_order_handler,
        list_orders_handler,
        balance_handler,
        withdraw_handler,
        list_withdrawals_handler,
        health_check_handler,
    ),
    components(
        schemas(
            RegisterRequest,
            WithdrawRequest,
            BalanceResponse,
            OrderResponse,
            OrderStatus,
            WithdrawalResponse,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    tags(
        (name = "users", description = "Registration and balances"),
        (name = "orders", description = "Order submission and status"),
        (name = "withdrawals", description = "Spending points"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Login of the calling user, taken from the `X-User-Login` header
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let login = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Authentication("Missing X-User-Login header".to_string()))?;
        Ok(Self(login.to_string()))
    }
}

/// Register a user
#[utoipa::path(
    post,
    path = "/api/user/register",
    tag = "users",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "User registered with a zero balance", body = BalanceResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 409, description = "Login already taken", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    let user = state.dispatcher.create_user(payload.login.trim()).await?;
    Ok(Json(BalanceResponse::from(&user)))
}

/// Submit an order number for accrual
///
/// The body is the order number as plain text.
#[utoipa::path(
    post,
    path = "/api/user/orders",
    tag = "orders",
    request_body(content = String, content_type = "text/plain"),
    responses(
        (status = 202, description = "Order accepted for processing"),
        (status = 200, description = "Order already uploaded by this user"),
        (status = 400, description = "Empty body", body = ErrorResponse),
        (status = 401, description = "Missing identity", body = ErrorResponse),
        (status = 409, description = "Order uploaded by another user", body = ErrorResponse),
        (status = 422, description = "Order number fails the check digit", body = ErrorResponse)
    )
)]
pub async fn submit_order_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(login): AuthenticatedUser,
    body: String,
) -> Result<StatusCode, AppError> {
    let number = body.trim();
    if number.is_empty() {
        return Err(AppError::Validation(ValidationError::MissingField(
            "order number".to_string(),
        )));
    }

    match state.dispatcher.create_order(&login, number).await? {
        OrderSubmission::Accepted => Ok(StatusCode::ACCEPTED),
        OrderSubmission::AlreadyAccepted => Ok(StatusCode::OK),
    }
}

/// List the caller's orders, newest first
#[utoipa::path(
    get,
    path = "/api/user/orders",
    tag = "orders",
    responses(
        (status = 200, description = "Orders of the caller", body = Vec<OrderResponse>),
        (status = 204, description = "No orders yet"),
        (status = 401, description = "Missing identity", body = ErrorResponse)
    )
)]
pub async fn list_orders_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(login): AuthenticatedUser,
) -> Result<Response, AppError> {
    let orders = state.dispatcher.list_orders(&login).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(body).into_response())
}

/// Current and withdrawn balance
#[utoipa::path(
    get,
    path = "/api/user/balance",
    tag = "users",
    responses(
        (status = 200, description = "Balance of the caller", body = BalanceResponse),
        (status = 401, description = "Missing identity", body = ErrorResponse),
        (status = 404, description = "Unknown user", body = ErrorResponse)
    )
)]
pub async fn balance_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(login): AuthenticatedUser,
) -> Result<Json<BalanceResponse>, AppError> {
    let user = state.dispatcher.get_user(&login).await?;
    Ok(Json(BalanceResponse::from(&user)))
}

/// Spend points against an order number
#[utoipa::path(
    post,
    path = "/api/user/balance/withdraw",
    tag = "withdrawals",
    request_body = WithdrawRequest,
    responses(
        (status = 200, description = "Withdrawal recorded", body = WithdrawalResponse),
        (status = 401, description = "Missing identity", body = ErrorResponse),
        (status = 402, description = "Insufficient balance", body = ErrorResponse),
        (status = 422, description = "Invalid order number or sum", body = ErrorResponse)
    )
)]
pub async fn withdraw_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(login): AuthenticatedUser,
    Json(payload): Json<WithdrawRequest>,
) -> Result<Json<WithdrawalResponse>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::UnprocessableEntity(e.to_string()))?;
    let withdrawal = state
        .dispatcher
        .create_withdrawal(&login, payload.order.trim(), payload.sum)
        .await?;
    Ok(Json(WithdrawalResponse::from(withdrawal)))
}

/// List the caller's withdrawals, newest first
#[utoipa::path(
    get,
    path = "/api/user/withdrawals",
    tag = "withdrawals",
    responses(
        (status = 200, description = "Withdrawals of the caller", body = Vec<WithdrawalResponse>),
        (status = 204, description = "No withdrawals yet"),
        (status = 401, description = "Missing identity", body = ErrorResponse)
    )
)]
pub async fn list_withdrawals_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(login): AuthenticatedUser,
) -> Result<Response, AppError> {
    let withdrawals = state.dispatcher.list_withdrawals(&login).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body: Vec<WithdrawalResponse> = withdrawals
        .into_iter()
        .map(WithdrawalResponse::from)
        .collect();
    Ok(Json(body).into_response())
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Storage unreachable", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Response {
    let health = state.health().await;
    let status = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AppError::Database(DatabaseError::Connection(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "database_error")
            }
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Accrual(_) => (StatusCode::BAD_GATEWAY, "accrual_error"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            AppError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::UnprocessableEntity(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable_entity")
            }
            AppError::PaymentRequired(_) => (StatusCode::PAYMENT_REQUIRED, "payment_required"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::Cancelled(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, "authentication_error"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_of(AppError::AlreadyExists("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(AppError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(AppError::UnprocessableEntity("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(AppError::PaymentRequired("x".into())),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(status_of(AppError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(AppError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(AppError::Cancelled("x".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(AppError::Authentication("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AppError::Database(DatabaseError::Connection("x".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_openapi_lists_ledger_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/api/user/orders"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/user/balance/withdraw"));
    }
}
