//! Domain entities with validation support.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Processing status of a submitted order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Uploaded, not yet seen by the accrual service
    #[default]
    New,
    /// The accrual service is calculating the reward
    Processing,
    /// Rejected by the accrual service; no points awarded
    Invalid,
    /// Calculation finished; `accrual` holds the award
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
        }
    }

    /// `INVALID` and `PROCESSED` are absorbing states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalid | Self::Processed)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "PROCESSING" => Ok(Self::Processing),
            "INVALID" => Ok(Self::Invalid),
            "PROCESSED" => Ok(Self::Processed),
            _ => Err(format!("Invalid order status: {}", s)),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Loyalty account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct User {
    /// Unique login
    #[schema(example = "alice")]
    pub login: String,
    /// Spendable balance, never negative
    #[schema(value_type = f64, example = 300.0)]
    pub current_points: Decimal,
    /// Sum of all settled withdrawals
    #[schema(value_type = f64, example = 200.0)]
    pub withdrawn_points: Decimal,
}

impl User {
    /// Create a zero-balance user
    #[must_use]
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            current_points: Decimal::ZERO,
            withdrawn_points: Decimal::ZERO,
        }
    }
}

/// Purchase order submitted for accrual
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Order {
    /// Order number (Luhn-valid)
    #[schema(example = "79927398713")]
    pub number: String,
    /// Login of the uploading user
    pub owner: String,
    pub status: OrderStatus,
    /// Awarded points, meaningful once `status` is `PROCESSED`
    #[schema(value_type = Option<f64>, example = 500.0)]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    #[must_use]
    pub fn new(number: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            owner: owner.into(),
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
        }
    }
}

/// Points spent against an order number
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Withdrawal {
    /// Order number the points were spent on (Luhn-valid)
    #[schema(example = "12345678903")]
    pub order: String,
    /// Login of the withdrawing user
    pub owner: String,
    #[schema(value_type = f64, example = 200.0)]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl Withdrawal {
    #[must_use]
    pub fn new(order: impl Into<String>, owner: impl Into<String>, sum: Decimal) -> Self {
        Self {
            order: order.into(),
            owner: owner.into(),
            sum,
            processed_at: Utc::now(),
        }
    }
}

/// Outcome of a successful order submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSubmission {
    /// New order persisted and queued for reconciliation
    Accepted,
    /// The same owner already uploaded this number
    AlreadyAccepted,
}

/// Status reported by the accrual service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl From<AccrualStatus> for OrderStatus {
    fn from(status: AccrualStatus) -> Self {
        match status {
            AccrualStatus::Registered | AccrualStatus::Processing => Self::Processing,
            AccrualStatus::Invalid => Self::Invalid,
            AccrualStatus::Processed => Self::Processed,
        }
    }
}

/// Result of a single accrual lookup that reached the service
#[derive(Debug, Clone, PartialEq)]
pub enum AccrualOutcome {
    /// The service knows the order
    Reported {
        status: AccrualStatus,
        accrual: Option<Decimal>,
    },
    /// The service has not registered the order yet
    NotRegistered,
    /// Too many requests; stop calling for `retry_after`
    RateLimited { retry_after: std::time::Duration },
}

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 255, message = "Login must be between 1 and 255 characters"))]
    #[schema(example = "alice")]
    pub login: String,
}

/// Withdrawal request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct WithdrawRequest {
    #[validate(length(min = 1, message = "Order number is required"))]
    #[schema(example = "12345678903")]
    pub order: String,
    #[schema(value_type = f64, example = 200.0)]
    #[validate(custom(function = "validate_positive_sum"))]
    pub sum: Decimal,
}

fn validate_positive_sum(sum: &Decimal) -> Result<(), validator::ValidationError> {
    if sum.is_sign_positive() && !sum.is_zero() {
        Ok(())
    } else {
        Err(validator::ValidationError::new("sum_must_be_positive"))
    }
}

/// Balance view of a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct BalanceResponse {
    #[schema(value_type = f64)]
    pub current: Decimal,
    #[schema(value_type = f64)]
    pub withdrawn: Decimal,
}

impl From<&User> for BalanceResponse {
    fn from(user: &User) -> Self {
        Self {
            current: user.current_points,
            withdrawn: user.withdrawn_points,
        }
    }
}

/// Order as shown to its owner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<f64>)]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            number: order.number,
            status: order.status,
            accrual: order.accrual,
            uploaded_at: order.uploaded_at,
        }
    }
}

/// Withdrawal as shown to its owner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct WithdrawalResponse {
    pub order: String,
    #[schema(value_type = f64)]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(withdrawal: Withdrawal) -> Self {
        Self {
            order: withdrawal.order,
            sum: withdrawal.sum,
            processed_at: withdrawal.processed_at,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus) -> Self {
        Self {
            status: database,
            database,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "payment_required")]
    pub r#type: String,
    /// Human-readable error message
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn test_order_status_display_and_parsing() {
        let statuses = vec![
            (OrderStatus::New, "NEW"),
            (OrderStatus::Processing, "PROCESSING"),
            (OrderStatus::Invalid, "INVALID"),
            (OrderStatus::Processed, "PROCESSED"),
        ];

        for (status, string) in statuses {
            assert_eq!(status.as_str(), string);
            assert_eq!(status.to_string(), string);
            assert_eq!(OrderStatus::from_str(string).unwrap(), status);
        }

        assert!(OrderStatus::from_str("processed").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(OrderStatus::Invalid.is_terminal());
        assert!(OrderStatus::Processed.is_terminal());
    }

    #[test]
    fn test_accrual_status_mapping() {
        assert_eq!(OrderStatus::from(AccrualStatus::Registered), OrderStatus::Processing);
        assert_eq!(OrderStatus::from(AccrualStatus::Processing), OrderStatus::Processing);
        assert_eq!(OrderStatus::from(AccrualStatus::Invalid), OrderStatus::Invalid);
        assert_eq!(OrderStatus::from(AccrualStatus::Processed), OrderStatus::Processed);
    }

    #[test]
    fn test_new_entities_defaults() {
        let user = User::new("alice");
        assert_eq!(user.current_points, Decimal::ZERO);
        assert_eq!(user.withdrawn_points, Decimal::ZERO);

        let order = Order::new("79927398713", "alice");
        assert_eq!(order.status, OrderStatus::New);
        assert!(order.accrual.is_none());
    }

    #[test]
    fn test_withdraw_request_validation() {
        let ok = WithdrawRequest {
            order: "12345678903".to_string(),
            sum: dec!(1.5),
        };
        assert!(ok.validate().is_ok());

        let zero = WithdrawRequest {
            order: "12345678903".to_string(),
            sum: Decimal::ZERO,
        };
        assert!(zero.validate().is_err());

        let negative = WithdrawRequest {
            order: "12345678903".to_string(),
            sum: dec!(-10),
        };
        assert!(negative.validate().is_err());

        let empty = WithdrawRequest {
            order: String::new(),
            sum: dec!(10),
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_order_response_omits_missing_accrual() {
        let response = OrderResponse::from(Order::new("79927398713", "alice"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "NEW");
        assert!(json.get("accrual").is_none());
    }

    #[test]
    fn test_accrual_status_deserializes_uppercase() {
        let status: AccrualStatus = serde_json::from_str("\"REGISTERED\"").unwrap();
        assert_eq!(status, AccrualStatus::Registered);
    }
}
