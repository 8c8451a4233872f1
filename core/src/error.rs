use crate::{gateway::GatewayError, money::Money};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: Money, required: Money },

    #[error("Order id '{order_id}' already applied")]
    DuplicateOrder { order_id: String },

    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("Product {product_id} is not available")]
    ProductInactive { product_id: i64 },

    #[error("Product requires VIP level {required}, user has {current}")]
    VipLevelTooLow { required: u8, current: u8 },

    #[error("Purchase limit of {limit} reached for product {product_id}")]
    PurchaseLimitReached { product_id: i64, limit: u32 },

    #[error("Payment amount {amount} not accepted: {reason}")]
    PaymentAmountRejected { amount: Money, reason: &'static str },

    #[error("Payment channel '{channel}' is not supported")]
    InvalidPaymentChannel { channel: String },

    #[error("User {user_id} is not active")]
    AccountInactive { user_id: i64 },

    #[error("Bank '{bank}' is unavailable")]
    BankUnavailable { bank: String },

    #[error("Amount {amount} outside allowed range {min}..={max}")]
    AmountOutOfRange { amount: Money, min: Money, max: Money },

    #[error("Withdrawals are only accepted inside the configured window")]
    OutsideWithdrawalWindow,

    #[error("Daily withdrawal limit reached for user {user_id}")]
    DailyWithdrawalLimit { user_id: i64 },

    #[error("Transfer not allowed: {reason}")]
    TransferNotAllowed { reason: &'static str },

    #[error("Invalid transition for {entity} {key}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        key: String,
        from: String,
        to: String,
    },

    #[error("Unauthorized trigger")]
    Unauthorized,

    #[error("Rate limit exceeded for {source_ip}")]
    RateLimited { source_ip: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Message safe to show to the user. Infrastructure failures collapse to
    /// generic text so gateway and database detail never leaks.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::InsufficientBalance { .. } => "Insufficient balance".into(),
            LedgerError::ProductInactive { .. } => "Product not found".into(),
            LedgerError::VipLevelTooLow { required, current } => {
                format!("This product requires VIP level {required}. Your VIP level is {current}")
            }
            LedgerError::PurchaseLimitReached { limit, .. } => {
                format!("Purchase limit reached for this product (maximum {limit}x)")
            }
            LedgerError::PaymentAmountRejected { reason, .. } => (*reason).to_string(),
            LedgerError::InvalidPaymentChannel { .. } => "Invalid payment channel".into(),
            LedgerError::AccountInactive { .. } => {
                "Your account is not active, please contact support".into()
            }
            LedgerError::BankUnavailable { .. } => "This bank is under maintenance".into(),
            LedgerError::AmountOutOfRange { min, max, .. } => {
                format!("Amount must be between {min} and {max}")
            }
            LedgerError::OutsideWithdrawalWindow => {
                "Withdrawals are outside operating hours".into()
            }
            LedgerError::DailyWithdrawalLimit { .. } => {
                "Only one withdrawal is allowed per day".into()
            }
            LedgerError::TransferNotAllowed { reason } => (*reason).to_string(),
            LedgerError::NotFound { entity, .. } => format!("{entity} not found"),
            LedgerError::InvalidTransition { .. } => "Operation not allowed in current state".into(),
            LedgerError::Unauthorized => "Unauthorized".into(),
            LedgerError::RateLimited { .. } => "Too many requests".into(),
            LedgerError::Gateway(_) => "Payment service unavailable, please try again".into(),
            _ => "Something went wrong, please try again".into(),
        }
    }

    /// True when the same request may succeed if simply retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Gateway(_) => true,
            LedgerError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}
