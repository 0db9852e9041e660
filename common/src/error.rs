//! Error types for SwapSettle.

use crate::{AccountId, Amount, Asset, OrderId, OrderStatus};
use thiserror::Error;

/// Main error type for SwapSettle operations.
#[derive(Error, Debug, Clone)]
pub enum SwapError {
    /// Malformed amount, unknown asset or same-asset conversion.
    #[error("Invalid request: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Account cannot cover the requested debit.
    #[error("Insufficient {asset}: required {required}, available {available}")]
    InsufficientFunds {
        asset: Asset,
        required: String,
        available: String,
    },

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Account not found in the ledger.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Caller does not own the order.
    #[error("Account is not the owner of order {order_id}")]
    Unauthorized { order_id: OrderId },

    /// Order update would break the status state machine.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A conditional update lost a race.
    #[error("Conflicting update on {entity} {id}")]
    Conflict { entity: String, id: String },

    /// Store unreachable or failing.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Store operation exceeded its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Settlement stopped part-way; applied fills are durable.
    #[error("Settlement incomplete for order {order_id} at {settled} settled: {reason}")]
    SettlementIncomplete {
        order_id: OrderId,
        settled: Amount,
        reason: String,
    },

    /// Coordinator is not accepting requests.
    #[error("Service unavailable, retry after {retry_after_ms}ms")]
    ServiceUnavailable { retry_after_ms: u64 },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse classification used by callers and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InsufficientFunds,
    NotFound,
    Unauthorized,
    Conflict,
    StorageUnavailable,
    SettlementIncomplete,
    ServiceUnavailable,
    Configuration,
}

impl SwapError {
    /// Create a validation error naming the offending field.
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        SwapError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a conflict error.
    pub fn conflict(entity: impl Into<String>, id: impl ToString) -> Self {
        SwapError::Conflict {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwapError::Validation { .. } | SwapError::InvalidTransition { .. } => {
                ErrorKind::Validation
            }
            SwapError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            SwapError::OrderNotFound(_) | SwapError::AccountNotFound(_) => ErrorKind::NotFound,
            SwapError::Unauthorized { .. } => ErrorKind::Unauthorized,
            SwapError::Conflict { .. } => ErrorKind::Conflict,
            SwapError::StorageUnavailable(_) | SwapError::Timeout(_) => {
                ErrorKind::StorageUnavailable
            }
            SwapError::SettlementIncomplete { .. } => ErrorKind::SettlementIncomplete,
            SwapError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            SwapError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Check if the caller may safely re-issue the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict
                | ErrorKind::StorageUnavailable
                | ErrorKind::SettlementIncomplete
                | ErrorKind::ServiceUnavailable
        )
    }

    /// Check if this is infrastructure loss rather than a domain outcome.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self.kind(), ErrorKind::StorageUnavailable)
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            SwapError::ServiceUnavailable { retry_after_ms } => Some(*retry_after_ms),
            SwapError::Conflict { .. } => Some(10),
            SwapError::StorageUnavailable(_) | SwapError::Timeout(_) => Some(1000),
            SwapError::SettlementIncomplete { .. } => Some(500),
            _ => None,
        }
    }

    /// Get error code for caller-facing responses.
    pub fn error_code(&self) -> &'static str {
        if let SwapError::InvalidTransition { .. } = self {
            return "INVALID_TRANSITION";
        }
        match self.kind() {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ErrorKind::SettlementIncomplete => "SETTLEMENT_INCOMPLETE",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for SwapSettle operations.
pub type Result<T> = std::result::Result<T, SwapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_errors_are_not_retryable() {
        let errors = [
            SwapError::validation("bad", "amount"),
            SwapError::InsufficientFunds {
                asset: Asset::StableA,
                required: "10".into(),
                available: "5".into(),
            },
            SwapError::OrderNotFound(OrderId::new()),
            SwapError::Unauthorized {
                order_id: OrderId::new(),
            },
        ];
        for err in errors {
            assert!(!err.is_retryable(), "{err} should be terminal");
        }
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(SwapError::StorageUnavailable("down".into()).is_retryable());
        assert!(SwapError::Timeout("get_balance".into()).is_retryable());
        assert!(SwapError::conflict("order", OrderId::new()).is_retryable());
        assert!(SwapError::SettlementIncomplete {
            order_id: OrderId::new(),
            settled: Amount::ZERO,
            reason: "ledger".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SwapError::AccountNotFound(AccountId::new("x")).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            SwapError::Timeout("scan".into()).error_code(),
            "STORAGE_UNAVAILABLE"
        );
        assert!(SwapError::Timeout("scan".into()).is_infrastructure());
    }
}
