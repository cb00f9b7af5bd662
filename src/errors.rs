use std::fmt;

use sea_orm::error::DbErr;
use serde::Serialize;

use crate::entities::order::OrderStatus;

/// One cart line that cannot be satisfied from live stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockShortfall {
    pub product_id: i32,
    pub product_name: String,
    pub color: String,
    pub size: String,
    pub requested: i32,
    pub available: i32,
}

impl fmt::Display for StockShortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}): requested {}, only {} left",
            self.product_name, self.color, self.size, self.requested, self.available
        )
    }
}

fn join_shortfalls(lines: &[StockShortfall]) -> String {
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Transaction failed and was rolled back: {0}")]
    TransactionFailure(#[serde(skip)] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Out of stock: {0}")]
    OutOfStock(String),

    #[error("Insufficient stock: {}", join_shortfalls(.0))]
    InsufficientStock(Vec<StockShortfall>),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid transition: cannot move order {order_id} from {from} to {to}")]
    InvalidTransition {
        order_id: i32,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Order {order_id} is already {status}; no further transitions are possible")]
    OrderClosed { order_id: i32, status: OrderStatus },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Stable machine-readable code for each variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::TransactionFailure(_) => "transaction_failure",
            Self::NotFound(_) => "not_found",
            Self::OutOfStock(_) => "out_of_stock",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::EmptyCart => "empty_cart",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::OrderClosed { .. } => "order_closed",
            Self::ValidationError(_) => "validation_error",
        }
    }

    /// Message suitable for showing to a customer or staff member.
    /// Storage errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::TransactionFailure(_) => {
                "The operation could not be completed and nothing was changed".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Lines that blocked a checkout, empty for every other variant.
    pub fn shortfalls(&self) -> &[StockShortfall] {
        match self {
            Self::InsufficientStock(lines) => lines,
            _ => &[],
        }
    }
}
