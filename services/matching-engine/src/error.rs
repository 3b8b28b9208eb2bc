//! Error types for the matching engine and its collaborators

use crate::order::{OrderId, OrderStatus, TradeId};
use services_common::{Qty, Symbol, SymbolError};
use thiserror::Error;

/// Request or reference-data validation failure. Nothing is persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Side string was not BUY or SELL
    #[error("invalid order side: {value}")]
    InvalidSide {
        /// Rejected input
        value: String,
    },

    /// Category string was not LIMIT or MARKET
    #[error("invalid order category: {value}")]
    InvalidCategory {
        /// Rejected input
        value: String,
    },

    /// Status string was not a known order status
    #[error("invalid order status: {value}")]
    InvalidStatus {
        /// Rejected input
        value: String,
    },

    /// Ticker could not be parsed
    #[error("invalid symbol: {0}")]
    MalformedSymbol(#[from] SymbolError),

    /// Ticker is well-formed but not listed
    #[error("invalid stock symbol: {symbol}")]
    UnknownSymbol {
        /// Unlisted ticker
        symbol: String,
    },

    /// Quantity is zero, negative or above the venue limit
    #[error("invalid quantity: {reason}")]
    InvalidQuantity {
        /// Why the quantity was rejected
        reason: String,
    },

    /// Limit price missing, non-positive or above the venue limit
    #[error("invalid price: {reason}")]
    InvalidPrice {
        /// Why the price was rejected
        reason: String,
    },

    /// Instrument record failed validation
    #[error("invalid instrument {symbol}: {reason}")]
    InvalidInstrument {
        /// Instrument ticker
        symbol: String,
        /// Why the record was rejected
        reason: String,
    },
}

/// Persistence layer failure
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend could not be reached or the pool was exhausted
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Underlying cause
        reason: String,
    },

    /// Serialization failure or deadlock; the unit was aborted by the backend
    #[error("transaction conflict: {reason}")]
    Conflict {
        /// Underlying cause
        reason: String,
    },

    /// A write violated a storage constraint
    #[error("constraint violated: {reason}")]
    Constraint {
        /// Underlying cause
        reason: String,
    },

    /// A write referenced an order the store does not hold
    #[error("order not found in store: {order_id}")]
    MissingOrder {
        /// Referenced order
        order_id: OrderId,
    },

    /// A persisted row could not be decoded
    #[error("corrupt {entity} row: {reason}")]
    Corrupt {
        /// Table or entity name
        entity: &'static str,
        /// Decoding failure
        reason: String,
    },

    /// Any other database error
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(
            err,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        ) {
            return Self::Unavailable {
                reason: err.to_string(),
            };
        }

        let code = match &err {
            sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
            _ => None,
        };
        match code.as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001" | "40P01") => Self::Conflict {
                reason: err.to_string(),
            },
            // integrity constraint violation class
            Some(c) if c.starts_with("23") => Self::Constraint {
                reason: err.to_string(),
            },
            _ => Self::Database(err),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A broken engine invariant. These indicate a programming error and are
/// never expected in normal operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Order would trade against itself
    #[error("order {order_id} would trade against itself")]
    SelfTrade {
        /// Offending order
        order_id: OrderId,
    },

    /// Fill would exceed the order quantity
    #[error("fill of {fill} on order {order_id} exceeds remaining {remaining}")]
    Overfill {
        /// Offending order
        order_id: OrderId,
        /// Attempted fill
        fill: Qty,
        /// Remaining quantity before the fill
        remaining: Qty,
    },

    /// Fill arithmetic overflowed
    #[error("quantity overflow on order {order_id}")]
    QuantityOverflow {
        /// Offending order
        order_id: OrderId,
    },

    /// Fill attempted on a cancelled or fully matched order
    #[error("order {order_id} is {status} and cannot be filled")]
    FillOnTerminal {
        /// Offending order
        order_id: OrderId,
        /// Terminal status
        status: OrderStatus,
    },

    /// Orders of different instruments were paired
    #[error("order {order_id} on {found} paired with {expected}")]
    SymbolMismatch {
        /// Offending order
        order_id: OrderId,
        /// Instrument of the incoming order
        expected: Symbol,
        /// Instrument of the paired order
        found: Symbol,
    },

    /// Trade quantity or price was not positive
    #[error("non-positive trade between {buy_order_id} and {sell_order_id}")]
    NonPositiveTrade {
        /// Buy side
        buy_order_id: OrderId,
        /// Sell side
        sell_order_id: OrderId,
    },

    /// Two market orders were paired; there is no price to trade at
    #[error("market order {incoming} paired with resting market order {resting}")]
    MarketAgainstMarket {
        /// Incoming order
        incoming: OrderId,
        /// Resting order
        resting: OrderId,
    },

    /// Two orders on the same side were paired
    #[error("orders {incoming} and {resting} are on the same side")]
    SameSide {
        /// Incoming order
        incoming: OrderId,
        /// Resting order
        resting: OrderId,
    },
}

/// Failure of a `submit` or `cancel` unit. Every write of the unit has been
/// rolled back when this is returned.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Store failure inside the unit
    #[error("matching failed: {0}")]
    Store(#[from] StoreError),

    /// Engine invariant broken
    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    /// The engine was called with an order that skipped validation
    #[error("contract violation on order {order_id}: {reason}")]
    ContractViolation {
        /// Offending order
        order_id: OrderId,
        /// What was wrong with it
        reason: String,
    },

    /// Order to cancel does not exist in the store
    #[error("order not found: {order_id}")]
    OrderNotFound {
        /// Requested order
        order_id: OrderId,
    },
}

/// Result type for engine units
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the [`crate::Exchange`] facade
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Request rejected before reaching the engine
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Unknown order id
    #[error("order not found: {order_id}")]
    OrderNotFound {
        /// Requested order
        order_id: OrderId,
    },

    /// Unknown trade id
    #[error("trade not found: {trade_id}")]
    TradeNotFound {
        /// Requested trade
        trade_id: TradeId,
    },

    /// Unknown instrument in a query
    #[error("instrument not found: {symbol}")]
    InstrumentNotFound {
        /// Requested ticker
        symbol: Symbol,
    },

    /// Submission or cancellation failed and was rolled back
    #[error(transparent)]
    Matching(EngineError),

    /// Read query failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<EngineError> for ExchangeError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::OrderNotFound { order_id } => Self::OrderNotFound { order_id },
            other => Self::Matching(other),
        }
    }
}

/// Result type for the exchange facade
pub type ExchangeResult<T> = Result<T, ExchangeError>;
