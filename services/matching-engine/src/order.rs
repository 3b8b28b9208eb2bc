//! Order and trade definitions

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use services_common::{Px, Qty, Symbol};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Order identifier
pub type OrderId = Uuid;

/// Trade identifier
pub type TradeId = Uuid;

/// Order structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID
    pub id: OrderId,
    /// Store-assigned insertion sequence, tie-break after creation time
    pub sequence_number: u64,
    /// Order side
    pub side: OrderSide,
    /// Limit or market
    pub category: OrderCategory,
    /// Instrument
    pub symbol: Symbol,
    /// Original quantity
    pub quantity: Qty,
    /// Quantity matched so far
    pub filled_quantity: Qty,
    /// Limit price, or the reference price at submission for market orders
    pub price: Px,
    /// Order status
    pub status: OrderStatus,
    /// Submitting client
    pub user_id: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Quantity still open
    #[must_use]
    pub const fn remaining_quantity(&self) -> Qty {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    /// Check if order is a market order
    #[must_use]
    pub const fn is_market(&self) -> bool {
        matches!(self.category, OrderCategory::Market)
    }

    /// Check if order sits in the book awaiting a match
    #[must_use]
    pub const fn is_resting(&self) -> bool {
        matches!(self.category, OrderCategory::Limit) && self.status.is_open()
    }

    /// Check if order is in terminal state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl OrderSide {
    /// The side this side trades against
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Wire and storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl FromStr for OrderSide {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            _ => Err(ValidationError::InvalidSide {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderCategory {
    /// Executes at the limit price or better; remainder rests
    Limit,
    /// Executes against whatever is available; remainder is cancelled
    Market,
}

impl OrderCategory {
    /// Wire and storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Market => "MARKET",
        }
    }
}

impl FromStr for OrderCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LIMIT" => Ok(Self::Limit),
            "MARKET" => Ok(Self::Market),
            _ => Err(ValidationError::InvalidCategory {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for OrderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Nothing filled yet
    Pending,
    /// Some but not all quantity filled
    PartiallyFilled,
    /// Fully filled
    Matched,
    /// Cancelled by the client or by market-order policy
    Cancelled,
}

impl OrderStatus {
    /// Still eligible for fills
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::PartiallyFilled)
    }

    /// No further fills possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Matched | Self::Cancelled)
    }

    /// Wire and storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Matched => "MATCHED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PARTIALLY_FILLED" => Ok(Self::PartiallyFilled),
            "MATCHED" => Ok(Self::Matched),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(ValidationError::InvalidStatus {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed order request, as accepted by [`crate::Exchange::submit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    /// Side
    pub side: OrderSide,
    /// Category
    pub category: OrderCategory,
    /// Instrument
    pub symbol: Symbol,
    /// Quantity
    pub quantity: Qty,
    /// Limit price; ignored for market orders
    pub price: Option<Px>,
    /// Submitting client
    pub user_id: u64,
}

impl OrderRequest {
    /// Limit order request
    #[must_use]
    pub const fn limit(side: OrderSide, symbol: Symbol, quantity: Qty, price: Px, user_id: u64) -> Self {
        Self {
            side,
            category: OrderCategory::Limit,
            symbol,
            quantity,
            price: Some(price),
            user_id,
        }
    }

    /// Market order request
    #[must_use]
    pub const fn market(side: OrderSide, symbol: Symbol, quantity: Qty, user_id: u64) -> Self {
        Self {
            side,
            category: OrderCategory::Market,
            symbol,
            quantity,
            price: None,
            user_id,
        }
    }
}

/// Untyped order request as received from a transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOrderRequest {
    /// BUY or SELL
    #[serde(rename = "type")]
    pub side: String,
    /// LIMIT or MARKET
    pub category: String,
    /// Ticker
    pub stock_symbol: String,
    /// Share count
    pub quantity: i64,
    /// Decimal limit price
    #[serde(default)]
    pub price: Option<f64>,
    /// Submitting client
    #[serde(default)]
    pub user_id: u64,
}

impl TryFrom<RawOrderRequest> for OrderRequest {
    type Error = ValidationError;

    fn try_from(raw: RawOrderRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            side: raw.side.parse()?,
            category: raw.category.parse()?,
            symbol: Symbol::parse(&raw.stock_symbol)?,
            quantity: Qty::from_i64(raw.quantity),
            price: raw.price.map(Px::new),
            user_id: raw.user_id,
        })
    }
}

/// Executed trade between one buy and one sell order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Unique trade ID
    pub id: TradeId,
    /// Buy side order
    pub buy_order_id: OrderId,
    /// Sell side order
    pub sell_order_id: OrderId,
    /// Instrument
    pub symbol: Symbol,
    /// Executed quantity
    pub quantity: Qty,
    /// Executed price
    pub price: Px,
    /// Execution timestamp
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    /// Check whether the given order took part in this trade
    #[must_use]
    pub fn involves(&self, order_id: OrderId) -> bool {
        self.buy_order_id == order_id || self.sell_order_id == order_id
    }
}

/// All orders of one instrument, split by side
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentOrders {
    /// Buy orders, newest first
    pub buy_orders: Vec<Order>,
    /// Sell orders, newest first
    pub sell_orders: Vec<Order>,
}

impl InstrumentOrders {
    /// Split orders by side, preserving their relative order
    #[must_use]
    pub fn split(orders: Vec<Order>) -> Self {
        let (buy_orders, sell_orders) = orders
            .into_iter()
            .partition(|o| o.side == OrderSide::Buy);
        Self {
            buy_orders,
            sell_orders,
        }
    }
}
