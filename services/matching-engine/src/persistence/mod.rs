//! Order and trade persistence
//!
//! The store is the system of record. The engine reads eligible resting
//! orders and writes fills and trades through a [`StoreTransaction`], so a
//! unit either commits completely or leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use services_common::{Px, Qty, Symbol};

use crate::error::StoreResult;
use crate::order::{Order, OrderId, OrderSide, OrderStatus, Trade, TradeId};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgStore, run_migrations};

/// Durable order and trade storage
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order and return it with its store-assigned sequence
    /// number
    async fn create_order(&self, order: Order) -> StoreResult<Order>;

    /// Open a unit of work
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Order by id
    async fn load_order(&self, order_id: OrderId) -> StoreResult<Option<Order>>;

    /// All orders, newest first
    async fn list_orders(&self) -> StoreResult<Vec<Order>>;

    /// Orders of one instrument, newest first
    async fn orders_by_symbol(&self, symbol: &Symbol) -> StoreResult<Vec<Order>>;

    /// Orders of one client, newest first
    async fn orders_by_user(&self, user_id: u64) -> StoreResult<Vec<Order>>;

    /// Open orders (PENDING or PARTIALLY_FILLED) of every instrument and
    /// category, in creation order
    async fn load_resting_orders(&self) -> StoreResult<Vec<Order>>;

    /// Trade by id
    async fn load_trade(&self, trade_id: TradeId) -> StoreResult<Option<Trade>>;

    /// All trades, newest first
    async fn list_trades(&self) -> StoreResult<Vec<Trade>>;

    /// Trades an order took part in, oldest first
    async fn trades_for_order(&self, order_id: OrderId) -> StoreResult<Vec<Trade>>;
}

/// A unit of work. Dropping a transaction without committing discards it.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Order by id, as seen by this unit
    async fn load_order(&mut self, order_id: OrderId) -> StoreResult<Option<Order>>;

    /// Open limit orders on `side` of `symbol` priced within `price_bound`,
    /// best price first, then oldest first. Sell orders qualify when priced
    /// at or below the bound, buy orders at or above it; `None` admits any
    /// price.
    async fn fetch_eligible_resting_orders(
        &mut self,
        symbol: &Symbol,
        side: OrderSide,
        price_bound: Option<Px>,
    ) -> StoreResult<Vec<Order>>;

    /// Overwrite an order's fill state
    async fn update_order(
        &mut self,
        order_id: OrderId,
        filled_quantity: Qty,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Append a trade
    async fn create_trade(&mut self, trade: &Trade) -> StoreResult<TradeId>;

    /// Make every write of the unit durable
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every write of the unit
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
