//! In-memory store
//!
//! Transactions stage their writes and read through them; commit applies
//! the staged writes under a single write lock. The same constraints the
//! `PostgreSQL` schema enforces are checked when a write is staged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use services_common::{Px, Qty, Symbol};
use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::{OrderStore, StoreTransaction};
use crate::book::{OrderKey, is_eligible};
use crate::error::{StoreError, StoreResult};
use crate::order::{Order, OrderId, OrderSide, OrderStatus, Trade, TradeId};

#[derive(Debug, Default)]
struct Tables {
    orders: FxHashMap<OrderId, Order>,
    trades: Vec<Trade>,
}

/// Store holding everything in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    sequence: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn select_orders(&self, filter: impl Fn(&Order) -> bool) -> Vec<Order> {
        let tables = self.tables.read();
        let mut orders: Vec<Order> = tables.orders.values().filter(|o| filter(o)).cloned().collect();
        orders.sort_by_key(|o| Reverse((o.created_at, o.sequence_number)));
        orders
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(&self, mut order: Order) -> StoreResult<Order> {
        if !order.quantity.is_positive()
            || order.filled_quantity < Qty::ZERO
            || order.filled_quantity > order.quantity
        {
            return Err(StoreError::Constraint {
                reason: format!("order {} quantities out of range", order.id),
            });
        }

        let mut tables = self.tables.write();
        if tables.orders.contains_key(&order.id) {
            return Err(StoreError::Constraint {
                reason: format!("duplicate order id {}", order.id),
            });
        }
        order.sequence_number = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        tables.orders.insert(order.id, order.clone());

        debug!("Order {} stored with sequence {}", order.id, order.sequence_number);
        Ok(order)
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            order_updates: FxHashMap::default(),
            trades: Vec::new(),
        }))
    }

    async fn load_order(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.tables.read().orders.get(&order_id).cloned())
    }

    async fn list_orders(&self) -> StoreResult<Vec<Order>> {
        Ok(self.select_orders(|_| true))
    }

    async fn orders_by_symbol(&self, symbol: &Symbol) -> StoreResult<Vec<Order>> {
        Ok(self.select_orders(|o| &o.symbol == symbol))
    }

    async fn orders_by_user(&self, user_id: u64) -> StoreResult<Vec<Order>> {
        Ok(self.select_orders(|o| o.user_id == user_id))
    }

    async fn load_resting_orders(&self) -> StoreResult<Vec<Order>> {
        let mut orders = self.select_orders(|o| o.status.is_open());
        orders.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.sequence_number.cmp(&b.sequence_number))
        });
        Ok(orders)
    }

    async fn load_trade(&self, trade_id: TradeId) -> StoreResult<Option<Trade>> {
        Ok(self.tables.read().trades.iter().find(|t| t.id == trade_id).cloned())
    }

    async fn list_trades(&self) -> StoreResult<Vec<Trade>> {
        let tables = self.tables.read();
        let mut trades: Vec<Trade> = tables.trades.iter().rev().cloned().collect();
        // stable sort: equal timestamps stay newest-inserted first
        trades.sort_by_key(|t| Reverse(t.executed_at));
        Ok(trades)
    }

    async fn trades_for_order(&self, order_id: OrderId) -> StoreResult<Vec<Trade>> {
        Ok(self
            .tables
            .read()
            .trades
            .iter()
            .filter(|t| t.involves(order_id))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
struct StagedUpdate {
    filled_quantity: Qty,
    status: OrderStatus,
    updated_at: DateTime<Utc>,
}

impl StagedUpdate {
    fn apply(self, order: &mut Order) {
        order.filled_quantity = self.filled_quantity;
        order.status = self.status;
        order.updated_at = self.updated_at;
    }
}

struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    order_updates: FxHashMap<OrderId, StagedUpdate>,
    trades: Vec<Trade>,
}

impl MemoryTransaction {
    fn view(&self, order: &Order) -> Order {
        let mut order = order.clone();
        if let Some(update) = self.order_updates.get(&order.id) {
            update.apply(&mut order);
        }
        order
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn load_order(&mut self, order_id: OrderId) -> StoreResult<Option<Order>> {
        let tables = self.tables.read();
        Ok(tables.orders.get(&order_id).map(|o| self.view(o)))
    }

    async fn fetch_eligible_resting_orders(
        &mut self,
        symbol: &Symbol,
        side: OrderSide,
        price_bound: Option<Px>,
    ) -> StoreResult<Vec<Order>> {
        let mut eligible: Vec<Order> = {
            let tables = self.tables.read();
            tables
                .orders
                .values()
                .map(|o| self.view(o))
                .filter(|o| is_eligible(o, symbol, side, price_bound))
                .collect()
        };
        eligible.sort_by_key(OrderKey::for_order);
        Ok(eligible)
    }

    async fn update_order(
        &mut self,
        order_id: OrderId,
        filled_quantity: Qty,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let quantity = {
            let tables = self.tables.read();
            tables
                .orders
                .get(&order_id)
                .map(|o| o.quantity)
                .ok_or(StoreError::MissingOrder { order_id })?
        };
        if filled_quantity < Qty::ZERO || filled_quantity > quantity {
            return Err(StoreError::Constraint {
                reason: format!("filled quantity {filled_quantity} out of range for order {order_id}"),
            });
        }

        self.order_updates.insert(
            order_id,
            StagedUpdate {
                filled_quantity,
                status,
                updated_at,
            },
        );
        Ok(())
    }

    async fn create_trade(&mut self, trade: &Trade) -> StoreResult<TradeId> {
        if !trade.quantity.is_positive() || !trade.price.is_positive() {
            return Err(StoreError::Constraint {
                reason: format!("trade {} must have positive quantity and price", trade.id),
            });
        }
        if trade.buy_order_id == trade.sell_order_id {
            return Err(StoreError::Constraint {
                reason: format!("trade {} pairs order {} with itself", trade.id, trade.buy_order_id),
            });
        }
        {
            let tables = self.tables.read();
            for order_id in [trade.buy_order_id, trade.sell_order_id] {
                if !tables.orders.contains_key(&order_id) {
                    return Err(StoreError::MissingOrder { order_id });
                }
            }
            if tables.trades.iter().any(|t| t.id == trade.id) || self.trades.iter().any(|t| t.id == trade.id) {
                return Err(StoreError::Constraint {
                    reason: format!("duplicate trade id {}", trade.id),
                });
            }
        }

        self.trades.push(trade.clone());
        Ok(trade.id)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let Self {
            tables,
            order_updates,
            trades,
        } = *self;

        let mut tables = tables.write();
        if let Some(order_id) = order_updates.keys().find(|id| !tables.orders.contains_key(*id)) {
            return Err(StoreError::MissingOrder { order_id: *order_id });
        }
        for (order_id, update) in order_updates {
            if let Some(order) = tables.orders.get_mut(&order_id) {
                update.apply(order);
            }
        }
        tables.trades.extend(trades);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        debug!(
            "Discarding {} staged order updates and {} trades",
            self.order_updates.len(),
            self.trades.len()
        );
        Ok(())
    }
}
