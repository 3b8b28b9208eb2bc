//! Per-instrument order book
//!
//! Resting limit orders keyed by price-time priority. The book is a cache of
//! the store's open orders: the engine applies committed outcomes to it and
//! rebuilds it from the store on recovery.

use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use serde::Serialize;
use services_common::{Px, Qty, Symbol};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::warn;

use crate::order::{Order, OrderCategory, OrderId, OrderSide};

/// Key for order sorting (price-time priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderKey {
    /// Price in ticks, negated for buy orders so better bids sort first
    price: i64,
    /// Creation time
    created_at: DateTime<Utc>,
    /// Store sequence, last-resort tie-break
    sequence: u64,
}

impl OrderKey {
    /// Priority key of `order` within its side of the book
    #[must_use]
    pub fn for_order(order: &Order) -> Self {
        let ticks = order.price.as_i64();
        Self {
            price: match order.side {
                OrderSide::Buy => -ticks,
                OrderSide::Sell => ticks,
            },
            created_at: order.created_at,
            sequence: order.sequence_number,
        }
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.price
            .cmp(&other.price)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Whether a resting order of `resting_side` priced at `resting_price` is
/// within `bound`. `None` means any price (market orders).
#[must_use]
pub fn within_bound(resting_side: OrderSide, resting_price: Px, bound: Option<Px>) -> bool {
    match (resting_side, bound) {
        (_, None) => true,
        (OrderSide::Sell, Some(limit)) => resting_price <= limit,
        (OrderSide::Buy, Some(limit)) => resting_price >= limit,
    }
}

/// Eligibility of `order` as a resting counterparty on `side` of `symbol`
#[must_use]
pub fn is_eligible(order: &Order, symbol: &Symbol, side: OrderSide, bound: Option<Px>) -> bool {
    order.side == side
        && order.category == OrderCategory::Limit
        && order.status.is_open()
        && order.remaining_quantity().is_positive()
        && &order.symbol == symbol
        && within_bound(side, order.price, bound)
}

/// Aggregated quantity at one price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceLevel {
    /// Level price
    pub price: Px,
    /// Sum of remaining quantity
    pub quantity: Qty,
    /// Number of resting orders
    pub orders: usize,
}

/// Order book depth
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookDepth {
    /// Symbol
    pub symbol: Symbol,
    /// Bid levels, best first
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best first
    pub asks: Vec<PriceLevel>,
    /// Last traded price
    pub last_price: Option<Px>,
    /// Total volume traded since the book was created
    pub total_volume: Qty,
}

/// Resting orders of a single instrument
#[derive(Debug)]
pub struct OrderBook {
    symbol: Symbol,
    bids: BTreeMap<OrderKey, Order>,
    asks: BTreeMap<OrderKey, Order>,
    index: FxHashMap<OrderId, (OrderSide, OrderKey)>,
    last_price: Option<Px>,
    total_volume: Qty,
}

impl OrderBook {
    /// Create an empty book
    #[must_use]
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: FxHashMap::default(),
            last_price: None,
            total_volume: Qty::ZERO,
        }
    }

    /// Instrument of this book
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    fn side(&self, side: OrderSide) -> &BTreeMap<OrderKey, Order> {
        match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: OrderSide) -> &mut BTreeMap<OrderKey, Order> {
        match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        }
    }

    /// Insert or replace a resting order. Returns false, leaving the book
    /// unchanged, for orders that cannot rest here.
    pub fn insert(&mut self, order: Order) -> bool {
        if order.symbol != self.symbol
            || order.category != OrderCategory::Limit
            || !order.status.is_open()
            || !order.remaining_quantity().is_positive()
        {
            return false;
        }

        self.remove(order.id);
        let key = OrderKey::for_order(&order);
        let side = order.side;
        self.index.insert(order.id, (side, key));
        self.side_mut(side).insert(key, order);
        true
    }

    /// Remove an order, returning it if it was resting
    pub fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        let (side, key) = self.index.remove(&order_id)?;
        self.side_mut(side).remove(&key)
    }

    /// Replace a resting order with its committed state. Orders no longer
    /// open leave the book; open orders missing from the cache are added.
    pub fn apply_update(&mut self, order: &Order) {
        if order.symbol != self.symbol {
            warn!(
                "Ignoring update for order {} on {} in book {}",
                order.id, order.symbol, self.symbol
            );
            return;
        }
        if order.is_resting() && order.remaining_quantity().is_positive() {
            self.insert(order.clone());
        } else {
            self.remove(order.id);
        }
    }

    /// Record an executed trade
    pub fn record_trade(&mut self, price: Px, quantity: Qty) {
        self.last_price = Some(price);
        self.total_volume = self.total_volume.checked_add(quantity).unwrap_or(Qty::from_i64(i64::MAX));
    }

    /// Resting order by id
    #[must_use]
    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        let (side, key) = self.index.get(&order_id)?;
        self.side(*side).get(key)
    }

    /// Whether an order is resting in this book
    #[must_use]
    pub fn contains(&self, order_id: OrderId) -> bool {
        self.index.contains_key(&order_id)
    }

    /// Resting orders on `side`, in priority order
    pub fn orders(&self, side: OrderSide) -> impl Iterator<Item = &Order> {
        self.side(side).values()
    }

    /// Orders on `side` a counterparty bounded by `bound` could trade with,
    /// in priority order
    pub fn eligible(&self, side: OrderSide, bound: Option<Px>) -> impl Iterator<Item = &Order> {
        self.side(side)
            .values()
            .take_while(move |o| within_bound(side, o.price, bound))
    }

    /// Best resting bid
    #[must_use]
    pub fn best_bid(&self) -> Option<Px> {
        self.bids.values().next().map(|o| o.price)
    }

    /// Best resting ask
    #[must_use]
    pub fn best_ask(&self) -> Option<Px> {
        self.asks.values().next().map(|o| o.price)
    }

    /// Number of resting orders
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if no orders are resting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Last traded price
    #[must_use]
    pub const fn last_price(&self) -> Option<Px> {
        self.last_price
    }

    /// Aggregated depth, best `levels` price levels per side
    #[must_use]
    pub fn depth(&self, levels: usize) -> BookDepth {
        BookDepth {
            symbol: self.symbol.clone(),
            bids: aggregate(self.bids.values(), levels),
            asks: aggregate(self.asks.values(), levels),
            last_price: self.last_price,
            total_volume: self.total_volume,
        }
    }
}

fn aggregate<'a>(orders: impl Iterator<Item = &'a Order>, levels: usize) -> Vec<PriceLevel> {
    let mut out: Vec<PriceLevel> = Vec::with_capacity(levels);
    for order in orders {
        let remaining = order.remaining_quantity();
        match out.last_mut() {
            Some(level) if level.price == order.price => {
                level.quantity = level.quantity.checked_add(remaining).unwrap_or(level.quantity);
                level.orders += 1;
            }
            _ => {
                if out.len() == levels {
                    break;
                }
                out.push(PriceLevel {
                    price: order.price,
                    quantity: remaining,
                    orders: 1,
                });
            }
        }
    }
    out
}
