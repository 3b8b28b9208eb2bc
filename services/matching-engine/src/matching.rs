//! Order matching engine
//!
//! Price-time priority matching against the store's resting orders. Each
//! instrument has its own async mutex owning its [`OrderBook`]; `submit` and
//! `cancel` hold it for the whole unit, so one instrument matches serially
//! while different instruments proceed in parallel.
//!
//! A unit reads eligible orders, writes trades and fill states inside one
//! store transaction, and only touches the in-memory book after commit.

use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use services_common::{Px, Qty, Symbol};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::book::{BookDepth, OrderBook};
use crate::error::{EngineError, EngineResult, InvariantViolation};
use crate::lifecycle;
use crate::order::{Order, OrderCategory, OrderSide, OrderStatus, Trade};
use crate::persistence::{OrderStore, StoreTransaction};
use crate::{EngineMetrics, EngineMetricsSnapshot};

/// Result of a committed `submit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Final state of the submitted order
    pub order: Order,
    /// Trades produced, in execution order
    pub trades: Vec<Trade>,
}

/// Committed effects of one matching pass
struct MatchOutcome {
    order: Order,
    trades: Vec<Trade>,
    counterparties: Vec<Order>,
}

/// Matching engine for order execution
pub struct MatchingEngine {
    /// System of record
    store: Arc<dyn OrderStore>,
    /// Order books by symbol, each behind its instrument guard
    books: RwLock<FxHashMap<Symbol, Arc<Mutex<OrderBook>>>>,
    /// Counters
    metrics: Arc<EngineMetrics>,
}

impl fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("books", &self.books.read().len())
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

impl MatchingEngine {
    /// Create an engine over `store`
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self {
            store,
            books: RwLock::new(FxHashMap::default()),
            metrics: Arc::new(EngineMetrics::default()),
        }
    }

    /// Store a new order and match it as one step under its instrument
    /// guard, so no other unit sees the order before its own has run.
    pub async fn place(&self, order: Order) -> EngineResult<SubmitOutcome> {
        check_contract(&order)?;

        let handle = self.book_handle(&order.symbol);
        let book = handle.lock().await;
        let order = self.store.create_order(order).await?;
        debug!("Order {} created with sequence {}", order.id, order.sequence_number);

        self.run_unit(book, order).await
    }

    /// Match an order already in the store and persist the outcome.
    ///
    /// The stored row is reloaded under the guard and must still be an
    /// unfilled PENDING order. On error nothing the call wrote is kept: no
    /// trade, no fill, no book change.
    pub async fn submit(&self, order: Order) -> EngineResult<SubmitOutcome> {
        check_contract(&order)?;

        let handle = self.book_handle(&order.symbol);
        let book = handle.lock().await;
        self.run_unit(book, order).await
    }

    /// Cancel an order and drop it from the book. Fill quantity is kept;
    /// cancelling a MATCHED or CANCELLED order reasserts CANCELLED.
    pub async fn cancel(&self, order: &Order) -> EngineResult<Order> {
        let handle = self.book_handle(&order.symbol);
        let mut book = handle.lock().await;

        let mut tx = self.store.begin().await?;
        let cancelled = match cancel_order(&mut *tx, order).await {
            Ok(cancelled) => cancelled,
            Err(err) => {
                self.abort(tx, &err).await;
                return Err(err);
            }
        };
        if let Err(err) = tx.commit().await {
            self.metrics.units_rolled_back.fetch_add(1, Ordering::Relaxed);
            warn!("Commit failed cancelling order {}: {}", order.id, err);
            return Err(err.into());
        }

        book.remove(cancelled.id);
        drop(book);

        self.metrics.orders_cancelled.fetch_add(1, Ordering::Relaxed);
        info!("Order {} cancelled with {} filled", cancelled.id, cancelled.filled_quantity);
        Ok(cancelled)
    }

    /// Load resting orders into the books. Returns how many were booked.
    pub async fn restore(&self, orders: Vec<Order>) -> usize {
        let mut by_symbol: FxHashMap<Symbol, Vec<Order>> = FxHashMap::default();
        for order in orders {
            by_symbol.entry(order.symbol.clone()).or_default().push(order);
        }

        let mut booked = 0;
        for (symbol, orders) in by_symbol {
            let handle = self.book_handle(&symbol);
            let mut book = handle.lock().await;
            for order in orders {
                let order_id = order.id;
                if book.insert(order) {
                    booked += 1;
                } else {
                    warn!("Order {} is not restable; skipped", order_id);
                }
            }
        }
        booked
    }

    /// Depth of one instrument's book, `None` if it has never been used
    pub async fn depth(&self, symbol: &Symbol, levels: usize) -> Option<BookDepth> {
        let handle = self.books.read().get(symbol).cloned()?;
        let book = handle.lock().await;
        Some(book.depth(levels))
    }

    /// Resting orders on one side of an instrument, in priority order
    pub async fn resting_orders(&self, symbol: &Symbol, side: OrderSide) -> Vec<Order> {
        let Some(handle) = self.books.read().get(symbol).cloned() else {
            return Vec::new();
        };
        let book = handle.lock().await;
        book.orders(side).cloned().collect()
    }

    /// Instruments with a book
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.books.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Counter snapshot
    #[must_use]
    pub fn metrics(&self) -> EngineMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn run_unit(
        &self,
        mut book: MutexGuard<'_, OrderBook>,
        order: Order,
    ) -> EngineResult<SubmitOutcome> {
        self.metrics.orders_submitted.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Matching order {} {} {} {} {} @ {}",
            order.id, order.side, order.category, order.quantity, order.symbol, order.price
        );

        let mut tx = self.store.begin().await?;
        let outcome = match match_order(&mut *tx, &book, order).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.abort(tx, &err).await;
                return Err(err);
            }
        };
        if let Err(err) = tx.commit().await {
            self.metrics.units_rolled_back.fetch_add(1, Ordering::Relaxed);
            warn!("Commit failed for order {}: {}", outcome.order.id, err);
            return Err(err.into());
        }

        for counterparty in &outcome.counterparties {
            book.apply_update(counterparty);
        }
        for trade in &outcome.trades {
            book.record_trade(trade.price, trade.quantity);
        }
        if outcome.order.is_resting() {
            book.insert(outcome.order.clone());
        }
        drop(book);

        self.record(&outcome);
        info!(
            order_id = %outcome.order.id,
            symbol = %outcome.order.symbol,
            status = %outcome.order.status,
            filled = %outcome.order.filled_quantity,
            trades = outcome.trades.len(),
            "Order processed"
        );

        Ok(SubmitOutcome {
            order: outcome.order,
            trades: outcome.trades,
        })
    }

    fn book_handle(&self, symbol: &Symbol) -> Arc<Mutex<OrderBook>> {
        if let Some(handle) = self.books.read().get(symbol) {
            return Arc::clone(handle);
        }
        let mut books = self.books.write();
        Arc::clone(
            books
                .entry(symbol.clone())
                .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new(symbol.clone())))),
        )
    }

    async fn abort(&self, tx: Box<dyn StoreTransaction>, err: &EngineError) {
        self.metrics.units_rolled_back.fetch_add(1, Ordering::Relaxed);
        match err {
            EngineError::Invariant(violation) => error!("Invariant violated, rolling back: {}", violation),
            other => warn!("Rolling back unit: {}", other),
        }
        if let Err(rollback_err) = tx.rollback().await {
            error!("Rollback failed: {}", rollback_err);
        }
    }

    fn record(&self, outcome: &MatchOutcome) {
        let m = &self.metrics;
        m.trades_executed.fetch_add(outcome.trades.len() as u64, Ordering::Relaxed);
        let volume: i64 = outcome.trades.iter().map(|t| t.quantity.as_i64()).sum();
        m.volume_traded.fetch_add(u64::try_from(volume).unwrap_or(0), Ordering::Relaxed);

        match outcome.order.status {
            OrderStatus::Matched => {
                m.orders_matched.fetch_add(1, Ordering::Relaxed);
            }
            OrderStatus::PartiallyFilled => {
                m.orders_partially_filled.fetch_add(1, Ordering::Relaxed);
                m.orders_resting.fetch_add(1, Ordering::Relaxed);
            }
            OrderStatus::Pending => {
                m.orders_resting.fetch_add(1, Ordering::Relaxed);
            }
            OrderStatus::Cancelled => {
                m.market_orders_cancelled.fetch_add(1, Ordering::Relaxed);
            }
        }
        let filled = outcome
            .counterparties
            .iter()
            .filter(|o| o.status == OrderStatus::Matched)
            .count();
        m.orders_matched.fetch_add(filled as u64, Ordering::Relaxed);
    }
}

fn check_contract(order: &Order) -> EngineResult<()> {
    let violation = |reason: &str| EngineError::ContractViolation {
        order_id: order.id,
        reason: reason.to_string(),
    };

    if !order.quantity.is_positive() {
        return Err(violation("quantity must be greater than 0"));
    }
    if order.category == OrderCategory::Limit && !order.price.is_positive() {
        return Err(violation("limit price must be greater than 0"));
    }
    if order.status != OrderStatus::Pending || !order.filled_quantity.is_zero() {
        return Err(violation("only unfilled PENDING orders can be submitted"));
    }
    Ok(())
}

async fn match_order(
    tx: &mut dyn StoreTransaction,
    book: &OrderBook,
    snapshot: Order,
) -> EngineResult<MatchOutcome> {
    // a fill or cancel may have committed since the caller read the order
    let mut order = tx
        .load_order(snapshot.id)
        .await?
        .ok_or(EngineError::OrderNotFound { order_id: snapshot.id })?;
    check_contract(&order)?;

    let price_bound = match order.category {
        OrderCategory::Limit => Some(order.price),
        OrderCategory::Market => None,
    };
    let resting_side = order.side.opposite();
    let resting = tx
        .fetch_eligible_resting_orders(&order.symbol, resting_side, price_bound)
        .await?;
    if !book
        .eligible(resting_side, price_bound)
        .map(|o| o.id)
        .eq(resting.iter().map(|o| o.id))
    {
        warn!(
            "Book cache for {} diverges from the store on the {} side; matching the store",
            order.symbol, resting_side
        );
    }

    let now = Utc::now();
    let mut trades = Vec::new();
    let mut counterparties = Vec::new();

    if order.is_market() && resting.is_empty() {
        info!("Market order {} found no liquidity on {}; cancelling", order.id, order.symbol);
        lifecycle::cancel(&mut order, now);
        tx.update_order(order.id, order.filled_quantity, order.status, now).await?;
        return Ok(MatchOutcome {
            order,
            trades,
            counterparties,
        });
    }

    for mut maker in resting {
        let remaining = order.remaining_quantity();
        if remaining.is_zero() {
            break;
        }
        let available = maker.remaining_quantity();
        if !available.is_positive() {
            continue;
        }

        let quantity = remaining.min(available);
        let trade = execute(&order, &maker, quantity, now)?;
        tx.create_trade(&trade).await?;

        lifecycle::apply_fill(&mut maker, quantity, now)?;
        tx.update_order(maker.id, maker.filled_quantity, maker.status, now).await?;
        lifecycle::apply_fill(&mut order, quantity, now)?;

        debug!(
            "Matched {} @ {} between {} and {}",
            trade.quantity, trade.price, trade.buy_order_id, trade.sell_order_id
        );
        trades.push(trade);
        counterparties.push(maker);
    }

    if order.is_market() && order.remaining_quantity().is_positive() {
        debug!(
            "Cancelling unfilled remainder {} of market order {}",
            order.remaining_quantity(),
            order.id
        );
        lifecycle::cancel(&mut order, now);
    }
    order.updated_at = now;
    tx.update_order(order.id, order.filled_quantity, order.status, now).await?;

    Ok(MatchOutcome {
        order,
        trades,
        counterparties,
    })
}

async fn cancel_order(tx: &mut dyn StoreTransaction, order: &Order) -> EngineResult<Order> {
    let mut current = tx
        .load_order(order.id)
        .await?
        .ok_or(EngineError::OrderNotFound { order_id: order.id })?;

    lifecycle::cancel(&mut current, Utc::now());
    tx.update_order(current.id, current.filled_quantity, current.status, current.updated_at)
        .await?;
    Ok(current)
}

/// Price a match between an incoming and a resting order. Two limit orders
/// trade at the resting price; otherwise at the limit side's price.
pub fn execution_price(incoming: &Order, resting: &Order) -> Result<Px, InvariantViolation> {
    match (incoming.category, resting.category) {
        (OrderCategory::Limit | OrderCategory::Market, OrderCategory::Limit) => Ok(resting.price),
        (OrderCategory::Limit, OrderCategory::Market) => Ok(incoming.price),
        (OrderCategory::Market, OrderCategory::Market) => Err(InvariantViolation::MarketAgainstMarket {
            incoming: incoming.id,
            resting: resting.id,
        }),
    }
}

/// Build the trade for `quantity` shares between `incoming` and `resting`
fn execute(
    incoming: &Order,
    resting: &Order,
    quantity: Qty,
    at: DateTime<Utc>,
) -> Result<Trade, InvariantViolation> {
    if incoming.id == resting.id {
        return Err(InvariantViolation::SelfTrade { order_id: incoming.id });
    }
    if incoming.symbol != resting.symbol {
        return Err(InvariantViolation::SymbolMismatch {
            order_id: resting.id,
            expected: incoming.symbol.clone(),
            found: resting.symbol.clone(),
        });
    }
    if incoming.side == resting.side {
        return Err(InvariantViolation::SameSide {
            incoming: incoming.id,
            resting: resting.id,
        });
    }

    let price = execution_price(incoming, resting)?;
    let (buy_order_id, sell_order_id) = match incoming.side {
        OrderSide::Buy => (incoming.id, resting.id),
        OrderSide::Sell => (resting.id, incoming.id),
    };
    if !quantity.is_positive() || !price.is_positive() {
        return Err(InvariantViolation::NonPositiveTrade {
            buy_order_id,
            sell_order_id,
        });
    }

    Ok(Trade {
        id: Uuid::new_v4(),
        buy_order_id,
        sell_order_id,
        symbol: incoming.symbol.clone(),
        quantity,
        price,
        executed_at: at,
    })
}
