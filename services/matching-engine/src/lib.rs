//! Venue matching engine
//!
//! Continuous double-auction matching for a small stock venue, with the
//! order and trade store as the system of record.
//!
//! Features:
//! - Price-time priority matching of LIMIT and MARKET orders
//! - One exclusive guard per instrument; instruments match in parallel
//! - Atomic units: trades and fill states commit together or not at all
//! - In-memory order books rebuilt from the store on startup
//! - PostgreSQL and in-memory stores behind one trait

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use services_common::{Px, Qty, Symbol};
use sqlx::postgres::PgPoolOptions;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use uuid::Uuid;

pub mod book;
pub mod config;
pub mod error;
pub mod instrument;
pub mod lifecycle;
pub mod matching;
pub mod order;
pub mod persistence;
pub mod recovery;

pub use config::ExchangeConfig;
pub use error::{ExchangeError, ExchangeResult};
pub use matching::{MatchingEngine, SubmitOutcome};

use book::{BookDepth, OrderBook};
use error::{StoreResult, ValidationError};
use instrument::{Instrument, InstrumentReference, default_catalogue};
use order::{InstrumentOrders, Order, OrderCategory, OrderId, OrderRequest, OrderStatus, RawOrderRequest, Trade, TradeId};
use persistence::{OrderStore, PgStore};
use recovery::{RecoveryManager, RecoveryReport};

/// Engine counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Orders accepted by the engine
    pub orders_submitted: AtomicU64,
    /// Orders that reached MATCHED, incoming or resting
    pub orders_matched: AtomicU64,
    /// Incoming orders left partially filled
    pub orders_partially_filled: AtomicU64,
    /// Incoming orders booked with a remainder
    pub orders_resting: AtomicU64,
    /// Market orders cancelled for lack of liquidity
    pub market_orders_cancelled: AtomicU64,
    /// Cancellation requests committed
    pub orders_cancelled: AtomicU64,
    /// Trades executed
    pub trades_executed: AtomicU64,
    /// Shares traded
    pub volume_traded: AtomicU64,
    /// Units rolled back
    pub units_rolled_back: AtomicU64,
}

impl EngineMetrics {
    /// Current counter values
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            orders_matched: self.orders_matched.load(Ordering::Relaxed),
            orders_partially_filled: self.orders_partially_filled.load(Ordering::Relaxed),
            orders_resting: self.orders_resting.load(Ordering::Relaxed),
            market_orders_cancelled: self.market_orders_cancelled.load(Ordering::Relaxed),
            orders_cancelled: self.orders_cancelled.load(Ordering::Relaxed),
            trades_executed: self.trades_executed.load(Ordering::Relaxed),
            volume_traded: self.volume_traded.load(Ordering::Relaxed),
            units_rolled_back: self.units_rolled_back.load(Ordering::Relaxed),
        }
    }
}

/// Engine metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineMetricsSnapshot {
    /// Orders accepted by the engine
    pub orders_submitted: u64,
    /// Orders that reached MATCHED
    pub orders_matched: u64,
    /// Incoming orders left partially filled
    pub orders_partially_filled: u64,
    /// Incoming orders booked with a remainder
    pub orders_resting: u64,
    /// Market orders cancelled for lack of liquidity
    pub market_orders_cancelled: u64,
    /// Cancellation requests committed
    pub orders_cancelled: u64,
    /// Trades executed
    pub trades_executed: u64,
    /// Shares traded
    pub volume_traded: u64,
    /// Units rolled back
    pub units_rolled_back: u64,
}

/// Venue facade: validation, order creation, matching and queries
pub struct Exchange {
    /// Configuration
    config: Arc<ExchangeConfig>,
    /// System of record
    store: Arc<dyn OrderStore>,
    /// Listed instruments
    instruments: Arc<dyn InstrumentReference>,
    /// Matching engine
    engine: Arc<MatchingEngine>,
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Exchange {
    /// Assemble an exchange over the given store and instrument source
    pub fn new(
        config: ExchangeConfig,
        store: Arc<dyn OrderStore>,
        instruments: Arc<dyn InstrumentReference>,
    ) -> Self {
        let engine = Arc::new(MatchingEngine::new(Arc::clone(&store)));
        Self {
            config: Arc::new(config),
            store,
            instruments,
            engine,
        }
    }

    /// Connect to PostgreSQL, prepare the schema and rebuild the books
    pub async fn connect(config: ExchangeConfig) -> anyhow::Result<Self> {
        info!("Initializing exchange");

        let db_pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.database_url)
            .await
            .context("failed to connect to the order database")?;

        if config.run_migrations {
            persistence::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }

        let store = Arc::new(PgStore::new(db_pool));
        if config.seed_default_instruments {
            seed_instruments(&store).await.context("failed to seed instruments")?;
        }

        let exchange = Self::new(config, store.clone(), store);
        if exchange.config.recover_on_start {
            exchange.recover().await.context("failed to recover order books")?;
        }

        info!("Exchange initialized successfully");
        Ok(exchange)
    }

    /// Validate, store and match a new order
    pub async fn submit(&self, request: OrderRequest) -> ExchangeResult<SubmitOutcome> {
        lifecycle::validate_request(&request)?;

        let instrument = self
            .instruments
            .lookup(&request.symbol)
            .await?
            .ok_or_else(|| ValidationError::UnknownSymbol {
                symbol: request.symbol.to_string(),
            })?;

        let price = match request.category {
            OrderCategory::Limit => request.price.ok_or_else(|| ValidationError::InvalidPrice {
                reason: "price is required for limit order".to_string(),
            })?,
            OrderCategory::Market => instrument.reference_price,
        };

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            sequence_number: 0,
            side: request.side,
            category: request.category,
            symbol: request.symbol,
            quantity: request.quantity,
            filled_quantity: Qty::ZERO,
            price,
            status: OrderStatus::Pending,
            user_id: request.user_id,
            created_at: now,
            updated_at: now,
        };
        Ok(self.engine.place(order).await?)
    }

    /// Parse and submit an untyped request
    pub async fn submit_raw(&self, request: RawOrderRequest) -> ExchangeResult<SubmitOutcome> {
        let request = OrderRequest::try_from(request)?;
        self.submit(request).await
    }

    /// Cancel an order by id
    pub async fn cancel(&self, order_id: OrderId) -> ExchangeResult<Order> {
        let order = self.order(order_id).await?;
        Ok(self.engine.cancel(&order).await?)
    }

    /// Order by id
    pub async fn order(&self, order_id: OrderId) -> ExchangeResult<Order> {
        self.store
            .load_order(order_id)
            .await?
            .ok_or(ExchangeError::OrderNotFound { order_id })
    }

    /// All orders, newest first
    pub async fn orders(&self) -> ExchangeResult<Vec<Order>> {
        Ok(self.store.list_orders().await?)
    }

    /// Orders of one instrument split by side, newest first
    pub async fn orders_by_symbol(&self, symbol: &Symbol) -> ExchangeResult<InstrumentOrders> {
        self.instrument(symbol).await?;
        let orders = self.store.orders_by_symbol(symbol).await?;
        Ok(InstrumentOrders::split(orders))
    }

    /// Orders of one client, newest first
    pub async fn orders_by_user(&self, user_id: u64) -> ExchangeResult<Vec<Order>> {
        Ok(self.store.orders_by_user(user_id).await?)
    }

    /// All trades, newest first
    pub async fn trades(&self) -> ExchangeResult<Vec<Trade>> {
        Ok(self.store.list_trades().await?)
    }

    /// Trade by id
    pub async fn trade(&self, trade_id: TradeId) -> ExchangeResult<Trade> {
        self.store
            .load_trade(trade_id)
            .await?
            .ok_or(ExchangeError::TradeNotFound { trade_id })
    }

    /// Trades an order took part in, oldest first
    pub async fn trades_for_order(&self, order_id: OrderId) -> ExchangeResult<Vec<Trade>> {
        self.order(order_id).await?;
        Ok(self.store.trades_for_order(order_id).await?)
    }

    /// Listed instrument
    pub async fn instrument(&self, symbol: &Symbol) -> ExchangeResult<Instrument> {
        self.instruments
            .lookup(symbol)
            .await?
            .ok_or_else(|| ExchangeError::InstrumentNotFound { symbol: symbol.clone() })
    }

    /// All listed instruments
    pub async fn instruments(&self) -> ExchangeResult<Vec<Instrument>> {
        Ok(self.instruments.list().await?)
    }

    /// Aggregated book of one instrument, to the configured depth
    pub async fn depth(&self, symbol: &Symbol) -> ExchangeResult<BookDepth> {
        self.instrument(symbol).await?;
        let levels = self.config.depth_levels;
        Ok(match self.engine.depth(symbol, levels).await {
            Some(depth) => depth,
            None => OrderBook::new(symbol.clone()).depth(levels),
        })
    }

    /// Best bid and ask of one instrument
    pub async fn quote(&self, symbol: &Symbol) -> ExchangeResult<(Option<Px>, Option<Px>)> {
        let depth = self.depth(symbol).await?;
        Ok((
            depth.bids.first().map(|level| level.price),
            depth.asks.first().map(|level| level.price),
        ))
    }

    /// Rebuild the books from the store
    pub async fn recover(&self) -> StoreResult<RecoveryReport> {
        RecoveryManager::new(Arc::clone(&self.store))
            .recover(&self.engine)
            .await
    }

    /// Engine counters
    pub fn metrics(&self) -> EngineMetricsSnapshot {
        self.engine.metrics()
    }

    /// Matching engine
    pub fn engine(&self) -> &Arc<MatchingEngine> {
        &self.engine
    }

    /// Configuration
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }
}

/// List any default instrument that is missing; existing records are kept
async fn seed_instruments(store: &PgStore) -> StoreResult<()> {
    let mut seeded = 0;
    for instrument in default_catalogue() {
        if store.lookup(&instrument.symbol).await?.is_none() {
            store.upsert_instrument(&instrument).await?;
            seeded += 1;
        }
    }
    info!("Seeded {} default instruments", seeded);
    Ok(())
}
