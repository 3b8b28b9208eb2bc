//! `PostgreSQL` store
//!
//! Enum columns hold the upper-case wire names (`BUY`, `PARTIALLY_FILLED`).
//! Prices are stored as i64 ticks, quantities as whole shares.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use services_common::{Px, Qty, Symbol};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

use super::{OrderStore, StoreTransaction};
use crate::error::{StoreError, StoreResult};
use crate::instrument::{Instrument, InstrumentReference};
use crate::order::{Order, OrderId, OrderSide, OrderStatus, Trade, TradeId};

const ORDER_COLUMNS: &str = "id, sequence_number, side, category, symbol, quantity, \
     filled_quantity, price, status, user_id, created_at, updated_at";

const TRADE_COLUMNS: &str = "id, buy_order_id, sell_order_id, symbol, quantity, price, executed_at";

const INSTRUMENT_COLUMNS: &str = "symbol, name, description, sector, reference_price, day_high, \
     day_low, volume, market_cap, last_updated";

/// Store backed by a `PostgreSQL` pool
#[derive(Debug, Clone)]
pub struct PgStore {
    /// Database pool
    db_pool: PgPool,
}

impl PgStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.db_pool
    }

    /// List or refresh an instrument
    pub async fn upsert_instrument(&self, instrument: &Instrument) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO instruments (
                symbol, name, description, sector, reference_price,
                day_high, day_low, volume, market_cap, last_updated
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (symbol) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                sector = EXCLUDED.sector,
                reference_price = EXCLUDED.reference_price,
                day_high = EXCLUDED.day_high,
                day_low = EXCLUDED.day_low,
                volume = EXCLUDED.volume,
                market_cap = EXCLUDED.market_cap,
                last_updated = EXCLUDED.last_updated
            ",
        )
        .bind(instrument.symbol.as_str())
        .bind(&instrument.name)
        .bind(&instrument.description)
        .bind(&instrument.sector)
        .bind(instrument.reference_price.as_i64())
        .bind(instrument.day_high.as_i64())
        .bind(instrument.day_low.as_i64())
        .bind(instrument.volume)
        .bind(instrument.market_cap)
        .bind(instrument.last_updated)
        .execute(&self.db_pool)
        .await?;

        debug!("Instrument {} upserted", instrument.symbol);
        Ok(())
    }

    async fn fetch_orders(&self, sql: &str) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query(sql).fetch_all(&self.db_pool).await?;
        rows.iter().map(order_from_row).collect()
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn create_order(&self, mut order: Order) -> StoreResult<Order> {
        let row = sqlx::query(
            r"
            INSERT INTO orders (
                id, side, category, symbol, quantity, filled_quantity,
                price, status, user_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING sequence_number
            ",
        )
        .bind(order.id)
        .bind(order.side.as_str())
        .bind(order.category.as_str())
        .bind(order.symbol.as_str())
        .bind(order.quantity.as_i64())
        .bind(order.filled_quantity.as_i64())
        .bind(order.price.as_i64())
        .bind(order.status.as_str())
        .bind(user_id_to_column(order.user_id)?)
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_one(&self.db_pool)
        .await?;

        order.sequence_number = to_u64("orders", "sequence_number", row.try_get("sequence_number")?)?;
        debug!("Order {} persisted with sequence {}", order.id, order.sequence_number);
        Ok(order)
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.db_pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn load_order(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_orders(&self) -> StoreResult<Vec<Order>> {
        self.fetch_orders(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, sequence_number DESC"
        ))
        .await
    }

    async fn orders_by_symbol(&self, symbol: &Symbol) -> StoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE symbol = $1 \
             ORDER BY created_at DESC, sequence_number DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(symbol.as_str())
            .fetch_all(&self.db_pool)
            .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn orders_by_user(&self, user_id: u64) -> StoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 \
             ORDER BY created_at DESC, sequence_number DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id_to_column(user_id)?)
            .fetch_all(&self.db_pool)
            .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn load_resting_orders(&self) -> StoreResult<Vec<Order>> {
        let orders = self
            .fetch_orders(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders \
                 WHERE status IN ('PENDING', 'PARTIALLY_FILLED') \
                 ORDER BY symbol, created_at, sequence_number"
            ))
            .await?;
        info!("Loaded {} open orders from database", orders.len());
        Ok(orders)
    }

    async fn load_trade(&self, trade_id: TradeId) -> StoreResult<Option<Trade>> {
        let sql = format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(trade_id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.as_ref().map(trade_from_row).transpose()
    }

    async fn list_trades(&self) -> StoreResult<Vec<Trade>> {
        let sql = format!("SELECT {TRADE_COLUMNS} FROM trades ORDER BY executed_at DESC, id");
        let rows = sqlx::query(&sql).fetch_all(&self.db_pool).await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn trades_for_order(&self, order_id: OrderId) -> StoreResult<Vec<Trade>> {
        let sql = format!(
            "SELECT {TRADE_COLUMNS} FROM trades \
             WHERE buy_order_id = $1 OR sell_order_id = $1 ORDER BY executed_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id)
            .fetch_all(&self.db_pool)
            .await?;
        rows.iter().map(trade_from_row).collect()
    }
}

#[async_trait]
impl InstrumentReference for PgStore {
    async fn lookup(&self, symbol: &Symbol) -> StoreResult<Option<Instrument>> {
        let sql = format!("SELECT {INSTRUMENT_COLUMNS} FROM instruments WHERE symbol = $1");
        let row = sqlx::query(&sql)
            .bind(symbol.as_str())
            .fetch_optional(&self.db_pool)
            .await?;
        row.as_ref().map(instrument_from_row).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<Instrument>> {
        let sql = format!("SELECT {INSTRUMENT_COLUMNS} FROM instruments ORDER BY symbol");
        let rows = sqlx::query(&sql).fetch_all(&self.db_pool).await?;
        rows.iter().map(instrument_from_row).collect()
    }
}

/// Unit of work over a `PostgreSQL` transaction
struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn load_order(&mut self, order_id: OrderId) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn fetch_eligible_resting_orders(
        &mut self,
        symbol: &Symbol,
        side: OrderSide,
        price_bound: Option<Px>,
    ) -> StoreResult<Vec<Order>> {
        let sql = eligible_orders_sql(side, price_bound.is_some());
        let mut query = sqlx::query(&sql).bind(symbol.as_str()).bind(side.as_str());
        if let Some(bound) = price_bound {
            query = query.bind(bound.as_i64());
        }
        let rows = query.fetch_all(&mut *self.tx).await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn update_order(
        &mut self,
        order_id: OrderId,
        filled_quantity: Qty,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE orders SET
                filled_quantity = $1,
                status = $2,
                updated_at = $3
            WHERE id = $4
            ",
        )
        .bind(filled_quantity.as_i64())
        .bind(status.as_str())
        .bind(updated_at)
        .bind(order_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MissingOrder { order_id });
        }
        Ok(())
    }

    async fn create_trade(&mut self, trade: &Trade) -> StoreResult<TradeId> {
        sqlx::query(
            r"
            INSERT INTO trades (
                id, buy_order_id, sell_order_id, symbol, quantity, price, executed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(trade.id)
        .bind(trade.buy_order_id)
        .bind(trade.sell_order_id)
        .bind(trade.symbol.as_str())
        .bind(trade.quantity.as_i64())
        .bind(trade.price.as_i64())
        .bind(trade.executed_at)
        .execute(&mut *self.tx)
        .await?;

        debug!("Trade {} recorded", trade.id);
        Ok(trade.id)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let Self { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let Self { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    info!("Running database migrations");

    const STATEMENTS: [&str; 9] = [
        r"
        CREATE TABLE IF NOT EXISTS instruments (
            symbol TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            sector TEXT NOT NULL,
            reference_price BIGINT NOT NULL CHECK (reference_price > 0),
            day_high BIGINT NOT NULL,
            day_low BIGINT NOT NULL,
            volume BIGINT NOT NULL DEFAULT 0 CHECK (volume >= 0),
            market_cap BIGINT NOT NULL CHECK (market_cap > 0),
            last_updated TIMESTAMPTZ NOT NULL,
            CHECK (day_high >= day_low)
        )
        ",
        r"
        CREATE TABLE IF NOT EXISTS orders (
            id UUID PRIMARY KEY,
            sequence_number BIGSERIAL UNIQUE,
            side TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
            category TEXT NOT NULL CHECK (category IN ('LIMIT', 'MARKET')),
            symbol TEXT NOT NULL REFERENCES instruments(symbol),
            quantity BIGINT NOT NULL CHECK (quantity > 0),
            filled_quantity BIGINT NOT NULL DEFAULT 0,
            price BIGINT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('PENDING', 'PARTIALLY_FILLED', 'MATCHED', 'CANCELLED')),
            user_id BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            CHECK (filled_quantity >= 0 AND filled_quantity <= quantity)
        )
        ",
        "CREATE INDEX IF NOT EXISTS idx_orders_matching ON orders (symbol, side, status, price, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders (user_id)",
        "CREATE INDEX IF NOT EXISTS idx_orders_created ON orders (created_at DESC)",
        r"
        CREATE TABLE IF NOT EXISTS trades (
            id UUID PRIMARY KEY,
            buy_order_id UUID NOT NULL REFERENCES orders(id),
            sell_order_id UUID NOT NULL REFERENCES orders(id),
            symbol TEXT NOT NULL REFERENCES instruments(symbol),
            quantity BIGINT NOT NULL CHECK (quantity > 0),
            price BIGINT NOT NULL CHECK (price > 0),
            executed_at TIMESTAMPTZ NOT NULL,
            CHECK (buy_order_id <> sell_order_id)
        )
        ",
        "CREATE INDEX IF NOT EXISTS idx_trades_buy_order ON trades (buy_order_id)",
        "CREATE INDEX IF NOT EXISTS idx_trades_sell_order ON trades (sell_order_id)",
        "CREATE INDEX IF NOT EXISTS idx_trades_executed ON trades (executed_at DESC)",
    ];

    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Database migrations completed");
    Ok(())
}

/// Matching query for resting orders on `side`. Binds: `$1` symbol, `$2`
/// side, `$3` price bound when `bounded`.
fn eligible_orders_sql(side: OrderSide, bounded: bool) -> String {
    let (cmp, direction) = match side {
        OrderSide::Sell => ("<=", "ASC"),
        OrderSide::Buy => (">=", "DESC"),
    };
    let bound = if bounded {
        format!(" AND price {cmp} $3")
    } else {
        String::new()
    };
    format!(
        "SELECT {ORDER_COLUMNS} FROM orders \
         WHERE symbol = $1 AND side = $2 AND category = 'LIMIT' \
         AND status IN ('PENDING', 'PARTIALLY_FILLED') \
         AND filled_quantity < quantity{bound} \
         ORDER BY price {direction}, created_at ASC, sequence_number ASC \
         FOR UPDATE"
    )
}

fn order_from_row(row: &PgRow) -> StoreResult<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        sequence_number: to_u64("orders", "sequence_number", row.try_get("sequence_number")?)?,
        side: parse_column("orders", row.try_get("side")?)?,
        category: parse_column("orders", row.try_get("category")?)?,
        symbol: parse_column("orders", row.try_get("symbol")?)?,
        quantity: Qty::from_i64(row.try_get("quantity")?),
        filled_quantity: Qty::from_i64(row.try_get("filled_quantity")?),
        price: Px::from_i64(row.try_get("price")?),
        status: parse_column("orders", row.try_get("status")?)?,
        user_id: to_u64("orders", "user_id", row.try_get("user_id")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn trade_from_row(row: &PgRow) -> StoreResult<Trade> {
    Ok(Trade {
        id: row.try_get("id")?,
        buy_order_id: row.try_get("buy_order_id")?,
        sell_order_id: row.try_get("sell_order_id")?,
        symbol: parse_column("trades", row.try_get("symbol")?)?,
        quantity: Qty::from_i64(row.try_get("quantity")?),
        price: Px::from_i64(row.try_get("price")?),
        executed_at: row.try_get("executed_at")?,
    })
}

fn instrument_from_row(row: &PgRow) -> StoreResult<Instrument> {
    Ok(Instrument {
        symbol: parse_column("instruments", row.try_get("symbol")?)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        sector: row.try_get("sector")?,
        reference_price: Px::from_i64(row.try_get("reference_price")?),
        day_high: Px::from_i64(row.try_get("day_high")?),
        day_low: Px::from_i64(row.try_get("day_low")?),
        volume: row.try_get("volume")?,
        market_cap: row.try_get("market_cap")?,
        last_updated: row.try_get("last_updated")?,
    })
}

/// Parse a text column into one of the domain enums or a symbol
fn parse_column<T>(entity: &'static str, value: String) -> StoreResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| StoreError::Corrupt {
        entity,
        reason: format!("{value:?}: {e}"),
    })
}

fn to_u64(entity: &'static str, column: &str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt {
        entity,
        reason: format!("negative {column}: {value}"),
    })
}

fn user_id_to_column(user_id: u64) -> StoreResult<i64> {
    i64::try_from(user_id).map_err(|_| StoreError::Constraint {
        reason: format!("user id {user_id} out of range"),
    })
}
