//! Book recovery and reconciliation
//!
//! Rebuilds the in-memory books from the store after a restart. Every open
//! order is checked against its own fill state and its trades before it is
//! booked; inconsistent orders are reported and left out of the books.
//! Open market orders, left behind by a failed unit, are cancelled.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::lifecycle;
use crate::matching::MatchingEngine;
use crate::order::Order;
use crate::persistence::OrderStore;

/// Recovery manager for handling system restarts
pub struct RecoveryManager {
    store: Arc<dyn OrderStore>,
}

/// Recovery statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    /// Open orders read from the store
    pub orders_loaded: u32,
    /// Orders placed back into the books
    pub orders_restored: u32,
    /// Trades read while reconciling
    pub trades_checked: u32,
    /// Discrepancies found
    pub discrepancies_found: u32,
    /// Stranded market orders cancelled
    pub market_orders_cancelled: u32,
    /// Recovery time (ms)
    pub recovery_time_ms: u64,
}

/// Order that failed reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDiscrepancy {
    /// Order ID
    pub order_id: Uuid,
    /// Discrepancy type
    pub discrepancy_type: DiscrepancyType,
    /// Description
    pub description: String,
}

/// Discrepancy types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiscrepancyType {
    /// Filled quantity outside `0..=quantity`
    QuantityOutOfBounds,
    /// Stored status disagrees with the fill state
    StatusInconsistency,
    /// Sum of trade quantities differs from the filled quantity
    FillMismatch,
    /// Open market order; market orders never rest
    StrandedMarketOrder,
}

/// Outcome of a recovery pass
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Statistics
    pub stats: RecoveryStats,
    /// Orders kept out of the books, with the reason
    pub discrepancies: Vec<OrderDiscrepancy>,
}

impl RecoveryReport {
    /// Check if every open order was restored
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

impl RecoveryManager {
    /// Create new recovery manager
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Reconcile open orders and book the consistent ones into `engine`
    pub async fn recover(&self, engine: &MatchingEngine) -> StoreResult<RecoveryReport> {
        let start = Instant::now();
        let mut stats = RecoveryStats::default();

        info!("Starting book recovery");

        let orders = self.store.load_resting_orders().await?;
        stats.orders_loaded = count(orders.len());

        let mut restorable = Vec::with_capacity(orders.len());
        let mut discrepancies = Vec::new();
        for order in orders {
            let (found, trades) = self.reconcile(&order).await?;
            stats.trades_checked += trades;
            if order.is_market() {
                self.cancel_stranded(&order).await?;
                stats.market_orders_cancelled += 1;
            }
            if found.is_empty() {
                restorable.push(order);
            } else {
                discrepancies.extend(found);
            }
        }

        stats.orders_restored = count(engine.restore(restorable).await);
        stats.discrepancies_found = count(discrepancies.len());
        stats.recovery_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        for discrepancy in &discrepancies {
            warn!(
                "Order {} left out of the books ({:?}): {}",
                discrepancy.order_id, discrepancy.discrepancy_type, discrepancy.description
            );
        }
        info!(
            orders_loaded = stats.orders_loaded,
            orders_restored = stats.orders_restored,
            discrepancies = stats.discrepancies_found,
            market_orders_cancelled = stats.market_orders_cancelled,
            elapsed_ms = stats.recovery_time_ms,
            "Recovery completed"
        );

        Ok(RecoveryReport { stats, discrepancies })
    }

    /// Market orders never rest; cancel one found open, keeping its fills
    async fn cancel_stranded(&self, order: &Order) -> StoreResult<()> {
        let mut tx = self.store.begin().await?;
        let Some(mut current) = tx.load_order(order.id).await? else {
            return tx.rollback().await;
        };
        lifecycle::cancel(&mut current, Utc::now());
        match tx
            .update_order(current.id, current.filled_quantity, current.status, current.updated_at)
            .await
        {
            Ok(()) => {
                tx.commit().await?;
                info!("Cancelled stranded market order {}", order.id);
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    /// Check one open order; returns its discrepancies and the number of
    /// trades read
    async fn reconcile(&self, order: &Order) -> StoreResult<(Vec<OrderDiscrepancy>, u32)> {
        let mut discrepancies = Vec::new();
        let mut flag = |discrepancy_type, description: String| {
            discrepancies.push(OrderDiscrepancy {
                order_id: order.id,
                discrepancy_type,
                description,
            });
        };

        if order.is_market() {
            flag(
                DiscrepancyType::StrandedMarketOrder,
                format!("market order still {}", order.status),
            );
        }

        let in_bounds = !order.filled_quantity.as_i64().is_negative()
            && order.filled_quantity <= order.quantity
            && order.quantity.is_positive();
        if !in_bounds {
            flag(
                DiscrepancyType::QuantityOutOfBounds,
                format!("filled {} of {}", order.filled_quantity, order.quantity),
            );
        } else if !lifecycle::status_is_consistent(order) {
            flag(
                DiscrepancyType::StatusInconsistency,
                format!(
                    "status {} with {} of {} filled",
                    order.status, order.filled_quantity, order.quantity
                ),
            );
        }

        let trades = self.store.trades_for_order(order.id).await?;
        let traded: i64 = trades.iter().map(|t| t.quantity.as_i64()).sum();
        if traded != order.filled_quantity.as_i64() {
            flag(
                DiscrepancyType::FillMismatch,
                format!("filled {} but trades sum to {}", order.filled_quantity, traded),
            );
        }

        debug!("Reconciled order {} against {} trades", order.id, trades.len());
        Ok((discrepancies, count(trades.len())))
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
