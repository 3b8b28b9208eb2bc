//! Restart recovery against a shared store

use chrono::Utc;
use services_common::Qty;

use matching_engine::order::{Order, OrderSide, OrderStatus};
use matching_engine::persistence::{MemoryStore, OrderStore};
use matching_engine::recovery::DiscrepancyType;
use matching_engine::Exchange;

use crate::common::*;

async fn booked(exchange: &Exchange, ticker: &str) -> (Vec<Order>, Vec<Order>) {
    let engine = exchange.engine();
    (
        engine.resting_orders(&symbol(ticker), OrderSide::Buy).await,
        engine.resting_orders(&symbol(ticker), OrderSide::Sell).await,
    )
}

#[tokio::test]
async fn test_recovery_rebuilds_the_books() {
    let store = MemoryStore::new();
    let before = create_exchange_over(store.clone());

    submit_ok(&before, limit(OrderSide::Sell, 40, 101)).await;
    submit_ok(&before, limit(OrderSide::Sell, 25, 102)).await;
    submit_ok(&before, limit(OrderSide::Buy, 50, 101)).await;
    submit_ok(&before, limit(OrderSide::Buy, 10, 99)).await;
    let gone = submit_ok(&before, limit(OrderSide::Buy, 5, 98)).await.order;
    before.cancel(gone.id).await.expect("cancel");
    submit_ok(&before, market(OrderSide::Sell, 3)).await;
    submit_ok(&before, limit_on("GENUM", OrderSide::Buy, 8, 94)).await;

    let after = create_exchange_over(store);
    let report = after.recover().await.expect("recover");

    assert!(report.is_clean(), "unexpected discrepancies: {:?}", report.discrepancies);
    assert_eq!(report.stats.orders_loaded, 4);
    assert_eq!(report.stats.orders_restored, 4);

    for ticker in [TEST_SYMBOL, "GENUM"] {
        assert_eq!(booked(&after, ticker).await, booked(&before, ticker).await, "{ticker} book differs");
    }

    // the recovered book keeps matching where the old one stopped
    let sweep = submit_ok(&after, market(OrderSide::Buy, 100)).await;
    let swept: i64 = sweep.trades.iter().map(|t| t.quantity.as_i64()).sum();
    assert_eq!(swept, 25, "Only the remaining ask quantity is available");
    assert_store_consistent(&after).await;
}

#[tokio::test]
async fn test_recovery_flags_corrupt_fill_state() {
    let store = MemoryStore::new();
    let before = create_exchange_over(store.clone());
    let resting = submit_ok(&before, limit(OrderSide::Buy, 20, 100)).await.order;

    // fill state written without a backing trade
    let mut tx = store.begin().await.expect("begin");
    tx.update_order(
        resting.id,
        Qty::from_i64(5),
        OrderStatus::PartiallyFilled,
        Utc::now(),
    )
    .await
    .expect("update");
    tx.commit().await.expect("commit");

    let after = create_exchange_over(store);
    let report = after.recover().await.expect("recover");

    assert_eq!(report.stats.orders_restored, 0);
    assert_eq!(report.discrepancies.len(), 1);
    assert_eq!(report.discrepancies[0].order_id, resting.id);
    assert_eq!(report.discrepancies[0].discrepancy_type, DiscrepancyType::FillMismatch);
    assert!(booked(&after, TEST_SYMBOL).await.0.is_empty());
}
