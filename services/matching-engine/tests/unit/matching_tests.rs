//! Unit tests for order matching

use rstest::*;
use services_common::{Px, Qty};

use matching_engine::Exchange;
use matching_engine::order::{OrderSide, OrderStatus};

use crate::common::*;

/// Test fixture for an empty venue
#[fixture]
fn exchange() -> Exchange {
    create_test_exchange()
}

#[rstest]
#[tokio::test]
async fn test_limit_order_no_match_rests(exchange: Exchange) {
    let outcome = submit_ok(&exchange, limit(OrderSide::Buy, 100, 10)).await;

    assert!(outcome.trades.is_empty(), "Single order should not generate trades");
    assert_eq!(outcome.order.status, OrderStatus::Pending);

    let bids = exchange.engine().resting_orders(&symbol(TEST_SYMBOL), OrderSide::Buy).await;
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].id, outcome.order.id);
}

#[rstest]
#[tokio::test]
async fn test_partial_fill_at_resting_price(exchange: Exchange) {
    let sell = submit_ok(&exchange, limit(OrderSide::Sell, 40, 9)).await.order;
    let buy = submit_ok(&exchange, limit(OrderSide::Buy, 100, 10)).await;

    assert_eq!(buy.trades.len(), 1);
    let trade = &buy.trades[0];
    assert_eq!(trade.quantity, Qty::from_i64(40));
    assert_eq!(trade.price, Px::from_units(9), "Trade executes at the resting price");
    assert_eq!(trade.buy_order_id, buy.order.id);
    assert_eq!(trade.sell_order_id, sell.id);

    assert_eq!(buy.order.status, OrderStatus::PartiallyFilled);
    assert_eq!(buy.order.filled_quantity, Qty::from_i64(40));

    let sell = exchange.order(sell.id).await.expect("stored sell");
    assert_eq!(sell.status, OrderStatus::Matched);

    let depth = exchange.depth(&symbol(TEST_SYMBOL)).await.expect("depth");
    assert!(depth.asks.is_empty(), "Matched seller leaves the book");
    assert_eq!(depth.bids.len(), 1);
    assert_eq!(depth.bids[0].price, Px::from_units(10));
    assert_eq!(depth.bids[0].quantity, Qty::from_i64(60));
    assert_eq!(depth.last_price, Some(Px::from_units(9)));
    assert_eq!(depth.total_volume, Qty::from_i64(40));
}

#[rstest]
#[tokio::test]
async fn test_market_buy_fills_at_limit_price(exchange: Exchange) {
    let sell = submit_ok(&exchange, limit(OrderSide::Sell, 50, 20)).await.order;
    let buy = submit_ok(&exchange, market(OrderSide::Buy, 50)).await;

    assert_eq!(buy.trades.len(), 1);
    assert_eq!(buy.trades[0].price, Px::from_units(20));
    assert_eq!(buy.trades[0].quantity, Qty::from_i64(50));
    assert_eq!(buy.order.status, OrderStatus::Matched);

    let sell = exchange.order(sell.id).await.expect("stored sell");
    assert_eq!(sell.status, OrderStatus::Matched);
    assert_eq!(sell.filled_quantity, Qty::from_i64(50));
}

#[rstest]
#[tokio::test]
async fn test_market_order_into_empty_book_is_cancelled(exchange: Exchange) {
    let outcome = submit_ok(&exchange, market(OrderSide::Buy, 25)).await;

    assert!(outcome.trades.is_empty());
    assert_eq!(outcome.order.status, OrderStatus::Cancelled);
    assert_eq!(outcome.order.filled_quantity, Qty::ZERO);

    let stored = exchange.order(outcome.order.id).await.expect("stored order");
    assert_eq!(stored.status, OrderStatus::Cancelled);
    assert!(exchange.trades().await.expect("trades").is_empty());

    let depth = exchange.depth(&symbol(TEST_SYMBOL)).await.expect("depth");
    assert!(depth.bids.is_empty() && depth.asks.is_empty(), "Market orders never rest");
}

#[rstest]
#[tokio::test]
async fn test_market_sell_remainder_is_cancelled(exchange: Exchange) {
    submit_ok(&exchange, limit(OrderSide::Buy, 30, 10)).await;
    let sell = submit_ok(&exchange, market(OrderSide::Sell, 50)).await;

    assert_eq!(sell.trades.len(), 1);
    assert_eq!(sell.trades[0].price, Px::from_units(10));
    assert_eq!(sell.order.filled_quantity, Qty::from_i64(30));
    assert_eq!(sell.order.status, OrderStatus::Cancelled);

    let depth = exchange.depth(&symbol(TEST_SYMBOL)).await.expect("depth");
    assert!(depth.asks.is_empty(), "Unfilled market remainder does not rest");
    assert!(depth.bids.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_time_priority_at_equal_price(exchange: Exchange) {
    let first = submit_ok(&exchange, limit(OrderSide::Sell, 30, 10)).await.order;
    let second = submit_ok(&exchange, limit(OrderSide::Sell, 30, 10)).await.order;

    let buy = submit_ok(&exchange, limit(OrderSide::Buy, 40, 10)).await;

    assert_eq!(buy.trades.len(), 2);
    assert_eq!(buy.trades[0].sell_order_id, first.id, "Older order fills first");
    assert_eq!(buy.trades[0].quantity, Qty::from_i64(30));
    assert_eq!(buy.trades[1].sell_order_id, second.id);
    assert_eq!(buy.trades[1].quantity, Qty::from_i64(10));

    let second = exchange.order(second.id).await.expect("stored");
    assert_eq!(second.status, OrderStatus::PartiallyFilled);
    assert_eq!(second.remaining_quantity(), Qty::from_i64(20));
}

#[rstest]
#[tokio::test]
async fn test_price_priority_beats_time(exchange: Exchange) {
    let expensive = submit_ok(&exchange, limit(OrderSide::Sell, 10, 11)).await.order;
    let cheap = submit_ok(&exchange, limit(OrderSide::Sell, 10, 10)).await.order;

    let buy = submit_ok(&exchange, limit(OrderSide::Buy, 15, 11)).await;

    assert_eq!(buy.trades.len(), 2);
    assert_eq!(buy.trades[0].sell_order_id, cheap.id);
    assert_eq!(buy.trades[0].price, Px::from_units(10));
    assert_eq!(buy.trades[1].sell_order_id, expensive.id);
    assert_eq!(buy.trades[1].price, Px::from_units(11));
    assert_eq!(buy.order.status, OrderStatus::Matched);
}

#[rstest]
#[tokio::test]
async fn test_incoming_sell_trades_at_resting_bid(exchange: Exchange) {
    submit_ok(&exchange, limit(OrderSide::Buy, 10, 12)).await;
    let sell = submit_ok(&exchange, limit(OrderSide::Sell, 10, 11)).await;

    assert_eq!(sell.trades.len(), 1);
    assert_eq!(sell.trades[0].price, Px::from_units(12));
    assert_eq!(sell.order.status, OrderStatus::Matched);
}

#[rstest]
#[tokio::test]
async fn test_non_crossing_orders_both_rest(exchange: Exchange) {
    submit_ok(&exchange, limit(OrderSide::Buy, 10, 9)).await;
    let sell = submit_ok(&exchange, limit(OrderSide::Sell, 10, 10)).await;

    assert!(sell.trades.is_empty());
    let quote = exchange.quote(&symbol(TEST_SYMBOL)).await.expect("quote");
    assert_eq!(quote, (Some(Px::from_units(9)), Some(Px::from_units(10))));
}

#[rstest]
#[tokio::test]
async fn test_market_order_sweeps_levels(exchange: Exchange) {
    for price in [12, 10, 11] {
        submit_ok(&exchange, limit(OrderSide::Sell, 5, price)).await;
    }

    let buy = submit_ok(&exchange, market(OrderSide::Buy, 12)).await;

    let prices: Vec<Px> = buy.trades.iter().map(|t| t.price).collect();
    assert_eq!(prices, vec![Px::from_units(10), Px::from_units(11), Px::from_units(12)]);
    assert_eq!(buy.trades[2].quantity, Qty::from_i64(2));
    assert_eq!(buy.order.status, OrderStatus::Matched);

    let asks = exchange.engine().resting_orders(&symbol(TEST_SYMBOL), OrderSide::Sell).await;
    assert_eq!(asks.len(), 1);
    assert_eq!(asks[0].remaining_quantity(), Qty::from_i64(3));
}

#[rstest]
#[tokio::test]
async fn test_instruments_do_not_cross(exchange: Exchange) {
    submit_ok(&exchange, limit_on("CYBEX", OrderSide::Sell, 10, 10)).await;
    let buy = submit_ok(&exchange, limit_on("MEDIX", OrderSide::Buy, 10, 10)).await;

    assert!(buy.trades.is_empty());
    assert_eq!(buy.order.status, OrderStatus::Pending);
}

#[rstest]
#[tokio::test]
async fn test_cancelled_order_is_no_longer_eligible(exchange: Exchange) {
    let sell = submit_ok(&exchange, limit(OrderSide::Sell, 50, 10)).await.order;
    submit_ok(&exchange, limit(OrderSide::Buy, 20, 10)).await;

    let cancelled = exchange.cancel(sell.id).await.expect("cancel");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.filled_quantity, Qty::from_i64(20), "Fills survive cancellation");

    let buy = submit_ok(&exchange, market(OrderSide::Buy, 10)).await;
    assert!(buy.trades.is_empty());
    assert_eq!(buy.order.status, OrderStatus::Cancelled);
    assert_store_consistent(&exchange).await;
}

#[rstest]
#[tokio::test]
async fn test_metrics_follow_outcomes(exchange: Exchange) {
    submit_ok(&exchange, limit(OrderSide::Sell, 40, 9)).await;
    submit_ok(&exchange, limit(OrderSide::Buy, 100, 10)).await;
    submit_ok(&exchange, market(OrderSide::Sell, 5)).await;
    let empty = submit_ok(&exchange, limit_on("SOLRX", OrderSide::Buy, 1, 1)).await.order;
    exchange.cancel(empty.id).await.expect("cancel");
    submit_ok(&exchange, market(OrderSide::Buy, 5)).await;

    let metrics = exchange.metrics();
    assert_eq!(metrics.orders_submitted, 5);
    assert_eq!(metrics.trades_executed, 2);
    assert_eq!(metrics.volume_traded, 45);
    assert_eq!(metrics.orders_matched, 2, "Seller and market sell");
    assert_eq!(metrics.orders_partially_filled, 1);
    assert_eq!(metrics.market_orders_cancelled, 1);
    assert_eq!(metrics.orders_cancelled, 1);
    assert_eq!(metrics.units_rolled_back, 0);
}
