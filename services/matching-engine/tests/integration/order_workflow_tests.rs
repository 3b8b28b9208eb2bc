//! Integration tests for complete order processing workflow

use rstest::*;
use services_common::{Px, Qty};

use matching_engine::order::{OrderRequest, OrderSide, OrderStatus};
use matching_engine::Exchange;

use crate::common::*;

#[fixture]
fn exchange() -> Exchange {
    create_test_exchange()
}

fn for_user(mut request: OrderRequest, user_id: u64) -> OrderRequest {
    request.user_id = user_id;
    request
}

#[rstest]
#[tokio::test]
async fn test_trading_session_workflow(exchange: Exchange) {
    // two makers on each side, one taker sweeping the asks
    let ask_low = submit_ok(&exchange, for_user(limit(OrderSide::Sell, 30, 151), 1)).await.order;
    let ask_high = submit_ok(&exchange, for_user(limit(OrderSide::Sell, 50, 153), 1)).await.order;
    let bid = submit_ok(&exchange, for_user(limit(OrderSide::Buy, 20, 149), 2)).await.order;
    let other = submit_ok(&exchange, for_user(limit_on("FUSON", OrderSide::Buy, 5, 118), 2)).await.order;

    let taker = submit_ok(&exchange, for_user(limit(OrderSide::Buy, 60, 153), 3)).await;
    assert_eq!(taker.order.status, OrderStatus::Matched);
    assert_eq!(taker.trades.len(), 2);
    assert_eq!(taker.trades[0].sell_order_id, ask_low.id);
    assert_eq!(taker.trades[1].sell_order_id, ask_high.id);

    // queries
    let all = exchange.orders().await.expect("orders");
    assert_eq!(all.len(), 5);
    assert_eq!(all[0].id, taker.order.id, "Newest first");
    assert_eq!(all[4].id, ask_low.id);

    let split = exchange.orders_by_symbol(&symbol(TEST_SYMBOL)).await.expect("by symbol");
    assert_eq!(split.buy_orders.len(), 2);
    assert_eq!(split.sell_orders.len(), 2);
    assert_eq!(split.buy_orders[0].id, taker.order.id);
    assert_eq!(split.buy_orders[1].id, bid.id);
    assert!(split.buy_orders.iter().chain(&split.sell_orders).all(|o| o.id != other.id));

    let user_two = exchange.orders_by_user(2).await.expect("by user");
    let ids: Vec<_> = user_two.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![other.id, bid.id]);

    let trades = exchange.trades().await.expect("trades");
    assert_eq!(trades.len(), 2);
    let fetched = exchange.trade(trades[0].id).await.expect("trade by id");
    assert_eq!(fetched, trades[0]);

    let taker_trades = exchange.trades_for_order(taker.order.id).await.expect("taker trades");
    assert_eq!(taker_trades.len(), 2);
    assert_eq!(taker_trades[0].price, Px::from_units(151), "Oldest first");
    assert_eq!(taker_trades[1].price, Px::from_units(153));

    let ask_high = exchange.order(ask_high.id).await.expect("stored");
    assert_eq!(ask_high.status, OrderStatus::PartiallyFilled);
    assert_eq!(ask_high.remaining_quantity(), Qty::from_i64(20));

    // book
    let depth = exchange.depth(&symbol(TEST_SYMBOL)).await.expect("depth");
    assert_eq!(depth.asks.len(), 1);
    assert_eq!(depth.asks[0].quantity, Qty::from_i64(20));
    assert_eq!(depth.bids.len(), 1);
    assert_eq!(depth.bids[0].price, Px::from_units(149));
    assert_eq!(depth.last_price, Some(Px::from_units(153)));
    assert_eq!(depth.total_volume, Qty::from_i64(60));

    // cancel the remaining ask and check it is gone everywhere
    let cancelled = exchange.cancel(ask_high.id).await.expect("cancel");
    assert_eq!(cancelled.filled_quantity, Qty::from_i64(30));
    let depth = exchange.depth(&symbol(TEST_SYMBOL)).await.expect("depth");
    assert!(depth.asks.is_empty());

    assert_store_consistent(&exchange).await;
}

#[rstest]
#[tokio::test]
async fn test_depth_of_untraded_instrument_is_empty(exchange: Exchange) {
    let depth = exchange.depth(&symbol("COGNT")).await.expect("listed instrument");
    assert!(depth.bids.is_empty());
    assert!(depth.asks.is_empty());
    assert_eq!(depth.last_price, None);
    assert_eq!(depth.total_volume, Qty::ZERO);
}

#[rstest]
#[tokio::test]
async fn test_depth_aggregates_price_levels(exchange: Exchange) {
    for (quantity, price) in [(10, 100), (15, 100), (5, 99), (7, 98)] {
        submit_ok(&exchange, limit(OrderSide::Buy, quantity, price)).await;
    }

    let depth = exchange.depth(&symbol(TEST_SYMBOL)).await.expect("depth");
    let levels: Vec<(Px, Qty, usize)> = depth.bids.iter().map(|l| (l.price, l.quantity, l.orders)).collect();
    assert_eq!(
        levels,
        vec![
            (Px::from_units(100), Qty::from_i64(25), 2),
            (Px::from_units(99), Qty::from_i64(5), 1),
            (Px::from_units(98), Qty::from_i64(7), 1),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn test_instrument_listing(exchange: Exchange) {
    let listed = exchange.instruments().await.expect("instruments");
    assert_eq!(listed.len(), 10);
    assert!(listed.windows(2).all(|w| w[0].symbol < w[1].symbol));

    let medix = exchange.instrument(&symbol("MEDIX")).await.expect("listed");
    assert_eq!(medix.sector, "Healthcare");
}
