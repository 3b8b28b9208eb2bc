//! Unit tests for order lifecycle management

use chrono::Utc;
use proptest::prelude::*;
use rstest::*;
use services_common::{MAX_QUANTITY, Px, Qty, Symbol};
use uuid::Uuid;

use matching_engine::error::{InvariantViolation, ValidationError};
use matching_engine::lifecycle::{apply_fill, cancel, derive_status, status_is_consistent, validate_request};
use matching_engine::order::{Order, OrderCategory, OrderRequest, OrderSide, OrderStatus};

/// Test fixture for a fresh resting limit order
#[fixture]
fn valid_order() -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4(),
        sequence_number: 1,
        side: OrderSide::Buy,
        category: OrderCategory::Limit,
        symbol: Symbol::parse("QNTUM").expect("valid symbol"),
        quantity: Qty::from_i64(100),
        filled_quantity: Qty::ZERO,
        price: Px::from_units(87),
        status: OrderStatus::Pending,
        user_id: 7,
        created_at: now,
        updated_at: now,
    }
}

fn request(category: OrderCategory, quantity: i64, price: Option<Px>) -> OrderRequest {
    OrderRequest {
        side: OrderSide::Sell,
        category,
        symbol: Symbol::parse("QNTUM").expect("valid symbol"),
        quantity: Qty::from_i64(quantity),
        price,
        user_id: 1,
    }
}

#[rstest]
#[case(100, 0, OrderStatus::Pending)]
#[case(100, 1, OrderStatus::PartiallyFilled)]
#[case(100, 99, OrderStatus::PartiallyFilled)]
#[case(100, 100, OrderStatus::Matched)]
#[case(1, 1, OrderStatus::Matched)]
fn test_status_derivation(#[case] quantity: i64, #[case] filled: i64, #[case] expected: OrderStatus) {
    assert_eq!(derive_status(Qty::from_i64(quantity), Qty::from_i64(filled)), expected);
}

#[rstest]
fn test_fills_walk_the_lifecycle(mut valid_order: Order) {
    apply_fill(&mut valid_order, Qty::from_i64(40), Utc::now()).expect("first fill");
    assert_eq!(valid_order.status, OrderStatus::PartiallyFilled);
    assert_eq!(valid_order.remaining_quantity(), Qty::from_i64(60));
    assert!(valid_order.is_resting());

    apply_fill(&mut valid_order, Qty::from_i64(60), Utc::now()).expect("final fill");
    assert_eq!(valid_order.status, OrderStatus::Matched);
    assert!(valid_order.is_terminal());
    assert!(!valid_order.is_resting());
}

#[rstest]
fn test_overfill_is_rejected_without_mutation(mut valid_order: Order) {
    let before = valid_order.clone();
    let err = apply_fill(&mut valid_order, Qty::from_i64(101), Utc::now()).expect_err("overfill");
    assert!(matches!(err, InvariantViolation::Overfill { .. }));
    assert_eq!(valid_order, before);

    let err = apply_fill(&mut valid_order, Qty::ZERO, Utc::now()).expect_err("empty fill");
    assert!(matches!(err, InvariantViolation::Overfill { .. }));
}

#[rstest]
fn test_fill_on_cancelled_order_is_rejected(mut valid_order: Order) {
    cancel(&mut valid_order, Utc::now());
    let err = apply_fill(&mut valid_order, Qty::from_i64(1), Utc::now()).expect_err("terminal");
    assert_eq!(
        err,
        InvariantViolation::FillOnTerminal {
            order_id: valid_order.id,
            status: OrderStatus::Cancelled,
        }
    );
}

#[rstest]
fn test_cancel_keeps_fills_and_is_idempotent(mut valid_order: Order) {
    apply_fill(&mut valid_order, Qty::from_i64(30), Utc::now()).expect("fill");
    cancel(&mut valid_order, Utc::now());
    assert_eq!(valid_order.status, OrderStatus::Cancelled);
    assert_eq!(valid_order.filled_quantity, Qty::from_i64(30));

    cancel(&mut valid_order, Utc::now());
    assert_eq!(valid_order.status, OrderStatus::Cancelled);
    assert_eq!(valid_order.filled_quantity, Qty::from_i64(30));
    assert!(status_is_consistent(&valid_order));
}

#[rstest]
fn test_inconsistent_status_is_detected(mut valid_order: Order) {
    valid_order.filled_quantity = Qty::from_i64(100);
    valid_order.status = OrderStatus::PartiallyFilled;
    assert!(!status_is_consistent(&valid_order));

    valid_order.filled_quantity = Qty::from_i64(101);
    valid_order.status = OrderStatus::Matched;
    assert!(!status_is_consistent(&valid_order));
}

#[rstest]
#[case::limit(OrderCategory::Limit, 10, Some(Px::from_units(5)))]
#[case::market_without_price(OrderCategory::Market, 10, None)]
#[case::market_price_ignored(OrderCategory::Market, 10, Some(Px::ZERO))]
#[case::max_quantity(OrderCategory::Limit, MAX_QUANTITY, Some(Px::from_cents(1)))]
fn test_valid_requests(#[case] category: OrderCategory, #[case] quantity: i64, #[case] price: Option<Px>) {
    assert_eq!(validate_request(&request(category, quantity, price)), Ok(()));
}

#[rstest]
#[case::zero_quantity(OrderCategory::Limit, 0, Some(Px::from_units(5)))]
#[case::negative_quantity(OrderCategory::Market, -5, None)]
#[case::quantity_over_limit(OrderCategory::Limit, MAX_QUANTITY + 1, Some(Px::from_units(5)))]
fn test_invalid_quantity(#[case] category: OrderCategory, #[case] quantity: i64, #[case] price: Option<Px>) {
    assert!(matches!(
        validate_request(&request(category, quantity, price)),
        Err(ValidationError::InvalidQuantity { .. })
    ));
}

#[rstest]
#[case::missing(None)]
#[case::zero(Some(Px::ZERO))]
#[case::negative(Some(Px::from_units(-3)))]
#[case::over_limit(Some(Px::from_i64(i64::MAX)))]
fn test_invalid_limit_price(#[case] price: Option<Px>) {
    assert!(matches!(
        validate_request(&request(OrderCategory::Limit, 10, price)),
        Err(ValidationError::InvalidPrice { .. })
    ));
}

proptest! {
    #[test]
    fn test_fills_never_exceed_quantity(quantity in 1i64..10_000, fills in prop::collection::vec(1i64..5_000, 0..20)) {
        let mut order = valid_order();
        order.quantity = Qty::from_i64(quantity);

        for fill in fills {
            let before = order.filled_quantity;
            match apply_fill(&mut order, Qty::from_i64(fill), Utc::now()) {
                Ok(()) => prop_assert_eq!(order.filled_quantity.as_i64(), before.as_i64() + fill),
                Err(_) => prop_assert_eq!(order.filled_quantity, before),
            }
            prop_assert!(order.filled_quantity <= order.quantity);
            prop_assert!(status_is_consistent(&order));
        }
    }
}
