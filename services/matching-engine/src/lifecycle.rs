//! Order lifecycle: status derivation, fills, cancellation and request validation

use crate::error::{InvariantViolation, ValidationError};
use crate::order::{Order, OrderCategory, OrderRequest, OrderStatus};
use chrono::{DateTime, Utc};
use services_common::{MAX_PRICE_TICKS, MAX_QUANTITY, MIN_QUANTITY, Qty};
use tracing::debug;

/// Status implied by a fill level. Cancellation is the only status not
/// derivable from quantities.
#[must_use]
pub fn derive_status(quantity: Qty, filled: Qty) -> OrderStatus {
    if filled.is_zero() {
        OrderStatus::Pending
    } else if filled < quantity {
        OrderStatus::PartiallyFilled
    } else {
        OrderStatus::Matched
    }
}

/// Whether a persisted order's status agrees with its quantities
#[must_use]
pub fn status_is_consistent(order: &Order) -> bool {
    if order.filled_quantity < Qty::ZERO || order.filled_quantity > order.quantity {
        return false;
    }
    match order.status {
        OrderStatus::Cancelled => true,
        status => status == derive_status(order.quantity, order.filled_quantity),
    }
}

/// Record a fill of `fill` shares on `order` and recompute its status
pub fn apply_fill(order: &mut Order, fill: Qty, at: DateTime<Utc>) -> Result<(), InvariantViolation> {
    if order.is_terminal() {
        return Err(InvariantViolation::FillOnTerminal {
            order_id: order.id,
            status: order.status,
        });
    }

    let remaining = order.remaining_quantity();
    if !fill.is_positive() || fill > remaining {
        return Err(InvariantViolation::Overfill {
            order_id: order.id,
            fill,
            remaining,
        });
    }

    let filled = order
        .filled_quantity
        .checked_add(fill)
        .ok_or(InvariantViolation::QuantityOverflow { order_id: order.id })?;

    order.filled_quantity = filled;
    order.status = derive_status(order.quantity, filled);
    order.updated_at = at;
    Ok(())
}

/// Mark `order` cancelled. Already terminal orders are re-marked without error.
pub fn cancel(order: &mut Order, at: DateTime<Utc>) {
    if order.is_terminal() {
        debug!("Order {} already {}, reasserting CANCELLED", order.id, order.status);
    }
    order.status = OrderStatus::Cancelled;
    order.updated_at = at;
}

/// Validate an order request before it is persisted
pub fn validate_request(request: &OrderRequest) -> Result<(), ValidationError> {
    let quantity = request.quantity.as_i64();
    if quantity < MIN_QUANTITY {
        return Err(ValidationError::InvalidQuantity {
            reason: "quantity must be greater than 0".to_string(),
        });
    }
    if quantity > MAX_QUANTITY {
        return Err(ValidationError::InvalidQuantity {
            reason: format!("quantity must not exceed {MAX_QUANTITY}"),
        });
    }

    if request.category == OrderCategory::Limit {
        match request.price {
            Some(price) if price.is_positive() => {
                if price.as_i64() > MAX_PRICE_TICKS {
                    return Err(ValidationError::InvalidPrice {
                        reason: format!("price {price} exceeds the venue maximum"),
                    });
                }
            }
            _ => {
                return Err(ValidationError::InvalidPrice {
                    reason: "price is required and must be greater than 0 for limit order".to_string(),
                });
            }
        }
    }

    Ok(())
}
