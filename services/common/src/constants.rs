//! Common constants used across the venue services
//!
//! Single source of truth for numeric limits and fixed-point scales.

// Fixed-point arithmetic constants
/// Fixed-point scale factor for prices (4 decimal places)
pub const FIXED_POINT_SCALE: i64 = 10_000;
/// Fixed-point scale as f64, for boundary conversions only
pub const FIXED_POINT_SCALE_F64: f64 = 10_000.0;

// Numeric limits for validation
/// Largest accepted price in ticks (1 billion units)
pub const MAX_PRICE_TICKS: i64 = 1_000_000_000 * FIXED_POINT_SCALE;
/// Largest accepted order quantity in shares
pub const MAX_QUANTITY: i64 = 1_000_000_000;
/// Smallest accepted order quantity in shares
pub const MIN_QUANTITY: i64 = 1;

// Symbol constraints
/// Longest accepted ticker
pub const MAX_SYMBOL_LEN: usize = 12;
