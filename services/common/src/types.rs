//! Core value types shared by the venue services

use crate::constants::{FIXED_POINT_SCALE, FIXED_POINT_SCALE_F64, MAX_SYMBOL_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a ticker string is not a valid symbol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    /// Ticker was empty after trimming
    #[error("symbol is empty")]
    Empty,
    /// Ticker exceeded the maximum length
    #[error("symbol {symbol} is longer than {max} characters")]
    TooLong {
        /// Offending ticker
        symbol: String,
        /// Maximum accepted length
        max: usize,
    },
    /// Ticker contained characters other than ASCII letters and digits
    #[error("symbol {symbol} contains invalid characters")]
    InvalidCharacters {
        /// Offending ticker
        symbol: String,
    },
}

/// Instrument ticker, normalised to upper case (e.g. `NXTECH`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalise a ticker
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let ticker = raw.trim();
        if ticker.is_empty() {
            return Err(SymbolError::Empty);
        }
        if ticker.len() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong {
                symbol: ticker.to_string(),
                max: MAX_SYMBOL_LEN,
            });
        }
        if !ticker.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SymbolError::InvalidCharacters {
                symbol: ticker.to_string(),
            });
        }
        Ok(Self(ticker.to_ascii_uppercase()))
    }

    /// Ticker as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Price type (stored as i64 ticks for determinism, 4 decimal places)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Px(i64); // 1 tick = 0.0001

impl Px {
    /// Zero price
    pub const ZERO: Self = Self(0);

    /// Create a price from a decimal value, rounding to the nearest tick.
    /// For boundary conversions only; prefer `from_i64`.
    #[must_use]
    pub fn new(value: f64) -> Self {
        const MAX_SAFE: f64 = 9_223_372_036_854_775_807.0;
        const MIN_SAFE: f64 = -9_223_372_036_854_775_808.0;

        let scaled = (value * FIXED_POINT_SCALE_F64).round();
        if scaled >= MAX_SAFE {
            Self(i64::MAX)
        } else if scaled <= MIN_SAFE {
            Self(i64::MIN)
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let ticks = scaled as i64;
            Self(ticks)
        }
    }

    /// Create from whole currency units
    #[must_use]
    pub const fn from_units(units: i64) -> Self {
        Self(units * FIXED_POINT_SCALE)
    }

    /// Create from cents (100 cents = 1 unit)
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents * (FIXED_POINT_SCALE / 100))
    }

    /// Create from i64 ticks
    #[must_use]
    pub const fn from_i64(ticks: i64) -> Self {
        Self(ticks)
    }

    /// Price as i64 ticks
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Price as f64, for external APIs only
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        {
            self.0 as f64 / FIXED_POINT_SCALE_F64
        }
    }

    /// Strictly greater than zero
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Px {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let whole = (self.0 / FIXED_POINT_SCALE).abs();
        let frac = (self.0 % FIXED_POINT_SCALE).abs();
        write!(f, "{sign}{whole}.{frac:04}")
    }
}

/// Quantity in whole shares
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Qty(i64);

impl Qty {
    /// Zero quantity
    pub const ZERO: Self = Self(0);

    /// Create from a share count
    #[must_use]
    pub const fn from_i64(shares: i64) -> Self {
        Self(shares)
    }

    /// Share count as i64
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Check if quantity is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Strictly greater than zero
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checked addition; `None` on overflow
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked subtraction; `None` on overflow
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Subtraction floored at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        let v = self.0.saturating_sub(other.0);
        if v < 0 { Self::ZERO } else { Self(v) }
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
