//! Shared value types for the venue services

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::*;
