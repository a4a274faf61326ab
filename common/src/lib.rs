//! Rate Calculator Common Types
//!
//! This crate contains the currency model shared across the rate calculator:
//! currency codes and classifications, the transient currency pair used to
//! validate conversions, and the conversion error taxonomy.

pub mod currency;
pub mod error;

pub use currency::*;
pub use error::*;
