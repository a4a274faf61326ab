//! Conversion result record.

use chrono::{DateTime, Utc};
use ratecalc_common::CurrencyCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A completed conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    /// Currency the input amount is expressed in.
    pub base: CurrencyCode,
    /// Currency the amount was converted into.
    pub quote: CurrencyCode,
    /// Input amount.
    pub amount: Decimal,
    /// Units of quote per 1 unit of base.
    pub cross_rate: Decimal,
    /// Converted amount, rounded to `decimal_places`.
    pub output: Decimal,
    pub decimal_places: u32,
    /// When the conversion was executed.
    pub executed_at: DateTime<Utc>,
}

impl Conversion {
    /// Create a new conversion record stamped with the current time.
    pub fn new(
        base: CurrencyCode,
        quote: CurrencyCode,
        amount: Decimal,
        cross_rate: Decimal,
        output: Decimal,
        decimal_places: u32,
    ) -> Self {
        Self {
            base,
            quote,
            amount,
            cross_rate,
            output,
            decimal_places,
            executed_at: Utc::now(),
        }
    }

    /// Output as a float, for wire formats that carry plain JSON numbers.
    pub fn output_f64(&self) -> f64 {
        self.output.to_f64().unwrap_or_default()
    }
}
