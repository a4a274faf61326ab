//! Conversion engine.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use ratecalc_common::{ConversionError, ConversionResult, Currency, CurrencyCode, CurrencyPair};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, error, instrument};

use crate::conversion::Conversion;
use crate::store::{CurrencyStore, RateStore};

/// Decimal places used when the caller does not ask for any.
pub const DEFAULT_DECIMAL_PLACES: u32 = 5;

/// Converts amounts between currencies using the shared stores.
///
/// Reads only; never blocks on a refresh. A conversion sees whatever each
/// store holds at the moment of each lookup.
#[derive(Clone)]
pub struct ConversionEngine {
    currencies: Arc<CurrencyStore>,
    rates: Arc<RateStore>,
}

impl ConversionEngine {
    /// Create an engine over the given stores.
    pub fn new(currencies: Arc<CurrencyStore>, rates: Arc<RateStore>) -> Self {
        Self { currencies, rates }
    }

    pub fn currencies(&self) -> &Arc<CurrencyStore> {
        &self.currencies
    }

    pub fn rates(&self) -> &Arc<RateStore> {
        &self.rates
    }

    /// Convert `amount` of `base` into `quote`, rounded half away from zero
    /// to `decimal_places`.
    #[instrument(skip(self), level = "debug")]
    pub fn convert(
        &self,
        base: &str,
        quote: &str,
        amount: Decimal,
        decimal_places: u32,
    ) -> ConversionResult<Conversion> {
        match catch_unwind(AssertUnwindSafe(|| {
            self.convert_inner(base, quote, amount, decimal_places)
        })) {
            Ok(result) => result,
            Err(_) => {
                error!(base, quote, "Conversion panicked");
                Err(ConversionError::ServiceInternal)
            }
        }
    }

    fn convert_inner(
        &self,
        base: &str,
        quote: &str,
        amount: Decimal,
        decimal_places: u32,
    ) -> ConversionResult<Conversion> {
        let base = CurrencyCode::new(base);
        let quote = CurrencyCode::new(quote);

        let pair = CurrencyPair::new(self.lookup_currency(&base)?, self.lookup_currency(&quote)?);
        pair.validate()?;

        let base_rate = self.lookup_rate(&base)?;
        let quote_rate = self.lookup_rate(&quote)?;

        let cross_rate = quote_rate.checked_div(base_rate).ok_or_else(|| {
            error!(pair = %pair, "Cross rate overflow");
            ConversionError::ServiceInternal
        })?;

        let converted = amount.checked_mul(cross_rate).ok_or_else(|| {
            error!(pair = %pair, amount = %amount, "Converted amount overflow");
            ConversionError::ServiceInternal
        })?;

        let output =
            converted.round_dp_with_strategy(decimal_places, RoundingStrategy::MidpointAwayFromZero);

        debug!(pair = %pair, cross_rate = %cross_rate, output = %output, "Converted");

        Ok(Conversion::new(
            base,
            quote,
            amount,
            cross_rate,
            output,
            decimal_places,
        ))
    }

    fn lookup_currency(&self, code: &CurrencyCode) -> ConversionResult<Currency> {
        self.currencies
            .get(code)
            .ok_or_else(|| ConversionError::CurrencyNotAvailable(code.clone()))
    }

    fn lookup_rate(&self, code: &CurrencyCode) -> ConversionResult<Decimal> {
        match self.rates.get(code) {
            Some(rate) if rate.is_sign_positive() && !rate.is_zero() => Ok(rate),
            other => {
                error!(code = %code, rate = ?other, "Unusable rate");
                Err(ConversionError::InvalidInternalRate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn engine() -> ConversionEngine {
        let currencies = Arc::new(CurrencyStore::new());
        currencies.apply(Currency::fiat("USD", "US Dollar"));
        currencies.apply(Currency::fiat("EUR", "Euro"));
        currencies.apply(Currency::crypto("BTC", "Bitcoin"));
        currencies.apply(Currency::crypto("ETH", "Ether"));

        let rates = Arc::new(RateStore::new());
        rates.upsert(CurrencyCode::usd(), dec!(1));
        rates.upsert(CurrencyCode::new("BTC"), dec!(50000));

        ConversionEngine::new(currencies, rates)
    }

    #[test]
    fn test_usd_to_btc() {
        let conversion = engine().convert("usd", "btc", dec!(100000), 2).unwrap();

        assert_eq!(conversion.cross_rate, dec!(50000));
        assert_eq!(conversion.output, dec!(5000000000));
        assert_eq!(conversion.base, CurrencyCode::usd());
        assert_eq!(conversion.quote.as_str(), "BTC");
    }

    #[test]
    fn test_btc_to_usd() {
        let conversion = engine().convert(" BTC ", "Usd", dec!(1), 5).unwrap();

        assert_eq!(conversion.cross_rate, dec!(0.00002));
        assert_eq!(conversion.output, dec!(0.00002));
    }

    #[test]
    fn test_unknown_currency_checked_before_rates() {
        let empty = ConversionEngine::new(Arc::new(CurrencyStore::new()), Arc::new(RateStore::new()));
        empty.rates().upsert(CurrencyCode::usd(), dec!(1));

        assert_eq!(
            empty.convert("usd", "btc", dec!(1), 5),
            Err(ConversionError::CurrencyNotAvailable(CurrencyCode::usd()))
        );

        assert_eq!(
            engine().convert("usd", "xyz", dec!(1), 5),
            Err(ConversionError::CurrencyNotAvailable(CurrencyCode::new("XYZ")))
        );
    }

    #[test]
    fn test_same_kind_pair_rejected() {
        let engine = engine();
        engine.rates().upsert(CurrencyCode::new("ETH"), dec!(0.0004));

        let err = engine.convert("btc", "eth", dec!(1), 5).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CURRENCY_PAIR");

        let err = engine.convert("usd", "usd", dec!(1), 5).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_missing_or_zero_rate() {
        let engine = engine();

        assert_eq!(
            engine.convert("eur", "btc", dec!(1), 5),
            Err(ConversionError::InvalidInternalRate)
        );

        engine.rates().upsert(CurrencyCode::new("EUR"), dec!(0));
        assert_eq!(
            engine.convert("eur", "btc", dec!(1), 5),
            Err(ConversionError::InvalidInternalRate)
        );

        engine.rates().upsert(CurrencyCode::new("ETH"), dec!(-1));
        assert_eq!(
            engine.convert("usd", "eth", dec!(1), 5),
            Err(ConversionError::InvalidInternalRate)
        );
    }

    #[test]
    fn test_disabled_currency_unavailable() {
        let engine = engine();
        engine
            .currencies()
            .apply(Currency::crypto("BTC", "Bitcoin").with_enabled(false));

        assert_eq!(
            engine.convert("usd", "btc", dec!(1), 5),
            Err(ConversionError::CurrencyNotAvailable(CurrencyCode::new("BTC")))
        );
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        let engine = engine();
        engine.rates().upsert(CurrencyCode::new("ETH"), dec!(0.125));

        let up = engine.convert("usd", "eth", dec!(1), 2).unwrap();
        assert_eq!(up.output, dec!(0.13));

        let down = engine.convert("usd", "eth", dec!(-1), 2).unwrap();
        assert_eq!(down.output, dec!(-0.13));
    }

    #[test]
    fn test_overflow_is_internal_error() {
        let engine = engine();
        engine.rates().upsert(CurrencyCode::usd(), dec!(0.0000000001));
        engine.rates().upsert(CurrencyCode::new("BTC"), Decimal::MAX);

        assert_eq!(
            engine.convert("usd", "btc", dec!(1), 5),
            Err(ConversionError::ServiceInternal)
        );
    }

    proptest! {
        #[test]
        fn prop_conversion_is_idempotent(mantissa in -1_000_000_000_000i64..1_000_000_000_000i64, scale in 0u32..8, places in 0u32..10) {
            let engine = engine();
            let amount = Decimal::new(mantissa, scale);

            let first = engine.convert("btc", "usd", amount, places).unwrap();
            let second = engine.convert("btc", "usd", amount, places).unwrap();

            prop_assert_eq!(first.output, second.output);
            prop_assert_eq!(first.cross_rate, second.cross_rate);
        }
    }
}
