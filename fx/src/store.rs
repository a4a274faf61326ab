//! Concurrent key-value stores for currencies and rates.
//!
//! Each store is an independent sharded map. Mutation is per key; there is no
//! multi-key transaction, so a reader may observe a refresh half-applied
//! across different keys. A single key is never observed torn.

use std::borrow::Borrow;
use std::hash::Hash;

use dashmap::DashMap;
use ratecalc_common::{Currency, CurrencyCode};
use rust_decimal::Decimal;
use tracing::debug;

/// Thread-safe key-value store.
pub struct Store<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, V>,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert or replace a value. Returns the previous value.
    pub fn upsert(&self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Remove a value. Returns it if present.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Get a copy of the value for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Check if `key` is present.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Collect copies of all values.
    pub fn values(&self) -> Vec<V> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Currency code → currency metadata. Holds enabled currencies only.
pub type CurrencyStore = Store<CurrencyCode, Currency>;

/// Currency code → units of that currency per 1 USD.
pub type RateStore = Store<CurrencyCode, Decimal>;

impl Store<CurrencyCode, Currency> {
    /// Apply a currency record: enabled records are upserted, disabled ones
    /// are dropped so they become unresolvable. Returns whether the currency
    /// is present afterwards.
    pub fn apply(&self, currency: Currency) -> bool {
        if currency.enabled {
            debug!(code = %currency.code, kind = %currency.kind, "Currency upserted");
            self.upsert(currency.code.clone(), currency);
            true
        } else {
            debug!(code = %currency.code, "Currency disabled, dropping");
            self.remove(&currency.code);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_store_upsert_and_get() {
        let rates = RateStore::new();
        assert!(rates.upsert(CurrencyCode::usd(), dec!(1)).is_none());
        assert_eq!(rates.upsert(CurrencyCode::usd(), dec!(1.0)), Some(dec!(1)));

        assert_eq!(rates.get("USD"), Some(dec!(1.0)));
        assert_eq!(rates.get(&CurrencyCode::usd()), Some(dec!(1.0)));
        assert!(rates.get("EUR").is_none());
    }

    #[test]
    fn test_store_remove() {
        let rates = RateStore::new();
        rates.upsert(CurrencyCode::new("EUR"), dec!(0.92));

        assert_eq!(rates.remove("EUR"), Some(dec!(0.92)));
        assert!(rates.remove("EUR").is_none());
        assert!(rates.is_empty());
    }

    #[test]
    fn test_store_values() {
        let rates = RateStore::new();
        rates.upsert(CurrencyCode::new("EUR"), dec!(0.92));
        rates.upsert(CurrencyCode::new("GBP"), dec!(0.79));

        let mut values = rates.values();
        values.sort();

        assert_eq!(values, vec![dec!(0.79), dec!(0.92)]);
        assert_eq!(rates.len(), 2);
    }

    #[test]
    fn test_currency_apply_drops_disabled() {
        let currencies = CurrencyStore::new();

        assert!(currencies.apply(Currency::crypto("BTC", "Bitcoin")));
        assert!(currencies.contains("BTC"));

        assert!(!currencies.apply(Currency::crypto("BTC", "Bitcoin").with_enabled(false)));
        assert!(!currencies.contains("BTC"));
    }

    #[test]
    fn test_concurrent_writers_never_tear_values() {
        let rates = Arc::new(RateStore::new());
        let code = CurrencyCode::new("BTC");

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let rates = rates.clone();
                let code = code.clone();
                thread::spawn(move || {
                    for i in 0..2_000u32 {
                        // Every written value encodes its writer in the scale.
                        let value = Decimal::new(i64::from(i) * 10 + w, 1);
                        rates.upsert(code.clone(), value);
                    }
                })
            })
            .collect();

        let reader = {
            let rates = rates.clone();
            let code = code.clone();
            thread::spawn(move || {
                for _ in 0..8_000 {
                    if let Some(value) = rates.get(&code) {
                        assert_eq!(value.scale(), 1);
                        let writer = value.mantissa() % 10;
                        assert!((0..4).contains(&writer));
                    }
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        assert!(rates.get(&code).is_some());
    }
}
