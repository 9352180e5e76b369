use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_SYMBOL_LEN: usize = 16;

/// One price observation for one symbol at second resolution.
///
/// Fields are private so a record can only come out of [`TickRecord::new`]
/// or [`TickRecord::from_payload`], both of which validate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickRecord {
    symbol: String,
    price: f64,
    timestamp: i64,
}

#[derive(Debug, Error, PartialEq)]
pub enum TickError {
    #[error("payload is not a tick object: {0}")]
    Decode(String),
    #[error("symbol {0:?} is not an uppercase ticker")]
    InvalidSymbol(String),
    #[error("price {0} must be finite and positive")]
    InvalidPrice(f64),
    #[error("timestamp {0} must not be negative")]
    InvalidTimestamp(i64),
}

/// Wire shape before validation. serde rejects missing fields and a
/// non-integer `timestamp`.
#[derive(Deserialize)]
struct RawTick {
    symbol: String,
    price: f64,
    timestamp: i64,
}

impl TickRecord {
    pub fn new(symbol: impl Into<String>, price: f64, timestamp: i64) -> Result<Self, TickError> {
        let symbol = symbol.into();
        if !is_ticker(&symbol) {
            return Err(TickError::InvalidSymbol(symbol));
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(TickError::InvalidPrice(price));
        }
        if timestamp < 0 {
            return Err(TickError::InvalidTimestamp(timestamp));
        }
        Ok(Self {
            symbol,
            price,
            timestamp,
        })
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, TickError> {
        let raw: RawTick =
            serde_json::from_slice(payload).map_err(|err| TickError::Decode(err.to_string()))?;
        Self::new(raw.symbol, raw.price, raw.timestamp)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl<'de> Deserialize<'de> for TickRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawTick::deserialize(deserializer)?;
        TickRecord::new(raw.symbol, raw.price, raw.timestamp).map_err(serde::de::Error::custom)
    }
}

fn is_ticker(symbol: &str) -> bool {
    let mut chars = symbol.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {}
        _ => return false,
    }
    symbol.len() <= MAX_SYMBOL_LEN
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-')
}
