//! The normalization layer (§4.3) — pure, stateless translation from
//! per-exchange [`crate::wire::raw`] types into [`crate::model`] canonical
//! records. No I/O; a normalizer invocation is a plain function call made
//! synchronously inside the producer task (§5).
//!
//! Order-book raw depth events are **not** normalized here: per the data
//! flow in §2, `OrderBookManager` consumes `RawDepth` directly and already
//! emits canonical `OrderBookSnapshot`/`OrderBookDelta`; this module only
//! covers the data flow's other arm (trade/ticker/funding/OI/liquidation/
//! LSR/vol).

pub mod binance;
pub mod deribit;
pub mod okx;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use crate::model::{Exchange, InstrumentKey, MarketType, TimeSource};
use crate::symbol::SymbolRegistry;

/// Errors raised while normalizing one raw event (§4.3, §7). Both variants
/// are non-fatal: the caller drops the offending frame and increments a
/// counter rather than propagating.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown symbol {native:?} on {exchange}: normalizer will not invent a mapping")]
    UnknownSymbol { exchange: Exchange, native: String },

    #[error("malformed field {field:?} in raw {exchange} frame: {reason}")]
    DecodeError {
        exchange: Exchange,
        field: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Resolves `native` to its canonical symbol via `registry`, or returns
/// [`Error::UnknownSymbol`] — the one place every per-exchange normalizer
/// routes through, so "MUST NOT invent mappings for unknown symbols" (§4.3)
/// holds structurally rather than by per-adapter discipline.
pub(crate) fn canonical_key(
    registry: &SymbolRegistry,
    exchange: Exchange,
    market_type: MarketType,
    native: &str,
) -> Result<InstrumentKey> {
    registry
        .canonical(exchange, native)
        .map(|symbol| InstrumentKey::new(exchange, market_type, symbol))
        .ok_or_else(|| Error::UnknownSymbol {
            exchange,
            native: native.to_string(),
        })
}

/// Converts a millisecond epoch timestamp to UTC, defaulting to `ingest_time`
/// (with [`TimeSource::Ingest`]) when the exchange omitted one (§4.3).
pub(crate) fn event_time_ms(
    ms: Option<i64>,
    ingest_time: DateTime<Utc>,
) -> (DateTime<Utc>, TimeSource) {
    match ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single()) {
        Some(t) => (t, TimeSource::Exchange),
        None => (ingest_time, TimeSource::Ingest),
    }
}

pub(crate) fn decimal_field(
    exchange: Exchange,
    field: &'static str,
    raw: &str,
) -> Result<rust_decimal::Decimal> {
    raw.parse().map_err(|e| Error::DecodeError {
        exchange,
        field,
        reason: format!("{e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    #[test]
    fn unknown_symbol_does_not_invent_a_mapping() {
        let mut registry = SymbolRegistry::default();
        registry.insert(
            Exchange::Binance,
            SymbolTable::builder()
                .insert("BTCUSDT", "BTC/USDT")
                .build()
                .unwrap(),
        );
        let err = canonical_key(&registry, Exchange::Binance, MarketType::Spot, "ETHUSDT")
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSymbol { .. }));
    }

    #[test]
    fn missing_event_time_falls_back_to_ingest_time_with_source_flag() {
        let ingest = Utc::now();
        let (t, source) = event_time_ms(None, ingest);
        assert_eq!(t, ingest);
        assert_eq!(source, TimeSource::Ingest);
    }
}
