//! Canonical data model (§3).
//!
//! Every type here is exchange-agnostic: [`crate::normalize`] adapters
//! produce these from raw per-exchange wire formats, and [`crate::publisher`]
//! ships them to the bus unchanged. Decimals use [`rust_decimal::Decimal`] at
//! [`crate::decimal::SCALE`] fractional digits; timestamps are always UTC.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The three exchanges this crate has `WireAdapter`/`OrderBookManager`
/// strategies for. The teacher crate's `Exchange` enum enumerated every
/// market Tardis.dev replays historical data for; here the set is narrowed
/// to exchanges the core actually connects to live (§6).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Exchange {
    Binance,
    Okx,
    Deribit,
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Exchange::Binance => "binance",
            Exchange::Okx => "okx",
            Exchange::Deribit => "deribit",
        };
        f.write_str(s)
    }
}

/// Market type, §3 / GLOSSARY.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Spot,
    Linear,
    Inverse,
    Option,
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketType::Spot => "spot",
            MarketType::Linear => "linear",
            MarketType::Inverse => "inverse",
            MarketType::Option => "option",
        };
        f.write_str(s)
    }
}

/// Immutable identity of an instrument inside the core. The canonical
/// `symbol` form is fixed per-exchange at config load (§3, §9 Open
/// Question #3) by [`crate::symbol::SymbolTable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub exchange: Exchange,
    pub market_type: MarketType,
    pub symbol: String,
}

impl InstrumentKey {
    pub fn new(exchange: Exchange, market_type: MarketType, symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            market_type,
            symbol: symbol.into(),
        }
    }
}

impl std::fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.exchange, self.market_type, self.symbol)
    }
}

/// A single price/quantity level. `quantity == 0` in a delta means "remove
/// this level" (§3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn is_removal(&self) -> bool {
        self.quantity.is_zero()
    }
}

/// Trade side, from the taker's perspective.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// How an event's timestamp was derived (§4.3).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    Exchange,
    Ingest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedTrade {
    pub key: InstrumentKey,
    pub trade_id: Option<String>,
    pub price: Decimal,
    pub quantity: Decimal,
    pub quote_quantity: Decimal,
    pub side: Side,
    pub is_buyer_maker: bool,
    pub trade_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
    pub time_source: TimeSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedTicker {
    pub key: InstrumentKey,
    pub last_price: Decimal,
    pub volume_24h: Decimal,
    pub quote_volume_24h: Decimal,
    pub price_change_24h: Decimal,
    pub price_change_pct_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
    pub time_source: TimeSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedFundingRate {
    pub key: InstrumentKey,
    pub funding_rate: Decimal,
    pub next_funding_time: DateTime<Utc>,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedOpenInterest {
    pub key: InstrumentKey,
    pub open_interest: Decimal,
    pub open_interest_value: Decimal,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedLiquidation {
    pub key: InstrumentKey,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
}

/// Long/short ratio sample variant (§3).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LSRVariant {
    AllAccounts,
    TopPositions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LSRSample {
    pub key: InstrumentKey,
    pub period: String,
    pub long_ratio: Decimal,
    pub short_ratio: Decimal,
    pub variant: LSRVariant,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityIndex {
    pub key: InstrumentKey,
    pub index_value: Decimal,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
}

/// The full in-memory order book for one instrument. Owned exclusively by
/// its [`crate::orderbook::OrderBookManager`] (§3 Ownership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub key: InstrumentKey,
    pub last_update_id: i64,
    /// Sorted descending by price.
    pub bids: Vec<PriceLevel>,
    /// Sorted ascending by price.
    pub asks: Vec<PriceLevel>,
    pub snapshot_time: DateTime<Utc>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some(a - b),
            _ => None,
        }
    }

    /// Testable Property 4: `best_bid < best_ask` whenever both sides are
    /// populated.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b >= a,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub key: InstrumentKey,
    pub last_update_id: i64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub snapshot_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookDelta {
    pub key: InstrumentKey,
    pub first_update_id: i64,
    pub last_update_id: i64,
    pub bids_changed: Vec<PriceLevel>,
    pub asks_changed: Vec<PriceLevel>,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
}

/// A canonical record of any type, used by the Publisher (§4.5) to derive a
/// subject and a key without needing a `match` on every concrete record type
/// at every call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum CanonicalRecord {
    Trade(NormalizedTrade),
    Ticker(NormalizedTicker),
    Funding(NormalizedFundingRate),
    OpenInterest(NormalizedOpenInterest),
    Liquidation(NormalizedLiquidation),
    Lsr(LSRSample),
    Vol(VolatilityIndex),
    BookSnapshot(OrderBookSnapshot),
    BookDelta(OrderBookDelta),
}

impl CanonicalRecord {
    pub fn key(&self) -> &InstrumentKey {
        match self {
            CanonicalRecord::Trade(r) => &r.key,
            CanonicalRecord::Ticker(r) => &r.key,
            CanonicalRecord::Funding(r) => &r.key,
            CanonicalRecord::OpenInterest(r) => &r.key,
            CanonicalRecord::Liquidation(r) => &r.key,
            CanonicalRecord::Lsr(r) => &r.key,
            CanonicalRecord::Vol(r) => &r.key,
            CanonicalRecord::BookSnapshot(r) => &r.key,
            CanonicalRecord::BookDelta(r) => &r.key,
        }
    }

    /// The `record_type` segment of the subject (§4.5).
    pub fn record_type(&self) -> &'static str {
        match self {
            CanonicalRecord::Trade(_) => "trade",
            CanonicalRecord::Ticker(_) => "ticker",
            CanonicalRecord::Funding(_) => "funding",
            CanonicalRecord::OpenInterest(_) => "oi",
            CanonicalRecord::Liquidation(_) => "liquidation",
            CanonicalRecord::Lsr(_) => "lsr",
            CanonicalRecord::Vol(_) => "vol",
            CanonicalRecord::BookSnapshot(_) => "book_snapshot",
            CanonicalRecord::BookDelta(_) => "book_delta",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book(bid: Decimal, ask: Decimal) -> OrderBook {
        OrderBook {
            key: InstrumentKey::new(Exchange::Binance, MarketType::Spot, "BTC/USDT"),
            last_update_id: 1,
            bids: vec![PriceLevel {
                price: bid,
                quantity: dec!(1),
            }],
            asks: vec![PriceLevel {
                price: ask,
                quantity: dec!(1),
            }],
            snapshot_time: Utc::now(),
        }
    }

    #[test]
    fn detects_crossed_book() {
        assert!(!book(dec!(100), dec!(101)).is_crossed());
        assert!(book(dec!(101), dec!(100)).is_crossed());
        assert!(book(dec!(100), dec!(100)).is_crossed());
    }

    #[test]
    fn mid_and_spread() {
        let b = book(dec!(100), dec!(102));
        assert_eq!(b.mid(), Some(dec!(101)));
        assert_eq!(b.spread(), Some(dec!(2)));
    }

    #[test]
    fn instrument_key_display_matches_bus_key_scheme() {
        let key = InstrumentKey::new(Exchange::Okx, MarketType::Linear, "BTC-USDT-SWAP");
        assert_eq!(key.to_string(), "okx/linear/BTC-USDT-SWAP");
    }
}
