//! Typed raw events (§9 design note: "tagged sum types" replace the dynamic
//! typing exchanges' own SDKs tend to use). Each variant below carries the
//! wire-native field names/types for one exchange; [`crate::normalize`]
//! adapters convert these into the canonical schema in [`crate::model`].
//! [`crate::wire::WireAdapter::events`] yields these; [`crate::orderbook`]
//! only ever sees the `Depth` family.

use chrono::{DateTime, Utc};

use crate::model::PriceLevel;

/// Top-level raw event emitted by any [`crate::wire::WireAdapter`].
#[derive(Debug, Clone)]
pub enum RawEvent {
    Trade(RawTrade),
    Ticker(RawTicker),
    Depth(RawDepthEvent),
    Funding(RawFunding),
    OpenInterest(RawOpenInterest),
    Liquidation(RawLiquidation),
    Lsr(RawLsr),
    Vol(RawVol),
}

#[derive(Debug, Clone)]
pub enum RawTrade {
    Binance {
        symbol: String,
        trade_id: i64,
        price: String,
        quantity: String,
        trade_time_ms: i64,
        is_buyer_maker: bool,
    },
    Okx {
        inst_id: String,
        trade_id: String,
        price: String,
        size: String,
        side: String,
        ts_ms: i64,
    },
    Deribit {
        instrument_name: String,
        trade_id: String,
        price: f64,
        amount: f64,
        direction: String,
        timestamp_ms: i64,
    },
}

#[derive(Debug, Clone)]
pub enum RawTicker {
    Binance {
        symbol: String,
        best_bid: String,
        best_ask: String,
        last_price: String,
        volume_24h: String,
        quote_volume_24h: String,
        price_change_24h: String,
        price_change_pct_24h: String,
        high_24h: String,
        low_24h: String,
        event_time_ms: Option<i64>,
    },
    Okx {
        inst_id: String,
        last: String,
        vol_24h: String,
        vol_ccy_24h: String,
        high_24h: String,
        low_24h: String,
        open_24h: String,
        ts_ms: i64,
    },
    Deribit {
        instrument_name: String,
        last_price: f64,
        stats_volume: f64,
        stats_high: f64,
        stats_low: f64,
        stats_price_change: Option<f64>,
        timestamp_ms: i64,
    },
}

/// Frame kind for exchanges (OKX, Deribit) that distinguish a full replace
/// from an incremental change at the wire level (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthFrameKind {
    Snapshot,
    Update,
}

#[derive(Debug, Clone)]
pub enum RawDepthEvent {
    /// Binance never frames a WS snapshot; `first_update_id`/`last_update_id`
    /// are `U`/`u` from the wire.
    Binance {
        symbol: String,
        first_update_id: i64,
        last_update_id: i64,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        event_time_ms: i64,
    },
    Okx {
        inst_id: String,
        kind: DepthFrameKind,
        seq_id: i64,
        prev_seq_id: i64,
        checksum: Option<i32>,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        ts_ms: i64,
    },
    Deribit {
        instrument_name: String,
        kind: DepthFrameKind,
        change_id: i64,
        prev_change_id: Option<i64>,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        timestamp_ms: i64,
    },
}

#[derive(Debug, Clone)]
pub enum RawFunding {
    Binance {
        symbol: String,
        last_funding_rate: String,
        next_funding_time_ms: i64,
        mark_price: String,
        index_price: String,
        event_time_ms: i64,
    },
    Okx {
        inst_id: String,
        funding_rate: String,
        next_funding_time_ms: i64,
        ts_ms: i64,
    },
    Deribit {
        instrument_name: String,
        current_funding: f64,
        mark_price: f64,
        index_price: f64,
        timestamp_ms: i64,
    },
}

#[derive(Debug, Clone)]
pub enum RawOpenInterest {
    Binance {
        symbol: String,
        open_interest: String,
        event_time_ms: i64,
    },
    Okx {
        inst_id: String,
        oi: String,
        oi_ccy: String,
        ts_ms: i64,
    },
    Deribit {
        instrument_name: String,
        open_interest: f64,
        timestamp_ms: i64,
    },
}

#[derive(Debug, Clone)]
pub enum RawLiquidation {
    Binance {
        symbol: String,
        side: String,
        price: String,
        quantity: String,
        event_time_ms: i64,
    },
    Okx {
        inst_id: String,
        side: String,
        bk_px: String,
        sz: String,
        ts_ms: i64,
    },
    Deribit {
        instrument_name: String,
        direction: String,
        price: f64,
        amount: f64,
        timestamp_ms: i64,
    },
}

#[derive(Debug, Clone)]
pub enum RawLsr {
    Binance {
        symbol: String,
        period: String,
        long_account: String,
        short_account: String,
        is_top_position: bool,
        timestamp_ms: i64,
    },
    Okx {
        inst_id: String,
        period: String,
        long_short_ratio: String,
        ts_ms: i64,
    },
}

#[derive(Debug, Clone)]
pub enum RawVol {
    Deribit {
        currency: String,
        index_value: f64,
        timestamp_ms: i64,
    },
}

/// REST depth snapshot, common shape across exchanges once decoded (§4.2
/// `fetch_snapshot`).
#[derive(Debug, Clone)]
pub struct RestSnapshot {
    pub last_update_id: i64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub snapshot_time: DateTime<Utc>,
}

// Native-symbol accessors: the Supervisor's dispatch loop routes every raw
// event to the (exchange, canonical symbol) it belongs to before it can
// look up a normalizer or `OrderBookManager`; these centralize the
// per-variant field access so the dispatch loop does not need to
// `match`/`unreachable!` on exchange itself.

impl RawEvent {
    pub fn native_symbol(&self) -> &str {
        match self {
            RawEvent::Trade(r) => r.native_symbol(),
            RawEvent::Ticker(r) => r.native_symbol(),
            RawEvent::Depth(r) => r.native_symbol(),
            RawEvent::Funding(r) => r.native_symbol(),
            RawEvent::OpenInterest(r) => r.native_symbol(),
            RawEvent::Liquidation(r) => r.native_symbol(),
            RawEvent::Lsr(r) => r.native_symbol(),
            RawEvent::Vol(r) => r.native_symbol(),
        }
    }
}

impl RawTrade {
    pub fn native_symbol(&self) -> &str {
        match self {
            RawTrade::Binance { symbol, .. } => symbol,
            RawTrade::Okx { inst_id, .. } => inst_id,
            RawTrade::Deribit { instrument_name, .. } => instrument_name,
        }
    }
}

impl RawTicker {
    pub fn native_symbol(&self) -> &str {
        match self {
            RawTicker::Binance { symbol, .. } => symbol,
            RawTicker::Okx { inst_id, .. } => inst_id,
            RawTicker::Deribit { instrument_name, .. } => instrument_name,
        }
    }
}

impl RawDepthEvent {
    pub fn native_symbol(&self) -> &str {
        match self {
            RawDepthEvent::Binance { symbol, .. } => symbol,
            RawDepthEvent::Okx { inst_id, .. } => inst_id,
            RawDepthEvent::Deribit { instrument_name, .. } => instrument_name,
        }
    }
}

impl RawFunding {
    pub fn native_symbol(&self) -> &str {
        match self {
            RawFunding::Binance { symbol, .. } => symbol,
            RawFunding::Okx { inst_id, .. } => inst_id,
            RawFunding::Deribit { instrument_name, .. } => instrument_name,
        }
    }
}

impl RawOpenInterest {
    pub fn native_symbol(&self) -> &str {
        match self {
            RawOpenInterest::Binance { symbol, .. } => symbol,
            RawOpenInterest::Okx { inst_id, .. } => inst_id,
            RawOpenInterest::Deribit { instrument_name, .. } => instrument_name,
        }
    }
}

impl RawLiquidation {
    pub fn native_symbol(&self) -> &str {
        match self {
            RawLiquidation::Binance { symbol, .. } => symbol,
            RawLiquidation::Okx { inst_id, .. } => inst_id,
            RawLiquidation::Deribit { instrument_name, .. } => instrument_name,
        }
    }
}

impl RawLsr {
    pub fn native_symbol(&self) -> &str {
        match self {
            RawLsr::Binance { symbol, .. } => symbol,
            RawLsr::Okx { inst_id, .. } => inst_id,
        }
    }
}

impl RawVol {
    pub fn native_symbol(&self) -> &str {
        match self {
            RawVol::Deribit { currency, .. } => currency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_symbol_accessors_cover_every_variant() {
        let trade = RawTrade::Okx {
            inst_id: "BTC-USDT".into(),
            trade_id: "1".into(),
            price: "1".into(),
            size: "1".into(),
            side: "buy".into(),
            ts_ms: 0,
        };
        assert_eq!(trade.native_symbol(), "BTC-USDT");
        assert_eq!(RawEvent::Trade(trade).native_symbol(), "BTC-USDT");
    }
}
