//! Deribit raw-to-canonical mapping (§4.3).
//!
//! `direction=buy` means the taker bought, so canonical `side=buy` and
//! `is_buyer_maker=false`; numeric fields arrive as `f64` on the wire rather
//! than strings, so they're routed through `Decimal::try_from` instead of
//! `decimal_field`'s string parser.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::decimal::quote_quantity;
use crate::model::{
    Exchange, MarketType, NormalizedFundingRate, NormalizedLiquidation, NormalizedOpenInterest,
    NormalizedTicker, NormalizedTrade, Side, VolatilityIndex,
};
use crate::symbol::SymbolRegistry;
use crate::wire::raw::{RawFunding, RawLiquidation, RawOpenInterest, RawTicker, RawTrade, RawVol};

use super::{canonical_key, event_time_ms, Result};

fn decimal_from_f64(exchange: Exchange, field: &'static str, value: f64) -> Result<Decimal> {
    Decimal::try_from(value).map_err(|e| super::Error::DecodeError {
        exchange,
        field,
        reason: format!("{e}"),
    })
}

pub fn trade(
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &RawTrade,
    ingest_time: DateTime<Utc>,
) -> Result<NormalizedTrade> {
    let RawTrade::Deribit {
        instrument_name,
        trade_id,
        price,
        amount,
        direction,
        timestamp_ms,
    } = raw
    else {
        unreachable!("normalize::deribit::trade only receives Deribit raw trades");
    };

    let key = canonical_key(registry, Exchange::Deribit, market_type, instrument_name)?;
    let price = decimal_from_f64(Exchange::Deribit, "price", *price)?;
    let quantity = decimal_from_f64(Exchange::Deribit, "amount", *amount)?;
    let taker_is_buy = direction.eq_ignore_ascii_case("buy");
    let (trade_time, time_source) = event_time_ms(Some(*timestamp_ms), ingest_time);

    Ok(NormalizedTrade {
        key,
        trade_id: Some(trade_id.clone()),
        price,
        quantity,
        quote_quantity: quote_quantity(price, quantity),
        side: if taker_is_buy { Side::Buy } else { Side::Sell },
        is_buyer_maker: !taker_is_buy,
        trade_time,
        ingest_time,
        time_source,
    })
}

pub fn ticker(
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &RawTicker,
    ingest_time: DateTime<Utc>,
) -> Result<NormalizedTicker> {
    let RawTicker::Deribit {
        instrument_name,
        last_price,
        stats_volume,
        stats_high,
        stats_low,
        stats_price_change,
        timestamp_ms,
    } = raw
    else {
        unreachable!("normalize::deribit::ticker only receives Deribit raw tickers");
    };

    let key = canonical_key(registry, Exchange::Deribit, market_type, instrument_name)?;
    let (event_time, time_source) = event_time_ms(Some(*timestamp_ms), ingest_time);
    let last_price = decimal_from_f64(Exchange::Deribit, "last_price", *last_price)?;
    let price_change_pct_24h = match stats_price_change {
        Some(pct) => decimal_from_f64(Exchange::Deribit, "stats_price_change", *pct)?,
        None => Decimal::ZERO,
    };
    let price_change_24h = crate::decimal::round_scale(
        last_price * price_change_pct_24h / Decimal::ONE_HUNDRED,
    );

    Ok(NormalizedTicker {
        key,
        last_price,
        volume_24h: decimal_from_f64(Exchange::Deribit, "stats_volume", *stats_volume)?,
        // Deribit's ticker stats block does not carry a separate quote-
        // denominated 24h volume for options/perpetuals priced in the base
        // currency; quote volume mirrors base volume for this exchange.
        quote_volume_24h: decimal_from_f64(Exchange::Deribit, "stats_volume", *stats_volume)?,
        price_change_24h,
        price_change_pct_24h,
        high_24h: decimal_from_f64(Exchange::Deribit, "stats_high", *stats_high)?,
        low_24h: decimal_from_f64(Exchange::Deribit, "stats_low", *stats_low)?,
        event_time,
        ingest_time,
        time_source,
    })
}

pub fn funding(
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &RawFunding,
    ingest_time: DateTime<Utc>,
) -> Result<NormalizedFundingRate> {
    let RawFunding::Deribit {
        instrument_name,
        current_funding,
        mark_price,
        index_price,
        timestamp_ms,
    } = raw
    else {
        unreachable!("normalize::deribit::funding only receives Deribit raw funding");
    };

    let key = canonical_key(registry, Exchange::Deribit, market_type, instrument_name)?;
    let (event_time, _source) = event_time_ms(Some(*timestamp_ms), ingest_time);

    Ok(NormalizedFundingRate {
        key,
        funding_rate: decimal_from_f64(Exchange::Deribit, "current_funding", *current_funding)?,
        // Deribit settles funding hourly rather than advertising a single
        // upcoming timestamp on this message; the Supervisor's funding-poll
        // cadence (§6 `schedules.funding`) is authoritative for the next
        // funding boundary, so this field echoes the event time.
        next_funding_time: event_time,
        mark_price: decimal_from_f64(Exchange::Deribit, "mark_price", *mark_price)?,
        index_price: decimal_from_f64(Exchange::Deribit, "index_price", *index_price)?,
        event_time,
        ingest_time,
    })
}

pub fn open_interest(
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &RawOpenInterest,
    ingest_time: DateTime<Utc>,
) -> Result<NormalizedOpenInterest> {
    let RawOpenInterest::Deribit {
        instrument_name,
        open_interest,
        timestamp_ms,
    } = raw
    else {
        unreachable!("normalize::deribit::open_interest only receives Deribit raw OI");
    };

    let key = canonical_key(registry, Exchange::Deribit, market_type, instrument_name)?;
    let (event_time, _source) = event_time_ms(Some(*timestamp_ms), ingest_time);
    let open_interest = decimal_from_f64(Exchange::Deribit, "open_interest", *open_interest)?;

    Ok(NormalizedOpenInterest {
        key,
        open_interest,
        open_interest_value: open_interest,
        event_time,
        ingest_time,
    })
}

pub fn liquidation(
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &RawLiquidation,
    ingest_time: DateTime<Utc>,
) -> Result<NormalizedLiquidation> {
    let RawLiquidation::Deribit {
        instrument_name,
        direction,
        price,
        amount,
        timestamp_ms,
    } = raw
    else {
        unreachable!("normalize::deribit::liquidation only receives Deribit raw liquidations");
    };

    let key = canonical_key(registry, Exchange::Deribit, market_type, instrument_name)?;
    let (event_time, _source) = event_time_ms(Some(*timestamp_ms), ingest_time);

    Ok(NormalizedLiquidation {
        key,
        side: if direction.eq_ignore_ascii_case("sell") {
            Side::Sell
        } else {
            Side::Buy
        },
        price: decimal_from_f64(Exchange::Deribit, "price", *price)?,
        quantity: decimal_from_f64(Exchange::Deribit, "amount", *amount)?,
        event_time,
        ingest_time,
    })
}

pub fn vol(
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &RawVol,
    ingest_time: DateTime<Utc>,
) -> Result<VolatilityIndex> {
    let RawVol::Deribit {
        currency,
        index_value,
        timestamp_ms,
    } = raw;

    let key = canonical_key(registry, Exchange::Deribit, market_type, currency)?;
    let (event_time, _source) = event_time_ms(Some(*timestamp_ms), ingest_time);

    Ok(VolatilityIndex {
        key,
        index_value: decimal_from_f64(Exchange::Deribit, "index_value", *index_value)?,
        event_time,
        ingest_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    fn registry() -> SymbolRegistry {
        let mut r = SymbolRegistry::default();
        r.insert(
            Exchange::Deribit,
            SymbolTable::builder()
                .insert("BTC-PERPETUAL", "BTC-PERPETUAL")
                .build()
                .unwrap(),
        );
        r
    }

    #[test]
    fn direction_buy_is_taker_buy_and_not_buyer_maker() {
        let raw = RawTrade::Deribit {
            instrument_name: "BTC-PERPETUAL".into(),
            trade_id: "1".into(),
            price: 30000.0,
            amount: 10.0,
            direction: "buy".into(),
            timestamp_ms: 0,
        };
        let out = trade(&registry(), MarketType::Inverse, &raw, Utc::now()).unwrap();
        assert_eq!(out.side, Side::Buy);
        assert!(!out.is_buyer_maker);
    }
}
