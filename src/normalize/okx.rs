//! OKX raw-to-canonical mapping (§4.3).
//!
//! OKX's `side` field on a trade is already the taker side, so canonical
//! `side` is a direct copy; `is_buyer_maker` is derived (the resting order
//! sat on the opposite side of the taker).

use chrono::{DateTime, Utc};

use crate::decimal::quote_quantity;
use crate::model::{
    Exchange, LSRSample, LSRVariant, MarketType, NormalizedFundingRate, NormalizedLiquidation,
    NormalizedOpenInterest, NormalizedTicker, NormalizedTrade, Side,
};
use crate::symbol::SymbolRegistry;
use crate::wire::raw::{RawFunding, RawLiquidation, RawLsr, RawOpenInterest, RawTicker, RawTrade};

use super::{canonical_key, decimal_field, event_time_ms, Result};

fn side_from_str(exchange: Exchange, field: &'static str, raw: &str) -> Result<Side> {
    match raw {
        "buy" => Ok(Side::Buy),
        "sell" => Ok(Side::Sell),
        other => Err(super::Error::DecodeError {
            exchange,
            field,
            reason: format!("unexpected side {other:?}"),
        }),
    }
}

pub fn trade(
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &RawTrade,
    ingest_time: DateTime<Utc>,
) -> Result<NormalizedTrade> {
    let RawTrade::Okx {
        inst_id,
        trade_id,
        price,
        size,
        side,
        ts_ms,
    } = raw
    else {
        unreachable!("normalize::okx::trade only receives OKX raw trades");
    };

    let key = canonical_key(registry, Exchange::Okx, market_type, inst_id)?;
    let price = decimal_field(Exchange::Okx, "price", price)?;
    let quantity = decimal_field(Exchange::Okx, "size", size)?;
    let taker_side = side_from_str(Exchange::Okx, "side", side)?;
    let (trade_time, time_source) = event_time_ms(Some(*ts_ms), ingest_time);

    Ok(NormalizedTrade {
        key,
        trade_id: Some(trade_id.clone()),
        price,
        quantity,
        quote_quantity: quote_quantity(price, quantity),
        side: taker_side,
        is_buyer_maker: taker_side == Side::Sell,
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
    let RawTicker::Okx {
        inst_id,
        last,
        vol_24h,
        vol_ccy_24h,
        high_24h,
        low_24h,
        open_24h,
        ts_ms,
    } = raw
    else {
        unreachable!("normalize::okx::ticker only receives OKX raw tickers");
    };

    let key = canonical_key(registry, Exchange::Okx, market_type, inst_id)?;
    let (event_time, time_source) = event_time_ms(Some(*ts_ms), ingest_time);
    let last_price = decimal_field(Exchange::Okx, "last", last)?;
    let open_24h = decimal_field(Exchange::Okx, "open_24h", open_24h)?;
    let price_change_24h = last_price - open_24h;
    let price_change_pct_24h = if open_24h.is_zero() {
        rust_decimal::Decimal::ZERO
    } else {
        crate::decimal::round_scale(price_change_24h / open_24h * rust_decimal::Decimal::ONE_HUNDRED)
    };

    Ok(NormalizedTicker {
        key,
        last_price,
        volume_24h: decimal_field(Exchange::Okx, "vol_24h", vol_24h)?,
        quote_volume_24h: decimal_field(Exchange::Okx, "vol_ccy_24h", vol_ccy_24h)?,
        price_change_24h,
        price_change_pct_24h,
        high_24h: decimal_field(Exchange::Okx, "high_24h", high_24h)?,
        low_24h: decimal_field(Exchange::Okx, "low_24h", low_24h)?,
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
    let RawFunding::Okx {
        inst_id,
        funding_rate,
        next_funding_time_ms,
        ts_ms,
    } = raw
    else {
        unreachable!("normalize::okx::funding only receives OKX raw funding");
    };

    let key = canonical_key(registry, Exchange::Okx, market_type, inst_id)?;
    let (event_time, _source) = event_time_ms(Some(*ts_ms), ingest_time);
    let (next_funding_time, _) = event_time_ms(Some(*next_funding_time_ms), ingest_time);

    Ok(NormalizedFundingRate {
        key,
        funding_rate: decimal_field(Exchange::Okx, "funding_rate", funding_rate)?,
        next_funding_time,
        // OKX's funding-rate channel does not carry mark/index price; those
        // arrive on the separate `mark-price` channel and are joined by the
        // Supervisor's polled job, out of scope for this pure mapping.
        mark_price: rust_decimal::Decimal::ZERO,
        index_price: rust_decimal::Decimal::ZERO,
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
    let RawOpenInterest::Okx {
        inst_id,
        oi,
        oi_ccy,
        ts_ms,
    } = raw
    else {
        unreachable!("normalize::okx::open_interest only receives OKX raw OI");
    };

    let key = canonical_key(registry, Exchange::Okx, market_type, inst_id)?;
    let (event_time, _source) = event_time_ms(Some(*ts_ms), ingest_time);

    Ok(NormalizedOpenInterest {
        key,
        open_interest: decimal_field(Exchange::Okx, "oi", oi)?,
        open_interest_value: decimal_field(Exchange::Okx, "oi_ccy", oi_ccy)?,
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
    let RawLiquidation::Okx {
        inst_id,
        side,
        bk_px,
        sz,
        ts_ms,
    } = raw
    else {
        unreachable!("normalize::okx::liquidation only receives OKX raw liquidations");
    };

    let key = canonical_key(registry, Exchange::Okx, market_type, inst_id)?;
    let (event_time, _source) = event_time_ms(Some(*ts_ms), ingest_time);

    Ok(NormalizedLiquidation {
        key,
        side: side_from_str(Exchange::Okx, "side", side)?,
        price: decimal_field(Exchange::Okx, "bk_px", bk_px)?,
        quantity: decimal_field(Exchange::Okx, "sz", sz)?,
        event_time,
        ingest_time,
    })
}

pub fn lsr(
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &RawLsr,
    ingest_time: DateTime<Utc>,
) -> Result<LSRSample> {
    let RawLsr::Okx {
        inst_id,
        period,
        long_short_ratio,
        ts_ms,
    } = raw
    else {
        unreachable!("normalize::okx::lsr only receives OKX raw LSR samples");
    };

    let key = canonical_key(registry, Exchange::Okx, market_type, inst_id)?;
    let (event_time, _source) = event_time_ms(Some(*ts_ms), ingest_time);
    let ratio = decimal_field(Exchange::Okx, "long_short_ratio", long_short_ratio)?;
    // OKX publishes a single long/short ratio; decompose into the
    // canonical pair so the invariant `long_ratio + short_ratio ~= 1` (§3)
    // holds: long = ratio / (1 + ratio), short = 1 / (1 + ratio).
    let one = rust_decimal::Decimal::ONE;
    let denom = one + ratio;
    let (long_ratio, short_ratio) = if denom.is_zero() {
        (rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO)
    } else {
        (
            crate::decimal::round_scale(ratio / denom),
            crate::decimal::round_scale(one / denom),
        )
    };

    Ok(LSRSample {
        key,
        period: period.clone(),
        long_ratio,
        short_ratio,
        // OKX's long/short ratio endpoint does not distinguish top-position
        // accounts from all accounts (§3 `variant`); this field defaults to
        // `all_accounts` for this exchange.
        variant: LSRVariant::AllAccounts,
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
            Exchange::Okx,
            SymbolTable::builder()
                .insert("BTC-USDT", "BTC/USDT")
                .build()
                .unwrap(),
        );
        r
    }

    #[test]
    fn taker_side_is_copied_directly_and_maker_is_derived() {
        let raw = RawTrade::Okx {
            inst_id: "BTC-USDT".into(),
            trade_id: "1".into(),
            price: "100".into(),
            size: "1".into(),
            side: "buy".into(),
            ts_ms: 0,
        };
        let out = trade(&registry(), MarketType::Spot, &raw, Utc::now()).unwrap();
        assert_eq!(out.side, Side::Buy);
        assert!(!out.is_buyer_maker);
    }

    #[test]
    fn liquidation_side_reflects_forced_side() {
        let raw = RawLiquidation::Okx {
            inst_id: "BTC-USDT".into(),
            side: "sell".into(),
            bk_px: "29000".into(),
            sz: "2".into(),
            ts_ms: 0,
        };
        let out = liquidation(&registry(), MarketType::Linear, &raw, Utc::now()).unwrap();
        assert_eq!(out.side, Side::Sell);
        assert_eq!(out.price.to_string(), "29000");
    }

    #[test]
    fn long_short_ratio_decomposition_sums_to_one() {
        let raw = RawLsr::Okx {
            inst_id: "BTC-USDT".into(),
            period: "5m".into(),
            long_short_ratio: "1.5".into(),
            ts_ms: 0,
        };
        let out = lsr(&registry(), MarketType::Linear, &raw, Utc::now()).unwrap();
        let sum = out.long_ratio + out.short_ratio;
        assert!((sum - rust_decimal::Decimal::ONE).abs() < rust_decimal::Decimal::new(1, 6));
    }
}
