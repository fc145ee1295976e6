//! Binance raw-to-canonical mapping (§4.3, §8 Scenario D).
//!
//! `isBuyerMaker=true` means the resting (maker) order was a buy, so the
//! trade's taker side — the canonical `side` field — is `sell`.

use chrono::{DateTime, Utc};

use crate::decimal::quote_quantity;
use crate::model::{
    Exchange, LSRSample, LSRVariant, MarketType, NormalizedFundingRate, NormalizedLiquidation,
    NormalizedOpenInterest, NormalizedTicker, NormalizedTrade, Side,
};
use crate::symbol::SymbolRegistry;
use crate::wire::raw::{RawFunding, RawLiquidation, RawLsr, RawOpenInterest, RawTicker, RawTrade};

use super::{canonical_key, decimal_field, event_time_ms, Result};

pub fn funding(
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &RawFunding,
    ingest_time: DateTime<Utc>,
) -> Result<NormalizedFundingRate> {
    let RawFunding::Binance {
        symbol,
        last_funding_rate,
        next_funding_time_ms,
        mark_price,
        index_price,
        event_time_ms: ms,
    } = raw
    else {
        unreachable!("normalize::binance::funding only receives Binance raw funding");
    };

    let key = canonical_key(registry, Exchange::Binance, market_type, symbol)?;
    let (event_time, _source) = event_time_ms(Some(*ms), ingest_time);
    let (next_funding_time, _) = event_time_ms(Some(*next_funding_time_ms), ingest_time);

    Ok(NormalizedFundingRate {
        key,
        funding_rate: decimal_field(Exchange::Binance, "last_funding_rate", last_funding_rate)?,
        next_funding_time,
        mark_price: decimal_field(Exchange::Binance, "mark_price", mark_price)?,
        index_price: decimal_field(Exchange::Binance, "index_price", index_price)?,
        event_time,
        ingest_time,
    })
}

pub fn trade(
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &RawTrade,
    ingest_time: DateTime<Utc>,
) -> Result<NormalizedTrade> {
    let RawTrade::Binance {
        symbol,
        trade_id,
        price,
        quantity,
        trade_time_ms,
        is_buyer_maker,
    } = raw
    else {
        unreachable!("normalize::binance::trade only receives Binance raw trades");
    };

    let key = canonical_key(registry, Exchange::Binance, market_type, symbol)?;
    let price = decimal_field(Exchange::Binance, "price", price)?;
    let quantity = decimal_field(Exchange::Binance, "quantity", quantity)?;
    let (trade_time, time_source) = event_time_ms(Some(*trade_time_ms), ingest_time);

    Ok(NormalizedTrade {
        key,
        trade_id: Some(trade_id.to_string()),
        price,
        quantity,
        quote_quantity: quote_quantity(price, quantity),
        // isBuyerMaker=true => the maker was the buyer => taker side is sell.
        side: if *is_buyer_maker { Side::Sell } else { Side::Buy },
        is_buyer_maker: *is_buyer_maker,
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
    let RawTicker::Binance {
        symbol,
        last_price,
        volume_24h,
        quote_volume_24h,
        price_change_24h,
        price_change_pct_24h,
        high_24h,
        low_24h,
        event_time_ms: ms,
    } = raw
    else {
        unreachable!("normalize::binance::ticker only receives Binance raw tickers");
    };

    let key = canonical_key(registry, Exchange::Binance, market_type, symbol)?;
    let (event_time, time_source) = event_time_ms(*ms, ingest_time);

    Ok(NormalizedTicker {
        key,
        last_price: decimal_field(Exchange::Binance, "last_price", last_price)?,
        volume_24h: decimal_field(Exchange::Binance, "volume_24h", volume_24h)?,
        quote_volume_24h: decimal_field(Exchange::Binance, "quote_volume_24h", quote_volume_24h)?,
        price_change_24h: decimal_field(Exchange::Binance, "price_change_24h", price_change_24h)?,
        price_change_pct_24h: decimal_field(
            Exchange::Binance,
            "price_change_pct_24h",
            price_change_pct_24h,
        )?,
        high_24h: decimal_field(Exchange::Binance, "high_24h", high_24h)?,
        low_24h: decimal_field(Exchange::Binance, "low_24h", low_24h)?,
        event_time,
        ingest_time,
        time_source,
    })
}

pub fn open_interest(
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &RawOpenInterest,
    ingest_time: DateTime<Utc>,
) -> Result<NormalizedOpenInterest> {
    let RawOpenInterest::Binance {
        symbol,
        open_interest,
        event_time_ms: ms,
    } = raw
    else {
        unreachable!("normalize::binance::open_interest only receives Binance raw OI");
    };

    let key = canonical_key(registry, Exchange::Binance, market_type, symbol)?;
    let (event_time, _source) = event_time_ms(Some(*ms), ingest_time);
    let open_interest = decimal_field(Exchange::Binance, "open_interest", open_interest)?;

    Ok(NormalizedOpenInterest {
        key,
        open_interest,
        // Binance's OI stream reports contracts, not notional; value is
        // left at the raw contract count until a mark-price join is wired
        // up by the Supervisor's polled job (out of scope for this adapter).
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
    let RawLiquidation::Binance {
        symbol,
        side,
        price,
        quantity,
        event_time_ms: ms,
    } = raw
    else {
        unreachable!("normalize::binance::liquidation only receives Binance raw liquidations");
    };

    let key = canonical_key(registry, Exchange::Binance, market_type, symbol)?;
    let (event_time, _source) = event_time_ms(Some(*ms), ingest_time);

    Ok(NormalizedLiquidation {
        key,
        side: if side.eq_ignore_ascii_case("sell") {
            Side::Sell
        } else {
            Side::Buy
        },
        price: decimal_field(Exchange::Binance, "price", price)?,
        quantity: decimal_field(Exchange::Binance, "quantity", quantity)?,
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
    let RawLsr::Binance {
        symbol,
        period,
        long_account,
        short_account,
        is_top_position,
        timestamp_ms,
    } = raw
    else {
        unreachable!("normalize::binance::lsr only receives Binance raw LSR samples");
    };

    let key = canonical_key(registry, Exchange::Binance, market_type, symbol)?;
    let (event_time, _source) = event_time_ms(Some(*timestamp_ms), ingest_time);

    Ok(LSRSample {
        key,
        period: period.clone(),
        long_ratio: decimal_field(Exchange::Binance, "long_account", long_account)?,
        short_ratio: decimal_field(Exchange::Binance, "short_account", short_account)?,
        variant: if *is_top_position {
            LSRVariant::TopPositions
        } else {
            LSRVariant::AllAccounts
        },
        event_time,
        ingest_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;
    use chrono::TimeZone;

    fn registry() -> SymbolRegistry {
        let mut r = SymbolRegistry::default();
        r.insert(
            Exchange::Binance,
            SymbolTable::builder()
                .insert("BTCUSDT", "BTC/USDT")
                .build()
                .unwrap(),
        );
        r
    }

    #[test]
    fn scenario_d_trade_normalization() {
        let raw = RawTrade::Binance {
            symbol: "BTCUSDT".into(),
            trade_id: 987654321,
            price: "30000.10000000".into(),
            quantity: "0.12500000".into(),
            trade_time_ms: 1732518000123,
            is_buyer_maker: true,
        };
        let out = trade(&registry(), MarketType::Spot, &raw, Utc::now()).unwrap();

        assert_eq!(out.key.symbol, "BTC/USDT");
        assert_eq!(out.trade_id.as_deref(), Some("987654321"));
        assert_eq!(out.price.to_string(), "30000.10000000");
        assert_eq!(out.quantity.to_string(), "0.12500000");
        assert_eq!(out.quote_quantity.to_string(), "3750.01250000");
        assert_eq!(out.side, Side::Sell);
        assert!(out.is_buyer_maker);
        assert_eq!(
            out.trade_time,
            Utc.timestamp_millis_opt(1732518000123).unwrap()
        );
    }

    #[test]
    fn buyer_maker_false_means_taker_side_buy() {
        let raw = RawTrade::Binance {
            symbol: "BTCUSDT".into(),
            trade_id: 1,
            price: "1".into(),
            quantity: "1".into(),
            trade_time_ms: 0,
            is_buyer_maker: false,
        };
        let out = trade(&registry(), MarketType::Spot, &raw, Utc::now()).unwrap();
        assert_eq!(out.side, Side::Buy);
    }

    #[test]
    fn funding_carries_mark_and_index_price() {
        let raw = RawFunding::Binance {
            symbol: "BTCUSDT".into(),
            last_funding_rate: "0.00010000".into(),
            next_funding_time_ms: 1732546800000,
            mark_price: "30010.5".into(),
            index_price: "30009.1".into(),
            event_time_ms: 1732518000123,
        };
        let out = funding(&registry(), MarketType::Linear, &raw, Utc::now()).unwrap();
        assert_eq!(out.funding_rate.to_string(), "0.00010000");
        assert_eq!(out.mark_price.to_string(), "30010.5");
        assert_eq!(out.index_price.to_string(), "30009.1");
    }
}
