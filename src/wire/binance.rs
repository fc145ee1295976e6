//! Binance `WireAdapter` (§4.2, §6). Single combined-stream WebSocket
//! connection per adapter instance; REST snapshots and funding/OI polling
//! hit `api.binance.com` / `fapi.binance.com` depending on market type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};

use crate::model::{Exchange, PriceLevel};
use crate::wire::raw::{RawDepthEvent, RawEvent, RawTicker, RawTrade, RestSnapshot};
use crate::wire::{DataType, Error, Result, Subscription, WireAdapter, READ_IDLE_TIMEOUT};

/// Binance responds to unsolicited pings from the server with a pong
/// containing the same payload, and expects one within 60s (§4.2); the
/// adapter answers inline as frames arrive rather than running a separate
/// timer task, since `tokio-tungstenite` surfaces `Ping` synchronously on
/// the same read loop.
const SERVER_PING_TIMEOUT: Duration = Duration::from_secs(60);

pub struct BinanceAdapter {
    ws_base: String,
    rest_base: String,
    http: reqwest::Client,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    closed: Arc<AtomicBool>,
}

impl BinanceAdapter {
    pub fn spot() -> Self {
        Self::new("wss://stream.binance.com:9443", "https://api.binance.com")
    }

    pub fn usdm_futures() -> Self {
        Self::new("wss://fstream.binance.com", "https://fapi.binance.com")
    }

    fn new(ws_base: impl Into<String>, rest_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
            rest_base: rest_base.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds with default TLS backend"),
            stream: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn stream_name(sub: &Subscription) -> String {
        let symbol = sub.native_symbol.to_lowercase();
        match sub.data_type {
            DataType::Trade => format!("{symbol}@trade"),
            DataType::Depth => format!("{symbol}@depth@100ms"),
            DataType::Ticker => format!("{symbol}@bookTicker"),
            DataType::Funding => format!("{symbol}@markPrice"),
            // Binance does not push OI/liquidation/LSR/vol over these
            // combined streams; the Supervisor polls those via REST jobs.
            DataType::OpenInterest
            | DataType::Liquidation
            | DataType::Lsr
            | DataType::Vol => format!("{symbol}@trade"),
        }
    }
}

#[async_trait]
impl WireAdapter for BinanceAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn connect(&mut self, subscriptions: &[Subscription]) -> Result<()> {
        self.closed.store(false, Ordering::SeqCst);
        let streams = subscriptions
            .iter()
            .map(Self::stream_name)
            .collect::<Vec<_>>()
            .join("/");
        let url = format!("{}/stream?streams={streams}", self.ws_base);
        let (stream, _response) = connect_async(&url).await?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn run(&mut self, tx: mpsc::Sender<RawEvent>) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::UpstreamDisconnected {
                exchange: Exchange::Binance,
            })?;

        loop {
            let next = tokio::time::timeout(READ_IDLE_TIMEOUT, stream.next()).await;
            let msg = match next {
                Ok(Some(msg)) => msg?,
                Ok(None) => {
                    return Err(Error::UpstreamDisconnected {
                        exchange: Exchange::Binance,
                    })
                }
                Err(_elapsed) => {
                    return Err(Error::UpstreamDisconnected {
                        exchange: Exchange::Binance,
                    })
                }
            };

            match msg {
                tungstenite::Message::Ping(payload) => {
                    tokio::time::timeout(
                        SERVER_PING_TIMEOUT,
                        stream.send(tungstenite::Message::Pong(payload)),
                    )
                    .await
                    .map_err(|_| Error::UpstreamDisconnected {
                        exchange: Exchange::Binance,
                    })??;
                }
                tungstenite::Message::Pong(_) | tungstenite::Message::Frame(_) => {}
                tungstenite::Message::Close(_) => {
                    return Err(Error::UpstreamDisconnected {
                        exchange: Exchange::Binance,
                    })
                }
                tungstenite::Message::Text(text) => {
                    if let Some(event) = decode_combined_frame(&text)? {
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                tungstenite::Message::Binary(_) => {}
            }
        }
    }

    async fn fetch_snapshot(&self, native_symbol: &str, depth: usize) -> Result<RestSnapshot> {
        #[derive(Deserialize)]
        struct Resp {
            #[serde(rename = "lastUpdateId")]
            last_update_id: i64,
            bids: Vec<[String; 2]>,
            asks: Vec<[String; 2]>,
        }

        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={depth}",
            self.rest_base,
            native_symbol.to_uppercase()
        );
        let resp: Resp = self.http.get(url).send().await?.json().await?;

        Ok(RestSnapshot {
            last_update_id: resp.last_update_id,
            bids: parse_levels(&resp.bids),
            asks: parse_levels(&resp.asks),
            snapshot_time: chrono::Utc::now(),
        })
    }

    async fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}

impl BinanceAdapter {
    /// REST poll for funding rate (§6 `/fapi/v1/premiumIndex`). Spot market
    /// type has no funding; the Supervisor only schedules this job for
    /// linear/inverse symbols.
    pub async fn poll_funding(&self, native_symbol: &str) -> Result<crate::wire::raw::RawFunding> {
        #[derive(Deserialize)]
        struct Resp {
            symbol: String,
            #[serde(rename = "lastFundingRate")]
            last_funding_rate: String,
            #[serde(rename = "nextFundingTime")]
            next_funding_time_ms: i64,
            #[serde(rename = "markPrice")]
            mark_price: String,
            #[serde(rename = "indexPrice")]
            index_price: String,
            time: i64,
        }
        let url = format!(
            "{}/fapi/v1/premiumIndex?symbol={}",
            self.rest_base,
            native_symbol.to_uppercase()
        );
        let resp: Resp = self.http.get(url).send().await?.json().await?;
        Ok(crate::wire::raw::RawFunding::Binance {
            symbol: resp.symbol,
            last_funding_rate: resp.last_funding_rate,
            next_funding_time_ms: resp.next_funding_time_ms,
            mark_price: resp.mark_price,
            index_price: resp.index_price,
            event_time_ms: resp.time,
        })
    }

    /// REST poll for open interest (§6, default cadence 15m). Binance does
    /// not push OI over the combined WS streams.
    pub async fn poll_open_interest(
        &self,
        native_symbol: &str,
    ) -> Result<crate::wire::raw::RawOpenInterest> {
        #[derive(Deserialize)]
        struct Resp {
            symbol: String,
            #[serde(rename = "openInterest")]
            open_interest: String,
            time: i64,
        }
        let url = format!(
            "{}/fapi/v1/openInterest?symbol={}",
            self.rest_base,
            native_symbol.to_uppercase()
        );
        let resp: Resp = self.http.get(url).send().await?.json().await?;
        Ok(crate::wire::raw::RawOpenInterest::Binance {
            symbol: resp.symbol,
            open_interest: resp.open_interest,
            event_time_ms: resp.time,
        })
    }

    /// REST poll for long/short account ratio (§6, default cadence 5m/1h).
    /// Binance has no WS stream for this metric at all.
    pub async fn poll_long_short_ratio(
        &self,
        native_symbol: &str,
    ) -> Result<crate::wire::raw::RawLsr> {
        #[derive(Deserialize)]
        struct Resp {
            symbol: String,
            #[serde(rename = "longAccount")]
            long_account: String,
            #[serde(rename = "shortAccount")]
            short_account: String,
            timestamp: i64,
        }
        let url = format!(
            "{}/futures/data/topLongShortAccountRatio?symbol={}&period=5m&limit=1",
            self.rest_base,
            native_symbol.to_uppercase()
        );
        let mut resp: Vec<Resp> = self.http.get(url).send().await?.json().await?;
        let latest = resp.pop().ok_or_else(|| Error::MalformedFrame {
            exchange: Exchange::Binance,
            reason: "empty topLongShortAccountRatio response".to_string(),
        })?;
        Ok(crate::wire::raw::RawLsr::Binance {
            symbol: latest.symbol,
            period: "5m".to_string(),
            long_account: latest.long_account,
            short_account: latest.short_account,
            is_top_position: false,
            timestamp_ms: latest.timestamp,
        })
    }
}

fn parse_levels(raw: &[[String; 2]]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|[p, q]| {
            Some(PriceLevel {
                price: p.parse().ok()?,
                quantity: q.parse().ok()?,
            })
        })
        .collect()
}

/// Binance's combined-stream envelope is `{"stream": "...", "data": {...}}`;
/// `data.e` (event type) selects which raw variant to build.
fn decode_combined_frame(text: &str) -> Result<Option<RawEvent>> {
    #[derive(Deserialize)]
    struct Envelope {
        data: serde_json::Value,
    }

    let envelope: Envelope = serde_json::from_str(text).map_err(|source| Error::Decode {
        exchange: Exchange::Binance,
        source,
    })?;
    decode_payload(&envelope.data)
}

fn decode_payload(data: &serde_json::Value) -> Result<Option<RawEvent>> {
    let event_type = data.get("e").and_then(|v| v.as_str());
    match event_type {
        Some("trade") => Ok(Some(RawEvent::Trade(decode_trade(data)?))),
        Some("depthUpdate") => Ok(Some(RawEvent::Depth(decode_depth(data)?))),
        Some("markPriceUpdate") => Ok(Some(RawEvent::Funding(decode_funding(data)?))),
        _ => {
            // bookTicker frames carry no "e" field; detect by shape.
            if data.get("u").is_some() && data.get("b").is_some() && data.get("a").is_some() {
                return Ok(Some(RawEvent::Ticker(decode_book_ticker(data)?)));
            }
            Ok(None)
        }
    }
}

fn field<'a>(data: &'a serde_json::Value, key: &'static str) -> Result<&'a serde_json::Value> {
    data.get(key).ok_or_else(|| Error::MalformedFrame {
        exchange: Exchange::Binance,
        reason: format!("missing field {key:?}"),
    })
}

fn as_str(data: &serde_json::Value, key: &'static str) -> Result<String> {
    field(data, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedFrame {
            exchange: Exchange::Binance,
            reason: format!("field {key:?} is not a string"),
        })
}

fn as_i64(data: &serde_json::Value, key: &'static str) -> Result<i64> {
    field(data, key)?
        .as_i64()
        .ok_or_else(|| Error::MalformedFrame {
            exchange: Exchange::Binance,
            reason: format!("field {key:?} is not an integer"),
        })
}

fn decode_trade(data: &serde_json::Value) -> Result<RawTrade> {
    Ok(RawTrade::Binance {
        symbol: as_str(data, "s")?,
        trade_id: as_i64(data, "t")?,
        price: as_str(data, "p")?,
        quantity: as_str(data, "q")?,
        trade_time_ms: as_i64(data, "T")?,
        is_buyer_maker: field(data, "m")?.as_bool().unwrap_or(false),
    })
}

fn decode_book_ticker(data: &serde_json::Value) -> Result<RawTicker> {
    Ok(RawTicker::Binance {
        symbol: as_str(data, "s")?,
        best_bid: as_str(data, "b")?,
        best_ask: as_str(data, "a")?,
        last_price: as_str(data, "b")?,
        volume_24h: "0".to_string(),
        quote_volume_24h: "0".to_string(),
        price_change_24h: "0".to_string(),
        price_change_pct_24h: "0".to_string(),
        high_24h: as_str(data, "a")?,
        low_24h: as_str(data, "b")?,
        event_time_ms: None,
    })
}

fn decode_depth(data: &serde_json::Value) -> Result<RawDepthEvent> {
    let levels = |key: &'static str| -> Result<Vec<PriceLevel>> {
        let raw = field(data, key)?.as_array().ok_or_else(|| Error::MalformedFrame {
            exchange: Exchange::Binance,
            reason: format!("field {key:?} is not an array"),
        })?;
        Ok(raw
            .iter()
            .filter_map(|level| {
                let pair = level.as_array()?;
                let price = pair.first()?.as_str()?.parse().ok()?;
                let quantity = pair.get(1)?.as_str()?.parse().ok()?;
                Some(PriceLevel { price, quantity })
            })
            .collect())
    };

    Ok(RawDepthEvent::Binance {
        symbol: as_str(data, "s")?,
        first_update_id: as_i64(data, "U")?,
        last_update_id: as_i64(data, "u")?,
        bids: levels("b")?,
        asks: levels("a")?,
        event_time_ms: as_i64(data, "E")?,
    })
}

fn decode_funding(data: &serde_json::Value) -> Result<crate::wire::raw::RawFunding> {
    Ok(crate::wire::raw::RawFunding::Binance {
        symbol: as_str(data, "s")?,
        last_funding_rate: as_str(data, "r")?,
        next_funding_time_ms: as_i64(data, "T")?,
        mark_price: as_str(data, "p")?,
        index_price: as_str(data, "i")?,
        event_time_ms: as_i64(data, "E")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_trade_payload() {
        let payload = serde_json::json!({
            "e": "trade", "s": "BTCUSDT", "t": 987654321,
            "p": "30000.10000000", "q": "0.12500000",
            "T": 1732518000123i64, "m": true
        });
        let event = decode_payload(&payload).unwrap().unwrap();
        assert!(matches!(event, RawEvent::Trade(RawTrade::Binance { .. })));
    }

    #[test]
    fn decodes_depth_payload_with_update_id_range() {
        let payload = serde_json::json!({
            "e": "depthUpdate", "s": "BTCUSDT", "U": 100, "u": 110,
            "b": [["30000", "1"]], "a": [["30001", "1"]], "E": 1
        });
        match decode_payload(&payload).unwrap().unwrap() {
            RawEvent::Depth(RawDepthEvent::Binance {
                first_update_id,
                last_update_id,
                ..
            }) => {
                assert_eq!(first_update_id, 100);
                assert_eq!(last_update_id, 110);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn missing_field_surfaces_malformed_frame() {
        let payload = serde_json::json!({ "e": "trade" });
        let err = decode_payload(&payload).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame { .. }));
    }
}
