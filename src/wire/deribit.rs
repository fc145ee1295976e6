//! Deribit `WireAdapter` (§4.2, §6). JSON-RPC 2.0 over one WebSocket
//! connection; liveness is maintained by periodically issuing
//! `public/test`, which Deribit also accepts as a heartbeat response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};

use crate::model::{Exchange, PriceLevel};
use crate::wire::raw::{DepthFrameKind, RawDepthEvent, RawEvent, RawTicker, RawTrade, RestSnapshot};
use crate::wire::{DataType, Error, Result, Subscription, WireAdapter, READ_IDLE_TIMEOUT};

const WS_URL: &str = "wss://www.deribit.com/ws/api/v2";
const REST_BASE: &str = "https://www.deribit.com/api/v2";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct DeribitAdapter {
    http: reqwest::Client,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    closed: Arc<AtomicBool>,
}

impl Default for DeribitAdapter {
    fn default() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds with default TLS backend"),
            stream: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

fn channel_name(sub: &Subscription) -> String {
    let instrument = &sub.native_symbol;
    match sub.data_type {
        DataType::Trade => format!("trades.{instrument}.100ms"),
        DataType::Depth => format!("book.{instrument}.100ms"),
        DataType::Ticker => format!("ticker.{instrument}.100ms"),
        DataType::Funding => format!("ticker.{instrument}.100ms"),
        DataType::Vol => format!("deribit_price_index.{instrument}"),
        DataType::OpenInterest | DataType::Liquidation | DataType::Lsr => {
            format!("ticker.{instrument}.100ms")
        }
    }
}

#[async_trait]
impl WireAdapter for DeribitAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Deribit
    }

    async fn connect(&mut self, subscriptions: &[Subscription]) -> Result<()> {
        self.closed.store(false, Ordering::SeqCst);
        let (stream, _response) = connect_async(WS_URL).await?;
        self.stream = Some(stream);

        let channels: Vec<_> = subscriptions.iter().map(channel_name).collect();
        let frame = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "public/subscribe",
            "params": { "channels": channels },
        })
        .to_string();
        self.stream
            .as_mut()
            .expect("just connected")
            .send(tungstenite::Message::Text(frame))
            .await?;
        Ok(())
    }

    async fn run(&mut self, tx: mpsc::Sender<RawEvent>) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::UpstreamDisconnected {
            exchange: Exchange::Deribit,
        })?;
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let ping = json!({
                        "jsonrpc": "2.0", "id": 0, "method": "public/test", "params": {}
                    }).to_string();
                    stream.send(tungstenite::Message::Text(ping)).await?;
                }
                next = tokio::time::timeout(READ_IDLE_TIMEOUT, stream.next()) => {
                    let msg = match next {
                        Ok(Some(msg)) => msg?,
                        Ok(None) => return Err(Error::UpstreamDisconnected { exchange: Exchange::Deribit }),
                        Err(_elapsed) => return Err(Error::UpstreamDisconnected { exchange: Exchange::Deribit }),
                    };

                    match msg {
                        tungstenite::Message::Text(text) => {
                            for event in decode_frame(&text)? {
                                if tx.send(event).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        tungstenite::Message::Close(_) => {
                            return Err(Error::UpstreamDisconnected { exchange: Exchange::Deribit })
                        }
                        tungstenite::Message::Ping(payload) => {
                            stream.send(tungstenite::Message::Pong(payload)).await?;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn fetch_snapshot(&self, native_symbol: &str, depth: usize) -> Result<RestSnapshot> {
        #[derive(Deserialize)]
        struct Result_ {
            change_id: i64,
            bids: Vec<[serde_json::Value; 2]>,
            asks: Vec<[serde_json::Value; 2]>,
        }
        #[derive(Deserialize)]
        struct Resp {
            result: Result_,
        }

        let url = format!(
            "{REST_BASE}/public/get_order_book?instrument_name={native_symbol}&depth={depth}"
        );
        let resp: Resp = self.http.get(url).send().await?.json().await?;

        let parse = |rows: &[[serde_json::Value; 2]]| -> Vec<PriceLevel> {
            rows.iter()
                .filter_map(|[p, q]| {
                    Some(PriceLevel {
                        price: parse_number(p)?,
                        quantity: parse_number(q)?,
                    })
                })
                .collect()
        };

        Ok(RestSnapshot {
            last_update_id: resp.result.change_id,
            bids: parse(&resp.result.bids),
            asks: parse(&resp.result.asks),
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

fn parse_number(value: &serde_json::Value) -> Option<rust_decimal::Decimal> {
    if let Some(f) = value.as_f64() {
        return rust_decimal::Decimal::try_from(f).ok();
    }
    value.as_str()?.parse().ok()
}

/// Deribit batches every trade fill for one message into `params.data`'s
/// array (a `trades.<instrument>.<interval>` push routinely carries more
/// than one), so every row is decoded and forwarded — dropping anything
/// but the first would silently violate the at-least-once delivery
/// contract (spec.md §7) for trades.
fn decode_frame(text: &str) -> Result<Vec<RawEvent>> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|source| Error::Decode {
        exchange: Exchange::Deribit,
        source,
    })?;

    let Some(params) = value.get("params") else {
        return Ok(vec![]);
    };
    let channel = params.get("channel").and_then(|v| v.as_str()).unwrap_or_default();
    let Some(data) = params.get("data") else {
        return Ok(vec![]);
    };

    if channel.starts_with("trades.") {
        return match data.as_array() {
            Some(rows) => rows
                .iter()
                .map(|row| Ok(RawEvent::Trade(decode_trade(row)?)))
                .collect(),
            None => Ok(vec![RawEvent::Trade(decode_trade(data)?)]),
        };
    }
    if channel.starts_with("book.") {
        return Ok(vec![RawEvent::Depth(decode_depth(data)?)]);
    }
    if channel.starts_with("ticker.") {
        return Ok(vec![RawEvent::Ticker(decode_ticker(data)?)]);
    }
    if channel.starts_with("deribit_price_index.") {
        return Ok(vec![RawEvent::Vol(decode_vol(data, channel)?)]);
    }
    Ok(vec![])
}

fn field<'a>(v: &'a serde_json::Value, key: &'static str) -> Result<&'a serde_json::Value> {
    v.get(key).ok_or_else(|| Error::MalformedFrame {
        exchange: Exchange::Deribit,
        reason: format!("missing field {key:?}"),
    })
}

fn as_str(v: &serde_json::Value, key: &'static str) -> Result<String> {
    field(v, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedFrame {
            exchange: Exchange::Deribit,
            reason: format!("field {key:?} is not a string"),
        })
}

fn as_f64(v: &serde_json::Value, key: &'static str) -> Result<f64> {
    field(v, key)?.as_f64().ok_or_else(|| Error::MalformedFrame {
        exchange: Exchange::Deribit,
        reason: format!("field {key:?} is not a number"),
    })
}

fn as_i64(v: &serde_json::Value, key: &'static str) -> Result<i64> {
    field(v, key)?.as_i64().ok_or_else(|| Error::MalformedFrame {
        exchange: Exchange::Deribit,
        reason: format!("field {key:?} is not an integer"),
    })
}

fn decode_trade(row: &serde_json::Value) -> Result<RawTrade> {
    Ok(RawTrade::Deribit {
        instrument_name: as_str(row, "instrument_name")?,
        trade_id: as_str(row, "trade_id")?,
        price: as_f64(row, "price")?,
        amount: as_f64(row, "amount")?,
        direction: as_str(row, "direction")?,
        timestamp_ms: as_i64(row, "timestamp")?,
    })
}

fn decode_ticker(row: &serde_json::Value) -> Result<RawTicker> {
    let stats = field(row, "stats")?;
    Ok(RawTicker::Deribit {
        instrument_name: as_str(row, "instrument_name")?,
        last_price: as_f64(row, "last_price")?,
        stats_volume: as_f64(stats, "volume")?,
        stats_high: as_f64(stats, "high")?,
        stats_low: as_f64(stats, "low")?,
        stats_price_change: stats.get("price_change").and_then(|v| v.as_f64()),
        timestamp_ms: as_i64(row, "timestamp")?,
    })
}

fn decode_depth(row: &serde_json::Value) -> Result<RawDepthEvent> {
    let levels = |key: &'static str| -> Result<Vec<PriceLevel>> {
        let raw = field(row, key)?.as_array().ok_or_else(|| Error::MalformedFrame {
            exchange: Exchange::Deribit,
            reason: format!("field {key:?} is not an array"),
        })?;
        Ok(raw
            .iter()
            .filter_map(|level| {
                let cols = level.as_array()?;
                // Deribit's book channel emits [action, price, amount];
                // a "delete" action carries amount 0 which already maps to
                // a removal once parsed into a PriceLevel.
                let price = cols.get(1)?.as_f64()?;
                let amount = cols.get(2)?.as_f64()?;
                Some(PriceLevel {
                    price: rust_decimal::Decimal::try_from(price).ok()?,
                    quantity: rust_decimal::Decimal::try_from(amount).ok()?,
                })
            })
            .collect())
    };

    let kind = if row.get("type").and_then(|v| v.as_str()) == Some("snapshot") {
        DepthFrameKind::Snapshot
    } else {
        DepthFrameKind::Update
    };

    Ok(RawDepthEvent::Deribit {
        instrument_name: as_str(row, "instrument_name")?,
        kind,
        change_id: as_i64(row, "change_id")?,
        prev_change_id: row.get("prev_change_id").and_then(|v| v.as_i64()),
        bids: levels("bids")?,
        asks: levels("asks")?,
        timestamp_ms: as_i64(row, "timestamp")?,
    })
}

fn decode_vol(row: &serde_json::Value, channel: &str) -> Result<crate::wire::raw::RawVol> {
    let currency = channel
        .strip_prefix("deribit_price_index.")
        .unwrap_or_default()
        .to_string();
    Ok(crate::wire::raw::RawVol::Deribit {
        currency,
        index_value: as_f64(row, "price")?,
        timestamp_ms: as_i64(row, "timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_book_change_frame_with_prev_change_id() {
        let payload = serde_json::json!({
            "params": {
                "channel": "book.BTC-PERPETUAL.100ms",
                "data": {
                    "type": "change",
                    "instrument_name": "BTC-PERPETUAL",
                    "change_id": 5003, "prev_change_id": 5002,
                    "bids": [["change", 30000.0, 1.0]],
                    "asks": [],
                    "timestamp": 1
                }
            }
        });
        let events = decode_frame(&payload.to_string()).unwrap();
        assert_eq!(events.len(), 1);
        match events.into_iter().next().unwrap() {
            RawEvent::Depth(RawDepthEvent::Deribit {
                change_id,
                prev_change_id,
                kind,
                ..
            }) => {
                assert_eq!(change_id, 5003);
                assert_eq!(prev_change_id, Some(5002));
                assert_eq!(kind, DepthFrameKind::Update);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn decodes_every_trade_in_a_batched_frame() {
        let payload = serde_json::json!({
            "params": {
                "channel": "trades.BTC-PERPETUAL.100ms",
                "data": [
                    {"instrument_name": "BTC-PERPETUAL", "trade_id": "1", "price": 30000.0, "amount": 10.0, "direction": "buy", "timestamp": 1},
                    {"instrument_name": "BTC-PERPETUAL", "trade_id": "2", "price": 30001.0, "amount": 20.0, "direction": "sell", "timestamp": 2},
                    {"instrument_name": "BTC-PERPETUAL", "trade_id": "3", "price": 30002.0, "amount": 30.0, "direction": "buy", "timestamp": 3}
                ]
            }
        });
        let events = decode_frame(&payload.to_string()).unwrap();
        assert_eq!(events.len(), 3);
        let ids: Vec<_> = events
            .iter()
            .map(|e| match e {
                RawEvent::Trade(RawTrade::Deribit { trade_id, .. }) => trade_id.clone(),
                other => panic!("unexpected variant: {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
