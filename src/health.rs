//! Health and the minimal metrics contract (§4.6, §9 "minimal metrics").
//!
//! Two surfaces are exposed: a cheap, queryable snapshot
//! (`HealthRegistry::snapshot`) the Supervisor can return over any control
//! surface it chooses (SPEC_FULL C.5 — a concrete struct rather than only
//! emitting metrics), and a `prometheus::Registry` for counters/gauges
//! (SPEC_FULL B, grounded on `guribe94-bog/bog-core/src/monitoring/metrics.rs`'s
//! `MetricsRegistry` shape). Exporting the registry over HTTP is out of
//! scope (§1).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use serde::Serialize;

use crate::model::{Exchange, InstrumentKey};
use crate::orderbook::BookLifecycle;

/// Per-(exchange, symbol) health (§4.6).
#[derive(Debug, Clone, Serialize)]
pub struct BookHealth {
    pub state: &'static str,
    pub last_event_time: Option<DateTime<Utc>>,
    pub last_emit_time: Option<DateTime<Utc>>,
    pub resync_count_1m: u64,
}

/// Per-adapter health (§4.6).
#[derive(Debug, Clone, Serialize)]
pub struct AdapterHealth {
    pub connected: bool,
    pub last_message_age_ms: Option<i64>,
    pub reconnects_total: u64,
}

/// Global counters (§4.6 "lag histograms, drop counters by reason").
#[derive(Debug, Clone, Serialize, Default)]
pub struct GlobalHealth {
    pub drops_by_reason: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub books: HashMap<String, BookHealth>,
    pub adapters: HashMap<String, AdapterHealth>,
    pub global: GlobalHealth,
}

fn lifecycle_label(state: BookLifecycle) -> &'static str {
    match state {
        BookLifecycle::Init => "init",
        BookLifecycle::Synced => "synced",
        BookLifecycle::Resyncing => "resyncing",
        BookLifecycle::Failed => "failed",
    }
}

struct BookEntry {
    state: BookLifecycle,
    last_event_time: Option<DateTime<Utc>>,
    last_emit_time: Option<DateTime<Utc>>,
    resync_count_1m: u64,
}

struct AdapterEntry {
    connected: bool,
    last_message_time: Option<DateTime<Utc>>,
    reconnects_total: u64,
}

/// Lock-free-read registry of health state plus the Prometheus metric
/// families it mirrors. Cloning is cheap (every field is `Arc`-backed),
/// matching the `#[derive(Clone)]` `MetricsRegistry` pattern in the
/// teacher-adjacent `bog-core` crate.
#[derive(Clone)]
pub struct HealthRegistry {
    books: Arc<DashMap<InstrumentKey, BookEntry>>,
    adapters: Arc<DashMap<Exchange, AdapterEntry>>,
    drops_by_reason: Arc<DashMap<String, u64>>,
    registry: Arc<Registry>,
    resync_total: IntCounterVec,
    drop_total: IntCounterVec,
    book_state: IntGaugeVec,
    publish_latency: HistogramVec,
}

impl HealthRegistry {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let resync_total = IntCounterVec::new(
            Opts::new("marketprism_resync_total", "Order book resyncs by exchange/symbol"),
            &["exchange", "symbol"],
        )?;
        let drop_total = IntCounterVec::new(
            Opts::new("marketprism_drop_total", "Dropped events by reason"),
            &["reason"],
        )?;
        let book_state = IntGaugeVec::new(
            Opts::new("marketprism_book_state", "Current BookLifecycle as an integer (0=init,1=synced,2=resyncing,3=failed)"),
            &["exchange", "symbol"],
        )?;
        let publish_latency = HistogramVec::new(
            HistogramOpts::new("marketprism_publish_latency_seconds", "Bus publish latency"),
            &["record_type"],
        )?;

        registry.register(Box::new(resync_total.clone()))?;
        registry.register(Box::new(drop_total.clone()))?;
        registry.register(Box::new(book_state.clone()))?;
        registry.register(Box::new(publish_latency.clone()))?;

        Ok(Self {
            books: Arc::new(DashMap::new()),
            adapters: Arc::new(DashMap::new()),
            drops_by_reason: Arc::new(DashMap::new()),
            registry: Arc::new(registry),
            resync_total,
            drop_total,
            book_state,
            publish_latency,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn publish_latency_histogram(&self) -> &HistogramVec {
        &self.publish_latency
    }

    pub fn record_event(&self, key: &InstrumentKey, at: DateTime<Utc>) {
        self.books
            .entry(key.clone())
            .or_insert_with(|| BookEntry {
                state: BookLifecycle::Init,
                last_event_time: None,
                last_emit_time: None,
                resync_count_1m: 0,
            })
            .last_event_time = Some(at);
    }

    pub fn record_emit(&self, key: &InstrumentKey, at: DateTime<Utc>) {
        self.books
            .entry(key.clone())
            .or_insert_with(|| BookEntry {
                state: BookLifecycle::Init,
                last_event_time: None,
                last_emit_time: None,
                resync_count_1m: 0,
            })
            .last_emit_time = Some(at);
    }

    pub fn record_state(&self, key: &InstrumentKey, state: BookLifecycle) {
        self.book_state
            .with_label_values(&[&key.exchange.to_string(), &key.symbol])
            .set(match state {
                BookLifecycle::Init => 0,
                BookLifecycle::Synced => 1,
                BookLifecycle::Resyncing => 2,
                BookLifecycle::Failed => 3,
            });
        let mut entry = self.books.entry(key.clone()).or_insert_with(|| BookEntry {
            state,
            last_event_time: None,
            last_emit_time: None,
            resync_count_1m: 0,
        });
        if state == BookLifecycle::Resyncing && entry.state != BookLifecycle::Resyncing {
            entry.resync_count_1m += 1;
            self.resync_total
                .with_label_values(&[&key.exchange.to_string(), &key.symbol])
                .inc();
        }
        entry.state = state;
    }

    pub fn record_adapter_connected(&self, exchange: Exchange, connected: bool) {
        let mut entry = self.adapters.entry(exchange).or_insert_with(|| AdapterEntry {
            connected,
            last_message_time: None,
            reconnects_total: 0,
        });
        if connected && !entry.connected {
            entry.reconnects_total += 1;
        }
        entry.connected = connected;
    }

    pub fn record_adapter_message(&self, exchange: Exchange, at: DateTime<Utc>) {
        self.adapters
            .entry(exchange)
            .or_insert_with(|| AdapterEntry {
                connected: true,
                last_message_time: None,
                reconnects_total: 0,
            })
            .last_message_time = Some(at);
    }

    pub fn record_drop(&self, reason: &str) {
        *self.drops_by_reason.entry(reason.to_string()).or_insert(0) += 1;
        self.drop_total.with_label_values(&[reason]).inc();
    }

    /// Cheap read-side snapshot (SPEC_FULL C.5): every field is copied out
    /// of the lock-free maps, so callers get a consistent-enough point in
    /// time view without holding a lock across the call.
    pub fn snapshot(&self) -> HealthSnapshot {
        let now = Utc::now();
        let books = self
            .books
            .iter()
            .map(|entry| {
                let key = entry.key().clone();
                let v = entry.value();
                (
                    key.to_string(),
                    BookHealth {
                        state: lifecycle_label(v.state),
                        last_event_time: v.last_event_time,
                        last_emit_time: v.last_emit_time,
                        resync_count_1m: v.resync_count_1m,
                    },
                )
            })
            .collect();

        let adapters = self
            .adapters
            .iter()
            .map(|entry| {
                let exchange = *entry.key();
                let v = entry.value();
                (
                    exchange.to_string(),
                    AdapterHealth {
                        connected: v.connected,
                        last_message_age_ms: v
                            .last_message_time
                            .map(|t| (now - t).num_milliseconds()),
                        reconnects_total: v.reconnects_total,
                    },
                )
            })
            .collect();

        HealthSnapshot {
            books,
            adapters,
            global: GlobalHealth {
                drops_by_reason: self
                    .drops_by_reason
                    .iter()
                    .map(|e| (e.key().clone(), *e.value()))
                    .collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MarketType;

    fn key() -> InstrumentKey {
        InstrumentKey::new(Exchange::Binance, MarketType::Spot, "BTC/USDT")
    }

    #[test]
    fn resync_transition_increments_counter_once() {
        let health = HealthRegistry::new().unwrap();
        health.record_state(&key(), BookLifecycle::Synced);
        health.record_state(&key(), BookLifecycle::Resyncing);
        health.record_state(&key(), BookLifecycle::Resyncing);
        let snap = health.snapshot();
        let entry = snap.books.get(&key().to_string()).unwrap();
        assert_eq!(entry.resync_count_1m, 1);
    }

    #[test]
    fn drop_counter_accumulates_by_reason() {
        let health = HealthRegistry::new().unwrap();
        health.record_drop("unknown_symbol");
        health.record_drop("unknown_symbol");
        health.record_drop("decode_error");
        let snap = health.snapshot();
        assert_eq!(snap.global.drops_by_reason["unknown_symbol"], 2);
        assert_eq!(snap.global.drops_by_reason["decode_error"], 1);
    }

    #[test]
    fn adapter_reconnect_increments_only_on_false_to_true_transition() {
        let health = HealthRegistry::new().unwrap();
        health.record_adapter_connected(Exchange::Okx, true);
        health.record_adapter_connected(Exchange::Okx, false);
        health.record_adapter_connected(Exchange::Okx, true);
        let snap = health.snapshot();
        assert_eq!(snap.adapters["okx"].reconnects_total, 1);
    }
}
