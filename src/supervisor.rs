//! `Supervisor` (§4.6) — constructs every component from config, starts
//! `WireAdapter`s and `OrderBookManager`s, runs scheduled REST jobs, routes
//! raw events into normalizers/managers, and owns the shutdown sequence.
//!
//! Concurrency shape follows §5 literally: one task per `WireAdapter`
//! connection (`run_adapter_loop`), one task per (exchange, symbol)
//! `OrderBookManager` (`run_book_worker`, single-writer), a dispatch task
//! per exchange that fans decoded raw events out to the right book task or
//! straight through a normalizer, and a fixed pool of publisher worker
//! tasks dequeuing non-book canonical records from a bounded channel. Only
//! fatal errors (§7) propagate out of `run`; everything else is logged,
//! counted in [`crate::health::HealthRegistry`], and handled locally by the
//! state machine in [`crate::orderbook::manager`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::chan::send_drop_oldest;
use crate::config::{CollectorConfig, ExchangeConfig, ScheduleConfig};
use crate::error::FatalError;
use crate::health::HealthRegistry;
use crate::model::{
    CanonicalRecord, Exchange, InstrumentKey, MarketType, NormalizedFundingRate,
    NormalizedLiquidation, NormalizedOpenInterest, NormalizedTicker, NormalizedTrade,
    VolatilityIndex, LSRSample,
};
use crate::normalize;
use crate::orderbook::{
    BinanceStrategy, BookEmission, BookLifecycle, DeribitStrategy, Error as BookError,
    ExchangeStrategy, OkxStrategy, OrderBookManager,
};
use crate::publisher::{Bus, Publisher};
use crate::ratelimiter::RateLimiter;
use crate::symbol::SymbolRegistry;
use crate::wire::binance::BinanceAdapter;
use crate::wire::deribit::DeribitAdapter;
use crate::wire::okx::OkxAdapter;
use crate::wire::raw::{RawDepthEvent, RawEvent};
use crate::wire::rest::RateLimitedSnapshotSource;
use crate::wire::{DataType, Subscription, WireAdapter};

/// WireAdapter -> dispatch channel capacity (§5 "bounded per-symbol
/// channel (default 4096)"), here shared across every symbol on one
/// exchange instance rather than split per symbol, since Supervisor
/// dispatch work is CPU-only and drains far faster than any socket can
/// fill it; see DESIGN.md for the reasoning behind that simplification.
const RAW_CHANNEL_CAPACITY: usize = 4096;
/// Dispatch -> per-book-worker channel capacity (§5, same constant reused
/// for the second, per-symbol hop that actually needs the `trigger_resync`
/// overflow policy).
const BOOK_INPUT_CHANNEL_CAPACITY: usize = 4096;
/// Non-book canonical records (trade/ticker/funding/...) -> publisher pool
/// channel (§5 "drop_oldest_with_counter for ticker/trade").
const PUBLISH_CHANNEL_CAPACITY: usize = 4096;
/// Fixed publisher worker pool size (§5 "a fixed pool of worker tasks").
const PUBLISHER_WORKERS: usize = 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// What a book-worker task receives from dispatch (§5).
enum ManagerInput {
    Depth(RawDepthEvent, DateTime<Utc>),
    /// §4.2 "on reconnect... notify OrderBookManagers to enter Resyncing";
    /// also used by the `trigger_resync` overflow policy below.
    ForceResync,
}

fn resync_drop_reason(err: &BookError) -> &'static str {
    match err {
        BookError::GapDetected { .. } => "gap_detected",
        BookError::SnapshotStale { .. } => "snapshot_stale",
        BookError::ChecksumMismatch { .. } => "checksum_mismatch",
        BookError::BufferOverflow { .. } => "buffer_overflow",
        BookError::ProtocolError { .. } => "protocol_error",
        BookError::UpstreamDisconnected { .. } => "upstream_disconnected",
        BookError::ResyncAttemptsExhausted { .. } => "resync_attempts_exhausted",
        BookError::SnapshotFetch { .. } => "snapshot_fetch_failed",
    }
}

/// Builds the concrete `WireAdapter` for one `[[exchanges]]` entry (§4.2,
/// §9 design note: "a trait/interface `ExchangeStrategy`... selected at
/// startup by config" — the same construction-time dispatch applies to
/// `WireAdapter`s). Each arm constructs and unsize-coerces in the same
/// expression so every exchange's distinct concrete adapter type erases to
/// the same `Arc<Mutex<dyn WireAdapter>>` the rest of the pipeline shares.
fn build_adapter(cfg: &ExchangeConfig) -> Arc<Mutex<dyn WireAdapter>> {
    match (cfg.exchange, cfg.market_type) {
        (Exchange::Binance, MarketType::Spot) => Arc::new(Mutex::new(BinanceAdapter::spot())),
        (Exchange::Binance, _) => Arc::new(Mutex::new(BinanceAdapter::usdm_futures())),
        (Exchange::Okx, _) => Arc::new(Mutex::new(OkxAdapter::default())),
        (Exchange::Deribit, _) => Arc::new(Mutex::new(DeribitAdapter::default())),
    }
}

fn build_strategy(cfg: &ExchangeConfig) -> Box<dyn ExchangeStrategy> {
    match cfg.exchange {
        Exchange::Binance => Box::new(BinanceStrategy),
        Exchange::Okx => Box::new(OkxStrategy {
            checksum_enabled: cfg.okx_checksum_enabled,
        }),
        Exchange::Deribit => Box::new(DeribitStrategy),
    }
}

fn subscriptions_for(cfg: &ExchangeConfig) -> Vec<Subscription> {
    cfg.symbols
        .iter()
        .flat_map(|mapping| {
            cfg.data_types.iter().map(move |dt| Subscription {
                native_symbol: mapping.native.clone(),
                data_type: *dt,
            })
        })
        .collect()
}

/// Owns every live component for one collector process; `run` drives it
/// until cancelled, then drains (§5 "Cancellation and timeouts").
pub struct Supervisor<B: Bus + 'static> {
    config: CollectorConfig,
    registry: Arc<SymbolRegistry>,
    health: HealthRegistry,
    publisher: Arc<Publisher<B>>,
}

impl<B: Bus + 'static> Supervisor<B> {
    /// Constructs the supervisor from validated config (§6). `bus` is the
    /// concrete transport the binary plugs in; the core only depends on
    /// the [`Bus`] trait (§1).
    pub fn new(config: CollectorConfig, bus: B) -> Result<Self, Error> {
        let registry = config
            .symbol_registry()
            .map_err(FatalError::InvalidConfig)?;
        let health = HealthRegistry::new().map_err(|e| {
            FatalError::Startup(format!("failed to construct metrics registry: {e}"))
        })?;
        let publisher = Publisher::new(bus, config.bus.subject_prefix.clone())
            .with_publish_timeout(config.bus.publish_timeout());

        Ok(Self {
            config,
            registry: Arc::new(registry),
            health,
            publisher: Arc::new(publisher),
        })
    }

    /// Cheap read-side health snapshot (§4.6), safe to call concurrently
    /// with `run`.
    pub fn health(&self) -> crate::health::HealthSnapshot {
        self.health.snapshot()
    }

    pub fn prometheus_registry(&self) -> &prometheus::Registry {
        self.health.registry()
    }

    /// Runs every exchange and scheduled job until `shutdown` reports
    /// `true`, then drains in-flight emissions up to
    /// `orderbook.drain_timeout_seconds` before returning.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), Error> {
        let Supervisor {
            config,
            registry,
            health,
            publisher,
        } = self;

        let (publish_tx, publish_rx) = mpsc::channel::<CanonicalRecord>(PUBLISH_CHANNEL_CAPACITY);
        let mut handles = spawn_publisher_pool(publisher.clone(), health.clone(), publish_rx);

        for exchange_cfg in config.exchanges.clone() {
            let rate_limiter = Arc::new(RateLimiter::new(
                config.rate_limit_for(exchange_cfg.exchange),
            ));
            handles.extend(spawn_exchange(
                exchange_cfg.clone(),
                config.orderbook.to_manager_config(),
                rate_limiter.clone(),
                registry.clone(),
                publisher.clone(),
                health.clone(),
                publish_tx.clone(),
                shutdown.clone(),
            ));
            handles.extend(spawn_schedules(
                exchange_cfg,
                config.schedules,
                rate_limiter,
                registry.clone(),
                publisher.clone(),
                health.clone(),
                shutdown.clone(),
            ));
        }
        drop(publish_tx);

        let mut shutdown_rx = shutdown;
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
        info!("shutdown signal received, draining in-flight emissions");

        let drain_timeout = config.orderbook.drain_timeout();
        for handle in handles {
            if tokio::time::timeout(drain_timeout, handle).await.is_err() {
                warn!(?drain_timeout, "task did not drain in time, abandoning it");
            }
        }
        Ok(())
    }
}

/// Fixed pool of worker tasks (§5) draining non-book canonical records.
/// Book snapshot/delta records are published inline by their owning
/// `run_book_worker` task instead (see that function's doc comment) so
/// this pool only ever sees trade/ticker/funding/oi/liquidation/lsr/vol.
fn spawn_publisher_pool<B: Bus + 'static>(
    publisher: Arc<Publisher<B>>,
    health: HealthRegistry,
    rx: mpsc::Receiver<CanonicalRecord>,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..PUBLISHER_WORKERS)
        .map(|_| {
            let rx = rx.clone();
            let publisher = publisher.clone();
            let health = health.clone();
            tokio::spawn(async move {
                loop {
                    let record = rx.lock().await.recv().await;
                    let Some(record) = record else { break };
                    if let Err(e) = publisher.publish(&record).await {
                        health.record_drop("bus_backpressure");
                        warn!(error = %e, "publish failed for non-book record");
                    }
                }
            })
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn spawn_exchange<B: Bus + 'static>(
    exchange_cfg: ExchangeConfig,
    book_config: crate::orderbook::OrderBookConfig,
    rate_limiter: Arc<RateLimiter>,
    registry: Arc<SymbolRegistry>,
    publisher: Arc<Publisher<B>>,
    health: HealthRegistry,
    publish_tx: mpsc::Sender<CanonicalRecord>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let adapter: Arc<Mutex<dyn WireAdapter>> = build_adapter(&exchange_cfg);
    let subscriptions = subscriptions_for(&exchange_cfg);
    let (raw_tx, raw_rx) = mpsc::channel::<RawEvent>(RAW_CHANNEL_CAPACITY);

    let mut book_inputs: HashMap<String, mpsc::Sender<ManagerInput>> = HashMap::new();

    if exchange_cfg.has_data_type(DataType::Depth) {
        let snapshot_source = Arc::new(RateLimitedSnapshotSource::new(
            adapter.clone(),
            rate_limiter.clone(),
            book_config.max_depth_levels,
        ));
        for mapping in &exchange_cfg.symbols {
            let key = InstrumentKey::new(
                exchange_cfg.exchange,
                exchange_cfg.market_type,
                mapping.canonical.clone(),
            );
            let (tx, rx) = mpsc::channel::<ManagerInput>(BOOK_INPUT_CHANNEL_CAPACITY);
            book_inputs.insert(mapping.canonical.clone(), tx);

            let manager = OrderBookManager::new(
                key.clone(),
                build_strategy(&exchange_cfg),
                book_config,
            );
            handles.push(tokio::spawn(run_book_worker(
                key,
                manager,
                rx,
                snapshot_source.clone(),
                publisher.clone(),
                health.clone(),
                shutdown.clone(),
            )));
        }
    }

    handles.push(tokio::spawn(run_adapter_loop(
        exchange_cfg.clone(),
        adapter,
        subscriptions,
        raw_tx,
        book_inputs.clone(),
        health.clone(),
        shutdown.clone(),
    )));

    handles.push(tokio::spawn(run_dispatch(
        exchange_cfg,
        registry,
        raw_rx,
        book_inputs,
        publish_tx,
        health,
    )));

    handles
}

/// Connects, re-subscribes, and reconnects one `WireAdapter` forever with
/// exponential backoff (§4.2). On every reconnect after the first connect,
/// every book worker fed by this adapter is told to `ForceResync` (§4.2
/// "notify OrderBookManagers to enter Resyncing"; SPEC_FULL C.7 folds the
/// old ad-hoc `needs_resync` flag into the `BookLifecycle` state machine
/// proper).
async fn run_adapter_loop(
    exchange_cfg: ExchangeConfig,
    adapter: Arc<Mutex<dyn WireAdapter>>,
    subscriptions: Vec<Subscription>,
    raw_tx: mpsc::Sender<RawEvent>,
    book_inputs: HashMap<String, mpsc::Sender<ManagerInput>>,
    health: HealthRegistry,
    mut shutdown: watch::Receiver<bool>,
) {
    let exchange = exchange_cfg.exchange;
    let mut attempt: u32 = 0;
    let mut is_reconnect = false;

    loop {
        if *shutdown.borrow() {
            return;
        }

        {
            let mut guard = adapter.lock().await;
            match guard.connect(&subscriptions).await {
                Ok(()) => {
                    health.record_adapter_connected(exchange, true);
                    attempt = 0;
                }
                Err(e) => {
                    error!(%exchange, error = %e, "failed to connect, backing off");
                    health.record_adapter_connected(exchange, false);
                    if wait_or_shutdown(BackoffPolicy::RECONNECT.delay_for(attempt), &mut shutdown)
                        .await
                    {
                        return;
                    }
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            }
        }

        if is_reconnect {
            for tx in book_inputs.values() {
                let _ = tx.try_send(ManagerInput::ForceResync);
            }
        }
        is_reconnect = true;

        let run_result = {
            let mut guard = adapter.lock().await;
            guard.run(raw_tx.clone()).await
        };

        health.record_adapter_connected(exchange, false);
        adapter.lock().await.close().await;

        match run_result {
            Ok(()) => debug!(%exchange, "adapter run loop ended cleanly"),
            Err(e) => warn!(%exchange, error = %e, "adapter disconnected, reconnecting"),
        }

        if raw_tx.is_closed() {
            return;
        }
        if wait_or_shutdown(BackoffPolicy::RECONNECT.delay_for(attempt), &mut shutdown).await {
            return;
        }
        attempt = attempt.saturating_add(1);
    }
}

/// Sleeps for `delay` unless `shutdown` fires first; returns `true` if the
/// caller should stop (shutdown observed).
async fn wait_or_shutdown(delay: std::time::Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Routes one decoded depth event to its book worker's input channel
/// (§5). On overflow, applies `trigger_resync`: the event itself is
/// dropped (counted), and a `ForceResync` is enqueued in its place so the
/// manager never keeps running on a gap it silently lost.
async fn route_depth(tx: &mpsc::Sender<ManagerInput>, raw: RawDepthEvent, at: DateTime<Utc>, health: &HealthRegistry) {
    match tx.try_send(ManagerInput::Depth(raw, at)) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            health.record_drop("depth_channel_overflow");
            let _ = tx.try_send(ManagerInput::ForceResync);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

/// Fans decoded raw events out: `Depth` goes to its book worker; every
/// other record type is normalized inline (§4.3 "no I/O... a normalizer
/// invocation is a plain function call made synchronously inside the
/// producer task") and handed to the shared publisher pool with
/// `drop_oldest_with_counter` (§5) — trade/ticker-class data is lossy by
/// design under backpressure, unlike the book path.
async fn run_dispatch(
    exchange_cfg: ExchangeConfig,
    registry: Arc<SymbolRegistry>,
    mut raw_rx: mpsc::Receiver<RawEvent>,
    book_inputs: HashMap<String, mpsc::Sender<ManagerInput>>,
    publish_tx: mpsc::Sender<CanonicalRecord>,
    health: HealthRegistry,
) {
    let exchange = exchange_cfg.exchange;
    let market_type = exchange_cfg.market_type;

    while let Some(event) = raw_rx.recv().await {
        let now = Utc::now();
        health.record_adapter_message(exchange, now);

        if let RawEvent::Depth(raw) = &event {
            let native = raw.native_symbol();
            match registry.canonical(exchange, native) {
                Some(canonical) => {
                    if let Some(tx) = book_inputs.get(canonical) {
                        route_depth(tx, raw.clone(), now, &health).await;
                    }
                }
                None => health.record_drop("unknown_symbol"),
            }
            continue;
        }

        let record = match &event {
            RawEvent::Trade(raw) => normalize_trade(exchange, &registry, market_type, raw, now)
                .map(CanonicalRecord::Trade),
            RawEvent::Ticker(raw) => normalize_ticker(exchange, &registry, market_type, raw, now)
                .map(CanonicalRecord::Ticker),
            RawEvent::Funding(raw) => normalize_funding(exchange, &registry, market_type, raw, now)
                .map(CanonicalRecord::Funding),
            RawEvent::OpenInterest(raw) => {
                normalize_open_interest(exchange, &registry, market_type, raw, now)
                    .map(CanonicalRecord::OpenInterest)
            }
            RawEvent::Liquidation(raw) => {
                normalize_liquidation(exchange, &registry, market_type, raw, now)
                    .map(CanonicalRecord::Liquidation)
            }
            RawEvent::Lsr(raw) => {
                normalize_lsr(exchange, &registry, market_type, raw, now).map(CanonicalRecord::Lsr)
            }
            RawEvent::Vol(raw) => {
                normalize_vol(exchange, &registry, market_type, raw, now).map(CanonicalRecord::Vol)
            }
            RawEvent::Depth(_) => unreachable!("handled above"),
        };

        match record {
            Ok(record) => {
                health.record_event(record.key(), now);
                if send_drop_oldest(&publish_tx, record).await == crate::chan::SendOutcome::Dropped
                {
                    health.record_drop("publish_channel_overflow");
                }
            }
            Err(normalize::Error::UnknownSymbol { .. }) => {
                health.record_drop("unknown_symbol");
            }
            Err(normalize::Error::DecodeError { .. }) => {
                health.record_drop("decode_error");
            }
        }
    }
}

fn normalize_trade(
    exchange: Exchange,
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &crate::wire::raw::RawTrade,
    now: DateTime<Utc>,
) -> normalize::Result<NormalizedTrade> {
    match exchange {
        Exchange::Binance => normalize::binance::trade(registry, market_type, raw, now),
        Exchange::Okx => normalize::okx::trade(registry, market_type, raw, now),
        Exchange::Deribit => normalize::deribit::trade(registry, market_type, raw, now),
    }
}

fn normalize_ticker(
    exchange: Exchange,
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &crate::wire::raw::RawTicker,
    now: DateTime<Utc>,
) -> normalize::Result<NormalizedTicker> {
    match exchange {
        Exchange::Binance => normalize::binance::ticker(registry, market_type, raw, now),
        Exchange::Okx => normalize::okx::ticker(registry, market_type, raw, now),
        Exchange::Deribit => normalize::deribit::ticker(registry, market_type, raw, now),
    }
}

fn normalize_funding(
    exchange: Exchange,
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &crate::wire::raw::RawFunding,
    now: DateTime<Utc>,
) -> normalize::Result<NormalizedFundingRate> {
    match exchange {
        Exchange::Binance => normalize::binance::funding(registry, market_type, raw, now),
        Exchange::Okx => normalize::okx::funding(registry, market_type, raw, now),
        Exchange::Deribit => normalize::deribit::funding(registry, market_type, raw, now),
    }
}

fn normalize_open_interest(
    exchange: Exchange,
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &crate::wire::raw::RawOpenInterest,
    now: DateTime<Utc>,
) -> normalize::Result<NormalizedOpenInterest> {
    match exchange {
        Exchange::Binance => normalize::binance::open_interest(registry, market_type, raw, now),
        Exchange::Okx => normalize::okx::open_interest(registry, market_type, raw, now),
        Exchange::Deribit => normalize::deribit::open_interest(registry, market_type, raw, now),
    }
}

fn normalize_liquidation(
    exchange: Exchange,
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &crate::wire::raw::RawLiquidation,
    now: DateTime<Utc>,
) -> normalize::Result<NormalizedLiquidation> {
    match exchange {
        Exchange::Binance => normalize::binance::liquidation(registry, market_type, raw, now),
        Exchange::Okx => normalize::okx::liquidation(registry, market_type, raw, now),
        Exchange::Deribit => normalize::deribit::liquidation(registry, market_type, raw, now),
    }
}

/// Deribit pushes no long/short-ratio feed (§6); `RawLsr` has no `Deribit`
/// variant, so that arm is structurally unreachable rather than handled.
fn normalize_lsr(
    exchange: Exchange,
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &crate::wire::raw::RawLsr,
    now: DateTime<Utc>,
) -> normalize::Result<LSRSample> {
    match exchange {
        Exchange::Binance => normalize::binance::lsr(registry, market_type, raw, now),
        Exchange::Okx => normalize::okx::lsr(registry, market_type, raw, now),
        Exchange::Deribit => unreachable!("RawLsr has no Deribit variant"),
    }
}

/// Only Deribit publishes a volatility index (§6 `deribit_price_index`);
/// `RawVol` has no Binance/OKX variant.
fn normalize_vol(
    exchange: Exchange,
    registry: &SymbolRegistry,
    market_type: MarketType,
    raw: &crate::wire::raw::RawVol,
    now: DateTime<Utc>,
) -> normalize::Result<VolatilityIndex> {
    match exchange {
        Exchange::Deribit => normalize::deribit::vol(registry, market_type, raw, now),
        Exchange::Binance | Exchange::Okx => unreachable!("RawVol has no variant for this exchange"),
    }
}

/// Owns one `OrderBookManager` end to end: initial sync, steady-state
/// ingestion, and resync-on-error, publishing every emission itself
/// (rather than through the shared publisher pool) so the manager gets
/// synchronous feedback on `BusBackpressure` for §8 Scenario E
/// (`record_publish_backpressure` / `record_publish_success`). Awaiting
/// the publish inline, one emission at a time, is the degenerate case of
/// the spec's bounded "OrderBookManager -> Publisher" channel with a
/// single slot — it preserves the same per-key ordering and
/// `block_with_timeout` backpressure semantics (§5) without a second
/// indirection layer.
async fn run_book_worker<B: Bus + 'static>(
    key: InstrumentKey,
    mut manager: OrderBookManager,
    mut input_rx: mpsc::Receiver<ManagerInput>,
    snapshot_source: Arc<RateLimitedSnapshotSource>,
    publisher: Arc<Publisher<B>>,
    health: HealthRegistry,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        match manager.resync(snapshot_source.as_ref(), Utc::now()).await {
            Ok(emissions) => {
                attempt = 0;
                health.record_state(&key, manager.lifecycle());
                for emission in emissions {
                    publish_emission(&publisher, &mut manager, emission, &health).await;
                }
                break;
            }
            Err(e) => {
                health.record_drop(resync_drop_reason(&e));
                if manager.lifecycle() == BookLifecycle::Failed {
                    error!(%key, error = %e, "order book failed during initial sync");
                    health.record_state(&key, BookLifecycle::Failed);
                    return;
                }
                warn!(%key, error = %e, "initial snapshot sync failed, retrying");
                if wait_or_shutdown(BackoffPolicy::RESYNC.delay_for(attempt), &mut shutdown).await {
                    return;
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }

    loop {
        if manager.lifecycle() == BookLifecycle::Resyncing {
            match manager.resync(snapshot_source.as_ref(), Utc::now()).await {
                Ok(emissions) => {
                    attempt = 0;
                    health.record_state(&key, manager.lifecycle());
                    for emission in emissions {
                        publish_emission(&publisher, &mut manager, emission, &health).await;
                    }
                }
                Err(e) => {
                    health.record_drop(resync_drop_reason(&e));
                    if manager.lifecycle() == BookLifecycle::Failed {
                        error!(%key, error = %e, "exhausted resync attempts, book failed");
                        health.record_state(&key, BookLifecycle::Failed);
                        return;
                    }
                    if wait_or_shutdown(BackoffPolicy::RESYNC.delay_for(attempt), &mut shutdown).await
                    {
                        return;
                    }
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            }
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            maybe_input = input_rx.recv() => {
                let Some(input) = maybe_input else { return };
                match input {
                    ManagerInput::ForceResync => manager.force_resync(),
                    ManagerInput::Depth(raw, at) => {
                        health.record_event(&key, at);
                        match manager.ingest(raw, at) {
                            Ok(emissions) => {
                                for emission in emissions {
                                    publish_emission(&publisher, &mut manager, emission, &health).await;
                                }
                            }
                            Err(e) => {
                                health.record_drop(resync_drop_reason(&e));
                                health.record_state(&key, manager.lifecycle());
                                if !e.triggers_resync() {
                                    error!(%key, error = %e, "protocol error, book failed");
                                    return;
                                }
                                warn!(%key, error = %e, "forcing resync");
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn publish_emission<B: Bus>(
    publisher: &Publisher<B>,
    manager: &mut OrderBookManager,
    emission: BookEmission,
    health: &HealthRegistry,
) {
    let (record, key) = match emission {
        BookEmission::Snapshot(s) => (CanonicalRecord::BookSnapshot(s.clone()), s.key),
        BookEmission::Delta(d) => (CanonicalRecord::BookDelta(d.clone()), d.key),
    };
    match publisher.publish(&record).await {
        Ok(()) => {
            manager.record_publish_success();
            health.record_emit(&key, Utc::now());
            health.record_state(&key, manager.lifecycle());
        }
        Err(e) => {
            health.record_drop("bus_backpressure");
            if manager.record_publish_backpressure() {
                warn!(%key, error = %e, "sustained publish backpressure, forcing resync");
                health.record_state(&key, manager.lifecycle());
            }
        }
    }
}

/// Which Binance-only REST job a [`run_schedule`] task drives (§6
/// `schedules`). Binance's combined WS streams carry no funding/open-
/// interest/long-short-ratio feed (§6's channel list omits them for
/// Binance), so these three are the only polled jobs this collector
/// schedules; OKX and Deribit get the equivalent data pushed over their WS
/// channels instead (`mark-price`, `open-interest`, `deribit_price_index`),
/// normalized inline by `run_dispatch`.
#[derive(Debug, Clone, Copy)]
enum ScheduledJob {
    Funding,
    OpenInterest,
    LongShortRatio,
}

impl ScheduledJob {
    fn label(self) -> &'static str {
        match self {
            ScheduledJob::Funding => "funding",
            ScheduledJob::OpenInterest => "open_interest",
            ScheduledJob::LongShortRatio => "long_short_ratio",
        }
    }

    async fn poll_and_normalize(
        self,
        poller: &BinanceAdapter,
        registry: &SymbolRegistry,
        market_type: MarketType,
        native_symbol: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<CanonicalRecord, ScheduleError> {
        match self {
            ScheduledJob::Funding => {
                let raw = poller.poll_funding(native_symbol).await?;
                Ok(normalize::binance::funding(registry, market_type, &raw, now)
                    .map(CanonicalRecord::Funding)?)
            }
            ScheduledJob::OpenInterest => {
                let raw = poller.poll_open_interest(native_symbol).await?;
                Ok(
                    normalize::binance::open_interest(registry, market_type, &raw, now)
                        .map(CanonicalRecord::OpenInterest)?,
                )
            }
            ScheduledJob::LongShortRatio => {
                let raw = poller.poll_long_short_ratio(native_symbol).await?;
                Ok(normalize::binance::lsr(registry, market_type, &raw, now)
                    .map(CanonicalRecord::Lsr)?)
            }
        }
    }
}

enum ScheduleError {
    Poll(crate::wire::Error),
    Normalize(normalize::Error),
}

impl From<crate::wire::Error> for ScheduleError {
    fn from(e: crate::wire::Error) -> Self {
        ScheduleError::Poll(e)
    }
}

impl From<normalize::Error> for ScheduleError {
    fn from(e: normalize::Error) -> Self {
        ScheduleError::Normalize(e)
    }
}

fn spawn_schedules<B: Bus + 'static>(
    exchange_cfg: ExchangeConfig,
    schedules: ScheduleConfig,
    rate_limiter: Arc<RateLimiter>,
    registry: Arc<SymbolRegistry>,
    publisher: Arc<Publisher<B>>,
    health: HealthRegistry,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    if exchange_cfg.exchange != Exchange::Binance || exchange_cfg.market_type == MarketType::Spot {
        return Vec::new();
    }

    let poller = Arc::new(BinanceAdapter::usdm_futures());
    let mut handles = Vec::new();

    let jobs: &[(DataType, ScheduledJob, u64)] = &[
        (DataType::Funding, ScheduledJob::Funding, schedules.funding_seconds),
        (
            DataType::OpenInterest,
            ScheduledJob::OpenInterest,
            schedules.open_interest_seconds,
        ),
        (
            DataType::Lsr,
            ScheduledJob::LongShortRatio,
            schedules.long_short_ratio_seconds,
        ),
    ];

    for &(data_type, job, cadence_seconds) in jobs {
        if !exchange_cfg.has_data_type(data_type) {
            continue;
        }
        handles.push(tokio::spawn(run_schedule(
            job,
            exchange_cfg.clone(),
            std::time::Duration::from_secs(cadence_seconds),
            rate_limiter.clone(),
            registry.clone(),
            publisher.clone(),
            health.clone(),
            shutdown.clone(),
            poller.clone(),
        )));
    }

    handles
}

/// One cadence-driven REST job: waits for a rate-limiter token, polls,
/// normalizes, and publishes, on repeat until shutdown (§4.4, §6
/// `schedules`).
#[allow(clippy::too_many_arguments)]
async fn run_schedule<B: Bus + 'static>(
    job: ScheduledJob,
    exchange_cfg: ExchangeConfig,
    cadence: std::time::Duration,
    rate_limiter: Arc<RateLimiter>,
    registry: Arc<SymbolRegistry>,
    publisher: Arc<Publisher<B>>,
    health: HealthRegistry,
    mut shutdown: watch::Receiver<bool>,
    poller: Arc<BinanceAdapter>,
) {
    let mut ticker = tokio::time::interval(cadence);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                for mapping in &exchange_cfg.symbols {
                    if rate_limiter
                        .acquire(crate::wire::rest::REST_FETCH_DEADLINE)
                        .await
                        .is_err()
                    {
                        health.record_drop("rate_limited");
                        continue;
                    }

                    let now = Utc::now();
                    let outcome = job
                        .poll_and_normalize(
                            &poller,
                            &registry,
                            exchange_cfg.market_type,
                            &mapping.native,
                            now,
                        )
                        .await;

                    match outcome {
                        Ok(record) => {
                            health.record_event(record.key(), now);
                            if let Err(e) = publisher.publish(&record).await {
                                health.record_drop("bus_backpressure");
                                warn!(error = %e, "publish failed for scheduled record");
                            }
                        }
                        Err(ScheduleError::Poll(e)) => {
                            health.record_drop("decode_error");
                            warn!(
                                exchange = %exchange_cfg.exchange,
                                job = job.label(),
                                symbol = %mapping.native,
                                error = %e,
                                "scheduled poll failed"
                            );
                        }
                        Err(ScheduleError::Normalize(normalize::Error::UnknownSymbol { .. })) => {
                            health.record_drop("unknown_symbol");
                        }
                        Err(ScheduleError::Normalize(normalize::Error::DecodeError { .. })) => {
                            health.record_drop("decode_error");
                        }
                    }
                }
            }
        }
    }
}
