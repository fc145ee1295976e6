//! `OrderBookManager` (§4.1) — owns the local book for one instrument,
//! merges a REST snapshot with the incremental depth stream, and emits
//! [`BookEmission`]s. This is the single-writer task described in §5: one
//! logical task per (exchange, symbol), no other component mutates its
//! `Book`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{InstrumentKey, OrderBookDelta, OrderBookSnapshot};
use crate::wire::raw::{RawDepthEvent, RestSnapshot};

use super::book::Book;
use super::strategy::{Continuity, ExchangeStrategy};
use super::{BookLifecycle, Error};

/// Source of REST depth snapshots for resync, decoupled from
/// [`crate::wire::WireAdapter`] so the manager can be unit-tested without a
/// live connection (the Supervisor wires a real adapter in through this
/// trait).
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(
        &self,
        key: &InstrumentKey,
        depth: usize,
    ) -> std::result::Result<RestSnapshot, crate::wire::Error>;
}

/// Tunables from §4.1/§6 (`orderbook.*` config keys).
#[derive(Debug, Clone, Copy)]
pub struct OrderBookConfig {
    pub max_depth_levels: usize,
    pub buffer_cap: usize,
    pub max_resync_attempts: u32,
    pub resync_window: Duration,
    /// §4.1 "Output contract": consecutive backpressure-class failures
    /// before the manager forces a resync on its own (§8 Scenario E).
    pub backpressure_threshold: u32,
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        Self {
            max_depth_levels: 400,
            buffer_cap: 10_000,
            max_resync_attempts: 5,
            resync_window: Duration::from_secs(120),
            backpressure_threshold: 5,
        }
    }
}

/// One of the two canonical streams the manager emits (§4.1 "Output
/// contract").
#[derive(Debug, Clone)]
pub enum BookEmission {
    Snapshot(OrderBookSnapshot),
    Delta(OrderBookDelta),
}

pub struct OrderBookManager {
    key: InstrumentKey,
    strategy: Box<dyn ExchangeStrategy>,
    config: OrderBookConfig,
    lifecycle: BookLifecycle,
    book: Option<Book>,
    buffer: VecDeque<RawDepthEvent>,
    resync_attempts: VecDeque<Instant>,
    consecutive_backpressure: u32,
}

impl OrderBookManager {
    pub fn new(
        key: InstrumentKey,
        strategy: Box<dyn ExchangeStrategy>,
        config: OrderBookConfig,
    ) -> Self {
        Self {
            key,
            strategy,
            config,
            lifecycle: BookLifecycle::Init,
            book: None,
            buffer: VecDeque::new(),
            resync_attempts: VecDeque::new(),
            consecutive_backpressure: 0,
        }
    }

    pub fn key(&self) -> &InstrumentKey {
        &self.key
    }

    pub fn lifecycle(&self) -> BookLifecycle {
        self.lifecycle
    }

    pub fn book(&self) -> Option<&Book> {
        self.book.as_ref()
    }

    /// Pushes a depth event onto the bounded buffer used while `Init`/
    /// `Resyncing`. Returns `true` if the push forced an overflow drop
    /// (§4.1 "On overflow, oldest entries are dropped and the manager
    /// forces a fresh Resync").
    fn buffer_push(&mut self, raw: RawDepthEvent) -> bool {
        let overflowed = self.buffer.len() >= self.config.buffer_cap;
        if overflowed {
            self.buffer.pop_front();
        }
        self.buffer.push_back(raw);
        overflowed
    }

    /// Entry point for every depth event read off the wire (§4.1). While
    /// `Init`/`Resyncing`, events are buffered for the next resync to
    /// drain; while `Synced`, they're applied (or rejected) immediately.
    pub fn ingest(
        &mut self,
        raw: RawDepthEvent,
        ingest_time: DateTime<Utc>,
    ) -> std::result::Result<Vec<BookEmission>, Error> {
        match self.lifecycle {
            BookLifecycle::Synced => self.apply_live(raw, ingest_time),
            BookLifecycle::Init | BookLifecycle::Resyncing => {
                if self.buffer_push(raw) {
                    self.lifecycle = BookLifecycle::Resyncing;
                    return Err(Error::BufferOverflow {
                        key: self.key.clone(),
                        capacity: self.config.buffer_cap,
                    });
                }
                Ok(vec![])
            }
            BookLifecycle::Failed => Err(Error::ProtocolError {
                key: self.key.clone(),
                reason: "manager is in Failed state, awaiting supervisor restart".to_string(),
            }),
        }
    }

    fn apply_live(
        &mut self,
        raw: RawDepthEvent,
        ingest_time: DateTime<Utc>,
    ) -> std::result::Result<Vec<BookEmission>, Error> {
        let book = self.book.as_mut().expect("Synced implies book is present");

        if self.strategy.is_snapshot_frame(&raw) {
            let (bids, asks) = self.strategy.levels(&raw);
            let (_, last_update_id) = self.strategy.update_id_range(&raw);
            *book = Book::from_snapshot(
                self.key.clone(),
                last_update_id,
                bids.to_vec(),
                asks.to_vec(),
                ingest_time,
                self.config.max_depth_levels,
            );
            return Ok(vec![BookEmission::Snapshot(book.to_snapshot(ingest_time))]);
        }

        match self.strategy.continuity(&raw, book.last_update_id) {
            Continuity::Stale => Ok(vec![]),
            Continuity::Gap => {
                self.lifecycle = BookLifecycle::Resyncing;
                self.buffer_push(raw);
                Err(Error::GapDetected {
                    key: self.key.clone(),
                    prev_last_update_id: book.last_update_id,
                })
            }
            Continuity::Continues => {
                let (first_update_id, last_update_id) = self.strategy.update_id_range(&raw);
                let (bids_changed, asks_changed) = self.strategy.levels(&raw);
                let bids_changed = bids_changed.to_vec();
                let asks_changed = asks_changed.to_vec();
                book.apply_changes(
                    &bids_changed,
                    &asks_changed,
                    last_update_id,
                    self.config.max_depth_levels,
                );

                // Defense in depth (SPEC_FULL C.8): a crossed book after a
                // structurally valid apply means the data itself is
                // corrupt, not just out of sequence.
                if book.is_crossed() {
                    self.lifecycle = BookLifecycle::Resyncing;
                    return Err(Error::ProtocolError {
                        key: self.key.clone(),
                        reason: "book crossed after applying a continuous delta".to_string(),
                    });
                }

                if let Some(remote_checksum) = self.strategy.checksum(&raw) {
                    let local = book.checksum(self.strategy.checksum_depth());
                    if local != remote_checksum {
                        self.lifecycle = BookLifecycle::Resyncing;
                        return Err(Error::ChecksumMismatch {
                            key: self.key.clone(),
                            local,
                            remote: remote_checksum,
                        });
                    }
                }

                Ok(vec![BookEmission::Delta(OrderBookDelta {
                    key: self.key.clone(),
                    first_update_id,
                    last_update_id,
                    bids_changed,
                    asks_changed,
                    event_time: ingest_time,
                    ingest_time,
                })])
            }
        }
    }

    /// Forces a transition to `Resyncing`, e.g. on `UpstreamDisconnected`
    /// or sustained `BusBackpressure` (§8 Scenario E).
    pub fn force_resync(&mut self) {
        if self.lifecycle != BookLifecycle::Failed {
            self.lifecycle = BookLifecycle::Resyncing;
        }
    }

    /// Records one publish-timeout on the depth path; once
    /// `backpressure_threshold` consecutive timeouts accrue, forces a
    /// resync (§8 Scenario E) and resets the counter.
    pub fn record_publish_backpressure(&mut self) -> bool {
        self.consecutive_backpressure += 1;
        if self.consecutive_backpressure >= self.config.backpressure_threshold {
            self.consecutive_backpressure = 0;
            self.force_resync();
            true
        } else {
            false
        }
    }

    pub fn record_publish_success(&mut self) {
        self.consecutive_backpressure = 0;
    }

    /// §4.1 backoff/attempts bookkeeping: prunes attempts older than
    /// `resync_window` and returns whether the manager should escalate to
    /// `Failed` instead of attempting again.
    fn note_resync_attempt(&mut self) -> bool {
        let now = Instant::now();
        self.resync_attempts
            .retain(|t| now.duration_since(*t) <= self.config.resync_window);
        self.resync_attempts.push_back(now);
        self.resync_attempts.len() as u32 > self.config.max_resync_attempts
    }

    /// Fetches a fresh snapshot via `source` and replays the buffered tail
    /// (§4.1 "Gap handling and buffering", Resyncing -> Synced). On
    /// success, returns the new `Snapshot` emission followed by any deltas
    /// replayed from the buffer.
    pub async fn resync(
        &mut self,
        source: &(dyn SnapshotSource),
        ingest_time: DateTime<Utc>,
    ) -> std::result::Result<Vec<BookEmission>, Error> {
        self.lifecycle = BookLifecycle::Resyncing;

        if self.note_resync_attempt() {
            self.lifecycle = BookLifecycle::Failed;
            return Err(Error::ResyncAttemptsExhausted {
                key: self.key.clone(),
            });
        }

        let snapshot = source
            .fetch_snapshot(&self.key, self.config.max_depth_levels)
            .await
            .map_err(|source| Error::SnapshotFetch {
                key: self.key.clone(),
                source,
            })?;

        let mut book = Book::from_snapshot(
            self.key.clone(),
            snapshot.last_update_id,
            snapshot.bids,
            snapshot.asks,
            snapshot.snapshot_time,
            self.config.max_depth_levels,
        );

        let mut emissions = Vec::new();
        let buffered: Vec<_> = self.buffer.drain(..).collect();
        let mut qualified = false;

        for raw in buffered {
            let continuity = if !qualified {
                self.strategy.qualifies_as_first(&raw, book.last_update_id)
            } else {
                self.strategy.continuity(&raw, book.last_update_id)
            };

            match continuity {
                Continuity::Stale => continue,
                Continuity::Gap => {
                    // Can't bridge the gap from buffered history alone;
                    // leave the rest of the buffer for the next resync
                    // cycle rather than apply out-of-order data.
                    self.buffer.push_back(raw);
                    break;
                }
                Continuity::Continues => {
                    qualified = true;
                    let (first_update_id, last_update_id) = self.strategy.update_id_range(&raw);
                    let (bids_changed, asks_changed) = self.strategy.levels(&raw);
                    let bids_changed = bids_changed.to_vec();
                    let asks_changed = asks_changed.to_vec();
                    book.apply_changes(
                        &bids_changed,
                        &asks_changed,
                        last_update_id,
                        self.config.max_depth_levels,
                    );
                    emissions.push(BookEmission::Delta(OrderBookDelta {
                        key: self.key.clone(),
                        first_update_id,
                        last_update_id,
                        bids_changed,
                        asks_changed,
                        event_time: ingest_time,
                        ingest_time,
                    }));
                }
            }
        }

        let snapshot_emission = BookEmission::Snapshot(book.to_snapshot(ingest_time));
        self.book = Some(book);
        self.lifecycle = BookLifecycle::Synced;
        self.consecutive_backpressure = 0;

        // §4.1 Output contract: snapshot is emitted first, deltas after.
        let mut out = vec![snapshot_emission];
        out.extend(emissions);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Exchange, MarketType, PriceLevel};
    use crate::orderbook::strategy::BinanceStrategy;
    use rust_decimal::Decimal;

    fn key() -> InstrumentKey {
        InstrumentKey::new(Exchange::Binance, MarketType::Spot, "BTC/USDT")
    }

    fn level(p: i64, q: i64) -> PriceLevel {
        PriceLevel {
            price: Decimal::from(p),
            quantity: Decimal::from(q),
        }
    }

    fn depth(first: i64, last: i64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> RawDepthEvent {
        RawDepthEvent::Binance {
            symbol: "BTCUSDT".into(),
            first_update_id: first,
            last_update_id: last,
            bids,
            asks,
            event_time_ms: 0,
        }
    }

    struct FixedSnapshot(RestSnapshot);

    #[async_trait]
    impl SnapshotSource for FixedSnapshot {
        async fn fetch_snapshot(
            &self,
            _key: &InstrumentKey,
            _depth: usize,
        ) -> std::result::Result<RestSnapshot, crate::wire::Error> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn scenario_a_binance_init_then_gap_forces_resync() {
        let mut mgr = OrderBookManager::new(
            key(),
            Box::new(BinanceStrategy),
            OrderBookConfig::default(),
        );

        // Buffer two events while Init (before any snapshot is fetched).
        mgr.ingest(depth(100, 110, vec![], vec![]), Utc::now()).unwrap();
        mgr.ingest(depth(111, 115, vec![], vec![]), Utc::now()).unwrap();

        let source = FixedSnapshot(RestSnapshot {
            last_update_id: 105,
            bids: vec![level(30000, 1), level(29999, 2)],
            asks: vec![level(30001, 1)],
            snapshot_time: Utc::now(),
        });

        let emissions = mgr.resync(&source, Utc::now()).await.unwrap();
        assert_eq!(mgr.lifecycle(), BookLifecycle::Synced);
        // snapshot + 1 delta (E1 qualifies as first, E2 continues from it).
        assert_eq!(emissions.len(), 3);
        assert_eq!(mgr.book().unwrap().last_update_id, 115);

        // A gap (116 missing) now forces Resyncing.
        let err = mgr
            .ingest(depth(117, 120, vec![], vec![]), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::GapDetected { .. }));
        assert_eq!(mgr.lifecycle(), BookLifecycle::Resyncing);
    }

    #[tokio::test]
    async fn buffer_overflow_forces_resync() {
        let mut config = OrderBookConfig::default();
        config.buffer_cap = 2;
        let mut mgr = OrderBookManager::new(key(), Box::new(BinanceStrategy), config);

        mgr.ingest(depth(1, 2, vec![], vec![]), Utc::now()).unwrap();
        mgr.ingest(depth(3, 4, vec![], vec![]), Utc::now()).unwrap();
        // capacity-1 (i.e. the 2nd push) accepts without signalling overflow.
        let err = mgr.ingest(depth(5, 6, vec![], vec![]), Utc::now());
        assert!(matches!(err, Err(Error::BufferOverflow { .. })));
        assert_eq!(mgr.lifecycle(), BookLifecycle::Resyncing);
    }

    #[tokio::test]
    async fn resync_attempts_exhausted_transitions_to_failed() {
        let mut config = OrderBookConfig::default();
        config.max_resync_attempts = 1;
        config.resync_window = Duration::from_secs(120);
        let mut mgr = OrderBookManager::new(key(), Box::new(BinanceStrategy), config);

        let source = FixedSnapshot(RestSnapshot {
            last_update_id: 1,
            bids: vec![],
            asks: vec![],
            snapshot_time: Utc::now(),
        });

        mgr.resync(&source, Utc::now()).await.unwrap();
        mgr.force_resync();
        let err = mgr.resync(&source, Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::ResyncAttemptsExhausted { .. }));
        assert_eq!(mgr.lifecycle(), BookLifecycle::Failed);
    }

    #[tokio::test]
    async fn sustained_backpressure_forces_resync_after_threshold() {
        let mut config = OrderBookConfig::default();
        config.backpressure_threshold = 5;
        let mut mgr = OrderBookManager::new(key(), Box::new(BinanceStrategy), config);
        mgr.book = Some(Book::from_snapshot(key(), 1, vec![], vec![], Utc::now(), 400));
        mgr.lifecycle = BookLifecycle::Synced;

        for _ in 0..4 {
            assert!(!mgr.record_publish_backpressure());
        }
        assert!(mgr.record_publish_backpressure());
        assert_eq!(mgr.lifecycle(), BookLifecycle::Resyncing);
    }

    #[tokio::test]
    async fn crossed_book_after_apply_escalates_to_protocol_error() {
        let mut mgr = OrderBookManager::new(key(), Box::new(BinanceStrategy), OrderBookConfig::default());
        mgr.book = Some(Book::from_snapshot(
            key(),
            1,
            vec![level(100, 1)],
            vec![level(101, 1)],
            Utc::now(),
            400,
        ));
        mgr.lifecycle = BookLifecycle::Synced;

        // Pushing the bid through the ask forces a cross.
        let err = mgr
            .ingest(depth(2, 2, vec![level(102, 1)], vec![]), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolError { .. }));
        assert_eq!(mgr.lifecycle(), BookLifecycle::Resyncing);
    }
}
