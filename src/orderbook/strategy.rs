//! `ExchangeStrategy` — the pluggable per-exchange sync rule (§4.1, §9
//! design note: "Pluggable exchange adapters... a trait/interface
//! `ExchangeStrategy` with three concrete implementations selected at
//! startup by config").

use crate::model::{Exchange, PriceLevel};
use crate::wire::raw::{DepthFrameKind, RawDepthEvent};

/// Outcome of validating one incoming depth event against the book's
/// current `last_update_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// Event is older than what's already applied; discard silently.
    Stale,
    /// Event continues on directly from the current state; apply it.
    Continues,
    /// Event leaves a gap; force a resync.
    Gap,
}

pub trait ExchangeStrategy: Send + Sync + std::fmt::Debug {
    fn exchange(&self) -> Exchange;

    /// True for frames that fully replace local state rather than apply a
    /// delta (OKX/Deribit snapshot frames; Binance never sends these).
    fn is_snapshot_frame(&self, raw: &RawDepthEvent) -> bool;

    /// `(first_update_id, last_update_id)` for this event. For OKX/Deribit
    /// these are equal (`seqId`/`change_id` only, no range).
    fn update_id_range(&self, raw: &RawDepthEvent) -> (i64, i64);

    /// Checks whether `raw` is a valid qualifying *first* event to apply
    /// after a REST snapshot with `snapshot_last_update_id` (§4.1 per-
    /// exchange rules). Binance: `U <= L+1 <= u`. OKX/Deribit: the frame's
    /// previous-id must equal the snapshot's `last_update_id` exactly —
    /// identical to [`Self::continuity`]'s rule for later events.
    fn qualifies_as_first(&self, raw: &RawDepthEvent, snapshot_last_update_id: i64) -> Continuity;

    /// Checks whether `raw` is a valid continuation of `prev_last_update_id`.
    fn continuity(&self, raw: &RawDepthEvent, prev_last_update_id: i64) -> Continuity;

    /// Changed levels carried by this event.
    fn levels<'a>(&self, raw: &'a RawDepthEvent) -> (&'a [PriceLevel], &'a [PriceLevel]);

    /// Checksum present on the wire, if any and if enabled by config.
    fn checksum(&self, raw: &RawDepthEvent) -> Option<i32>;

    /// Number of top levels per side the checksum covers.
    fn checksum_depth(&self) -> usize {
        25
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceStrategy;

impl ExchangeStrategy for BinanceStrategy {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn is_snapshot_frame(&self, _raw: &RawDepthEvent) -> bool {
        false
    }

    fn update_id_range(&self, raw: &RawDepthEvent) -> (i64, i64) {
        match raw {
            RawDepthEvent::Binance {
                first_update_id,
                last_update_id,
                ..
            } => (*first_update_id, *last_update_id),
            _ => unreachable!("BinanceStrategy only receives Binance depth events"),
        }
    }

    fn qualifies_as_first(&self, raw: &RawDepthEvent, snapshot_last_update_id: i64) -> Continuity {
        let (first, last) = self.update_id_range(raw);
        if last <= snapshot_last_update_id {
            Continuity::Stale
        } else if first <= snapshot_last_update_id + 1 {
            Continuity::Continues
        } else {
            Continuity::Gap
        }
    }

    fn continuity(&self, raw: &RawDepthEvent, prev_last_update_id: i64) -> Continuity {
        let (first, last) = self.update_id_range(raw);
        if last <= prev_last_update_id {
            Continuity::Stale
        } else if first == prev_last_update_id + 1 {
            Continuity::Continues
        } else {
            Continuity::Gap
        }
    }

    fn levels<'a>(&self, raw: &'a RawDepthEvent) -> (&'a [PriceLevel], &'a [PriceLevel]) {
        match raw {
            RawDepthEvent::Binance { bids, asks, .. } => (bids, asks),
            _ => unreachable!("BinanceStrategy only receives Binance depth events"),
        }
    }

    fn checksum(&self, _raw: &RawDepthEvent) -> Option<i32> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OkxStrategy {
    pub checksum_enabled: bool,
}

impl ExchangeStrategy for OkxStrategy {
    fn exchange(&self) -> Exchange {
        Exchange::Okx
    }

    fn is_snapshot_frame(&self, raw: &RawDepthEvent) -> bool {
        matches!(
            raw,
            RawDepthEvent::Okx {
                kind: DepthFrameKind::Snapshot,
                ..
            }
        )
    }

    fn update_id_range(&self, raw: &RawDepthEvent) -> (i64, i64) {
        match raw {
            RawDepthEvent::Okx { seq_id, .. } => (*seq_id, *seq_id),
            _ => unreachable!("OkxStrategy only receives OKX depth events"),
        }
    }

    fn qualifies_as_first(&self, raw: &RawDepthEvent, snapshot_last_update_id: i64) -> Continuity {
        self.continuity(raw, snapshot_last_update_id)
    }

    fn continuity(&self, raw: &RawDepthEvent, prev_last_update_id: i64) -> Continuity {
        match raw {
            RawDepthEvent::Okx {
                seq_id,
                prev_seq_id,
                ..
            } => {
                if *seq_id <= prev_last_update_id {
                    Continuity::Stale
                } else if *prev_seq_id == prev_last_update_id {
                    Continuity::Continues
                } else {
                    Continuity::Gap
                }
            }
            _ => unreachable!("OkxStrategy only receives OKX depth events"),
        }
    }

    fn levels<'a>(&self, raw: &'a RawDepthEvent) -> (&'a [PriceLevel], &'a [PriceLevel]) {
        match raw {
            RawDepthEvent::Okx { bids, asks, .. } => (bids, asks),
            _ => unreachable!("OkxStrategy only receives OKX depth events"),
        }
    }

    fn checksum(&self, raw: &RawDepthEvent) -> Option<i32> {
        if !self.checksum_enabled {
            return None;
        }
        match raw {
            RawDepthEvent::Okx { checksum, .. } => *checksum,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeribitStrategy;

impl ExchangeStrategy for DeribitStrategy {
    fn exchange(&self) -> Exchange {
        Exchange::Deribit
    }

    fn is_snapshot_frame(&self, raw: &RawDepthEvent) -> bool {
        matches!(
            raw,
            RawDepthEvent::Deribit {
                kind: DepthFrameKind::Snapshot,
                ..
            }
        )
    }

    fn update_id_range(&self, raw: &RawDepthEvent) -> (i64, i64) {
        match raw {
            RawDepthEvent::Deribit { change_id, .. } => (*change_id, *change_id),
            _ => unreachable!("DeribitStrategy only receives Deribit depth events"),
        }
    }

    fn qualifies_as_first(&self, raw: &RawDepthEvent, snapshot_last_update_id: i64) -> Continuity {
        self.continuity(raw, snapshot_last_update_id)
    }

    fn continuity(&self, raw: &RawDepthEvent, prev_last_update_id: i64) -> Continuity {
        match raw {
            RawDepthEvent::Deribit {
                change_id,
                prev_change_id,
                ..
            } => {
                if *change_id <= prev_last_update_id {
                    Continuity::Stale
                } else if *prev_change_id == Some(prev_last_update_id) {
                    Continuity::Continues
                } else {
                    Continuity::Gap
                }
            }
            _ => unreachable!("DeribitStrategy only receives Deribit depth events"),
        }
    }

    fn levels<'a>(&self, raw: &'a RawDepthEvent) -> (&'a [PriceLevel], &'a [PriceLevel]) {
        match raw {
            RawDepthEvent::Deribit { bids, asks, .. } => (bids, asks),
            _ => unreachable!("DeribitStrategy only receives Deribit depth events"),
        }
    }

    fn checksum(&self, _raw: &RawDepthEvent) -> Option<i32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binance_event(first: i64, last: i64) -> RawDepthEvent {
        RawDepthEvent::Binance {
            symbol: "BTCUSDT".into(),
            first_update_id: first,
            last_update_id: last,
            bids: vec![],
            asks: vec![],
            event_time_ms: 0,
        }
    }

    #[test]
    fn binance_scenario_a_first_event_qualifies() {
        let strategy = BinanceStrategy;
        // REST snapshot lastUpdateId = 105; buffered E1{U=100,u=110}.
        assert_eq!(
            strategy.qualifies_as_first(&binance_event(100, 110), 105),
            Continuity::Continues
        );
    }

    #[test]
    fn binance_scenario_a_gap_detected() {
        let strategy = BinanceStrategy;
        // After last_update_id=115, E3{U=117,u=120} has a gap (116 missing).
        assert_eq!(
            strategy.continuity(&binance_event(117, 120), 115),
            Continuity::Gap
        );
    }

    #[test]
    fn binance_requires_exact_first_update_id_for_continuation() {
        let strategy = BinanceStrategy;
        assert_eq!(
            strategy.continuity(&binance_event(116, 120), 115),
            Continuity::Continues
        );
    }

    fn okx_event(seq_id: i64, prev_seq_id: i64) -> RawDepthEvent {
        RawDepthEvent::Okx {
            inst_id: "BTC-USDT".into(),
            kind: DepthFrameKind::Update,
            seq_id,
            prev_seq_id,
            checksum: None,
            bids: vec![],
            asks: vec![],
            ts_ms: 0,
        }
    }

    #[test]
    fn okx_scenario_c_style_sequence_break() {
        let strategy = OkxStrategy {
            checksum_enabled: false,
        };
        // local last_update_id = 5000, incoming prevSeqId = 5002 (mismatch).
        assert_eq!(strategy.continuity(&okx_event(5003, 5002), 5000), Continuity::Gap);
    }

    #[test]
    fn okx_checksum_disabled_still_enforces_prev_seq() {
        let strategy = OkxStrategy {
            checksum_enabled: false,
        };
        assert_eq!(strategy.checksum(&okx_event(5001, 5000)), None);
        assert_eq!(strategy.continuity(&okx_event(5001, 5000), 5000), Continuity::Continues);
    }

    fn deribit_event(change_id: i64, prev_change_id: Option<i64>) -> RawDepthEvent {
        RawDepthEvent::Deribit {
            instrument_name: "BTC-PERPETUAL".into(),
            kind: DepthFrameKind::Update,
            change_id,
            prev_change_id,
            bids: vec![],
            asks: vec![],
            timestamp_ms: 0,
        }
    }

    #[test]
    fn deribit_scenario_c_sequence_break() {
        let strategy = DeribitStrategy;
        assert_eq!(
            strategy.continuity(&deribit_event(5003, Some(5002)), 5000),
            Continuity::Gap
        );
    }
}
