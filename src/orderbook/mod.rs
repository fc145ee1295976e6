//! The per-instrument order book state machine and synchronizer (§4.1) —
//! the hard core of this crate.

pub mod book;
pub mod manager;
pub mod strategy;

pub use book::Book;
pub use manager::{BookEmission, OrderBookConfig, OrderBookManager, SnapshotSource};
pub use strategy::{BinanceStrategy, Continuity, DeribitStrategy, ExchangeStrategy, OkxStrategy};

use thiserror::Error;

/// Lifecycle states from §4.1: `Init -> Synced <-> Resyncing`, with
/// `Failed` terminal within a supervision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookLifecycle {
    Init,
    Synced,
    Resyncing,
    Failed,
}

/// Failure modes the manager can surface (§4.1 "Failure modes and
/// signaling"). All but `ProtocolError` drive a transition to `Resyncing`;
/// `ProtocolError` escalates straight to `Failed`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("gap detected in update-id sequence for {key}: expected continuity from {prev_last_update_id}")]
    GapDetected {
        key: crate::model::InstrumentKey,
        prev_last_update_id: i64,
    },

    #[error("REST snapshot for {key} is already stale relative to buffered stream")]
    SnapshotStale { key: crate::model::InstrumentKey },

    #[error("checksum mismatch for {key}: local={local} remote={remote}")]
    ChecksumMismatch {
        key: crate::model::InstrumentKey,
        local: i32,
        remote: i32,
    },

    #[error("depth buffer overflow for {key} (capacity {capacity})")]
    BufferOverflow {
        key: crate::model::InstrumentKey,
        capacity: usize,
    },

    #[error("protocol error for {key}: {reason}")]
    ProtocolError {
        key: crate::model::InstrumentKey,
        reason: String,
    },

    #[error("upstream disconnected while syncing {key}")]
    UpstreamDisconnected { key: crate::model::InstrumentKey },

    #[error("exceeded max_resync_attempts for {key}, entering Failed")]
    ResyncAttemptsExhausted { key: crate::model::InstrumentKey },

    #[error("failed to fetch REST snapshot for {key}: {source}")]
    SnapshotFetch {
        key: crate::model::InstrumentKey,
        #[source]
        source: crate::wire::Error,
    },
}

impl Error {
    /// Whether this error drives `Resyncing` (true for everything except
    /// `ProtocolError`, which escalates straight to `Failed`, per §4.1).
    pub fn triggers_resync(&self) -> bool {
        !matches!(self, Error::ProtocolError { .. })
    }
}
