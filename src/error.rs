//! Top-level error taxonomy (§7).
//!
//! Per-module `Error` enums (`wire::Error`, `orderbook::Error`,
//! `normalize::Error`, `ratelimiter::Error`, `publisher::Error`) cover
//! everything recoverable locally. This module holds only what's left once
//! a component gives up: the fatal kind that crosses a component boundary
//! and reaches the [`crate::supervisor::Supervisor`] (§7 "Propagation:
//! ... only fatal errors cross component boundaries").

use thiserror::Error;

use crate::model::{Exchange, InstrumentKey};

/// Fatal conditions the Supervisor must act on (§7 "Fatal" row: "Repeated
/// resync failures, auth failure, config invalid"). Everything else is
/// counted and handled inside the component that saw it.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("{exchange} authentication failed, cannot continue: {reason}")]
    Auth { exchange: Exchange, reason: String },

    #[error("{key} exhausted max_resync_attempts and is now Failed")]
    BookFailed { key: InstrumentKey },

    #[error("configuration is invalid: {0}")]
    InvalidConfig(#[from] anyhow::Error),

    #[error("startup failed: {0}")]
    Startup(String),
}

impl FatalError {
    /// Process exit code this condition maps to at startup (§6). Runtime
    /// fatals (auth failures, a book going `Failed`) do not exit the
    /// process; they degrade the affected (exchange, symbol) and are only
    /// ever turned into an exit code if they happen before `run` finishes
    /// constructing the collector.
    pub fn startup_exit_code(&self) -> i32 {
        match self {
            FatalError::InvalidConfig(_) => 2,
            _ => 3,
        }
    }
}
