//! `marketprism-collector` — normalizes live order book, trade, ticker,
//! funding, open-interest, liquidation, long/short-ratio and volatility-index
//! feeds from Binance, OKX and Deribit into a canonical schema and republishes
//! them to a message bus.
//!
//! The library surface is the pipeline itself ([`model`], [`orderbook`],
//! [`normalize`], [`wire`], [`ratelimiter`], [`publisher`], [`supervisor`]);
//! `src/bin/collector.rs` is a thin CLI that wires configuration and logging
//! around a [`supervisor::Supervisor`]. The bus transport is out of scope —
//! callers provide their own [`publisher::Bus`] implementation.

pub mod backoff;
pub mod chan;
pub mod config;
pub mod decimal;
pub mod error;
pub mod health;
pub mod model;
pub mod normalize;
pub mod orderbook;
pub mod publisher;
pub mod ratelimiter;
pub mod supervisor;
pub mod symbol;
pub mod wire;

pub use config::CollectorConfig;
pub use error::FatalError;
pub use model::{CanonicalRecord, Exchange, InstrumentKey, MarketType};
pub use publisher::Bus;
pub use supervisor::Supervisor;
