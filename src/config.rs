//! Collector configuration (§6) — a TOML file layered with `MARKETPRISM_`
//! environment overrides via the `config` crate, the same two-source
//! pattern used across the ambient stack (SPEC_FULL B), deserialized into
//! serde structs and checked by an explicit [`CollectorConfig::validate`]
//! pass rather than relying on deserialization alone to catch mistakes.

use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::model::{Exchange, MarketType};
use crate::orderbook::OrderBookConfig;
use crate::ratelimiter::RateLimiterConfig;
use crate::symbol::{SymbolRegistry, SymbolTable, SymbolTableError};
use crate::wire::DataType;

/// Selects the config file path (§6).
pub const CONFIG_PATH_ENV: &str = "MARKETPRISM_CONFIG";
/// `{debug, info, warn, error}` (§6).
pub const LOG_LEVEL_ENV: &str = "MARKETPRISM_LOG_LEVEL";

const ENV_PREFIX: &str = "MARKETPRISM";
const DEFAULT_CONFIG_PATH: &str = "collector.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolMapping {
    /// The exchange's own spelling, e.g. `BTCUSDT`, `BTC-USDT-SWAP`.
    pub native: String,
    /// This core's cross-exchange identifier, e.g. `BTC/USDT`.
    pub canonical: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub exchange: Exchange,
    pub market_type: MarketType,
    pub symbols: Vec<SymbolMapping>,
    pub data_types: Vec<DataType>,
    /// §9 Open Question #2: checksum verification is config-gated
    /// independently of sequence continuity, which is always enforced.
    #[serde(default = "default_true")]
    pub okx_checksum_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ExchangeConfig {
    pub fn symbol_table(&self) -> Result<SymbolTable, SymbolTableError> {
        let mut builder = SymbolTable::builder();
        for mapping in &self.symbols {
            builder = builder.insert(mapping.native.clone(), mapping.canonical.clone());
        }
        builder.build()
    }

    pub fn canonical_symbols(&self) -> Vec<String> {
        self.symbols.iter().map(|m| m.canonical.clone()).collect()
    }

    pub fn has_data_type(&self, data_type: DataType) -> bool {
        self.data_types.contains(&data_type)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct OrderBookSettings {
    pub max_depth_levels: usize,
    pub buffer_cap: usize,
    pub max_resync_attempts: u32,
    pub resync_window_seconds: u64,
    pub backpressure_threshold: u32,
    pub drain_timeout_seconds: u64,
}

impl Default for OrderBookSettings {
    fn default() -> Self {
        let defaults = OrderBookConfig::default();
        Self {
            max_depth_levels: defaults.max_depth_levels,
            buffer_cap: defaults.buffer_cap,
            max_resync_attempts: defaults.max_resync_attempts,
            resync_window_seconds: defaults.resync_window.as_secs(),
            backpressure_threshold: defaults.backpressure_threshold,
            drain_timeout_seconds: 10,
        }
    }
}

impl OrderBookSettings {
    pub fn to_manager_config(self) -> OrderBookConfig {
        OrderBookConfig {
            max_depth_levels: self.max_depth_levels,
            buffer_cap: self.buffer_cap,
            max_resync_attempts: self.max_resync_attempts,
            resync_window: Duration::from_secs(self.resync_window_seconds),
            backpressure_threshold: self.backpressure_threshold,
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub exchange: Exchange,
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl RateLimitConfig {
    pub fn to_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(self.capacity, self.refill_per_second)
    }
}

fn default_rate_limit() -> RateLimiterConfig {
    // Conservative default shared by any exchange without an explicit
    // `rate_limits[*]` entry: 10 REST calls/sec, burst of 10.
    RateLimiterConfig::new(10, 10.0)
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub subject_prefix: String,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

fn default_publish_timeout_ms() -> u64 {
    crate::publisher::DEFAULT_PUBLISH_TIMEOUT.as_millis() as u64
}

impl BusConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Polling cadences for REST-only feeds (§6 `schedules`). Funding/OI are
/// also pushed over WS on OKX/Deribit (§6's channel lists); these cadences
/// govern only the REST jobs the Supervisor schedules itself (currently
/// Binance funding/open-interest/long-short-ratio, which have no
/// streaming equivalent).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub funding_seconds: u64,
    pub open_interest_seconds: u64,
    pub long_short_ratio_seconds: u64,
    pub vol_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            funding_seconds: 60,
            open_interest_seconds: 900,
            long_short_ratio_seconds: 300,
            vol_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub orderbook: OrderBookSettings,
    #[serde(default)]
    pub rate_limits: Vec<RateLimitConfig>,
    pub bus: BusConfig,
    #[serde(default)]
    pub schedules: ScheduleConfig,
}

impl CollectorConfig {
    /// Loads config from `explicit_path`, falling back to
    /// `MARKETPRISM_CONFIG`, then `collector.toml`, layering
    /// `MARKETPRISM_*` environment overrides on top, and validates the
    /// result.
    pub fn load(explicit_path: Option<&str>) -> anyhow::Result<Self> {
        let path = explicit_path
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let source = config::Config::builder()
            .add_source(config::File::with_name(&path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("loading config from {path:?}"))?;

        let cfg: CollectorConfig = source
            .try_deserialize()
            .context("deserializing collector config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Explicit validation pass beyond what deserialization alone catches
    /// (SPEC_FULL C.1): every exchange has a non-empty, bijective symbol
    /// table and at least one subscribed data type.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.exchanges.is_empty() {
            bail!("at least one [[exchanges]] entry is required");
        }
        if self.bus.subject_prefix.trim().is_empty() {
            bail!("bus.subject_prefix must not be empty");
        }
        for exchange_cfg in &self.exchanges {
            if exchange_cfg.symbols.is_empty() {
                bail!("{} has no configured symbols", exchange_cfg.exchange);
            }
            if exchange_cfg.data_types.is_empty() {
                bail!("{} has no configured data_types", exchange_cfg.exchange);
            }
            exchange_cfg.symbol_table().with_context(|| {
                format!(
                    "symbol table for {} is not a bijection",
                    exchange_cfg.exchange
                )
            })?;
        }
        Ok(())
    }

    pub fn symbol_registry(&self) -> anyhow::Result<SymbolRegistry> {
        let mut registry = SymbolRegistry::default();
        for exchange_cfg in &self.exchanges {
            let table = exchange_cfg.symbol_table().with_context(|| {
                format!("symbol table for {} is not a bijection", exchange_cfg.exchange)
            })?;
            registry.insert(exchange_cfg.exchange, table);
        }
        Ok(registry)
    }

    pub fn rate_limit_for(&self, exchange: Exchange) -> RateLimiterConfig {
        self.rate_limits
            .iter()
            .find(|r| r.exchange == exchange)
            .map(RateLimitConfig::to_limiter_config)
            .unwrap_or_else(default_rate_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CollectorConfig {
        CollectorConfig {
            exchanges: vec![ExchangeConfig {
                exchange: Exchange::Binance,
                market_type: MarketType::Spot,
                symbols: vec![SymbolMapping {
                    native: "BTCUSDT".into(),
                    canonical: "BTC/USDT".into(),
                }],
                data_types: vec![DataType::Trade, DataType::Depth],
                okx_checksum_enabled: true,
            }],
            orderbook: OrderBookSettings::default(),
            rate_limits: vec![],
            bus: BusConfig {
                subject_prefix: "market".into(),
                publish_timeout_ms: 5000,
            },
            schedules: ScheduleConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        sample().validate().unwrap();
    }

    #[test]
    fn empty_exchanges_fails_validation() {
        let mut cfg = sample();
        cfg.exchanges.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn colliding_symbol_mapping_fails_validation() {
        let mut cfg = sample();
        cfg.exchanges[0].symbols.push(SymbolMapping {
            native: "XBTUSDT".into(),
            canonical: "BTC/USDT".into(),
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rate_limit_falls_back_to_default_when_unconfigured() {
        let cfg = sample();
        let limiter = cfg.rate_limit_for(Exchange::Binance);
        assert_eq!(limiter.capacity, 10);
    }
}
