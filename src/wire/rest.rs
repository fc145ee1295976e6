//! Rate-limited REST snapshot fetching (§4.1, §4.4) — bridges a
//! [`WireAdapter`]'s `fetch_snapshot` to
//! [`crate::orderbook::manager::SnapshotSource`], acquiring a
//! [`crate::ratelimiter::RateLimiter`] token before every REST call so
//! resync traffic across every symbol on one exchange shares a single
//! budget, as §4.4 specifies ("Token-bucket per (exchange, endpoint_class)").

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::model::InstrumentKey;
use crate::orderbook::manager::SnapshotSource;
use crate::ratelimiter::RateLimiter;
use crate::wire::raw::RestSnapshot;
use crate::wire::{Error, WireAdapter};

/// REST fetch deadline (§5 "Per-operation deadlines: REST fetch 5s").
pub const REST_FETCH_DEADLINE: Duration = Duration::from_secs(5);

/// Gates one [`WireAdapter`]'s `fetch_snapshot` behind a shared
/// [`RateLimiter`]. The adapter is wrapped in a `tokio::sync::Mutex`
/// because `fetch_snapshot` only needs `&self` on the adapter but the
/// trait requires `&mut self` for `run`/`connect`/`close`; snapshot fetches
/// from multiple `OrderBookManager`s for symbols on the same exchange are
/// serialized through the same adapter instance rather than opening one
/// REST client per symbol.
pub struct RateLimitedSnapshotSource {
    adapter: Arc<Mutex<dyn WireAdapter>>,
    rate_limiter: Arc<RateLimiter>,
    depth: usize,
}

impl RateLimitedSnapshotSource {
    pub fn new(
        adapter: Arc<Mutex<dyn WireAdapter>>,
        rate_limiter: Arc<RateLimiter>,
        depth: usize,
    ) -> Self {
        Self {
            adapter,
            rate_limiter,
            depth,
        }
    }
}

#[async_trait]
impl SnapshotSource for RateLimitedSnapshotSource {
    async fn fetch_snapshot(
        &self,
        key: &InstrumentKey,
        depth: usize,
    ) -> std::result::Result<RestSnapshot, Error> {
        self.rate_limiter
            .acquire(REST_FETCH_DEADLINE)
            .await
            .map_err(Error::RateLimited)?;

        let adapter = self.adapter.lock().await;
        adapter.fetch_snapshot(&key.symbol, depth.max(self.depth)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Exchange, MarketType, PriceLevel};
    use crate::ratelimiter::RateLimiterConfig;
    use crate::wire::{DataType, Result, Subscription};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct StubAdapter;

    #[async_trait]
    impl WireAdapter for StubAdapter {
        fn exchange(&self) -> Exchange {
            Exchange::Binance
        }
        async fn connect(&mut self, _subscriptions: &[Subscription]) -> Result<()> {
            Ok(())
        }
        async fn run(&mut self, _tx: mpsc::Sender<crate::wire::raw::RawEvent>) -> Result<()> {
            Ok(())
        }
        async fn fetch_snapshot(&self, _native_symbol: &str, _depth: usize) -> Result<RestSnapshot> {
            Ok(RestSnapshot {
                last_update_id: 42,
                bids: vec![PriceLevel {
                    price: 1.into(),
                    quantity: 1.into(),
                }],
                asks: vec![],
                snapshot_time: chrono::Utc::now(),
            })
        }
        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn gates_fetch_through_rate_limiter() {
        let source = RateLimitedSnapshotSource::new(
            Arc::new(Mutex::new(StubAdapter)),
            Arc::new(RateLimiter::new(RateLimiterConfig::new(1, 1.0))),
            400,
        );
        let key = InstrumentKey::new(Exchange::Binance, MarketType::Spot, "BTCUSDT");
        let snap = source.fetch_snapshot(&key, 400).await.unwrap();
        assert_eq!(snap.last_update_id, 42);
    }
}
