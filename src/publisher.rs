//! `Publisher` (§4.5) — derives a subject and key from a canonical record
//! and hands it to the message bus. The bus itself is out of scope (§1);
//! this module defines the `Bus` trait seam the Supervisor plugs a concrete
//! transport into, plus the subject/key derivation rules.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::CanonicalRecord;

/// Default publish timeout (§4.5, §5 "Per-operation deadlines: bus publish
/// 5s").
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum Error {
    #[error("bus did not accept the publish within the timeout")]
    BusBackpressure,
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The publish contract this crate depends on; a concrete bus client (e.g.
/// a JetStream-class transport, §6) implements this. Kept minimal and
/// transport-agnostic on purpose — the specification fixes subjects/keys
/// and ordering, not a wire codec (§6).
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publishes `payload` (a self-describing structured encoding, §6) to
    /// `subject` with partition/ordering key `key`, honoring `timeout`.
    async fn publish(
        &self,
        subject: &str,
        key: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<()>;
}

/// Derives the bus subject for a canonical record (§4.5 normative scheme):
/// `market.{exchange}.{market_type}.{symbol}.{record_type}`.
pub fn subject_for(prefix: &str, record: &CanonicalRecord) -> String {
    let key = record.key();
    format!(
        "{prefix}.{}.{}.{}.{}",
        key.exchange,
        key.market_type,
        key.symbol,
        record.record_type()
    )
}

/// Derives the bus partition/ordering key (§6): `{exchange}/{market_type}/{symbol}`.
pub fn key_for(record: &CanonicalRecord) -> String {
    record.key().to_string()
}

/// Accepts canonical records, derives subject/key, serializes as
/// self-describing JSON (decimals serialize as strings via `rust_decimal`'s
/// serde support, preserving precision per §6), and forwards to `bus`.
pub struct Publisher<B: Bus> {
    bus: B,
    subject_prefix: String,
    publish_timeout: Duration,
}

impl<B: Bus> Publisher<B> {
    pub fn new(bus: B, subject_prefix: impl Into<String>) -> Self {
        Self {
            bus,
            subject_prefix: subject_prefix.into(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Publishes one canonical record. The caller is responsible for
    /// preserving per-key ordering (§5) by only ever calling this from the
    /// single producer task for that key; the Publisher does not reorder
    /// or batch across calls.
    pub async fn publish(&self, record: &CanonicalRecord) -> Result<()> {
        let subject = subject_for(&self.subject_prefix, record);
        let key = key_for(record);
        let payload = serde_json::to_vec(record)
            .map_err(|e| Error::Transport(format!("failed to serialize record: {e}")))?;
        self.bus
            .publish(&subject, &key, payload, self.publish_timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Exchange, InstrumentKey, MarketType, NormalizedTrade, Side, TimeSource};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn trade_record() -> CanonicalRecord {
        CanonicalRecord::Trade(NormalizedTrade {
            key: InstrumentKey::new(Exchange::Okx, MarketType::Linear, "BTC-USDT-SWAP"),
            trade_id: Some("1".into()),
            price: dec!(100),
            quantity: dec!(1),
            quote_quantity: dec!(100),
            side: Side::Buy,
            is_buyer_maker: false,
            trade_time: chrono::Utc::now(),
            ingest_time: chrono::Utc::now(),
            time_source: TimeSource::Exchange,
        })
    }

    #[test]
    fn subject_follows_normative_scheme() {
        let subject = subject_for("market", &trade_record());
        assert_eq!(subject, "market.okx.linear.BTC-USDT-SWAP.trade");
    }

    #[test]
    fn key_follows_exchange_market_symbol_scheme() {
        assert_eq!(key_for(&trade_record()), "okx/linear/BTC-USDT-SWAP");
    }

    struct CountingBus {
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl Bus for CountingBus {
        async fn publish(
            &self,
            _subject: &str,
            _key: &str,
            _payload: Vec<u8>,
            _timeout: Duration,
        ) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(Error::BusBackpressure);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_round_trips_through_bus() {
        let calls = Arc::new(AtomicUsize::new(0));
        let publisher = Publisher::new(
            CountingBus {
                calls: calls.clone(),
                fail_first: false,
            },
            "market",
        );
        publisher.publish(&trade_record()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backpressure_error_surfaces_to_caller() {
        let publisher = Publisher::new(
            CountingBus {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_first: true,
            },
            "market",
        );
        let err = publisher.publish(&trade_record()).await.unwrap_err();
        assert!(matches!(err, Error::BusBackpressure));
    }
}
