//! Bounded-channel overflow policies (§5) shared by the Supervisor's wiring
//! between `WireAdapter`, `OrderBookManager`, and `Publisher`. Each policy
//! is a thin wrapper over `tokio::sync::mpsc::Sender::try_send`/`send` so
//! the call site reads as the spec's own vocabulary
//! (`drop_oldest_with_counter`, `trigger_resync`, `block_with_timeout`)
//! rather than repeating the same `match try_send` at every call site.

use std::time::Duration;

use tokio::sync::mpsc;

/// Outcome of attempting to hand one item to a bounded channel under an
/// overflow policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The channel was full and the policy dropped something (the new item,
    /// or a prior one it made room for) to make progress.
    Dropped,
    /// The channel was full and stayed full for the whole timeout.
    TimedOut,
    /// The receiver has been dropped; the channel is dead.
    Closed,
}

/// WireAdapter -> Normalizer channel for trade/ticker (§5): on overflow,
/// drop the item and keep going, incrementing a counter at the call site.
pub async fn send_drop_oldest<T>(tx: &mpsc::Sender<T>, item: T) -> SendOutcome {
    match tx.try_send(item) {
        Ok(()) => SendOutcome::Sent,
        Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Dropped,
        Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
    }
}

/// OrderBookManager -> Publisher channel (§5): block until the timeout,
/// since silently dropping a depth delta would corrupt the book.
pub async fn send_block_with_timeout<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    timeout: Duration,
) -> SendOutcome {
    match tokio::time::timeout(timeout, tx.send(item)).await {
        Ok(Ok(())) => SendOutcome::Sent,
        Ok(Err(_)) => SendOutcome::Closed,
        Err(_elapsed) => SendOutcome::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drop_oldest_reports_dropped_on_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        assert_eq!(send_drop_oldest(&tx, 1).await, SendOutcome::Sent);
        assert_eq!(send_drop_oldest(&tx, 2).await, SendOutcome::Dropped);
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn block_with_timeout_times_out_on_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        tx.send(1).await.unwrap();
        let outcome = send_block_with_timeout(&tx, 2, Duration::from_millis(20)).await;
        assert_eq!(outcome, SendOutcome::TimedOut);
    }

    #[tokio::test]
    async fn closed_channel_is_reported_distinctly() {
        let (tx, rx) = mpsc::channel::<i32>(1);
        drop(rx);
        assert_eq!(send_drop_oldest(&tx, 1).await, SendOutcome::Closed);
    }
}
