//! The order book data structure: two price-ordered vectors of levels, plus
//! the pure apply/truncate/checksum operations common to every exchange
//! strategy (§4.1 "Apply semantics (common)").
//!
//! A `BTreeMap`-of-levels would also work; a sorted `Vec` is chosen because
//! `max_depth_levels` is small (hundreds) and updates touch only a handful
//! of levels per message, so linear search + `Vec::insert`/`remove` beats
//! tree rebalancing in practice — the same small-N fast path call-out in
//! §9's design notes.

use chrono::Utc;
use rust_decimal::Decimal;

use crate::model::{InstrumentKey, OrderBook, OrderBookSnapshot, PriceLevel};

/// One side of the book (bids sort descending, asks ascending).
#[derive(Debug, Clone, Default)]
pub struct Side {
    levels: Vec<PriceLevel>,
    descending: bool,
}

impl Side {
    pub fn bids() -> Self {
        Self {
            levels: Vec::new(),
            descending: true,
        }
    }

    pub fn asks() -> Self {
        Self {
            levels: Vec::new(),
            descending: false,
        }
    }

    pub fn levels(&self) -> &[PriceLevel] {
        &self.levels
    }

    fn position(&self, price: Decimal) -> Result<usize, usize> {
        if self.descending {
            self.levels
                .binary_search_by(|l| price.cmp(&l.price))
        } else {
            self.levels.binary_search_by(|l| l.price.cmp(&price))
        }
    }

    /// Applies one changed level: removes it if quantity is zero, else
    /// inserts/replaces it in sorted order.
    pub fn apply(&mut self, level: PriceLevel) {
        match self.position(level.price) {
            Ok(idx) => {
                if level.is_removal() {
                    self.levels.remove(idx);
                } else {
                    self.levels[idx].quantity = level.quantity;
                }
            }
            Err(idx) => {
                if !level.is_removal() {
                    self.levels.insert(idx, level);
                }
            }
        }
    }

    pub fn truncate(&mut self, max_depth_levels: usize) {
        self.levels.truncate(max_depth_levels);
    }

    pub fn replace(&mut self, mut levels: Vec<PriceLevel>) {
        levels.retain(|l| !l.is_removal());
        if self.descending {
            levels.sort_by(|a, b| b.price.cmp(&a.price));
        } else {
            levels.sort_by(|a, b| a.price.cmp(&b.price));
        }
        self.levels = levels;
    }
}

/// Mutable working copy of an [`OrderBook`], used internally by
/// [`crate::orderbook::manager::OrderBookManager`]. Converted to/from the
/// immutable [`OrderBook`] emitted to callers.
#[derive(Debug, Clone)]
pub struct Book {
    pub key: InstrumentKey,
    pub last_update_id: i64,
    pub bids: Side,
    pub asks: Side,
    pub snapshot_time: chrono::DateTime<Utc>,
}

impl Book {
    pub fn from_snapshot(
        key: InstrumentKey,
        last_update_id: i64,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        snapshot_time: chrono::DateTime<Utc>,
        max_depth_levels: usize,
    ) -> Self {
        let mut b = Side::bids();
        b.replace(bids);
        b.truncate(max_depth_levels);
        let mut a = Side::asks();
        a.replace(asks);
        a.truncate(max_depth_levels);
        Self {
            key,
            last_update_id,
            bids: b,
            asks: a,
            snapshot_time,
        }
    }

    /// Applies one batch of changed levels atomically (§4.1 "Apply all
    /// bids/asks changes atomically"), truncates both sides to
    /// `max_depth_levels` preserving best prices, and advances
    /// `last_update_id`.
    pub fn apply_changes(
        &mut self,
        bids_changed: &[PriceLevel],
        asks_changed: &[PriceLevel],
        new_last_update_id: i64,
        max_depth_levels: usize,
    ) {
        for &level in bids_changed {
            self.bids.apply(level);
        }
        for &level in asks_changed {
            self.asks.apply(level);
        }
        self.bids.truncate(max_depth_levels);
        self.asks.truncate(max_depth_levels);
        self.last_update_id = new_last_update_id;
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.levels().first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.levels().first().map(|l| l.price)
    }

    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b >= a,
            _ => false,
        }
    }

    pub fn to_order_book(&self) -> OrderBook {
        OrderBook {
            key: self.key.clone(),
            last_update_id: self.last_update_id,
            bids: self.bids.levels().to_vec(),
            asks: self.asks.levels().to_vec(),
            snapshot_time: self.snapshot_time,
        }
    }

    pub fn to_snapshot(&self, ingest_time: chrono::DateTime<Utc>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            key: self.key.clone(),
            last_update_id: self.last_update_id,
            bids: self.bids.levels().to_vec(),
            asks: self.asks.levels().to_vec(),
            snapshot_time: self.snapshot_time,
            ingest_time,
        }
    }

    /// CRC32-style checksum over the top `depth` levels per side, in the
    /// interleaved `bid[0] ask[0] bid[1] ask[1] ...` order OKX documents,
    /// each level rendered as `price:quantity`. Exchange-specific in detail
    /// (OKX uses CRC32 of the joined string); this implementation follows
    /// that documented construction so mismatches are detected the same way
    /// OKX's own reference checksum would flag them.
    pub fn checksum(&self, depth: usize) -> i32 {
        let mut parts = Vec::with_capacity(depth * 2);
        for i in 0..depth {
            if let Some(l) = self.bids.levels().get(i) {
                parts.push(format!("{}:{}", l.price, l.quantity));
            }
            if let Some(l) = self.asks.levels().get(i) {
                parts.push(format!("{}:{}", l.price, l.quantity));
            }
        }
        let joined = parts.join(":");
        crc32fast::hash(joined.as_bytes()) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Exchange, MarketType};

    fn key() -> InstrumentKey {
        InstrumentKey::new(Exchange::Binance, MarketType::Spot, "BTC/USDT")
    }

    fn level(p: i64, q: i64) -> PriceLevel {
        PriceLevel {
            price: Decimal::from(p),
            quantity: Decimal::from(q),
        }
    }

    #[test]
    fn apply_removes_zero_quantity_levels() {
        let mut book = Book::from_snapshot(
            key(),
            1,
            vec![level(100, 1), level(99, 2)],
            vec![level(101, 1)],
            Utc::now(),
            400,
        );
        book.apply_changes(&[level(99, 0)], &[], 2, 400);
        assert_eq!(book.bids.levels().len(), 1);
        assert_eq!(book.bids.levels()[0].price, Decimal::from(100));
    }

    #[test]
    fn truncate_preserves_best_prices() {
        let mut book = Book::from_snapshot(key(), 1, vec![], vec![], Utc::now(), 2);
        book.apply_changes(
            &[level(100, 1), level(99, 1), level(98, 1)],
            &[],
            2,
            2,
        );
        let prices: Vec<_> = book.bids.levels().iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![Decimal::from(100), Decimal::from(99)]);
    }

    #[test]
    fn never_retains_zero_quantity_levels_after_replace() {
        let book = Book::from_snapshot(
            key(),
            1,
            vec![level(100, 1), level(99, 0)],
            vec![],
            Utc::now(),
            400,
        );
        assert_eq!(book.bids.levels().len(), 1);
    }

    #[test]
    fn checksum_is_deterministic_and_changes_with_state() {
        let book_a = Book::from_snapshot(
            key(),
            1,
            vec![level(100, 1), level(99, 2)],
            vec![level(101, 1)],
            Utc::now(),
            400,
        );
        let book_b = Book::from_snapshot(
            key(),
            1,
            vec![level(100, 1), level(99, 3)],
            vec![level(101, 1)],
            Utc::now(),
            400,
        );
        assert_eq!(book_a.checksum(25), book_a.checksum(25));
        assert_ne!(book_a.checksum(25), book_b.checksum(25));
    }

    #[test]
    fn bids_sorted_descending_asks_ascending() {
        let book = Book::from_snapshot(
            key(),
            1,
            vec![level(98, 1), level(100, 1), level(99, 1)],
            vec![level(103, 1), level(101, 1), level(102, 1)],
            Utc::now(),
            400,
        );
        let bid_prices: Vec<_> = book.bids.levels().iter().map(|l| l.price).collect();
        let ask_prices: Vec<_> = book.asks.levels().iter().map(|l| l.price).collect();
        assert_eq!(
            bid_prices,
            vec![Decimal::from(100), Decimal::from(99), Decimal::from(98)]
        );
        assert_eq!(
            ask_prices,
            vec![Decimal::from(101), Decimal::from(102), Decimal::from(103)]
        );
    }
}
