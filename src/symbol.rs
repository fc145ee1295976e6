//! Per-exchange canonical symbol tables (§4.3, §9 Open Question #3).
//!
//! Normalizers "MUST NOT invent mappings for unknown symbols" — every
//! canonical/native pair is registered once, at config load, and the table
//! is validated to be a bijection (no two native symbols collide on the
//! same canonical symbol, and vice versa) before the Supervisor starts any
//! adapter.

use std::collections::HashMap;

use thiserror::Error;

use crate::model::Exchange;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolTableError {
    #[error("native symbol {native:?} already maps to canonical {existing:?}, cannot also map to {canonical:?}")]
    DuplicateNative {
        native: String,
        existing: String,
        canonical: String,
    },
    #[error("canonical symbol {canonical:?} already maps to native {existing:?}, cannot also map to {native:?}")]
    DuplicateCanonical {
        canonical: String,
        existing: String,
        native: String,
    },
}

/// A validated bijective mapping between an exchange's native symbol
/// spellings and this core's canonical symbol, for one exchange.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    native_to_canonical: HashMap<String, String>,
    canonical_to_native: HashMap<String, String>,
}

impl SymbolTable {
    pub fn builder() -> SymbolTableBuilder {
        SymbolTableBuilder::default()
    }

    /// Looks up the canonical symbol for a native spelling. Exchange-native
    /// casing is normalized to uppercase before lookup, so `btcusdt`,
    /// `BTCUSDT` and `BtcUsdt` all resolve identically; callers that already
    /// canonicalize casing themselves (e.g. OKX's dashed form) may register
    /// entries containing punctuation as-is.
    pub fn canonical(&self, native: &str) -> Option<&str> {
        self.native_to_canonical
            .get(&native.to_uppercase())
            .map(String::as_str)
    }

    pub fn native(&self, canonical: &str) -> Option<&str> {
        self.canonical_to_native.get(canonical).map(String::as_str)
    }
}

#[derive(Debug, Default)]
pub struct SymbolTableBuilder {
    entries: Vec<(String, String)>,
}

impl SymbolTableBuilder {
    pub fn insert(mut self, native: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.entries.push((native.into(), canonical.into()));
        self
    }

    pub fn build(self) -> Result<SymbolTable, SymbolTableError> {
        let mut table = SymbolTable::default();
        for (native, canonical) in self.entries {
            let native_key = native.to_uppercase();
            if let Some(existing) = table.native_to_canonical.get(&native_key) {
                if existing != &canonical {
                    return Err(SymbolTableError::DuplicateNative {
                        native: native_key,
                        existing: existing.clone(),
                        canonical,
                    });
                }
                continue;
            }
            if let Some(existing) = table.canonical_to_native.get(&canonical) {
                if existing != &native_key {
                    return Err(SymbolTableError::DuplicateCanonical {
                        canonical,
                        existing: existing.clone(),
                        native: native_key,
                    });
                }
                continue;
            }
            table
                .native_to_canonical
                .insert(native_key.clone(), canonical.clone());
            table.canonical_to_native.insert(canonical, native_key);
        }
        Ok(table)
    }
}

/// Per-exchange collection of [`SymbolTable`]s, built once at Supervisor
/// startup from config (`exchanges[*].symbols`).
#[derive(Debug, Clone, Default)]
pub struct SymbolRegistry {
    tables: HashMap<Exchange, SymbolTable>,
}

impl SymbolRegistry {
    pub fn insert(&mut self, exchange: Exchange, table: SymbolTable) {
        self.tables.insert(exchange, table);
    }

    pub fn table(&self, exchange: Exchange) -> Option<&SymbolTable> {
        self.tables.get(&exchange)
    }

    pub fn canonical(&self, exchange: Exchange, native: &str) -> Option<&str> {
        self.table(exchange).and_then(|t| t.canonical(native))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_case_insensitively() {
        let table = SymbolTable::builder()
            .insert("BTCUSDT", "BTC/USDT")
            .build()
            .unwrap();

        assert_eq!(table.canonical("btcusdt"), Some("BTC/USDT"));
        assert_eq!(table.canonical("BTCUSDT"), Some("BTC/USDT"));
        assert_eq!(table.canonical("BtcUsdt"), Some("BTC/USDT"));
        assert_eq!(table.canonical("BTC-USDT"), None);
    }

    #[test]
    fn rejects_non_bijective_mapping() {
        let err = SymbolTable::builder()
            .insert("BTCUSDT", "BTC/USDT")
            .insert("XBTUSDT", "BTC/USDT")
            .build()
            .unwrap_err();

        assert!(matches!(err, SymbolTableError::DuplicateCanonical { .. }));
    }

    #[test]
    fn unknown_native_symbol_yields_none() {
        let table = SymbolTable::builder()
            .insert("BTCUSDT", "BTC/USDT")
            .build()
            .unwrap();
        assert_eq!(table.canonical("ETHUSDT"), None);
    }
}
