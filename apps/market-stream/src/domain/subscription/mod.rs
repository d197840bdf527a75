//! Subscription Tracking
//!
//! Domain types for tracking which symbols a connection is subscribed to.
//!
//! # Design
//!
//! Every subscription is keyed by its canonical symbol (`EUR/USD`) and
//! records the provider-side spelling used on the wire (`FX:EURUSD`), so
//! that quotes the provider attributes to its own spelling can be mapped
//! back. The set is the source of truth for subscription replay after a
//! reconnect and for filtering inbound events.

use std::collections::{BTreeMap, HashMap};

// =============================================================================
// Types
// =============================================================================

/// A canonical symbol string (`EUR/USD`, `BTC/USD`).
pub type Symbol = String;

/// Crypto base assets routed to the crypto venue.
const CRYPTO_BASES: &[&str] = &["BTC", "ETH", "SOL", "XRP", "LTC", "ADA", "DOGE", "BNB"];

/// How canonical symbols are spelled for a given provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolMapping {
    /// The provider uses canonical symbols as-is.
    #[default]
    Identity,
    /// Exchange-prefixed symbols: `EUR/USD` → `FX:EURUSD`,
    /// `BTC/USD` → `BINANCE:BTCUSDT`.
    ExchangePrefixed,
}

impl SymbolMapping {
    /// Map a canonical symbol to the provider spelling.
    #[must_use]
    pub fn to_provider(&self, symbol: &str) -> String {
        match self {
            Self::Identity => symbol.to_string(),
            Self::ExchangePrefixed => exchange_prefixed(symbol),
        }
    }
}

fn exchange_prefixed(symbol: &str) -> String {
    if symbol.contains(':') {
        return symbol.to_string();
    }

    let upper = symbol.to_uppercase();
    if let Some((base, quote)) = upper.split_once('/') {
        if CRYPTO_BASES.contains(&base) {
            let quote = if quote == "USD" { "USDT" } else { quote };
            return format!("BINANCE:{base}{quote}");
        }
        return format!("FX:{base}{quote}");
    }

    if CRYPTO_BASES.iter().any(|b| upper.starts_with(b)) {
        return format!("BINANCE:{upper}");
    }

    upper
}

// =============================================================================
// Subscription Set
// =============================================================================

/// Set of active subscriptions with their provider spellings.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    mapping: SymbolMapping,
    /// Canonical → provider.
    symbols: BTreeMap<Symbol, String>,
    /// Provider → canonical.
    reverse: HashMap<String, Symbol>,
}

impl SubscriptionSet {
    /// Create an empty set using `mapping` for provider spellings.
    #[must_use]
    pub fn new(mapping: SymbolMapping) -> Self {
        Self {
            mapping,
            symbols: BTreeMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Record a subscription. Returns the provider symbol and whether the
    /// symbol was newly added.
    pub fn insert(&mut self, symbol: &str) -> (String, bool) {
        if let Some(provider) = self.symbols.get(symbol) {
            return (provider.clone(), false);
        }
        let provider = self.mapping.to_provider(symbol);
        self.symbols.insert(symbol.to_string(), provider.clone());
        self.reverse.insert(provider.clone(), symbol.to_string());
        (provider, true)
    }

    /// Remove a subscription, returning its provider symbol if present.
    pub fn remove(&mut self, symbol: &str) -> Option<String> {
        let provider = self.symbols.remove(symbol)?;
        self.reverse.remove(&provider);
        Some(provider)
    }

    /// Resolve an inbound symbol (canonical or provider spelling) to the
    /// canonical subscribed symbol.
    #[must_use]
    pub fn resolve(&self, symbol: &str) -> Option<&str> {
        if let Some((canonical, _)) = self.symbols.get_key_value(symbol) {
            return Some(canonical.as_str());
        }
        self.reverse.get(symbol).map(String::as_str)
    }

    /// Whether `symbol` (either spelling) is subscribed.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.resolve(symbol).is_some()
    }

    /// Iterate `(canonical, provider)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.symbols
            .iter()
            .map(|(canonical, provider)| (canonical.as_str(), provider.as_str()))
    }

    /// Canonical symbols in order.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.keys().cloned().collect()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Provider spelling in use.
    #[must_use]
    pub const fn mapping(&self) -> SymbolMapping {
        self.mapping
    }
}
