use serde::{Deserialize, Serialize};

/// Construction-time configuration of a ledger's token surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Human readable token name.
    pub name: String,
    /// Short ticker symbol.
    pub symbol: String,
    /// Display decimals; informational only, the ledger stores raw units.
    pub decimals: u8,
    /// Whether transfer/approve operations are accepted. Mint and burn are
    /// controller operations and ignore this gate.
    pub transfers_enabled: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            name: "Tally Token".to_string(),
            symbol: "TLY".to_string(),
            decimals: 18,
            transfers_enabled: true,
        }
    }
}

impl TokenConfig {
    pub fn named(name: &str, symbol: &str) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            ..Self::default()
        }
    }
}
