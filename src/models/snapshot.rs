use serde::{Deserialize, Serialize};

use super::Token;

/// Token shape exposed in snapshot responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotToken {
    pub symbol: String,
    pub name: String,
    pub address: String,
    pub decimals: u8,
    #[serde(default, rename = "logoURI", skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

impl From<&Token> for SnapshotToken {
    fn from(t: &Token) -> Self {
        Self {
            symbol: t.symbol.clone(),
            name: t.name.clone(),
            address: t.address.clone(),
            decimals: t.decimals,
            logo_uri: t.logo_uri.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub token: SnapshotToken,
    pub price_usd: f64,
    pub liquidity_usd: f64,
    pub volume_usd: f64,
    pub market_cap_usd: f64,
}

/// One paginated market snapshot for a chain. `timestamp` is ms since epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub timestamp: i64,
    pub chain: String,
    pub entries: Vec<SnapshotEntry>,
}
