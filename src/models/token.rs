use serde::{Deserialize, Serialize};

/// An ERC-20 token tracked by the aggregator.
///
/// Addresses are kept in their original checksum form; identity is
/// `(chain_id, lowercase(address))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(default)]
    pub chain_id: u64,
    #[serde(default, rename = "logoURI", skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

impl Token {
    /// Lowercase address, the map-key form of this token's identity.
    pub fn key(&self) -> String {
        self.address.to_lowercase()
    }
}
