//! Merged token catalog: the built-in static list per chain, extended at
//! startup with remotely fetched token lists (tokenlist.org schema).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::AggregatorError;
use crate::models::{normalize_address, Token};
use crate::tokens;

fn list_url(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        tokens::ETHEREUM_CHAIN_ID => Some(
            "https://raw.githubusercontent.com/trustwallet/assets/master/blockchains/ethereum/tokenlist.json",
        ),
        tokens::POLYGON_CHAIN_ID => Some(
            "https://unpkg.com/quickswap-default-token-list@latest/build/quickswap-default.tokenlist.json",
        ),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct TokenListFile {
    tokens: Vec<TokenListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenListEntry {
    #[serde(default)]
    chain_id: Option<u64>,
    address: String,
    symbol: String,
    name: String,
    decimals: u8,
    #[serde(default, rename = "logoURI")]
    logo_uri: Option<String>,
}

/// Static list ++ dynamic list, deduplicated by lowercase address with the
/// first occurrence winning, so configured tokens keep their position.
fn merge_lists(static_list: Vec<Token>, dynamic: Vec<Token>) -> Vec<Token> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(static_list.len() + dynamic.len());
    for token in static_list.into_iter().chain(dynamic) {
        if seen.insert(token.key()) {
            merged.push(token);
        }
    }
    merged
}

/// The merged token list per chain. Readers get a cheap `Arc` clone;
/// refreshes swap the whole list copy-on-write.
pub struct TokenCatalog {
    client: Client,
    merged: RwLock<HashMap<u64, Arc<Vec<Token>>>>,
    decimals: RwLock<HashMap<(u64, String), u8>>,
}

impl TokenCatalog {
    pub fn new(chain_ids: &[u64], fetch_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(fetch_timeout)
            .build()
            .unwrap();
        let catalog = Self {
            client,
            merged: RwLock::new(HashMap::new()),
            decimals: RwLock::new(HashMap::new()),
        };
        for &chain_id in chain_ids {
            catalog.install(chain_id, tokens::static_tokens(chain_id));
        }
        catalog
    }

    fn install(&self, chain_id: u64, list: Vec<Token>) {
        {
            let mut decimals = self.decimals.write().unwrap();
            for t in &list {
                decimals.insert((chain_id, t.key()), t.decimals);
            }
        }
        self.merged
            .write()
            .unwrap()
            .insert(chain_id, Arc::new(list));
    }

    pub fn tokens(&self, chain_id: u64) -> Arc<Vec<Token>> {
        self.merged
            .read()
            .unwrap()
            .get(&chain_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn decimals(&self, chain_id: u64, address: &str) -> Option<u8> {
        self.decimals
            .read()
            .unwrap()
            .get(&(chain_id, normalize_address(address)))
            .copied()
    }

    /// Fetch and merge the remote list for every chain that has one.
    /// Failures degrade to whatever list is already installed.
    pub async fn refresh(&self) {
        let chain_ids: Vec<u64> = self.merged.read().unwrap().keys().copied().collect();
        for chain_id in chain_ids {
            match self.fetch_remote(chain_id).await {
                Ok(Some(dynamic)) => {
                    let fetched = dynamic.len();
                    let merged = merge_lists(tokens::static_tokens(chain_id), dynamic);
                    tracing::info!(
                        "token list for chain {}: {} remote, {} merged",
                        chain_id,
                        fetched,
                        merged.len()
                    );
                    self.install(chain_id, merged);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("token list refresh failed for chain {}: {}", chain_id, e);
                }
            }
        }
    }

    async fn fetch_remote(&self, chain_id: u64) -> Result<Option<Vec<Token>>, AggregatorError> {
        let Some(url) = list_url(chain_id) else {
            return Ok(None);
        };
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AggregatorError::TokenList(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AggregatorError::TokenList(format!(
                "{} returned {}",
                url,
                resp.status()
            )));
        }
        let file: TokenListFile = resp
            .json()
            .await
            .map_err(|e| AggregatorError::TokenList(e.to_string()))?;

        let list = file
            .tokens
            .into_iter()
            .filter(|t| t.chain_id.map_or(true, |id| id == chain_id))
            .filter(|t| t.address.starts_with("0x") && t.address.len() == 42)
            .map(|t| Token {
                address: t.address,
                symbol: t.symbol,
                name: t.name,
                decimals: t.decimals,
                chain_id,
                logo_uri: t.logo_uri,
            })
            .collect();
        Ok(Some(list))
    }
}
