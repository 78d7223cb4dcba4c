//! Built-in token catalog: the static per-chain token lists served before
//! any remote list has loaded, and the base tokens used as the other leg
//! when probing for pricing pools.

use crate::models::{normalize_address, Token};

pub const ETHEREUM_CHAIN_ID: u64 = 1;
pub const POLYGON_CHAIN_ID: u64 = 137;

struct StaticToken {
    address: &'static str,
    symbol: &'static str,
    name: &'static str,
    decimals: u8,
}

const ETHEREUM_TOKENS: &[StaticToken] = &[
    StaticToken {
        address: "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
        symbol: "WETH",
        name: "Wrapped Ether",
        decimals: 18,
    },
    StaticToken {
        address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        symbol: "USDC",
        name: "USD Coin",
        decimals: 6,
    },
    StaticToken {
        address: "0xdAC17F958D2ee523a2206206994597C13D831ec7",
        symbol: "USDT",
        name: "Tether USD",
        decimals: 6,
    },
    StaticToken {
        address: "0x6B175474E89094C44Da98b954EedeAC495271d0F",
        symbol: "DAI",
        name: "Dai Stablecoin",
        decimals: 18,
    },
    StaticToken {
        address: "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599",
        symbol: "WBTC",
        name: "Wrapped BTC",
        decimals: 8,
    },
    StaticToken {
        address: "0x514910771AF9Ca656af840dff83E8264EcF986CA",
        symbol: "LINK",
        name: "ChainLink Token",
        decimals: 18,
    },
    StaticToken {
        address: "0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984",
        symbol: "UNI",
        name: "Uniswap",
        decimals: 18,
    },
];

const POLYGON_TOKENS: &[StaticToken] = &[
    StaticToken {
        address: "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270",
        symbol: "WMATIC",
        name: "Wrapped Matic",
        decimals: 18,
    },
    StaticToken {
        address: "0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619",
        symbol: "WETH",
        name: "Wrapped Ether",
        decimals: 18,
    },
    StaticToken {
        address: "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174",
        symbol: "USDC",
        name: "USD Coin (PoS)",
        decimals: 6,
    },
    StaticToken {
        address: "0xc2132D05D31c914a87C6611C10748AEb04B58e8F",
        symbol: "USDT",
        name: "Tether USD (PoS)",
        decimals: 6,
    },
    StaticToken {
        address: "0x8f3Cf7ad23Cd3CaDbD9735AFf958023239c6A063",
        symbol: "DAI",
        name: "Dai Stablecoin (PoS)",
        decimals: 18,
    },
    StaticToken {
        address: "0x1BFD67037B42Cf73acF2047067bd4F2C47D9BfD6",
        symbol: "WBTC",
        name: "Wrapped BTC (PoS)",
        decimals: 8,
    },
];

// Liquidity hubs probed as the other leg during discovery. Order matters:
// stables first so the first hit usually prices directly in USD.
const ETHEREUM_BASE_SYMBOLS: &[&str] = &["USDC", "USDT", "DAI", "WETH"];
const POLYGON_BASE_SYMBOLS: &[&str] = &["USDC", "USDT", "DAI", "WETH", "WMATIC"];

const STABLE_SYMBOLS: &[&str] = &["USDC", "USDT", "DAI"];

fn catalog(chain_id: u64) -> &'static [StaticToken] {
    match chain_id {
        ETHEREUM_CHAIN_ID => ETHEREUM_TOKENS,
        POLYGON_CHAIN_ID => POLYGON_TOKENS,
        _ => &[],
    }
}

fn to_token(t: &StaticToken, chain_id: u64) -> Token {
    Token {
        address: t.address.to_string(),
        symbol: t.symbol.to_string(),
        name: t.name.to_string(),
        decimals: t.decimals,
        chain_id,
        logo_uri: None,
    }
}

/// The static configured token list for a chain, in listing order.
pub fn static_tokens(chain_id: u64) -> Vec<Token> {
    catalog(chain_id)
        .iter()
        .map(|t| to_token(t, chain_id))
        .collect()
}

/// Base tokens probed during pool discovery on a chain.
pub fn base_tokens(chain_id: u64) -> Vec<Token> {
    let symbols = match chain_id {
        ETHEREUM_CHAIN_ID => ETHEREUM_BASE_SYMBOLS,
        POLYGON_CHAIN_ID => POLYGON_BASE_SYMBOLS,
        _ => &[][..],
    };
    catalog(chain_id)
        .iter()
        .filter(|t| symbols.contains(&t.symbol))
        .map(|t| to_token(t, chain_id))
        .collect()
}

/// True for tokens pegged at 1 USD; the anchor of every pricing route.
pub fn is_stable(chain_id: u64, address: &str) -> bool {
    let key = normalize_address(address);
    catalog(chain_id)
        .iter()
        .any(|t| STABLE_SYMBOLS.contains(&t.symbol) && normalize_address(t.address) == key)
}

/// Decimals from the static catalog, if the token is a known one.
pub fn decimals_for(chain_id: u64, address: &str) -> Option<u8> {
    let key = normalize_address(address);
    catalog(chain_id)
        .iter()
        .find(|t| normalize_address(t.address) == key)
        .map(|t| t.decimals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_bases_include_wmatic() {
        let bases = base_tokens(POLYGON_CHAIN_ID);
        assert!(bases.iter().any(|t| t.symbol == "WMATIC"));
        let eth_bases = base_tokens(ETHEREUM_CHAIN_ID);
        assert!(!eth_bases.iter().any(|t| t.symbol == "WMATIC"));
        assert_eq!(eth_bases.len(), 4);
    }

    #[test]
    fn stables_are_case_insensitive() {
        assert!(is_stable(
            ETHEREUM_CHAIN_ID,
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
        ));
        assert!(!is_stable(
            ETHEREUM_CHAIN_ID,
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
        ));
    }

    #[test]
    fn unknown_chain_is_empty() {
        assert!(static_tokens(42).is_empty());
        assert!(base_tokens(42).is_empty());
    }
}
