//! EVM chain adapter: alloy HTTP providers, Multicall3 batching, and
//! CREATE2 pool address derivation for the Uniswap V2/V3 style factories.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{address, b256, keccak256, Address, Bytes, B256, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::{sol, SolCall, SolValue};
use async_trait::async_trait;

use super::{ChainAdapter, PoolProbe};
use crate::error::AggregatorError;
use crate::models::DexType;

sol! {
    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96, int24 tick, uint16 observationIndex,
            uint16 observationCardinality, uint16 observationCardinalityNext,
            uint8 feeProtocol, bool unlocked
        );
        function liquidity() external view returns (uint128);
        function token0() external view returns (address);
        function token1() external view returns (address);
        function fee() external view returns (uint24);
    }

    interface IUniswapV2Pair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
        function token0() external view returns (address);
        function token1() external view returns (address);
    }

    interface IMulticall3 {
        struct Call {
            address target;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function tryBlockAndAggregate(bool requireSuccess, Call[] calldata calls)
            external payable returns (uint256 blockNumber, bytes32 blockHash, Result[] memory returnData);
    }
}

/// Multicall3 is deployed at the same address on every supported chain.
pub const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

/// Per-chain factory constants for deterministic pool derivation.
#[derive(Debug, Clone)]
pub struct EvmChainSpec {
    pub name: &'static str,
    pub chain_id: u64,
    pub v3_factory: Address,
    pub v3_init_code_hash: B256,
    pub v2_factory: Address,
    pub v2_init_code_hash: B256,
}

pub fn ethereum_spec() -> EvmChainSpec {
    EvmChainSpec {
        name: "ethereum",
        chain_id: 1,
        v3_factory: address!("1F98431c8aD98523631AE4a59F267346ea31F984"),
        v3_init_code_hash: b256!(
            "e34f199b19b2b4f47f68442619d555527d244f78a3297ea89325f843f87b8b54"
        ),
        v2_factory: address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f"),
        v2_init_code_hash: b256!(
            "96e8ac4277198ff8b6f785478aa9a39f403cb768dd02cbee326c3e7da348845f"
        ),
    }
}

/// Polygon uses the same Uniswap V3 deployment; the V2 side is QuickSwap,
/// a Uniswap V2 fork with its own factory and pair init-code hash.
pub fn polygon_spec() -> EvmChainSpec {
    EvmChainSpec {
        name: "polygon",
        chain_id: 137,
        v3_factory: address!("1F98431c8aD98523631AE4a59F267346ea31F984"),
        v3_init_code_hash: b256!(
            "e34f199b19b2b4f47f68442619d555527d244f78a3297ea89325f843f87b8b54"
        ),
        v2_factory: address!("5757371414417b8C6CAad45bAeF941aBc7d3Ab32"),
        v2_init_code_hash: b256!(
            "f187ed688403aa4f7acfada758d8d53698753b998a3071b06f1b777f4330eaf3"
        ),
    }
}

pub fn spec_for_chain(chain_id: u64) -> Option<EvmChainSpec> {
    match chain_id {
        1 => Some(ethereum_spec()),
        137 => Some(polygon_spec()),
        _ => None,
    }
}

pub struct EvmAdapter {
    spec: EvmChainSpec,
    providers: Vec<RootProvider>,
    call_timeout: Duration,
}

impl EvmAdapter {
    pub fn new(
        spec: EvmChainSpec,
        rpc_urls: &[String],
        call_timeout: Duration,
    ) -> Result<Self, AggregatorError> {
        if rpc_urls.is_empty() {
            return Err(AggregatorError::Rpc(format!(
                "no rpc urls configured for {}",
                spec.name
            )));
        }
        let mut providers = Vec::with_capacity(rpc_urls.len());
        for raw in rpc_urls {
            let url = raw
                .parse()
                .map_err(|e| AggregatorError::Rpc(format!("bad rpc url {raw}: {e}")))?;
            providers.push(RootProvider::new_http(url));
        }
        Ok(Self {
            spec,
            providers,
            call_timeout,
        })
    }

    fn sort_pair(a: Address, b: Address) -> (Address, Address) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    async fn probe_v3(&self, addr: Address) -> Result<Option<PoolProbe>, AggregatorError> {
        let calls = vec![
            (addr, Bytes::from(IUniswapV3Pool::slot0Call {}.abi_encode())),
            (addr, Bytes::from(IUniswapV3Pool::liquidityCall {}.abi_encode())),
            (addr, Bytes::from(IUniswapV3Pool::token0Call {}.abi_encode())),
            (addr, Bytes::from(IUniswapV3Pool::token1Call {}.abi_encode())),
            (addr, Bytes::from(IUniswapV3Pool::feeCall {}.abi_encode())),
        ];
        let (block, rets) = self.aggregate(0, calls).await?;
        let [slot0, liquidity, token0, token1, fee] = rets.as_slice() else {
            return Err(AggregatorError::Decode("short multicall response".into()));
        };
        let (Some(slot0), Some(liquidity), Some(token0), Some(token1), Some(fee)) =
            (slot0, liquidity, token0, token1, fee)
        else {
            return Ok(None);
        };

        let slot0 = IUniswapV3Pool::slot0Call::abi_decode_returns(slot0)
            .map_err(|e| AggregatorError::Decode(e.to_string()))?;
        let liquidity = IUniswapV3Pool::liquidityCall::abi_decode_returns(liquidity)
            .map_err(|e| AggregatorError::Decode(e.to_string()))?;
        let token0 = IUniswapV3Pool::token0Call::abi_decode_returns(token0)
            .map_err(|e| AggregatorError::Decode(e.to_string()))?;
        let token1 = IUniswapV3Pool::token1Call::abi_decode_returns(token1)
            .map_err(|e| AggregatorError::Decode(e.to_string()))?;
        let fee = IUniswapV3Pool::feeCall::abi_decode_returns(fee)
            .map_err(|e| AggregatorError::Decode(e.to_string()))?;

        Ok(Some(PoolProbe {
            token0: token0.to_string(),
            token1: token1.to_string(),
            dex_type: DexType::V3,
            fee_tier: Some(fee.to::<u32>()),
            sqrt_price_x96: U256::from(slot0.sqrtPriceX96),
            liquidity: U256::from(liquidity),
            reserve0: None,
            reserve1: None,
            block_number: block,
        }))
    }

    async fn probe_v2(&self, addr: Address) -> Result<Option<PoolProbe>, AggregatorError> {
        let calls = vec![
            (
                addr,
                Bytes::from(IUniswapV2Pair::getReservesCall {}.abi_encode()),
            ),
            (addr, Bytes::from(IUniswapV2Pair::token0Call {}.abi_encode())),
            (addr, Bytes::from(IUniswapV2Pair::token1Call {}.abi_encode())),
        ];
        let (block, rets) = self.aggregate(0, calls).await?;
        let [reserves, token0, token1] = rets.as_slice() else {
            return Err(AggregatorError::Decode("short multicall response".into()));
        };
        let (Some(reserves), Some(token0), Some(token1)) = (reserves, token0, token1) else {
            return Ok(None);
        };

        let reserves = IUniswapV2Pair::getReservesCall::abi_decode_returns(reserves)
            .map_err(|e| AggregatorError::Decode(e.to_string()))?;
        let token0 = IUniswapV2Pair::token0Call::abi_decode_returns(token0)
            .map_err(|e| AggregatorError::Decode(e.to_string()))?;
        let token1 = IUniswapV2Pair::token1Call::abi_decode_returns(token1)
            .map_err(|e| AggregatorError::Decode(e.to_string()))?;

        Ok(Some(PoolProbe {
            token0: token0.to_string(),
            token1: token1.to_string(),
            dex_type: DexType::V2,
            fee_tier: None,
            sqrt_price_x96: U256::ZERO,
            liquidity: U256::ZERO,
            reserve0: Some(U256::from(reserves.reserve0)),
            reserve1: Some(U256::from(reserves.reserve1)),
            block_number: block,
        }))
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain_name(&self) -> &str {
        self.spec.name
    }

    fn chain_id(&self) -> u64 {
        self.spec.chain_id
    }

    fn provider_count(&self) -> usize {
        self.providers.len()
    }

    fn compute_pool_address(
        &self,
        token_a: &str,
        token_b: &str,
        fee_tier: Option<u32>,
    ) -> Option<String> {
        let a = Address::from_str(token_a.trim()).ok()?;
        let b = Address::from_str(token_b.trim()).ok()?;
        if a == b {
            return None;
        }
        let (t0, t1) = Self::sort_pair(a, b);
        let pool = match fee_tier {
            Some(fee) => {
                // salt = keccak256(abi.encode(token0, token1, fee))
                let salt = keccak256((t0, t1, U256::from(fee)).abi_encode());
                self.spec.v3_factory.create2(salt, self.spec.v3_init_code_hash)
            }
            None => {
                // salt = keccak256(abi.encodePacked(token0, token1))
                let mut packed = [0u8; 40];
                packed[..20].copy_from_slice(t0.as_slice());
                packed[20..].copy_from_slice(t1.as_slice());
                let salt = keccak256(packed);
                self.spec.v2_factory.create2(salt, self.spec.v2_init_code_hash)
            }
        };
        Some(pool.to_string())
    }

    async fn read_pool_state(&self, pool: &str) -> Result<PoolProbe, AggregatorError> {
        let addr = Address::from_str(pool.trim())
            .map_err(|_| AggregatorError::InvalidAddress(pool.to_string()))?;
        if let Some(probe) = self.probe_v3(addr).await? {
            return Ok(probe);
        }
        if let Some(probe) = self.probe_v2(addr).await? {
            return Ok(probe);
        }
        Err(AggregatorError::PoolNotFound(pool.to_string()))
    }

    async fn aggregate(
        &self,
        provider: usize,
        calls: Vec<(Address, Bytes)>,
    ) -> Result<(u64, Vec<Option<Bytes>>), AggregatorError> {
        let provider = &self.providers[provider % self.providers.len()];
        let calls: Vec<IMulticall3::Call> = calls
            .into_iter()
            .map(|(target, call_data)| IMulticall3::Call {
                target,
                callData: call_data,
            })
            .collect();
        let calldata = IMulticall3::tryBlockAndAggregateCall {
            requireSuccess: false,
            calls,
        }
        .abi_encode();

        let tx = TransactionRequest::default()
            .to(MULTICALL3)
            .input(calldata.into());
        let raw = tokio::time::timeout(self.call_timeout, provider.call(tx))
            .await
            .map_err(|_| AggregatorError::Rpc("multicall deadline exceeded".into()))?
            .map_err(|e| AggregatorError::Rpc(e.to_string()))?;

        let decoded = IMulticall3::tryBlockAndAggregateCall::abi_decode_returns(&raw)
            .map_err(|e| AggregatorError::Decode(e.to_string()))?;
        let block = u64::try_from(decoded.blockNumber).unwrap_or(0);
        let data = decoded
            .returnData
            .into_iter()
            .map(|r| {
                if r.success && !r.returnData.is_empty() {
                    Some(r.returnData)
                } else {
                    None
                }
            })
            .collect();
        Ok((block, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mainnet() -> EvmAdapter {
        EvmAdapter::new(
            ethereum_spec(),
            &["http://localhost:8545".to_string()],
            Duration::from_secs(8),
        )
        .unwrap()
    }

    const USDC: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";

    #[test]
    fn derives_known_v3_pools() {
        let adapter = mainnet();
        // USDC/WETH 0.05% and 0.3% on mainnet
        assert_eq!(
            adapter.compute_pool_address(USDC, WETH, Some(500)).unwrap(),
            "0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640"
        );
        assert_eq!(
            adapter.compute_pool_address(USDC, WETH, Some(3000)).unwrap(),
            "0x8ad599c3A0ff1De082011EFDDc58f1908eb6e6D8"
        );
    }

    #[test]
    fn derives_known_v2_pair() {
        let adapter = mainnet();
        assert_eq!(
            adapter.compute_pool_address(USDC, WETH, None).unwrap(),
            "0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc"
        );
    }

    #[test]
    fn derivation_is_order_insensitive() {
        let adapter = mainnet();
        assert_eq!(
            adapter.compute_pool_address(USDC, WETH, Some(500)),
            adapter.compute_pool_address(WETH, USDC, Some(500))
        );
    }

    #[test]
    fn rejects_garbage_addresses() {
        let adapter = mainnet();
        assert!(adapter.compute_pool_address("nonsense", WETH, Some(500)).is_none());
        assert!(adapter.compute_pool_address(USDC, USDC, Some(500)).is_none());
    }
}
