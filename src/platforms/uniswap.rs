//! Uniswap V3 on-chain collaborators over JSON-RPC.
//!
//! `UniswapQuoter` simulates swaps with `eth_call` against the V1 Quoter.
//! `UniswapRouter` estimates, prices and submits `exactInput` swaps on
//! SwapRouter02, signing locally and waiting for the receipt.
//!
//! Contract addresses (mainnet):
//! - Quoter:       0xb27308f9F90D607463bb33eA1BeBb41C27CE5AB6
//! - SwapRouter02: 0x68b3465833fb72A70ecDF485E0e4C7bD8665Fc45

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, U256};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info};

use super::{ExecutionService, QuotingOracle};
use crate::types::{ExecutionError, GasEstimationError, QuoteError, TradeDescriptor, TradeReceipt};

abigen!(
    IQuoter,
    r#"[
        function quoteExactInput(bytes path, uint256 amountIn) external returns (uint256 amountOut)
        function quoteExactInputSingle(address tokenIn, address tokenOut, uint24 fee, uint256 amountIn, uint160 sqrtPriceLimitX96) external returns (uint256 amountOut)
    ]"#
);

abigen!(
    ISwapRouter02,
    r#"[
        struct ExactInputParams { bytes path; address recipient; uint256 amountIn; uint256 amountOutMinimum; }
        function exactInput(ExactInputParams params) external payable returns (uint256 amountOut)
    ]"#
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Open an HTTP JSON-RPC provider. Does not touch the network.
pub fn http_provider(rpc_url: &str) -> Result<Provider<Http>> {
    Provider::<Http>::try_from(rpc_url).with_context(|| format!("Invalid RPC URL: {rpc_url}"))
}

// ---------------------------------------------------------------------------
// Quoter
// ---------------------------------------------------------------------------

pub struct UniswapQuoter {
    contract: IQuoter<Provider<Http>>,
}

impl UniswapQuoter {
    pub fn new(provider: Provider<Http>, quoter: Address) -> Self {
        Self {
            contract: IQuoter::new(quoter, Arc::new(provider)),
        }
    }
}

fn quote_error<M: Middleware>(e: ethers::contract::ContractError<M>) -> QuoteError {
    if e.is_revert() {
        QuoteError::Reverted(e.to_string())
    } else {
        QuoteError::Transport(e.to_string())
    }
}

#[async_trait]
impl QuotingOracle for UniswapQuoter {
    async fn quote_exact_input(&self, path: &Bytes, amount_in: U256) -> Result<U256, QuoteError> {
        self.contract
            .quote_exact_input(path.clone(), amount_in)
            .call()
            .await
            .map_err(quote_error)
    }

    async fn quote_exact_input_single(
        &self,
        token_in: Address,
        token_out: Address,
        fee_tier: u32,
        amount_in: U256,
    ) -> Result<U256, QuoteError> {
        self.contract
            .quote_exact_input_single(token_in, token_out, fee_tier, amount_in, U256::zero())
            .call()
            .await
            .map_err(quote_error)
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct UniswapRouter {
    client: Arc<SignerClient>,
    contract: ISwapRouter02<SignerClient>,
}

impl UniswapRouter {
    /// Build a signing router client. The key never leaves the wallet.
    pub fn new(
        provider: Provider<Http>,
        private_key: &SecretString,
        chain_id: u64,
        router: Address,
    ) -> Result<Self> {
        let wallet = private_key
            .expose_secret()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .context("Invalid signing key")?
            .with_chain_id(chain_id);

        info!(address = ?wallet.address(), chain_id, "Signer loaded");

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = ISwapRouter02::new(router, client.clone());
        Ok(Self { client, contract })
    }

    /// Address that signs and pays for submitted swaps.
    pub fn sender(&self) -> Address {
        self.client.address()
    }
}

fn exact_input_params(trade: &TradeDescriptor) -> ExactInputParams {
    ExactInputParams {
        path: trade.path.clone(),
        recipient: trade.recipient,
        amount_in: trade.amount_in,
        amount_out_minimum: trade.amount_out_minimum,
    }
}

#[async_trait]
impl ExecutionService for UniswapRouter {
    async fn estimate_gas(&self, trade: &TradeDescriptor) -> Result<U256, GasEstimationError> {
        self.contract
            .exact_input(exact_input_params(trade))
            .estimate_gas()
            .await
            .map_err(|e| {
                if e.is_revert() {
                    GasEstimationError::WouldRevert(e.to_string())
                } else {
                    GasEstimationError::Transport(e.to_string())
                }
            })
    }

    async fn gas_price(&self) -> Result<U256, GasEstimationError> {
        self.client
            .get_gas_price()
            .await
            .map_err(|e| GasEstimationError::Transport(e.to_string()))
    }

    async fn submit(&self, trade: &TradeDescriptor) -> Result<TradeReceipt, ExecutionError> {
        let mut call = self.contract.exact_input(exact_input_params(trade));
        if let Some(limit) = trade.gas_limit {
            call = call.gas(limit);
        }

        let pending = call
            .send()
            .await
            .map_err(|e| ExecutionError::Rejected(e.to_string()))?;
        let tx_hash = *pending;
        debug!(tx = ?tx_hash, "Swap broadcast, awaiting receipt");

        let receipt = pending
            .await
            .map_err(|e| ExecutionError::Rejected(e.to_string()))?
            .ok_or(ExecutionError::Dropped)?;

        if receipt.status.map(|s| s.as_u64()) != Some(1) {
            return Err(ExecutionError::Reverted(tx_hash));
        }

        Ok(TradeReceipt {
            tx_id: format!("{tx_hash:?}"),
            tx_hash: Some(tx_hash),
            gas_used: receipt.gas_used,
            timestamp: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
