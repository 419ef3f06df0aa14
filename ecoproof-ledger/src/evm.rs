//! EVM token ledger.
//!
//! Talks to the reward token contract through a JSON-RPC provider with a
//! local signing wallet. Calldata is encoded by hand against the standard
//! `mint(address,uint256)` / `burn(address,uint256)` / `decimals()` /
//! `balanceOf(address)` surface. Integer token amounts are scaled to the
//! contract's fixed-point representation, gas is estimated with a
//! configurable buffer on top, and success is reported only from a
//! confirmed receipt with status 1.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::{
    abi::{self, Token},
    prelude::*,
    types::transaction::eip2718::TypedTransaction,
    types::{Address, Bytes, TransactionRequest, U256},
};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use ecoproof_common::TransactionMetadata;

use crate::{LedgerConfig, LedgerError, MintReceipt, TokenLedger};

pub struct EvmLedger {
    client: Arc<SignerMiddleware<Provider<Http>, LocalWallet>>,
    contract: Address,
    gas_buffer_percent: u64,
    decimals: OnceCell<u32>,
}

impl EvmLedger {
    pub fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let rpc_url = config
            .rpc_url
            .as_deref()
            .ok_or_else(|| LedgerError::Config("rpc_url is required for evm mode".into()))?;
        let contract_address = config.contract_address.as_deref().ok_or_else(|| {
            LedgerError::Config("contract_address is required for evm mode".into())
        })?;
        let private_key = config
            .private_key
            .as_deref()
            .ok_or_else(|| LedgerError::Config("private_key is required for evm mode".into()))?;

        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| LedgerError::Config(format!("invalid rpc_url: {e}")))?;

        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| LedgerError::Config(format!("invalid private key: {e}")))?
            .with_chain_id(config.chain_id);

        let contract = contract_address
            .parse::<Address>()
            .map_err(|e| LedgerError::Config(format!("invalid contract address: {e}")))?;

        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            contract,
            gas_buffer_percent: config.gas_buffer_percent,
            decimals: OnceCell::new(),
        })
    }

    async fn decimals(&self) -> Result<u32> {
        self.decimals
            .get_or_try_init(|| async {
                let selector = &ethers::utils::keccak256("decimals()")[..4];
                let tx = TransactionRequest::new()
                    .to(self.contract)
                    .data(Bytes::from(selector.to_vec()));
                let typed: TypedTransaction = tx.into();
                let out = self
                    .client
                    .call(&typed, None)
                    .await
                    .context("decimals() call failed")?;
                if out.is_empty() {
                    anyhow::bail!("empty response from decimals()");
                }
                Ok(U256::from_big_endian(&out).as_u32())
            })
            .await
            .copied()
    }

    async fn submit(
        &self,
        signature: &str,
        holder: Address,
        amount: u64,
        metadata: &TransactionMetadata,
    ) -> Result<MintReceipt> {
        let decimals = self.decimals().await?;
        let scaled = U256::from(amount) * U256::exp10(decimals as usize);

        let selector = &ethers::utils::keccak256(signature)[..4];
        let mut calldata = selector.to_vec();
        calldata.extend_from_slice(&abi::encode(&[
            Token::Address(holder),
            Token::Uint(scaled),
        ]));

        let tx = TransactionRequest::new()
            .to(self.contract)
            .data(Bytes::from(calldata));

        let typed: TypedTransaction = tx.clone().into();
        let gas = self
            .client
            .estimate_gas(&typed, None)
            .await
            .context("gas estimation failed")?;
        let buffered = gas * U256::from(100 + self.gas_buffer_percent) / U256::from(100);
        let tx = tx.gas(buffered);

        debug!(
            action_id = %metadata.action_id,
            %gas,
            %buffered,
            "submitting token transaction"
        );

        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .context("transaction submission failed")?;
        let tx_hash = format!("{:?}", pending.tx_hash());

        let receipt = pending
            .await
            .context("waiting for confirmation failed")?
            .context("transaction dropped from mempool")?;

        let success = receipt.status == Some(1u64.into());
        info!(
            action_id = %metadata.action_id,
            tx_hash = %tx_hash,
            success,
            "token transaction confirmed"
        );

        Ok(MintReceipt { tx_hash, success })
    }

    fn parse_holder(address: &str) -> Result<Address, LedgerError> {
        address
            .parse::<Address>()
            .map_err(|e| LedgerError::Config(format!("invalid holder address '{address}': {e}")))
    }
}

#[async_trait]
impl TokenLedger for EvmLedger {
    async fn mint(
        &self,
        address: &str,
        amount: u64,
        metadata: &TransactionMetadata,
    ) -> Result<MintReceipt, LedgerError> {
        let holder = Self::parse_holder(address)?;
        self.submit("mint(address,uint256)", holder, amount, metadata)
            .await
            .map_err(|e| LedgerError::Chain(format!("{e:#}")))
    }

    async fn burn(
        &self,
        address: &str,
        amount: u64,
        metadata: &TransactionMetadata,
    ) -> Result<MintReceipt, LedgerError> {
        let holder = Self::parse_holder(address)?;
        self.submit("burn(address,uint256)", holder, amount, metadata)
            .await
            .map_err(|e| LedgerError::Chain(format!("{e:#}")))
    }

    async fn balance_of(&self, address: &str) -> Result<u64, LedgerError> {
        let holder = Self::parse_holder(address)?;
        let inner = async {
            let decimals = self.decimals().await?;

            let selector = &ethers::utils::keccak256("balanceOf(address)")[..4];
            let mut calldata = selector.to_vec();
            calldata.extend_from_slice(&abi::encode(&[Token::Address(holder)]));

            let tx = TransactionRequest::new()
                .to(self.contract)
                .data(Bytes::from(calldata));
            let typed: TypedTransaction = tx.into();
            let out = self
                .client
                .call(&typed, None)
                .await
                .context("balanceOf() call failed")?;

            let raw = U256::from_big_endian(&out);
            let whole = raw / U256::exp10(decimals as usize);
            let balance = if whole > U256::from(u64::MAX) {
                u64::MAX
            } else {
                whole.as_u64()
            };
            Ok::<_, anyhow::Error>(balance)
        };
        inner.await.map_err(|e| LedgerError::Chain(format!("{e:#}")))
    }
}
