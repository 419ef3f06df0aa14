//! Token ledger for ecoproof reward issuance.
//!
//! `TokenLedger` is the narrow seam over the reward token contract: mint,
//! burn, and balance lookup. Two implementations exist — the ethers-backed
//! `EvmLedger` and the deterministic `MockLedger` — selected only by
//! explicit configuration. The ledger does not deduplicate mints by action;
//! at-most-once issuance is enforced by the store's mint claim, recorded by
//! the caller before submission.

pub mod evm;
pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ecoproof_common::TransactionMetadata;

pub use evm::EvmLedger;
pub use mock::MockLedger;

pub const DEFAULT_GAS_BUFFER_PERCENT: u64 = 20;
const DEFAULT_MOCK_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger configuration error: {0}")]
    Config(String),
    #[error("chain interaction failed: {0}")]
    Chain(String),
}

/// Which ledger backend to construct. Mock is never selected implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    Evm,
    Mock,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub mode: LedgerMode,
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
    pub private_key: Option<String>,
    pub chain_id: u64,
    /// Percentage added on top of the gas estimate before submission.
    pub gas_buffer_percent: u64,
    /// Artificial latency of the mock backend.
    pub mock_delay: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            mode: LedgerMode::Mock,
            rpc_url: None,
            contract_address: None,
            private_key: None,
            chain_id: 1,
            gas_buffer_percent: DEFAULT_GAS_BUFFER_PERCENT,
            mock_delay: DEFAULT_MOCK_DELAY,
        }
    }
}

impl LedgerConfig {
    pub fn evm(
        rpc_url: impl Into<String>,
        contract_address: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            mode: LedgerMode::Evm,
            rpc_url: Some(rpc_url.into()),
            contract_address: Some(contract_address.into()),
            private_key: Some(private_key.into()),
            ..Self::default()
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_gas_buffer_percent(mut self, percent: u64) -> Self {
        self.gas_buffer_percent = percent;
        self
    }

    pub fn with_mock_delay(mut self, delay: Duration) -> Self {
        self.mock_delay = delay;
        self
    }
}

/// Result of one mint or burn submission. `success = false` means the
/// transaction landed but reverted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintReceipt {
    pub tx_hash: String,
    pub success: bool,
}

/// Narrow token-contract seam: the pipeline needs only these operations.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn mint(
        &self,
        address: &str,
        amount: u64,
        metadata: &TransactionMetadata,
    ) -> Result<MintReceipt, LedgerError>;

    async fn burn(
        &self,
        address: &str,
        amount: u64,
        metadata: &TransactionMetadata,
    ) -> Result<MintReceipt, LedgerError>;

    async fn balance_of(&self, address: &str) -> Result<u64, LedgerError>;
}

/// Build the ledger named by the configuration.
pub fn build_ledger(config: &LedgerConfig) -> Result<Arc<dyn TokenLedger>, LedgerError> {
    match config.mode {
        LedgerMode::Evm => Ok(Arc::new(EvmLedger::new(config)?)),
        LedgerMode::Mock => Ok(Arc::new(MockLedger::new(config.mock_delay))),
    }
}
