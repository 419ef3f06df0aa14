//! Shared fixtures for ecoproof tests: canned bill text and failing
//! implementations of the external seams (extraction, ledger) used to drive
//! the degraded paths deterministically.

use async_trait::async_trait;

use ecoproof_common::{ExtractedFields, ExtractionResult, TransactionMetadata};
use ecoproof_extraction::{ExtractionClient, ExtractionError};
use ecoproof_ledger::{LedgerError, MintReceipt, TokenLedger};

/// Bill text the parser fully recognizes: provider, period, usage, amount.
pub const SAMPLE_BILL_450: &str = "PG&E Energy Statement\n\
    Service period: January 3, 2025 - February 2, 2025\n\
    Total Usage: 450 kWh\n\
    Amount Due: $89.50\n";

/// Render a parseable bill for arbitrary usage/amount figures.
pub fn bill_text(kwh: f64, amount: f64) -> String {
    format!(
        "PG&E Energy Statement\n\
         Service period: January 3, 2025 - February 2, 2025\n\
         Total Usage: {kwh} kWh\n\
         Amount Due: ${amount}\n"
    )
}

/// Extraction client that always reports failure at the documented degraded
/// confidence, as if the OCR endpoint were unreachable.
pub struct FailingExtractionClient {
    pub confidence: f64,
}

impl Default for FailingExtractionClient {
    fn default() -> Self {
        Self { confidence: 0.35 }
    }
}

#[async_trait]
impl ExtractionClient for FailingExtractionClient {
    async fn extract(&self, _image_ref: &str) -> Result<ExtractionResult, ExtractionError> {
        Ok(ExtractionResult {
            success: false,
            text: String::new(),
            confidence: self.confidence,
            fields: ExtractedFields::default(),
        })
    }
}

/// Ledger that fails every submission, simulating an RPC outage.
#[derive(Default)]
pub struct FailingLedger;

#[async_trait]
impl TokenLedger for FailingLedger {
    async fn mint(
        &self,
        _address: &str,
        _amount: u64,
        _metadata: &TransactionMetadata,
    ) -> Result<MintReceipt, LedgerError> {
        Err(LedgerError::Chain("simulated RPC failure".to_string()))
    }

    async fn burn(
        &self,
        _address: &str,
        _amount: u64,
        _metadata: &TransactionMetadata,
    ) -> Result<MintReceipt, LedgerError> {
        Err(LedgerError::Chain("simulated RPC failure".to_string()))
    }

    async fn balance_of(&self, _address: &str) -> Result<u64, LedgerError> {
        Err(LedgerError::Chain("simulated RPC failure".to_string()))
    }
}
