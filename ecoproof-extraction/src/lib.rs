//! Extraction clients for ecoproof.
//!
//! The pipeline treats OCR/vision as an external collaborator behind a
//! narrow trait: given a reference to an already-stored bill image, return
//! structured fields plus a confidence score. Service unavailability never
//! fails the caller; the client degrades into a low-confidence fallback
//! result and lets the orchestrator reject on that basis.
//!
//! The mock client is deterministic and is only constructed when the
//! configuration names it explicitly.

pub mod parser;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use ecoproof_common::{ExtractedFields, ExtractionResult, SubmittedData};
use parser::BillParser;

/// Confidence attached to the unavailability fallback. Must stay at or
/// below 0.5 so a fallback can never clear the verification threshold.
pub const FALLBACK_CONFIDENCE: f64 = 0.35;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MOCK_DELAY: Duration = Duration::from_millis(200);

const SAMPLE_BILL_TEXT: &str = "PG&E Energy Statement\n\
    Service period: January 3, 2025 - February 2, 2025\n\
    Total Usage: 450 kWh\n\
    Amount Due: $89.50\n";

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("extraction client construction failed: {0}")]
    Client(String),
    #[error("extraction request failed: {0}")]
    Http(String),
    #[error("extraction endpoint returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Which extraction backend to construct. Mock is never selected
/// implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    Http,
    Mock,
}

/// Extraction client configuration. Explicit object passed into
/// constructors; no ambient environment reads in this crate.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub mode: ExtractionMode,
    /// OCR endpoint URL. With `mode = Http` and no endpoint configured,
    /// every call degrades to the fallback result.
    pub endpoint: Option<String>,
    pub timeout: Duration,
    pub fallback_confidence: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Http,
            endpoint: None,
            timeout: DEFAULT_TIMEOUT,
            fallback_confidence: FALLBACK_CONFIDENCE,
        }
    }
}

impl ExtractionConfig {
    pub fn mock() -> Self {
        Self {
            mode: ExtractionMode::Mock,
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fallback_confidence(mut self, confidence: f64) -> Self {
        self.fallback_confidence = confidence.clamp(0.0, 0.5);
        self
    }
}

/// Narrow OCR/vision seam used by the verification orchestrator.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    async fn extract(&self, image_ref: &str) -> Result<ExtractionResult, ExtractionError>;
}

/// Build the extraction client named by the configuration.
pub fn build_extraction_client(
    config: &ExtractionConfig,
) -> Result<Box<dyn ExtractionClient>, ExtractionError> {
    match config.mode {
        ExtractionMode::Http => Ok(Box::new(HttpExtractionClient::new(config.clone())?)),
        ExtractionMode::Mock => Ok(Box::new(MockExtractionClient::new())),
    }
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    image_ref: &'a str,
    fields: &'a [&'a str],
}

#[derive(Deserialize)]
struct ExtractResponse {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    fields: ExtractedFields,
}

fn default_true() -> bool {
    true
}

/// Real extraction client: POSTs the image reference to the configured OCR
/// endpoint and post-processes the returned text through the bill parser.
pub struct HttpExtractionClient {
    config: ExtractionConfig,
    client: reqwest::Client,
    parser: BillParser,
}

impl HttpExtractionClient {
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExtractionError::Client(e.to_string()))?;
        Ok(Self {
            config,
            client,
            parser: BillParser::new(),
        })
    }

    fn fallback(&self, reason: &str) -> ExtractionResult {
        warn!(reason = %reason, "extraction endpoint unavailable, degrading to fallback");
        ExtractionResult {
            success: false,
            text: String::new(),
            confidence: self.config.fallback_confidence,
            fields: ExtractedFields::default(),
        }
    }

    async fn call_endpoint(&self, endpoint: &str, image_ref: &str) -> Result<ExtractResponse, String> {
        let request = ExtractRequest {
            image_ref,
            fields: &["kwh", "amount", "date", "provider"],
        };
        let response = self
            .client
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("request error: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("endpoint returned {}", response.status()));
        }

        response
            .json::<ExtractResponse>()
            .await
            .map_err(|e| format!("invalid JSON body: {e}"))
    }
}

#[async_trait]
impl ExtractionClient for HttpExtractionClient {
    async fn extract(&self, image_ref: &str) -> Result<ExtractionResult, ExtractionError> {
        let endpoint = match self.config.endpoint.as_deref() {
            Some(endpoint) => endpoint,
            None => return Ok(self.fallback("no endpoint configured")),
        };

        let response = match self.call_endpoint(endpoint, image_ref).await {
            Ok(response) => response,
            Err(reason) => return Ok(self.fallback(&reason)),
        };

        // The endpoint may return raw OCR text without structured fields;
        // run the bill parser over it and keep whichever side is richer.
        let mut fields = response.fields;
        let mut confidence = response.confidence;
        if fields.kwh.is_none() && !response.text.is_empty() {
            let (parsed, parse_confidence) = self.parser.parse(&response.text);
            fields = parsed;
            confidence = confidence.max(parse_confidence);
        }

        Ok(ExtractionResult {
            success: response.success && fields.kwh.is_some(),
            text: response.text,
            confidence: confidence.clamp(0.0, 1.0),
            fields,
        })
    }
}

/// Deterministic extraction stand-in. Parses a canned (or caller-seeded)
/// bill text through the same parser as the real client and sleeps a short
/// fixed delay to approximate service latency.
pub struct MockExtractionClient {
    bill_text: String,
    delay: Duration,
    parser: BillParser,
}

impl Default for MockExtractionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExtractionClient {
    pub fn new() -> Self {
        Self {
            bill_text: SAMPLE_BILL_TEXT.to_string(),
            delay: MOCK_DELAY,
            parser: BillParser::new(),
        }
    }

    pub fn with_bill_text(mut self, text: impl Into<String>) -> Self {
        self.bill_text = text.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ExtractionClient for MockExtractionClient {
    async fn extract(&self, _image_ref: &str) -> Result<ExtractionResult, ExtractionError> {
        tokio::time::sleep(self.delay).await;
        let (fields, confidence) = self.parser.parse(&self.bill_text);
        Ok(ExtractionResult {
            success: fields.kwh.is_some(),
            text: self.bill_text.clone(),
            confidence,
            fields,
        })
    }
}

/// Combined-analysis response from the AI endpoint: a full verdict in one
/// round trip, used ahead of the staged pipeline when configured.
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedAnalysis {
    pub verified: bool,
    pub confidence: f64,
    pub analysis: String,
    #[serde(default)]
    pub extracted: Option<ExtractedFields>,
    #[serde(default)]
    pub co2_kg: Option<f64>,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    image_ref: Option<&'a str>,
    submitted: &'a SubmittedData,
}

/// Client for the combined AI analysis path. Optional; any error here is
/// logged by the orchestrator, which then runs the staged pipeline instead.
pub struct AnalysisClient {
    endpoint: String,
    client: reqwest::Client,
}

impl AnalysisClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractionError::Client(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub async fn analyze(
        &self,
        image_ref: Option<&str>,
        submitted: &SubmittedData,
    ) -> Result<CombinedAnalysis, ExtractionError> {
        let request = AnalyzeRequest {
            image_ref,
            submitted,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractionError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExtractionError::Http(format!(
                "analysis endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<CombinedAnalysis>()
            .await
            .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))
    }
}
