//! Verification orchestrator.
//!
//! Sequences extraction, cross-validation, and impact estimation into a
//! single verified/rejected decision. When a combined-analysis endpoint is
//! configured it is attempted first; its errors never surface to the caller
//! and the staged pipeline runs instead. The orchestrator itself never
//! fails: every internal error path produces a rejection outcome, so an
//! action can never be left in `pending` by this layer.

use std::time::Duration;

use tracing::warn;

use ecoproof_common::{ActionCategory, SubmittedData, VerificationOutcome};
use ecoproof_extraction::{AnalysisClient, ExtractionClient};

use crate::crosscheck::{cross_validate, CrossCheck, DEFAULT_VARIANCE_THRESHOLD};
use crate::estimate::{ImpactEstimator, ImpactRequest};

/// Verification policy knobs. Explicit configuration; no environment reads.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Final confidence must exceed this to verify.
    pub verified_threshold: f64,
    /// Whether submissions without a proof image may verify at all.
    pub allow_imageless: bool,
    /// Fixed confidence assigned to allowed imageless submissions.
    pub imageless_confidence: f64,
    pub variance_threshold: f64,
    /// Added to the combined confidence when the cross-check passes.
    pub match_bonus: f64,
    /// Subtracted on a cross-check mismatch, down to `penalty_floor`.
    pub mismatch_penalty: f64,
    pub penalty_floor: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            verified_threshold: 0.7,
            allow_imageless: false,
            imageless_confidence: 0.6,
            variance_threshold: DEFAULT_VARIANCE_THRESHOLD,
            match_bonus: 0.15,
            mismatch_penalty: 0.25,
            penalty_floor: 0.3,
        }
    }
}

impl VerifierConfig {
    pub fn with_verified_threshold(mut self, threshold: f64) -> Self {
        self.verified_threshold = threshold;
        self
    }

    pub fn with_allow_imageless(mut self, allow: bool) -> Self {
        self.allow_imageless = allow;
        self
    }
}

/// One verification request, projected out of the pending `Action`.
#[derive(Debug, Clone)]
pub struct VerifyActionRequest {
    pub category: ActionCategory,
    pub image_ref: Option<String>,
    pub submitted: SubmittedData,
}

impl From<&ecoproof_common::Action> for VerifyActionRequest {
    fn from(action: &ecoproof_common::Action) -> Self {
        Self {
            category: action.category,
            image_ref: action.proof_image_ref.clone(),
            submitted: action.submitted.clone(),
        }
    }
}

pub struct VerificationOrchestrator {
    config: VerifierConfig,
    extraction: Box<dyn ExtractionClient>,
    estimator: ImpactEstimator,
    analysis: Option<AnalysisClient>,
}

impl VerificationOrchestrator {
    pub fn new(
        config: VerifierConfig,
        extraction: Box<dyn ExtractionClient>,
        estimator: ImpactEstimator,
    ) -> Self {
        Self {
            config,
            extraction,
            estimator,
            analysis: None,
        }
    }

    /// Enable the combined-analysis path ahead of the staged pipeline.
    pub fn with_analysis(mut self, client: AnalysisClient) -> Self {
        self.analysis = Some(client);
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Run verification to a terminal outcome. Never returns an error:
    /// every failure mode maps to a rejection with an explanatory analysis
    /// string.
    pub async fn verify_action(&self, request: &VerifyActionRequest) -> VerificationOutcome {
        if let Some(analysis) = &self.analysis {
            match analysis
                .analyze(request.image_ref.as_deref(), &request.submitted)
                .await
            {
                Ok(combined) => {
                    return VerificationOutcome {
                        verified: combined.verified,
                        confidence: combined.confidence.clamp(0.0, 1.0),
                        analysis: combined.analysis,
                        extracted: combined.extracted,
                        impact: combined.co2_kg.map(|co2_kg| ecoproof_common::ImpactEstimate {
                            co2_kg,
                            confidence: combined.confidence.clamp(0.0, 1.0),
                            methodology: "combined analysis".to_string(),
                            breakdown: None,
                        }),
                    };
                }
                Err(err) => {
                    warn!(error = %err, "combined analysis failed, falling back to staged pipeline");
                }
            }
        }

        self.staged(request).await
    }

    async fn staged(&self, request: &VerifyActionRequest) -> VerificationOutcome {
        let image_ref = match request.image_ref.as_deref() {
            Some(image_ref) => image_ref,
            None => return self.imageless_outcome(),
        };

        let extraction = match self.extraction.extract(image_ref).await {
            Ok(extraction) => extraction,
            Err(err) => {
                // Client-level errors are unexpected here (the HTTP client
                // degrades internally); treat them like the catch-all path.
                warn!(error = %err, "extraction client error during verification");
                return VerificationOutcome::rejected(
                    0.0,
                    format!("verification error: {err}"),
                );
            }
        };

        if !extraction.success {
            return VerificationOutcome::rejected(
                extraction.confidence,
                format!(
                    "bill extraction failed (confidence {:.2}): extraction service unavailable or image unreadable",
                    extraction.confidence
                ),
            );
        }

        let extracted_kwh = extraction.fields.kwh.unwrap_or(0.0);
        if extracted_kwh <= 0.0 {
            return VerificationOutcome {
                verified: false,
                confidence: extraction.confidence.clamp(0.0, 1.0),
                analysis: format!(
                    "no usable consumption figure extracted from bill (confidence {:.2})",
                    extraction.confidence
                ),
                extracted: Some(extraction.fields),
                impact: None,
            };
        }

        let cross_check = match request.submitted.kwh {
            Some(user_kwh) => {
                cross_validate(user_kwh, extracted_kwh, self.config.variance_threshold)
            }
            None => CrossCheck::Unavailable,
        };

        let energy_type = request
            .submitted
            .energy_type
            .clone()
            .unwrap_or_else(|| request.category.default_energy_type().to_string());

        // Estimate from the extracted figure, not the user's claim.
        let impact = self
            .estimator
            .estimate(&ImpactRequest {
                kwh: extracted_kwh,
                energy_type,
                household_size: request.submitted.household_size,
                region: request.submitted.region.clone(),
            })
            .await;

        let confidence = self.combine(extraction.confidence, impact.confidence, &cross_check);
        let verified = confidence > self.config.verified_threshold;

        let analysis = self.describe(
            extraction.confidence,
            &cross_check,
            &impact,
            confidence,
            verified,
        );

        VerificationOutcome {
            verified,
            confidence,
            analysis,
            extracted: Some(extraction.fields),
            impact: Some(impact),
        }
    }

    fn imageless_outcome(&self) -> VerificationOutcome {
        if self.config.allow_imageless {
            VerificationOutcome {
                verified: true,
                confidence: self.config.imageless_confidence.clamp(0.0, 1.0),
                analysis: format!(
                    "no proof image provided; accepted under imageless policy with fixed confidence {:.2}",
                    self.config.imageless_confidence
                ),
                extracted: None,
                impact: None,
            }
        } else {
            VerificationOutcome::rejected(
                0.0,
                "no image provided; submissions require a bill or receipt image",
            )
        }
    }

    /// Confidence combination: equal-weight blend of extraction and
    /// estimator confidence, adjusted by the cross-check result.
    fn combine(&self, ocr: f64, estimator: f64, cross_check: &CrossCheck) -> f64 {
        let mut confidence = 0.5 * ocr + 0.5 * estimator;
        match cross_check {
            CrossCheck::Compared(c) if c.within_threshold => {
                confidence += self.config.match_bonus;
            }
            CrossCheck::Compared(_) => {
                confidence = (confidence - self.config.mismatch_penalty)
                    .max(self.config.penalty_floor);
            }
            CrossCheck::Unavailable => {}
        }
        confidence.clamp(0.0, 1.0)
    }

    fn describe(
        &self,
        ocr_confidence: f64,
        cross_check: &CrossCheck,
        impact: &ecoproof_common::ImpactEstimate,
        confidence: f64,
        verified: bool,
    ) -> String {
        let mut parts = Vec::with_capacity(4);
        parts.push(format!("extraction ok (confidence {ocr_confidence:.2})"));

        match cross_check {
            CrossCheck::Compared(c) if c.within_threshold => parts.push(format!(
                "cross-check passed: reported {:.1} kWh vs extracted {:.1} kWh, variance {:.1}%",
                c.user_kwh,
                c.extracted_kwh,
                c.variance * 100.0
            )),
            CrossCheck::Compared(c) => parts.push(format!(
                "cross-check mismatch: reported {:.1} kWh vs extracted {:.1} kWh, variance {:.1}% exceeds {:.0}% threshold",
                c.user_kwh,
                c.extracted_kwh,
                c.variance * 100.0,
                self.config.variance_threshold * 100.0
            )),
            CrossCheck::Unavailable => {
                parts.push("cross-check skipped (no reported kWh to compare)".to_string())
            }
        }

        let consumption = impact
            .breakdown
            .as_ref()
            .map(|b| b.consumption_kwh)
            .unwrap_or_default();
        let factor = impact
            .breakdown
            .as_ref()
            .map(|b| b.emission_factor)
            .unwrap_or_default();
        parts.push(format!(
            "estimated impact {:.2} kg CO2 ({:.1} kWh x {:.3}, {}, confidence {:.2})",
            impact.co2_kg, consumption, factor, impact.methodology, impact.confidence
        ));

        if verified {
            parts.push(format!(
                "verified (confidence {:.2} > threshold {:.2})",
                confidence, self.config.verified_threshold
            ));
        } else {
            parts.push(format!(
                "rejected (confidence {:.2} <= threshold {:.2})",
                confidence, self.config.verified_threshold
            ));
        }

        parts.join("; ")
    }
}

/// Batch verification processes at most this many actions concurrently,
/// with [`BATCH_DELAY`] between waves, as backpressure on the external
/// extraction/estimation/chain services.
pub const BATCH_CONCURRENCY: usize = 3;
pub const BATCH_DELAY: Duration = Duration::from_millis(250);
