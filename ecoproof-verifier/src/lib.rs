//! Verification pipeline for ecoproof: impact estimation, cross-validation,
//! reward calculation, and the orchestrator that combines them into a
//! terminal verified/rejected decision.

pub mod crosscheck;
pub mod estimate;
pub mod orchestrator;
pub mod reward;

pub use crosscheck::{cross_validate, Comparison, CrossCheck, DEFAULT_VARIANCE_THRESHOLD};
pub use estimate::{ImpactEstimator, ImpactRequest, FALLBACK_METHODOLOGY, LOCAL_METHODOLOGY};
pub use orchestrator::{
    VerificationOrchestrator, VerifierConfig, VerifyActionRequest, BATCH_CONCURRENCY, BATCH_DELAY,
};
pub use reward::calculate_reward;
