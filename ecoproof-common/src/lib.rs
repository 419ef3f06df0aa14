//! Shared domain types for the ecoproof pipeline.
//!
//! Everything that crosses a crate boundary lives here: the `Action`
//! lifecycle record, the transient `VerificationOutcome`, ledger rows, and
//! the immutable configuration tables (emission factors, reward multipliers)
//! that the estimator and reward calculator consume.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// US-average grid emission factor, kg CO2 per kWh.
pub const DEFAULT_GRID_FACTOR: f64 = 0.416;

/// Category of a claimed environmental action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCategory {
    Energy,
    Solar,
    Transport,
    Waste,
    Water,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::Energy => "energy",
            ActionCategory::Solar => "solar",
            ActionCategory::Transport => "transport",
            ActionCategory::Waste => "waste",
            ActionCategory::Water => "water",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "energy" => Some(ActionCategory::Energy),
            "solar" => Some(ActionCategory::Solar),
            "transport" => Some(ActionCategory::Transport),
            "waste" => Some(ActionCategory::Waste),
            "water" => Some(ActionCategory::Water),
            _ => None,
        }
    }

    /// Emission-factor key used when the submission does not name one.
    pub fn default_energy_type(&self) -> &'static str {
        match self {
            ActionCategory::Energy => "electricity_grid",
            ActionCategory::Solar => "solar",
            ActionCategory::Transport => "gasoline",
            ActionCategory::Waste | ActionCategory::Water => "electricity_grid",
        }
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Forward-only lifecycle state of an action. `Pending` is the only
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Verified,
    Rejected,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionStatus::Pending)
    }
}

/// User-supplied claim data attached to a submission.
///
/// Known fields are typed; anything else the client sends rides along in
/// `extra` untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmittedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kwh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub household_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, JsonValue>,
}

/// A user's claimed environmental activity and its verification lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub owner_id: String,
    pub category: ActionCategory,
    pub submitted: SubmittedData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_image_ref: Option<String>,
    pub status: ActionStatus,
    pub confidence: f64,
    #[serde(default)]
    pub analysis_note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_co2_kg: Option<f64>,
    #[serde(default)]
    pub tokens_issued: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn new(
        owner_id: impl Into<String>,
        category: ActionCategory,
        submitted: SubmittedData,
        proof_image_ref: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            category,
            submitted,
            proof_image_ref,
            status: ActionStatus::Pending,
            confidence: 0.0,
            analysis_note: String::new(),
            estimated_co2_kg: None,
            tokens_issued: 0,
            tx_reference: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Structured fields pulled out of a bill image by the extraction layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kwh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Result of one extraction attempt. `success = false` carries the degraded
/// confidence the caller should surface when rejecting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub success: bool,
    #[serde(default)]
    pub text: String,
    pub confidence: f64,
    #[serde(default)]
    pub fields: ExtractedFields,
}

/// Per-estimate arithmetic detail, surfaced alongside the CO2 figure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactBreakdown {
    pub energy_type: String,
    pub consumption_kwh: f64,
    pub emission_factor: f64,
    pub basic_calculation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactEstimate {
    pub co2_kg: f64,
    pub confidence: f64,
    pub methodology: String,
    /// Absent only for estimates that did not go through the factor model
    /// (e.g. the combined-analysis path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<ImpactBreakdown>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effort {
    Easy,
    Medium,
    Hard,
}

/// One efficiency measure and what it would save at the grid factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsMeasure {
    pub kwh_saved: f64,
    pub co2_saved_kg: f64,
    pub effort: Effort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsPotential {
    pub led_lighting: SavingsMeasure,
    pub smart_thermostat: SavingsMeasure,
    pub efficient_appliances: SavingsMeasure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    pub impact: Effort,
    pub effort: Effort,
    pub potential_savings_kwh: f64,
}

/// Transient verification decision, projected into the `Action` record by
/// the caller. Never persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub confidence: f64,
    pub analysis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<ExtractedFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactEstimate>,
}

impl VerificationOutcome {
    pub fn rejected(confidence: f64, analysis: impl Into<String>) -> Self {
        Self {
            verified: false,
            confidence: confidence.clamp(0.0, 1.0),
            analysis: analysis.into(),
            extracted: None,
            impact: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Mint,
    Burn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub action_id: Uuid,
    pub confidence: f64,
    pub co2_saved_kg: f64,
}

/// Durable ledger row. Every verified action with `tokens_issued > 0` has
/// exactly one mint row whose metadata names the action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub owner_id: String,
    pub kind: TransactionKind,
    pub amount: u64,
    pub chain_tx_hash: String,
    pub created_at: DateTime<Utc>,
    pub metadata: TransactionMetadata,
}

/// Derived balance: mint minus burn over the owner's transaction rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBalance {
    pub owner_id: String,
    pub total_tokens: i64,
    pub total_co2_saved_kg: f64,
}

/// Narrow identity-collaborator record: where rewards get paid out, plus
/// cumulative totals maintained by the post-mint projector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub owner_id: String,
    pub payout_address: String,
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub total_co2_saved_kg: f64,
}

/// Immutable emission-factor table, kg CO2 per unit consumed. Loaded at
/// startup; unknown energy types resolve to the grid default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionFactorTable {
    factors: HashMap<String, f64>,
    default_factor: f64,
}

impl Default for EmissionFactorTable {
    fn default() -> Self {
        let factors = [
            ("electricity_grid", DEFAULT_GRID_FACTOR),
            ("natural_gas", 0.202),
            ("gasoline", 2.31),
            ("diesel", 2.68),
            ("coal", 0.820),
            ("solar", 0.041),
            ("wind", 0.011),
            ("hydro", 0.024),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            factors,
            default_factor: DEFAULT_GRID_FACTOR,
        }
    }
}

impl EmissionFactorTable {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, f64)>, default_factor: f64) -> Self {
        Self {
            factors: pairs.into_iter().collect(),
            default_factor,
        }
    }

    pub fn factor(&self, energy_type: &str) -> f64 {
        self.factors
            .get(energy_type)
            .copied()
            .unwrap_or(self.default_factor)
    }

    pub fn grid_factor(&self) -> f64 {
        self.factor("electricity_grid")
    }
}

/// Immutable category-to-multiplier table for reward calculation. Categories
/// absent from the table earn the neutral 1.0 multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiplierTable {
    multipliers: HashMap<ActionCategory, f64>,
}

impl Default for MultiplierTable {
    fn default() -> Self {
        let multipliers = [
            (ActionCategory::Energy, 1.0),
            (ActionCategory::Solar, 1.5),
            (ActionCategory::Transport, 1.2),
            (ActionCategory::Waste, 0.8),
            (ActionCategory::Water, 0.9),
        ]
        .into_iter()
        .collect();
        Self { multipliers }
    }
}

impl MultiplierTable {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (ActionCategory, f64)>) -> Self {
        Self {
            multipliers: pairs.into_iter().collect(),
        }
    }

    pub fn multiplier(&self, category: ActionCategory) -> f64 {
        self.multipliers.get(&category).copied().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_roundtrip() {
        for category in [
            ActionCategory::Energy,
            ActionCategory::Solar,
            ActionCategory::Transport,
            ActionCategory::Waste,
            ActionCategory::Water,
        ] {
            assert_eq!(ActionCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(ActionCategory::parse("ENERGY"), Some(ActionCategory::Energy));
        assert_eq!(ActionCategory::parse("geothermal"), None);
    }

    #[test]
    fn factor_table_defaults_to_grid() {
        let table = EmissionFactorTable::default();
        assert_eq!(table.factor("electricity_grid"), DEFAULT_GRID_FACTOR);
        assert_eq!(table.factor("solar"), 0.041);
        assert_eq!(table.factor("something_else"), DEFAULT_GRID_FACTOR);
    }

    #[test]
    fn multiplier_table_matches_policy() {
        let table = MultiplierTable::default();
        assert_eq!(table.multiplier(ActionCategory::Energy), 1.0);
        assert_eq!(table.multiplier(ActionCategory::Solar), 1.5);
        assert_eq!(table.multiplier(ActionCategory::Transport), 1.2);
        assert_eq!(table.multiplier(ActionCategory::Waste), 0.8);
        assert_eq!(table.multiplier(ActionCategory::Water), 0.9);
    }

    #[test]
    fn new_action_starts_pending() {
        let action = Action::new("user-1", ActionCategory::Energy, SubmittedData::default(), None);
        assert_eq!(action.status, ActionStatus::Pending);
        assert!(!action.status.is_terminal());
        assert_eq!(action.tokens_issued, 0);
        assert!(action.estimated_co2_kg.is_none());
    }

    #[test]
    fn submitted_data_keeps_unknown_fields() {
        let raw = serde_json::json!({
            "kwh": 450.0,
            "description": "monthly bill",
            "meterId": "M-77"
        });
        let data: SubmittedData = serde_json::from_value(raw).unwrap();
        assert_eq!(data.kwh, Some(450.0));
        assert_eq!(data.extra.get("meterId").and_then(|v| v.as_str()), Some("M-77"));
    }
}
