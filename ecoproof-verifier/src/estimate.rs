//! CO2 impact estimation.
//!
//! The default mode computes the linear emission-factor formula locally with
//! a data-quality confidence score. When a remote estimator endpoint is
//! configured, it is preferred; any failure there falls back to the same
//! linear formula with confidence pinned at 0.5 and the methodology marked
//! accordingly.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use ecoproof_common::{
    Effort, EmissionFactorTable, ImpactBreakdown, ImpactEstimate, Recommendation,
    SavingsMeasure, SavingsPotential,
};

pub const LOCAL_METHODOLOGY: &str = "emission factor model";
pub const FALLBACK_METHODOLOGY: &str = "basic fallback";

#[derive(Debug, Clone, Serialize)]
pub struct ImpactRequest {
    pub kwh: f64,
    pub energy_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub household_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Deserialize)]
struct RemoteEstimateEnvelope {
    #[serde(default)]
    success: bool,
    result: Option<RemoteEstimate>,
}

#[derive(Deserialize)]
struct RemoteEstimate {
    co2_kg: f64,
    confidence: f64,
    #[serde(default)]
    methodology: Option<String>,
    #[serde(default)]
    breakdown: Option<ImpactBreakdown>,
}

#[derive(Clone)]
struct RemoteEstimator {
    endpoint: String,
    client: reqwest::Client,
}

/// Converts energy consumption into a CO2 figure with a confidence score.
/// Infallible from the caller's perspective; remote failures degrade into
/// the local fallback.
#[derive(Clone)]
pub struct ImpactEstimator {
    factors: EmissionFactorTable,
    remote: Option<RemoteEstimator>,
}

impl ImpactEstimator {
    pub fn new(factors: EmissionFactorTable) -> Self {
        Self {
            factors,
            remote: None,
        }
    }

    /// Prefer a remote estimator endpoint over the local formula. Errors
    /// from the endpoint never surface; they degrade to the fallback.
    pub fn with_remote(
        mut self,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("failed to build estimator HTTP client: {e}"))?;
        self.remote = Some(RemoteEstimator {
            endpoint: endpoint.into(),
            client,
        });
        Ok(self)
    }

    pub async fn estimate(&self, request: &ImpactRequest) -> ImpactEstimate {
        if let Some(remote) = &self.remote {
            match self.estimate_remote(remote, request).await {
                Ok(estimate) => return estimate,
                Err(reason) => {
                    warn!(reason = %reason, "remote estimator unavailable, using basic fallback");
                    return self.basic_fallback(request);
                }
            }
        }
        self.local_estimate(request)
    }

    async fn estimate_remote(
        &self,
        remote: &RemoteEstimator,
        request: &ImpactRequest,
    ) -> Result<ImpactEstimate, String> {
        let response = remote
            .client
            .post(&remote.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| format!("request error: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("estimator returned {}", response.status()));
        }

        let envelope = response
            .json::<RemoteEstimateEnvelope>()
            .await
            .map_err(|e| format!("invalid JSON body: {e}"))?;

        let result = match (envelope.success, envelope.result) {
            (true, Some(result)) => result,
            _ => return Err("estimator reported failure".to_string()),
        };

        Ok(ImpactEstimate {
            co2_kg: result.co2_kg.max(0.0),
            confidence: result.confidence.clamp(0.0, 1.0),
            methodology: result
                .methodology
                .unwrap_or_else(|| "remote estimator".to_string()),
            breakdown: result.breakdown,
        })
    }

    fn local_estimate(&self, request: &ImpactRequest) -> ImpactEstimate {
        let (co2_kg, breakdown) = self.compute(request);
        ImpactEstimate {
            co2_kg,
            confidence: self.data_quality_confidence(request),
            methodology: LOCAL_METHODOLOGY.to_string(),
            breakdown: Some(breakdown),
        }
    }

    fn basic_fallback(&self, request: &ImpactRequest) -> ImpactEstimate {
        let (co2_kg, breakdown) = self.compute(request);
        ImpactEstimate {
            co2_kg,
            confidence: 0.5,
            methodology: FALLBACK_METHODOLOGY.to_string(),
            breakdown: Some(breakdown),
        }
    }

    fn compute(&self, request: &ImpactRequest) -> (f64, ImpactBreakdown) {
        let kwh = request.kwh.max(0.0);
        let factor = self.factors.factor(&request.energy_type);
        let co2_kg = kwh * factor;
        let breakdown = ImpactBreakdown {
            energy_type: request.energy_type.clone(),
            consumption_kwh: kwh,
            emission_factor: factor,
            basic_calculation: co2_kg,
        };
        (co2_kg, breakdown)
    }

    /// Confidence from available data: base 0.5, +0.2 for a positive
    /// consumption figure, +0.1 each for energy type, household size, and
    /// region, capped at 1.0.
    fn data_quality_confidence(&self, request: &ImpactRequest) -> f64 {
        let mut confidence: f64 = 0.5;
        if request.kwh > 0.0 {
            confidence += 0.2;
        }
        if !request.energy_type.is_empty() {
            confidence += 0.1;
        }
        if request.household_size.is_some() {
            confidence += 0.1;
        }
        if request.region.is_some() {
            confidence += 0.1;
        }
        confidence.min(1.0)
    }

    /// Potential savings from common efficiency measures, valued at the
    /// grid emission factor.
    pub fn savings_potential(&self, kwh: f64) -> SavingsPotential {
        let grid = self.factors.grid_factor();
        let measure = |share: f64, effort: Effort| {
            let kwh_saved = kwh.max(0.0) * share;
            SavingsMeasure {
                kwh_saved,
                co2_saved_kg: kwh_saved * grid,
                effort,
            }
        };
        SavingsPotential {
            led_lighting: measure(0.15, Effort::Easy),
            smart_thermostat: measure(0.12, Effort::Medium),
            efficient_appliances: measure(0.20, Effort::Hard),
        }
    }

    pub fn recommendations(&self, kwh: f64) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        if kwh > 1000.0 {
            recommendations.push(Recommendation {
                title: "High Energy Usage Detected".to_string(),
                description: "Consider upgrading to energy-efficient appliances".to_string(),
                impact: Effort::Hard,
                effort: Effort::Medium,
                potential_savings_kwh: kwh * 0.2,
            });
        }

        if kwh > 500.0 {
            recommendations.push(Recommendation {
                title: "LED Lighting Upgrade".to_string(),
                description: "Replace incandescent bulbs with LED lighting".to_string(),
                impact: Effort::Medium,
                effort: Effort::Easy,
                potential_savings_kwh: kwh * 0.15,
            });
        }

        recommendations.push(Recommendation {
            title: "Smart Thermostat".to_string(),
            description: "Install a programmable smart thermostat".to_string(),
            impact: Effort::Medium,
            effort: Effort::Medium,
            potential_savings_kwh: kwh * 0.12,
        });

        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> ImpactEstimator {
        ImpactEstimator::new(EmissionFactorTable::default())
    }

    #[tokio::test]
    async fn grid_estimate_uses_linear_formula() {
        let request = ImpactRequest {
            kwh: 450.0,
            energy_type: "electricity_grid".to_string(),
            household_size: None,
            region: None,
        };
        let estimate = estimator().estimate(&request).await;
        assert!((estimate.co2_kg - 187.2).abs() < 1e-9);
        assert_eq!(estimate.methodology, LOCAL_METHODOLOGY);
        let breakdown = estimate.breakdown.unwrap();
        assert_eq!(breakdown.emission_factor, 0.416);
        assert_eq!(breakdown.consumption_kwh, 450.0);
    }

    #[tokio::test]
    async fn solar_estimate_is_materially_lower() {
        let grid = ImpactRequest {
            kwh: 450.0,
            energy_type: "electricity_grid".to_string(),
            household_size: None,
            region: None,
        };
        let solar = ImpactRequest {
            energy_type: "solar".to_string(),
            ..grid.clone()
        };
        let estimator = estimator();
        let grid_estimate = estimator.estimate(&grid).await;
        let solar_estimate = estimator.estimate(&solar).await;
        assert!(solar_estimate.co2_kg < grid_estimate.co2_kg / 5.0);
    }

    #[tokio::test]
    async fn zero_kwh_yields_zero_impact_and_lower_confidence() {
        let request = ImpactRequest {
            kwh: 0.0,
            energy_type: "electricity_grid".to_string(),
            household_size: None,
            region: None,
        };
        let estimate = estimator().estimate(&request).await;
        assert_eq!(estimate.co2_kg, 0.0);
        // no +0.2 consumption increment
        assert!((estimate.confidence - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn confidence_increments_with_data_quality() {
        let request = ImpactRequest {
            kwh: 450.0,
            energy_type: "electricity_grid".to_string(),
            household_size: Some(4),
            region: Some("US".to_string()),
        };
        let estimate = estimator().estimate(&request).await;
        assert!((estimate.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn savings_and_recommendations_scale_with_usage() {
        let estimator = estimator();
        let savings = estimator.savings_potential(1000.0);
        assert!((savings.led_lighting.kwh_saved - 150.0).abs() < 1e-9);
        assert!((savings.efficient_appliances.kwh_saved - 200.0).abs() < 1e-9);

        assert_eq!(estimator.recommendations(1200.0).len(), 3);
        assert_eq!(estimator.recommendations(600.0).len(), 2);
        assert_eq!(estimator.recommendations(100.0).len(), 1);
    }
}
