use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::env_or;
use crate::errors::AppError;
use crate::queue::RiskAnalysisJobData;

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("scoring engine unavailable: {0}")]
    Unavailable(String),
    #[error("invalid scoring response: {0}")]
    InvalidResponse(String),
}

/// One scoring call: the prompt built from sanitized supplier data, plus the
/// raw job data for engines that score without a prompt.
#[derive(Debug, Clone)]
pub struct ScoringRequest {
    pub supplier_id: Uuid,
    pub prompt: String,
    pub data: RiskAnalysisJobData,
}

/// The scoring result, persisted verbatim as the supplier's `ai_analysis`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAnalysis {
    pub risk_score: f64,
    pub analysis: String,
    pub key_risks: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
    pub model: String,
}

impl RiskAnalysis {
    pub fn validate(&self) -> Result<(), ScoringError> {
        let in_range = |value: f64| value.is_finite() && (0.0..=100.0).contains(&value);

        if !in_range(self.risk_score) {
            return Err(ScoringError::InvalidResponse(format!(
                "riskScore {} outside 0-100",
                self.risk_score
            )));
        }
        if !in_range(self.confidence) {
            return Err(ScoringError::InvalidResponse(format!(
                "confidence {} outside 0-100",
                self.confidence
            )));
        }
        if !(3..=5).contains(&self.key_risks.len()) {
            return Err(ScoringError::InvalidResponse(format!(
                "expected 3-5 keyRisks, got {}",
                self.key_risks.len()
            )));
        }
        if !(3..=5).contains(&self.recommendations.len()) {
            return Err(ScoringError::InvalidResponse(format!(
                "expected 3-5 recommendations, got {}",
                self.recommendations.len()
            )));
        }
        if self.analysis.trim().is_empty() {
            return Err(ScoringError::InvalidResponse("empty analysis".into()));
        }
        Ok(())
    }
}

#[async_trait]
pub trait ScoringEngine: Send + Sync {
    async fn analyze(&self, request: &ScoringRequest) -> Result<RiskAnalysis, ScoringError>;
}

/// Deterministic stand-in for the production model.
#[derive(Debug, Clone, Default)]
pub struct MockScoringEngine {
    latency: Duration,
}

impl MockScoringEngine {
    pub const MODEL: &'static str = "mock-v1";

    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let latency_ms: u64 = env_or("MOCK_SCORING_LATENCY_MS", 2_000)?;
        Ok(Self::new(Duration::from_millis(latency_ms)))
    }
}

#[async_trait]
impl ScoringEngine for MockScoringEngine {
    async fn analyze(&self, request: &ScoringRequest) -> Result<RiskAnalysis, ScoringError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        tracing::debug!(supplier_id = %request.supplier_id, prompt_len = request.prompt.len(), "mock scoring");

        Ok(RiskAnalysis {
            risk_score: 58.0,
            analysis: "The supplier processes customer data through internet-facing services, which exposes it \
                       to credential theft, API abuse and misconfiguration of its cloud estate. Its reliance on \
                       shared infrastructure introduces shared-responsibility gaps, and limited visibility into \
                       its incident response and monitoring leaves detection times uncertain. Existing \
                       certifications suggest moderate maturity; continuous assessment is advised."
                .to_string(),
            key_risks: vec![
                "Data exposure through vulnerable or misconfigured APIs".into(),
                "Weak access control and authentication on administrative interfaces".into(),
                "Incomplete encryption of data at rest and in transit".into(),
                "Slow incident detection and response".into(),
                "Fourth-party dependencies widening the supply chain".into(),
            ],
            recommendations: vec![
                "Obtain a current SOC 2 Type II or ISO 27001 report".into(),
                "Require multi-factor authentication for every account".into(),
                "Schedule annual penetration tests with shared results".into(),
                "Contract a breach notification window of 72 hours or less".into(),
                "Verify encryption standards for stored and transmitted data".into(),
            ],
            confidence: 75.0,
            generated_at: Utc::now(),
            model: Self::MODEL.to_string(),
        })
    }
}
