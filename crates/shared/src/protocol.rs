//! Wire format of the risk scoring service.

use serde::{Deserialize, Serialize};

use crate::domain::RiskScore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessRiskRequest {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskChecks {
    pub https: bool,
    pub ssl_version: String,
    pub status_code: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessRiskResponse {
    pub url: String,
    pub score: RiskScore,
    pub checks: RiskChecks,
    pub message: String,
}
