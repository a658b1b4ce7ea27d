use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use reqwest::Client;
use shared::{
    domain::{RequestId, RiskScore},
    protocol::{AssessRiskRequest, AssessRiskResponse, RiskChecks},
};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::FlowError;

/// Scored result for one URL. Superseded by newer assessments, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    pub request_id: RequestId,
    pub url: String,
    pub score: RiskScore,
    pub checks: RiskChecks,
    pub message: String,
    pub assessed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RiskAssessmentClient {
    http: Client,
    endpoint: Url,
    timeout: Duration,
    next_request_id: Arc<AtomicU64>,
}

impl RiskAssessmentClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            endpoint,
            timeout,
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn assess(&self, url: &str) -> Result<RiskAssessment, FlowError> {
        let request_id = self.next_request_id();
        self.assess_with_id(request_id, url).await
    }

    /// Runs one assessment as its own abortable task. The handle yields only this
    /// request's result, regardless of other requests in flight.
    pub fn start(&self, url: &str) -> AssessmentHandle {
        let request_id = self.next_request_id();
        let client = self.clone();
        let target = url.to_string();
        let task = tokio::spawn(async move { client.assess_with_id(request_id, &target).await });
        AssessmentHandle {
            request_id,
            url: url.to_string(),
            task,
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn assess_with_id(
        &self,
        request_id: RequestId,
        url: &str,
    ) -> Result<RiskAssessment, FlowError> {
        let url = normalize_target(url)?;

        debug!(request_id = %request_id, url, "requesting risk assessment");
        let response = self
            .http
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&AssessRiskRequest {
                url: url.to_string(),
            })
            .send()
            .await
            .map_err(|err| self.unavailable(err))?;

        let status = response.status();
        if !status.is_success() {
            warn!(request_id = %request_id, %status, "scoring service returned an error status");
            return Err(FlowError::AssessmentUnavailable(format!(
                "scoring service returned HTTP {status}"
            )));
        }

        let body = response.bytes().await.map_err(|err| self.unavailable(err))?;
        let parsed: AssessRiskResponse = serde_json::from_slice(&body)
            .map_err(|err| FlowError::MalformedResponse(err.to_string()))?;

        info!(
            request_id = %request_id,
            url = %parsed.url,
            score = %parsed.score,
            "risk assessment received"
        );
        Ok(RiskAssessment {
            request_id,
            url: parsed.url,
            score: parsed.score,
            checks: parsed.checks,
            message: parsed.message,
            assessed_at: Utc::now(),
        })
    }

    fn unavailable(&self, err: reqwest::Error) -> FlowError {
        if err.is_timeout() {
            FlowError::AssessmentUnavailable(format!(
                "scoring service did not answer within {}s",
                self.timeout.as_secs_f32()
            ))
        } else {
            FlowError::AssessmentUnavailable(err.to_string())
        }
    }
}

/// Local validation done before anything is sent to the scoring service.
pub fn normalize_target(url: &str) -> Result<&str, FlowError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(FlowError::InvalidInput("URL must not be empty".to_string()));
    }
    Ok(url)
}

pub struct AssessmentHandle {
    request_id: RequestId,
    url: String,
    task: JoinHandle<Result<RiskAssessment, FlowError>>,
}

impl AssessmentHandle {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub async fn result(self) -> Result<RiskAssessment, FlowError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(FlowError::AssessmentUnavailable(format!(
                "assessment request {} was cancelled",
                self.request_id
            ))),
            Err(err) => Err(FlowError::AssessmentUnavailable(err.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "tests/risk_tests.rs"]
mod tests;
