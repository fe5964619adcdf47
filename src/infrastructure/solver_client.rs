use crate::domain::models::{
    DailySchedule, ExceptionDateRule, RebalanceOptions, StudyResource,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Slack on the HTTP client timeout so the per-attempt timer always fires first.
const CLIENT_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Everything the solver needs to regenerate a schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SolverRequest {
    pub options: RebalanceOptions,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub schedule: Vec<DailySchedule>,
    pub resources: Vec<StudyResource>,
    pub topic_order: Vec<String>,
    pub cram_topic_order: Vec<String>,
    pub deadlines: BTreeMap<String, NaiveDate>,
    pub is_cram_mode_active: bool,
    pub are_special_topics_interleaved: bool,
    pub exception_rules: Vec<ExceptionDateRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SolverResponse {
    pub schedule: Vec<DailySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_pass_end_date: Option<NaiveDate>,
}

#[async_trait]
pub trait PlanSolver: Send + Sync {
    async fn regenerate(&self, request: &SolverRequest) -> Result<SolverResponse, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestPlanSolver {
    client: Client,
    endpoint: Url,
    client_timeout: Duration,
}

impl ReqwestPlanSolver {
    /// `attempt_timeout` is the per-attempt limit the caller enforces.
    pub fn new(endpoint: &str, attempt_timeout: Duration) -> Result<Self, InfraError> {
        let endpoint = Self::regenerate_endpoint(endpoint)?;
        let client_timeout = attempt_timeout.saturating_add(CLIENT_TIMEOUT_MARGIN);
        let client = Client::builder()
            .timeout(client_timeout)
            .build()
            .map_err(|error| InfraError::Solver(format!("failed to build http client: {error}")))?;
        Ok(Self {
            client,
            endpoint,
            client_timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn client_timeout(&self) -> Duration {
        self.client_timeout
    }

    fn regenerate_endpoint(base: &str) -> Result<Url, InfraError> {
        let base = base.trim();
        if base.is_empty() {
            return Err(InfraError::InvalidConfig(
                "solver endpoint must not be empty".to_string(),
            ));
        }
        let mut url = Url::parse(base).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid solver endpoint '{base}': {error}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig(format!("solver endpoint '{base}' cannot be a base"))
            })?;
            segments.pop_if_empty();
            segments.push("regenerate");
        }
        Ok(url)
    }

    fn solver_http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("solver api error: http {}", status.as_u16())
        } else {
            format!("solver api error: http {}; body={body}", status.as_u16())
        };
        InfraError::Solver(message)
    }
}

#[async_trait]
impl PlanSolver for ReqwestPlanSolver {
    async fn regenerate(&self, request: &SolverRequest) -> Result<SolverResponse, InfraError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    InfraError::Solver(format!("network error: solver request timed out: {error}"))
                } else {
                    InfraError::Solver(format!("network error while requesting regeneration: {error}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Solver(format!("network error while reading solver response: {error}")))?;

        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(InfraError::Solver(format!(
                "solver temporarily unavailable: http {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(Self::solver_http_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|error| {
            InfraError::Solver(format!("invalid solver payload: {error}; body={body}"))
        })
    }
}
