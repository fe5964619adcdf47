use crate::domain::models::{RebalanceOptions, StudyPlan, StudyResource};
use crate::infrastructure::config::SolverSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::solver_client::{PlanSolver, SolverRequest, SolverResponse};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration as TokioDuration};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RebalancePhase {
    #[default]
    Idle,
    Requesting,
    Applying,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Apply,
    Fail,
    Stale,
}

/// Token bookkeeping for regeneration requests.
///
/// Only the most recently issued token may settle, and never twice.
#[derive(Debug, Clone, Default)]
pub struct RebalanceTracker {
    latest_issued: u64,
    last_settled: u64,
    phase: RebalancePhase,
}

impl RebalanceTracker {
    pub fn begin(&mut self) -> RequestToken {
        self.latest_issued = self.latest_issued.saturating_add(1);
        self.phase = RebalancePhase::Requesting;
        RequestToken(self.latest_issued)
    }

    pub fn phase(&self) -> RebalancePhase {
        self.phase
    }

    pub fn latest(&self) -> Option<RequestToken> {
        (self.latest_issued > 0).then_some(RequestToken(self.latest_issued))
    }

    pub fn is_stale(&self, token: RequestToken) -> bool {
        token.0 != self.latest_issued || token.0 <= self.last_settled
    }

    pub fn settle(&mut self, token: RequestToken, succeeded: bool) -> Settlement {
        if self.is_stale(token) {
            return Settlement::Stale;
        }
        self.last_settled = token.0;
        if succeeded {
            self.phase = RebalancePhase::Applying;
            Settlement::Apply
        } else {
            self.phase = RebalancePhase::Failed;
            Settlement::Fail
        }
    }

    /// Marks an applied response as fully committed.
    pub fn finish_apply(&mut self) {
        if self.phase == RebalancePhase::Applying {
            self.phase = RebalancePhase::Idle;
        }
    }
}

pub fn build_solver_request(
    plan: &StudyPlan,
    resources: &[StudyResource],
    options: &RebalanceOptions,
) -> SolverRequest {
    SolverRequest {
        options: options.clone(),
        start_date: plan.start_date,
        end_date: plan.end_date,
        schedule: plan.schedule.clone(),
        resources: resources
            .iter()
            .filter(|resource| !resource.is_archived)
            .cloned()
            .collect(),
        topic_order: plan.topic_order.clone(),
        cram_topic_order: plan.cram_topic_order.clone(),
        deadlines: plan.deadlines.clone(),
        is_cram_mode_active: plan.is_cram_mode_active,
        are_special_topics_interleaved: plan.are_special_topics_interleaved,
        exception_rules: plan.exception_rules.values().cloned().collect(),
    }
}

/// Swaps the solver's schedule into the plan the request was built from.
pub fn apply_solver_response(
    base_plan: &StudyPlan,
    response: SolverResponse,
) -> Result<StudyPlan, String> {
    let mut next = base_plan.clone();
    next.schedule = response.schedule;
    next.first_pass_end_date = response.first_pass_end_date;
    next.validate()
        .map_err(|error| format!("solver returned an invalid plan: {error}"))?;
    Ok(next)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            attempt_timeout_ms: 30_000,
        }
    }
}

impl From<&SolverSettings> for RetryPolicy {
    fn from(settings: &SolverSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay_ms: settings.base_delay_ms,
            attempt_timeout_ms: u64::try_from(settings.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

pub struct RebalanceService<S>
where
    S: PlanSolver,
{
    solver: Arc<S>,
    retry_policy: RetryPolicy,
}

impl<S> RebalanceService<S>
where
    S: PlanSolver,
{
    pub fn new(solver: Arc<S>) -> Self {
        Self {
            solver,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub async fn regenerate(&self, request: &SolverRequest) -> Result<SolverResponse, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let attempt_timeout = TokioDuration::from_millis(self.retry_policy.attempt_timeout_ms);
        let mut attempt: u32 = 0;

        loop {
            let result = match timeout(attempt_timeout, self.solver.regenerate(request)).await {
                Ok(result) => result,
                Err(_) => Err(InfraError::SolverTimeout(self.retry_policy.attempt_timeout_ms)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(error) if self.should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt));
                    tracing::warn!(
                        kind = request.options.kind(),
                        attempt = attempt + 1,
                        delay_ms = delay,
                        error = %error,
                        "retrying solver request"
                    );
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn should_retry(&self, error: &InfraError) -> bool {
        match error {
            InfraError::Solver(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
            }
            _ => false,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{FakePlanSolver, FakeSolverResponse};
    use super::*;
    use crate::domain::models::fixtures::{date, resource, sample_plan};
    use proptest::prelude::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            attempt_timeout_ms: 1_000,
        }
    }

    fn shifted_response() -> SolverResponse {
        let mut plan = sample_plan();
        plan.schedule[0].tasks.clear();
        SolverResponse {
            schedule: plan.schedule,
            first_pass_end_date: Some(date("2026-03-06")),
        }
    }

    #[test]
    fn tracker_discards_older_tokens_once_newer_issued() {
        let mut tracker = RebalanceTracker::default();
        assert_eq!(tracker.phase(), RebalancePhase::Idle);
        assert!(tracker.latest().is_none());

        let first = tracker.begin();
        let second = tracker.begin();
        assert_eq!(tracker.phase(), RebalancePhase::Requesting);
        assert!(first < second);

        assert_eq!(tracker.settle(second, true), Settlement::Apply);
        assert_eq!(tracker.phase(), RebalancePhase::Applying);
        tracker.finish_apply();
        assert_eq!(tracker.phase(), RebalancePhase::Idle);

        assert_eq!(tracker.settle(first, true), Settlement::Stale);
        assert_eq!(tracker.settle(second, true), Settlement::Stale);
        assert_eq!(tracker.phase(), RebalancePhase::Idle);
    }

    #[test]
    fn tracker_reports_failure_for_latest_token() {
        let mut tracker = RebalanceTracker::default();
        let token = tracker.begin();
        assert_eq!(tracker.settle(token, false), Settlement::Fail);
        assert_eq!(tracker.phase(), RebalancePhase::Failed);
        tracker.finish_apply();
        assert_eq!(tracker.phase(), RebalancePhase::Failed);
    }

    #[test]
    fn request_carries_plan_inputs_and_skips_archived_resources() {
        let plan = sample_plan();
        let mut archived = resource("card_000", "cardiology");
        archived.is_archived = true;
        let resources = vec![resource("phys_000", "physics"), archived];
        let options = RebalanceOptions::TopicOrder {
            topic_order: plan.topic_order.clone(),
            cram: false,
        };

        let request = build_solver_request(&plan, &resources, &options);
        assert_eq!(request.options, options);
        assert_eq!(request.schedule, plan.schedule);
        assert_eq!(request.resources.len(), 1);
        assert_eq!(request.resources[0].id, "phys_000");
        assert_eq!(request.deadlines, plan.deadlines);
        assert_eq!(request.cram_topic_order, plan.cram_topic_order);

        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(value["options"]["type"], "topic-order");
        assert_eq!(value["isCramModeActive"], false);
        assert_eq!(value["startDate"], "2026-03-02");
    }

    #[test]
    fn apply_replaces_schedule_and_first_pass_only() {
        let mut base = sample_plan();
        base.is_cram_mode_active = true;
        let next = apply_solver_response(&base, shifted_response()).expect("valid response");
        assert!(next.schedule[0].tasks.is_empty());
        assert_eq!(next.first_pass_end_date, Some(date("2026-03-06")));
        assert!(next.is_cram_mode_active);
        assert_eq!(next.topic_order, base.topic_order);
    }

    #[test]
    fn apply_rejects_schedule_outside_plan_bounds() {
        let base = sample_plan();
        let mut response = shifted_response();
        response.schedule[6].date = date("2026-04-01");
        let error = apply_solver_response(&base, response).expect_err("out of range");
        assert!(error.contains("invalid plan"));
    }

    #[tokio::test]
    async fn regenerate_retries_transient_network_errors() {
        let solver = Arc::new(FakePlanSolver::with_responses(vec![
            FakeSolverResponse::NetworkError,
            FakeSolverResponse::NetworkError,
            FakeSolverResponse::Success(shifted_response()),
        ]));
        let service = RebalanceService::new(solver.clone()).with_retry_policy(fast_policy(3));
        let request = build_solver_request(&sample_plan(), &[], &RebalanceOptions::Standard);

        let response = service.regenerate(&request).await.expect("third attempt succeeds");
        assert_eq!(response, shifted_response());
        assert_eq!(solver.call_count(), 3);
    }

    #[tokio::test]
    async fn regenerate_gives_up_after_max_attempts() {
        let solver = Arc::new(FakePlanSolver::with_responses(vec![
            FakeSolverResponse::NetworkError,
            FakeSolverResponse::NetworkError,
        ]));
        let service = RebalanceService::new(solver.clone()).with_retry_policy(fast_policy(2));
        let request = build_solver_request(&sample_plan(), &[], &RebalanceOptions::Reset);

        let error = service.regenerate(&request).await.expect_err("exhausted");
        assert!(matches!(error, InfraError::Solver(_)));
        assert_eq!(solver.call_count(), 2);
    }

    #[tokio::test]
    async fn regenerate_does_not_retry_rejections() {
        let solver = Arc::new(FakePlanSolver::with_responses(vec![FakeSolverResponse::Rejected]));
        let service = RebalanceService::new(solver.clone()).with_retry_policy(fast_policy(3));
        let request = build_solver_request(&sample_plan(), &[], &RebalanceOptions::Standard);

        assert!(service.regenerate(&request).await.is_err());
        assert_eq!(solver.call_count(), 1);
    }

    #[tokio::test]
    async fn regenerate_maps_slow_solver_to_timeout() {
        let solver = Arc::new(FakePlanSolver::with_responses(vec![FakeSolverResponse::Hang]));
        let service = RebalanceService::new(solver.clone()).with_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            attempt_timeout_ms: 20,
        });
        let request = build_solver_request(&sample_plan(), &[], &RebalanceOptions::Standard);

        let error = service.regenerate(&request).await.expect_err("timed out");
        assert!(matches!(error, InfraError::SolverTimeout(20)));
        assert_eq!(solver.call_count(), 1);
    }

    #[test]
    fn retry_policy_follows_solver_settings() {
        let settings = SolverSettings {
            endpoint: "http://solver.local".to_string(),
            timeout: std::time::Duration::from_secs(12),
            max_attempts: 5,
            base_delay_ms: 250,
        };
        assert_eq!(
            RetryPolicy::from(&settings),
            RetryPolicy {
                max_attempts: 5,
                base_delay_ms: 250,
                attempt_timeout_ms: 12_000,
            }
        );
    }

    proptest! {
        #[test]
        fn only_the_latest_token_ever_settles(
            issued in 1usize..12,
            settle_order in proptest::collection::vec(0usize..12, 1..24),
        ) {
            let mut tracker = RebalanceTracker::default();
            let tokens: Vec<RequestToken> = (0..issued).map(|_| tracker.begin()).collect();
            let latest = *tokens.last().expect("at least one token");

            let mut settled = 0;
            for index in settle_order {
                let token = tokens[index % tokens.len()];
                let settlement = tracker.settle(token, index % 2 == 0);
                if token == latest && settled == 0 {
                    prop_assert_ne!(settlement, Settlement::Stale);
                    settled += 1;
                } else {
                    prop_assert_eq!(settlement, Settlement::Stale);
                }
            }
        }
    }
}
