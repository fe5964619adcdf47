use crate::application::rebalance::{
    apply_solver_response, build_solver_request, RebalancePhase, RebalanceService,
    RebalanceTracker, RequestToken, RetryPolicy, Settlement,
};
use crate::application::sync_status::{NowProvider, SyncSnapshot, SyncStatusTracker};
use crate::application::undo::UndoLedger;
use crate::domain::models::{
    DayType, ExceptionDateRule, OptionalTaskDraft, RebalanceOptions, ScheduledTask, StudyPlan,
    StudyResource, UndoEntry,
};
use crate::domain::mutations;
use crate::domain::pool::{self, PoolSummary};
use crate::domain::report::{build_report, ReportSnapshot};
use crate::domain::rules::{self, CapacityDefaults};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::plan_repository::{PlanDocument, PlanRepository, RebalanceLogEntry};
use crate::infrastructure::solver_client::{PlanSolver, SolverRequest, SolverResponse};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub capacity: CapacityDefaults,
    pub retry_policy: RetryPolicy,
}

/// Inputs for a brand-new session.
#[derive(Debug, Clone)]
pub struct PlanSeed {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub topic_order: Vec<String>,
    pub resources: Vec<StudyResource>,
}

/// A regeneration that has been issued but not yet answered.
#[derive(Debug, Clone)]
pub struct PendingRebalance {
    token: RequestToken,
    options: RebalanceOptions,
    base_plan: StudyPlan,
    superseded: Option<RebalanceOptions>,
    request: SolverRequest,
}

impl PendingRebalance {
    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub fn request(&self) -> &SolverRequest {
        &self.request
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "lowercase")]
pub enum RebalanceOutcome {
    Applied,
    Failed(String),
    Stale,
}

impl RebalanceOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Failed(_) => "failed",
            Self::Stale => "stale",
        }
    }
}

struct SessionState {
    plan: StudyPlan,
    resources: Vec<StudyResource>,
    undo: UndoLedger,
    sync: SyncStatusTracker,
    tracker: RebalanceTracker,
    follow_up: Option<RebalanceOptions>,
}

pub struct PlanSession<S, R>
where
    S: PlanSolver,
    R: PlanRepository,
{
    session_id: String,
    service: RebalanceService<S>,
    repository: Arc<R>,
    capacity: CapacityDefaults,
    now_provider: NowProvider,
    state: Mutex<SessionState>,
}

impl<S, R> PlanSession<S, R>
where
    S: PlanSolver,
    R: PlanRepository,
{
    pub fn open(
        session_id: &str,
        solver: Arc<S>,
        repository: Arc<R>,
        settings: SessionSettings,
    ) -> Result<Self, InfraError> {
        let session_id = normalize_session_id(session_id)?;
        let document = repository
            .load(&session_id)?
            .ok_or_else(|| InfraError::SessionNotFound(session_id.clone()))?;
        tracing::debug!(session = %session_id, "session opened");
        Ok(Self::from_document(session_id, solver, repository, settings, document))
    }

    pub fn create(
        session_id: &str,
        seed: PlanSeed,
        solver: Arc<S>,
        repository: Arc<R>,
        settings: SessionSettings,
    ) -> Result<Self, InfraError> {
        let session_id = normalize_session_id(session_id)?;
        if repository.load(&session_id)?.is_some() {
            return Err(InfraError::Validation(format!(
                "session '{session_id}' already exists"
            )));
        }

        let mut plan = rules::empty_plan(seed.start_date, seed.end_date, &settings.capacity)
            .map_err(InfraError::Validation)?;
        plan.topic_order = seed.topic_order.clone();
        plan.cram_topic_order = seed.topic_order;
        plan.validate().map_err(InfraError::Validation)?;

        let mut resources = Vec::new();
        for resource in seed.resources {
            resources = pool::add_resource(&resources, resource).map_err(InfraError::Validation)?;
        }

        let document = PlanDocument {
            plan,
            resources,
            undo: None,
        };
        repository.save(&session_id, &document)?;
        tracing::info!(
            session = %session_id,
            start = %document.plan.start_date,
            end = %document.plan.end_date,
            "session created"
        );
        Ok(Self::from_document(session_id, solver, repository, settings, document))
    }

    fn from_document(
        session_id: String,
        solver: Arc<S>,
        repository: Arc<R>,
        settings: SessionSettings,
        document: PlanDocument,
    ) -> Self {
        let now_provider: NowProvider = Arc::new(Utc::now);
        Self {
            session_id,
            service: RebalanceService::new(solver).with_retry_policy(settings.retry_policy),
            repository,
            capacity: settings.capacity,
            now_provider: now_provider.clone(),
            state: Mutex::new(SessionState {
                plan: document.plan,
                resources: document.resources,
                undo: UndoLedger::from_snapshot(document.undo),
                sync: SyncStatusTracker::new().with_now_provider(now_provider),
                tracker: RebalanceTracker::default(),
                follow_up: None,
            }),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        if let Ok(state) = self.state.get_mut() {
            let sync = std::mem::take(&mut state.sync);
            state.sync = sync.with_now_provider(now_provider.clone());
        }
        self.now_provider = now_provider;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn plan(&self) -> Result<StudyPlan, InfraError> {
        Ok(self.lock_state()?.plan.clone())
    }

    pub fn resources(&self) -> Result<Vec<StudyResource>, InfraError> {
        Ok(self.lock_state()?.resources.clone())
    }

    pub fn sync_status(&self) -> Result<SyncSnapshot, InfraError> {
        Ok(self.lock_state()?.sync.snapshot())
    }

    pub fn rebalance_phase(&self) -> Result<RebalancePhase, InfraError> {
        Ok(self.lock_state()?.tracker.phase())
    }

    pub fn can_undo(&self) -> Result<bool, InfraError> {
        Ok(!self.lock_state()?.undo.is_empty())
    }

    pub fn pending_follow_up(&self) -> Result<Option<RebalanceOptions>, InfraError> {
        Ok(self.lock_state()?.follow_up.clone())
    }

    pub fn pool_summary(&self) -> Result<PoolSummary, InfraError> {
        let state = self.lock_state()?;
        Ok(pool::summarize_pool(&state.resources, &state.plan.schedule))
    }

    pub fn report(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<ReportSnapshot, InfraError> {
        let state = self.lock_state()?;
        build_report(&state.plan, &state.resources, start, end).map_err(InfraError::Validation)
    }

    /// The date a viewer should land on, kept inside the plan horizon.
    pub fn focus_date(&self, today: NaiveDate) -> Result<NaiveDate, InfraError> {
        Ok(self.lock_state()?.plan.clamp_date(today))
    }

    pub fn rebalance_history(&self, limit: usize) -> Result<Vec<RebalanceLogEntry>, InfraError> {
        self.repository.list_rebalances(&self.session_id, limit)
    }

    pub fn toggle_task_status(&self, date: NaiveDate, task_id: &str) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = mutations::toggle_task_status(&state.plan, date, task_id) else {
            tracing::debug!(session = %self.session_id, %date, task_id, "toggle skipped: task not found");
            return Ok(false);
        };
        self.commit(&mut state, next, None, "toggle_task_status");
        Ok(true)
    }

    /// Appends an ad hoc task and returns its generated id.
    pub fn add_optional_task(
        &self,
        date: NaiveDate,
        draft: &OptionalTaskDraft,
    ) -> Result<String, InfraError> {
        let task_id = next_id("task");
        let mut state = self.lock_state()?;
        let next = mutations::add_optional_task(&state.plan, date, draft, &task_id)
            .map_err(InfraError::Validation)?;
        self.commit(&mut state, next, None, "add_optional_task");
        Ok(task_id)
    }

    pub fn replace_day_tasks(
        &self,
        date: NaiveDate,
        tasks: Vec<ScheduledTask>,
    ) -> Result<(), InfraError> {
        let mut state = self.lock_state()?;
        let next = mutations::replace_day_tasks(&state.plan, date, tasks)
            .map_err(InfraError::Validation)?;
        self.commit(&mut state, next, Some(RebalanceOptions::Standard), "replace_day_tasks");
        Ok(())
    }

    pub fn reorder_day_tasks(
        &self,
        date: NaiveDate,
        from: usize,
        to: usize,
    ) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = mutations::reorder_day_tasks(&state.plan, date, from, to) else {
            return Ok(false);
        };
        self.commit(&mut state, next, Some(RebalanceOptions::Standard), "reorder_day_tasks");
        Ok(true)
    }

    pub fn master_reset(&self) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = mutations::master_reset(&state.plan) else {
            return Ok(false);
        };
        self.commit(&mut state, next, None, "master_reset");
        Ok(true)
    }

    pub fn log_study_time(&self, task_id: &str, minutes: u32) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = mutations::log_study_time(&state.plan, task_id, minutes) else {
            tracing::debug!(session = %self.session_id, task_id, minutes, "study time not logged");
            return Ok(false);
        };
        self.commit(&mut state, next, None, "log_study_time");
        Ok(true)
    }

    pub fn add_exception_rule(
        &self,
        date: NaiveDate,
        day_type: DayType,
        minutes: Option<u32>,
    ) -> Result<(), InfraError> {
        let rule = ExceptionDateRule::for_day_type(date, day_type, &self.capacity, minutes)
            .map_err(InfraError::Validation)?;
        let mut state = self.lock_state()?;
        let next = rules::upsert_exception_rule(&state.plan, rule, &self.capacity)
            .map_err(InfraError::Validation)?;
        self.commit(
            &mut state,
            next,
            Some(RebalanceOptions::ExceptionAdded { date }),
            "add_exception_rule",
        );
        Ok(())
    }

    pub fn remove_exception_rule(&self, date: NaiveDate) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = rules::remove_exception_rule(&state.plan, date, &self.capacity) else {
            return Ok(false);
        };
        self.commit(&mut state, next, Some(RebalanceOptions::Standard), "remove_exception_rule");
        Ok(true)
    }

    /// Re-resolves every day's capacity against the current planner defaults.
    pub fn refresh_day_policies(&self) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let next = rules::apply_day_policies(&state.plan, &self.capacity);
        if next == state.plan {
            return Ok(false);
        }
        self.commit(&mut state, next, Some(RebalanceOptions::Standard), "refresh_day_policies");
        Ok(true)
    }

    pub fn reorder_topics(&self, from: usize, to: usize, cram: bool) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = mutations::reorder_topics(&state.plan, from, to, cram) else {
            return Ok(false);
        };
        let topic_order = if cram {
            next.cram_topic_order.clone()
        } else {
            next.topic_order.clone()
        };
        self.commit(
            &mut state,
            next,
            Some(RebalanceOptions::TopicOrder { topic_order, cram }),
            "reorder_topics",
        );
        Ok(true)
    }

    pub fn set_topic_deadline(
        &self,
        topic: &str,
        deadline: Option<NaiveDate>,
    ) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = mutations::set_topic_deadline(&state.plan, topic, deadline)
            .map_err(InfraError::Validation)?
        else {
            return Ok(false);
        };
        let options = RebalanceOptions::DeadlineChange {
            topic: topic.trim().to_string(),
            deadline,
        };
        self.commit(&mut state, next, Some(options), "set_topic_deadline");
        Ok(true)
    }

    pub fn set_cram_mode(&self, active: bool) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = mutations::set_cram_mode(&state.plan, active) else {
            return Ok(false);
        };
        self.commit(&mut state, next, Some(RebalanceOptions::Standard), "set_cram_mode");
        Ok(true)
    }

    pub fn set_special_topics_interleaved(&self, interleaved: bool) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = mutations::set_special_topics_interleaved(&state.plan, interleaved) else {
            return Ok(false);
        };
        self.commit(
            &mut state,
            next,
            Some(RebalanceOptions::Standard),
            "set_special_topics_interleaved",
        );
        Ok(true)
    }

    pub fn add_resource(&self, resource: StudyResource) -> Result<(), InfraError> {
        let mut state = self.lock_state()?;
        let resource_id = resource.id.clone();
        state.resources =
            pool::add_resource(&state.resources, resource).map_err(InfraError::Validation)?;
        tracing::info!(session = %self.session_id, resource_id = %resource_id, "resource added");
        self.persist(&mut state);
        Ok(())
    }

    pub fn update_resource(&self, resource: StudyResource) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let resource_id = resource.id.clone();
        let Some(next) =
            pool::update_resource(&state.resources, resource).map_err(InfraError::Validation)?
        else {
            return Ok(false);
        };
        state.resources = next;
        tracing::info!(session = %self.session_id, resource_id = %resource_id, "resource updated");
        self.persist(&mut state);
        Ok(true)
    }

    pub fn archive_resource(&self, resource_id: &str) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = pool::archive_resource(&state.resources, resource_id) else {
            return Ok(false);
        };
        state.resources = next;
        tracing::info!(session = %self.session_id, resource_id, "resource archived");
        self.persist(&mut state);
        Ok(true)
    }

    pub fn restore_resource(&self, resource_id: &str) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = pool::restore_resource(&state.resources, resource_id) else {
            return Ok(false);
        };
        state.resources = next;
        tracing::info!(session = %self.session_id, resource_id, "resource restored");
        self.persist(&mut state);
        Ok(true)
    }

    /// Removes a resource for good. Pending tasks that pointed at it are pruned
    /// from the plan and a standard rebalance is scheduled. When tasks were
    /// pruned, undo brings back both the tasks and the resource.
    pub fn delete_resource(&self, resource_id: &str) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(next) = pool::delete_resource(&state.resources, resource_id) else {
            return Ok(false);
        };
        let previous_resources = std::mem::replace(&mut state.resources, next);
        tracing::info!(session = %self.session_id, resource_id, "resource deleted");
        let pruned = pool::prune_orphaned_tasks(&state.plan, &state.resources);
        match pruned {
            Some(pruned) => self.commit_with_pool(
                &mut state,
                pruned,
                Some(previous_resources),
                Some(RebalanceOptions::Standard),
                "delete_resource",
            ),
            None => self.persist(&mut state),
        }
        Ok(true)
    }

    pub fn undo(&self) -> Result<bool, InfraError> {
        let mut state = self.lock_state()?;
        let Some(entry) = state.undo.take() else {
            return Ok(false);
        };
        state.plan = entry.plan;
        if let Some(resources) = entry.resources {
            state.resources = resources;
        }
        if state.follow_up != entry.follow_up {
            tracing::debug!(
                session = %self.session_id,
                dropped = ?state.follow_up.as_ref().map(RebalanceOptions::kind),
                restored = ?entry.follow_up.as_ref().map(RebalanceOptions::kind),
                "scheduled rebalance reset by undo"
            );
        }
        state.follow_up = entry.follow_up;
        tracing::info!(session = %self.session_id, "undo applied");
        self.persist(&mut state);
        Ok(true)
    }

    /// Issues a new request token and snapshots what the solver needs.
    pub fn begin_rebalance(&self, options: RebalanceOptions) -> Result<PendingRebalance, InfraError> {
        let mut state = self.lock_state()?;
        self.begin_locked(&mut state, options)
    }

    fn begin_locked(
        &self,
        state: &mut SessionState,
        options: RebalanceOptions,
    ) -> Result<PendingRebalance, InfraError> {
        options
            .validate(&state.plan)
            .map_err(InfraError::Validation)?;

        let token = state.tracker.begin();
        state.sync.begin();
        let superseded = state.follow_up.take();
        if let Some(superseded) = &superseded {
            tracing::debug!(
                session = %self.session_id,
                kind = superseded.kind(),
                "scheduled rebalance superseded"
            );
        }
        let request = build_solver_request(&state.plan, &state.resources, &options);
        tracing::info!(
            session = %self.session_id,
            token = token.value(),
            kind = options.kind(),
            "rebalance requested"
        );
        Ok(PendingRebalance {
            token,
            options,
            base_plan: state.plan.clone(),
            superseded,
            request,
        })
    }

    pub fn complete_rebalance(
        &self,
        pending: PendingRebalance,
        result: Result<SolverResponse, InfraError>,
    ) -> Result<RebalanceOutcome, InfraError> {
        let candidate = result
            .map_err(|error| error.to_string())
            .and_then(|response| apply_solver_response(&pending.base_plan, response));

        let outcome = {
            let mut state = self.lock_state()?;
            match state.tracker.settle(pending.token, candidate.is_ok()) {
                Settlement::Stale => {
                    tracing::debug!(
                        session = %self.session_id,
                        token = pending.token.value(),
                        "stale rebalance response discarded"
                    );
                    RebalanceOutcome::Stale
                }
                Settlement::Fail => {
                    let message = candidate
                        .err()
                        .unwrap_or_else(|| "rebalance failed".to_string());
                    state.sync.fail(message.clone());
                    RebalanceOutcome::Failed(message)
                }
                Settlement::Apply => match candidate {
                    Ok(next) => {
                        state.undo.record(UndoEntry::new(
                            pending.base_plan.clone(),
                            pending.superseded.clone(),
                        ));
                        state.plan = next;
                        state.tracker.finish_apply();
                        if self.write_document(&state) {
                            state.sync.succeed();
                        } else {
                            state.sync.fail("rebalance applied but the plan could not be saved");
                        }
                        RebalanceOutcome::Applied
                    }
                    Err(message) => {
                        state.sync.fail(message.clone());
                        RebalanceOutcome::Failed(message)
                    }
                },
            }
        };

        tracing::info!(
            session = %self.session_id,
            token = pending.token.value(),
            kind = pending.options.kind(),
            outcome = outcome.label(),
            "rebalance settled"
        );
        self.record_outcome(&pending, &outcome);
        Ok(outcome)
    }

    pub async fn rebalance(&self, options: RebalanceOptions) -> Result<RebalanceOutcome, InfraError> {
        let pending = self.begin_rebalance(options)?;
        let result = self.service.regenerate(pending.request()).await;
        self.complete_rebalance(pending, result)
    }

    /// Sends the rebalance a local edit scheduled, if one is waiting.
    pub async fn flush_follow_up(&self) -> Result<Option<RebalanceOutcome>, InfraError> {
        let pending = {
            let mut state = self.lock_state()?;
            let Some(options) = state.follow_up.clone() else {
                return Ok(None);
            };
            self.begin_locked(&mut state, options)?
        };
        let result = self.service.regenerate(pending.request()).await;
        self.complete_rebalance(pending, result).map(Some)
    }

    fn commit(
        &self,
        state: &mut SessionState,
        next: StudyPlan,
        follow_up: Option<RebalanceOptions>,
        action: &str,
    ) {
        self.commit_with_pool(state, next, None, follow_up, action);
    }

    /// Swaps in `next` and records what undo needs: the previous plan, the
    /// previous pool when given, and the rebalance scheduled before this change.
    fn commit_with_pool(
        &self,
        state: &mut SessionState,
        next: StudyPlan,
        previous_resources: Option<Vec<StudyResource>>,
        follow_up: Option<RebalanceOptions>,
        action: &str,
    ) {
        let previous = std::mem::replace(&mut state.plan, next);
        let mut entry = UndoEntry::new(previous, state.follow_up.clone());
        if let Some(resources) = previous_resources {
            entry = entry.with_resources(resources);
        }
        state.undo.record(entry);
        if let Some(options) = follow_up {
            tracing::debug!(
                session = %self.session_id,
                kind = options.kind(),
                "rebalance scheduled"
            );
            state.follow_up = Some(options);
        }
        tracing::info!(session = %self.session_id, action, "plan updated");
        self.persist(state);
    }

    fn persist(&self, state: &mut SessionState) {
        let requesting = state.tracker.phase() == RebalancePhase::Requesting;
        if !requesting {
            state.sync.begin();
        }
        if self.write_document(state) {
            if !requesting {
                state.sync.succeed();
            }
        } else {
            state.sync.fail("failed to save plan locally");
        }
    }

    fn write_document(&self, state: &SessionState) -> bool {
        let document = PlanDocument {
            plan: state.plan.clone(),
            resources: state.resources.clone(),
            undo: state.undo.peek().cloned(),
        };
        match self.repository.save(&self.session_id, &document) {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(session = %self.session_id, error = %error, "failed to persist plan");
                false
            }
        }
    }

    fn record_outcome(&self, pending: &PendingRebalance, outcome: &RebalanceOutcome) {
        let entry = RebalanceLogEntry {
            token: pending.token.value(),
            kind: pending.options.kind().to_string(),
            outcome: outcome.label().to_string(),
            message: match outcome {
                RebalanceOutcome::Failed(message) => Some(message.clone()),
                _ => None,
            },
            recorded_at: (self.now_provider)(),
        };
        if let Err(error) = self.repository.record_rebalance(&self.session_id, &entry) {
            tracing::warn!(session = %self.session_id, error = %error, "failed to record rebalance");
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, SessionState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("session lock poisoned: {error}")))
    }
}

fn normalize_session_id(session_id: &str) -> Result<String, InfraError> {
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return Err(InfraError::Validation("session id must not be empty".to_string()));
    }
    Ok(session_id.to_string())
}
