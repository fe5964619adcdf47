use crate::domain::models::{StudyPlan, StudyResource, UndoEntry};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Everything persisted for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDocument {
    pub plan: StudyPlan,
    pub resources: Vec<StudyResource>,
    pub undo: Option<UndoEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceLogEntry {
    pub token: u64,
    pub kind: String,
    pub outcome: String,
    pub message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

pub trait PlanRepository: Send + Sync {
    fn load(&self, session_id: &str) -> Result<Option<PlanDocument>, InfraError>;
    fn save(&self, session_id: &str, document: &PlanDocument) -> Result<(), InfraError>;
    fn record_rebalance(&self, session_id: &str, entry: &RebalanceLogEntry) -> Result<(), InfraError>;
    fn list_rebalances(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<RebalanceLogEntry>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqlitePlanRepository {
    db_path: PathBuf,
}

impl SqlitePlanRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_database(&self.db_path)
    }
}

impl PlanRepository for SqlitePlanRepository {
    fn load(&self, session_id: &str) -> Result<Option<PlanDocument>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(String, String, Option<String>)> = connection
            .query_row(
                "SELECT plan_json, resources_json, undo_json FROM study_plans WHERE session_id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((plan_json, resources_json, undo_json)) = row else {
            return Ok(None);
        };

        let plan: StudyPlan = serde_json::from_str(&plan_json)?;
        plan.validate().map_err(|error| {
            InfraError::Validation(format!("stored plan for session '{session_id}' is invalid: {error}"))
        })?;
        let resources: Vec<StudyResource> = serde_json::from_str(&resources_json)?;
        let undo = undo_json
            .as_deref()
            .map(serde_json::from_str::<UndoEntry>)
            .transpose()?;

        Ok(Some(PlanDocument {
            plan,
            resources,
            undo,
        }))
    }

    fn save(&self, session_id: &str, document: &PlanDocument) -> Result<(), InfraError> {
        let plan_json = serde_json::to_string(&document.plan)?;
        let resources_json = serde_json::to_string(&document.resources)?;
        let undo_json = document
            .undo
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO study_plans (session_id, plan_json, resources_json, undo_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id) DO UPDATE SET
               plan_json = excluded.plan_json,
               resources_json = excluded.resources_json,
               undo_json = excluded.undo_json,
               updated_at = excluded.updated_at",
            params![
                session_id,
                plan_json,
                resources_json,
                undo_json,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn record_rebalance(&self, session_id: &str, entry: &RebalanceLogEntry) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO rebalance_log (session_id, token, kind, outcome, message, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                entry.token as i64,
                entry.kind,
                entry.outcome,
                entry.message,
                entry.recorded_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn list_rebalances(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<RebalanceLogEntry>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT token, kind, outcome, message, recorded_at FROM rebalance_log
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = statement.query_map(params![session_id, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (token, kind, outcome, message, recorded_at_raw) = row?;
            let recorded_at = DateTime::parse_from_rfc3339(&recorded_at_raw).map_err(|error| {
                InfraError::InvalidConfig(format!(
                    "invalid rebalance_log.recorded_at '{recorded_at_raw}': {error}"
                ))
            })?;
            entries.push(RebalanceLogEntry {
                token: token as u64,
                kind,
                outcome,
                message,
                recorded_at: recorded_at.with_timezone(&Utc),
            });
        }
        Ok(entries)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPlanRepository {
    documents: Mutex<HashMap<String, PlanDocument>>,
    rebalances: Mutex<Vec<(String, RebalanceLogEntry)>>,
}

impl PlanRepository for InMemoryPlanRepository {
    fn load(&self, session_id: &str) -> Result<Option<PlanDocument>, InfraError> {
        let documents = self
            .documents
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("plan store lock poisoned: {error}")))?;
        Ok(documents.get(session_id).cloned())
    }

    fn save(&self, session_id: &str, document: &PlanDocument) -> Result<(), InfraError> {
        let mut documents = self
            .documents
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("plan store lock poisoned: {error}")))?;
        documents.insert(session_id.to_string(), document.clone());
        Ok(())
    }

    fn record_rebalance(&self, session_id: &str, entry: &RebalanceLogEntry) -> Result<(), InfraError> {
        let mut rebalances = self.rebalances.lock().map_err(|error| {
            InfraError::InvalidConfig(format!("rebalance log lock poisoned: {error}"))
        })?;
        rebalances.push((session_id.to_string(), entry.clone()));
        Ok(())
    }

    fn list_rebalances(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<RebalanceLogEntry>, InfraError> {
        let rebalances = self.rebalances.lock().map_err(|error| {
            InfraError::InvalidConfig(format!("rebalance log lock poisoned: {error}"))
        })?;
        Ok(rebalances
            .iter()
            .rev()
            .filter(|(owner, _)| owner == session_id)
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect())
    }
}
