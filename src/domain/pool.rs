use crate::domain::models::{DailySchedule, ScheduledTask, StudyPlan, StudyResource, TaskStatus};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// Resource ids placed on at least one day.
///
/// Recomputed from the schedule on every call; split tasks count toward
/// their original resource.
pub fn scheduled_resource_ids(schedule: &[DailySchedule]) -> BTreeSet<String> {
    schedule
        .iter()
        .flat_map(|day| day.tasks.iter())
        .map(|task| task.source_resource_id().to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PoolClass {
    Archived,
    Scheduled,
    Unscheduled,
}

pub fn classify_resource(resource: &StudyResource, scheduled: &BTreeSet<String>) -> PoolClass {
    if resource.is_archived {
        PoolClass::Archived
    } else if scheduled.contains(&resource.id) {
        PoolClass::Scheduled
    } else {
        PoolClass::Unscheduled
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    pub scheduled: Vec<String>,
    pub unscheduled: Vec<String>,
    pub archived: Vec<String>,
    pub unscheduled_minutes: u32,
}

impl PoolSummary {
    pub fn has_unscheduled(&self) -> bool {
        !self.unscheduled.is_empty()
    }
}

pub fn summarize_pool(resources: &[StudyResource], schedule: &[DailySchedule]) -> PoolSummary {
    let scheduled = scheduled_resource_ids(schedule);
    let mut summary = PoolSummary::default();
    for resource in resources {
        match classify_resource(resource, &scheduled) {
            PoolClass::Archived => summary.archived.push(resource.id.clone()),
            PoolClass::Scheduled => summary.scheduled.push(resource.id.clone()),
            PoolClass::Unscheduled => {
                summary.unscheduled.push(resource.id.clone());
                summary.unscheduled_minutes = summary
                    .unscheduled_minutes
                    .saturating_add(resource.duration_minutes);
            }
        }
    }
    summary
}

pub fn add_resource(
    resources: &[StudyResource],
    resource: StudyResource,
) -> Result<Vec<StudyResource>, String> {
    resource.validate()?;
    if resources.iter().any(|existing| existing.id == resource.id) {
        return Err(format!("resource {} already exists", resource.id));
    }
    let mut next = resources.to_vec();
    next.push(resource);
    Ok(next)
}

pub fn update_resource(
    resources: &[StudyResource],
    resource: StudyResource,
) -> Result<Option<Vec<StudyResource>>, String> {
    resource.validate()?;
    let Some(index) = resources.iter().position(|existing| existing.id == resource.id) else {
        return Ok(None);
    };
    if resources[index] == resource {
        return Ok(None);
    }
    let mut next = resources.to_vec();
    next[index] = resource;
    Ok(Some(next))
}

/// Hides a resource from the active pool. Scheduled tasks are not touched.
pub fn archive_resource(resources: &[StudyResource], resource_id: &str) -> Option<Vec<StudyResource>> {
    set_archived(resources, resource_id, true)
}

pub fn restore_resource(resources: &[StudyResource], resource_id: &str) -> Option<Vec<StudyResource>> {
    set_archived(resources, resource_id, false)
}

pub fn delete_resource(resources: &[StudyResource], resource_id: &str) -> Option<Vec<StudyResource>> {
    if !resources.iter().any(|existing| existing.id == resource_id) {
        return None;
    }
    Some(
        resources
            .iter()
            .filter(|existing| existing.id != resource_id)
            .cloned()
            .collect(),
    )
}

/// Drops pending plan-derived tasks whose resource is gone from the pool.
///
/// Completed and optional tasks stay. Archived resources still count as
/// present.
pub fn prune_orphaned_tasks(plan: &StudyPlan, resources: &[StudyResource]) -> Option<StudyPlan> {
    let known = resources
        .iter()
        .map(|resource| resource.id.as_str())
        .collect::<HashSet<_>>();
    let is_orphan = |task: &ScheduledTask| {
        !task.is_optional
            && task.status == TaskStatus::Pending
            && !known.contains(task.source_resource_id())
    };
    if !plan.tasks().any(|task| is_orphan(task)) {
        return None;
    }

    let mut next = plan.clone();
    for day in &mut next.schedule {
        let before = day.tasks.len();
        day.tasks.retain(|task| !is_orphan(task));
        if day.tasks.len() != before {
            day.renumber();
        }
    }
    Some(next)
}

fn set_archived(
    resources: &[StudyResource],
    resource_id: &str,
    archived: bool,
) -> Option<Vec<StudyResource>> {
    let index = resources
        .iter()
        .position(|existing| existing.id == resource_id)?;
    if resources[index].is_archived == archived {
        return None;
    }
    let mut next = resources.to_vec();
    next[index].is_archived = archived;
    Some(next)
}
