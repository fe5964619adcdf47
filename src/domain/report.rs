use crate::domain::models::{DailySchedule, StudyPlan, StudyResource, TaskStatus};
use crate::domain::pool::scheduled_resource_ids;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportTotals {
    pub task_count: usize,
    pub completed_count: usize,
    pub planned_minutes: u32,
    pub completed_minutes: u32,
    pub logged_minutes: u32,
    pub rest_days: usize,
}

/// Read-only slice of a plan handed to a report renderer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportSnapshot {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: Vec<DailySchedule>,
    pub resources: Vec<StudyResource>,
    pub totals: ReportTotals,
}

pub fn build_report(
    plan: &StudyPlan,
    resources: &[StudyResource],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<ReportSnapshot, String> {
    let requested_start = start.unwrap_or(plan.start_date);
    let requested_end = end.unwrap_or(plan.end_date);
    if requested_end < requested_start {
        return Err(format!(
            "report end {requested_end} is before report start {requested_start}"
        ));
    }
    let start_date = requested_start.max(plan.start_date);
    let end_date = requested_end.min(plan.end_date);
    if end_date < start_date {
        return Ok(ReportSnapshot {
            start_date: requested_start,
            end_date: requested_end,
            days: Vec::new(),
            resources: Vec::new(),
            totals: ReportTotals::default(),
        });
    }

    let days = plan
        .schedule
        .iter()
        .filter(|day| day.date >= start_date && day.date <= end_date)
        .cloned()
        .collect::<Vec<_>>();

    let referenced = scheduled_resource_ids(&days);
    let resources = resources
        .iter()
        .filter(|resource| referenced.contains(&resource.id))
        .cloned()
        .collect();

    let mut totals = ReportTotals::default();
    for day in &days {
        if day.is_rest_day {
            totals.rest_days += 1;
        }
        for task in &day.tasks {
            totals.task_count += 1;
            totals.planned_minutes = totals.planned_minutes.saturating_add(task.duration_minutes);
            totals.logged_minutes = totals
                .logged_minutes
                .saturating_add(task.actual_study_time_minutes);
            if task.status == TaskStatus::Completed {
                totals.completed_count += 1;
                totals.completed_minutes =
                    totals.completed_minutes.saturating_add(task.duration_minutes);
            }
        }
    }

    Ok(ReportSnapshot {
        start_date,
        end_date,
        days,
        resources,
        totals,
    })
}
