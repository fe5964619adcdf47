//! Discrete plan edits.
//!
//! Every function takes the current plan by reference and hands back a new
//! one, so the caller can keep the previous value for undo. `None` means the
//! edit would not change anything; `Err` means the input was rejected before
//! any change was attempted.

use crate::domain::models::{
    OptionalTaskDraft, ScheduledTask, StudyPlan, TaskStatus, validate_non_empty,
};
use chrono::NaiveDate;
use std::collections::HashSet;

pub fn toggle_task_status(plan: &StudyPlan, date: NaiveDate, task_id: &str) -> Option<StudyPlan> {
    let day_index = plan.day_index(date)?;
    let task_index = plan.schedule[day_index]
        .tasks
        .iter()
        .position(|task| task.id == task_id)?;

    let mut next = plan.clone();
    let task = &mut next.schedule[day_index].tasks[task_index];
    task.status = task.status.toggled();
    Some(next)
}

pub fn add_optional_task(
    plan: &StudyPlan,
    date: NaiveDate,
    draft: &OptionalTaskDraft,
    task_id: &str,
) -> Result<StudyPlan, String> {
    draft.validate()?;
    validate_non_empty(task_id, "optional_task.id")?;
    let day_index = existing_day_index(plan, date)?;
    if plan.find_task(task_id).is_some() {
        return Err(format!("task id {task_id} is already scheduled"));
    }

    let mut next = plan.clone();
    let day = &mut next.schedule[day_index];
    let order = day.tasks.len() as u32;
    day.tasks.push(ScheduledTask {
        id: task_id.to_string(),
        resource_id: draft
            .resource_id
            .clone()
            .unwrap_or_else(|| task_id.to_string()),
        original_resource_id: None,
        title: draft.title.trim().to_string(),
        task_type: draft.task_type,
        original_topic: draft.topic.trim().to_string(),
        duration_minutes: draft.duration_minutes,
        status: TaskStatus::Pending,
        order,
        is_optional: true,
        pages: draft.pages,
        case_count: draft.case_count,
        question_count: draft.question_count,
        chapter_number: draft.chapter_number,
        actual_study_time_minutes: 0,
    });
    Ok(next)
}

/// Swaps in a hand-edited task list for one day and flags the day as
/// manually modified. Other days are left alone; the caller is expected to
/// follow up with a standard rebalance.
pub fn replace_day_tasks(
    plan: &StudyPlan,
    date: NaiveDate,
    tasks: Vec<ScheduledTask>,
) -> Result<StudyPlan, String> {
    let day_index = existing_day_index(plan, date)?;

    let mut incoming = HashSet::new();
    for task in &tasks {
        task.validate()?;
        if !incoming.insert(task.id.as_str()) {
            return Err(format!("task id {} appears twice in the replacement", task.id));
        }
    }
    let collision = plan
        .schedule
        .iter()
        .filter(|day| day.date != date)
        .flat_map(|day| day.tasks.iter().map(move |task| (day.date, task)))
        .find(|(_, task)| incoming.contains(task.id.as_str()));
    if let Some((other_date, task)) = collision {
        return Err(format!("task id {} is already scheduled on {other_date}", task.id));
    }

    let mut next = plan.clone();
    let day = &mut next.schedule[day_index];
    day.tasks = tasks;
    day.renumber();
    day.is_manually_modified = true;
    Ok(next)
}

/// Marks every task pending again. Logged study time is kept.
pub fn master_reset(plan: &StudyPlan) -> Option<StudyPlan> {
    if plan
        .tasks()
        .all(|task| task.status == TaskStatus::Pending)
    {
        return None;
    }

    let mut next = plan.clone();
    for task in next.schedule.iter_mut().flat_map(|day| day.tasks.iter_mut()) {
        task.status = TaskStatus::Pending;
    }
    Some(next)
}

/// Adds focus minutes to a task found anywhere in the plan.
pub fn log_study_time(plan: &StudyPlan, task_id: &str, minutes: u32) -> Option<StudyPlan> {
    if minutes == 0 || plan.find_task(task_id).is_none() {
        return None;
    }

    let mut next = plan.clone();
    for task in next
        .schedule
        .iter_mut()
        .flat_map(|day| day.tasks.iter_mut())
        .filter(|task| task.id == task_id)
    {
        task.actual_study_time_minutes = task.actual_study_time_minutes.saturating_add(minutes);
    }
    Some(next)
}

/// Removes the element at `from` and reinserts it at `to`.
///
/// Returns `None` for out-of-range indices or when the move changes nothing.
pub fn move_item<T: Clone>(items: &[T], from: usize, to: usize) -> Option<Vec<T>> {
    if from >= items.len() || to >= items.len() || from == to {
        return None;
    }
    let mut moved = items.to_vec();
    let item = moved.remove(from);
    moved.insert(to, item);
    Some(moved)
}

pub fn reorder_topics(plan: &StudyPlan, from: usize, to: usize, cram: bool) -> Option<StudyPlan> {
    let source = if cram {
        &plan.cram_topic_order
    } else {
        &plan.topic_order
    };
    let reordered = move_item(source, from, to)?;

    let mut next = plan.clone();
    if cram {
        next.cram_topic_order = reordered;
    } else {
        next.topic_order = reordered;
    }
    Some(next)
}

pub fn reorder_day_tasks(
    plan: &StudyPlan,
    date: NaiveDate,
    from: usize,
    to: usize,
) -> Option<StudyPlan> {
    let day_index = plan.day_index(date)?;
    let reordered = move_item(&plan.schedule[day_index].tasks, from, to)?;

    let mut next = plan.clone();
    let day = &mut next.schedule[day_index];
    day.tasks = reordered;
    day.renumber();
    day.is_manually_modified = true;
    Some(next)
}

pub fn set_topic_deadline(
    plan: &StudyPlan,
    topic: &str,
    deadline: Option<NaiveDate>,
) -> Result<Option<StudyPlan>, String> {
    validate_non_empty(topic, "deadline.topic")?;
    let topic = topic.trim();
    if let Some(deadline) = deadline {
        if !plan.contains_date(deadline) {
            return Err(format!(
                "deadline {deadline} is outside {}..={}",
                plan.start_date, plan.end_date
            ));
        }
    }
    if plan.deadlines.get(topic).copied() == deadline {
        return Ok(None);
    }

    let mut next = plan.clone();
    match deadline {
        Some(deadline) => {
            next.deadlines.insert(topic.to_string(), deadline);
        }
        None => {
            next.deadlines.remove(topic);
        }
    }
    Ok(Some(next))
}

pub fn set_cram_mode(plan: &StudyPlan, active: bool) -> Option<StudyPlan> {
    if plan.is_cram_mode_active == active {
        return None;
    }
    let mut next = plan.clone();
    next.is_cram_mode_active = active;
    Some(next)
}

pub fn set_special_topics_interleaved(plan: &StudyPlan, interleaved: bool) -> Option<StudyPlan> {
    if plan.are_special_topics_interleaved == interleaved {
        return None;
    }
    let mut next = plan.clone();
    next.are_special_topics_interleaved = interleaved;
    Some(next)
}

fn existing_day_index(plan: &StudyPlan, date: NaiveDate) -> Result<usize, String> {
    if !plan.contains_date(date) {
        return Err(format!(
            "date {date} is outside {}..={}",
            plan.start_date, plan.end_date
        ));
    }
    plan.day_index(date)
        .ok_or_else(|| format!("no schedule entry for {date}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ResourceType;
    use crate::domain::models::fixtures::{date, sample_plan, task};
    use proptest::prelude::*;

    fn draft(title: &str, duration_minutes: u32) -> OptionalTaskDraft {
        OptionalTaskDraft {
            title: title.to_string(),
            resource_id: None,
            task_type: ResourceType::QuestionBank,
            topic: "physics".to_string(),
            duration_minutes,
            pages: None,
            case_count: None,
            question_count: Some(40),
            chapter_number: None,
        }
    }

    #[test]
    fn toggle_flips_only_the_named_task() {
        let plan = sample_plan();
        let day = date("2026-03-03");
        let toggled = toggle_task_status(&plan, day, "tsk-1-b").expect("task exists");
        let toggled_day = toggled.day(day).expect("day");
        assert_eq!(toggled_day.tasks[1].status, TaskStatus::Completed);
        assert_eq!(toggled_day.tasks[0].status, TaskStatus::Pending);
        assert_eq!(plan.day(day).expect("day").tasks[1].status, TaskStatus::Pending);
    }

    #[test]
    fn toggle_unknown_task_is_a_noop() {
        let plan = sample_plan();
        assert!(toggle_task_status(&plan, date("2026-03-03"), "missing").is_none());
        // The id exists, but on another day.
        assert!(toggle_task_status(&plan, date("2026-03-03"), "tsk-0-a").is_none());
        assert!(toggle_task_status(&plan, date("2027-01-01"), "tsk-0-a").is_none());
    }

    #[test]
    fn add_optional_task_appends_without_reordering() {
        let plan = sample_plan();
        let day = date("2026-03-04");
        let next = add_optional_task(&plan, day, &draft("Extra questions", 25), "tsk-extra")
            .expect("valid draft");
        let tasks = &next.day(day).expect("day").tasks;
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].id, "tsk-2-a");
        assert_eq!(tasks[1].id, "tsk-2-b");
        assert_eq!(tasks[2].id, "tsk-extra");
        assert_eq!(tasks[2].order, 2);
        assert!(tasks[2].is_optional);
        assert_eq!(tasks[2].status, TaskStatus::Pending);
        assert!(next.validate().is_ok());
    }

    #[test]
    fn add_optional_task_validates_before_changing_anything() {
        let plan = sample_plan();
        let day = date("2026-03-04");
        assert!(add_optional_task(&plan, day, &draft("  ", 25), "tsk-x").is_err());
        assert!(add_optional_task(&plan, day, &draft("Extra", 0), "tsk-x").is_err());
        assert!(add_optional_task(&plan, date("2026-04-01"), &draft("Extra", 10), "tsk-x").is_err());
        assert!(add_optional_task(&plan, day, &draft("Extra", 10), "tsk-0-a").is_err());
    }

    #[test]
    fn replace_day_tasks_renumbers_and_flags_only_that_day() {
        let plan = sample_plan();
        let day = date("2026-03-05");
        let replacement = vec![task("tsk-3-b", "card_003", 7), task("tsk-new", "neuro_001", 9)];
        let next = replace_day_tasks(&plan, day, replacement).expect("replace");

        let replaced = next.day(day).expect("day");
        assert!(replaced.is_manually_modified);
        assert_eq!(replaced.tasks[0].id, "tsk-3-b");
        assert_eq!(replaced.tasks[0].order, 0);
        assert_eq!(replaced.tasks[1].order, 1);
        for other in next.schedule.iter().filter(|other| other.date != day) {
            assert!(!other.is_manually_modified);
        }
        assert!(next.validate().is_ok());
    }

    #[test]
    fn replace_day_tasks_rejects_ids_used_elsewhere() {
        let plan = sample_plan();
        let replacement = vec![task("tsk-0-a", "phys_000", 0)];
        let result = replace_day_tasks(&plan, date("2026-03-05"), replacement);
        assert!(result.expect_err("collision").contains("2026-03-02"));
    }

    #[test]
    fn replace_day_tasks_rejects_duplicates_and_bad_tasks() {
        let plan = sample_plan();
        let day = date("2026-03-05");
        let duplicated = vec![task("tsk-z", "a", 0), task("tsk-z", "b", 1)];
        assert!(replace_day_tasks(&plan, day, duplicated).is_err());
        let mut invalid = task("tsk-y", "a", 0);
        invalid.duration_minutes = 0;
        assert!(replace_day_tasks(&plan, day, vec![invalid]).is_err());
        assert!(replace_day_tasks(&plan, date("2026-02-01"), Vec::new()).is_err());
    }

    #[test]
    fn master_reset_is_a_noop_when_nothing_is_completed() {
        assert!(master_reset(&sample_plan()).is_none());
    }

    #[test]
    fn log_study_time_searches_every_day() {
        let plan = sample_plan();
        let next = log_study_time(&plan, "tsk-6-b", 25).expect("task exists");
        let next = log_study_time(&next, "tsk-6-b", 5).expect("task exists");
        let (found_on, logged) = next.find_task("tsk-6-b").expect("task");
        assert_eq!(found_on, date("2026-03-08"));
        assert_eq!(logged.actual_study_time_minutes, 30);
        assert!(log_study_time(&plan, "missing", 25).is_none());
        assert!(log_study_time(&plan, "tsk-6-b", 0).is_none());
    }

    #[test]
    fn move_item_removes_then_reinserts() {
        let items = vec!["a", "b", "c", "d"];
        assert_eq!(move_item(&items, 0, 2), Some(vec!["b", "c", "a", "d"]));
        assert_eq!(move_item(&items, 3, 0), Some(vec!["d", "a", "b", "c"]));
        assert_eq!(move_item(&items, 1, 1), None);
        assert_eq!(move_item(&items, 4, 0), None);
    }

    #[test]
    fn reorder_topics_targets_the_requested_list() {
        let plan = sample_plan();
        let next = reorder_topics(&plan, 2, 0, false).expect("reordered");
        assert_eq!(next.topic_order, vec!["nuclear", "physics", "cardiology"]);
        assert_eq!(next.cram_topic_order, plan.cram_topic_order);

        let cram = reorder_topics(&plan, 0, 1, true).expect("reordered cram");
        assert_eq!(cram.cram_topic_order, vec!["physics", "cardiology"]);
    }

    #[test]
    fn reorder_day_tasks_keeps_order_dense() {
        let plan = sample_plan();
        let day = date("2026-03-02");
        let next = reorder_day_tasks(&plan, day, 1, 0).expect("reordered");
        let tasks = &next.day(day).expect("day").tasks;
        assert_eq!(tasks[0].id, "tsk-0-b");
        assert_eq!(tasks[0].order, 0);
        assert_eq!(tasks[1].order, 1);
        assert!(next.day(day).expect("day").is_manually_modified);
    }

    #[test]
    fn deadlines_must_fall_inside_the_plan() {
        let plan = sample_plan();
        assert!(set_topic_deadline(&plan, "cardiology", Some(date("2026-05-01"))).is_err());
        let next = set_topic_deadline(&plan, "cardiology", Some(date("2026-03-07")))
            .expect("valid")
            .expect("changed");
        assert_eq!(next.deadlines.get("cardiology"), Some(&date("2026-03-07")));
        let cleared = set_topic_deadline(&next, "physics", None)
            .expect("valid")
            .expect("changed");
        assert!(!cleared.deadlines.contains_key("physics"));
        assert!(set_topic_deadline(&cleared, "physics", None).expect("valid").is_none());
    }

    #[test]
    fn flag_setters_skip_unchanged_values() {
        let plan = sample_plan();
        assert!(set_cram_mode(&plan, false).is_none());
        assert!(set_cram_mode(&plan, true).expect("changed").is_cram_mode_active);
        assert!(set_special_topics_interleaved(&plan, true).is_none());
    }

    proptest! {
        #[test]
        fn toggling_twice_restores_status_and_keeps_logged_time(
            day_offset in 0usize..7,
            slot in 0usize..2,
            logged in 0u32..500
        ) {
            let mut plan = sample_plan();
            plan.schedule[day_offset].tasks[slot].actual_study_time_minutes = logged;
            let day = plan.schedule[day_offset].date;
            let task_id = plan.schedule[day_offset].tasks[slot].id.clone();

            let once = toggle_task_status(&plan, day, &task_id).expect("first toggle");
            let twice = toggle_task_status(&once, day, &task_id).expect("second toggle");

            prop_assert_eq!(&twice, &plan);
            let (_, toggled) = once.find_task(&task_id).expect("task");
            prop_assert_eq!(toggled.actual_study_time_minutes, logged);
        }

        #[test]
        fn master_reset_keeps_logged_time(
            completed in proptest::collection::vec(any::<bool>(), 14),
            logged in proptest::collection::vec(0u32..300, 14)
        ) {
            let mut plan = sample_plan();
            for (index, task) in plan
                .schedule
                .iter_mut()
                .flat_map(|day| day.tasks.iter_mut())
                .enumerate()
            {
                task.status = if completed[index] { TaskStatus::Completed } else { TaskStatus::Pending };
                task.actual_study_time_minutes = logged[index];
            }

            let reset = master_reset(&plan).unwrap_or_else(|| plan.clone());
            for (before, after) in plan.tasks().zip(reset.tasks()) {
                prop_assert_eq!(after.status, TaskStatus::Pending);
                prop_assert_eq!(after.actual_study_time_minutes, before.actual_study_time_minutes);
            }
        }

        #[test]
        fn replace_day_flags_only_the_target_day(day_offset in 0usize..7) {
            let plan = sample_plan();
            let day = plan.schedule[day_offset].date;
            let next = replace_day_tasks(&plan, day, vec![task("tsk-hand", "hand_001", 3)])
                .expect("replace");
            for (before, after) in plan.schedule.iter().zip(next.schedule.iter()) {
                if after.date == day {
                    prop_assert!(after.is_manually_modified);
                } else {
                    prop_assert_eq!(after.is_manually_modified, before.is_manually_modified);
                    prop_assert_eq!(after, before);
                }
            }
        }

        #[test]
        fn edits_never_introduce_days_outside_the_plan(offset in 1i64..365) {
            let plan = sample_plan();
            let outside = [
                plan.end_date + chrono::Duration::days(offset),
                plan.start_date - chrono::Duration::days(offset),
            ];
            for day in outside {
                prop_assert!(add_optional_task(&plan, day, &draft("Extra", 10), "tsk-x").is_err());
                prop_assert!(replace_day_tasks(&plan, day, Vec::new()).is_err());
                prop_assert!(toggle_task_status(&plan, day, "tsk-0-a").is_none());
                prop_assert!(reorder_day_tasks(&plan, day, 0, 1).is_none());
            }
        }
    }
}
