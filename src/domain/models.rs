use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn toggled(self) -> Self {
        match self {
            Self::Pending => Self::Completed,
            Self::Completed => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Reading,
    Video,
    QuestionBank,
    Cases,
    Flashcards,
    Review,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_resource_id: Option<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: ResourceType,
    pub original_topic: String,
    pub duration_minutes: u32,
    pub status: TaskStatus,
    pub order: u32,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u32>,
    #[serde(default)]
    pub actual_study_time_minutes: u32,
}

impl ScheduledTask {
    /// Identifier of the catalog entry this task was cut from.
    ///
    /// Split tasks carry the parent resource in `original_resource_id`.
    pub fn source_resource_id(&self) -> &str {
        self.original_resource_id
            .as_deref()
            .unwrap_or(self.resource_id.as_str())
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.resource_id, "task.resource_id")?;
        validate_non_empty(&self.title, "task.title")?;
        validate_positive(self.duration_minutes, "task.duration_minutes")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailySchedule {
    pub date: NaiveDate,
    #[serde(default)]
    pub is_rest_day: bool,
    #[serde(default)]
    pub is_manually_modified: bool,
    pub total_study_time_minutes: u32,
    #[serde(default)]
    pub tasks: Vec<ScheduledTask>,
}

impl DailySchedule {
    pub fn new(date: NaiveDate, is_rest_day: bool, total_study_time_minutes: u32) -> Self {
        Self {
            date,
            is_rest_day,
            is_manually_modified: false,
            total_study_time_minutes,
            tasks: Vec::new(),
        }
    }

    /// Rewrites every task's `order` to its position in the list.
    pub fn renumber(&mut self) {
        for (index, task) in self.tasks.iter_mut().enumerate() {
            task.order = index as u32;
        }
    }

    pub fn planned_minutes(&self) -> u32 {
        self.tasks.iter().map(|task| task.duration_minutes).sum()
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for (index, task) in self.tasks.iter().enumerate() {
            task.validate()?;
            if task.order as usize != index {
                return Err(format!(
                    "schedule[{}].tasks order must be dense; task {} has order {} at position {index}",
                    self.date, task.id, task.order
                ));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(format!("schedule[{}] has duplicate task id {}", self.date, task.id));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DayType {
    SpecificRest,
    Exception,
    WeekdayMoonlighting,
    WeekendMoonlighting,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDateRule {
    pub date: NaiveDate,
    pub day_type: DayType,
    pub is_rest_day_override: bool,
    pub target_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudyPlan {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub schedule: Vec<DailySchedule>,
    #[serde(default)]
    pub topic_order: Vec<String>,
    #[serde(default)]
    pub cram_topic_order: Vec<String>,
    #[serde(default)]
    pub is_cram_mode_active: bool,
    #[serde(default)]
    pub are_special_topics_interleaved: bool,
    #[serde(default)]
    pub deadlines: BTreeMap<String, NaiveDate>,
    #[serde(default)]
    pub exception_rules: BTreeMap<NaiveDate, ExceptionDateRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_pass_end_date: Option<NaiveDate>,
}

impl StudyPlan {
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    /// Pulls a navigation target back inside the plan bounds.
    pub fn clamp_date(&self, date: NaiveDate) -> NaiveDate {
        date.clamp(self.start_date, self.end_date)
    }

    pub fn day_index(&self, date: NaiveDate) -> Option<usize> {
        self.schedule
            .binary_search_by(|day| day.date.cmp(&date))
            .ok()
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DailySchedule> {
        self.day_index(date).map(|index| &self.schedule[index])
    }

    pub fn tasks(&self) -> impl Iterator<Item = &ScheduledTask> {
        self.schedule.iter().flat_map(|day| day.tasks.iter())
    }

    pub fn find_task(&self, task_id: &str) -> Option<(NaiveDate, &ScheduledTask)> {
        self.schedule.iter().find_map(|day| {
            day.tasks
                .iter()
                .find(|task| task.id == task_id)
                .map(|task| (day.date, task))
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.end_date < self.start_date {
            return Err("plan.end_date must be on or after plan.start_date".to_string());
        }

        let mut previous: Option<NaiveDate> = None;
        let mut task_ids = HashSet::new();
        for day in &self.schedule {
            if !self.contains_date(day.date) {
                return Err(format!(
                    "schedule date {} is outside {}..={}",
                    day.date, self.start_date, self.end_date
                ));
            }
            if let Some(previous) = previous {
                if day.date <= previous {
                    return Err(format!(
                        "schedule dates must be unique and sorted; {} follows {previous}",
                        day.date
                    ));
                }
            }
            previous = Some(day.date);
            day.validate()?;
            for task in &day.tasks {
                if !task_ids.insert(task.id.as_str()) {
                    return Err(format!("task id {} is scheduled more than once", task.id));
                }
            }
        }

        for (date, rule) in &self.exception_rules {
            if *date != rule.date {
                return Err(format!(
                    "exception rule keyed by {date} describes {}",
                    rule.date
                ));
            }
            if !self.contains_date(*date) {
                return Err(format!(
                    "exception rule date {date} is outside {}..={}",
                    self.start_date, self.end_date
                ));
            }
        }

        validate_unique(&self.topic_order, "plan.topic_order")?;
        validate_unique(&self.cram_topic_order, "plan.cram_topic_order")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudyResource {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub topic: String,
    pub duration_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u32>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_primary_material: bool,
    #[serde(default)]
    pub is_splittable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_order: Option<u32>,
    #[serde(default)]
    pub paired_resource_ids: Vec<String>,
}

impl StudyResource {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "resource.id")?;
        validate_non_empty(&self.title, "resource.title")?;
        validate_non_empty(&self.topic, "resource.topic")?;
        validate_positive(self.duration_minutes, "resource.duration_minutes")?;
        if self.paired_resource_ids.iter().any(|paired| paired == &self.id) {
            return Err("resource.paired_resource_ids must not reference itself".to_string());
        }
        Ok(())
    }
}

/// User-supplied description of an ad hoc task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OptionalTaskDraft {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(rename = "type")]
    pub task_type: ResourceType,
    pub topic: String,
    pub duration_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u32>,
}

impl OptionalTaskDraft {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "optional_task.title")?;
        validate_non_empty(&self.topic, "optional_task.topic")?;
        validate_positive(self.duration_minutes, "optional_task.duration_minutes")?;
        if let Some(resource_id) = self.resource_id.as_deref() {
            validate_non_empty(resource_id, "optional_task.resource_id")?;
        }
        Ok(())
    }
}

/// Why a regeneration is requested, and the minimum the solver needs to know about it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RebalanceOptions {
    Standard,
    Reset,
    #[serde(rename_all = "camelCase")]
    TopicTime {
        date: NaiveDate,
        topics: Vec<String>,
        total_minutes: u32,
    },
    #[serde(rename_all = "camelCase")]
    TopicOrder { topic_order: Vec<String>, cram: bool },
    #[serde(rename_all = "camelCase")]
    DeadlineChange {
        topic: String,
        deadline: Option<NaiveDate>,
    },
    #[serde(rename_all = "camelCase")]
    ExceptionAdded { date: NaiveDate },
}

impl RebalanceOptions {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Reset => "reset",
            Self::TopicTime { .. } => "topic-time",
            Self::TopicOrder { .. } => "topic-order",
            Self::DeadlineChange { .. } => "deadline-change",
            Self::ExceptionAdded { .. } => "exception-added",
        }
    }

    pub fn validate(&self, plan: &StudyPlan) -> Result<(), String> {
        match self {
            Self::TopicTime { date, .. } | Self::ExceptionAdded { date } => {
                if !plan.contains_date(*date) {
                    return Err(format!(
                        "rebalance date {date} is outside {}..={}",
                        plan.start_date, plan.end_date
                    ));
                }
            }
            Self::DeadlineChange { topic, deadline } => {
                validate_non_empty(topic, "rebalance.topic")?;
                if let Some(deadline) = deadline {
                    if !plan.contains_date(*deadline) {
                        return Err(format!(
                            "deadline {deadline} is outside {}..={}",
                            plan.start_date, plan.end_date
                        ));
                    }
                }
            }
            Self::TopicOrder { topic_order, .. } => {
                validate_unique(topic_order, "rebalance.topic_order")?;
            }
            Self::Standard | Self::Reset => {}
        }
        Ok(())
    }
}

/// State one undo step puts back: the plan, the pool when the change touched it,
/// and the rebalance that was scheduled before the change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UndoEntry {
    pub plan: StudyPlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<StudyResource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<RebalanceOptions>,
}

impl UndoEntry {
    pub fn new(plan: StudyPlan, follow_up: Option<RebalanceOptions>) -> Self {
        Self {
            plan,
            resources: None,
            follow_up,
        }
    }

    pub fn with_resources(mut self, resources: Vec<StudyResource>) -> Self {
        self.resources = Some(resources);
        self
    }
}

pub(crate) fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_positive(value: u32, field_name: &str) -> Result<(), String> {
    if value == 0 {
        return Err(format!("{field_name} must be > 0"));
    }
    Ok(())
}

fn validate_unique(values: &[String], field_name: &str) -> Result<(), String> {
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value.as_str()) {
            return Err(format!("{field_name} lists {value} more than once"));
        }
    }
    Ok(())
}
