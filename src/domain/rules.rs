use crate::domain::models::{DailySchedule, DayType, ExceptionDateRule, StudyPlan};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Plan-wide capacity assumptions used when a date carries no exception rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityDefaults {
    pub default_daily_minutes: u32,
    pub rest_weekdays: HashSet<Weekday>,
    pub weekday_moonlighting_minutes: u32,
    pub weekend_moonlighting_minutes: u32,
}

impl Default for CapacityDefaults {
    fn default() -> Self {
        Self {
            default_daily_minutes: 420,
            rest_weekdays: HashSet::new(),
            weekday_moonlighting_minutes: 120,
            weekend_moonlighting_minutes: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DayPolicy {
    pub is_rest_day: bool,
    pub target_minutes: u32,
}

impl DayPolicy {
    const REST: DayPolicy = DayPolicy {
        is_rest_day: true,
        target_minutes: 0,
    };
}

pub fn resolve_day_policy(
    rules: &BTreeMap<NaiveDate, ExceptionDateRule>,
    date: NaiveDate,
    defaults: &CapacityDefaults,
) -> DayPolicy {
    if let Some(rule) = rules.get(&date) {
        if rule.is_rest_day_override {
            return DayPolicy::REST;
        }
        return DayPolicy {
            is_rest_day: false,
            target_minutes: rule.target_minutes,
        };
    }

    if defaults.rest_weekdays.contains(&date.weekday()) {
        return DayPolicy::REST;
    }
    DayPolicy {
        is_rest_day: false,
        target_minutes: defaults.default_daily_minutes,
    }
}

impl ExceptionDateRule {
    /// Builds the rule a user gets by picking `day_type` for `date`.
    ///
    /// `minutes` overrides the configured moonlighting capacity and is required
    /// for a plain `exception` day.
    pub fn for_day_type(
        date: NaiveDate,
        day_type: DayType,
        defaults: &CapacityDefaults,
        minutes: Option<u32>,
    ) -> Result<Self, String> {
        let (is_rest_day_override, target_minutes) = match day_type {
            DayType::SpecificRest => {
                if minutes.is_some_and(|value| value > 0) {
                    return Err("a specific-rest day cannot carry study minutes".to_string());
                }
                (true, 0)
            }
            DayType::Exception => {
                let minutes = minutes
                    .ok_or_else(|| "an exception day requires target minutes".to_string())?;
                (false, minutes)
            }
            DayType::WeekdayMoonlighting => (
                false,
                minutes.unwrap_or(defaults.weekday_moonlighting_minutes),
            ),
            DayType::WeekendMoonlighting => (
                false,
                minutes.unwrap_or(defaults.weekend_moonlighting_minutes),
            ),
        };

        Ok(Self {
            date,
            day_type,
            is_rest_day_override,
            target_minutes,
        })
    }
}

pub fn empty_plan(
    start_date: NaiveDate,
    end_date: NaiveDate,
    defaults: &CapacityDefaults,
) -> Result<StudyPlan, String> {
    if end_date < start_date {
        return Err("plan.end_date must be on or after plan.start_date".to_string());
    }

    let rules = BTreeMap::new();
    let schedule = start_date
        .iter_days()
        .take_while(|date| *date <= end_date)
        .map(|date| {
            let policy = resolve_day_policy(&rules, date, defaults);
            DailySchedule::new(date, policy.is_rest_day, policy.target_minutes)
        })
        .collect();

    Ok(StudyPlan {
        start_date,
        end_date,
        schedule,
        topic_order: Vec::new(),
        cram_topic_order: Vec::new(),
        is_cram_mode_active: false,
        are_special_topics_interleaved: false,
        deadlines: BTreeMap::new(),
        exception_rules: rules,
        first_pass_end_date: None,
    })
}

/// Stores `rule` for its date, replacing any previous rule outright, and
/// re-resolves that day's capacity.
pub fn upsert_exception_rule(
    plan: &StudyPlan,
    rule: ExceptionDateRule,
    defaults: &CapacityDefaults,
) -> Result<StudyPlan, String> {
    if !plan.contains_date(rule.date) {
        return Err(format!(
            "exception rule date {} is outside {}..={}",
            rule.date, plan.start_date, plan.end_date
        ));
    }

    let date = rule.date;
    let mut next = plan.clone();
    next.exception_rules.insert(date, rule);
    apply_policy_to_day(&mut next, date, defaults);
    Ok(next)
}

pub fn remove_exception_rule(
    plan: &StudyPlan,
    date: NaiveDate,
    defaults: &CapacityDefaults,
) -> Option<StudyPlan> {
    if !plan.exception_rules.contains_key(&date) {
        return None;
    }
    let mut next = plan.clone();
    next.exception_rules.remove(&date);
    apply_policy_to_day(&mut next, date, defaults);
    Some(next)
}

pub fn apply_day_policies(plan: &StudyPlan, defaults: &CapacityDefaults) -> StudyPlan {
    let mut next = plan.clone();
    for day in &mut next.schedule {
        let policy = resolve_day_policy(&plan.exception_rules, day.date, defaults);
        day.is_rest_day = policy.is_rest_day;
        day.total_study_time_minutes = policy.target_minutes;
    }
    next
}

fn apply_policy_to_day(plan: &mut StudyPlan, date: NaiveDate, defaults: &CapacityDefaults) {
    let policy = resolve_day_policy(&plan.exception_rules, date, defaults);
    if let Some(index) = plan.day_index(date) {
        let day = &mut plan.schedule[index];
        day.is_rest_day = policy.is_rest_day;
        day.total_study_time_minutes = policy.target_minutes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::fixtures::{date, sample_plan};
    use proptest::prelude::*;

    fn defaults() -> CapacityDefaults {
        CapacityDefaults {
            default_daily_minutes: 300,
            rest_weekdays: HashSet::new(),
            weekday_moonlighting_minutes: 150,
            weekend_moonlighting_minutes: 240,
        }
    }

    #[test]
    fn unknown_date_yields_default_policy() {
        let rules = BTreeMap::new();
        let policy = resolve_day_policy(&rules, date("2031-01-01"), &defaults());
        assert_eq!(
            policy,
            DayPolicy {
                is_rest_day: false,
                target_minutes: 300
            }
        );
    }

    #[test]
    fn default_rest_weekday_is_a_rest_day() {
        let mut capacity = defaults();
        capacity.rest_weekdays.insert(Weekday::Sun);
        let rules = BTreeMap::new();
        // 2026-03-08 is a Sunday.
        let policy = resolve_day_policy(&rules, date("2026-03-08"), &capacity);
        assert!(policy.is_rest_day);
        assert_eq!(policy.target_minutes, 0);
    }

    #[test]
    fn rule_override_wins_over_rest_weekday() {
        let mut capacity = defaults();
        capacity.rest_weekdays.insert(Weekday::Sun);
        let sunday = date("2026-03-08");
        let rule =
            ExceptionDateRule::for_day_type(sunday, DayType::WeekendMoonlighting, &capacity, None)
                .expect("weekend rule");
        let rules = BTreeMap::from([(sunday, rule)]);
        let policy = resolve_day_policy(&rules, sunday, &capacity);
        assert!(!policy.is_rest_day);
        assert_eq!(policy.target_minutes, 240);
    }

    #[test]
    fn exception_day_requires_minutes() {
        let result =
            ExceptionDateRule::for_day_type(date("2026-03-03"), DayType::Exception, &defaults(), None);
        assert!(result.is_err());
    }

    #[test]
    fn upsert_rejects_dates_outside_plan() {
        let plan = sample_plan();
        let rule = ExceptionDateRule::for_day_type(
            date("2026-02-27"),
            DayType::SpecificRest,
            &defaults(),
            None,
        )
        .expect("rule");
        assert!(upsert_exception_rule(&plan, rule, &defaults()).is_err());
    }

    #[test]
    fn moonlighting_rule_turns_rest_day_into_reduced_day() {
        let capacity = defaults();
        let day_three = date("2026-03-04");
        let rest = ExceptionDateRule::for_day_type(day_three, DayType::SpecificRest, &capacity, None)
            .expect("rest rule");
        let rested = upsert_exception_rule(&sample_plan(), rest, &capacity).expect("rest applied");
        assert!(rested.day(day_three).expect("day 3").is_rest_day);
        assert_eq!(rested.day(day_three).expect("day 3").total_study_time_minutes, 0);

        let moonlighting =
            ExceptionDateRule::for_day_type(day_three, DayType::WeekdayMoonlighting, &capacity, None)
                .expect("moonlighting rule");
        let updated =
            upsert_exception_rule(&rested, moonlighting, &capacity).expect("moonlighting applied");

        let policy = resolve_day_policy(&updated.exception_rules, day_three, &capacity);
        assert!(!policy.is_rest_day);
        assert_eq!(policy.target_minutes, 150);
        let day = updated.day(day_three).expect("day 3");
        assert!(!day.is_rest_day);
        assert_eq!(day.total_study_time_minutes, 150);

        for (before, after) in rested.schedule.iter().zip(updated.schedule.iter()) {
            if before.date != day_three {
                assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn remove_rule_restores_default_capacity() {
        let capacity = defaults();
        let day = date("2026-03-05");
        let rule = ExceptionDateRule::for_day_type(day, DayType::SpecificRest, &capacity, None)
            .expect("rule");
        let with_rule = upsert_exception_rule(&sample_plan(), rule, &capacity).expect("upsert");
        let without = remove_exception_rule(&with_rule, day, &capacity).expect("removed");
        assert!(without.exception_rules.is_empty());
        assert_eq!(without.day(day).expect("day").total_study_time_minutes, 300);
        assert!(remove_exception_rule(&without, day, &capacity).is_none());
    }

    #[test]
    fn empty_plan_has_one_day_per_date() {
        let mut capacity = defaults();
        capacity.rest_weekdays.insert(Weekday::Sat);
        let plan = empty_plan(date("2026-03-02"), date("2026-03-15"), &capacity).expect("plan");
        assert_eq!(plan.schedule.len(), 14);
        assert!(plan.validate().is_ok());
        let saturdays = plan.schedule.iter().filter(|day| day.is_rest_day).count();
        assert_eq!(saturdays, 2);
    }

    proptest! {
        #[test]
        fn replacing_a_rule_keeps_only_the_newest_fields(
            offset in 0i64..7,
            first_minutes in 0u32..600,
            second_minutes in 0u32..600,
            first_rest in any::<bool>(),
            second_rest in any::<bool>()
        ) {
            let capacity = defaults();
            let plan = sample_plan();
            let day = plan.start_date + chrono::Duration::days(offset);
            let first = ExceptionDateRule {
                date: day,
                day_type: DayType::Exception,
                is_rest_day_override: first_rest,
                target_minutes: first_minutes,
            };
            let second = ExceptionDateRule {
                date: day,
                day_type: DayType::WeekendMoonlighting,
                is_rest_day_override: second_rest,
                target_minutes: second_minutes,
            };

            let once = upsert_exception_rule(&plan, first, &capacity).expect("first");
            let twice = upsert_exception_rule(&once, second.clone(), &capacity).expect("second");

            prop_assert_eq!(twice.exception_rules.len(), 1);
            prop_assert_eq!(twice.exception_rules.get(&day), Some(&second));
            let policy = resolve_day_policy(&twice.exception_rules, day, &capacity);
            prop_assert_eq!(policy.is_rest_day, second_rest);
            prop_assert_eq!(policy.target_minutes, if second_rest { 0 } else { second_minutes });
        }

        #[test]
        fn rules_outside_the_plan_are_never_stored(offset in 7i64..400) {
            let capacity = defaults();
            let plan = sample_plan();
            let after = plan.end_date + chrono::Duration::days(offset - 6);
            let before = plan.start_date - chrono::Duration::days(offset - 6);
            for day in [after, before] {
                let rule = ExceptionDateRule::for_day_type(day, DayType::SpecificRest, &capacity, None)
                    .expect("rule");
                prop_assert!(upsert_exception_rule(&plan, rule, &capacity).is_err());
            }
        }
    }
}
