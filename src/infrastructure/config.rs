use crate::domain::rules::CapacityDefaults;
use crate::infrastructure::error::InfraError;
use chrono::Weekday;
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const PLANNER_JSON: &str = "planner.json";
const SOLVER_JSON: &str = "solver.json";
const DEFAULT_SOLVER_ENDPOINT: &str = "http://127.0.0.1:8787/api";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;

#[derive(Debug, Serialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub planner: serde_json::Value,
    pub solver: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverSettings {
    pub endpoint: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SOLVER_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

fn default_files() -> BTreeMap<&'static str, serde_json::Value> {
    let capacity = CapacityDefaults::default();
    BTreeMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "StudyPlanner",
                "timezone": "UTC"
            }),
        ),
        (
            PLANNER_JSON,
            serde_json::json!({
                "schema": 1,
                "defaultDailyMinutes": capacity.default_daily_minutes,
                "restWeekdays": [],
                "weekdayMoonlightingMinutes": capacity.weekday_moonlighting_minutes,
                "weekendMoonlightingMinutes": capacity.weekend_moonlighting_minutes
            }),
        ),
        (
            SOLVER_JSON,
            serde_json::json!({
                "schema": 1,
                "endpoint": DEFAULT_SOLVER_ENDPOINT,
                "timeoutSeconds": DEFAULT_TIMEOUT_SECONDS,
                "maxAttempts": DEFAULT_MAX_ATTEMPTS,
                "baseDelayMs": DEFAULT_BASE_DELAY_MS
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        planner: read_config(&config_dir.join(PLANNER_JSON))?,
        solver: read_config(&config_dir.join(SOLVER_JSON))?,
    })
}

fn read_u64(value: &serde_json::Value, key: &str, path: &Path) -> Result<Option<u64>, InfraError> {
    match value.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(raw) => raw.as_u64().map(Some).ok_or_else(|| {
            InfraError::InvalidConfig(format!(
                "{key} must be a non-negative integer in {}",
                path.display()
            ))
        }),
    }
}

fn read_u32(
    value: &serde_json::Value,
    key: &str,
    path: &Path,
    fallback: u32,
) -> Result<u32, InfraError> {
    match read_u64(value, key, path)? {
        None => Ok(fallback),
        Some(raw) => u32::try_from(raw).map_err(|_| {
            InfraError::InvalidConfig(format!("{key} is out of range in {}", path.display()))
        }),
    }
}

pub fn read_capacity_defaults(config_dir: &Path) -> Result<CapacityDefaults, InfraError> {
    let path = config_dir.join(PLANNER_JSON);
    let planner = read_config(&path)?;
    let fallback = CapacityDefaults::default();

    let rest_weekdays = match planner.get("restWeekdays") {
        None | Some(serde_json::Value::Null) => HashSet::new(),
        Some(serde_json::Value::Array(values)) => {
            let mut weekdays = HashSet::new();
            for value in values {
                let name = value.as_str().map(str::trim).ok_or_else(|| {
                    InfraError::InvalidConfig(format!(
                        "restWeekdays must contain weekday names in {}",
                        path.display()
                    ))
                })?;
                let weekday = name.parse::<Weekday>().map_err(|_| {
                    InfraError::InvalidConfig(format!(
                        "unknown weekday '{name}' in {}",
                        path.display()
                    ))
                })?;
                weekdays.insert(weekday);
            }
            weekdays
        }
        Some(_) => {
            return Err(InfraError::InvalidConfig(format!(
                "restWeekdays must be an array in {}",
                path.display()
            )));
        }
    };

    Ok(CapacityDefaults {
        default_daily_minutes: read_u32(
            &planner,
            "defaultDailyMinutes",
            &path,
            fallback.default_daily_minutes,
        )?,
        rest_weekdays,
        weekday_moonlighting_minutes: read_u32(
            &planner,
            "weekdayMoonlightingMinutes",
            &path,
            fallback.weekday_moonlighting_minutes,
        )?,
        weekend_moonlighting_minutes: read_u32(
            &planner,
            "weekendMoonlightingMinutes",
            &path,
            fallback.weekend_moonlighting_minutes,
        )?,
    })
}

pub fn read_solver_settings(config_dir: &Path) -> Result<SolverSettings, InfraError> {
    let path = config_dir.join(SOLVER_JSON);
    let solver = read_config(&path)?;
    let fallback = SolverSettings::default();

    let endpoint = solver
        .get("endpoint")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or(fallback.endpoint);
    let timeout_seconds = read_u64(&solver, "timeoutSeconds", &path)?.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    if timeout_seconds == 0 {
        return Err(InfraError::InvalidConfig(format!(
            "timeoutSeconds must be > 0 in {}",
            path.display()
        )));
    }
    let max_attempts = read_u32(&solver, "maxAttempts", &path, fallback.max_attempts)?.max(1);
    let base_delay_ms = read_u64(&solver, "baseDelayMs", &path)?.unwrap_or(fallback.base_delay_ms);

    Ok(SolverSettings {
        endpoint,
        timeout: Duration::from_secs(timeout_seconds),
        max_attempts,
        base_delay_ms,
    })
}

pub fn read_timezone(config_dir: &Path) -> Result<Tz, InfraError> {
    let path = config_dir.join(APP_JSON);
    let app = read_config(&path)?;
    let name = app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("UTC");
    name.parse::<Tz>().map_err(|error| {
        InfraError::InvalidConfig(format!("invalid timezone '{name}' in {}: {error}", path.display()))
    })
}
