use crate::domain::timer::TimerRules;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const FIREBASE_JSON: &str = "firebase.json";
const TIMER_JSON: &str = "timer.json";

const API_KEY_ENV: [&str; 2] = ["DISCIPLINE_FIREBASE_API_KEY", "FIREBASE_API_KEY"];
const PROJECT_ID_ENV: [&str; 2] = ["DISCIPLINE_FIREBASE_PROJECT_ID", "FIREBASE_PROJECT_ID"];

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub firebase: serde_json::Value,
    pub timer: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub app_name: String,
    pub timezone: Tz,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_name: "Discipline".to_string(),
            timezone: Tz::UTC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseSettings {
    pub project_id: Option<String>,
    pub api_key: Option<String>,
    pub anonymous_sign_in: bool,
    pub poll_interval_ms: u64,
}

impl Default for FirebaseSettings {
    fn default() -> Self {
        Self {
            project_id: None,
            api_key: None,
            anonymous_sign_in: true,
            poll_interval_ms: 2_000,
        }
    }
}

impl FirebaseSettings {
    pub fn credentials(&self) -> Result<(String, String), InfraError> {
        let project_id = self.project_id.clone().ok_or_else(|| {
            InfraError::InvalidConfig(format!(
                "missing firebase project id (set projectId in {FIREBASE_JSON} or one of: {})",
                PROJECT_ID_ENV.join(", ")
            ))
        })?;
        let api_key = self.api_key.clone().ok_or_else(|| {
            InfraError::InvalidConfig(format!(
                "missing firebase api key (set apiKey in {FIREBASE_JSON} or one of: {})",
                API_KEY_ENV.join(", ")
            ))
        })?;
        Ok((project_id, api_key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSettings {
    pub default_duration_ms: i64,
    pub tick_interval_ms: u64,
    pub streaming_flush_ms: i64,
    pub pause_flush_threshold_ms: i64,
    pub natural_finish_tolerance_ms: i64,
    pub cache_max_age_ms: i64,
    pub push_retry_ms: i64,
    pub fallback_task_label: String,
    pub standby_controls_hide_ms: i64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        let rules = TimerRules::default();
        Self {
            default_duration_ms: 25 * 60_000,
            tick_interval_ms: 200,
            streaming_flush_ms: rules.streaming_flush_ms,
            pause_flush_threshold_ms: rules.pause_flush_threshold_ms,
            natural_finish_tolerance_ms: rules.natural_finish_tolerance_ms,
            cache_max_age_ms: 24 * 60 * 60 * 1_000,
            push_retry_ms: 5_000,
            fallback_task_label: rules.fallback_task_label,
            standby_controls_hide_ms: 3_000,
        }
    }
}

impl TimerSettings {
    pub fn rules(&self) -> TimerRules {
        TimerRules {
            streaming_flush_ms: self.streaming_flush_ms,
            pause_flush_threshold_ms: self.pause_flush_threshold_ms,
            natural_finish_tolerance_ms: self.natural_finish_tolerance_ms,
            fallback_task_label: self.fallback_task_label.clone(),
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Discipline",
                "timezone": "UTC"
            }),
        ),
        (
            FIREBASE_JSON,
            serde_json::json!({
                "schema": 1,
                "projectId": null,
                "apiKey": null,
                "anonymousSignIn": true,
                "pollIntervalMs": 2000
            }),
        ),
        (
            TIMER_JSON,
            serde_json::json!({
                "schema": 1,
                "defaultDurationMinutes": 25,
                "tickIntervalMs": 200,
                "streamingFlushMs": 60000,
                "pauseFlushThresholdMs": 1000,
                "naturalFinishToleranceMs": 1000,
                "cacheMaxAgeHours": 24,
                "pushRetryMs": 5000,
                "fallbackTaskLabel": "Uncategorized",
                "standbyControlsHideMs": 3000
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
        firebase: read_config(&config_dir.join(FIREBASE_JSON))?,
        timer: read_config(&config_dir.join(TIMER_JSON))?,
    })
}

fn non_empty_str<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn positive_i64(value: &serde_json::Value, key: &str) -> Option<i64> {
    value
        .get(key)
        .and_then(serde_json::Value::as_i64)
        .filter(|value| *value > 0)
}

pub fn read_app_settings(config_dir: &Path) -> Result<AppSettings, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let mut settings = AppSettings::default();
    if let Some(name) = non_empty_str(&app, "appName") {
        settings.app_name = name.to_string();
    }
    if let Some(timezone) = non_empty_str(&app, "timezone") {
        settings.timezone = timezone.parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid timezone '{timezone}' in {APP_JSON}: {error}"
            ))
        })?;
    }
    Ok(settings)
}

pub fn read_firebase_settings(config_dir: &Path) -> Result<FirebaseSettings, InfraError> {
    read_firebase_settings_with_lookup(config_dir, |key| std::env::var(key).ok())
}

/// Environment values win over the file so credentials can stay out of the
/// workspace.
pub fn read_firebase_settings_with_lookup<F>(
    config_dir: &Path,
    lookup: F,
) -> Result<FirebaseSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let firebase = read_config(&config_dir.join(FIREBASE_JSON))?;
    let mut settings = FirebaseSettings::default();

    settings.project_id = optional_lookup_value(&lookup, &PROJECT_ID_ENV)
        .or_else(|| non_empty_str(&firebase, "projectId").map(ToOwned::to_owned));
    settings.api_key = optional_lookup_value(&lookup, &API_KEY_ENV)
        .or_else(|| non_empty_str(&firebase, "apiKey").map(ToOwned::to_owned));
    if let Some(value) = firebase
        .get("anonymousSignIn")
        .and_then(serde_json::Value::as_bool)
    {
        settings.anonymous_sign_in = value;
    }
    if let Some(value) = positive_i64(&firebase, "pollIntervalMs") {
        settings.poll_interval_ms = value as u64;
    }
    Ok(settings)
}

pub fn read_timer_settings(config_dir: &Path) -> Result<TimerSettings, InfraError> {
    let timer = read_config(&config_dir.join(TIMER_JSON))?;
    let mut settings = TimerSettings::default();

    if let Some(minutes) = positive_i64(&timer, "defaultDurationMinutes") {
        settings.default_duration_ms = scaled(minutes, 60_000, "defaultDurationMinutes")?;
    }
    if let Some(value) = positive_i64(&timer, "tickIntervalMs") {
        settings.tick_interval_ms = value as u64;
    }
    if let Some(value) = positive_i64(&timer, "streamingFlushMs") {
        settings.streaming_flush_ms = value;
    }
    if let Some(value) = timer
        .get("pauseFlushThresholdMs")
        .and_then(serde_json::Value::as_i64)
    {
        settings.pause_flush_threshold_ms = value.max(0);
    }
    if let Some(value) = timer
        .get("naturalFinishToleranceMs")
        .and_then(serde_json::Value::as_i64)
    {
        settings.natural_finish_tolerance_ms = value.max(0);
    }
    if let Some(hours) = positive_i64(&timer, "cacheMaxAgeHours") {
        settings.cache_max_age_ms = scaled(hours, 60 * 60 * 1_000, "cacheMaxAgeHours")?;
    }
    if let Some(value) = positive_i64(&timer, "pushRetryMs") {
        settings.push_retry_ms = value;
    }
    if let Some(label) = non_empty_str(&timer, "fallbackTaskLabel") {
        settings.fallback_task_label = label.to_string();
    }
    if let Some(value) = positive_i64(&timer, "standbyControlsHideMs") {
        settings.standby_controls_hide_ms = value;
    }
    Ok(settings)
}

fn scaled(value: i64, factor: i64, key: &str) -> Result<i64, InfraError> {
    value
        .checked_mul(factor)
        .ok_or_else(|| InfraError::InvalidConfig(format!("{TIMER_JSON} {key} is too large")))
}

pub fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
