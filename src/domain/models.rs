use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_DURATION_MS: i64 = 25 * 60 * 1000;
pub const DEFAULT_TASK_NAME: &str = "Deep Work";
pub const FALLBACK_TASK_LABEL: &str = "Uncategorized";
pub const USERNAME_MIN_LEN: usize = 2;
pub const USERNAME_MAX_LEN: usize = 30;
pub const PASSWORD_MIN_LEN: usize = 6;

/// Persisted shape of the timer, stored at `users/{uid}/appState/timer`.
///
/// Every field is written on each push. Fields missing from a remote copy (or
/// written as `null` by another client) fall back to the defaults below, and
/// numbers written as doubles are rounded back to whole milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerDocument {
    #[serde(default = "default_duration_ms", deserialize_with = "duration_or_default")]
    pub timer_value_state: i64,
    #[serde(default, deserialize_with = "millis_or_zero")]
    pub timer_end_timestamp: i64,
    #[serde(default = "default_duration_ms", deserialize_with = "duration_or_default")]
    pub paused_remaining_ms: i64,
    #[serde(default = "default_duration_ms", deserialize_with = "duration_or_default")]
    pub current_timer_ms: i64,
    #[serde(default, deserialize_with = "millis_or_zero")]
    pub saved_ms_this_session: i64,
    #[serde(default, deserialize_with = "flag_or_false")]
    pub timer_running: bool,
    #[serde(default, deserialize_with = "flag_or_false")]
    pub timer_ended: bool,
    #[serde(default, deserialize_with = "flag_or_false")]
    pub finish_in_progress: bool,
    #[serde(default = "default_task_name", deserialize_with = "task_name_or_default")]
    pub current_timer_task_name: String,
}

impl Default for TimerDocument {
    fn default() -> Self {
        Self {
            timer_value_state: DEFAULT_DURATION_MS,
            timer_end_timestamp: 0,
            paused_remaining_ms: DEFAULT_DURATION_MS,
            current_timer_ms: DEFAULT_DURATION_MS,
            saved_ms_this_session: 0,
            timer_running: false,
            timer_ended: false,
            finish_in_progress: false,
            current_timer_task_name: DEFAULT_TASK_NAME.to_string(),
        }
    }
}

impl TimerDocument {
    pub fn from_fields(
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(fields.clone()))
    }

    pub fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// One day of accumulated focus, stored at `users/{uid}/weeklyFocus/{date}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyFocusRecord {
    #[serde(default, deserialize_with = "millis_or_zero")]
    pub focus_ms: i64,
    #[serde(default)]
    pub task_breakdown: BTreeMap<String, i64>,
    #[serde(default, deserialize_with = "millis_or_zero")]
    pub last_session_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub onboarding_complete: bool,
}

impl UserProfile {
    pub fn has_username(&self) -> bool {
        self.username
            .as_deref()
            .map(str::trim)
            .is_some_and(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub is_anonymous: bool,
}

impl AuthUser {
    pub fn short_id(&self) -> &str {
        let end = self
            .uid
            .char_indices()
            .nth(4)
            .map(|(index, _)| index)
            .unwrap_or(self.uid.len());
        &self.uid[..end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: AuthUser,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.id_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignupForm {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() || self.email.trim().is_empty() || self.password.is_empty()
        {
            return Err("Please fill in all fields.".to_string());
        }
        if self.password.chars().count() < PASSWORD_MIN_LEN {
            return Err("Password must be 6+ chars.".to_string());
        }
        if self.password != self.confirm_password {
            return Err("Passwords do not match.".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), String> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err("Please enter email and password.".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsernameIssue {
    Empty,
    TooShort,
    TooLong,
    InvalidCharacters,
}

impl UsernameIssue {
    pub fn message(self) -> &'static str {
        match self {
            Self::Empty => "Username is required",
            Self::TooShort => "Too short",
            Self::TooLong => "Too long",
            Self::InvalidCharacters => "Only a-z, 0-9, . _ - allowed",
        }
    }
}

pub fn normalize_username(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|character| !character.is_whitespace())
        .collect()
}

pub fn validate_username(normalized: &str) -> Result<(), UsernameIssue> {
    let length = normalized.chars().count();
    if length == 0 {
        return Err(UsernameIssue::Empty);
    }
    if length < USERNAME_MIN_LEN {
        return Err(UsernameIssue::TooShort);
    }
    if length > USERNAME_MAX_LEN {
        return Err(UsernameIssue::TooLong);
    }
    let allowed = |character: char| {
        character.is_ascii_lowercase()
            || character.is_ascii_digit()
            || matches!(character, '_' | '.' | '-')
    };
    if !normalized.chars().all(allowed) {
        return Err(UsernameIssue::InvalidCharacters);
    }
    Ok(())
}

/// Display name for the current task; blank names collapse to the default label.
pub fn normalize_task_name(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| DEFAULT_TASK_NAME.to_string())
}

pub fn validate_date(value: &str, field_name: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))
}

fn default_duration_ms() -> i64 {
    DEFAULT_DURATION_MS
}

fn default_task_name() -> String {
    DEFAULT_TASK_NAME.to_string()
}

fn millis_value<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(value.and_then(|number| {
        number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.is_finite())
                .map(|float| float.round() as i64)
        })
    }))
}

fn duration_or_default<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(millis_value(deserializer)?.unwrap_or(DEFAULT_DURATION_MS))
}

fn millis_or_zero<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(millis_value(deserializer)?.unwrap_or(0))
}

fn flag_or_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

fn task_name_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_task_name(raw.as_deref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_document() -> TimerDocument {
        TimerDocument {
            timer_value_state: 3_000_000,
            timer_end_timestamp: 1_771_230_000_123,
            paused_remaining_ms: 1_234_567,
            current_timer_ms: 1_234_000,
            saved_ms_this_session: 600_000,
            timer_running: true,
            timer_ended: false,
            finish_in_progress: false,
            current_timer_task_name: "Thesis chapter 2".to_string(),
        }
    }

    #[test]
    fn timer_document_uses_camel_case_field_names() {
        let fields = sample_document().to_fields();
        for key in [
            "timerValueState",
            "timerEndTimestamp",
            "pausedRemainingMs",
            "currentTimerMs",
            "savedMsThisSession",
            "timerRunning",
            "timerEnded",
            "finishInProgress",
            "currentTimerTaskName",
        ] {
            assert!(fields.contains_key(key), "missing {key}");
        }
        assert_eq!(fields.len(), 9);
    }

    #[test]
    fn timer_document_applies_defaults_for_missing_fields() {
        let fields = json!({ "timerRunning": true, "timerEndTimestamp": 99 });
        let document = TimerDocument::from_fields(fields.as_object().expect("object"))
            .expect("decode document");

        assert_eq!(document.timer_value_state, DEFAULT_DURATION_MS);
        assert_eq!(document.paused_remaining_ms, DEFAULT_DURATION_MS);
        assert_eq!(document.saved_ms_this_session, 0);
        assert_eq!(document.timer_end_timestamp, 99);
        assert!(document.timer_running);
        assert_eq!(document.current_timer_task_name, DEFAULT_TASK_NAME);
    }

    #[test]
    fn timer_document_treats_nulls_and_doubles_leniently() {
        let fields = json!({
            "timerValueState": null,
            "pausedRemainingMs": 600000.0,
            "timerEnded": null,
            "currentTimerTaskName": "   ",
            "lastUpdatedWeb": "2026-02-16T00:00:00Z"
        });
        let document = TimerDocument::from_fields(fields.as_object().expect("object"))
            .expect("decode document");

        assert_eq!(document.timer_value_state, DEFAULT_DURATION_MS);
        assert_eq!(document.paused_remaining_ms, 600_000);
        assert!(!document.timer_ended);
        assert_eq!(document.current_timer_task_name, DEFAULT_TASK_NAME);
    }

    proptest! {
        #[test]
        fn timer_document_numbers_roundtrip_bit_exact(
            duration in 1i64..i64::MAX / 2,
            end in 0i64..i64::MAX / 2,
            paused in 0i64..i64::MAX / 2,
            saved in 0i64..i64::MAX / 2,
            running in any::<bool>()
        ) {
            let document = TimerDocument {
                timer_value_state: duration,
                timer_end_timestamp: end,
                paused_remaining_ms: paused,
                current_timer_ms: paused,
                saved_ms_this_session: saved,
                timer_running: running,
                timer_ended: false,
                finish_in_progress: false,
                current_timer_task_name: "Reading".to_string(),
            };
            let decoded = TimerDocument::from_fields(&document.to_fields()).expect("decode");
            prop_assert_eq!(decoded, document);
        }
    }

    #[test]
    fn daily_record_decodes_breakdown() {
        let fields = json!({
            "focusMs": 70000,
            "lastSessionMs": 10000,
            "taskBreakdown": { "Deep Work": 60000, "Reading": 10000 },
            "updatedAt": "2026-02-16T00:00:00Z"
        });
        let record: DailyFocusRecord = serde_json::from_value(fields).expect("decode record");
        assert_eq!(record.focus_ms, 70_000);
        assert_eq!(record.task_breakdown.get("Reading"), Some(&10_000));
        assert_eq!(record.last_session_ms, 10_000);
    }

    #[test]
    fn username_normalization_strips_whitespace_and_case() {
        assert_eq!(normalize_username("  Focus King "), "focusking");
        assert_eq!(normalize_username("A\tB"), "ab");
    }

    #[test]
    fn username_validation_reports_each_issue() {
        assert_eq!(validate_username(""), Err(UsernameIssue::Empty));
        assert_eq!(validate_username("a"), Err(UsernameIssue::TooShort));
        assert_eq!(validate_username(&"a".repeat(31)), Err(UsernameIssue::TooLong));
        assert_eq!(validate_username("bad!name"), Err(UsernameIssue::InvalidCharacters));
        assert!(validate_username("good_name-1.0").is_ok());
        assert_eq!(
            UsernameIssue::InvalidCharacters.message(),
            "Only a-z, 0-9, . _ - allowed"
        );
    }

    #[test]
    fn signup_form_validation_order() {
        let mut form = SignupForm {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password: "secret".to_string(),
            confirm_password: "secret".to_string(),
        };
        assert!(form.validate().is_ok());

        form.confirm_password = "secreT".to_string();
        assert_eq!(form.validate(), Err("Passwords do not match.".to_string()));

        form.password = "abc".to_string();
        assert_eq!(form.validate(), Err("Password must be 6+ chars.".to_string()));

        form.name = "  ".to_string();
        assert_eq!(form.validate(), Err("Please fill in all fields.".to_string()));
    }

    #[test]
    fn login_form_requires_both_fields() {
        let form = LoginForm {
            email: "ada@example.com".to_string(),
            password: String::new(),
        };
        assert!(form.validate().is_err());
    }

    #[test]
    fn auth_session_validity_respects_leeway() {
        let session = AuthSession {
            user: AuthUser {
                uid: "uid-123456".to_string(),
                email: None,
                display_name: None,
                is_anonymous: true,
            },
            id_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: fixed_time("2026-02-16T01:00:00Z"),
        };
        assert!(session.is_valid_at(fixed_time("2026-02-16T00:58:00Z"), 60));
        assert!(!session.is_valid_at(fixed_time("2026-02-16T00:59:30Z"), 60));
        assert_eq!(session.user.short_id(), "uid-");
    }

    #[test]
    fn profile_username_presence() {
        let mut profile = UserProfile::default();
        assert!(!profile.has_username());
        profile.username = Some(" ".to_string());
        assert!(!profile.has_username());
        profile.username = Some("ada".to_string());
        assert!(profile.has_username());
    }

    #[test]
    fn date_validation() {
        assert!(validate_date("2026-02-16", "date").is_ok());
        assert!(validate_date("16/02/2026", "date").is_err());
    }
}
