use crate::application::clock::{NowProvider, system_now};
use crate::domain::models::DailyFocusRecord;
use crate::domain::timer::FocusFlush;
use crate::infrastructure::document_store::{DocumentPath, DocumentStore, DocumentWrite, FieldPath};
use crate::infrastructure::error::InfraError;
use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_SUMMARY_DAYS: u32 = 7;
const MAX_SUMMARY_DAYS: u32 = 366;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayFocus {
    pub date: String,
    pub focus_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSummary {
    pub days: Vec<DayFocus>,
    pub total_ms: i64,
    pub by_task: BTreeMap<String, i64>,
}

/// Writes session credit into the per-day focus documents and reads it back.
pub struct FocusAccounting {
    store: Arc<dyn DocumentStore>,
    timezone: Tz,
    now_provider: NowProvider,
}

impl FocusAccounting {
    pub fn new(store: Arc<dyn DocumentStore>, timezone: Tz) -> Self {
        Self {
            store,
            timezone,
            now_provider: system_now(),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn today(&self) -> NaiveDate {
        (self.now_provider)().with_timezone(&self.timezone).date_naive()
    }

    pub fn day_key(&self) -> String {
        self.today().format("%Y-%m-%d").to_string()
    }

    /// Credits `flush.delta_ms` to today. Non-positive deltas are dropped and
    /// reported as `false`.
    pub async fn flush(&self, uid: &str, flush: &FocusFlush) -> Result<bool, InfraError> {
        if flush.delta_ms <= 0 {
            tracing::debug!(uid, delta_ms = flush.delta_ms, "skipping non-positive focus flush");
            return Ok(false);
        }

        let day = self.day_key();
        let path = DocumentPath::daily_focus(uid, &day)?;
        let mut fields = serde_json::Map::new();
        fields.insert("lastSessionMs".to_string(), serde_json::Value::from(flush.delta_ms));
        let write = DocumentWrite::merge(path, fields)
            .increment(FieldPath::field("focusMs"), flush.delta_ms)
            .increment(
                FieldPath::nested("taskBreakdown", flush.task_label.clone()),
                flush.delta_ms,
            )
            .server_timestamp(FieldPath::field("updatedAt"));

        self.store.commit(vec![write]).await?;
        tracing::info!(
            uid,
            day = %day,
            delta_ms = flush.delta_ms,
            task = %flush.task_label,
            "focus flushed"
        );
        Ok(true)
    }

    pub async fn daily_record(
        &self,
        uid: &str,
        date: NaiveDate,
    ) -> Result<DailyFocusRecord, InfraError> {
        let path = DocumentPath::daily_focus(uid, &date.format("%Y-%m-%d").to_string())?;
        let Some(document) = self.store.get(&path).await? else {
            return Ok(DailyFocusRecord::default());
        };
        Ok(serde_json::from_value(serde_json::Value::Object(document.fields))?)
    }

    /// Aggregates the `days` calendar days ending at `end` (inclusive), oldest
    /// first.
    pub async fn focus_summary(
        &self,
        uid: &str,
        end: NaiveDate,
        days: u32,
    ) -> Result<FocusSummary, InfraError> {
        let days = days.clamp(1, MAX_SUMMARY_DAYS);
        let mut summary = FocusSummary::default();
        for offset in (0..days).rev() {
            let date = end - Duration::days(i64::from(offset));
            let record = self.daily_record(uid, date).await?;
            summary.total_ms += record.focus_ms;
            for (task, ms) in &record.task_breakdown {
                *summary.by_task.entry(task.clone()).or_insert(0) += ms;
            }
            summary.days.push(DayFocus {
                date: date.format("%Y-%m-%d").to_string(),
                focus_ms: record.focus_ms,
            });
        }
        Ok(summary)
    }
}
