use crate::domain::models::AuthUser;
use crate::domain::timer::TimerState;
use serde::Serialize;

const IDLE_TITLE: &str = "Top 1% Club | Focus Timer";
const ENDED_TITLE: &str = "Done! | Focus";

/// Snapshot handed to the presentation adapter after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerView {
    pub remaining_ms: i64,
    pub configured_ms: i64,
    pub running: bool,
    pub ended: bool,
    pub task_name: String,
    pub user_id: Option<String>,
    pub standby: bool,
    pub controls_visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlipDigits {
    pub hours: Option<i64>,
    pub minutes: i64,
    pub seconds: i64,
}

impl TimerView {
    pub fn from_state(state: &TimerState, user: Option<&AuthUser>) -> Self {
        Self {
            remaining_ms: state.current_remaining_ms,
            configured_ms: state.configured_duration_ms,
            running: state.running,
            ended: state.ended,
            task_name: state.task_name.clone(),
            user_id: user.map(|user| user.uid.clone()),
            standby: false,
            controls_visible: true,
        }
    }

    pub fn with_standby(mut self, standby: bool, controls_visible: bool) -> Self {
        self.standby = standby;
        self.controls_visible = controls_visible;
        self
    }

    pub fn clock_text(&self) -> String {
        let remaining = self.remaining_ms.max(0);
        let minutes = remaining / 60_000;
        let seconds = (remaining % 60_000) / 1_000;
        format!("{minutes:02}:{seconds:02}")
    }

    pub fn window_title(&self) -> String {
        if self.running {
            format!("{} | Focus", self.clock_text())
        } else if self.ended {
            ENDED_TITLE.to_string()
        } else {
            IDLE_TITLE.to_string()
        }
    }

    pub fn status_text(&self) -> &'static str {
        if self.running { "Focusing..." } else { "Ready" }
    }

    pub fn standby_status_text(&self) -> &'static str {
        if self.running { "Focusing" } else { "Ready" }
    }

    pub fn sync_label(&self) -> String {
        match self.user_id.as_deref() {
            Some(uid) => {
                let short: String = uid.chars().take(4).collect();
                format!("Synced \u{2022} {short}")
            }
            None => "Offline".to_string(),
        }
    }

    pub fn progress_fraction(&self) -> f64 {
        if self.configured_ms <= 0 {
            return 0.0;
        }
        (self.remaining_ms as f64 / self.configured_ms as f64).max(0.0)
    }

    /// Standby clock digits. Seconds round up so the display never shows zero
    /// while time remains.
    pub fn flip_digits(&self) -> FlipDigits {
        let total_seconds = (self.remaining_ms.max(0) + 999) / 1_000;
        let hours = total_seconds / 3_600;
        FlipDigits {
            hours: (hours > 0).then_some(hours),
            minutes: (total_seconds % 3_600) / 60,
            seconds: total_seconds % 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(remaining_ms: i64, running: bool, ended: bool) -> TimerView {
        TimerView {
            remaining_ms,
            configured_ms: 1_500_000,
            running,
            ended,
            task_name: "Deep Work".to_string(),
            user_id: None,
            standby: false,
            controls_visible: true,
        }
    }

    #[test]
    fn clock_text_floors_to_whole_seconds() {
        assert_eq!(view(1_500_000, false, false).clock_text(), "25:00");
        assert_eq!(view(61_999, true, false).clock_text(), "01:01");
        assert_eq!(view(999, true, false).clock_text(), "00:00");
        assert_eq!(view(-5, false, false).clock_text(), "00:00");
    }

    #[test]
    fn title_and_status_follow_phase() {
        assert_eq!(view(90_000, true, false).window_title(), "01:30 | Focus");
        assert_eq!(view(0, false, true).window_title(), "Done! | Focus");
        assert_eq!(view(90_000, false, false).window_title(), "Top 1% Club | Focus Timer");
        assert_eq!(view(90_000, true, false).status_text(), "Focusing...");
        assert_eq!(view(90_000, false, false).status_text(), "Ready");
        assert_eq!(view(90_000, true, false).standby_status_text(), "Focusing");
    }

    #[test]
    fn progress_fraction_is_clamped_at_zero() {
        assert_eq!(view(750_000, true, false).progress_fraction(), 0.5);
        assert_eq!(view(-1, true, false).progress_fraction(), 0.0);
    }

    #[test]
    fn flip_digits_round_seconds_up_and_hide_zero_hours() {
        let digits = view(59_001, true, false).flip_digits();
        assert_eq!(digits, FlipDigits { hours: None, minutes: 1, seconds: 0 });

        let mut long = view(3_723_000, true, false);
        long.configured_ms = 7_200_000;
        assert_eq!(
            long.flip_digits(),
            FlipDigits { hours: Some(1), minutes: 2, seconds: 3 }
        );
    }

    #[test]
    fn sync_label_shows_short_uid() {
        let mut synced = view(0, false, false);
        synced.user_id = Some("abcdef123".to_string());
        assert_eq!(synced.sync_label(), "Synced \u{2022} abcd");
        assert_eq!(view(0, false, false).sync_label(), "Offline");
    }

    #[test]
    fn from_state_copies_display_fields() {
        let state = TimerState::default();
        let user = AuthUser {
            uid: "uid-1".to_string(),
            email: None,
            display_name: None,
            is_anonymous: true,
        };
        let view = TimerView::from_state(&state, Some(&user)).with_standby(true, false);
        assert_eq!(view.remaining_ms, 1_500_000);
        assert_eq!(view.user_id.as_deref(), Some("uid-1"));
        assert!(view.standby);
        assert!(!view.controls_visible);
    }
}
