use crate::domain::models::{
    DEFAULT_DURATION_MS, FALLBACK_TASK_LABEL, TimerDocument, normalize_task_name,
};
use thiserror::Error;

const MS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("timer must be idle")]
    NotIdle,
    #[error("timer is not running")]
    NotRunning,
    #[error("a finish is already in progress")]
    FinishInProgress,
    #[error("nothing to finish")]
    NothingToFinish,
    #[error("duration must be greater than zero")]
    InvalidDuration,
    #[error("task name must not be empty")]
    EmptyTaskName,
}

/// Accounting thresholds applied by [`TimerMachine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerRules {
    /// Granularity of the streaming credit written while a run is in progress.
    pub streaming_flush_ms: i64,
    /// A pause only flushes when more than this much time is unflushed.
    pub pause_flush_threshold_ms: i64,
    /// Remaining time at or below which a finish counts as a natural expiry.
    pub natural_finish_tolerance_ms: i64,
    pub fallback_task_label: String,
}

impl Default for TimerRules {
    fn default() -> Self {
        Self {
            streaming_flush_ms: MS_PER_MINUTE,
            pause_flush_threshold_ms: 1_000,
            natural_finish_tolerance_ms: 1_000,
            fallback_task_label: FALLBACK_TASK_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle { paused_remaining_ms: i64 },
    Running { end_timestamp_ms: i64 },
    JustEnded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerState {
    pub configured_duration_ms: i64,
    pub end_timestamp_ms: i64,
    pub paused_remaining_ms: i64,
    pub current_remaining_ms: i64,
    pub saved_ms_this_session: i64,
    pub running: bool,
    pub ended: bool,
    pub finish_in_progress: bool,
    pub task_name: String,
}

impl Default for TimerState {
    fn default() -> Self {
        Self::from_document(&TimerDocument::default())
    }
}

impl TimerState {
    pub fn from_document(document: &TimerDocument) -> Self {
        let configured = positive_duration(document.timer_value_state);
        let paused = document.paused_remaining_ms.clamp(0, configured);
        let running = document.timer_running;
        Self {
            configured_duration_ms: configured,
            end_timestamp_ms: document.timer_end_timestamp,
            paused_remaining_ms: paused,
            current_remaining_ms: document.current_timer_ms.clamp(0, configured),
            saved_ms_this_session: document.saved_ms_this_session.max(0),
            running,
            ended: !running && document.timer_ended,
            finish_in_progress: false,
            task_name: normalize_task_name(Some(&document.current_timer_task_name)),
        }
    }

    /// Full persisted shape. A finished run is never written as ended.
    pub fn to_document(&self) -> TimerDocument {
        TimerDocument {
            timer_value_state: self.configured_duration_ms,
            timer_end_timestamp: self.end_timestamp_ms,
            paused_remaining_ms: self.paused_remaining_ms,
            current_timer_ms: self.current_remaining_ms,
            saved_ms_this_session: self.saved_ms_this_session,
            timer_running: self.running,
            timer_ended: false,
            finish_in_progress: self.finish_in_progress,
            current_timer_task_name: self.task_name.clone(),
        }
    }

    pub fn phase(&self) -> TimerPhase {
        if self.running {
            TimerPhase::Running {
                end_timestamp_ms: self.end_timestamp_ms,
            }
        } else if self.ended {
            TimerPhase::JustEnded
        } else {
            TimerPhase::Idle {
                paused_remaining_ms: self.paused_remaining_ms,
            }
        }
    }

    pub fn accounting_label(&self, fallback: &str) -> String {
        let trimmed = self.task_name.trim();
        if trimmed.is_empty() {
            fallback.to_string()
        } else {
            trimmed.to_string()
        }
    }

    fn unsaved_ms(&self, elapsed_ms: i64) -> i64 {
        (elapsed_ms - self.saved_ms_this_session).max(0)
    }

    fn same_run_as(&self, remote: &TimerDocument) -> bool {
        if self.configured_duration_ms != remote.timer_value_state
            || self.running != remote.timer_running
        {
            return false;
        }
        if self.running {
            self.end_timestamp_ms == remote.timer_end_timestamp
        } else {
            self.paused_remaining_ms == remote.paused_remaining_ms
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusFlush {
    pub delta_ms: i64,
    pub task_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub focused_ms: i64,
    pub focused_minutes: i64,
    pub natural: bool,
}

impl SessionSummary {
    pub fn message(&self) -> String {
        format!("Successfully focused for {} minutes.", self.focused_minutes)
    }
}

/// Side effects requested by a state change; the caller performs them in order:
/// flushes, finish completion, then persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use]
pub struct Transition {
    pub flushes: Vec<FocusFlush>,
    pub persist: bool,
    pub completed: Option<SessionSummary>,
}

impl Transition {
    fn none() -> Self {
        Self::default()
    }

    fn persist() -> Self {
        Self {
            persist: true,
            ..Self::default()
        }
    }

    pub fn flushed_ms(&self) -> i64 {
        self.flushes.iter().map(|flush| flush.delta_ms).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.flushes.is_empty() && !self.persist && self.completed.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct TimerMachine {
    state: TimerState,
    rules: TimerRules,
}

impl Default for TimerMachine {
    fn default() -> Self {
        Self::new(TimerRules::default())
    }
}

impl TimerMachine {
    pub fn new(rules: TimerRules) -> Self {
        Self {
            state: TimerState::default(),
            rules,
        }
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn document(&self) -> TimerDocument {
        self.state.to_document()
    }

    pub fn start(&mut self, now_ms: i64) -> Result<Transition, TimerError> {
        if self.state.finish_in_progress {
            return Err(TimerError::FinishInProgress);
        }
        if self.state.running {
            return Err(TimerError::NotIdle);
        }

        let state = &mut self.state;
        if state.paused_remaining_ms <= 0 {
            state.paused_remaining_ms = state.configured_duration_ms;
            state.saved_ms_this_session = 0;
        }
        let already_elapsed = state.configured_duration_ms - state.paused_remaining_ms;
        state.saved_ms_this_session = state.saved_ms_this_session.clamp(0, already_elapsed);
        state.ended = false;
        state.running = true;
        state.end_timestamp_ms = now_ms + state.paused_remaining_ms;
        state.current_remaining_ms = state.paused_remaining_ms;
        Ok(Transition::persist())
    }

    pub fn pause(&mut self, now_ms: i64) -> Result<Transition, TimerError> {
        if !self.state.running {
            return Err(TimerError::NotRunning);
        }
        let remaining = self.state.end_timestamp_ms - now_ms;
        if remaining <= 0 {
            return Ok(self.expire());
        }

        let label = self.label();
        let state = &mut self.state;
        state.running = false;
        state.paused_remaining_ms = remaining.min(state.configured_duration_ms);
        state.current_remaining_ms = state.paused_remaining_ms;
        state.end_timestamp_ms = 0;

        let mut transition = Transition::persist();
        let elapsed = state.configured_duration_ms - state.paused_remaining_ms;
        let unsaved = state.unsaved_ms(elapsed);
        if unsaved > self.rules.pause_flush_threshold_ms {
            state.saved_ms_this_session += unsaved;
            transition.flushes.push(FocusFlush {
                delta_ms: unsaved,
                task_label: label,
            });
        }
        Ok(transition)
    }

    pub fn toggle(&mut self, now_ms: i64) -> Result<Transition, TimerError> {
        if self.state.ended {
            self.reset()
        } else if self.state.running {
            self.pause(now_ms)
        } else {
            self.start(now_ms)
        }
    }

    /// Recomputes derived fields against `now_ms`. While idle this never changes
    /// anything but the displayed remaining time.
    pub fn tick(&mut self, now_ms: i64) -> Transition {
        if !self.state.running {
            self.state.current_remaining_ms = self.state.paused_remaining_ms;
            return Transition::none();
        }

        let remaining = self.state.end_timestamp_ms - now_ms;
        if remaining <= 0 {
            return self.expire();
        }

        let label = self.label();
        let state = &mut self.state;
        state.current_remaining_ms = remaining.min(state.configured_duration_ms);
        if state.finish_in_progress {
            return Transition::none();
        }

        let elapsed = state.configured_duration_ms - state.current_remaining_ms;
        let unsaved = state.unsaved_ms(elapsed);
        let chunk = self.rules.streaming_flush_ms.max(1);
        let streamed = (unsaved / chunk) * chunk;
        if streamed <= 0 {
            return Transition::none();
        }

        state.saved_ms_this_session += streamed;
        Transition {
            flushes: vec![FocusFlush {
                delta_ms: streamed,
                task_label: label,
            }],
            persist: true,
            completed: None,
        }
    }

    /// Ends the current session, crediting any unflushed time. The in-progress
    /// guard stays set until [`TimerMachine::complete_finish`] is called.
    pub fn finish(&mut self, now_ms: i64) -> Result<Transition, TimerError> {
        if self.state.finish_in_progress {
            return Err(TimerError::FinishInProgress);
        }

        let label = self.label();
        let rules = &self.rules;
        let state = &mut self.state;
        let current = if state.running {
            (state.end_timestamp_ms - now_ms).clamp(0, state.configured_duration_ms)
        } else if state.ended {
            0
        } else {
            state.paused_remaining_ms
        };
        let elapsed = (state.configured_duration_ms - current).max(0);
        if elapsed == 0 && !state.ended {
            return Err(TimerError::NothingToFinish);
        }

        state.finish_in_progress = true;
        state.current_remaining_ms = current;
        let natural = current <= rules.natural_finish_tolerance_ms;
        let focused_ms = if natural {
            state.configured_duration_ms
        } else {
            elapsed
        };

        let mut transition = Transition::persist();
        let unsaved = state.unsaved_ms(elapsed);
        if unsaved > 0 {
            transition.flushes.push(FocusFlush {
                delta_ms: unsaved,
                task_label: label,
            });
        }
        transition.completed = Some(SessionSummary {
            focused_ms,
            focused_minutes: round_minutes(focused_ms),
            natural,
        });

        state.running = false;
        state.ended = false;
        state.end_timestamp_ms = 0;
        state.paused_remaining_ms = state.configured_duration_ms;
        state.current_remaining_ms = state.configured_duration_ms;
        state.saved_ms_this_session = 0;
        Ok(transition)
    }

    pub fn complete_finish(&mut self) {
        self.state.finish_in_progress = false;
    }

    pub fn reset(&mut self) -> Result<Transition, TimerError> {
        self.ensure_idle()?;
        let state = &mut self.state;
        state.ended = false;
        state.end_timestamp_ms = 0;
        state.paused_remaining_ms = state.configured_duration_ms;
        state.current_remaining_ms = state.configured_duration_ms;
        state.saved_ms_this_session = 0;
        Ok(Transition::persist())
    }

    pub fn reconfigure(&mut self, duration_ms: i64) -> Result<Transition, TimerError> {
        self.ensure_idle()?;
        if duration_ms <= 0 {
            return Err(TimerError::InvalidDuration);
        }
        let state = &mut self.state;
        state.configured_duration_ms = duration_ms;
        state.paused_remaining_ms = duration_ms;
        state.current_remaining_ms = duration_ms;
        state.saved_ms_this_session = 0;
        state.ended = false;
        state.end_timestamp_ms = 0;
        Ok(Transition::persist())
    }

    pub fn rename_task(&mut self, name: &str) -> Result<Transition, TimerError> {
        self.ensure_idle()?;
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(TimerError::EmptyTaskName);
        }
        self.state.task_name = trimmed.to_string();
        Ok(Transition::persist())
    }

    /// Adopts a remote (or cached) document as the new truth and re-derives the
    /// display fields against `now_ms`.
    pub fn reconcile(&mut self, remote: &TimerDocument, now_ms: i64) -> Transition {
        let same_run = self.state.same_run_as(remote);
        let local_saved = self.state.saved_ms_this_session;
        let finish_in_progress = self.state.finish_in_progress;

        let mut next = TimerState::from_document(remote);
        next.finish_in_progress = finish_in_progress;
        if same_run {
            next.saved_ms_this_session = next.saved_ms_this_session.max(local_saved);
        }
        self.state = next;
        self.tick(now_ms)
    }

    fn expire(&mut self) -> Transition {
        let state = &mut self.state;
        state.current_remaining_ms = 0;
        state.running = false;
        state.ended = true;
        state.paused_remaining_ms = 0;
        state.end_timestamp_ms = 0;
        self.finish(0).unwrap_or_else(|_| Transition::none())
    }

    fn ensure_idle(&self) -> Result<(), TimerError> {
        if self.state.running {
            return Err(TimerError::NotIdle);
        }
        if self.state.finish_in_progress {
            return Err(TimerError::FinishInProgress);
        }
        Ok(())
    }

    fn label(&self) -> String {
        self.state.accounting_label(&self.rules.fallback_task_label)
    }
}

fn positive_duration(value: i64) -> i64 {
    if value > 0 { value } else { DEFAULT_DURATION_MS }
}

fn round_minutes(ms: i64) -> i64 {
    (ms.max(0) + MS_PER_MINUTE / 2) / MS_PER_MINUTE
}
