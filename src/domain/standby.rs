pub const DEFAULT_CONTROLS_HIDE_MS: i64 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyKey {
    Space,
    Escape,
    Other,
}

impl StandbyKey {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "Space" | " " => Self::Space,
            "Escape" | "Esc" => Self::Escape,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyAction {
    ToggleTimer,
    Exit,
    Ignored,
}

/// Immersive full-screen mode. Controls fade out after a quiet period, but only
/// while the timer is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandbyMode {
    active: bool,
    last_activity_ms: i64,
    hide_after_ms: i64,
}

impl Default for StandbyMode {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROLS_HIDE_MS)
    }
}

impl StandbyMode {
    pub fn new(hide_after_ms: i64) -> Self {
        Self {
            active: false,
            last_activity_ms: 0,
            hide_after_ms: hide_after_ms.max(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns false when already in standby.
    pub fn enter(&mut self, now_ms: i64) -> bool {
        if self.active {
            return false;
        }
        self.active = true;
        self.last_activity_ms = now_ms;
        true
    }

    pub fn exit(&mut self) -> bool {
        let was_active = self.active;
        self.active = false;
        was_active
    }

    pub fn record_activity(&mut self, now_ms: i64) {
        self.last_activity_ms = now_ms;
    }

    pub fn controls_visible(&self, now_ms: i64, running: bool) -> bool {
        if !self.active || !running {
            return true;
        }
        now_ms - self.last_activity_ms < self.hide_after_ms
    }

    /// Keyboard handling only applies while standby is active.
    pub fn handle_key(&mut self, key: StandbyKey, now_ms: i64) -> StandbyAction {
        if !self.active {
            return StandbyAction::Ignored;
        }
        match key {
            StandbyKey::Space => {
                self.record_activity(now_ms);
                StandbyAction::ToggleTimer
            }
            StandbyKey::Escape => {
                self.exit();
                StandbyAction::Exit
            }
            StandbyKey::Other => StandbyAction::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn controls_hide_only_when_running_and_quiet() {
        let mut standby = StandbyMode::default();
        assert!(standby.controls_visible(10_000, true));

        assert!(standby.enter(1_000));
        assert!(standby.controls_visible(3_999, true));
        assert!(!standby.controls_visible(4_000, true));
        assert!(standby.controls_visible(4_000, false));

        standby.record_activity(4_500);
        assert!(standby.controls_visible(7_000, true));
        assert!(!standby.controls_visible(7_500, true));
    }

    #[test]
    fn keys_are_ignored_outside_standby() {
        let mut standby = StandbyMode::default();
        assert_eq!(standby.handle_key(StandbyKey::Space, 0), StandbyAction::Ignored);
        assert_eq!(standby.handle_key(StandbyKey::Escape, 0), StandbyAction::Ignored);
    }

    #[test]
    fn space_toggles_and_escape_exits() {
        let mut standby = StandbyMode::default();
        standby.enter(0);
        assert_eq!(
            standby.handle_key(StandbyKey::from_code("Space"), 9_000),
            StandbyAction::ToggleTimer
        );
        assert!(standby.controls_visible(10_000, true));
        assert_eq!(
            standby.handle_key(StandbyKey::from_code("Escape"), 9_100),
            StandbyAction::Exit
        );
        assert!(!standby.is_active());
        assert!(!standby.exit());
    }

    #[test]
    fn entering_twice_keeps_first_activity_window() {
        let mut standby = StandbyMode::default();
        assert!(standby.enter(0));
        assert!(!standby.enter(2_500));
        assert!(!standby.controls_visible(3_000, true));
    }

    proptest! {
        #[test]
        fn controls_always_visible_while_idle(
            entered_at in 0i64..1_000_000,
            offset in 0i64..1_000_000
        ) {
            let mut standby = StandbyMode::default();
            standby.enter(entered_at);
            prop_assert!(standby.controls_visible(entered_at + offset, false));
        }
    }
}
