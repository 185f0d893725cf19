use crate::domain::standby::{StandbyAction, StandbyKey, StandbyMode};
use crate::infrastructure::error::InfraError;
use std::sync::Arc;

/// Keeps the display awake while standby is shown.
pub trait WakeLock: Send + Sync {
    fn acquire(&self) -> Result<(), InfraError>;
    fn release(&self) -> Result<(), InfraError>;
}

/// For adapters without a screen to keep awake.
#[derive(Debug, Default)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&self) -> Result<(), InfraError> {
        tracing::debug!("wake lock requested; nothing to hold");
        Ok(())
    }

    fn release(&self) -> Result<(), InfraError> {
        Ok(())
    }
}

pub struct StandbyController {
    mode: StandbyMode,
    wake_lock: Arc<dyn WakeLock>,
}

impl StandbyController {
    pub fn new(hide_after_ms: i64, wake_lock: Arc<dyn WakeLock>) -> Self {
        Self {
            mode: StandbyMode::new(hide_after_ms),
            wake_lock,
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode.is_active()
    }

    pub fn controls_visible(&self, now_ms: i64, running: bool) -> bool {
        self.mode.controls_visible(now_ms, running)
    }

    pub fn record_activity(&mut self, now_ms: i64) {
        self.mode.record_activity(now_ms);
    }

    pub fn enter(&mut self, now_ms: i64) -> bool {
        if !self.mode.enter(now_ms) {
            return false;
        }
        if let Err(error) = self.wake_lock.acquire() {
            tracing::warn!(%error, "wake lock unavailable");
        }
        true
    }

    pub fn exit(&mut self) -> bool {
        if !self.mode.exit() {
            return false;
        }
        self.release_wake_lock();
        true
    }

    pub fn handle_key(&mut self, key: StandbyKey, now_ms: i64) -> StandbyAction {
        let action = self.mode.handle_key(key, now_ms);
        if action == StandbyAction::Exit {
            self.release_wake_lock();
        }
        action
    }

    fn release_wake_lock(&self) {
        if let Err(error) = self.wake_lock.release() {
            tracing::warn!(%error, "wake lock release failed");
        }
    }
}
