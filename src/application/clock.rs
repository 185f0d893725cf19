use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_now() -> NowProvider {
    Arc::new(Utc::now)
}

pub fn now_ms(now_provider: &NowProvider) -> i64 {
    now_provider().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockPulse {
    pub sequence: u64,
}

/// Background ticker feeding the timer worker. Pulses carry no time of their
/// own: the consumer reads the wall clock, so a dropped pulse loses nothing.
#[derive(Debug)]
pub struct SessionClock {
    task: JoinHandle<()>,
}

impl SessionClock {
    pub fn spawn(interval: Duration, sender: mpsc::Sender<ClockPulse>) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut sequence = 0u64;
            loop {
                ticker.tick().await;
                sequence += 1;
                match sender.try_send(ClockPulse { sequence }) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SessionClock {
    fn drop(&mut self) {
        self.task.abort();
    }
}
