use crate::application::accounting::FocusAccounting;
use crate::application::clock::{ClockPulse, NowProvider, SessionClock, now_ms};
use crate::application::session::IdentityProvider;
use crate::application::standby::{StandbyController, WakeLock};
use crate::domain::models::{AuthUser, TimerDocument};
use crate::domain::standby::{StandbyAction, StandbyKey};
use crate::domain::timer::{FocusFlush, SessionSummary, TimerError, TimerMachine, Transition};
use crate::domain::view::TimerView;
use crate::infrastructure::config::TimerSettings;
use crate::infrastructure::document_store::{
    Document, DocumentPath, DocumentStore, DocumentSubscription, DocumentWrite, FieldPath,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::LocalStateCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const COMMAND_QUEUE_DEPTH: usize = 32;
const NOTICE_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerIntent {
    Toggle,
    Start,
    Pause,
    Reset,
    Finish,
    SetDurationMinutes(i64),
    RenameTask(String),
    EnterStandby,
    ExitStandby,
    StandbyKey(StandbyKey),
    Activity,
}

pub struct TimerSyncDeps {
    pub store: Arc<dyn DocumentStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub cache: Arc<dyn LocalStateCache>,
    pub accounting: Arc<FocusAccounting>,
    pub wake_lock: Arc<dyn WakeLock>,
    pub settings: TimerSettings,
    pub now_provider: NowProvider,
}

enum TimerMsg {
    Dispatch {
        intent: TimerIntent,
        resp: oneshot::Sender<Result<TimerView, InfraError>>,
    },
    Snapshot {
        resp: oneshot::Sender<TimerView>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Cloneable front door to the timer worker. Every mutation of the timer goes
/// through the worker's queue, one message at a time.
#[derive(Debug, Clone)]
pub struct TimerSyncHandle {
    sender: mpsc::Sender<TimerMsg>,
    view: watch::Receiver<TimerView>,
    notices: broadcast::Sender<SessionSummary>,
}

impl TimerSyncHandle {
    /// Restores the cached timer, attaches to the current user and starts the
    /// worker and its clock. Must be called inside a Tokio runtime.
    pub fn spawn(deps: TimerSyncDeps) -> Self {
        let identity = deps.identity.subscribe();
        let tick_interval = Duration::from_millis(deps.settings.tick_interval_ms.max(1));
        let mut worker = TimerSyncWorker::new(deps);
        let (view_tx, view) = watch::channel(worker.view());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        worker.view_tx = Some(view_tx);
        worker.notices = Some(notices.clone());

        let (sender, mut rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (pulse_tx, pulses) = mpsc::channel(1);
        tokio::spawn(async move {
            let clock = SessionClock::spawn(tick_interval, pulse_tx);
            worker.run(&mut rx, pulses, identity).await;
            drop(clock);
        });

        Self {
            sender,
            view,
            notices,
        }
    }

    pub async fn dispatch(&self, intent: TimerIntent) -> Result<TimerView, InfraError> {
        let (tx, rx) = oneshot::channel();
        self.send(TimerMsg::Dispatch { intent, resp: tx }).await?;
        rx.await
            .map_err(|_| InfraError::ChannelClosed("timer worker dropped the reply".to_string()))?
    }

    /// Ticks the timer against the wall clock and returns the result.
    pub async fn snapshot(&self) -> Result<TimerView, InfraError> {
        let (tx, rx) = oneshot::channel();
        self.send(TimerMsg::Snapshot { resp: tx }).await?;
        rx.await
            .map_err(|_| InfraError::ChannelClosed("timer worker dropped the reply".to_string()))
    }

    pub fn watch_view(&self) -> watch::Receiver<TimerView> {
        self.view.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionSummary> {
        self.notices.subscribe()
    }

    pub async fn shutdown(&self) -> Result<(), InfraError> {
        let (tx, rx) = oneshot::channel();
        self.send(TimerMsg::Shutdown { resp: tx }).await?;
        rx.await
            .map_err(|_| InfraError::ChannelClosed("timer worker dropped the reply".to_string()))
    }

    async fn send(&self, msg: TimerMsg) -> Result<(), InfraError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| InfraError::ChannelClosed("timer worker is gone".to_string()))
    }
}

struct TimerSyncWorker {
    machine: TimerMachine,
    standby: StandbyController,
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn LocalStateCache>,
    accounting: Arc<FocusAccounting>,
    settings: TimerSettings,
    now_provider: NowProvider,
    user: Option<AuthUser>,
    subscription: Option<DocumentSubscription>,
    dirty: bool,
    last_push_attempt_ms: Option<i64>,
    view_tx: Option<watch::Sender<TimerView>>,
    notices: Option<broadcast::Sender<SessionSummary>>,
}

impl TimerSyncWorker {
    fn new(deps: TimerSyncDeps) -> Self {
        let mut worker = Self {
            machine: TimerMachine::new(deps.settings.rules()),
            standby: StandbyController::new(deps.settings.standby_controls_hide_ms, deps.wake_lock),
            store: deps.store,
            cache: deps.cache,
            accounting: deps.accounting,
            settings: deps.settings,
            now_provider: deps.now_provider,
            user: None,
            subscription: None,
            dirty: false,
            last_push_attempt_ms: None,
            view_tx: None,
            notices: None,
        };
        worker.restore_local_state();
        worker
    }

    fn now(&self) -> i64 {
        now_ms(&self.now_provider)
    }

    fn restore_local_state(&mut self) {
        let now = self.now();
        match self.cache.load_fresh(now, self.settings.cache_max_age_ms) {
            Ok(Some(document)) => {
                tracing::info!(running = document.timer_running, "restored timer from local cache");
                let transition = self.machine.reconcile(&document, now);
                // No user is attached yet, so credit from a run that expired
                // while closed cannot be recorded.
                if transition.flushed_ms() > 0 {
                    tracing::warn!(
                        delta_ms = transition.flushed_ms(),
                        "cached run expired offline; focus time not recorded"
                    );
                }
                if transition.completed.is_some() {
                    self.machine.complete_finish();
                }
                self.dirty = transition.persist;
            }
            Ok(None) => {
                let duration = self.settings.default_duration_ms;
                if duration != self.machine.state().configured_duration_ms {
                    if let Err(error) = self.machine.reconfigure(duration) {
                        tracing::warn!(%error, duration, "ignoring configured default duration");
                    }
                }
            }
            Err(error) => tracing::warn!(%error, "local timer cache unreadable"),
        }
    }

    async fn run(
        &mut self,
        rx: &mut mpsc::Receiver<TimerMsg>,
        mut pulses: mpsc::Receiver<ClockPulse>,
        mut identity: watch::Receiver<Option<AuthUser>>,
    ) {
        let initial = identity.borrow_and_update().clone();
        self.attach(initial).await;
        self.publish();

        let mut identity_open = true;
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        break;
                    };
                    if !self.handle_msg(msg).await {
                        break;
                    }
                }
                changed = identity.changed(), if identity_open => {
                    if changed.is_err() {
                        tracing::warn!("identity provider closed; keeping current user");
                        identity_open = false;
                        continue;
                    }
                    let user = identity.borrow_and_update().clone();
                    self.attach(user).await;
                    self.publish();
                }
                delivery = next_remote(&mut self.subscription) => {
                    self.on_remote(delivery).await;
                    self.publish();
                }
                Some(_) = pulses.recv() => {
                    self.on_tick().await;
                    self.publish();
                }
            }
        }

        self.subscription = None;
        tracing::info!("timer worker stopped");
    }

    /// Returns false once the worker should stop.
    async fn handle_msg(&mut self, msg: TimerMsg) -> bool {
        match msg {
            TimerMsg::Dispatch { intent, resp } => {
                let result = self.handle_intent(intent).await;
                self.publish();
                resp.send(result.map(|()| self.view())).ok();
                true
            }
            TimerMsg::Snapshot { resp } => {
                self.on_tick().await;
                self.publish();
                resp.send(self.view()).ok();
                true
            }
            TimerMsg::Shutdown { resp } => {
                if self.dirty {
                    self.push().await;
                }
                resp.send(()).ok();
                false
            }
        }
    }

    async fn handle_intent(&mut self, intent: TimerIntent) -> Result<(), InfraError> {
        let now = self.now();
        tracing::debug!(?intent, "timer intent");
        let transition = match intent {
            TimerIntent::Toggle => self.machine.toggle(now)?,
            TimerIntent::Start => self.machine.start(now)?,
            TimerIntent::Pause => self.machine.pause(now)?,
            TimerIntent::Reset => self.machine.reset()?,
            TimerIntent::Finish => self.machine.finish(now)?,
            TimerIntent::SetDurationMinutes(minutes) => {
                if minutes <= 0 {
                    return Err(TimerError::InvalidDuration.into());
                }
                self.machine.reconfigure(minutes.saturating_mul(60_000))?
            }
            TimerIntent::RenameTask(name) => self.machine.rename_task(&name)?,
            TimerIntent::EnterStandby => {
                self.standby.enter(now);
                Transition::default()
            }
            TimerIntent::ExitStandby => {
                self.standby.exit();
                Transition::default()
            }
            TimerIntent::StandbyKey(key) => match self.standby.handle_key(key, now) {
                StandbyAction::ToggleTimer => self.machine.toggle(now)?,
                StandbyAction::Exit | StandbyAction::Ignored => Transition::default(),
            },
            TimerIntent::Activity => {
                self.standby.record_activity(now);
                Transition::default()
            }
        };
        self.apply(transition).await;
        Ok(())
    }

    async fn attach(&mut self, user: Option<AuthUser>) {
        let same_uid = match (&self.user, &user) {
            (Some(current), Some(next)) => current.uid == next.uid,
            (None, None) => true,
            _ => false,
        };
        if same_uid {
            self.user = user;
            return;
        }

        self.subscription = None;
        self.user = user;
        let Some(user) = self.user.clone() else {
            tracing::info!("signed out; timer continues locally");
            return;
        };

        let subscribed = match DocumentPath::timer(&user.uid) {
            Ok(path) => self.store.subscribe(&path).await,
            Err(error) => Err(error),
        };
        match subscribed {
            Ok(subscription) => {
                tracing::info!(uid = %user.uid, "listening to timer document");
                self.subscription = Some(subscription);
            }
            Err(error) => {
                tracing::warn!(
                    uid = %user.uid,
                    %error,
                    "timer subscription failed; will push local state"
                );
                self.dirty = true;
            }
        }
    }

    async fn on_remote(&mut self, delivery: Option<Option<Document>>) {
        let Some(snapshot) = delivery else {
            tracing::warn!("timer subscription ended");
            self.subscription = None;
            return;
        };
        let Some(document) = snapshot else {
            tracing::info!("no remote timer yet; creating it from local state");
            self.persist().await;
            return;
        };

        let remote = match TimerDocument::from_fields(&document.fields) {
            Ok(remote) => remote,
            Err(error) => {
                tracing::warn!(path = %document.path, %error, "ignoring unreadable timer document");
                return;
            }
        };
        let now = self.now();
        let transition = self.machine.reconcile(&remote, now);
        if let Err(error) = self.cache.save(&self.machine.document(), now) {
            tracing::warn!(%error, "local timer cache write failed");
        }
        self.apply(transition).await;
    }

    async fn on_tick(&mut self) {
        let now = self.now();
        let transition = self.machine.tick(now);
        self.apply(transition).await;

        let retry_due = self
            .last_push_attempt_ms
            .is_none_or(|last| now - last >= self.settings.push_retry_ms);
        if self.dirty && self.user.is_some() && retry_due {
            tracing::debug!("retrying timer push");
            self.persist().await;
        }
    }

    async fn apply(&mut self, transition: Transition) {
        if transition.is_empty() {
            return;
        }
        for flush in &transition.flushes {
            self.flush(flush).await;
        }
        let completed = transition.completed.is_some();
        if let Some(summary) = transition.completed {
            self.machine.complete_finish();
            tracing::info!(
                focused_ms = summary.focused_ms,
                natural = summary.natural,
                "focus session finished"
            );
            if let Some(notices) = &self.notices {
                notices.send(summary).ok();
            }
        }
        if transition.persist || completed {
            self.persist().await;
        }
    }

    async fn flush(&self, flush: &FocusFlush) {
        let Some(user) = &self.user else {
            tracing::warn!(delta_ms = flush.delta_ms, "not signed in; focus time not recorded");
            return;
        };
        if let Err(error) = self.accounting.flush(&user.uid, flush).await {
            tracing::warn!(
                uid = %user.uid,
                delta_ms = flush.delta_ms,
                %error,
                "focus flush failed"
            );
        }
    }

    async fn persist(&mut self) {
        let now = self.now();
        if let Err(error) = self.cache.save(&self.machine.document(), now) {
            tracing::warn!(%error, "local timer cache write failed");
        }
        if self.user.is_some() {
            self.push().await;
        } else {
            self.dirty = true;
        }
    }

    async fn push(&mut self) {
        let Some(user) = &self.user else {
            return;
        };
        self.last_push_attempt_ms = Some(self.now());
        let result = match DocumentPath::timer(&user.uid) {
            Ok(path) => {
                let write = DocumentWrite::merge(path, self.machine.document().to_fields())
                    .server_timestamp(FieldPath::field("lastUpdatedWeb"));
                self.store.commit(vec![write]).await
            }
            Err(error) => Err(error),
        };
        match result {
            Ok(()) => self.dirty = false,
            Err(error) => {
                tracing::warn!(uid = %user.uid, %error, "timer push failed; will retry");
                self.dirty = true;
            }
        }
    }

    fn view(&self) -> TimerView {
        let state = self.machine.state();
        TimerView::from_state(state, self.user.as_ref()).with_standby(
            self.standby.is_active(),
            self.standby.controls_visible(self.now(), state.running),
        )
    }

    fn publish(&self) {
        let Some(view_tx) = &self.view_tx else {
            return;
        };
        let next = self.view();
        view_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn next_remote(subscription: &mut Option<DocumentSubscription>) -> Option<Option<Document>> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::manual::ManualClock;
    use crate::application::standby::fake::CountingWakeLock;
    use crate::domain::models::DEFAULT_DURATION_MS;
    use crate::infrastructure::document_store::{Fields, InMemoryDocumentStore};
    use crate::infrastructure::local_cache::InMemoryLocalStateCache;
    use chrono_tz::Tz;
    use serde_json::Value;

    // 2026-10-16T08:00:00Z
    const MORNING_UTC: i64 = 1_792_137_600_000;

    struct TestIdentity {
        users: watch::Sender<Option<AuthUser>>,
    }

    impl TestIdentity {
        fn signed_in(uid: &str) -> Self {
            let (users, _) = watch::channel(Some(AuthUser {
                uid: uid.to_string(),
                email: None,
                display_name: None,
                is_anonymous: true,
            }));
            Self { users }
        }

        fn signed_out() -> Self {
            let (users, _) = watch::channel(None);
            Self { users }
        }
    }

    impl IdentityProvider for TestIdentity {
        fn current_user(&self) -> Option<AuthUser> {
            self.users.borrow().clone()
        }

        fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
            self.users.subscribe()
        }
    }

    struct Harness {
        clock: ManualClock,
        store: Arc<InMemoryDocumentStore>,
        cache: Arc<InMemoryLocalStateCache>,
        accounting: Arc<FocusAccounting>,
        handle: TimerSyncHandle,
    }

    fn spawn_with(
        identity: TestIdentity,
        cache: Arc<InMemoryLocalStateCache>,
        clock: ManualClock,
    ) -> Harness {
        let store = Arc::new(InMemoryDocumentStore::default());
        let accounting = Arc::new(
            FocusAccounting::new(Arc::clone(&store) as Arc<dyn DocumentStore>, Tz::UTC)
                .with_now_provider(clock.provider()),
        );
        let settings = TimerSettings {
            tick_interval_ms: 60_000,
            ..TimerSettings::default()
        };
        let handle = TimerSyncHandle::spawn(TimerSyncDeps {
            store: Arc::clone(&store) as Arc<dyn DocumentStore>,
            identity: Arc::new(identity),
            cache: Arc::clone(&cache) as Arc<dyn LocalStateCache>,
            accounting: Arc::clone(&accounting),
            wake_lock: Arc::new(CountingWakeLock::default()),
            settings,
            now_provider: clock.provider(),
        });
        Harness {
            clock,
            store,
            cache,
            accounting,
            handle,
        }
    }

    fn spawn_signed_in() -> Harness {
        spawn_with(
            TestIdentity::signed_in("u1"),
            Arc::new(InMemoryLocalStateCache::default()),
            ManualClock::at(MORNING_UTC),
        )
    }

    fn timer_path() -> DocumentPath {
        DocumentPath::timer("u1").expect("path")
    }

    async fn remote_timer(store: &InMemoryDocumentStore) -> Fields {
        for _ in 0..200 {
            if let Some(fields) = store.fields(&timer_path()) {
                return fields;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timer document never written");
    }

    async fn focus_today(harness: &Harness) -> i64 {
        harness
            .accounting
            .daily_record("u1", harness.accounting.today())
            .await
            .expect("daily record")
            .focus_ms
    }

    #[tokio::test(start_paused = true)]
    async fn missing_remote_document_is_created_from_local_state() {
        let harness = spawn_signed_in();
        let fields = remote_timer(&harness.store).await;
        assert_eq!(fields.get("timerRunning"), Some(&Value::from(false)));
        assert_eq!(fields.get("timerValueState"), Some(&Value::from(DEFAULT_DURATION_MS)));
        assert!(fields.get("lastUpdatedWeb").is_some_and(Value::is_string));
    }

    #[tokio::test(start_paused = true)]
    async fn seventy_second_session_streams_then_flushes_on_pause() {
        let harness = spawn_signed_in();
        remote_timer(&harness.store).await;

        let started = harness.handle.dispatch(TimerIntent::Start).await.expect("start");
        assert!(started.running);

        harness.clock.advance(60_000);
        let view = harness.handle.snapshot().await.expect("snapshot");
        assert_eq!(view.remaining_ms, DEFAULT_DURATION_MS - 60_000);
        assert_eq!(focus_today(&harness).await, 60_000);

        harness.clock.advance(10_000);
        let paused = harness.handle.dispatch(TimerIntent::Pause).await.expect("pause");
        assert!(!paused.running);
        assert_eq!(focus_today(&harness).await, 70_000);

        let fields = harness.store.fields(&timer_path()).expect("timer doc");
        assert_eq!(fields.get("savedMsThisSession"), Some(&Value::from(70_000)));
        assert_eq!(fields.get("timerEndTimestamp"), Some(&Value::from(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn finish_publishes_notice_and_second_finish_is_rejected() {
        let harness = spawn_signed_in();
        remote_timer(&harness.store).await;
        let mut notices = harness.handle.subscribe_notices();

        harness.handle.dispatch(TimerIntent::Start).await.expect("start");
        harness.clock.advance(5 * 60_000);
        let view = harness.handle.dispatch(TimerIntent::Finish).await.expect("finish");
        assert!(!view.running);
        assert_eq!(view.remaining_ms, DEFAULT_DURATION_MS);

        let summary = notices.recv().await.expect("notice");
        assert_eq!(summary.message(), "Successfully focused for 5 minutes.");
        assert_eq!(focus_today(&harness).await, 5 * 60_000);

        let second = harness.handle.dispatch(TimerIntent::Finish).await;
        assert!(matches!(
            second,
            Err(InfraError::Timer(TimerError::NothingToFinish))
        ));
        assert_eq!(focus_today(&harness).await, 5 * 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn running_timer_rejects_reconfigure_and_rename() {
        let harness = spawn_signed_in();
        harness.handle.dispatch(TimerIntent::Start).await.expect("start");
        assert!(matches!(
            harness.handle.dispatch(TimerIntent::SetDurationMinutes(50)).await,
            Err(InfraError::Timer(TimerError::NotIdle))
        ));
        assert!(matches!(
            harness
                .handle
                .dispatch(TimerIntent::RenameTask("Reading".to_string()))
                .await,
            Err(InfraError::Timer(TimerError::NotIdle))
        ));

        harness.handle.dispatch(TimerIntent::Pause).await.expect("pause");
        let view = harness
            .handle
            .dispatch(TimerIntent::SetDurationMinutes(50))
            .await
            .expect("reconfigure");
        assert_eq!(view.configured_ms, 50 * 60_000);
        assert_eq!(view.remaining_ms, 50 * 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_change_from_another_client_is_adopted() {
        let harness = spawn_signed_in();
        remote_timer(&harness.store).await;
        let mut views = harness.handle.watch_view();

        let mut remote = TimerDocument::default();
        remote.current_timer_task_name = "Reading".to_string();
        remote.timer_value_state = 10 * 60_000;
        remote.paused_remaining_ms = 4 * 60_000;
        remote.current_timer_ms = 4 * 60_000;
        harness
            .store
            .set(&timer_path(), remote.to_fields(), true)
            .await
            .expect("remote write");

        let view = tokio::time::timeout(
            Duration::from_secs(5),
            views.wait_for(|view| view.task_name == "Reading"),
        )
        .await
        .expect("view updated in time")
        .expect("view channel open")
        .clone();
        assert_eq!(view.configured_ms, 10 * 60_000);
        assert_eq!(view.remaining_ms, 4 * 60_000);
        assert_eq!(
            harness
                .cache
                .load()
                .expect("cache")
                .map(|cached| cached.document.current_timer_task_name),
            Some("Reading".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_push_is_retried_on_a_later_tick() {
        let harness = spawn_signed_in();
        remote_timer(&harness.store).await;

        harness.store.set_fail_writes(true);
        harness.handle.dispatch(TimerIntent::Start).await.expect("start");
        let fields = harness.store.fields(&timer_path()).expect("timer doc");
        assert_eq!(fields.get("timerRunning"), Some(&Value::from(false)));

        harness.store.set_fail_writes(false);
        harness.clock.advance(1_000);
        harness.handle.snapshot().await.expect("early tick");
        let fields = harness.store.fields(&timer_path()).expect("timer doc");
        assert_eq!(fields.get("timerRunning"), Some(&Value::from(false)));

        harness.clock.advance(5_000);
        harness.handle.snapshot().await.expect("retry tick");
        let fields = harness.store.fields(&timer_path()).expect("timer doc");
        assert_eq!(fields.get("timerRunning"), Some(&Value::from(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn signed_out_timer_only_touches_local_cache() {
        let cache = Arc::new(InMemoryLocalStateCache::default());
        let harness = spawn_with(
            TestIdentity::signed_out(),
            Arc::clone(&cache),
            ManualClock::at(MORNING_UTC),
        );

        harness.handle.dispatch(TimerIntent::Start).await.expect("start");
        harness.clock.advance(90_000);
        let view = harness.handle.dispatch(TimerIntent::Pause).await.expect("pause");
        assert_eq!(view.user_id, None);

        assert_eq!(harness.store.write_calls(), 0);
        let cached = cache.load().expect("cache").expect("cached timer");
        assert_eq!(cached.document.paused_remaining_ms, DEFAULT_DURATION_MS - 90_000);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_cache_is_restored_on_startup() {
        let clock = ManualClock::at(MORNING_UTC);
        let cache = Arc::new(InMemoryLocalStateCache::default());
        let mut cached = TimerDocument::default();
        cached.timer_running = true;
        cached.timer_end_timestamp = MORNING_UTC + 10 * 60_000;
        cached.saved_ms_this_session = 15 * 60_000;
        cache.save(&cached, MORNING_UTC - 60_000).expect("seed cache");

        let harness = spawn_with(TestIdentity::signed_out(), cache, clock);
        let view = harness.handle.snapshot().await.expect("snapshot");
        assert!(view.running);
        assert_eq!(view.remaining_ms, 10 * 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn standby_hides_controls_and_space_toggles_timer() {
        let harness = spawn_signed_in();
        harness.handle.dispatch(TimerIntent::Start).await.expect("start");
        let view = harness.handle.dispatch(TimerIntent::EnterStandby).await.expect("standby");
        assert!(view.standby);
        assert!(view.controls_visible);

        harness.clock.advance(3_000);
        let view = harness.handle.snapshot().await.expect("snapshot");
        assert!(!view.controls_visible);

        let view = harness
            .handle
            .dispatch(TimerIntent::StandbyKey(StandbyKey::Space))
            .await
            .expect("space");
        assert!(!view.running);
        assert!(view.controls_visible);

        let view = harness
            .handle
            .dispatch(TimerIntent::StandbyKey(StandbyKey::Escape))
            .await
            .expect("escape");
        assert!(!view.standby);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_in_standby_brings_hidden_controls_back() {
        let harness = spawn_signed_in();
        harness.handle.dispatch(TimerIntent::Start).await.expect("start");
        harness.handle.dispatch(TimerIntent::EnterStandby).await.expect("standby");

        harness.clock.advance(3_000);
        assert!(!harness.handle.snapshot().await.expect("snapshot").controls_visible);

        let view = harness.handle.dispatch(TimerIntent::Activity).await.expect("activity");
        assert!(view.standby);
        assert!(view.running);
        assert!(view.controls_visible);

        harness.clock.advance(2_999);
        assert!(harness.handle.snapshot().await.expect("snapshot").controls_visible);
        harness.clock.advance(1);
        assert!(!harness.handle.snapshot().await.expect("snapshot").controls_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_worker() {
        let harness = spawn_signed_in();
        harness.handle.shutdown().await.expect("shutdown");
        assert!(matches!(
            harness.handle.snapshot().await,
            Err(InfraError::ChannelClosed(_))
        ));
    }
}
