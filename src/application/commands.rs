use crate::application::account::{AccountService, AuthOutcome};
use crate::application::accounting::{DEFAULT_SUMMARY_DAYS, FocusAccounting, FocusSummary};
use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::clock::{NowProvider, system_now};
use crate::application::session::{IdentityProvider, SessionManager};
use crate::application::standby::{NoopWakeLock, WakeLock};
use crate::application::timer_sync::{TimerIntent, TimerSyncDeps, TimerSyncHandle};
use crate::application::username::{
    CLAIM_FAILED_MESSAGE, USERNAME_RACE_MESSAGE, UsernameAvailability,
};
use crate::domain::models::{LoginForm, SignupForm, validate_date};
use crate::domain::view::TimerView;
use crate::infrastructure::auth_client::{AuthClient, ReqwestAuthClient};
use crate::infrastructure::config::{
    AppSettings, FirebaseSettings, read_app_settings, read_firebase_settings, read_timer_settings,
};
use crate::infrastructure::document_store::{DocumentStore, InMemoryDocumentStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::firestore_client::{FirestoreConfig, FirestoreRestStore, IdTokenSource};
use crate::infrastructure::local_cache::{LocalStateCache, SqliteLocalStateCache};
use crate::infrastructure::session_store::{InMemorySessionStore, KeyringSessionStore, SessionStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// External collaborators of the app. Production wiring lives in
/// [`AppState::new`]; tests and offline mode supply their own.
pub struct AppServices {
    pub auth_client: Arc<dyn AuthClient>,
    pub session_store: Arc<dyn SessionStore>,
    pub store: Arc<dyn DocumentStore>,
    pub cache: Arc<dyn LocalStateCache>,
    pub wake_lock: Arc<dyn WakeLock>,
    pub now_provider: NowProvider,
}

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    app: AppSettings,
    firebase: FirebaseSettings,
    offline: bool,
    sessions: Arc<SessionManager>,
    accounts: AccountService,
    accounting: Arc<FocusAccounting>,
    timer: TimerSyncHandle,
}

impl AppState {
    /// Wires the Firebase-backed services. With `offline`, documents live in
    /// memory and nothing is written to the system keyring.
    pub fn new(workspace_root: PathBuf, offline: bool) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let firebase = read_firebase_settings(&bootstrap.config_dir)?;
        let now_provider = system_now();
        let cache: Arc<dyn LocalStateCache> =
            Arc::new(SqliteLocalStateCache::new(&bootstrap.database_path));
        let wake_lock: Arc<dyn WakeLock> = Arc::new(NoopWakeLock);

        if offline {
            tracing::info!("offline mode: timer documents stay in memory");
            let api_key = firebase.api_key.clone().unwrap_or_default();
            let services = AppServices {
                auth_client: Arc::new(ReqwestAuthClient::new(api_key)),
                session_store: Arc::new(InMemorySessionStore::default()),
                store: Arc::new(InMemoryDocumentStore::default()),
                cache,
                wake_lock,
                now_provider,
            };
            let mut state = Self::from_services(bootstrap, firebase, services)?;
            state.offline = true;
            return Ok(state);
        }

        let (project_id, api_key) = firebase.credentials()?;
        let sessions = Arc::new(
            SessionManager::new(
                Arc::new(ReqwestAuthClient::new(api_key.clone())),
                Arc::new(KeyringSessionStore::default()),
            )
            .with_now_provider(now_provider.clone()),
        );
        let firestore = FirestoreConfig::new(project_id, api_key)
            .with_poll_interval(Duration::from_millis(firebase.poll_interval_ms));
        let store: Arc<dyn DocumentStore> = Arc::new(FirestoreRestStore::new(
            firestore,
            Arc::clone(&sessions) as Arc<dyn IdTokenSource>,
        ));
        Self::assemble(bootstrap, firebase, sessions, store, cache, wake_lock, now_provider)
    }

    pub fn with_services(
        workspace_root: PathBuf,
        services: AppServices,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let firebase = read_firebase_settings(&bootstrap.config_dir)?;
        Self::from_services(bootstrap, firebase, services)
    }

    fn from_services(
        bootstrap: BootstrapResult,
        firebase: FirebaseSettings,
        services: AppServices,
    ) -> Result<Self, InfraError> {
        let sessions = Arc::new(
            SessionManager::new(services.auth_client, services.session_store)
                .with_now_provider(services.now_provider.clone()),
        );
        Self::assemble(
            bootstrap,
            firebase,
            sessions,
            services.store,
            services.cache,
            services.wake_lock,
            services.now_provider,
        )
    }

    fn assemble(
        bootstrap: BootstrapResult,
        firebase: FirebaseSettings,
        sessions: Arc<SessionManager>,
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn LocalStateCache>,
        wake_lock: Arc<dyn WakeLock>,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let app = read_app_settings(&bootstrap.config_dir)?;
        let settings = read_timer_settings(&bootstrap.config_dir)?;
        tracing::info!(
            workspace = %bootstrap.workspace_root.display(),
            database = %bootstrap.database_path.display(),
            timezone = %app.timezone,
            "workspace ready"
        );
        let accounting = Arc::new(
            FocusAccounting::new(Arc::clone(&store), app.timezone)
                .with_now_provider(now_provider.clone()),
        );
        let accounts = AccountService::new(Arc::clone(&sessions), Arc::clone(&store));
        let timer = TimerSyncHandle::spawn(TimerSyncDeps {
            store,
            identity: Arc::clone(&sessions) as Arc<dyn IdentityProvider>,
            cache,
            accounting: Arc::clone(&accounting),
            wake_lock,
            settings,
            now_provider,
        });

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            app,
            firebase,
            offline: false,
            sessions,
            accounts,
            accounting,
            timer,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn app_name(&self) -> &str {
        &self.app.app_name
    }

    pub fn timer(&self) -> &TimerSyncHandle {
        &self.timer
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        tracing::error!(command, %error, "command failed");
        user_message(command, error)
    }

    pub fn log_info(&self, command: &str, message: &str) {
        tracing::info!(command, message);
    }

    pub async fn shutdown(&self) -> Result<(), InfraError> {
        self.timer.shutdown().await
    }
}

/// Text shown to the user for a failed command.
pub fn user_message(command: &str, error: &InfraError) -> String {
    match error {
        InfraError::UsernameTaken(_) => USERNAME_RACE_MESSAGE.to_string(),
        InfraError::Auth(message) => message.clone(),
        InfraError::Validation(_) | InfraError::Unauthenticated => error.to_string(),
        _ if command == "claim_username" => CLAIM_FAILED_MESSAGE.to_string(),
        _ => error.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsernameCheckResponse {
    pub username: Option<String>,
    pub available: bool,
    pub message: String,
}

pub async fn restore_session_impl(state: &AppState) -> Result<Option<AuthOutcome>, InfraError> {
    let allow_anonymous = state.firebase.anonymous_sign_in && !state.offline;
    let Some(user) = state.sessions.ensure_signed_in(allow_anonymous).await?
    else {
        state.log_info("restore_session", "no stored session");
        return Ok(None);
    };
    let route = state.accounts.route_for(&user.uid).await?;
    state.log_info("restore_session", &format!("signed in as {}", user.short_id()));
    Ok(Some(AuthOutcome {
        uid: user.uid,
        email: user.email,
        route,
    }))
}

pub async fn signup_impl(
    state: &AppState,
    name: String,
    email: String,
    password: String,
    confirm_password: String,
) -> Result<AuthOutcome, InfraError> {
    let form = SignupForm {
        name,
        email,
        password,
        confirm_password,
    };
    state.accounts.signup(&form).await
}

pub async fn login_impl(
    state: &AppState,
    email: String,
    password: String,
) -> Result<AuthOutcome, InfraError> {
    state.accounts.login(&LoginForm { email, password }).await
}

pub async fn logout_impl(state: &AppState) -> Result<(), InfraError> {
    state.accounts.logout().await?;
    state.log_info("logout", "signed out");
    Ok(())
}

pub async fn check_username_impl(
    state: &AppState,
    raw: String,
) -> Result<UsernameCheckResponse, InfraError> {
    let availability = state.accounts.check_username(&raw).await?;
    let username = match &availability {
        UsernameAvailability::Available(name) | UsernameAvailability::Taken(name) => {
            Some(name.clone())
        }
        UsernameAvailability::Invalid(_) => None,
    };
    Ok(UsernameCheckResponse {
        username,
        available: availability.is_available(),
        message: availability.message(),
    })
}

pub async fn claim_username_impl(state: &AppState, raw: String) -> Result<String, InfraError> {
    let name = state.accounts.claim_username(&raw).await?;
    state.log_info("claim_username", &format!("claimed @{name}"));
    Ok(name)
}

pub async fn timer_intent_impl(
    state: &AppState,
    intent: TimerIntent,
) -> Result<TimerView, InfraError> {
    state.timer.dispatch(intent).await
}

pub async fn timer_state_impl(state: &AppState) -> Result<TimerView, InfraError> {
    state.timer.snapshot().await
}

pub async fn focus_summary_impl(
    state: &AppState,
    end_date: Option<String>,
    days: Option<u32>,
) -> Result<FocusSummary, InfraError> {
    let user = state.accounts.require_user()?;
    let end = match end_date {
        Some(raw) => validate_date(&raw, "end_date").map_err(InfraError::Validation)?,
        None => state.accounting.today(),
    };
    state
        .accounting
        .focus_summary(&user.uid, end, days.unwrap_or(DEFAULT_SUMMARY_DAYS))
        .await
}
