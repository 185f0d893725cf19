use crate::application::clock::{NowProvider, system_now};
use crate::domain::models::{AuthSession, AuthUser};
use crate::infrastructure::auth_client::{AuthClient, AuthTokenResponse};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::firestore_client::IdTokenSource;
use crate::infrastructure::session_store::SessionStore;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

const REFRESH_LEEWAY_SECONDS: i64 = 60;

/// Source of the signed-in user. Subscribers see every sign-in and sign-out.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;
    fn subscribe(&self) -> watch::Receiver<Option<AuthUser>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureSessionResult {
    Existing(AuthSession),
    Refreshed(AuthSession),
    ReauthenticationRequired,
}

pub struct SessionManager {
    auth_client: Arc<dyn AuthClient>,
    session_store: Arc<dyn SessionStore>,
    now_provider: NowProvider,
    session: Mutex<Option<AuthSession>>,
    user_tx: watch::Sender<Option<AuthUser>>,
}

impl SessionManager {
    pub fn new(auth_client: Arc<dyn AuthClient>, session_store: Arc<dyn SessionStore>) -> Self {
        let (user_tx, _) = watch::channel(None);
        Self {
            auth_client,
            session_store,
            now_provider: system_now(),
            session: Mutex::new(None),
            user_tx,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_session_valid(&self, session: &AuthSession) -> bool {
        session.is_valid_at((self.now_provider)(), REFRESH_LEEWAY_SECONDS)
    }

    /// Loads the stored session (refreshing it when close to expiry) and
    /// publishes the user. A session that cannot be refreshed is discarded.
    pub async fn restore(&self) -> Result<Option<AuthUser>, InfraError> {
        match self.ensure_session().await? {
            EnsureSessionResult::Existing(session) | EnsureSessionResult::Refreshed(session) => {
                Ok(Some(session.user))
            }
            EnsureSessionResult::ReauthenticationRequired => Ok(None),
        }
    }

    /// Restores a stored session, falling back to an anonymous account when
    /// allowed.
    pub async fn ensure_signed_in(
        &self,
        allow_anonymous: bool,
    ) -> Result<Option<AuthUser>, InfraError> {
        if let Some(user) = self.restore().await? {
            return Ok(Some(user));
        }
        if !allow_anonymous {
            return Ok(None);
        }
        self.sign_in_anonymously().await.map(Some)
    }

    pub async fn ensure_session(&self) -> Result<EnsureSessionResult, InfraError> {
        let mut guard = self.session.lock().await;
        let stored = match guard.clone() {
            Some(session) => Some(session),
            None => self.session_store.load_session()?,
        };
        let Some(stored) = stored else {
            return Ok(EnsureSessionResult::ReauthenticationRequired);
        };

        if self.is_session_valid(&stored) {
            if guard.is_none() {
                *guard = Some(stored.clone());
                self.publish(Some(stored.user.clone()));
            }
            return Ok(EnsureSessionResult::Existing(stored));
        }

        match self.auth_client.refresh(&stored.refresh_token).await {
            Ok(response) => {
                let session = self.session_from_response(response, Some(&stored.user));
                self.session_store.save_session(&session)?;
                *guard = Some(session.clone());
                self.publish(Some(session.user.clone()));
                tracing::info!(uid = %session.user.uid, "session refreshed");
                Ok(EnsureSessionResult::Refreshed(session))
            }
            Err(InfraError::Auth(message)) => {
                tracing::warn!(%message, "session refresh rejected; sign-in required");
                self.session_store.delete_session()?;
                *guard = None;
                self.publish(None);
                Ok(EnsureSessionResult::ReauthenticationRequired)
            }
            Err(error) => Err(error),
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, InfraError> {
        let response = self.auth_client.sign_up(email, password).await?;
        self.establish(response).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, InfraError> {
        let response = self.auth_client.sign_in_with_password(email, password).await?;
        self.establish(response).await
    }

    pub async fn sign_in_anonymously(&self) -> Result<AuthUser, InfraError> {
        let response = self.auth_client.sign_in_anonymously().await?;
        self.establish(response).await
    }

    pub async fn sign_out(&self) -> Result<(), InfraError> {
        let mut guard = self.session.lock().await;
        self.session_store.delete_session()?;
        *guard = None;
        self.publish(None);
        Ok(())
    }

    pub async fn update_display_name(&self, display_name: &str) -> Result<(), InfraError> {
        let token = self.require_id_token().await?;
        self.auth_client.update_display_name(&token, display_name).await?;

        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_mut() {
            session.user.display_name = Some(display_name.to_string());
            self.session_store.save_session(session)?;
            self.publish(Some(session.user.clone()));
        }
        Ok(())
    }

    pub async fn require_id_token(&self) -> Result<String, InfraError> {
        match self.ensure_session().await? {
            EnsureSessionResult::Existing(session) | EnsureSessionResult::Refreshed(session) => {
                Ok(session.id_token)
            }
            EnsureSessionResult::ReauthenticationRequired => Err(InfraError::Unauthenticated),
        }
    }

    async fn establish(&self, response: AuthTokenResponse) -> Result<AuthUser, InfraError> {
        let session = self.session_from_response(response, None);
        let mut guard = self.session.lock().await;
        self.session_store.save_session(&session)?;
        *guard = Some(session.clone());
        self.publish(Some(session.user.clone()));
        tracing::info!(uid = %session.user.uid, anonymous = session.user.is_anonymous, "signed in");
        Ok(session.user)
    }

    fn session_from_response(
        &self,
        response: AuthTokenResponse,
        previous: Option<&AuthUser>,
    ) -> AuthSession {
        let expires_at = (self.now_provider)() + Duration::seconds(response.expires_in.max(0));
        let user = AuthUser {
            email: response
                .email
                .or_else(|| previous.and_then(|user| user.email.clone())),
            display_name: response
                .display_name
                .or_else(|| previous.and_then(|user| user.display_name.clone())),
            is_anonymous: previous.map_or(response.is_anonymous, |user| user.is_anonymous),
            uid: response.uid,
        };
        AuthSession {
            user,
            id_token: response.id_token,
            refresh_token: response.refresh_token,
            expires_at,
        }
    }

    fn publish(&self, user: Option<AuthUser>) {
        self.user_tx.send_if_modified(|current| {
            if *current == user {
                false
            } else {
                *current = user;
                true
            }
        });
    }
}

impl IdentityProvider for SessionManager {
    fn current_user(&self) -> Option<AuthUser> {
        self.user_tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.user_tx.subscribe()
    }
}

#[async_trait]
impl IdTokenSource for SessionManager {
    async fn id_token(&self) -> Result<Option<String>, InfraError> {
        match self.require_id_token().await {
            Ok(token) => Ok(Some(token)),
            Err(InfraError::Unauthenticated) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    pub enum FakeResponse {
        Success(AuthTokenResponse),
        AuthError(String),
        NetworkError,
    }

    impl FakeResponse {
        fn resolve(self) -> Result<AuthTokenResponse, InfraError> {
            match self {
                Self::Success(value) => Ok(value),
                Self::AuthError(message) => Err(InfraError::Auth(message)),
                Self::NetworkError => Err(InfraError::Http(
                    "Network error. Check your connection.".to_string(),
                )),
            }
        }
    }

    pub fn token_response(uid: &str, email: Option<&str>, is_anonymous: bool) -> AuthTokenResponse {
        AuthTokenResponse {
            uid: uid.to_string(),
            email: email.map(ToOwned::to_owned),
            display_name: None,
            id_token: format!("id-{uid}"),
            refresh_token: format!("refresh-{uid}"),
            expires_in: 3600,
            is_anonymous,
        }
    }

    /// Scriptable auth backend; every call succeeds with a token for `uid-1`
    /// unless overridden.
    #[derive(Debug)]
    pub struct FakeAuthClient {
        pub sign_in_response: std::sync::Mutex<FakeResponse>,
        pub refresh_response: std::sync::Mutex<FakeResponse>,
        pub sign_in_calls: AtomicUsize,
        pub refresh_calls: AtomicUsize,
        pub display_names: std::sync::Mutex<Vec<String>>,
    }

    impl Default for FakeAuthClient {
        fn default() -> Self {
            let success =
                FakeResponse::Success(token_response("uid-1", Some("ada@example.com"), false));
            Self {
                sign_in_response: std::sync::Mutex::new(success.clone()),
                refresh_response: std::sync::Mutex::new(success),
                sign_in_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                display_names: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl FakeAuthClient {
        pub fn set_sign_in_response(&self, response: FakeResponse) {
            *self.sign_in_response.lock().expect("sign-in mutex poisoned") = response;
        }

        pub fn set_refresh_response(&self, response: FakeResponse) {
            *self.refresh_response.lock().expect("refresh mutex poisoned") = response;
        }

        fn next_sign_in(&self) -> Result<AuthTokenResponse, InfraError> {
            self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
            self.sign_in_response
                .lock()
                .expect("sign-in mutex poisoned")
                .clone()
                .resolve()
        }
    }

    #[async_trait]
    impl AuthClient for FakeAuthClient {
        async fn sign_up(
            &self,
            _email: &str,
            _password: &str,
        ) -> Result<AuthTokenResponse, InfraError> {
            self.next_sign_in()
        }

        async fn sign_in_with_password(
            &self,
            _email: &str,
            _password: &str,
        ) -> Result<AuthTokenResponse, InfraError> {
            self.next_sign_in()
        }

        async fn sign_in_anonymously(&self) -> Result<AuthTokenResponse, InfraError> {
            self.next_sign_in().map(|mut response| {
                response.email = None;
                response.is_anonymous = true;
                response
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<AuthTokenResponse, InfraError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.refresh_response
                .lock()
                .expect("refresh mutex poisoned")
                .clone()
                .resolve()
        }

        async fn update_display_name(
            &self,
            _id_token: &str,
            display_name: &str,
        ) -> Result<(), InfraError> {
            self.display_names
                .lock()
                .expect("display name mutex poisoned")
                .push(display_name.to_string());
            Ok(())
        }
    }
}
