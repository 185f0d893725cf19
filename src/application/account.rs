use crate::application::session::{IdentityProvider, SessionManager};
use crate::application::username::{UsernameAvailability, UsernameRegistry};
use crate::domain::models::{AuthUser, LoginForm, SignupForm, UserProfile};
use crate::infrastructure::document_store::{
    DocumentPath, DocumentStore, DocumentWrite, FieldPath, Fields,
};
use crate::infrastructure::error::InfraError;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Where the adapter should go after a successful sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostAuthRoute {
    Home,
    UsernameSetup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthOutcome {
    pub uid: String,
    pub email: Option<String>,
    pub route: PostAuthRoute,
}

pub struct AccountService {
    sessions: Arc<SessionManager>,
    store: Arc<dyn DocumentStore>,
    usernames: UsernameRegistry,
}

impl AccountService {
    pub fn new(sessions: Arc<SessionManager>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            usernames: UsernameRegistry::new(Arc::clone(&store)),
            sessions,
            store,
        }
    }

    pub fn require_user(&self) -> Result<AuthUser, InfraError> {
        self.sessions.current_user().ok_or(InfraError::Unauthenticated)
    }

    pub async fn signup(&self, form: &SignupForm) -> Result<AuthOutcome, InfraError> {
        form.validate().map_err(InfraError::Validation)?;
        let user = self.sessions.sign_up(form.email.trim(), &form.password).await?;

        let mut profile = Fields::new();
        profile.insert("email".to_string(), Value::from(form.email.trim()));
        profile.insert("display_name".to_string(), Value::from(form.name.trim()));
        profile.insert("username".to_string(), Value::Null);
        profile.insert("onboarding_complete".to_string(), Value::from(false));
        let write = DocumentWrite::merge(DocumentPath::user(&user.uid)?, profile)
            .server_timestamp(FieldPath::field("created_time"));
        self.store.commit(vec![write]).await?;

        tracing::info!(uid = %user.uid, "account created");
        Ok(AuthOutcome {
            uid: user.uid,
            email: user.email,
            route: PostAuthRoute::UsernameSetup,
        })
    }

    pub async fn login(&self, form: &LoginForm) -> Result<AuthOutcome, InfraError> {
        form.validate().map_err(InfraError::Validation)?;
        let user = self.sessions.sign_in(form.email.trim(), &form.password).await?;
        let route = self.route_for(&user.uid).await?;
        Ok(AuthOutcome {
            uid: user.uid,
            email: user.email,
            route,
        })
    }

    pub async fn logout(&self) -> Result<(), InfraError> {
        self.sessions.sign_out().await
    }

    pub async fn profile(&self, uid: &str) -> Result<Option<UserProfile>, InfraError> {
        let Some(document) = self.store.get(&DocumentPath::user(uid)?).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(Value::Object(document.fields))?))
    }

    pub async fn route_for(&self, uid: &str) -> Result<PostAuthRoute, InfraError> {
        let has_username = self
            .profile(uid)
            .await?
            .is_some_and(|profile| profile.has_username());
        Ok(if has_username {
            PostAuthRoute::Home
        } else {
            PostAuthRoute::UsernameSetup
        })
    }

    pub async fn check_username(&self, raw: &str) -> Result<UsernameAvailability, InfraError> {
        self.usernames.check_availability(raw).await
    }

    /// Claims a username for the signed-in user and mirrors it into the auth
    /// display name. The claim stands even if the display name update fails.
    pub async fn claim_username(&self, raw: &str) -> Result<String, InfraError> {
        let user = self.require_user()?;
        let name = self.usernames.claim(&user, raw).await?;
        if let Err(error) = self.sessions.update_display_name(&name).await {
            tracing::warn!(
                uid = %user.uid,
                %error,
                "display name update failed after username claim"
            );
        }
        Ok(name)
    }
}
