use crate::domain::models::AuthSession;
use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

pub trait SessionStore: Send + Sync {
    fn save_session(&self, session: &AuthSession) -> Result<(), InfraError>;
    fn load_session(&self) -> Result<Option<AuthSession>, InfraError>;
    fn delete_session(&self) -> Result<(), InfraError>;
}

/// Persists the signed-in session in the platform credential vault.
#[derive(Debug, Clone)]
pub struct KeyringSessionStore {
    service_name: String,
    account_name: String,
}

impl KeyringSessionStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringSessionStore {
    fn default() -> Self {
        Self::new("discipline.firebase.session", "default")
    }
}

impl SessionStore for KeyringSessionStore {
    fn save_session(&self, session: &AuthSession) -> Result<(), InfraError> {
        let payload = serde_json::to_string(session)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_session(&self) -> Result<Option<AuthSession>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let session = serde_json::from_str::<AuthSession>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(session))
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    session: Mutex<Option<AuthSession>>,
}

impl InMemorySessionStore {
    fn guard(&self) -> Result<std::sync::MutexGuard<'_, Option<AuthSession>>, InfraError> {
        self.session
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))
    }
}

impl SessionStore for InMemorySessionStore {
    fn save_session(&self, session: &AuthSession) -> Result<(), InfraError> {
        *self.guard()? = Some(session.clone());
        Ok(())
    }

    fn load_session(&self) -> Result<Option<AuthSession>, InfraError> {
        Ok(self.guard()?.clone())
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        *self.guard()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AuthUser;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn arb_session() -> impl Strategy<Value = AuthSession> {
        (
            "[A-Za-z0-9]{8,28}",
            prop::option::of("[a-z]{1,10}@[a-z]{1,8}\\.com"),
            prop::option::of("[A-Za-z ]{1,20}"),
            any::<bool>(),
            "[A-Za-z0-9._\\-]{1,64}",
            "[A-Za-z0-9._\\-]{1,64}",
            0i64..10_000_000,
        )
            .prop_map(
                |(uid, email, display_name, is_anonymous, id_token, refresh_token, offset)| {
                    AuthSession {
                        user: AuthUser {
                            uid,
                            email,
                            display_name,
                            is_anonymous,
                        },
                        id_token,
                        refresh_token,
                        expires_at: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default()
                            + Duration::seconds(offset),
                    }
                },
            )
    }

    // Feature: discipline-timer, Property: stored session round-trips unchanged
    proptest! {
        #[test]
        fn session_roundtrip(session in arb_session()) {
            let store = InMemorySessionStore::default();
            store.save_session(&session).expect("save session");
            let loaded = store.load_session().expect("load session").expect("session exists");
            prop_assert_eq!(loaded, session);
        }
    }

    #[test]
    fn delete_clears_session() {
        let store = InMemorySessionStore::default();
        store.delete_session().expect("delete on empty store");
        assert!(store.load_session().expect("load").is_none());
    }
}
