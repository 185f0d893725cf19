use crate::domain::models::{AuthUser, UsernameIssue, normalize_username, validate_username};
use crate::infrastructure::document_store::{
    DocumentPath, DocumentStore, DocumentWrite, FieldPath, Fields, TransactionOutcome,
};
use crate::infrastructure::error::InfraError;
use serde_json::Value;
use std::sync::Arc;

pub const USERNAME_RACE_MESSAGE: &str = "Someone just took this username.";
pub const CLAIM_FAILED_MESSAGE: &str = "Transaction failed. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsernameAvailability {
    Invalid(UsernameIssue),
    Taken(String),
    Available(String),
}

impl UsernameAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn message(&self) -> String {
        match self {
            Self::Invalid(issue) => issue.message().to_string(),
            Self::Taken(_) => "Username taken".to_string(),
            Self::Available(name) => format!("@{name} is available"),
        }
    }
}

/// Reserves public handles. A handle is owned by whoever first creates
/// `usernames/{name}`; the profile and leaderboard documents are written in the
/// same transaction.
pub struct UsernameRegistry {
    store: Arc<dyn DocumentStore>,
}

impl UsernameRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn check_availability(&self, raw: &str) -> Result<UsernameAvailability, InfraError> {
        let name = normalize_username(raw);
        if let Err(issue) = validate_username(&name) {
            return Ok(UsernameAvailability::Invalid(issue));
        }
        let path = DocumentPath::username(&name)?;
        Ok(match self.store.get(&path).await? {
            Some(_) => UsernameAvailability::Taken(name),
            None => UsernameAvailability::Available(name),
        })
    }

    /// Claims the normalized form of `raw` for `user` and returns it.
    pub async fn claim(&self, user: &AuthUser, raw: &str) -> Result<String, InfraError> {
        let name = normalize_username(raw);
        validate_username(&name)
            .map_err(|issue| InfraError::Validation(issue.message().to_string()))?;

        let writes = claim_writes(user, &name)?;
        match self.store.transaction(writes).await? {
            TransactionOutcome::Committed => {
                tracing::info!(uid = %user.uid, username = %name, "username claimed");
                Ok(name)
            }
            TransactionOutcome::Conflict => {
                tracing::warn!(uid = %user.uid, username = %name, "username claim lost a race");
                Err(InfraError::UsernameTaken(name))
            }
        }
    }
}

fn claim_writes(user: &AuthUser, name: &str) -> Result<Vec<DocumentWrite>, InfraError> {
    let mut reservation = Fields::new();
    reservation.insert("uid".to_string(), Value::from(user.uid.as_str()));

    let mut profile = Fields::new();
    profile.insert("username".to_string(), Value::from(name));
    profile.insert("display_name".to_string(), Value::from(name));
    profile.insert("uid".to_string(), Value::from(user.uid.as_str()));
    profile.insert(
        "email".to_string(),
        user.email.as_deref().map_or(Value::Null, Value::from),
    );

    let mut club = Fields::new();
    club.insert("uid".to_string(), Value::from(user.uid.as_str()));
    club.insert("username".to_string(), Value::from(name));

    Ok(vec![
        DocumentWrite::set(DocumentPath::username(name)?, reservation)
            .must_not_exist()
            .server_timestamp(FieldPath::field("createdAt")),
        DocumentWrite::merge(DocumentPath::user(&user.uid)?, profile)
            .server_timestamp(FieldPath::field("updatedAt")),
        DocumentWrite::merge(DocumentPath::top1club(&user.uid)?, club)
            .server_timestamp(FieldPath::field("createdAt")),
    ])
}
