use crate::infrastructure::document_store::{
    Document, DocumentPath, DocumentStore, DocumentSubscription, DocumentWrite, Precondition,
    Snapshot, TransactionOutcome,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::firestore_value::{
    decode_fields, encode_field_path, encode_fields, encode_value, leaf_field_paths,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use url::Url;

const FIRESTORE_API_BASE: &str = "https://firestore.googleapis.com/v1/";

/// Supplies the bearer token for store requests; `None` sends the request
/// unauthenticated.
#[async_trait]
pub trait IdTokenSource: Send + Sync {
    async fn id_token(&self) -> Result<Option<String>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub api_key: String,
    pub api_base: String,
    pub poll_interval: Duration,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_key: api_key.into(),
            api_base: FIRESTORE_API_BASE.to_string(),
            poll_interval: Duration::from_millis(2_000),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn database_root(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project_id)
    }

    fn document_name(&self, path: &DocumentPath) -> String {
        format!("{}/{}", self.database_root(), path.as_str())
    }

    fn endpoint(&self, trailing: &[&str]) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|error| InfraError::Http(format!("invalid firestore api base url: {error}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| {
                    InfraError::Http("firestore api base URL cannot be a base".to_string())
                })?;
            segments.pop_if_empty();
            segments.extend(["projects", self.project_id.as_str(), "databases", "(default)"]);
            segments.extend(trailing.iter().copied());
        }
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    fn document_endpoint(&self, path: &DocumentPath) -> Result<Url, InfraError> {
        let mut trailing = vec!["documents"];
        trailing.extend(path.as_str().split('/'));
        self.endpoint(&trailing)
    }

    fn commit_endpoint(&self) -> Result<Url, InfraError> {
        self.endpoint(&["documents:commit"])
    }
}

struct FirestoreInner {
    client: Client,
    config: FirestoreConfig,
    tokens: Arc<dyn IdTokenSource>,
    last_commit: Mutex<HashMap<DocumentPath, DateTime<Utc>>>,
}

/// Firestore v1 REST backend. Subscriptions poll the document and publish
/// only when its content changes.
#[derive(Clone)]
pub struct FirestoreRestStore {
    inner: Arc<FirestoreInner>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentPayload {
    fields: Option<Value>,
    update_time: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponsePayload {
    commit_time: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorPayload>,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorPayload {
    status: Option<String>,
    message: Option<String>,
}

impl FirestoreRestStore {
    pub fn new(config: FirestoreConfig, tokens: Arc<dyn IdTokenSource>) -> Self {
        Self {
            inner: Arc::new(FirestoreInner {
                client: Client::new(),
                config,
                tokens,
                last_commit: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl FirestoreInner {
    async fn authorized(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, InfraError> {
        Ok(match self.tokens.id_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, InfraError> {
        let url = self.config.document_endpoint(path)?;
        let response = self
            .authorized(self.client.get(url))
            .await?
            .send()
            .await
            .map_err(|error| {
                InfraError::Http(format!("network error while reading {path}: {error}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| {
                InfraError::Http(format!("failed reading document response: {error}"))
            })?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(http_error(status, &body));
        }

        let payload: DocumentPayload = serde_json::from_str(&body).map_err(|error| {
            InfraError::Store(format!("invalid document payload: {error}; body={body}"))
        })?;
        let fields = match payload.fields {
            Some(fields) => decode_fields(&fields)?,
            None => Default::default(),
        };
        Ok(Some(Document {
            path: path.clone(),
            fields,
            update_time: payload.update_time.as_deref().and_then(parse_timestamp),
        }))
    }

    async fn commit(&self, writes: &[DocumentWrite]) -> Result<TransactionOutcome, InfraError> {
        let body = json!({
            "writes": writes
                .iter()
                .map(|write| write_payload(&self.config, write))
                .collect::<Vec<_>>()
        });
        let url = self.config.commit_endpoint()?;
        let response = self
            .authorized(self.client.post(url).json(&body))
            .await?
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("network error while committing: {error}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| InfraError::Http(format!("failed reading commit response: {error}")))?;

        if !status.is_success() {
            if is_precondition_failure(status, &text) {
                return Ok(TransactionOutcome::Conflict);
            }
            return Err(http_error(status, &text));
        }

        let commit_time = serde_json::from_str::<CommitResponsePayload>(&text)
            .ok()
            .and_then(|payload| payload.commit_time)
            .as_deref()
            .and_then(parse_timestamp);
        if let Some(commit_time) = commit_time {
            if let Ok(mut last_commit) = self.last_commit.lock() {
                for write in writes {
                    last_commit.insert(write.path.clone(), commit_time);
                }
            }
        }
        Ok(TransactionOutcome::Committed)
    }

    /// A poll that started before our own commit can return the previous
    /// version; those results are skipped.
    fn is_stale(&self, path: &DocumentPath, found: Option<&Document>) -> bool {
        let Ok(last_commit) = self.last_commit.lock() else {
            return false;
        };
        let Some(committed_at) = last_commit.get(path) else {
            return false;
        };
        match found.and_then(|document| document.update_time) {
            Some(update_time) => update_time < *committed_at,
            None => true,
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreRestStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, InfraError> {
        self.inner.get(path).await
    }

    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<(), InfraError> {
        match self.inner.commit(&writes).await? {
            TransactionOutcome::Committed => Ok(()),
            TransactionOutcome::Conflict => Err(InfraError::Conflict(
                "write precondition failed".to_string(),
            )),
        }
    }

    async fn transaction(
        &self,
        writes: Vec<DocumentWrite>,
    ) -> Result<TransactionOutcome, InfraError> {
        // A single commit request is applied atomically by the server.
        self.inner.commit(&writes).await
    }

    async fn subscribe(&self, path: &DocumentPath) -> Result<DocumentSubscription, InfraError> {
        let (sender, receiver) = watch::channel(Snapshot::Pending);
        let inner = Arc::clone(&self.inner);
        let path = path.clone();
        let poll_interval = inner.config.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }
                match inner.get(&path).await {
                    Ok(found) => {
                        if inner.is_stale(&path, found.as_ref()) {
                            tracing::debug!(%path, "skipping poll result older than last commit");
                            continue;
                        }
                        let next = match found {
                            Some(document) => Snapshot::Found(document),
                            None => Snapshot::Missing,
                        };
                        sender.send_if_modified(|current| {
                            if *current == next {
                                false
                            } else {
                                *current = next;
                                true
                            }
                        });
                    }
                    Err(error) => {
                        tracing::warn!(
                            %path,
                            %error,
                            "document poll failed; keeping last known state"
                        );
                    }
                }
            }
        });

        Ok(DocumentSubscription::with_task(receiver, task))
    }
}

fn write_payload(config: &FirestoreConfig, write: &DocumentWrite) -> Value {
    let mut payload = json!({
        "update": {
            "name": config.document_name(&write.path),
            "fields": encode_fields(&write.fields),
        }
    });

    if write.merge {
        let mask = leaf_field_paths(&write.fields)
            .iter()
            .map(encode_field_path)
            .collect::<Vec<_>>();
        payload["updateMask"] = json!({ "fieldPaths": mask });
    }

    let mut transforms = write
        .increments
        .iter()
        .map(|(field, amount)| {
            json!({
                "fieldPath": encode_field_path(field),
                "increment": encode_value(&Value::from(*amount)),
            })
        })
        .collect::<Vec<_>>();
    transforms.extend(write.server_timestamps.iter().map(|field| {
        json!({
            "fieldPath": encode_field_path(field),
            "setToServerValue": "REQUEST_TIME",
        })
    }));
    if !transforms.is_empty() {
        payload["updateTransforms"] = Value::Array(transforms);
    }

    if write.precondition == Precondition::MustNotExist {
        payload["currentDocument"] = json!({ "exists": false });
    }
    payload
}

fn is_precondition_failure(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::CONFLICT {
        return true;
    }
    let code = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|error| error.status);
    matches!(
        code.as_deref(),
        Some("ALREADY_EXISTS" | "FAILED_PRECONDITION" | "ABORTED")
    )
}

fn http_error(status: StatusCode, body: &str) -> InfraError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|error| error.message);
    match message {
        Some(message) => InfraError::Store(format!(
            "firestore api error: http {}; {message}",
            status.as_u16()
        )),
        None if body.trim().is_empty() => {
            InfraError::Store(format!("firestore api error: http {}", status.as_u16()))
        }
        None => InfraError::Store(format!(
            "firestore api error: http {}; body={body}",
            status.as_u16()
        )),
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
