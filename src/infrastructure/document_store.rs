use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub type Fields = Map<String, Value>;

/// Slash-separated document location, always an even number of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn new(raw: &str) -> Result<Self, InfraError> {
        let segments = raw
            .trim()
            .trim_matches('/')
            .split('/')
            .map(str::trim)
            .collect::<Vec<_>>();
        if segments.iter().any(|segment| segment.is_empty()) || segments.len() % 2 != 0 {
            return Err(InfraError::Store(format!("invalid document path '{raw}'")));
        }
        Ok(Self(segments.join("/")))
    }

    fn from_segments(segments: &[&str]) -> Result<Self, InfraError> {
        if segments
            .iter()
            .any(|segment| segment.trim().is_empty() || segment.contains('/'))
        {
            return Err(InfraError::Store(format!(
                "invalid document path segments {segments:?}"
            )));
        }
        Self::new(&segments.join("/"))
    }

    pub fn timer(uid: &str) -> Result<Self, InfraError> {
        Self::from_segments(&["users", uid, "appState", "timer"])
    }

    pub fn user(uid: &str) -> Result<Self, InfraError> {
        Self::from_segments(&["users", uid])
    }

    pub fn daily_focus(uid: &str, day: &str) -> Result<Self, InfraError> {
        Self::from_segments(&["users", uid, "weeklyFocus", day])
    }

    pub fn username(name: &str) -> Result<Self, InfraError> {
        Self::from_segments(&["usernames", name])
    }

    pub fn top1club(uid: &str) -> Result<Self, InfraError> {
        Self::from_segments(&["top1club", uid])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Path to a (possibly nested) field. Segments are kept unescaped; each
/// backend applies its own quoting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn field(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    pub fn nested(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self(vec![parent.into(), child.into()])
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub fields: Fields,
    pub update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precondition {
    #[default]
    None,
    MustNotExist,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWrite {
    pub path: DocumentPath,
    pub fields: Fields,
    pub merge: bool,
    pub precondition: Precondition,
    pub increments: Vec<(FieldPath, i64)>,
    pub server_timestamps: Vec<FieldPath>,
}

impl DocumentWrite {
    pub fn set(path: DocumentPath, fields: Fields) -> Self {
        Self {
            path,
            fields,
            merge: false,
            precondition: Precondition::None,
            increments: Vec::new(),
            server_timestamps: Vec::new(),
        }
    }

    pub fn merge(path: DocumentPath, fields: Fields) -> Self {
        Self {
            merge: true,
            ..Self::set(path, fields)
        }
    }

    pub fn must_not_exist(mut self) -> Self {
        self.precondition = Precondition::MustNotExist;
        self
    }

    pub fn increment(mut self, field: FieldPath, amount: i64) -> Self {
        self.increments.push((field, amount));
        self
    }

    pub fn server_timestamp(mut self, field: FieldPath) -> Self {
        self.server_timestamps.push(field);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    Conflict,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Pending,
    Missing,
    Found(Document),
}

impl Snapshot {
    fn delivery(self) -> Option<Option<Document>> {
        match self {
            Self::Pending => None,
            Self::Missing => Some(None),
            Self::Found(document) => Some(Some(document)),
        }
    }
}

/// Latest-value stream for one document. Intermediate states may be skipped
/// when the consumer is slower than the producer.
#[derive(Debug)]
pub struct DocumentSubscription {
    receiver: watch::Receiver<Snapshot>,
    primed: bool,
    task: Option<JoinHandle<()>>,
}

impl DocumentSubscription {
    pub fn new(receiver: watch::Receiver<Snapshot>) -> Self {
        Self {
            receiver,
            primed: false,
            task: None,
        }
    }

    /// Ties a background producer to the subscription; it is aborted on drop.
    pub fn with_task(receiver: watch::Receiver<Snapshot>, task: JoinHandle<()>) -> Self {
        Self {
            receiver,
            primed: false,
            task: Some(task),
        }
    }

    /// `Some(None)` means the document does not exist; `None` means the stream
    /// has ended.
    pub async fn next(&mut self) -> Option<Option<Document>> {
        if !self.primed {
            self.primed = true;
            let current = self.receiver.borrow_and_update().clone();
            if let Some(delivery) = current.delivery() {
                return Some(delivery);
            }
        }
        loop {
            self.receiver.changed().await.ok()?;
            let current = self.receiver.borrow_and_update().clone();
            if let Some(delivery) = current.delivery() {
                return Some(delivery);
            }
        }
    }
}

impl Drop for DocumentSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, InfraError>;

    /// Applies writes in order; not atomic across documents.
    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<(), InfraError>;

    /// Applies all writes or none. A failed precondition yields `Conflict`.
    async fn transaction(
        &self,
        writes: Vec<DocumentWrite>,
    ) -> Result<TransactionOutcome, InfraError>;

    async fn subscribe(&self, path: &DocumentPath) -> Result<DocumentSubscription, InfraError>;

    async fn set(
        &self,
        path: &DocumentPath,
        fields: Fields,
        merge: bool,
    ) -> Result<(), InfraError> {
        let write = if merge {
            DocumentWrite::merge(path.clone(), fields)
        } else {
            DocumentWrite::set(path.clone(), fields)
        };
        self.commit(vec![write]).await
    }

    /// Merge-writes `fields` and adds each amount to its counter.
    async fn increment(
        &self,
        path: &DocumentPath,
        increments: Vec<(FieldPath, i64)>,
        fields: Fields,
    ) -> Result<(), InfraError> {
        let write = increments
            .into_iter()
            .fold(DocumentWrite::merge(path.clone(), fields), |write, (field, amount)| {
                write.increment(field, amount)
            });
        self.commit(vec![write]).await
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    fields: Fields,
    update_time: DateTime<Utc>,
}

/// Process-local store with the same write semantics as Firestore: merge
/// writes deep-merge maps, increments treat non-numeric values as zero.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<BTreeMap<DocumentPath, StoredDocument>>,
    watchers: Mutex<HashMap<DocumentPath, watch::Sender<Snapshot>>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    write_calls: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn fields(&self, path: &DocumentPath) -> Option<Fields> {
        self.documents
            .lock()
            .ok()
            .and_then(|documents| documents.get(path).map(|stored| stored.fields.clone()))
    }

    fn lock_documents(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<DocumentPath, StoredDocument>>, InfraError> {
        self.documents
            .lock()
            .map_err(|error| InfraError::Store(format!("document lock poisoned: {error}")))
    }

    fn lock_watchers(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<DocumentPath, watch::Sender<Snapshot>>>, InfraError> {
        self.watchers
            .lock()
            .map_err(|error| InfraError::Store(format!("watcher lock poisoned: {error}")))
    }

    fn check_writable(&self) -> Result<(), InfraError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(InfraError::Store("write rejected: store unavailable".to_string()));
        }
        Ok(())
    }

    fn apply(
        documents: &mut BTreeMap<DocumentPath, StoredDocument>,
        write: &DocumentWrite,
        now: DateTime<Utc>,
    ) {
        let mut fields = match documents.get(&write.path) {
            Some(existing) if write.merge => {
                let mut merged = existing.fields.clone();
                deep_merge(&mut merged, &write.fields);
                merged
            }
            _ => write.fields.clone(),
        };
        for (field, amount) in &write.increments {
            update_field(&mut fields, field.segments(), |current| {
                Value::from(numeric(current) + amount)
            });
        }
        for field in &write.server_timestamps {
            update_field(&mut fields, field.segments(), |_| Value::String(now.to_rfc3339()));
        }
        documents.insert(
            write.path.clone(),
            StoredDocument {
                fields,
                update_time: now,
            },
        );
    }

    fn publish(&self, paths: &[DocumentPath]) -> Result<(), InfraError> {
        let documents = self.lock_documents()?;
        let watchers = self.lock_watchers()?;
        for path in paths {
            if let Some(sender) = watchers.get(path) {
                sender.send_replace(snapshot_of(&documents, path));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, InfraError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(InfraError::Store("read rejected: store unavailable".to_string()));
        }
        let documents = self.lock_documents()?;
        Ok(match snapshot_of(&documents, path) {
            Snapshot::Found(document) => Some(document),
            _ => None,
        })
    }

    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<(), InfraError> {
        match self.transaction(writes).await? {
            TransactionOutcome::Committed => Ok(()),
            TransactionOutcome::Conflict => Err(InfraError::Conflict(
                "document already exists".to_string(),
            )),
        }
    }

    async fn transaction(
        &self,
        writes: Vec<DocumentWrite>,
    ) -> Result<TransactionOutcome, InfraError> {
        self.check_writable()?;
        let now = Utc::now();
        let paths = {
            let mut documents = self.lock_documents()?;
            let conflict = writes.iter().any(|write| {
                write.precondition == Precondition::MustNotExist
                    && documents.contains_key(&write.path)
            });
            if conflict {
                return Ok(TransactionOutcome::Conflict);
            }
            for write in &writes {
                Self::apply(&mut documents, write, now);
            }
            writes.into_iter().map(|write| write.path).collect::<Vec<_>>()
        };
        self.publish(&paths)?;
        Ok(TransactionOutcome::Committed)
    }

    async fn subscribe(&self, path: &DocumentPath) -> Result<DocumentSubscription, InfraError> {
        let initial = {
            let documents = self.lock_documents()?;
            snapshot_of(&documents, path)
        };
        let mut watchers = self.lock_watchers()?;
        let sender = watchers
            .entry(path.clone())
            .or_insert_with(|| watch::channel(Snapshot::Pending).0);
        sender.send_replace(initial);
        Ok(DocumentSubscription::new(sender.subscribe()))
    }
}

fn snapshot_of(
    documents: &BTreeMap<DocumentPath, StoredDocument>,
    path: &DocumentPath,
) -> Snapshot {
    match documents.get(path) {
        Some(stored) => Snapshot::Found(Document {
            path: path.clone(),
            fields: stored.fields.clone(),
            update_time: Some(stored.update_time),
        }),
        None => Snapshot::Missing,
    }
}

fn deep_merge(target: &mut Fields, source: &Fields) {
    for (key, value) in source {
        if let (Some(Value::Object(existing)), Value::Object(incoming)) =
            (target.get_mut(key), value)
        {
            deep_merge(existing, incoming);
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

/// Replaces the value at `segments`, creating intermediate maps and replacing
/// non-map values on the way.
fn update_field<F>(fields: &mut Fields, segments: &[String], update: F)
where
    F: FnOnce(Option<&Value>) -> Value,
{
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        let next = update(fields.get(first));
        fields.insert(first.clone(), next);
        return;
    }
    let entry = fields
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(child) = entry {
        update_field(child, rest, update);
    }
}

fn numeric(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value.round() as i64))
            .unwrap_or(0),
        _ => 0,
    }
}
