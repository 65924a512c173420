//! In-process backend used by the test suite.
//!
//! Behaves like the hosted project closely enough for the views: generated
//! ids and timestamps on insert, equality/range filters, ordering, exact
//! counts. Every operation is recorded in a call log, can be made to fail,
//! and can be held mid-flight so tests can observe optimistic state.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{watch, Notify};

use super::{
    AuthProvider, AuthUser, Backend, Filter, FilterOp, ObjectStore, Patch, Query, Row, Session,
    SignUpOutcome, TableStore,
};
use crate::error::DashboardError;
use crate::types::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Insert,
    Update,
    Delete,
    Count,
    Upload,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub table: String,
}

fn injected_failure(op: Op, table: &str) -> DashboardError {
    DashboardError::Remote {
        status: 503,
        message: format!("injected {:?} failure on {}", op, table),
    }
}

/// Failure switches, holds and the call log shared by tables and storage.
#[derive(Default)]
struct Control {
    failing: HashSet<(Op, String)>,
    held: HashMap<(Op, String), Arc<Notify>>,
    calls: Vec<Call>,
}

impl Control {
    /// Log the call and hand back the hold gate, if one is armed.
    fn enter(&mut self, op: Op, table: &str) -> Option<Arc<Notify>> {
        self.calls.push(Call {
            op,
            table: table.to_string(),
        });
        self.held.remove(&(op, table.to_string()))
    }

    fn check(&self, op: Op, table: &str) -> Result<(), DashboardError> {
        if self.failing.contains(&(op, table.to_string())) {
            return Err(injected_failure(op, table));
        }
        Ok(())
    }
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Default)]
struct TablesInner {
    rows: HashMap<String, Vec<Row>>,
    next_id: u64,
    last_stamp: Option<DateTime<Utc>>,
    control: Control,
}

impl TablesInner {
    fn stamp(&mut self) -> String {
        let mut now = Utc::now();
        if let Some(last) = self.last_stamp {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        self.last_stamp = Some(now);
        now.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn complete(&mut self, mut row: Row) -> Row {
        if let Some(obj) = row.as_object_mut() {
            if obj.get("id").map_or(true, Value::is_null) {
                self.next_id += 1;
                obj.insert("id".to_string(), Value::from(self.next_id));
            }
            if obj.get("created_at").map_or(true, Value::is_null) {
                let stamp = self.stamp();
                obj.insert("created_at".to_string(), Value::String(stamp));
            }
        }
        row
    }
}

#[derive(Default)]
pub struct MemoryTables {
    inner: Mutex<TablesInner>,
}

impl MemoryTables {
    /// Load rows without logging a call; missing ids and timestamps are filled.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut inner = self.inner.lock();
        for row in rows {
            let row = inner.complete(row);
            inner.rows.entry(table.to_string()).or_default().push(row);
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner.lock().rows.get(table).cloned().unwrap_or_default()
    }

    /// Make every `op` on `table` fail until `heal` is called.
    pub fn fail(&self, op: Op, table: &str) {
        self.inner
            .lock()
            .control
            .failing
            .insert((op, table.to_string()));
    }

    pub fn heal(&self) {
        self.inner.lock().control.failing.clear();
    }

    /// Park the next `op` on `table` until the returned gate is notified.
    pub fn hold(&self, op: Op, table: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.inner
            .lock()
            .control
            .held
            .insert((op, table.to_string()), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().control.calls.clone()
    }

    pub fn calls_of(&self, op: Op) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    async fn enter(&self, op: Op, table: &str) -> Result<(), DashboardError> {
        let gate = self.inner.lock().control.enter(op, table);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.inner.lock().control.check(op, table)
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn compare_text(a: &str, b: &str) -> Ordering {
    if let (Ok(x), Ok(y)) = (
        DateTime::parse_from_rfc3339(a),
        DateTime::parse_from_rfc3339(b),
    ) {
        return x.cmp(&y);
    }
    if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    a.cmp(b)
}

/// Nulls sort after every value, as Postgres does for ascending order.
fn compare_column(a: &Row, b: &Row, column: &str) -> Ordering {
    match (
        a.get(column).and_then(value_text),
        b.get(column).and_then(value_text),
    ) {
        (Some(x), Some(y)) => compare_text(&x, &y),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
    }
}

fn matches(row: &Row, filter: &Filter) -> bool {
    let Some(actual) = row.get(&filter.column).and_then(value_text) else {
        return false;
    };
    match filter.op {
        FilterOp::Eq => actual == filter.value,
        FilterOp::Gte => compare_text(&actual, &filter.value) != Ordering::Less,
    }
}

fn has_id(row: &Row, id: &RecordId) -> bool {
    row.get("id").and_then(value_text).as_deref() == Some(id.as_str())
}

fn project(row: &Row, columns: &Option<String>) -> Row {
    let Some(columns) = columns.as_deref().filter(|c| c.trim() != "*") else {
        return row.clone();
    };
    let mut out = serde_json::Map::new();
    for column in columns.split(',').map(str::trim) {
        if let Some(value) = row.get(column) {
            out.insert(column.to_string(), value.clone());
        }
    }
    Value::Object(out)
}

#[async_trait]
impl TableStore for MemoryTables {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, DashboardError> {
        self.enter(Op::Select, table).await?;
        let inner = self.inner.lock();
        let mut rows: Vec<Row> = inner
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| matches(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_column(a, b, &order.column);
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows.iter().map(|row| project(row, &query.columns)).collect())
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, DashboardError> {
        self.enter(Op::Insert, table).await?;
        if !row.is_object() {
            return Err(DashboardError::Remote {
                status: 400,
                message: "insert payload must be an object".to_string(),
            });
        }
        let mut inner = self.inner.lock();
        let row = inner.complete(row);
        inner
            .rows
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, id: &RecordId, patch: Patch) -> Result<(), DashboardError> {
        self.enter(Op::Update, table).await?;
        let mut inner = self.inner.lock();
        if let Some(rows) = inner.rows.get_mut(table) {
            for row in rows.iter_mut().filter(|row| has_id(row, id)) {
                if let Some(obj) = row.as_object_mut() {
                    for (key, value) in &patch {
                        obj.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, id: &RecordId) -> Result<(), DashboardError> {
        self.enter(Op::Delete, table).await?;
        let mut inner = self.inner.lock();
        if let Some(rows) = inner.rows.get_mut(table) {
            rows.retain(|row| !has_id(row, id));
        }
        Ok(())
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, DashboardError> {
        self.enter(Op::Count, table).await?;
        let inner = self.inner.lock();
        let count = inner
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|f| matches(row, f)))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
struct StorageInner {
    objects: HashMap<String, StoredObject>,
    control: Control,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<StorageInner>,
}

impl MemoryStorage {
    pub fn object(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.inner
            .lock()
            .objects
            .get(&format!("{}/{}", bucket, path))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.inner.lock().objects.len()
    }

    pub fn fail(&self, op: Op, bucket: &str) {
        self.inner
            .lock()
            .control
            .failing
            .insert((op, bucket.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().control.calls.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), DashboardError> {
        let mut inner = self.inner.lock();
        inner.control.enter(Op::Upload, bucket);
        inner.control.check(Op::Upload, bucket)?;
        let key = format!("{}/{}", bucket, path);
        if inner.objects.contains_key(&key) {
            return Err(DashboardError::Remote {
                status: 409,
                message: "The resource already exists".to_string(),
            });
        }
        inner.objects.insert(
            key,
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn remove(&self, bucket: &str, path: &str) -> Result<(), DashboardError> {
        let mut inner = self.inner.lock();
        inner.control.enter(Op::Remove, bucket);
        inner.control.check(Op::Remove, bucket)?;
        inner.objects.remove(&format!("{}/{}", bucket, path));
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{}/{}", bucket, path)
    }

    fn path_from_public_url(&self, bucket: &str, url: &str) -> Option<String> {
        super::storage::strip_object_prefix(url, &format!("memory://{}/", bucket))
    }
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    Normal,
    Fail,
    /// Never resolves; exercises the session gate timeout.
    Stall,
}

struct MemoryUser {
    id: String,
    password: String,
}

pub struct MemoryAuth {
    users: Mutex<HashMap<String, MemoryUser>>,
    current: watch::Sender<Option<Session>>,
    check: Mutex<SessionCheck>,
    require_confirmation: Mutex<bool>,
}

impl Default for MemoryAuth {
    fn default() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            users: Mutex::new(HashMap::new()),
            current,
            check: Mutex::new(SessionCheck::Normal),
            require_confirmation: Mutex::new(false),
        }
    }
}

impl MemoryAuth {
    pub fn add_user(&self, email: &str, password: &str) {
        self.users.lock().insert(
            email.to_string(),
            MemoryUser {
                id: uuid::Uuid::new_v4().to_string(),
                password: password.to_string(),
            },
        );
    }

    /// Install a session directly, as if restored from storage.
    pub fn sign_in_as(&self, email: &str) -> Session {
        let session = Session {
            access_token: format!("memory-{}", uuid::Uuid::new_v4()),
            refresh_token: None,
            expires_at: None,
            user: AuthUser {
                id: uuid::Uuid::new_v4().to_string(),
                email: Some(email.to_string()),
            },
        };
        self.current.send_replace(Some(session.clone()));
        session
    }

    pub fn set_session_check(&self, check: SessionCheck) {
        *self.check.lock() = check;
    }

    pub fn require_confirmation(&self, required: bool) {
        *self.require_confirmation.lock() = required;
    }

    fn issue(&self, id: &str, email: &str) -> Session {
        Session {
            access_token: format!("memory-{}", uuid::Uuid::new_v4()),
            refresh_token: Some(format!("refresh-{}", uuid::Uuid::new_v4())),
            expires_at: Some(Utc::now().timestamp() + 3600),
            user: AuthUser {
                id: id.to_string(),
                email: Some(email.to_string()),
            },
        }
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, DashboardError> {
        let id = {
            let users = self.users.lock();
            match users.get(email) {
                Some(user) if user.password == password => user.id.clone(),
                _ => {
                    return Err(DashboardError::Remote {
                        status: 400,
                        message: "Invalid login credentials".to_string(),
                    })
                }
            }
        };
        let session = self.issue(&id, email);
        self.current.send_replace(Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, DashboardError> {
        let id = uuid::Uuid::new_v4().to_string();
        {
            let mut users = self.users.lock();
            if users.contains_key(email) {
                return Err(DashboardError::Remote {
                    status: 422,
                    message: "User already registered".to_string(),
                });
            }
            users.insert(
                email.to_string(),
                MemoryUser {
                    id: id.clone(),
                    password: password.to_string(),
                },
            );
        }

        if *self.require_confirmation.lock() {
            return Ok(SignUpOutcome::ConfirmationPending(AuthUser {
                id,
                email: Some(email.to_string()),
            }));
        }
        let session = self.issue(&id, email);
        self.current.send_replace(Some(session.clone()));
        Ok(SignUpOutcome::SignedIn(session))
    }

    async fn session(&self) -> Result<Option<Session>, DashboardError> {
        let check = *self.check.lock();
        match check {
            SessionCheck::Normal => Ok(self.current.borrow().clone()),
            SessionCheck::Fail => Err(DashboardError::Network("connection refused".to_string())),
            SessionCheck::Stall => std::future::pending().await,
        }
    }

    async fn user(&self) -> Result<Option<AuthUser>, DashboardError> {
        Ok(self.session().await?.map(|s| s.user))
    }

    async fn refresh_rejected(&self, rejected_token: &str) -> Result<Option<Session>, DashboardError> {
        let current = self.current.borrow().clone();
        match current {
            Some(session) if session.access_token == rejected_token => {
                let email = session.user.email.clone().unwrap_or_default();
                let fresh = self.issue(&session.user.id, &email);
                self.current.send_replace(Some(fresh.clone()));
                Ok(Some(fresh))
            }
            other => Ok(other),
        }
    }

    async fn sign_out(&self) -> Result<(), DashboardError> {
        self.current.send_replace(None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }
}

// ============================================================================
// Bundle
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub tables: Arc<MemoryTables>,
    pub storage: Arc<MemoryStorage>,
    pub auth: Arc<MemoryAuth>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(&self) -> Backend {
        Backend {
            tables: self.tables.clone(),
            storage: self.storage.clone(),
            auth: self.auth.clone(),
            bucket: "client-assets".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_assigns_id_and_timestamp() {
        let tables = MemoryTables::default();
        let first = tables.insert("leads", json!({"estado": "nuevo"})).await.unwrap();
        let second = tables.insert("leads", json!({"estado": "nuevo"})).await.unwrap();

        assert_eq!(first["id"], json!(1));
        assert_eq!(second["id"], json!(2));
        assert!(first["created_at"].as_str().unwrap() < second["created_at"].as_str().unwrap());
    }

    #[tokio::test]
    async fn test_select_filters_orders_and_limits() {
        let tables = MemoryTables::default();
        tables.seed(
            "ClientFiles",
            vec![
                json!({"client_id": 1, "file_name": "a", "created_at": "2025-01-01T00:00:00Z"}),
                json!({"client_id": 2, "file_name": "b", "created_at": "2025-01-02T00:00:00Z"}),
                json!({"client_id": 1, "file_name": "c", "created_at": "2025-01-03T00:00:00Z"}),
            ],
        );

        let rows = tables
            .select("ClientFiles", &Query::all().eq("client_id", "1").newest_first())
            .await
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["file_name"].clone()).collect();
        assert_eq!(names, vec![json!("c"), json!("a")]);

        let rows = tables
            .select("ClientFiles", &Query::all().oldest_first().limit(1).columns("file_name"))
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"file_name": "a"})]);
    }

    #[tokio::test]
    async fn test_count_with_range_filter_across_offsets() {
        let tables = MemoryTables::default();
        tables.seed(
            "leads",
            vec![
                json!({"created_at": "2025-01-01T10:00:00Z"}),
                json!({"created_at": "2025-01-02T10:00:00+00:00"}),
            ],
        );
        let total = tables.count("leads", &[]).await.unwrap();
        let recent = tables
            .count("leads", &[Filter::gte("created_at", "2025-01-02T00:00:00-03:00")])
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(recent, 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_logged() {
        let tables = MemoryTables::default();
        tables.fail(Op::Delete, "leads");
        let err = tables.delete("leads", &RecordId::new("1")).await.unwrap_err();
        assert!(matches!(err, DashboardError::Remote { status: 503, .. }));
        assert_eq!(tables.calls_of(Op::Delete), 1);

        tables.heal();
        tables.delete("leads", &RecordId::new("1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_sign_in_checks_password() {
        let auth = MemoryAuth::default();
        auth.add_user("admin@hypeloop.com", "secret");

        assert!(auth
            .sign_in_with_password("admin@hypeloop.com", "wrong")
            .await
            .is_err());
        let session = auth
            .sign_in_with_password("admin@hypeloop.com", "secret")
            .await
            .unwrap();
        assert_eq!(auth.session().await.unwrap(), Some(session));

        auth.sign_out().await.unwrap();
        assert_eq!(auth.session().await.unwrap(), None);
    }
}
