//! Optimistic list controller shared by every record list view.
//!
//! A list owns a local copy of one remote table. Mutations are applied to the
//! local copy first and the remote write is issued afterwards; when the write
//! fails the local copy is put back exactly as it was before the action and a
//! `Notice` is kept for the renderer. Nothing is retried.
//!
//! Rules enforced here:
//! - Creations show a provisional record (`temp-` id) until the insert
//!   resolves, prepended for `NewestFirst` lists and appended for
//!   `OldestFirst` lists.
//! - Updates and deletes roll back to a snapshot taken before the change.
//! - A record with a change in flight rejects further changes with `Busy`.
//! - After `dispose()` late responses are dropped and the call returns
//!   `Disposed`.
//!
//! The state mutex is never held across an await.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::backend::{decode_rows, Patch, Query, TableStore};
use crate::error::{DashboardError, Notice};
use crate::types::{Record, RecordId};

/// Where new records land and how the remote fetch is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    /// Descending creation time; creations are prepended.
    NewestFirst,
    /// Ascending creation time; creations are appended.
    OldestFirst,
}

impl ListOrder {
    pub fn apply(&self, query: Query) -> Query {
        match self {
            ListOrder::NewestFirst => query.newest_first(),
            ListOrder::OldestFirst => query.oldest_first(),
        }
    }
}

struct ListState<T> {
    items: Vec<T>,
    loading: bool,
    in_flight: HashSet<RecordId>,
    notice: Option<Notice>,
}

struct Inner<T> {
    tables: Arc<dyn TableStore>,
    query: Mutex<Query>,
    order: ListOrder,
    state: Mutex<ListState<T>>,
    alive: AtomicBool,
}

/// Local, optimistically mutated copy of one remote table.
///
/// Cheap to clone; clones share the same state.
pub struct OptimisticList<T: Record> {
    inner: Arc<Inner<T>>,
}

impl<T: Record> Clone for OptimisticList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn position<T: Record>(items: &[T], id: &RecordId) -> Option<usize> {
    items.iter().position(|item| item.id() == id)
}

/// Merge a column patch into a record through its wire representation.
fn merge<T: Record>(record: &T, patch: &Patch) -> Result<T, DashboardError> {
    let mut value = serde_json::to_value(record)?;
    if let Some(obj) = value.as_object_mut() {
        for (key, v) in patch {
            obj.insert(key.clone(), v.clone());
        }
    }
    Ok(serde_json::from_value(value)?)
}

impl<T: Record> OptimisticList<T> {
    /// `query` carries filters only; ordering comes from `order`.
    pub fn new(tables: Arc<dyn TableStore>, query: Query, order: ListOrder) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables,
                query: Mutex::new(order.apply(query)),
                order,
                state: Mutex::new(ListState {
                    items: Vec::new(),
                    loading: false,
                    in_flight: HashSet::new(),
                    notice: None,
                }),
                alive: AtomicBool::new(true),
            }),
        }
    }

    pub fn order(&self) -> ListOrder {
        self.inner.order
    }

    /// Replace the fetch filters (e.g. switching a tab). Takes effect on the
    /// next `refresh`.
    pub fn set_query(&self, query: Query) {
        *self.inner.query.lock() = self.inner.order.apply(query);
    }

    pub fn items(&self) -> Vec<T> {
        self.inner.state.lock().items.clone()
    }

    pub fn get(&self, id: &RecordId) -> Option<T> {
        let state = self.inner.state.lock();
        position(&state.items, id).map(|pos| state.items[pos].clone())
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().loading
    }

    pub fn is_busy(&self, id: &RecordId) -> bool {
        id.is_provisional() || self.inner.state.lock().in_flight.contains(id)
    }

    /// Take the message left by the last failed action, if any.
    pub fn take_notice(&self) -> Option<Notice> {
        self.inner.state.lock().notice.take()
    }

    pub fn dispose(&self) {
        if self.inner.alive.swap(false, Ordering::SeqCst) {
            log::debug!("Disposed {} list", T::TABLE);
        }
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    fn ensure_alive(&self) -> Result<(), DashboardError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(DashboardError::Disposed)
        }
    }

    fn fail(&self, state: &mut ListState<T>, action: &str, err: DashboardError) -> DashboardError {
        log::warn!("Failed to {} {} row: {}", action, T::TABLE, err);
        state.notice = Some(Notice::from(&err));
        err
    }

    /// Fetch the whole collection and replace the local copy.
    pub async fn refresh(&self) -> Result<(), DashboardError> {
        self.ensure_alive()?;
        let query = self.inner.query.lock().clone();
        self.inner.state.lock().loading = true;

        let result = self
            .inner
            .tables
            .select(T::TABLE, &query)
            .await
            .and_then(decode_rows::<T>);

        self.ensure_alive()?;
        let mut state = self.inner.state.lock();
        state.loading = false;
        match result {
            Ok(items) => {
                log::debug!("Fetched {} {} rows", items.len(), T::TABLE);
                state.items = items;
                Ok(())
            }
            Err(e) => Err(self.fail(&mut state, "fetch", e)),
        }
    }

    /// Show a provisional record, insert it remotely, then swap in the
    /// stored row.
    pub async fn create(&self, draft: T::Draft) -> Result<T, DashboardError> {
        self.ensure_alive()?;
        let row = serde_json::to_value(&draft)?;
        let placeholder_id = RecordId::provisional();
        {
            let placeholder = T::provisional(&draft, placeholder_id.clone(), Utc::now());
            let mut state = self.inner.state.lock();
            self.place(&mut state.items, placeholder);
            state.in_flight.insert(placeholder_id.clone());
        }

        let result = match self.inner.tables.insert(T::TABLE, row).await {
            Ok(stored) => serde_json::from_value::<T>(stored).map_err(DashboardError::from),
            Err(e) => Err(e),
        };

        self.ensure_alive()?;
        let mut state = self.inner.state.lock();
        state.in_flight.remove(&placeholder_id);
        match result {
            Ok(record) => {
                match position(&state.items, &placeholder_id) {
                    Some(pos) => state.items[pos] = record.clone(),
                    // A refresh replaced the list while the insert was out.
                    None if position(&state.items, record.id()).is_none() => {
                        self.place(&mut state.items, record.clone())
                    }
                    None => {}
                }
                log::info!("Created {} row {}", T::TABLE, record.id());
                Ok(record)
            }
            Err(e) => {
                state.items.retain(|item| item.id() != &placeholder_id);
                Err(self.fail(&mut state, "create", e))
            }
        }
    }

    /// Apply `patch` locally, then write it remotely. Returns the updated
    /// record.
    pub async fn update(&self, id: &RecordId, patch: Patch) -> Result<T, DashboardError> {
        self.ensure_alive()?;
        let (snapshot, updated) = {
            let mut state = self.inner.state.lock();
            if id.is_provisional() || state.in_flight.contains(id) {
                return Err(DashboardError::Busy(id.clone()));
            }
            let pos = position(&state.items, id).ok_or_else(|| DashboardError::NotFound(id.clone()))?;
            let snapshot = state.items[pos].clone();
            let updated = merge(&snapshot, &patch)?;
            state.items[pos] = updated.clone();
            state.in_flight.insert(id.clone());
            (snapshot, updated)
        };

        let result = self.inner.tables.update(T::TABLE, id, patch).await;

        self.ensure_alive()?;
        let mut state = self.inner.state.lock();
        state.in_flight.remove(id);
        match result {
            Ok(()) => Ok(updated),
            Err(e) => {
                if let Some(pos) = position(&state.items, id) {
                    state.items[pos] = snapshot;
                }
                Err(self.fail(&mut state, "update", e))
            }
        }
    }

    /// Remove locally, then delete remotely. On failure the record goes back
    /// to its original index.
    pub async fn delete(&self, id: &RecordId) -> Result<T, DashboardError> {
        self.ensure_alive()?;
        let (index, removed) = {
            let mut state = self.inner.state.lock();
            if id.is_provisional() || state.in_flight.contains(id) {
                return Err(DashboardError::Busy(id.clone()));
            }
            let pos = position(&state.items, id).ok_or_else(|| DashboardError::NotFound(id.clone()))?;
            let removed = state.items.remove(pos);
            state.in_flight.insert(id.clone());
            (pos, removed)
        };

        let result = self.inner.tables.delete(T::TABLE, id).await;

        self.ensure_alive()?;
        let mut state = self.inner.state.lock();
        state.in_flight.remove(id);
        match result {
            Ok(()) => {
                log::info!("Deleted {} row {}", T::TABLE, id);
                Ok(removed)
            }
            Err(e) => {
                if position(&state.items, id).is_none() {
                    let at = index.min(state.items.len());
                    state.items.insert(at, removed);
                }
                Err(self.fail(&mut state, "delete", e))
            }
        }
    }

    fn place(&self, items: &mut Vec<T>, record: T) {
        match self.inner.order {
            ListOrder::NewestFirst => items.insert(0, record),
            ListOrder::OldestFirst => items.push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, Op};
    use crate::types::{InternalTask, Lead, LeadStatus, NewLead, NewTask, TaskColumn};
    use serde_json::json;

    fn seeded() -> MemoryBackend {
        let memory = MemoryBackend::new();
        memory.tables.seed(
            "leads",
            vec![
                json!({"nombre_empresa": "Acme", "estado": "nuevo", "created_at": "2025-01-01T00:00:00Z"}),
                json!({"nombre_empresa": "Globex", "estado": "contactado", "created_at": "2025-01-02T00:00:00Z"}),
                json!({"nombre_empresa": "Initech", "estado": "cerrado", "created_at": "2025-01-03T00:00:00Z"}),
            ],
        );
        memory
    }

    async fn leads(memory: &MemoryBackend) -> OptimisticList<Lead> {
        let list = OptimisticList::new(memory.tables.clone(), Query::all(), ListOrder::NewestFirst);
        list.refresh().await.unwrap();
        list
    }

    fn new_lead(name: &str) -> NewLead {
        NewLead {
            company_name: Some(name.to_string()),
            whatsapp: None,
            service_interest: None,
            message: None,
            status: LeadStatus::Nuevo,
        }
    }

    fn status_patch(status: &str) -> Patch {
        let mut patch = Patch::new();
        patch.insert("estado".to_string(), json!(status));
        patch
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_refresh_orders_newest_first() {
        let memory = seeded();
        let list = leads(&memory).await;
        let names: Vec<_> = list
            .items()
            .into_iter()
            .map(|l| l.company_name.unwrap())
            .collect();
        assert_eq!(names, vec!["Initech", "Globex", "Acme"]);
        assert!(!list.is_loading());
    }

    #[tokio::test]
    async fn test_create_prepends_canonical_record() {
        let memory = seeded();
        let list = leads(&memory).await;

        let created = list.create(new_lead("Umbrella")).await.unwrap();
        assert!(!created.id.is_provisional());
        assert_eq!(list.items()[0], created);
        assert_eq!(list.len(), 4);
    }

    #[tokio::test]
    async fn test_create_appends_for_oldest_first() {
        let memory = MemoryBackend::new();
        memory.tables.seed(
            "InternalTasks",
            vec![json!({"content": "first", "column_id": "todo"})],
        );
        let list: OptimisticList<InternalTask> =
            OptimisticList::new(memory.tables.clone(), Query::all(), ListOrder::OldestFirst);
        list.refresh().await.unwrap();

        list.create(NewTask {
            content: "second".into(),
            column_id: TaskColumn::Todo,
        })
        .await
        .unwrap();
        let contents: Vec<_> = list.items().into_iter().map(|t| t.content).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_list_unchanged() {
        let memory = seeded();
        let list = leads(&memory).await;
        let before = list.items();

        memory.tables.fail(Op::Insert, "leads");
        let err = list.create(new_lead("Umbrella")).await.unwrap_err();
        assert!(matches!(err, DashboardError::Remote { .. }));
        assert_eq!(list.items(), before);
        assert!(list.take_notice().is_some());
        assert!(list.take_notice().is_none());
    }

    #[tokio::test]
    async fn test_provisional_record_visible_while_insert_in_flight() {
        let memory = seeded();
        let list = leads(&memory).await;
        let gate = memory.tables.hold(Op::Insert, "leads");

        let task = {
            let list = list.clone();
            tokio::spawn(async move { list.create(new_lead("Umbrella")).await })
        };
        wait_for(|| list.len() == 4).await;

        let first = &list.items()[0];
        assert!(first.id.is_provisional());
        assert_eq!(first.company_name.as_deref(), Some("Umbrella"));
        assert!(list.is_busy(&first.id));

        gate.notify_one();
        let created = task.await.unwrap().unwrap();
        assert_eq!(list.items()[0].id, created.id);
        assert!(list.items().iter().all(|l| !l.id.is_provisional()));
    }

    #[tokio::test]
    async fn test_failed_delete_restores_original_index() {
        let memory = seeded();
        let list = leads(&memory).await;
        let before = list.items();
        let middle = before[1].id.clone();

        memory.tables.fail(Op::Delete, "leads");
        assert!(list.delete(&middle).await.is_err());
        assert_eq!(list.items(), before);
        assert_eq!(memory.tables.rows("leads").len(), 3);
    }

    #[tokio::test]
    async fn test_delete_removes_locally_and_remotely() {
        let memory = seeded();
        let list = leads(&memory).await;
        let first = list.items()[0].id.clone();

        list.delete(&first).await.unwrap();
        assert!(list.get(&first).is_none());
        assert_eq!(memory.tables.rows("leads").len(), 2);
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let memory = seeded();
        let list = leads(&memory).await;
        let id = list.items()[0].id.clone();

        let updated = list.update(&id, status_patch("contactado")).await.unwrap();
        assert_eq!(updated.status, LeadStatus::Contactado);
        assert_eq!(list.get(&id).unwrap().status, LeadStatus::Contactado);
    }

    #[tokio::test]
    async fn test_failed_update_restores_previous_record() {
        let memory = seeded();
        let list = leads(&memory).await;
        let before = list.items();
        let id = before[2].id.clone();

        memory.tables.fail(Op::Update, "leads");
        assert!(list.update(&id, status_patch("cerrado")).await.is_err());
        assert_eq!(list.items(), before);
    }

    #[tokio::test]
    async fn test_busy_record_rejects_second_mutation() {
        let memory = seeded();
        let list = leads(&memory).await;
        let id = list.items()[0].id.clone();
        let gate = memory.tables.hold(Op::Update, "leads");

        let task = {
            let list = list.clone();
            let id = id.clone();
            tokio::spawn(async move { list.update(&id, status_patch("cerrado")).await })
        };
        wait_for(|| list.is_busy(&id)).await;

        let err = list.delete(&id).await.unwrap_err();
        assert!(matches!(err, DashboardError::Busy(_)));
        assert_eq!(memory.tables.calls_of(Op::Delete), 0);

        gate.notify_one();
        task.await.unwrap().unwrap();
        assert!(!list.is_busy(&id));
    }

    #[tokio::test]
    async fn test_disposed_list_discards_late_response() {
        let memory = seeded();
        let list = leads(&memory).await;
        let id = list.items()[0].id.clone();
        let gate = memory.tables.hold(Op::Delete, "leads");
        memory.tables.fail(Op::Delete, "leads");

        let task = {
            let list = list.clone();
            let id = id.clone();
            tokio::spawn(async move { list.delete(&id).await })
        };
        wait_for(|| list.len() == 2).await;

        list.dispose();
        gate.notify_one();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, DashboardError::Disposed));
        // No rollback was applied to the closed view.
        assert_eq!(list.len(), 2);
        assert!(matches!(list.refresh().await, Err(DashboardError::Disposed)));
    }

    #[tokio::test]
    async fn test_unknown_record_is_not_found() {
        let memory = seeded();
        let list = leads(&memory).await;
        let err = list
            .update(&RecordId::new("999"), status_patch("nuevo"))
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::NotFound(_)));
        assert_eq!(memory.tables.calls_of(Op::Update), 0);
    }
}
