//! Table change notifications.
//!
//! Each subscription runs a background poller over one table. Every cycle
//! selects the rows, fingerprints them with sha256 and diffs the fingerprints
//! against the previous cycle. Any difference is reported as insert, update
//! or delete events; consumers treat them as a signal to re-fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{Query, Row, TableStore};
use crate::optimistic::OptimisticList;
use crate::types::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub id: Option<String>,
}

pub struct TableWatcher {
    tables: Arc<dyn TableStore>,
    interval: Duration,
}

impl TableWatcher {
    pub fn new(tables: Arc<dyn TableStore>, interval: Duration) -> Self {
        Self { tables, interval }
    }

    /// Start watching `table` for inserts, updates and deletes.
    pub fn subscribe(&self, table: &str) -> ChangeSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_table_poller(
            self.tables.clone(),
            table.to_string(),
            self.interval,
            tx,
        ));
        log::info!("Subscribed to changes on {}", table);
        ChangeSubscription {
            table: table.to_string(),
            rx,
            task,
        }
    }
}

/// Live subscription; polling stops on `unsubscribe` or drop.
pub struct ChangeSubscription {
    table: String,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    task: JoinHandle<()>,
}

impl ChangeSubscription {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Next change, or None once the subscription has ended.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Drain whatever is already queued without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        // Drop aborts the poller.
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.task.abort();
        log::debug!("Unsubscribed from changes on {}", self.table);
    }
}

/// Re-fetches a list whenever its table changes. Stops when dropped or when
/// the list is disposed.
pub struct RefreshOnChange {
    task: JoinHandle<()>,
}

impl RefreshOnChange {
    pub fn start<T: Record>(list: OptimisticList<T>, mut changes: ChangeSubscription) -> Self {
        let task = tokio::spawn(async move {
            while changes.next().await.is_some() {
                // One re-fetch covers every change already queued.
                while changes.try_next().is_some() {}
                if !list.is_alive() {
                    break;
                }
                if let Err(e) = list.refresh().await {
                    log::warn!("Live refresh of {} failed: {}", changes.table(), e);
                }
            }
        });
        Self { task }
    }

    pub fn stop(self) {}
}

impl Drop for RefreshOnChange {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type Fingerprints = HashMap<String, String>;

fn row_key(row: &Row, position: usize) -> String {
    match row.get("id") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => format!("#{}", position),
        Some(other) => other.to_string(),
    }
}

fn fingerprint(rows: &[Row]) -> Fingerprints {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let digest = Sha256::digest(row.to_string().as_bytes());
            (row_key(row, i), hex::encode(digest))
        })
        .collect()
}

/// Events turning `before` into `after`, ordered inserts, updates, deletes.
fn diff(table: &str, before: &Fingerprints, after: &Fingerprints) -> Vec<ChangeEvent> {
    let event = |kind, id: &String| ChangeEvent {
        table: table.to_string(),
        kind,
        id: Some(id.clone()),
    };

    let mut inserts = Vec::new();
    let mut updates = Vec::new();
    for (id, hash) in after {
        match before.get(id) {
            None => inserts.push(event(ChangeKind::Insert, id)),
            Some(old) if old != hash => updates.push(event(ChangeKind::Update, id)),
            Some(_) => {}
        }
    }
    let mut deletes: Vec<_> = before
        .keys()
        .filter(|id| !after.contains_key(*id))
        .map(|id| event(ChangeKind::Delete, id))
        .collect();

    for group in [&mut inserts, &mut updates, &mut deletes] {
        group.sort_by(|a, b| a.id.cmp(&b.id));
    }
    inserts.into_iter().chain(updates).chain(deletes).collect()
}

async fn run_table_poller(
    tables: Arc<dyn TableStore>,
    table: String,
    interval: Duration,
    tx: mpsc::UnboundedSender<ChangeEvent>,
) {
    let query = Query::all();
    let mut known: Option<Fingerprints> = None;

    loop {
        match tables.select(&table, &query).await {
            Ok(rows) => {
                let current = fingerprint(&rows);
                if let Some(previous) = &known {
                    let events = diff(&table, previous, &current);
                    if !events.is_empty() {
                        log::debug!("{} change(s) on {}", events.len(), table);
                    }
                    for event in events {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
                known = Some(current);
            }
            Err(e) => log::warn!("Change poller for {} failed: {}", table, e),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = tx.closed() => return,
        }
    }
}
