//! Drag-and-drop boards: records grouped by a fixed set of columns.
//!
//! Only column membership is persisted. Order inside a column always comes
//! from the list's remote ordering, so a same-column drag changes nothing.

use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

use crate::error::DashboardError;
use crate::optimistic::OptimisticList;
use crate::types::{InternalTask, PipelineStatus, PossibleClient, Record, RecordId, TaskColumn};

/// A fixed column enumeration stored in one text field of the record.
pub trait BoardColumn: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Column holding the value.
    const FIELD: &'static str;

    fn all() -> &'static [Self];

    /// Column new records start in.
    fn initial() -> Self;

    /// Stored value.
    fn as_str(&self) -> &'static str;

    /// Heading shown above the column.
    fn title(&self) -> &'static str;

    fn parse(value: &str) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.as_str() == value)
    }
}

pub trait BoardRecord: Record {
    type Column: BoardColumn;

    fn column(&self) -> Self::Column;
}

impl BoardColumn for PipelineStatus {
    const FIELD: &'static str = "status";

    fn all() -> &'static [Self] {
        &[
            PipelineStatus::Uncontacted,
            PipelineStatus::Contacted,
            PipelineStatus::Won,
            PipelineStatus::Rejected,
        ]
    }

    fn initial() -> Self {
        PipelineStatus::Uncontacted
    }

    fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Uncontacted => "Sin contactar",
            PipelineStatus::Contacted => "Contactado",
            PipelineStatus::Won => "Concretado",
            PipelineStatus::Rejected => "Rechazado",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            PipelineStatus::Uncontacted => "Nuevo",
            other => other.as_str(),
        }
    }
}

impl BoardColumn for TaskColumn {
    const FIELD: &'static str = "column_id";

    fn all() -> &'static [Self] {
        &[TaskColumn::Todo, TaskColumn::Doing, TaskColumn::Done]
    }

    fn initial() -> Self {
        TaskColumn::Todo
    }

    fn as_str(&self) -> &'static str {
        match self {
            TaskColumn::Todo => "todo",
            TaskColumn::Doing => "doing",
            TaskColumn::Done => "done",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            TaskColumn::Todo => "Por Hacer",
            TaskColumn::Doing => "En Progreso",
            TaskColumn::Done => "Completado",
        }
    }
}

impl BoardRecord for PossibleClient {
    type Column = PipelineStatus;

    fn column(&self) -> PipelineStatus {
        self.status
    }
}

impl BoardRecord for InternalTask {
    type Column = TaskColumn;

    fn column(&self) -> TaskColumn {
        self.column_id
    }
}

/// A card position: column plus index within that column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot<C> {
    pub column: C,
    pub index: usize,
}

/// End of a drag gesture. `destination` is None when the card was dropped
/// outside every column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragMove<C> {
    pub record: RecordId,
    pub source: Slot<C>,
    pub destination: Option<Slot<C>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome<T> {
    /// Nothing to persist; no remote call was made.
    Unchanged,
    Moved(T),
}

/// True when the record has sat in the initial column for longer than
/// `threshold`.
pub fn is_stagnant<T: BoardRecord>(record: &T, now: DateTime<Utc>, threshold: Duration) -> bool {
    record.column() == T::Column::initial() && now - record.created_at() > threshold
}

/// Kanban over an optimistic list.
pub struct Board<T: BoardRecord> {
    list: OptimisticList<T>,
}

impl<T: BoardRecord> Board<T> {
    pub fn new(list: OptimisticList<T>) -> Self {
        Self { list }
    }

    pub fn list(&self) -> &OptimisticList<T> {
        &self.list
    }

    /// Records grouped by column, every column present, list order kept.
    pub fn columns(&self) -> Vec<(T::Column, Vec<T>)> {
        let items = self.list.items();
        T::Column::all()
            .iter()
            .map(|column| {
                let cards = items
                    .iter()
                    .filter(|item| item.column() == *column)
                    .cloned()
                    .collect();
                (*column, cards)
            })
            .collect()
    }

    pub async fn drop_card(
        &self,
        drag: DragMove<T::Column>,
    ) -> Result<MoveOutcome<T>, DashboardError> {
        let Some(destination) = drag.destination else {
            return Ok(MoveOutcome::Unchanged);
        };
        if destination.column == drag.source.column {
            return Ok(MoveOutcome::Unchanged);
        }
        self.move_to(&drag.record, destination.column).await
    }

    /// Reassign the record's column through the optimistic update path.
    pub async fn move_to(
        &self,
        id: &RecordId,
        column: T::Column,
    ) -> Result<MoveOutcome<T>, DashboardError> {
        let current = self
            .list
            .get(id)
            .ok_or_else(|| DashboardError::NotFound(id.clone()))?;
        if current.column() == column {
            return Ok(MoveOutcome::Unchanged);
        }

        let mut patch = crate::backend::Patch::new();
        patch.insert(T::Column::FIELD.to_string(), column.as_str().into());
        let moved = self.list.update(id, patch).await?;
        log::info!(
            "Moved {} {} from {} to {}",
            T::TABLE,
            id,
            current.column().as_str(),
            column.as_str()
        );
        Ok(MoveOutcome::Moved(moved))
    }
}
