//! Internal ops workspace: task board, shared assets, tools and the team
//! update log.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{AuthProvider, Query, TableStore};
use crate::board::{Board, DragMove, MoveOutcome};
use crate::error::DashboardError;
use crate::optimistic::{ListOrder, OptimisticList};
use crate::types::{
    AssetKind, InternalTask, NewSharedAsset, NewTask, NewTool, NewUpdateLogEntry, RecordId,
    SharedAsset, TaskColumn, Tool, UpdateLogEntry,
};

use super::{optional, required};

// ============================================================================
// Task board
// ============================================================================

/// Tasks oldest first; new tasks are appended to "todo".
pub struct TaskBoardView {
    board: Board<InternalTask>,
}

impl TaskBoardView {
    pub fn new(tables: Arc<dyn TableStore>) -> Self {
        let list = OptimisticList::new(tables, Query::all(), ListOrder::OldestFirst);
        Self {
            board: Board::new(list),
        }
    }

    pub fn list(&self) -> &OptimisticList<InternalTask> {
        self.board.list()
    }

    pub async fn refresh(&self) -> Result<(), DashboardError> {
        self.list().refresh().await
    }

    pub async fn add(&self, content: &str) -> Result<InternalTask, DashboardError> {
        let content = required(content, "Task")?;
        self.list()
            .create(NewTask {
                content,
                column_id: TaskColumn::Todo,
            })
            .await
    }

    pub async fn move_card(
        &self,
        drag: DragMove<TaskColumn>,
    ) -> Result<MoveOutcome<InternalTask>, DashboardError> {
        self.board.drop_card(drag).await
    }

    pub async fn move_to(
        &self,
        id: &RecordId,
        column: TaskColumn,
    ) -> Result<MoveOutcome<InternalTask>, DashboardError> {
        self.board.move_to(id, column).await
    }

    pub async fn delete(&self, id: &RecordId) -> Result<InternalTask, DashboardError> {
        self.list().delete(id).await
    }

    pub fn columns(&self) -> Vec<(TaskColumn, Vec<InternalTask>)> {
        self.board.columns()
    }
}

// ============================================================================
// Shared assets
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AssetForm {
    pub title: String,
    pub content: String,
    pub link: String,
}

impl AssetForm {
    /// Templates are links; prompts and passwords carry their text.
    fn into_draft(self, kind: AssetKind) -> Result<NewSharedAsset, DashboardError> {
        let title = required(&self.title, "Title")?;
        let (content, link) = match kind {
            AssetKind::Templates => (
                self.content.trim().to_string(),
                Some(required(&self.link, "Link")?),
            ),
            AssetKind::Prompts | AssetKind::Passwords => {
                (required(&self.content, "Content")?, optional(&self.link))
            }
        };
        Ok(NewSharedAsset {
            kind,
            title,
            content,
            link,
        })
    }
}

fn assets_query(kind: AssetKind) -> Query {
    Query::all().eq("type", kind.as_str())
}

/// One tab of shared assets at a time, newest first.
pub struct SharedAssetsView {
    list: OptimisticList<SharedAsset>,
    tab: Mutex<AssetKind>,
}

impl SharedAssetsView {
    pub fn new(tables: Arc<dyn TableStore>) -> Self {
        let tab = AssetKind::Prompts;
        Self {
            list: OptimisticList::new(tables, assets_query(tab), ListOrder::NewestFirst),
            tab: Mutex::new(tab),
        }
    }

    pub fn list(&self) -> &OptimisticList<SharedAsset> {
        &self.list
    }

    pub fn tab(&self) -> AssetKind {
        *self.tab.lock()
    }

    pub async fn refresh(&self) -> Result<(), DashboardError> {
        self.list.refresh().await
    }

    /// Switch tabs and fetch that tab's assets.
    pub async fn select_tab(&self, kind: AssetKind) -> Result<(), DashboardError> {
        *self.tab.lock() = kind;
        self.list.set_query(assets_query(kind));
        self.list.refresh().await
    }

    pub async fn add(&self, form: AssetForm) -> Result<SharedAsset, DashboardError> {
        let draft = form.into_draft(self.tab())?;
        self.list.create(draft).await
    }

    pub async fn delete(&self, id: &RecordId) -> Result<SharedAsset, DashboardError> {
        self.list.delete(id).await
    }
}

// ============================================================================
// Tools
// ============================================================================

pub struct ToolsView {
    list: OptimisticList<Tool>,
}

impl ToolsView {
    pub fn new(tables: Arc<dyn TableStore>) -> Self {
        Self {
            list: OptimisticList::new(tables, Query::all(), ListOrder::NewestFirst),
        }
    }

    pub fn list(&self) -> &OptimisticList<Tool> {
        &self.list
    }

    pub async fn refresh(&self) -> Result<(), DashboardError> {
        self.list.refresh().await
    }

    pub async fn add(&self, name: &str, description: &str, link: &str) -> Result<Tool, DashboardError> {
        let draft = NewTool {
            name: required(name, "Name")?,
            description: optional(description),
            link: required(link, "Link")?,
        };
        self.list.create(draft).await
    }

    pub async fn delete(&self, id: &RecordId) -> Result<Tool, DashboardError> {
        self.list.delete(id).await
    }
}

// ============================================================================
// Update log
// ============================================================================

const ANONYMOUS: &str = "Anónimo";

/// Short author name: the local part of the email.
pub fn author_name(email: Option<&str>) -> String {
    match email.filter(|e| !e.is_empty()) {
        Some(email) => email.split('@').next().unwrap_or(email).to_string(),
        None => "Usuario".to_string(),
    }
}

pub struct UpdateLogView {
    list: OptimisticList<UpdateLogEntry>,
    auth: Arc<dyn AuthProvider>,
}

impl UpdateLogView {
    pub fn new(tables: Arc<dyn TableStore>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            list: OptimisticList::new(tables, Query::all(), ListOrder::NewestFirst),
            auth,
        }
    }

    pub fn list(&self) -> &OptimisticList<UpdateLogEntry> {
        &self.list
    }

    pub async fn refresh(&self) -> Result<(), DashboardError> {
        self.list.refresh().await
    }

    /// Post an entry signed with the current user's email.
    pub async fn add(&self, content: &str) -> Result<UpdateLogEntry, DashboardError> {
        if content.trim().is_empty() {
            return Err(DashboardError::validation("Write what you worked on"));
        }
        let user_email = match self.auth.user().await {
            Ok(user) => user.and_then(|u| u.email),
            Err(e) => {
                log::warn!("Could not resolve the signed-in user: {}", e);
                None
            }
        }
        .unwrap_or_else(|| ANONYMOUS.to_string());

        self.list
            .create(NewUpdateLogEntry {
                content: content.to_string(),
                user_email,
            })
            .await
    }
}
