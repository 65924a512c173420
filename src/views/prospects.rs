//! Possible clients: Instagram prospects worked through a four-column
//! pipeline, kept live by a change subscription.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::backend::{Backend, Query};
use crate::board::{is_stagnant, Board, DragMove, MoveOutcome};
use crate::error::DashboardError;
use crate::instagram;
use crate::optimistic::{ListOrder, OptimisticList};
use crate::realtime::{RefreshOnChange, TableWatcher};
use crate::types::{NewPossibleClient, PipelineStatus, PossibleClient, Record, RecordId};

/// Card as drawn on the board.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProspectCard {
    pub prospect: PossibleClient,
    pub display_name: String,
    pub handle: String,
    pub stagnant: bool,
}

/// Check a pasted profile link and pull out its handle.
pub fn validate_profile_url(url: &str) -> Result<(String, String), DashboardError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(DashboardError::validation("Paste an Instagram profile link"));
    }
    if !instagram::is_instagram_url(url) {
        return Err(DashboardError::validation("El link debe ser de Instagram"));
    }
    let handle = instagram::extract_handle(url).ok_or_else(|| {
        DashboardError::validation("No se pudo extraer el nombre de usuario del link")
    })?;
    Ok((url.to_string(), handle))
}

pub struct ProspectsView {
    board: Board<PossibleClient>,
    stagnant_after: Duration,
    live: Option<RefreshOnChange>,
}

impl ProspectsView {
    pub fn new(backend: &Backend, stagnant_after: Duration) -> Self {
        let list = OptimisticList::new(backend.tables.clone(), Query::all(), ListOrder::NewestFirst);
        Self {
            board: Board::new(list),
            stagnant_after,
            live: None,
        }
    }

    pub fn list(&self) -> &OptimisticList<PossibleClient> {
        self.board.list()
    }

    pub async fn refresh(&self) -> Result<(), DashboardError> {
        self.list().refresh().await
    }

    /// Re-fetch on every remote change to the table until the view is
    /// disposed.
    pub fn follow_changes(&mut self, watcher: &TableWatcher) {
        let subscription = watcher.subscribe(PossibleClient::TABLE);
        self.live = Some(RefreshOnChange::start(self.list().clone(), subscription));
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Validated before any remote call; new prospects start uncontacted.
    pub async fn add(&self, url: &str) -> Result<PossibleClient, DashboardError> {
        let (instagram_url, username) = validate_profile_url(url)?;
        self.list()
            .create(NewPossibleClient {
                instagram_url,
                username,
                status: PipelineStatus::Uncontacted,
            })
            .await
    }

    pub async fn set_status(
        &self,
        id: &RecordId,
        status: PipelineStatus,
    ) -> Result<MoveOutcome<PossibleClient>, DashboardError> {
        self.board.move_to(id, status).await
    }

    pub async fn move_card(
        &self,
        drag: DragMove<PipelineStatus>,
    ) -> Result<MoveOutcome<PossibleClient>, DashboardError> {
        self.board.drop_card(drag).await
    }

    pub async fn delete(&self, id: &RecordId) -> Result<PossibleClient, DashboardError> {
        self.list().delete(id).await
    }

    pub fn card(&self, prospect: PossibleClient, now: DateTime<Utc>) -> ProspectCard {
        ProspectCard {
            display_name: instagram::display_name(prospect.username.as_deref(), &prospect.instagram_url),
            handle: instagram::display_handle(prospect.username.as_deref(), &prospect.instagram_url),
            stagnant: is_stagnant(&prospect, now, self.stagnant_after),
            prospect,
        }
    }

    /// Board columns with display names and stagnation flags as of `now`.
    pub fn columns(&self, now: DateTime<Utc>) -> Vec<(PipelineStatus, Vec<ProspectCard>)> {
        self.board
            .columns()
            .into_iter()
            .map(|(status, prospects)| {
                let cards = prospects.into_iter().map(|p| self.card(p, now)).collect();
                (status, cards)
            })
            .collect()
    }

    pub fn dispose(&mut self) {
        self.list().dispose();
        self.live = None;
    }
}
