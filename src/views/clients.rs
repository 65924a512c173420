//! Clients gallery and the client detail modal.
//!
//! The detail modal buffers field edits until `ClientsView::save_detail`
//! and manages the client's attachments: uploads go to object storage under
//! `{client_id}/{uuid}.{ext}` and are then recorded in `ClientFiles`.
//! Deleting an attachment removes the row first and then the stored object.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::storage::file_extension;
use crate::backend::{Backend, ObjectStore, Patch, Query};
use crate::error::DashboardError;
use crate::optimistic::{ListOrder, OptimisticList};
use crate::types::{Attachment, Client, NewAttachment, NewClient, RecordId};

use super::{optional, required};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Creation form as typed by the user.
#[derive(Debug, Clone, Default)]
pub struct ClientForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub website: String,
    pub service_type: String,
    pub amount_charged: String,
    pub notes: String,
}

fn parse_amount(raw: &str) -> Result<f64, DashboardError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite())
        .ok_or_else(|| DashboardError::validation(format!("'{}' is not a valid amount", raw)))
}

impl ClientForm {
    pub fn into_draft(self) -> Result<NewClient, DashboardError> {
        Ok(NewClient {
            name: required(&self.name, "Name")?,
            email: optional(&self.email),
            phone: optional(&self.phone),
            website: optional(&self.website),
            service_type: optional(&self.service_type),
            amount_charged: parse_amount(&self.amount_charged)?,
            notes: self.notes.trim().to_string(),
        })
    }
}

pub struct ClientsView {
    backend: Backend,
    list: OptimisticList<Client>,
    search: parking_lot::Mutex<String>,
}

impl ClientsView {
    pub fn new(backend: &Backend) -> Self {
        Self {
            backend: backend.clone(),
            list: OptimisticList::new(backend.tables.clone(), Query::all(), ListOrder::NewestFirst),
            search: parking_lot::Mutex::new(String::new()),
        }
    }

    pub fn list(&self) -> &OptimisticList<Client> {
        &self.list
    }

    pub async fn refresh(&self) -> Result<(), DashboardError> {
        self.list.refresh().await
    }

    pub async fn create(&self, form: ClientForm) -> Result<Client, DashboardError> {
        let draft = form.into_draft()?;
        self.list.create(draft).await
    }

    pub fn set_search(&self, term: &str) {
        *self.search.lock() = term.trim().to_lowercase();
    }

    /// Clients whose name or email contains the search term.
    pub fn visible(&self) -> Vec<Client> {
        let term = self.search.lock().clone();
        self.list
            .items()
            .into_iter()
            .filter(|c| {
                term.is_empty()
                    || c.name.to_lowercase().contains(&term)
                    || c
                        .email
                        .as_deref()
                        .map(|e| e.to_lowercase().contains(&term))
                        .unwrap_or(false)
            })
            .collect()
    }

    pub async fn open_detail(&self, id: &RecordId) -> Result<ClientDetail, DashboardError> {
        let client = self
            .list
            .get(id)
            .ok_or_else(|| DashboardError::NotFound(id.clone()))?;
        ClientDetail::open(&self.backend, client).await
    }

    /// Write the modal's buffered edits as one update; the gallery entry is
    /// updated optimistically with the rest of the list.
    pub async fn save_detail(&self, detail: &mut ClientDetail) -> Result<Client, DashboardError> {
        let patch = detail.patch()?;
        let saved = self.list.update(&detail.client.id, patch).await?;
        detail.saved(saved.clone());
        Ok(saved)
    }

    pub fn dispose(&self) {
        self.list.dispose();
    }
}

/// Editable columns of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClientField {
    Name,
    Email,
    Phone,
    Website,
    ServiceType,
    AmountCharged,
    Notes,
}

/// A file picked for upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Storage path for an upload: the client's folder, a random name, and the
/// original extension.
pub fn object_path(client_id: &RecordId, file_name: &str) -> String {
    let stem = uuid::Uuid::new_v4();
    match file_extension(file_name) {
        Some(ext) => format!("{}/{}.{}", client_id, stem, ext),
        None => format!("{}/{}", client_id, stem),
    }
}

pub struct ClientDetail {
    client: Client,
    edits: BTreeMap<ClientField, String>,
    attachments: OptimisticList<Attachment>,
    storage: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ClientDetail {
    /// Load the client's attachments, newest first.
    pub async fn open(backend: &Backend, client: Client) -> Result<Self, DashboardError> {
        let attachments = OptimisticList::new(
            backend.tables.clone(),
            Query::all().eq("client_id", client.id.as_str()),
            ListOrder::NewestFirst,
        );
        attachments.refresh().await?;
        Ok(Self {
            client,
            edits: BTreeMap::new(),
            attachments,
            storage: backend.storage.clone(),
            bucket: backend.bucket.clone(),
        })
    }

    /// Client as last saved.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.attachments.items()
    }

    pub fn edit(&mut self, field: ClientField, value: impl Into<String>) {
        self.edits.insert(field, value.into());
    }

    pub fn is_dirty(&self) -> bool {
        !self.edits.is_empty()
    }

    pub fn cancel(&mut self) {
        self.edits.clear();
    }

    fn value(&self, field: ClientField) -> String {
        if let Some(edited) = self.edits.get(&field) {
            return edited.clone();
        }
        let c = &self.client;
        match field {
            ClientField::Name => c.name.clone(),
            ClientField::Email => c.email.clone().unwrap_or_default(),
            ClientField::Phone => c.phone.clone().unwrap_or_default(),
            ClientField::Website => c.website.clone().unwrap_or_default(),
            ClientField::ServiceType => c.service_type.clone().unwrap_or_default(),
            ClientField::AmountCharged => c.amount_charged.to_string(),
            ClientField::Notes => c.notes.clone().unwrap_or_default(),
        }
    }

    /// Every editable column with the buffered edits applied.
    pub fn patch(&self) -> Result<Patch, DashboardError> {
        let text = |field: ClientField| -> serde_json::Value { optional(&self.value(field)).into() };
        let mut patch = Patch::new();
        patch.insert("name".into(), required(&self.value(ClientField::Name), "Name")?.into());
        patch.insert("email".into(), text(ClientField::Email));
        patch.insert("phone".into(), text(ClientField::Phone));
        patch.insert("website".into(), text(ClientField::Website));
        patch.insert("service_type".into(), text(ClientField::ServiceType));
        patch.insert(
            "amount_charged".into(),
            parse_amount(&self.value(ClientField::AmountCharged))?.into(),
        );
        patch.insert("notes".into(), self.value(ClientField::Notes).into());
        Ok(patch)
    }

    fn saved(&mut self, client: Client) {
        self.client = client;
        self.edits.clear();
    }

    /// Upload the file and record it. The stored object is removed again if
    /// the row cannot be written.
    pub async fn upload(&self, file: FileUpload) -> Result<Attachment, DashboardError> {
        let file_name = required(&file.file_name, "File name")?;
        let content_type = file
            .content_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let file_size = file.bytes.len() as u64;
        let path = object_path(&self.client.id, &file_name);

        if let Err(e) = self
            .storage
            .upload(&self.bucket, &path, file.bytes, &content_type)
            .await
        {
            log::warn!("Upload of {} for client {} failed: {}", file_name, self.client.id, e);
            return Err(e);
        }
        let file_url = self.storage.public_url(&self.bucket, &path);

        let draft = NewAttachment {
            client_id: self.client.id.clone(),
            file_name,
            file_url,
            file_type: Some(content_type),
            file_size,
        };
        match self.attachments.create(draft).await {
            Ok(attachment) => Ok(attachment),
            Err(e) => {
                if let Err(cleanup) = self.storage.remove(&self.bucket, &path).await {
                    log::warn!("Failed to remove orphaned object {}: {}", path, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Delete the row, then the stored object. A failed object removal is
    /// logged and does not fail the action.
    pub async fn delete_attachment(&self, id: &RecordId) -> Result<Attachment, DashboardError> {
        let removed = self.attachments.delete(id).await?;
        match self.storage.path_from_public_url(&self.bucket, &removed.file_url) {
            Some(path) => {
                if let Err(e) = self.storage.remove(&self.bucket, &path).await {
                    log::warn!("Attachment row {} deleted but object {} remains: {}", id, path, e);
                }
            }
            None => log::warn!(
                "Attachment {} points outside bucket {}; object left in place",
                id,
                self.bucket
            ),
        }
        Ok(removed)
    }

    pub fn close(self) {
        self.attachments.dispose();
    }
}
