use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Configuration stored in ~/.hypeloop/config.json
///
/// Every field is optional on disk. The endpoint and key can also come from
/// the environment (see `state::resolve_config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_anon_key: Option<String>,
    /// Bucket that holds client attachments.
    #[serde(default = "default_storage_bucket")]
    pub storage_bucket: String,
    #[serde(default = "default_realtime_poll_seconds")]
    pub realtime_poll_seconds: u64,
    #[serde(default = "default_session_check_timeout_secs")]
    pub session_check_timeout_secs: u64,
    /// Hours a prospect may sit uncontacted before it is flagged.
    #[serde(default = "default_stagnant_after_hours")]
    pub stagnant_after_hours: i64,
}

fn default_storage_bucket() -> String {
    "client-assets".to_string()
}

fn default_realtime_poll_seconds() -> u64 {
    5
}

fn default_session_check_timeout_secs() -> u64 {
    10
}

fn default_stagnant_after_hours() -> i64 {
    48
}

impl Default for Config {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_anon_key: None,
            storage_bucket: default_storage_bucket(),
            realtime_poll_seconds: default_realtime_poll_seconds(),
            session_check_timeout_secs: default_session_check_timeout_secs(),
            stagnant_after_hours: default_stagnant_after_hours(),
        }
    }
}

/// Null or unrecognised column values fall back to the type's default, so
/// one odd row does not fail the whole fetch.
fn default_on_unknown<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default())
}

// =============================================================================
// Record identity
// =============================================================================

const PROVISIONAL_PREFIX: &str = "temp-";

/// Opaque row identity. The backend hands out either integers or UUIDs, so
/// both are accepted on read and carried as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    /// Placeholder identity for a record whose insert has not resolved yet.
    pub fn provisional() -> Self {
        RecordId(format!("{}{}", PROVISIONAL_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId(value.to_string())
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(n) => RecordId(n.to_string()),
            Raw::Text(s) => RecordId(s),
        })
    }
}

/// A row of a remote table as seen by the dashboard.
///
/// `Draft` is the insert payload; `provisional` builds the placeholder shown
/// while that insert is in flight.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Draft: Serialize + Send + Sync;

    const TABLE: &'static str;

    fn id(&self) -> &RecordId;
    fn created_at(&self) -> DateTime<Utc>;
    fn provisional(draft: &Self::Draft, id: RecordId, created_at: DateTime<Utc>) -> Self;
}

// =============================================================================
// Leads
// =============================================================================

/// Lead pipeline state. Values written by other tools are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LeadStatus {
    Nuevo,
    Contactado,
    Cerrado,
    Other(String),
}

impl LeadStatus {
    pub const SELECTABLE: [LeadStatus; 3] =
        [LeadStatus::Nuevo, LeadStatus::Contactado, LeadStatus::Cerrado];

    pub fn as_str(&self) -> &str {
        match self {
            LeadStatus::Nuevo => "nuevo",
            LeadStatus::Contactado => "contactado",
            LeadStatus::Cerrado => "cerrado",
            LeadStatus::Other(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, LeadStatus::Other(_))
    }
}

impl Default for LeadStatus {
    fn default() -> Self {
        LeadStatus::Nuevo
    }
}

impl From<String> for LeadStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "nuevo" => LeadStatus::Nuevo,
            "contactado" => LeadStatus::Contactado,
            "cerrado" => LeadStatus::Cerrado,
            _ => LeadStatus::Other(value),
        }
    }
}

impl From<LeadStatus> for String {
    fn from(value: LeadStatus) -> Self {
        value.as_str().to_string()
    }
}

/// Inbound lead captured by the public site form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: RecordId,
    #[serde(rename = "nombre_empresa", default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub whatsapp: Option<String>,
    #[serde(rename = "servicio_interes", default)]
    pub service_interest: Option<String>,
    #[serde(rename = "mensaje", default)]
    pub message: Option<String>,
    #[serde(rename = "estado", default)]
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewLead {
    #[serde(rename = "nombre_empresa")]
    pub company_name: Option<String>,
    pub whatsapp: Option<String>,
    #[serde(rename = "servicio_interes")]
    pub service_interest: Option<String>,
    #[serde(rename = "mensaje")]
    pub message: Option<String>,
    #[serde(rename = "estado")]
    pub status: LeadStatus,
}

impl Record for Lead {
    type Draft = NewLead;
    const TABLE: &'static str = "leads";

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn provisional(draft: &NewLead, id: RecordId, created_at: DateTime<Utc>) -> Self {
        Lead {
            id,
            company_name: draft.company_name.clone(),
            whatsapp: draft.whatsapp.clone(),
            service_interest: draft.service_interest.clone(),
            message: draft.message.clone(),
            status: draft.status.clone(),
            created_at,
        }
    }
}

// =============================================================================
// Clients and attachments
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub amount_charged: f64,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewClient {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub service_type: Option<String>,
    pub amount_charged: f64,
    pub notes: String,
}

impl Record for Client {
    type Draft = NewClient;
    const TABLE: &'static str = "Clients";

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn provisional(draft: &NewClient, id: RecordId, created_at: DateTime<Utc>) -> Self {
        Client {
            id,
            name: draft.name.clone(),
            email: draft.email.clone(),
            phone: draft.phone.clone(),
            website: draft.website.clone(),
            service_type: draft.service_type.clone(),
            amount_charged: draft.amount_charged,
            notes: Some(draft.notes.clone()),
            created_at,
        }
    }
}

/// File stored for a client, referenced by public URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: RecordId,
    pub client_id: RecordId,
    pub file_name: String,
    pub file_url: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAttachment {
    pub client_id: RecordId,
    pub file_name: String,
    pub file_url: String,
    pub file_type: Option<String>,
    pub file_size: u64,
}

impl Record for Attachment {
    type Draft = NewAttachment;
    const TABLE: &'static str = "ClientFiles";

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn provisional(draft: &NewAttachment, id: RecordId, created_at: DateTime<Utc>) -> Self {
        Attachment {
            id,
            client_id: draft.client_id.clone(),
            file_name: draft.file_name.clone(),
            file_url: draft.file_url.clone(),
            file_type: draft.file_type.clone(),
            file_size: draft.file_size,
            created_at,
        }
    }
}

// =============================================================================
// Prospect pipeline
// =============================================================================

/// Column of the prospect kanban.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStatus {
    #[serde(rename = "Sin contactar")]
    Uncontacted,
    #[serde(rename = "Contactado")]
    Contacted,
    #[serde(rename = "Concretado")]
    Won,
    #[serde(rename = "Rechazado")]
    Rejected,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        PipelineStatus::Uncontacted
    }
}

/// Instagram profile being worked as a possible client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PossibleClient {
    pub id: RecordId,
    pub instagram_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "default_on_unknown")]
    pub status: PipelineStatus,
    #[serde(default)]
    pub profile_pic_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPossibleClient {
    pub instagram_url: String,
    pub username: String,
    pub status: PipelineStatus,
}

impl Record for PossibleClient {
    type Draft = NewPossibleClient;
    const TABLE: &'static str = "PosiblesClientes";

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn provisional(draft: &NewPossibleClient, id: RecordId, created_at: DateTime<Utc>) -> Self {
        PossibleClient {
            id,
            instagram_url: draft.instagram_url.clone(),
            username: Some(draft.username.clone()),
            status: draft.status,
            profile_pic_url: None,
            created_at,
        }
    }
}

// =============================================================================
// Internal ops
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskColumn {
    #[default]
    Todo,
    Doing,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalTask {
    pub id: RecordId,
    pub content: String,
    #[serde(default, deserialize_with = "default_on_unknown")]
    pub column_id: TaskColumn,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
    pub content: String,
    pub column_id: TaskColumn,
}

impl Record for InternalTask {
    type Draft = NewTask;
    const TABLE: &'static str = "InternalTasks";

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn provisional(draft: &NewTask, id: RecordId, created_at: DateTime<Utc>) -> Self {
        InternalTask {
            id,
            content: draft.content.clone(),
            column_id: draft.column_id,
            created_at,
        }
    }
}

/// Tab of the shared assets panel; stored in the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    #[default]
    Prompts,
    Passwords,
    Templates,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Prompts => "prompts",
            AssetKind::Passwords => "passwords",
            AssetKind::Templates => "templates",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedAsset {
    pub id: RecordId,
    #[serde(rename = "type", default, deserialize_with = "default_on_unknown")]
    pub kind: AssetKind,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSharedAsset {
    #[serde(rename = "type")]
    pub kind: AssetKind,
    pub title: String,
    pub content: String,
    pub link: Option<String>,
}

impl Record for SharedAsset {
    type Draft = NewSharedAsset;
    const TABLE: &'static str = "SharedAssets";

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn provisional(draft: &NewSharedAsset, id: RecordId, created_at: DateTime<Utc>) -> Self {
        SharedAsset {
            id,
            kind: draft.kind,
            title: draft.title.clone(),
            content: draft.content.clone(),
            link: draft.link.clone(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub link: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewTool {
    pub name: String,
    pub description: Option<String>,
    pub link: String,
}

impl Record for Tool {
    type Draft = NewTool;
    const TABLE: &'static str = "InternalTools";

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn provisional(draft: &NewTool, id: RecordId, created_at: DateTime<Utc>) -> Self {
        Tool {
            id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            link: draft.link.clone(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLogEntry {
    pub id: RecordId,
    pub content: String,
    #[serde(default)]
    pub user_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUpdateLogEntry {
    pub content: String,
    pub user_email: String,
}

impl Record for UpdateLogEntry {
    type Draft = NewUpdateLogEntry;
    const TABLE: &'static str = "UpdateLogs";

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn provisional(draft: &NewUpdateLogEntry, id: RecordId, created_at: DateTime<Utc>) -> Self {
        UpdateLogEntry {
            id,
            content: draft.content.clone(),
            user_email: Some(draft.user_email.clone()),
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_accepts_numbers_and_strings() {
        let numeric: RecordId = serde_json::from_str("42").unwrap();
        assert_eq!(numeric.as_str(), "42");

        let uuid: RecordId =
            serde_json::from_str("\"7c9e6679-7425-40de-944b-e07fc1f90ae7\"").unwrap();
        assert_eq!(uuid.as_str(), "7c9e6679-7425-40de-944b-e07fc1f90ae7");
        assert!(!uuid.is_provisional());
        assert!(RecordId::provisional().is_provisional());
    }

    #[test]
    fn test_lead_decodes_backend_columns() {
        let lead: Lead = serde_json::from_value(serde_json::json!({
            "id": 7,
            "nombre_empresa": "Acme",
            "whatsapp": "5491100000000",
            "servicio_interes": "Branding",
            "mensaje": null,
            "estado": "contactado",
            "created_at": "2025-03-01T12:00:00.123456+00:00"
        }))
        .unwrap();
        assert_eq!(lead.company_name.as_deref(), Some("Acme"));
        assert_eq!(lead.status, LeadStatus::Contactado);
        assert!(lead.message.is_none());
    }

    #[test]
    fn test_unknown_lead_status_is_preserved() {
        let status: LeadStatus = serde_json::from_str("\"archivado\"").unwrap();
        assert_eq!(status, LeadStatus::Other("archivado".to_string()));
        assert!(!status.is_known());
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"archivado\"");
    }

    #[test]
    fn test_pipeline_status_wire_names() {
        assert_eq!(
            serde_json::to_value(PipelineStatus::Uncontacted).unwrap(),
            serde_json::json!("Sin contactar")
        );
        let status: PipelineStatus = serde_json::from_str("\"Concretado\"").unwrap();
        assert_eq!(status, PipelineStatus::Won);
    }

    #[test]
    fn test_null_or_unknown_columns_fall_back_to_default() {
        let prospect: PossibleClient = serde_json::from_value(serde_json::json!({
            "id": 3,
            "instagram_url": "https://instagram.com/acme",
            "status": null,
            "created_at": "2025-03-01T12:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(prospect.status, PipelineStatus::Uncontacted);

        let task: InternalTask = serde_json::from_value(serde_json::json!({
            "id": 4,
            "content": "grabar reel",
            "column_id": "backlog",
            "created_at": "2025-03-01T12:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(task.column_id, TaskColumn::Todo);

        let asset: SharedAsset = serde_json::from_value(serde_json::json!({
            "id": 5,
            "type": null,
            "title": "Copy IG",
            "created_at": "2025-03-01T12:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(asset.kind, AssetKind::Prompts);
    }

    #[test]
    fn test_shared_asset_kind_uses_type_column() {
        let draft = NewSharedAsset {
            kind: AssetKind::Templates,
            title: "Propuesta".into(),
            content: String::new(),
            link: Some("https://docs.example.com/t".into()),
        };
        let value = serde_json::to_value(&draft).unwrap();
        assert_eq!(value["type"], "templates");
    }
}
