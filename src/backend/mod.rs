//! Hosted backend access (Supabase: PostgREST tables, GoTrue auth, Storage).
//!
//! Each concern is a dyn-compatible trait so views can run against the HTTP
//! clients in production and against `memory::MemoryBackend` in tests.
//!
//! Modules:
//! - auth: GoTrue session client and session types
//! - memory: in-process backend with failure injection
//! - postgrest: table client
//! - session_store: on-disk persistence of the signed-in session
//! - storage: object storage client

pub mod auth;
#[cfg(test)]
pub mod memory;
pub mod postgrest;
pub mod session_store;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::error::DashboardError;
use crate::state::BackendConfig;
use crate::types::RecordId;

pub use auth::{AuthProvider, AuthUser, Session, SignUpOutcome};
pub use storage::ObjectStore;

/// A row as returned by the table API.
pub type Row = Value;

/// Column/value pairs written by an update.
pub type Patch = serde_json::Map<String, Value>;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
}

impl FilterOp {
    fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &str, value: impl ToString) -> Self {
        Filter {
            column: column.to_string(),
            op: FilterOp::Eq,
            value: value.to_string(),
        }
    }

    pub fn gte(column: &str, value: impl ToString) -> Self {
        Filter {
            column: column.to_string(),
            op: FilterOp::Gte,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Select parameters: projection, filters, a single ordering and a limit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
    pub columns: Option<String>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn columns(mut self, columns: &str) -> Self {
        self.columns = Some(columns.to_string());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl ToString) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn gte(self, column: &str, value: impl ToString) -> Self {
        self.filter(Filter::gte(column, value))
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn newest_first(self) -> Self {
        self.order_by("created_at", false)
    }

    pub fn oldest_first(self) -> Self {
        self.order_by("created_at", true)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render as PostgREST query parameters.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![(
            "select".to_string(),
            self.columns.clone().unwrap_or_else(|| "*".to_string()),
        )];
        params.extend(filter_params(&self.filters));
        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

pub(crate) fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| (f.column.clone(), format!("{}.{}", f.op.as_str(), f.value)))
        .collect()
}

// ============================================================================
// Traits
// ============================================================================

/// Remote relational tables.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, DashboardError>;

    /// Insert one row and return the stored version (generated id and timestamp).
    async fn insert(&self, table: &str, row: Row) -> Result<Row, DashboardError>;

    async fn update(&self, table: &str, id: &RecordId, patch: Patch) -> Result<(), DashboardError>;

    async fn delete(&self, table: &str, id: &RecordId) -> Result<(), DashboardError>;

    /// Exact row count for the filters, without transferring rows.
    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, DashboardError>;
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, DashboardError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(DashboardError::from))
        .collect()
}

// ============================================================================
// Bundle
// ============================================================================

/// Everything a view needs to talk to the hosted project.
#[derive(Clone)]
pub struct Backend {
    pub tables: Arc<dyn TableStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub bucket: String,
}

impl Backend {
    /// Build the HTTP clients for a configured project.
    pub fn connect(
        config: &BackendConfig,
        bucket: &str,
        sessions: Option<session_store::SessionStore>,
    ) -> Result<Self, DashboardError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| DashboardError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let auth: Arc<dyn AuthProvider> =
            Arc::new(auth::GoTrueClient::new(client.clone(), config, sessions));
        let context = HttpContext {
            client,
            base_url: config.url.clone(),
            anon_key: config.anon_key.clone(),
            auth: auth.clone(),
        };

        Ok(Self {
            tables: Arc::new(postgrest::PostgrestClient::new(context.clone())),
            storage: Arc::new(storage::StorageClient::new(context)),
            auth,
            bucket: bucket.to_string(),
        })
    }
}

/// Shared HTTP plumbing for the table and storage clients.
#[derive(Clone)]
pub(crate) struct HttpContext {
    pub client: reqwest::Client,
    pub base_url: Url,
    pub anon_key: String,
    pub auth: Arc<dyn AuthProvider>,
}

impl HttpContext {
    pub fn endpoint(&self, path: &str) -> Result<Url, DashboardError> {
        self.base_url
            .join(path)
            .map_err(|e| DashboardError::NotConfigured(format!("Bad endpoint {}: {}", path, e)))
    }

    /// Bearer token: the signed-in user's access token, else the anon key.
    /// Goes through `session()` so an expired token is refreshed first.
    async fn bearer(&self) -> String {
        match self.auth.session().await {
            Ok(Some(session)) => session.access_token,
            Ok(None) => self.anon_key.clone(),
            Err(e) => {
                log::warn!("Session check failed, using last known token: {}", e);
                let last = self.auth.subscribe().borrow().clone();
                last.map(|s| s.access_token).unwrap_or_else(|| self.anon_key.clone())
            }
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        builder
            .header("apikey", self.anon_key.clone())
            .header("Authorization", format!("Bearer {}", token))
    }

    /// Send with auth headers. A 401 on a user token triggers one refresh and
    /// a single retry with the new token.
    pub async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, DashboardError> {
        let retry = builder.try_clone();
        let token = self.bearer().await;
        let resp = self.authorized(builder, &token).send().await?;

        if resp.status() != reqwest::StatusCode::UNAUTHORIZED || token == self.anon_key {
            return Ok(resp);
        }
        let Some(retry) = retry else {
            return Ok(resp);
        };

        match self.auth.refresh_rejected(&token).await {
            Ok(Some(fresh)) if fresh.access_token != token => {
                log::debug!("Retrying request after token refresh");
                Ok(self.authorized(retry, &fresh.access_token).send().await?)
            }
            Ok(_) => Ok(resp),
            Err(e) => {
                log::warn!("Token refresh after 401 failed: {}", e);
                Ok(resp)
            }
        }
    }
}

/// Turn a non-success response into a `Remote` error, pulling the message out
/// of the JSON body when the service sent one.
pub(crate) async fn remote_error(resp: reqwest::Response) -> DashboardError {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    DashboardError::Remote {
        status,
        message: error_message(&text),
    }
}

fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|json| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|key| json.get(*key).and_then(|v| v.as_str()))
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}
