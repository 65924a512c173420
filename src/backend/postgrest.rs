//! REST client for the project's tables.
//!
//! Uses reqwest with the anon key plus the session bearer token. All requests
//! target `{SUPABASE_URL}/rest/v1/{table}`.

use async_trait::async_trait;
use serde_json::Value;

use super::{filter_params, remote_error, Filter, HttpContext, Patch, Query, Row, TableStore};
use crate::error::DashboardError;
use crate::types::RecordId;

pub struct PostgrestClient {
    http: HttpContext,
}

impl PostgrestClient {
    pub(crate) fn new(http: HttpContext) -> Self {
        Self { http }
    }

    fn table_url(&self, table: &str) -> Result<url::Url, DashboardError> {
        self.http.endpoint(&format!("rest/v1/{}", table))
    }
}

#[async_trait]
impl TableStore for PostgrestClient {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, DashboardError> {
        let request = self
            .http
            .client
            .get(self.table_url(table)?)
            .query(&query.to_params());
        let resp = self.http.send(request).await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }

        let rows: Vec<Row> = resp.json().await?;
        log::debug!("select {}: {} rows", table, rows.len());
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, DashboardError> {
        let request = self
            .http
            .client
            .post(self.table_url(table)?)
            .header("Prefer", "return=representation")
            .json(&Value::Array(vec![row]));
        let resp = self.http.send(request).await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }

        let rows: Vec<Row> = resp.json().await?;
        rows.into_iter().next().ok_or_else(|| {
            DashboardError::Decode(format!("Insert into {} returned no rows", table))
        })
    }

    async fn update(&self, table: &str, id: &RecordId, patch: Patch) -> Result<(), DashboardError> {
        let request = self
            .http
            .client
            .patch(self.table_url(table)?)
            .query(&filter_params(&[Filter::eq("id", id)]))
            .header("Prefer", "return=minimal")
            .json(&Value::Object(patch));
        let resp = self.http.send(request).await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }
        Ok(())
    }

    async fn delete(&self, table: &str, id: &RecordId) -> Result<(), DashboardError> {
        let request = self
            .http
            .client
            .delete(self.table_url(table)?)
            .query(&filter_params(&[Filter::eq("id", id)]));
        let resp = self.http.send(request).await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }
        Ok(())
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, DashboardError> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(filter_params(filters));

        let request = self
            .http
            .client
            .head(self.table_url(table)?)
            .query(&params)
            .header("Prefer", "count=exact");
        let resp = self.http.send(request).await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }

        let range = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        parse_content_range_total(range).ok_or_else(|| {
            DashboardError::Decode(format!("Missing count in Content-Range '{}'", range))
        })
    }
}

/// Total from a PostgREST `Content-Range` header (`0-24/3573` or `*/0`).
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}
