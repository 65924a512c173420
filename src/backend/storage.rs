//! Object storage client for client attachments.
//!
//! Objects are written to `{SUPABASE_URL}/storage/v1/object/{bucket}/{path}`
//! and served from the public URL of the same path.

use async_trait::async_trait;

use super::{remote_error, HttpContext};
use crate::error::DashboardError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), DashboardError>;

    async fn remove(&self, bucket: &str, path: &str) -> Result<(), DashboardError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Inverse of `public_url`; None for URLs this store did not hand out.
    fn path_from_public_url(&self, bucket: &str, url: &str) -> Option<String>;
}

pub struct StorageClient {
    http: HttpContext,
}

impl StorageClient {
    pub(crate) fn new(http: HttpContext) -> Self {
        Self { http }
    }

    fn public_prefix(&self, bucket: &str) -> String {
        format!(
            "{}storage/v1/object/public/{}/",
            self.http.base_url.as_str(),
            bucket
        )
    }
}

#[async_trait]
impl ObjectStore for StorageClient {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), DashboardError> {
        let url = self
            .http
            .endpoint(&format!("storage/v1/object/{}/{}", bucket, path))?;
        let request = self
            .http
            .client
            .post(url)
            .header("Content-Type", content_type.to_string())
            .header("x-upsert", "false")
            .body(bytes);
        let resp = self.http.send(request).await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }
        log::info!("Uploaded {}/{}", bucket, path);
        Ok(())
    }

    async fn remove(&self, bucket: &str, path: &str) -> Result<(), DashboardError> {
        let url = self.http.endpoint(&format!("storage/v1/object/{}", bucket))?;
        let request = self
            .http
            .client
            .delete(url)
            .json(&serde_json::json!({ "prefixes": [path] }));
        let resp = self.http.send(request).await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}{}", self.public_prefix(bucket), path)
    }

    fn path_from_public_url(&self, bucket: &str, url: &str) -> Option<String> {
        strip_object_prefix(url, &self.public_prefix(bucket))
    }
}

pub(crate) fn strip_object_prefix(url: &str, prefix: &str) -> Option<String> {
    url.strip_prefix(prefix)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
}

/// Extension of an uploaded file name, if it has one.
pub fn file_extension(file_name: &str) -> Option<&str> {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
}
