//! GoTrue auth client: password sign-in, sign-up, session refresh, sign-out.
//!
//! The current session lives in a `watch` channel so the session gate can
//! follow sign-in/sign-out without polling. The table and storage clients ask
//! `session()` for their bearer token, which refreshes an expired one first.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use url::Url;

use super::remote_error;
use super::session_store::SessionStore;
use crate::error::DashboardError;
use crate::state::BackendConfig;

/// Refresh a little before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Signed-in session as issued by the token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl Session {
    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at
            .map(|at| at - EXPIRY_MARGIN_SECS <= now_unix)
            .unwrap_or(false)
    }
}

/// Sign-up either signs the user in directly or waits on email confirmation.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    ConfirmationPending(AuthUser),
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, DashboardError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, DashboardError>;

    /// Current session, refreshed first if it has expired.
    async fn session(&self) -> Result<Option<Session>, DashboardError>;

    async fn user(&self) -> Result<Option<AuthUser>, DashboardError>;

    /// Refresh after the backend rejected `rejected_token`. Returns the
    /// current session unchanged when someone else already refreshed it.
    async fn refresh_rejected(&self, rejected_token: &str) -> Result<Option<Session>, DashboardError>;

    async fn sign_out(&self) -> Result<(), DashboardError>;

    /// Session-change stream; the current value is the active session.
    fn subscribe(&self) -> watch::Receiver<Option<Session>>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for Session {
    fn from(resp: TokenResponse) -> Self {
        let expires_at = resp
            .expires_at
            .or_else(|| resp.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Session {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            expires_at,
            user: resp.user,
        }
    }
}

pub struct GoTrueClient {
    client: reqwest::Client,
    base_url: Url,
    anon_key: String,
    current: watch::Sender<Option<Session>>,
    store: Option<SessionStore>,
    refreshing: tokio::sync::Mutex<()>,
}

impl GoTrueClient {
    pub fn new(client: reqwest::Client, config: &BackendConfig, store: Option<SessionStore>) -> Self {
        let restored = store.as_ref().and_then(|s| match s.load() {
            Ok(session) => session,
            Err(e) => {
                log::warn!("Ignoring stored session: {}", e);
                None
            }
        });
        let (current, _) = watch::channel(restored);
        Self {
            client,
            base_url: config.url.clone(),
            anon_key: config.anon_key.clone(),
            current,
            store,
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, DashboardError> {
        self.base_url
            .join(path)
            .map_err(|e| DashboardError::NotConfigured(format!("Bad endpoint {}: {}", path, e)))
    }

    async fn token_request(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, DashboardError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let resp = self
            .client
            .post(url)
            .header("apikey", self.anon_key.clone())
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }

        let token: TokenResponse = resp.json().await?;
        Ok(token.into())
    }

    fn set_session(&self, session: Option<Session>) {
        if let Some(store) = &self.store {
            let result = match &session {
                Some(s) => store.save(s),
                None => store.delete(),
            };
            if let Err(e) = result {
                log::warn!("Failed to persist session: {}", e);
            }
        }
        self.current.send_replace(session);
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, DashboardError> {
        self.token_request(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    /// Exchange the refresh token of the session that carried `stale_token`.
    /// Refreshes are serialised; a caller that waited behind another refresh
    /// gets the already-renewed session.
    async fn renew(&self, stale_token: &str) -> Result<Option<Session>, DashboardError> {
        let _guard = self.refreshing.lock().await;

        let current = self.current.borrow().clone();
        let Some(session) = current else {
            return Ok(None);
        };
        if session.access_token != stale_token {
            return Ok(Some(session));
        }
        let Some(refresh_token) = session.refresh_token.clone() else {
            self.set_session(None);
            return Ok(None);
        };

        match self.refresh(&refresh_token).await {
            Ok(fresh) => {
                log::debug!("Refreshed session for {}", fresh.user.id);
                self.set_session(Some(fresh.clone()));
                Ok(Some(fresh))
            }
            Err(e) if is_rejected_refresh(&e) => {
                log::warn!("Session refresh rejected: {}", e);
                self.set_session(None);
                Ok(None)
            }
            // Network trouble or a server-side failure: keep the stored session.
            Err(e) => {
                log::warn!("Session refresh failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Only an explicit rejection of the refresh token ends the session.
fn is_rejected_refresh(err: &DashboardError) -> bool {
    matches!(err, DashboardError::Remote { status: 400 | 401, .. })
}

#[async_trait]
impl AuthProvider for GoTrueClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, DashboardError> {
        let session = self
            .token_request(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        log::info!("Signed in as {}", email);
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, DashboardError> {
        let resp = self
            .client
            .post(self.endpoint("auth/v1/signup")?)
            .header("apikey", self.anon_key.clone())
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }

        let body: serde_json::Value = resp.json().await?;
        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)?;
            let session = Session::from(token);
            self.set_session(Some(session.clone()));
            return Ok(SignUpOutcome::SignedIn(session));
        }

        // Confirmation flow: the body is the user itself (or wraps it).
        let user_value = body.get("user").cloned().unwrap_or(body);
        let user: AuthUser = serde_json::from_value(user_value)?;
        log::info!("Sign-up pending email confirmation for {}", email);
        Ok(SignUpOutcome::ConfirmationPending(user))
    }

    async fn session(&self) -> Result<Option<Session>, DashboardError> {
        let current = self.current.borrow().clone();
        let Some(session) = current else {
            return Ok(None);
        };

        if !session.is_expired(Utc::now().timestamp()) {
            return Ok(Some(session));
        }
        self.renew(&session.access_token).await
    }

    async fn refresh_rejected(&self, rejected_token: &str) -> Result<Option<Session>, DashboardError> {
        self.renew(rejected_token).await
    }

    async fn user(&self) -> Result<Option<AuthUser>, DashboardError> {
        let Some(session) = self.session().await? else {
            return Ok(None);
        };

        let resp = self
            .client
            .get(self.endpoint("auth/v1/user")?)
            .header("apikey", self.anon_key.clone())
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        if resp.status().as_u16() == 401 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }

        Ok(Some(resp.json().await?))
    }

    async fn sign_out(&self) -> Result<(), DashboardError> {
        let token = self.current.borrow().as_ref().map(|s| s.access_token.clone());
        if let Some(token) = token {
            let result = self
                .client
                .post(self.endpoint("auth/v1/logout")?)
                .header("apikey", self.anon_key.clone())
                .header("Authorization", format!("Bearer {}", token))
                .send()
                .await;
            match result {
                Ok(resp) if !resp.status().is_success() => {
                    log::warn!("Remote sign-out returned {}", resp.status());
                }
                Err(e) => log::warn!("Remote sign-out failed: {}", e),
                Ok(_) => {}
            }
        }
        self.set_session(None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }
}
