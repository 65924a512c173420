//! Login screen: email/password sign-in and sign-up.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{AuthProvider, Session, SignUpOutcome};
use crate::error::{DashboardError, Notice};
use crate::state::AppState;

use super::required;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginMode {
    #[default]
    SignIn,
    SignUp,
}

#[derive(Default)]
struct LoginState {
    mode: LoginMode,
    submitting: bool,
    notice: Option<Notice>,
}

pub struct LoginView {
    auth: Option<Arc<dyn AuthProvider>>,
    not_configured: String,
    state: Mutex<LoginState>,
}

impl LoginView {
    pub fn new(app: &AppState) -> Self {
        Self {
            auth: app.backend.as_ref().map(|b| b.auth.clone()),
            not_configured: app
                .status
                .message()
                .unwrap_or_else(|| "Supabase is not configured".to_string()),
            state: Mutex::new(LoginState::default()),
        }
    }

    pub fn with_auth(auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            auth: Some(auth),
            not_configured: String::new(),
            state: Mutex::new(LoginState::default()),
        }
    }

    pub fn mode(&self) -> LoginMode {
        self.state.lock().mode
    }

    pub fn toggle_mode(&self) -> LoginMode {
        let mut state = self.state.lock();
        state.mode = match state.mode {
            LoginMode::SignIn => LoginMode::SignUp,
            LoginMode::SignUp => LoginMode::SignIn,
        };
        state.mode
    }

    pub fn is_submitting(&self) -> bool {
        self.state.lock().submitting
    }

    pub fn take_notice(&self) -> Option<Notice> {
        self.state.lock().notice.take()
    }

    fn provider(&self) -> Result<Arc<dyn AuthProvider>, DashboardError> {
        self.auth
            .clone()
            .ok_or_else(|| DashboardError::NotConfigured(self.not_configured.clone()))
    }

    fn finish<T>(&self, result: Result<T, DashboardError>) -> Result<T, DashboardError> {
        let mut state = self.state.lock();
        state.submitting = false;
        if let Err(e) = &result {
            log::warn!("Authentication failed: {}", e);
            state.notice = Some(Notice::from(e));
        }
        result
    }

    /// Checks run before the provider is touched, so an unconfigured backend
    /// or an empty form never reaches the network.
    fn begin(&self, email: &str, password: &str) -> Result<(Arc<dyn AuthProvider>, String), DashboardError> {
        let checked = self.provider().and_then(|auth| {
            let email = required(email, "Email")?;
            if password.is_empty() {
                return Err(DashboardError::validation("Password is required"));
            }
            Ok((auth, email))
        });
        match checked {
            Ok(ok) => {
                self.state.lock().submitting = true;
                Ok(ok)
            }
            Err(e) => self.finish(Err(e)),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, DashboardError> {
        let (auth, email) = self.begin(email, password)?;
        let result = auth.sign_in_with_password(&email, password).await;
        self.finish(result)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, DashboardError> {
        let (auth, email) = self.begin(email, password)?;
        let result = auth.sign_up(&email, password).await;
        self.finish(result)
    }

    /// Submit the form in the current mode.
    pub async fn submit(&self, email: &str, password: &str) -> Result<SignUpOutcome, DashboardError> {
        match self.mode() {
            LoginMode::SignIn => self.sign_in(email, password).await.map(SignUpOutcome::SignedIn),
            LoginMode::SignUp => self.sign_up(email, password).await,
        }
    }

    pub async fn sign_out(&self) -> Result<(), DashboardError> {
        let auth = self.provider()?;
        auth.sign_out().await
    }
}
