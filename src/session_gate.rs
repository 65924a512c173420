//! Session gate in front of the protected screens.
//!
//! Mounting starts one bounded session check and then follows the auth
//! provider's session stream until the gate is unmounted. Without a backend
//! the gate is `Unauthenticated` from the start.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{AuthProvider, Session};

#[derive(Debug, Clone, PartialEq)]
pub enum GateState {
    Checking,
    Authenticated(Session),
    Unauthenticated,
}

impl GateState {
    pub fn is_checking(&self) -> bool {
        matches!(self, GateState::Checking)
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            GateState::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

impl From<Option<Session>> for GateState {
    fn from(session: Option<Session>) -> Self {
        match session {
            Some(session) => GateState::Authenticated(session),
            None => GateState::Unauthenticated,
        }
    }
}

pub struct SessionGate {
    state: watch::Receiver<GateState>,
    task: Option<JoinHandle<()>>,
}

impl SessionGate {
    /// Start the session check. Must be called inside a tokio runtime when a
    /// provider is given.
    pub fn mount(auth: Option<Arc<dyn AuthProvider>>, timeout: Duration) -> Self {
        let Some(auth) = auth else {
            log::info!("Session gate: backend not configured, treating as signed out");
            let (_tx, state) = watch::channel(GateState::Unauthenticated);
            return Self { state, task: None };
        };

        let (tx, state) = watch::channel(GateState::Checking);
        let mut changes = auth.subscribe();

        let task = tokio::spawn(async move {
            let initial = match tokio::time::timeout(timeout, auth.session()).await {
                Ok(Ok(session)) => GateState::from(session),
                Ok(Err(e)) => {
                    log::warn!("Session gate: session check failed: {}", e);
                    GateState::Unauthenticated
                }
                Err(_) => {
                    log::warn!(
                        "Session gate: session check timed out after {}s",
                        timeout.as_secs_f32()
                    );
                    GateState::Unauthenticated
                }
            };
            tx.send_replace(initial);

            while changes.changed().await.is_ok() {
                let next = GateState::from(changes.borrow_and_update().clone());
                log::debug!("Session gate: session changed (signed in: {})", next.session().is_some());
                tx.send_replace(next);
            }
        });

        Self {
            state,
            task: Some(task),
        }
    }

    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    /// Receiver that sees every later state change.
    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.clone()
    }

    /// Wait for the initial check to finish.
    pub async fn resolved(&self) -> GateState {
        let mut rx = self.state.clone();
        let resolved = match rx.wait_for(|state| !state.is_checking()).await {
            Ok(state) => state.clone(),
            Err(_) => GateState::Unauthenticated,
        };
        resolved
    }

    pub fn unmount(self) {}
}

impl Drop for SessionGate {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
