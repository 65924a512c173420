//! Route table and access decisions.

use crate::session_gate::GateState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Dashboard,
    Leads,
    PossibleClients,
    Clients,
    InternalOps,
}

impl Route {
    pub const ALL: [Route; 6] = [
        Route::Login,
        Route::Dashboard,
        Route::Leads,
        Route::PossibleClients,
        Route::Clients,
        Route::InternalOps,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Dashboard => "/",
            Route::Leads => "/leads",
            Route::PossibleClients => "/possible-clients",
            Route::Clients => "/clients",
            Route::InternalOps => "/internal-ops",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Route::Login => "Acceso Administrativo",
            Route::Dashboard => "Panel de Control",
            Route::Leads => "Gestión de Leads",
            Route::PossibleClients => "Posibles Clientes",
            Route::Clients => "Clientes",
            Route::InternalOps => "Operaciones Internas",
        }
    }

    /// Exact match; a trailing slash is ignored.
    pub fn from_path(path: &str) -> Option<Route> {
        let trimmed = match path.trim_end_matches('/') {
            "" => "/",
            other => other,
        };
        Route::ALL.into_iter().find(|r| r.path() == trimmed)
    }

    pub fn is_protected(&self) -> bool {
        !matches!(self, Route::Login)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Render(Route),
    /// Session check still running; show the blocking placeholder.
    Placeholder,
    Redirect(Route),
}

pub fn resolve(route: Route, gate: &GateState) -> Navigation {
    if !route.is_protected() {
        return Navigation::Render(route);
    }
    match gate {
        GateState::Checking => Navigation::Placeholder,
        GateState::Authenticated(_) => Navigation::Render(route),
        GateState::Unauthenticated => Navigation::Redirect(Route::Login),
    }
}
