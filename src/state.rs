use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::backend::session_store::SessionStore;
use crate::backend::Backend;
use crate::error::DashboardError;
use crate::session_gate::SessionGate;
use crate::types::Config;

const URL_VARS: [&str; 2] = ["SUPABASE_URL", "VITE_SUPABASE_URL"];
const KEY_VARS: [&str; 2] = ["SUPABASE_ANON_KEY", "VITE_SUPABASE_ANON_KEY"];

/// Endpoint and public key of a usable hosted project.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Always ends with `/` so relative endpoints join under it.
    pub url: Url,
    pub anon_key: String,
}

/// Outcome of configuration resolution. Only `Ready` yields a backend; the
/// other states keep the app running in "not configured" mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigStatus {
    Ready(BackendConfig),
    /// A backend was handed in directly instead of resolved from settings.
    Supplied,
    Missing(Vec<&'static str>),
    Invalid(String),
}

impl ConfigStatus {
    /// Message for the "not configured" banner; None when ready.
    pub fn message(&self) -> Option<String> {
        match self {
            ConfigStatus::Ready(_) | ConfigStatus::Supplied => None,
            ConfigStatus::Missing(vars) => Some(format!(
                "Supabase is not configured: set {} (environment or ~/.hypeloop/config.json)",
                vars.join(" and ")
            )),
            ConfigStatus::Invalid(reason) => {
                Some(format!("Supabase is not configured: {}", reason))
            }
        }
    }
}

/// Application state shared by the views
pub struct AppState {
    pub config: Config,
    pub status: ConfigStatus,
    pub backend: Option<Backend>,
}

impl AppState {
    /// Resolve configuration from disk and environment and build the backend.
    /// Never fails: problems degrade to "not configured".
    pub fn load() -> Self {
        let file = match load_config() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("No usable config file ({}); using defaults", e);
                Config::default()
            }
        };
        let (config, status) = resolve_config(file, |name| std::env::var(name).ok());

        let (status, backend) = match status {
            ConfigStatus::Ready(backend_config) => match Backend::connect(
                &backend_config,
                &config.storage_bucket,
                SessionStore::default_location(),
            ) {
                Ok(backend) => (ConfigStatus::Ready(backend_config), Some(backend)),
                Err(e) => {
                    log::warn!("Failed to build backend client: {e}. Running unconfigured.");
                    (ConfigStatus::Invalid(e.to_string()), None)
                }
            },
            other => {
                if let Some(message) = other.message() {
                    log::warn!("{}", message);
                }
                (other, None)
            }
        };

        Self {
            config,
            status,
            backend,
        }
    }

    pub fn with_backend(config: Config, backend: Backend) -> Self {
        Self {
            config,
            status: ConfigStatus::Supplied,
            backend: Some(backend),
        }
    }

    pub fn unconfigured(config: Config, status: ConfigStatus) -> Self {
        Self {
            config,
            status,
            backend: None,
        }
    }

    pub fn backend(&self) -> Result<&Backend, DashboardError> {
        self.backend.as_ref().ok_or_else(|| {
            DashboardError::NotConfigured(
                self.status
                    .message()
                    .unwrap_or_else(|| "backend unavailable".to_string()),
            )
        })
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// Mount a session gate over this state's auth provider.
    pub fn session_gate(&self) -> SessionGate {
        SessionGate::mount(
            self.backend.as_ref().map(|b| b.auth.clone()),
            Duration::from_secs(self.config.session_check_timeout_secs),
        )
    }

    pub fn realtime_poll(&self) -> Duration {
        Duration::from_secs(self.config.realtime_poll_seconds.max(1))
    }

    pub fn stagnant_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.config.stagnant_after_hours)
    }
}

/// `~/.hypeloop`
pub fn state_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".hypeloop"))
}

pub fn load_config() -> Result<Config, String> {
    let dir = state_dir().ok_or("Could not find home directory")?;
    load_config_from(&dir.join("config.json"))
}

pub fn load_config_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        return Err(format!("Config file not found at {}", path.display()));
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Overlay environment variables on the file config and decide whether the
/// backend is usable. `lookup` is the environment (injected for tests).
pub fn resolve_config(
    mut config: Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> (Config, ConfigStatus) {
    let first_set = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
    };
    if let Some(url) = first_set(&URL_VARS) {
        config.supabase_url = Some(url);
    }
    if let Some(key) = first_set(&KEY_VARS) {
        config.supabase_anon_key = Some(key);
    }

    let url = config
        .supabase_url
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let key = config
        .supabase_anon_key
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let status = match (url, key) {
        (Some(url), Some(key)) => match parse_endpoint(url) {
            Ok(url) => ConfigStatus::Ready(BackendConfig {
                url,
                anon_key: key.to_string(),
            }),
            Err(reason) => ConfigStatus::Invalid(reason),
        },
        (url, key) => {
            let mut missing = Vec::new();
            if url.is_none() {
                missing.push(URL_VARS[0]);
            }
            if key.is_none() {
                missing.push(KEY_VARS[0]);
            }
            ConfigStatus::Missing(missing)
        }
    };

    (config, status)
}

fn parse_endpoint(raw: &str) -> Result<Url, String> {
    let mut url = Url::parse(raw).map_err(|e| format!("SUPABASE_URL '{}' is not a URL: {}", raw, e))?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(format!("SUPABASE_URL '{}' must use http or https", raw));
    }
    if url.host_str().is_none() {
        return Err(format!("SUPABASE_URL '{}' has no host", raw));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
