//! Admin settings: a credential check gating edits to the reconciliation
//! prompt.
//!
//! This is a single static username/password pair, not an authentication
//! system. When no credential is configured the placeholder `admin`/`secret`
//! is used and a warning is logged every time it is loaded.
//!
//! The prompt is optionally persisted to a plain-text store file so the CLI
//! can read it back on the next run.

use crate::error::SettingsError;
use crate::prompts::DEFAULT_RECONCILIATION_PROMPT;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PLACEHOLDER_USER: &str = "admin";
const PLACEHOLDER_PASSWORD: &str = "secret";

/// The admin username/password pair. `Debug` never prints the password.
#[derive(Clone)]
pub struct AdminCredentials {
    username: String,
    password: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl AdminCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The built-in `admin`/`secret` pair. Logs a warning.
    pub fn placeholder() -> Self {
        warn!("No admin credential configured; using the built-in placeholder. Set DOCS2JSON_ADMIN_USER and DOCS2JSON_ADMIN_PASSWORD.");
        Self::new(PLACEHOLDER_USER, PLACEHOLDER_PASSWORD)
    }

    /// Read `DOCS2JSON_ADMIN_USER` / `DOCS2JSON_ADMIN_PASSWORD`, falling back
    /// to the placeholder when either is unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |k: &str| lookup(k).filter(|v| !v.is_empty());
        match (get("DOCS2JSON_ADMIN_USER"), get("DOCS2JSON_ADMIN_PASSWORD")) {
            (Some(user), Some(password)) => Self::new(user, password),
            _ => Self::placeholder(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn matches(&self, username: &str, password: &str) -> bool {
        // Evaluate both so timing does not reveal which one was wrong.
        let user_ok = constant_time_eq(self.username.as_bytes(), username.as_bytes());
        let pass_ok = constant_time_eq(self.password.as_bytes(), password.as_bytes());
        user_ok & pass_ok
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Proof of a successful [`SettingsController::login`].
///
/// Only the controller can create one.
#[derive(Debug)]
pub struct AdminSession {
    username: String,
}

impl AdminSession {
    pub fn username(&self) -> &str {
        &self.username
    }
}

/// Holds the current reconciliation prompt and gates changes to it.
#[derive(Debug)]
pub struct SettingsController {
    credentials: AdminCredentials,
    prompt: String,
    store: Option<PathBuf>,
}

impl SettingsController {
    /// In-memory controller starting from the default prompt.
    pub fn new(credentials: AdminCredentials) -> Self {
        Self {
            credentials,
            prompt: DEFAULT_RECONCILIATION_PROMPT.to_string(),
            store: None,
        }
    }

    /// Controller backed by a store file. A missing or empty file means the
    /// default prompt.
    pub async fn load(
        credentials: AdminCredentials,
        store: impl Into<PathBuf>,
    ) -> Result<Self, SettingsError> {
        let store = store.into();
        let prompt = read_stored_prompt(&store)
            .await?
            .unwrap_or_else(|| DEFAULT_RECONCILIATION_PROMPT.to_string());

        Ok(Self {
            credentials,
            prompt,
            store: Some(store),
        })
    }

    /// The current reconciliation prompt.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store.as_deref()
    }

    /// Check the credential pair.
    pub fn login(&self, username: &str, password: &str) -> Result<AdminSession, SettingsError> {
        if self.credentials.matches(username, password) {
            info!("Admin '{}' logged in", username);
            Ok(AdminSession {
                username: username.to_string(),
            })
        } else {
            warn!("Rejected admin login for '{}'", username);
            Err(SettingsError::InvalidCredentials)
        }
    }

    /// Replace the prompt, persisting it when a store is configured.
    pub async fn update_prompt(
        &mut self,
        session: &AdminSession,
        prompt: impl Into<String>,
    ) -> Result<(), SettingsError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(SettingsError::EmptyPrompt);
        }

        if let Some(path) = &self.store {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| SettingsError::Store {
                        path: path.clone(),
                        source,
                    })?;
            }
            tokio::fs::write(path, &prompt)
                .await
                .map_err(|source| SettingsError::Store {
                    path: path.clone(),
                    source,
                })?;
        }

        info!("Reconciliation prompt updated by '{}'", session.username());
        self.prompt = prompt;
        Ok(())
    }
}

/// Read a prompt store without logging in. `None` if missing or empty.
pub async fn read_stored_prompt(path: &Path) -> Result<Option<String>, SettingsError> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) if !s.trim().is_empty() => {
            debug!("Loaded reconciliation prompt from {}", path.display());
            Ok(Some(s.trim_end().to_string()))
        }
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SettingsError::Store {
            path: path.to_path_buf(),
            source,
        }),
    }
}
