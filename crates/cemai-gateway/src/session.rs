//! Persisted client session: the token pair and console preferences.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use cemai_protocol::AuthTokens;

use crate::GatewayResult;

const APP_DIR: &str = "cemai-control-tower";
const SESSION_FILE: &str = "session.json";

/// On-disk shape of `session.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub side_panel_collapsed: bool,
}

/// Token storage shared by every [`crate::ApiClient`] clone.
///
/// Writes go straight to disk when a path is configured. Without a data
/// directory (and in tests) [`SessionStore::in_memory`] keeps tokens for the
/// process lifetime only.
#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    state: Mutex<PersistedSession>,
}

impl SessionStore {
    /// `<data_dir>/cemai-control-tower/session.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join(APP_DIR).join(SESSION_FILE))
    }

    /// Load from `path`. A missing file yields an empty session; a corrupt
    /// one is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> GatewayResult<Self> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable session file");
                    PersistedSession::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedSession::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(PersistedSession::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, PersistedSession> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PersistedSession {
        self.lock().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().refresh_token.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.lock().access_token.is_some()
    }

    pub fn set_tokens(&self, tokens: &AuthTokens) -> GatewayResult<()> {
        self.modify(|s| {
            s.access_token = Some(tokens.access_token.clone());
            s.refresh_token = Some(tokens.refresh_token.clone());
        })
    }

    pub fn clear_tokens(&self) -> GatewayResult<()> {
        self.modify(|s| {
            s.access_token = None;
            s.refresh_token = None;
        })
    }

    pub fn side_panel_collapsed(&self) -> bool {
        self.lock().side_panel_collapsed
    }

    pub fn set_side_panel_collapsed(&self, collapsed: bool) -> GatewayResult<()> {
        self.modify(|s| s.side_panel_collapsed = collapsed)
    }

    fn modify(&self, f: impl FnOnce(&mut PersistedSession)) -> GatewayResult<()> {
        let snapshot = {
            let mut state = self.lock();
            f(&mut state);
            state.clone()
        };
        self.persist(&snapshot)
    }

    fn persist(&self, session: &PersistedSession) -> GatewayResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "session saved");
        Ok(())
    }
}
