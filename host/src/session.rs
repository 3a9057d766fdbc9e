//! The session-identity collaborator.
//!
//! A session id is generated once per deployment, stored in a small JSON file and reused on every
//! start until the file is removed. The core never sees the file; it only receives the id.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MACHINE_ID_PATH: &str = "/etc/machine-id";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot access session file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot encode session: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// Unix seconds.
    pub created_at: u64,
}

impl Session {
    /// A new session: `<hardware id hex>-<created_at>-<random u32>`.
    pub fn generate(hardware_id: &str, created_at: u64) -> Self {
        Session {
            session_id: format!("{}-{created_at}-{}", to_hex(hardware_id), rand::random::<u32>()),
            created_at,
        }
    }
}

/// `id` itself if it is already hex (lowercased), otherwise its bytes in hex.
fn to_hex(id: &str) -> String {
    let id = id.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_hexdigit()) {
        return id.to_ascii_lowercase();
    }
    id.bytes().map(|b| format!("{b:02x}")).collect()
}

/// Where the hardware id comes from when none is given: the OS machine id, else the hostname.
pub fn detect_hardware_id() -> String {
    let from_file = |path: &str| {
        fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    from_file(MACHINE_ID_PATH)
        .or_else(|| from_file("/etc/hostname"))
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SessionStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored session, or `None` if there is no usable session file.
    pub fn load(&self) -> Option<Session> {
        let text = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&text) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Ignoring malformed session file {}: {e}", self.path.display());
                None
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        let text = serde_json::to_string(session)?;
        fs::write(&self.path, text).map_err(|source| SessionError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Returns the stored session, generating and storing a new one if there is none.
    ///
    /// A new session that cannot be saved is still returned; the error is logged and the next
    /// start generates another one.
    pub fn load_or_create(&self, hardware_id: &str, now: u64) -> Session {
        if let Some(session) = self.load() {
            return session;
        }
        let session = Session::generate(hardware_id, now);
        info!("New session {}", session.session_id);
        if let Err(e) = self.save(&session) {
            warn!("{e}");
        }
        session
    }

    /// Deletes the session file. Returns whether there was one.
    pub fn clear(&self) -> Result<bool, SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(SessionError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
