//! Session and artifact store.
//!
//! Process-wide, in-memory map from a session identifier to the last program
//! that rendered successfully and the artifact it produced. The store owns
//! committed artifacts: they are moved under its root on commit and deleted
//! when replaced or evicted. Nothing survives a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// The program and artifact of the last successful request.
///
/// Held together so a reader can never see one without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedScene {
    pub program: String,
    pub artifact: PathBuf,
}

/// One successful request in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub utterance: String,
    /// Attempts the request needed.
    pub attempts: u32,
    pub committed_at: DateTime<Utc>,
}

/// State of one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// Successful turns, oldest first.
    pub turns: Vec<Turn>,
    pub current: Option<CommittedScene>,
}

/// In-memory session registry with atomic commits.
pub struct SessionStore {
    artifact_root: PathBuf,
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl SessionStore {
    /// Creates a store that keeps artifacts under `artifact_root`.
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            artifact_root: artifact_root.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store from configuration.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.artifact_root())
    }

    /// Returns the directory that owns committed artifacts.
    pub fn artifact_root(&self) -> &Path {
        &self.artifact_root
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionState>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionState>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the session's current program and artifact, if any.
    pub fn get(&self, session_id: &str) -> Option<CommittedScene> {
        self.read()
            .get(session_id)
            .and_then(|state| state.current.clone())
    }

    /// Returns a copy of the whole session state.
    pub fn snapshot(&self, session_id: &str) -> Option<SessionState> {
        self.read().get(session_id).cloned()
    }

    /// Number of committed turns in the session.
    pub fn turn_count(&self, session_id: &str) -> usize {
        self.read()
            .get(session_id)
            .map_or(0, |state| state.turns.len())
    }

    /// The last `limit` utterances of the session, oldest first.
    pub fn history(&self, session_id: &str, limit: usize) -> Vec<String> {
        self.read()
            .get(session_id)
            .map(|state| {
                let skip = state.turns.len().saturating_sub(limit);
                state.turns[skip..]
                    .iter()
                    .map(|turn| turn.utterance.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Records a successful request, replacing program and artifact together.
    ///
    /// `artifact` is moved under the store's root first; the session entry is
    /// then updated under a single write lock. The previous artifact file is
    /// deleted afterwards. Returns what was committed.
    pub fn commit(
        &self,
        session_id: &str,
        utterance: &str,
        program: &str,
        artifact: &Path,
        attempts: u32,
    ) -> Result<CommittedScene> {
        let adopted = self.adopt(session_id, artifact)?;

        let scene = CommittedScene {
            program: program.to_string(),
            artifact: adopted,
        };

        let previous = {
            let mut sessions = self.write();
            let state = sessions.entry(session_id.to_string()).or_default();
            state.turns.push(Turn {
                utterance: utterance.to_string(),
                attempts,
                committed_at: Utc::now(),
            });
            state.current.replace(scene.clone())
        };

        if let Some(previous) = previous {
            remove_artifact(&previous.artifact);
        }

        tracing::info!(
            session_id = %session_id,
            artifact = ?scene.artifact,
            attempts,
            "committed scene"
        );

        Ok(scene)
    }

    /// Forgets a session and deletes its artifact. Returns true if it existed.
    pub fn evict(&self, session_id: &str) -> bool {
        let removed = self.write().remove(session_id);

        match removed {
            Some(state) => {
                if let Some(current) = state.current {
                    remove_artifact(&current.artifact);
                }
                tracing::debug!(session_id = %session_id, "evicted session");
                true
            }
            None => false,
        }
    }

    /// Number of sessions with state.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if no session has state.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Moves `artifact` under the store root with a unique name.
    fn adopt(&self, session_id: &str, artifact: &Path) -> Result<PathBuf> {
        let artifact_error = |reason: String| Error::Artifact {
            path: artifact.to_path_buf(),
            reason,
        };

        std::fs::create_dir_all(&self.artifact_root)
            .map_err(|e| artifact_error(format!("cannot create store root: {}", e)))?;

        let mut name = format!("{}-{}", sanitize(session_id), uuid::Uuid::new_v4().simple());
        if let Some(ext) = artifact.extension().and_then(|e| e.to_str()) {
            name.push('.');
            name.push_str(ext);
        }
        let dest = self.artifact_root.join(name);

        // rename fails across filesystems; fall back to copy + remove.
        if std::fs::rename(artifact, &dest).is_err() {
            std::fs::copy(artifact, &dest).map_err(|e| artifact_error(e.to_string()))?;
            if let Err(e) = std::fs::remove_file(artifact) {
                tracing::debug!(error = %e, path = ?artifact, "left source artifact in place");
            }
        }

        Ok(dest)
    }
}

fn sanitize(session_id: &str) -> String {
    let cleaned: String = session_id
        .chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = ?path, "failed to delete artifact"),
    }
}
