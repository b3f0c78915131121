//! Session Store — a serializable `session_id → SessionState` map, snapshot
//! to disk after every handled turn. Guarantees that a restart recovers the
//! exact dialogue state.

pub mod model;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::warn;

pub use model::{CurrentTl, Evaluation, General, Mode, SessionState, Stage, TranscriptTurn};

/// Thread-safe handle to one session's state. An async mutex so the
/// Dialogue Controller can hold the guard across the oracle's `.await` —
/// that's what actually serializes one session's turns while letting other
/// sessions' turns run concurrently.
pub type SessionHandle = Arc<Mutex<SessionState>>;

pub struct SessionStore {
    path: PathBuf,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    /// Loads `<data_dir>/sessions.json`. A missing file starts an empty
    /// store; a malformed one logs a warning and also starts empty —
    /// sessions are resumable data, not a hard dependency for boot.
    pub fn load(data_dir: &std::path::Path) -> Self {
        let path = data_dir.join("sessions.json");
        let raw: HashMap<String, SessionState> = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("sessions file at {path:?} is malformed, starting empty: {e}");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };

        let sessions = raw
            .into_iter()
            .map(|(id, state)| (id, Arc::new(Mutex::new(sanitize(state)))))
            .collect();

        Self {
            path,
            sessions: RwLock::new(sessions),
        }
    }

    /// Creates a brand-new session and returns its handle.
    pub fn create(&self, session_id: &str) -> SessionHandle {
        let handle = Arc::new(Mutex::new(SessionState::new()));
        self.sessions
            .write()
            .expect("session store lock poisoned")
            .insert(session_id.to_string(), handle.clone());
        handle
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .expect("session store lock poisoned")
            .get(session_id)
            .cloned()
    }

    pub fn delete(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .expect("session store lock poisoned")
            .remove(session_id)
            .is_some()
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .expect("session store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Writes the whole-store snapshot. Called after every handled turn;
    /// a rewrite-on-save is acceptable under the single-process discipline
    /// this store assumes.
    pub async fn persist(&self) -> std::io::Result<()> {
        let handles: Vec<(String, SessionHandle)> = {
            let sessions = self.sessions.read().expect("session store lock poisoned");
            sessions.iter().map(|(id, h)| (id.clone(), h.clone())).collect()
        };

        let mut snapshot = HashMap::with_capacity(handles.len());
        for (id, handle) in handles {
            snapshot.insert(id, handle.lock().await.clone());
        }

        let raw = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, raw)
    }
}

/// Re-applies defaults to a loaded `SessionState`, making deployments
/// forward-compatible with evolving state shapes. Serde's `#[serde(default)]`
/// annotations on the struct fields already absorb most of this; sanitize
/// additionally repairs the cross-field invariants those annotations can't
/// express on their own (at most one `awaiting_*`, etc). Idempotent:
/// `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(mut state: SessionState) -> SessionState {
    let flags_set = [
        state.current.awaiting_written_confirm,
        state.current.awaiting_title_written_confirm,
        state.current.awaiting_candidate_choice,
    ];
    if flags_set.iter().filter(|f| **f).count() > 1 {
        // Ambiguous on-disk state: prefer the most specific in-progress flag
        // and clear the rest rather than guess which one is stale.
        if state.current.awaiting_title_written_confirm {
            state.current.awaiting_written_confirm = false;
            state.current.awaiting_candidate_choice = false;
        } else if state.current.awaiting_candidate_choice {
            state.current.awaiting_written_confirm = false;
        }
    }

    if !state.current.awaiting_title_written_confirm {
        state.current.pending_tl_candidate = None;
    }
    if !state.current.awaiting_candidate_choice {
        state.current.candidates.clear();
    }

    if let Some(semester) = state.general.semester {
        if !(1..=20).contains(&semester) {
            state.general.semester = None;
        }
    }
    if let Some(progress) = state.general.progress_percent {
        if progress > 100 {
            state.general.progress_percent = None;
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clears_pending_candidate_when_not_awaiting() {
        let mut state = SessionState::new();
        state.current.pending_tl_candidate = Some(model::PendingTlCandidate {
            id: "T-1".into(),
            title: "Statistik".into(),
        });
        state.current.awaiting_title_written_confirm = false;
        let sanitized = sanitize(state);
        assert!(sanitized.current.pending_tl_candidate.is_none());
    }

    #[test]
    fn sanitize_resolves_multiple_awaiting_flags() {
        let mut state = SessionState::new();
        state.current.awaiting_written_confirm = true;
        state.current.awaiting_title_written_confirm = true;
        let sanitized = sanitize(state);
        assert_eq!(sanitized.current.awaiting_count(), 1);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let mut state = SessionState::new();
        state.general.semester = Some(99);
        state.current.awaiting_candidate_choice = true;
        let once = sanitize(state);
        let twice = sanitize(once.clone());
        assert_eq!(once.general.semester, twice.general.semester);
        assert_eq!(
            once.current.awaiting_candidate_choice,
            twice.current.awaiting_candidate_choice
        );
    }

    #[test]
    fn sanitize_nulls_out_of_range_semester() {
        let mut state = SessionState::new();
        state.general.semester = Some(99);
        let sanitized = sanitize(state);
        assert_eq!(sanitized.general.semester, None);
    }

    #[tokio::test]
    async fn store_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::load(dir.path());
        let handle = store.create("sess-1");
        handle.lock().await.current.tl_id = Some("T-1".into());
        store.persist().await.unwrap();

        let reloaded = SessionStore::load(dir.path());
        let state = reloaded.get("sess-1").unwrap();
        assert_eq!(state.lock().await.current.tl_id, Some("T-1".to_string()));
    }
}
