//! Session store (spec §4.9): in-memory map from session identifier to
//! [`Session`], authoritative for the life of the process, optionally
//! mirrored write-through to an external cache so an operator can observe
//! or externally terminate sessions.
//!
//! The mirror is advisory only (spec §4.9, §9 Open Questions: "behavior
//! when the external cache is unreachable -- source degrades silently;
//! this spec formalizes that"): a mirror write failure is logged and
//! otherwise ignored, never propagated to the caller, and never blocks
//! the in-memory write it shadows.

use std::sync::Arc;

use dashmap::DashMap;

use crate::message::{Session, SessionId};

#[cfg(feature = "session-mirror")]
mod mirror;

#[cfg(feature = "session-mirror")]
pub use mirror::SessionMirror;

/// The process-wide session store. Cheap to clone: the map is behind an
/// `Arc`, so every session task and the CLI's shutdown handler share one
/// instance (spec §5: "no cross-session mutable state in the core" beyond
/// this store, which is internally synchronized per-entry by `DashMap`).
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<SessionId, Session>>,
    #[cfg(feature = "session-mirror")]
    mirror: Option<Arc<SessionMirror>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            sessions: Arc::new(DashMap::new()),
            #[cfg(feature = "session-mirror")]
            mirror: None,
        }
    }

    #[cfg(feature = "session-mirror")]
    pub fn with_mirror(mirror: SessionMirror) -> Self {
        SessionStore { sessions: Arc::new(DashMap::new()), mirror: Some(Arc::new(mirror)) }
    }

    /// Insert or update the record for `id`, then write through to the
    /// mirror if one is configured. Always succeeds from the caller's
    /// perspective: the in-memory write is the one that matters.
    pub fn upsert(&self, id: SessionId, session: Session) {
        #[cfg(feature = "session-mirror")]
        if let Some(mirror) = &self.mirror {
            mirror.write_through(id, &session);
        }
        self.sessions.insert(id, session);
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.get(&id).map(|entry| entry.clone())
    }

    /// Remove the entry for `id`. Called once a session reaches
    /// `Terminated`, after its one diagnostic record (if any) has been
    /// emitted -- the store itself never holds terminated sessions
    /// indefinitely (spec §8 S3: "session store contains exactly one
    /// (terminated) entry" describes the window before this runs, not a
    /// steady state).
    pub fn remove(&self, id: SessionId) {
        self.sessions.remove(&id);
        #[cfg(feature = "session-mirror")]
        if let Some(mirror) = &self.mirror {
            mirror.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Dialect, Role};

    #[test]
    fn upsert_then_get_round_trips() {
        let store = SessionStore::new();
        let id = SessionId([0, 0, 0, 0, 0, 0, 0, 1]);
        let session = Session::new(Role::Secc, Dialect::Di2, false);
        store.upsert(id, session);
        assert!(store.get(id).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_clears_the_entry() {
        let store = SessionStore::new();
        let id = SessionId([0, 0, 0, 0, 0, 0, 0, 2]);
        store.upsert(id, Session::new(Role::Secc, Dialect::Di2, false));
        store.remove(id);
        assert!(store.get(id).is_none());
        assert!(store.is_empty());
    }
}
