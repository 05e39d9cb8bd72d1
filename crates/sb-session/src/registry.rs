use ahash::AHashMap;

use crate::arena::{Arena, SessionId};
use crate::error::{Result, SessionError};
use crate::session::Session;

/// The set of live sessions with an exact-name index.
///
/// Ids are generation-checked arena keys, so a stale id from a destroyed
/// session never resolves to whatever reused its slot.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Arena<Session>,
    /// Names are not unique; ids are kept in creation order.
    by_name: AHashMap<String, Vec<SessionId>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arena::new(),
            by_name: AHashMap::new(),
            max_sessions,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    pub fn ensure_capacity(&self) -> Result<()> {
        if self.is_full() {
            return Err(SessionError::CapacityExceeded {
                max: self.max_sessions,
            });
        }
        Ok(())
    }

    /// Insert a session built from its freshly allocated id.
    pub fn insert_with(&mut self, make: impl FnOnce(SessionId) -> Session) -> Result<SessionId> {
        self.ensure_capacity()?;
        let id = self.sessions.insert_with(make);
        if let Some(session) = self.sessions.get(id) {
            self.by_name.entry(session.name.clone()).or_default().push(id);
        }
        Ok(id)
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        if let Some(ids) = self.by_name.get_mut(&session.name) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_name.remove(&session.name);
            }
        }
        Some(session)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains(id)
    }

    /// Exact id, then exact name. When several sessions share a name the
    /// oldest one wins.
    pub fn resolve(&self, key: &str) -> Option<SessionId> {
        let key = key.trim();
        if let Ok(id) = key.parse::<SessionId>() {
            if self.sessions.contains(id) {
                return Some(id);
            }
        }
        self.by_name.get(key).and_then(|ids| ids.first().copied())
    }

    /// Sessions whose id or name contains `fragment`, oldest first.
    pub fn search(&self, fragment: &str) -> Vec<SessionId> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<&Session> = self
            .sessions
            .iter()
            .map(|(_, s)| s)
            .filter(|s| s.name.contains(fragment) || s.id.to_string().contains(fragment))
            .collect();
        hits.sort_by_key(|s| s.seq);
        hits.into_iter().map(|s| s.id).collect()
    }

    /// All sessions, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        let mut all: Vec<&Session> = self.sessions.iter().map(|(_, s)| s).collect();
        all.sort_by_key(|s| s.seq);
        all.into_iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.iter_mut().map(|(_, s)| s)
    }

    /// Remove every session, oldest first.
    pub fn drain(&mut self) -> Vec<Session> {
        let ids: Vec<SessionId> = self.iter().map(|s| s.id).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}
