//! The process-wide table of live sessions, keyed by session id
//! (spec §4.I).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::session::Session;

/// Looks up and creates sessions by id. A single `RwLock` around the whole
/// map, rather than a sharded or lock-free table, mirrors the teacher's
/// session registry: session churn is low-frequency next to the
/// per-session traffic it guards access to.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Insert `session` under its own id. Fails with [`Error::Internal`] if
    /// a session with that id already exists -- ids are 128-bit random
    /// values, so a collision here indicates a bug, not a race a caller
    /// should retry (testable property §8.9).
    pub async fn add(&self, session: Arc<Session>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(Error::Internal(format!(
                "session id collision: {}",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove every session whose user count is zero and whose state is
    /// `Stopping` -- the idle-reaper sweep run periodically by the daemon
    /// (spec §4.I, "periodic cleanup").
    pub async fn reap_idle(&self) -> Vec<Arc<Session>> {
        let mut reaped = Vec::new();
        let mut sessions = self.sessions.write().await;
        let mut to_remove = Vec::new();
        for (id, session) in sessions.iter() {
            if !session.is_running() && session.user_count().await == 0 {
                to_remove.push(id.clone());
            }
        }
        for id in to_remove {
            if let Some(session) = sessions.remove(&id) {
                reaped.push(session);
            }
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::tests::NullDriver;

    fn new_session() -> Arc<Session> {
        Session::new(vec![], Box::new(NullDriver), 800, 600)
    }

    #[tokio::test]
    async fn add_and_get_round_trip() {
        let registry = SessionRegistry::new();
        let session = new_session();
        let id = session.id.clone();
        registry.add(session).await.unwrap();
        assert!(registry.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn duplicate_id_insert_fails() {
        let registry = SessionRegistry::new();
        let session = new_session();
        registry.add(session.clone()).await.unwrap();
        assert!(registry.add(session).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_add_of_same_session_id_succeeds_exactly_once() {
        let registry = Arc::new(SessionRegistry::new());
        let session = new_session();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let session = session.clone();
            handles.push(tokio::spawn(async move { registry.add(session).await }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn reap_idle_removes_stopped_empty_sessions() {
        let registry = SessionRegistry::new();
        let session = new_session();
        session.stop();
        let id = session.id.clone();
        registry.add(session).await.unwrap();

        let reaped = registry.reap_idle().await;
        assert_eq!(reaped.len(), 1);
        assert!(registry.get(&id).await.is_none());
    }
}
