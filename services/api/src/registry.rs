//! Process-wide index of live sessions.

use crate::ws::state::Session;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Sessions by id. Only the orchestrator inserts and removes.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<Session>) {
        self.sessions.lock().await.insert(session.id, session);
    }

    pub async fn remove(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.lock().await.remove(&id)
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
