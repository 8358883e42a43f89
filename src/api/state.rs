use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Session;
use crate::services::Pipeline;

/// In-memory session map; each session has its own lock so one turn runs at a time
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty session and returns its id
    pub async fn create(&self) -> Uuid {
        let session = Session::new();
        let id = session.id;
        self.inner.write().await.insert(id, Arc::new(Mutex::new(session)));
        id
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Mutex<Session>>> {
        self.inner.read().await.get(&id).cloned()
    }

    /// Drops a session; `false` when it did not exist
    pub async fn remove(&self, id: Uuid) -> bool {
        self.inner.write().await.remove(&id).is_some()
    }

    /// Drops sessions idle for longer than `ttl` and returns how many went
    ///
    /// A session whose lock is held is mid-request and always kept.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = Utc::now() - ttl;

        let mut sessions = self.inner.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| match session.try_lock() {
            Ok(session) => !session.idle_since(cutoff),
            Err(_) => true,
        });
        before - sessions.len()
    }
}

/// Periodically evicts idle sessions until the returned task is aborted
pub fn spawn_session_sweeper(store: SessionStore, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let evicted = store.evict_idle(ttl).await;
            if evicted > 0 {
                tracing::info!(evicted, ttl_secs = ttl.as_secs(), "Evicted idle sessions");
            }
        }
    })
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub sessions: SessionStore,
    pub default_top_k: usize,
    pub max_top_k: usize,
}

impl AppState {
    pub fn new(pipeline: Pipeline, default_top_k: usize, max_top_k: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            sessions: SessionStore::new(),
            default_top_k,
            max_top_k,
        }
    }

    /// Looks up a session or fails with a 404
    pub async fn session(&self, id: Uuid) -> AppResult<Arc<Mutex<Session>>> {
        self.sessions
            .get(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("session {}", id)))
    }

    /// Applies the default and checks `1..=max_top_k`
    pub fn top_k(&self, requested: Option<usize>) -> AppResult<usize> {
        let top_k = requested.unwrap_or(self.default_top_k);
        if top_k == 0 || top_k > self.max_top_k {
            return Err(AppError::InvalidInput(format!(
                "top_k must be between 1 and {}, got {}",
                self.max_top_k, top_k
            )));
        }
        Ok(top_k)
    }
}
