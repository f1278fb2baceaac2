//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the registry of open reading
//! sessions.

use crate::config::Config;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use storyteller_core::ports::{DatabaseService, StoryGenerationService};
use storyteller_core::session::ReadingSession;
use tokio::sync::Mutex;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub story_generator: Arc<dyn StoryGenerationService>,
    pub reading_sessions: ReadingSessions,
}

impl AppState {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        story_generator: Arc<dyn StoryGenerationService>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            config,
            story_generator,
            reading_sessions: ReadingSessions::default(),
        }
    }
}

//=========================================================================================
// Reading Sessions (One Per Reader Per Story Opening)
//=========================================================================================

/// A reader's open session, plus who owns it.
pub struct ActiveReading {
    pub user_id: Uuid,
    pub session: ReadingSession,
    pub last_active: DateTime<Utc>,
}

/// Open reading sessions, keyed by session id. Each session is only ever
/// touched under the lock, so two requests for the same session are applied
/// one after the other.
#[derive(Default)]
pub struct ReadingSessions {
    inner: Mutex<HashMap<Uuid, ActiveReading>>,
}

impl ReadingSessions {
    /// Registers a new session and returns its id. Sessions idle for longer
    /// than `idle_limit` are dropped at the same time.
    pub async fn open(&self, user_id: Uuid, session: ReadingSession, idle_limit: Duration) -> Uuid {
        let now = Utc::now();
        let session_id = Uuid::new_v4();
        let mut sessions = self.inner.lock().await;
        sessions.retain(|_, reading| now - reading.last_active <= idle_limit);
        sessions.insert(
            session_id,
            ActiveReading {
                user_id,
                session,
                last_active: now,
            },
        );
        session_id
    }

    /// Runs `f` on the caller's session. Returns `None` if the session does not
    /// exist or belongs to someone else.
    pub async fn with_session<T>(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        f: impl FnOnce(&mut ReadingSession) -> T,
    ) -> Option<T> {
        let mut sessions = self.inner.lock().await;
        let reading = sessions
            .get_mut(&session_id)
            .filter(|reading| reading.user_id == user_id)?;
        reading.last_active = Utc::now();
        Some(f(&mut reading.session))
    }

    /// Discards the caller's session. Returns whether one was removed.
    pub async fn close(&self, session_id: Uuid, user_id: Uuid) -> bool {
        let mut sessions = self.inner.lock().await;
        match sessions.get(&session_id) {
            Some(reading) if reading.user_id == user_id => {
                sessions.remove(&session_id);
                true
            }
            _ => false,
        }
    }

    pub async fn open_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}
