//! Session registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::metrics::GatewayMetrics;

use super::{Session, SessionConfig};

/// Bounded registry of active sessions.
pub struct SessionManager {
    config: SessionConfig,
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    metrics: Arc<GatewayMetrics>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Create and register a session, enforcing the configured cap.
    pub fn add_session(&self) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.write();

        if self.config.max_sessions > 0 && sessions.len() >= self.config.max_sessions {
            return Err(SessionError::MaxSessionsReached.into());
        }

        let id = Uuid::new_v4();
        let session = Session::new(id, &self.config, Arc::clone(&self.metrics));
        sessions.insert(id, Arc::clone(&session));
        debug!(session = %id, "session registered");
        Ok(session)
    }

    pub fn get_session(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Detach the session under the lock, then clean it up outside the
    /// lock. Safe to call again for the same id; cleanup faults are
    /// aggregated and logged, never propagated.
    pub async fn remove_session(&self, id: Uuid) {
        let session = self.sessions.write().remove(&id);

        if let Some(session) = session {
            if let Err(e) = cleanup_session(&session).await {
                warn!(session = %id, err = %e, "session cleanup failed");
            }
        }
    }
}

/// Tear a session down step by step, collecting faults so one failing step
/// never skips the rest.
async fn cleanup_session(session: &Session) -> Result<()> {
    let mut faults: Vec<String> = Vec::new();

    if let Err(e) = session.stop_stream_handler().await {
        faults.push(format!("stop stream handler: {e}"));
    }

    if let Some(reflector) = session.take_reflector() {
        reflector.disconnect().await;
    }

    session.close_outgoing_channels();

    if faults.is_empty() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(faults.join("; ")).into())
    }
}
