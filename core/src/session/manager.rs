use crate::config::RuntimeConfig;
use crate::error::{AgentError, Result};
use crate::session::{AgentRoster, Session};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Creates, looks up and tears down sessions. One per process.
pub struct SessionManager {
    roster: AgentRoster,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    idle_timeout: Option<Duration>,
}

impl SessionManager {
    pub fn new(roster: AgentRoster) -> Self {
        Self {
            roster,
            sessions: RwLock::new(HashMap::new()),
            max_sessions: 0,
            idle_timeout: None,
        }
    }

    pub fn from_config(roster: AgentRoster, runtime: &RuntimeConfig) -> Self {
        let timeout = (runtime.session_timeout_secs > 0)
            .then(|| Duration::from_secs(runtime.session_timeout_secs));
        Self {
            max_sessions: runtime.max_sessions,
            idle_timeout: timeout,
            ..Self::new(roster)
        }
    }

    /// 0 means unlimited.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn create_session(&self) -> Result<String> {
        let mut sessions = self.sessions.write();
        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            return Err(AgentError::SessionLimit(sessions.len()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Session::open(id.clone(), &self.roster)?;
        sessions.insert(id.clone(), session);
        info!(session = %id, active = sessions.len(), "Session created");
        Ok(id)
    }

    pub fn get_session(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))
    }

    /// Closing an unknown or already closed session does nothing.
    pub async fn close_session(&self, id: &str) {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(session) => session.shutdown().await,
            None => debug!(session = %id, "Close requested for unknown session"),
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in drained {
            session.shutdown().await;
        }
    }

    /// Closes sessions without inbound activity for longer than the idle
    /// timeout. Returns how many were closed.
    pub async fn reap_idle(&self) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };

        let idle: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.idle_for() >= timeout)
            .map(|s| s.id().to_string())
            .collect();

        for id in &idle {
            info!(session = %id, "Reaping idle session");
            self.close_session(id).await;
        }
        idle.len()
    }

    /// Runs [`reap_idle`](Self::reap_idle) every `every` until `shutdown`
    /// fires.
    pub async fn run_reaper(self: Arc<Self>, every: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.reap_idle().await;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
