//! Write-through mirror of the session store to an external `redis`-speaking
//! cache (spec §4.9, §6 `REDIS_HOST`/`REDIS_PORT`). Advisory only: every
//! operation here swallows its own errors after logging them.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::RedisEndpoint;
use crate::message::{Session, SessionId};

/// A `redis` connection manager handle, reconnecting transparently the way
/// the crate's own `ConnectionManager` is documented to. Held behind an
/// `Arc` by [`super::SessionStore`]; cheap to clone.
pub struct SessionMirror {
    conn: ConnectionManager,
}

impl SessionMirror {
    pub async fn connect(endpoint: &RedisEndpoint) -> Result<Self, redis::RedisError> {
        let url = format!("redis://{}:{}", endpoint.host, endpoint.port);
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(SessionMirror { conn })
    }

    /// Best-effort write-through. Serializes the bits of [`Session`] worth
    /// surfacing to an operator; failures are logged at `warn` and
    /// otherwise dropped (spec §9 Open Questions: silent degradation).
    pub fn write_through(&self, id: SessionId, session: &Session) {
        let mut conn = self.conn.clone();
        let key = format!("iso15118:session:{id}");
        let value = match serde_json::to_string(&MirroredSession::from(session)) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "failed to serialize session for mirror");
                return;
            }
        };
        tokio::spawn(async move {
            let result: Result<(), redis::RedisError> = conn.set(&key, value).await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "session mirror write failed; continuing without it");
            }
        });
    }

    pub fn remove(&self, id: SessionId) {
        let mut conn = self.conn.clone();
        let key = format!("iso15118:session:{id}");
        tokio::spawn(async move {
            let result: Result<(), redis::RedisError> = conn.del(&key).await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "session mirror delete failed; continuing without it");
            }
        });
    }
}

/// The subset of [`Session`] worth exposing to an external observer; not
/// the whole struct, since e.g. `started_at` is an `Instant` with no
/// meaningful external representation.
#[derive(serde::Serialize)]
struct MirroredSession {
    role: &'static str,
    dialect: &'static str,
    state: String,
    tls: bool,
}

impl From<&Session> for MirroredSession {
    fn from(s: &Session) -> Self {
        MirroredSession {
            role: match s.role {
                crate::message::Role::Evcc => "evcc",
                crate::message::Role::Secc => "secc",
            },
            dialect: match s.dialect {
                crate::message::Dialect::Di2 => "-2",
                crate::message::Dialect::Di20 => "-20",
            },
            state: s.state.to_string(),
            tls: s.tls,
        }
    }
}
