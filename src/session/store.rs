//! Session store: TTL-bounded key/value records on top of `Database`.
//!
//! Expiry is enforced at read time; the periodic sweep only reclaims rows.

use std::sync::Arc;

use chrono::{Duration, SubsecRound, Utc};
use tracing::{debug, info, warn};

use super::model::Session;
use crate::error::SessionError;
use crate::form::model::FormFields;
use crate::store::Database;

/// Default session lifetime.
pub const DEFAULT_TTL_SECS: i64 = 24 * 60 * 60;

/// Attempts a read-modify-write makes before giving up with `Conflict`.
pub const MAX_WRITE_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct SessionStore {
    db: Arc<dyn Database>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(db: Arc<dyn Database>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Create an empty session.
    pub async fn create(&self) -> Result<Session, SessionError> {
        let session = Session::new(self.ttl);
        self.db.insert_session(&session).await?;
        info!(
            session_id = %session.session_id,
            expires_at = %session.expires_at,
            "Session created"
        );
        Ok(session)
    }

    /// Get a live session. Missing and expired sessions are both `NotFound`.
    pub async fn get(&self, id: &str) -> Result<Session, SessionError> {
        match self.db.get_session(id).await? {
            Some(session) if !session.is_expired() => Ok(session),
            Some(_) => {
                debug!(session_id = id, "Session expired");
                Err(not_found(id))
            }
            None => Err(not_found(id)),
        }
    }

    /// Merge user fields into a session and persist it.
    pub async fn update(&self, id: &str, fields: &FormFields) -> Result<Session, SessionError> {
        let (session, ()) = self
            .modify(id, |session| {
                session.form_data.merge(fields);
                Ok::<_, SessionError>(())
            })
            .await?;
        Ok(session)
    }

    /// Read-modify-write a live session.
    ///
    /// `apply` runs against a fresh read on every attempt. A write that loses
    /// to a concurrent one is retried up to `MAX_WRITE_ATTEMPTS` times. If
    /// `apply` leaves the form data untouched nothing is written.
    pub async fn modify<T, E>(
        &self,
        id: &str,
        mut apply: impl FnMut(&mut Session) -> Result<T, E>,
    ) -> Result<(Session, T), E>
    where
        E: From<SessionError>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut session = self.get(id).await?;
            let before = session.form_data.clone();
            let out = apply(&mut session)?;
            if session.form_data == before {
                return Ok((session, out));
            }
            match self.save(&mut session).await {
                Ok(()) => return Ok((session, out)),
                Err(SessionError::Conflict { .. }) => {
                    debug!(session_id = id, attempt, "Concurrent session write, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SessionError::Conflict { id: id.to_string() }.into())
    }

    /// Write `session` back if nobody else wrote it since it was read.
    ///
    /// `session.updated_at` must still hold the version that was read; on
    /// success it is bumped to the new version. Fails with `Conflict` if the
    /// stored version moved on, `NotFound` if the session expired or was
    /// deleted.
    pub async fn save(&self, session: &mut Session) -> Result<(), SessionError> {
        let read_at = session.updated_at;
        let now = Utc::now().trunc_subsecs(6);
        // Versions must strictly increase even within one clock tick.
        session.updated_at = now.max(read_at + Duration::microseconds(1));
        if self.db.update_session(session, read_at, now).await? {
            debug!(session_id = %session.session_id, "Session saved");
            return Ok(());
        }
        session.updated_at = read_at;
        Err(self.lost_write(&session.session_id).await?)
    }

    /// Atomically take `session` out of the store for final submission.
    ///
    /// Only one caller holding the current version can claim it; everyone
    /// else sees `Conflict` (changed) or `NotFound` (already claimed).
    pub async fn claim(&self, session: &Session) -> Result<(), SessionError> {
        let id = &session.session_id;
        if self
            .db
            .delete_session(id, Some(session.updated_at), Utc::now())
            .await?
        {
            debug!(session_id = %id, "Session claimed");
            return Ok(());
        }
        Err(self.lost_write(id).await?)
    }

    /// Put a claimed session back after a failed submission.
    pub async fn restore(&self, session: &Session) -> Result<(), SessionError> {
        self.db.insert_session(session).await?;
        info!(session_id = %session.session_id, "Session restored");
        Ok(())
    }

    /// Delete a live session. Returns `false` if it was missing or expired.
    pub async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        let deleted = self.db.delete_session(id, None, Utc::now()).await?;
        if deleted {
            info!(session_id = id, "Session deleted");
        }
        Ok(deleted)
    }

    /// Tell apart the two reasons a conditional write can match no row.
    async fn lost_write(&self, id: &str) -> Result<SessionError, SessionError> {
        Ok(match self.get(id).await {
            Ok(_) => SessionError::Conflict { id: id.to_string() },
            Err(SessionError::NotFound { .. }) => not_found(id),
            Err(e) => return Err(e),
        })
    }

    /// Remove expired rows. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, SessionError> {
        let purged = self.db.purge_expired_sessions(Utc::now()).await?;
        if purged > 0 {
            info!(count = purged, "Purged expired sessions");
        }
        Ok(purged)
    }
}

fn not_found(id: &str) -> SessionError {
    SessionError::NotFound { id: id.to_string() }
}

/// Spawn a background task that purges expired sessions every `every`.
pub fn spawn_sweep_task(
    store: SessionStore,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = store.purge_expired().await {
                warn!(error = %e, "Session sweep failed");
            }
        }
    })
}
