//! `Database` trait: single async interface for sessions and leads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::lead::{Lead, NewLead};
use crate::session::Session;

/// Backend-agnostic persistence for in-progress sessions and finalized leads.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Leads ───────────────────────────────────────────────────────

    /// Insert a lead. A duplicate `(email, business_name)` pair fails with
    /// `DatabaseError::Constraint`.
    async fn insert_lead(&self, lead: NewLead) -> Result<Lead, DatabaseError>;

    /// Get a lead by ID.
    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    /// Insert a new session row.
    async fn insert_session(&self, session: &Session) -> Result<(), DatabaseError>;

    /// Get a session row by ID. Expired rows are returned as stored.
    async fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError>;

    /// Write `session.form_data` and `session.updated_at`, but only to a row
    /// that is live at `now` and whose stored `updated_at` still equals
    /// `read_at`.
    ///
    /// Returns `false` if no row matched: missing, expired, or written by
    /// someone else since it was read.
    async fn update_session(
        &self,
        session: &Session,
        read_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Delete a session that is live at `now`. With `read_at`, only a row
    /// still at that version is deleted. Returns `false` if no row matched.
    async fn delete_session(
        &self,
        id: &str,
        read_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Delete every session whose `expires_at` is at or before `now`.
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError>;
}
