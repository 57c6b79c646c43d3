//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 (microseconds, `Z`) so they compare correctly as text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::enrichment::VerificationResult;
use crate::error::DatabaseError;
use crate::form::model::FormData;
use crate::lead::{Lead, NewLead};
use crate::session::Session;
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format for timestamps.
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<String>` to libsql Value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Map a unique-index violation to `Constraint`, anything else to `Query`.
fn classify_write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

/// Map a libsql Row to a Lead. Column order matches LEAD_COLUMNS.
fn row_to_lead(row: &libsql::Row) -> Result<Lead, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("row_to_lead: {e}"));

    let id_str: String = row.get(0).map_err(read)?;
    let enrichment_str: Option<String> = row.get(10).ok();
    let created_str: String = row.get(11).map_err(read)?;
    let updated_str: String = row.get(12).map_err(read)?;

    let enrichment_data = match enrichment_str {
        Some(s) => Some(
            serde_json::from_str::<VerificationResult>(&s)
                .map_err(|e| DatabaseError::Serialization(format!("lead enrichment_data: {e}")))?,
        ),
        None => None,
    };

    Ok(Lead {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Serialization(format!("lead id: {e}")))?,
        data: NewLead {
            first_name: row.get(1).map_err(read)?,
            last_name: row.get(2).map_err(read)?,
            email: row.get(3).map_err(read)?,
            phone: row.get(4).map_err(read)?,
            business_name: row.get(5).map_err(read)?,
            tin: row.get(6).map_err(read)?,
            zip_code: row.get(7).map_err(read)?,
            monthly_revenue: row.get(8).map_err(read)?,
            years_in_business: row.get(9).map_err(read)?,
            enrichment_data,
        },
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a Session. Column order matches SESSION_COLUMNS.
fn row_to_session(row: &libsql::Row) -> Result<Session, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("row_to_session: {e}"));

    let form_str: String = row.get(1).map_err(read)?;
    let form_data: FormData = serde_json::from_str(&form_str)
        .map_err(|e| DatabaseError::Serialization(format!("session form_data: {e}")))?;
    let created_str: String = row.get(2).map_err(read)?;
    let updated_str: String = row.get(3).map_err(read)?;
    let expires_str: String = row.get(4).map_err(read)?;

    Ok(Session {
        session_id: row.get(0).map_err(read)?,
        form_data,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        expires_at: parse_datetime(&expires_str),
    })
}

fn form_data_json(session: &Session) -> Result<String, DatabaseError> {
    serde_json::to_string(&session.form_data)
        .map_err(|e| DatabaseError::Serialization(format!("session form_data: {e}")))
}

// ── Trait implementation ────────────────────────────────────────────

const LEAD_COLUMNS: &str = "id, first_name, last_name, email, phone, business_name, tin, zip_code, monthly_revenue, years_in_business, enrichment_data, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, form_data, created_at, updated_at, expires_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Leads ───────────────────────────────────────────────────────

    async fn insert_lead(&self, lead: NewLead) -> Result<Lead, DatabaseError> {
        let lead = Lead::new(lead);
        let enrichment_json = match &lead.data.enrichment_data {
            Some(data) => Some(serde_json::to_string(data).map_err(|e| {
                DatabaseError::Serialization(format!("lead enrichment_data: {e}"))
            })?),
            None => None,
        };
        let d = &lead.data;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO leads ({LEAD_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    lead.id.to_string(),
                    d.first_name.clone(),
                    d.last_name.clone(),
                    d.email.clone(),
                    d.phone.clone(),
                    d.business_name.clone(),
                    d.tin.clone(),
                    d.zip_code.clone(),
                    d.monthly_revenue,
                    d.years_in_business,
                    opt_text(enrichment_json),
                    fmt_datetime(&lead.created_at),
                    fmt_datetime(&lead.updated_at),
                ],
            )
            .await
            .map_err(|e| classify_write_error("insert_lead", e))?;

        debug!(lead_id = %lead.id, "Lead inserted into DB");
        Ok(lead)
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_lead: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_lead(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_lead: {e}"))),
        }
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn insert_session(&self, session: &Session) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                params![
                    session.session_id.clone(),
                    form_data_json(session)?,
                    fmt_datetime(&session.created_at),
                    fmt_datetime(&session.updated_at),
                    fmt_datetime(&session.expires_at),
                ],
            )
            .await
            .map_err(|e| classify_write_error("insert_session", e))?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_session: {e}"))),
        }
    }

    async fn update_session(
        &self,
        session: &Session,
        read_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE sessions SET form_data = ?1, updated_at = ?2
                 WHERE id = ?3 AND expires_at > ?4 AND updated_at = ?5",
                params![
                    form_data_json(session)?,
                    fmt_datetime(&session.updated_at),
                    session.session_id.clone(),
                    fmt_datetime(&now),
                    fmt_datetime(&read_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_session: {e}")))?;
        Ok(affected > 0)
    }

    async fn delete_session(
        &self,
        id: &str,
        read_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM sessions
                 WHERE id = ?1 AND expires_at > ?2 AND (?3 IS NULL OR updated_at = ?3)",
                params![
                    id,
                    fmt_datetime(&now),
                    opt_text(read_at.as_ref().map(fmt_datetime)),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_session: {e}")))?;
        Ok(affected > 0)
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![fmt_datetime(&now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("purge_expired_sessions: {e}")))?;
        Ok(affected as usize)
    }
}
