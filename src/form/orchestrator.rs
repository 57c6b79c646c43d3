//! FormOrchestrator: coordinates step transitions, validation, the
//! enrichment trigger, and final submission.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::model::{BusinessInfo, FinancialInfo, FormFields, PersonalInfo};
use super::state::FormStep;
use super::validate;
use crate::enrichment::{EnrichmentProvider, VerificationResult};
use crate::error::{DatabaseError, EnrichmentError, Result, SessionError, SubmissionError};
use crate::lead::{Lead, LeadPayload, NewLead};
use crate::session::{MAX_WRITE_ATTEMPTS, Session, SessionStore};
use crate::store::Database;

const ENRICHMENT_PENDING_WARNING: &str =
    "Business verification has not completed; you can continue without it";

/// Result of a successful step 1 or step 2 submission.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub session: Session,
    /// Non-fatal notices for the user (e.g. enrichment unavailable).
    pub warnings: Vec<String>,
}

/// Result of a generic field update.
#[derive(Debug, Clone, Serialize)]
pub struct FieldUpdate {
    pub session: Session,
    pub enrichment_triggered: bool,
}

/// What happened to an enrichment result once it came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Stored,
    /// The session's business inputs moved on while the call was in flight.
    Stale,
    SessionGone,
}

/// Per-session "enriching" flag. Cleared on drop.
struct EnrichmentGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl Drop for EnrichmentGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.session_id);
    }
}

/// Coordinates the merchant form workflow over the session store, the lead
/// table, and the enrichment provider.
#[derive(Clone)]
pub struct FormOrchestrator {
    sessions: SessionStore,
    db: Arc<dyn Database>,
    enrichment: Arc<dyn EnrichmentProvider>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl FormOrchestrator {
    pub fn new(
        sessions: SessionStore,
        db: Arc<dyn Database>,
        enrichment: Arc<dyn EnrichmentProvider>,
    ) -> Self {
        Self {
            sessions,
            db,
            enrichment,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    // ── Session passthrough ─────────────────────────────────────────

    pub async fn create_session(&self) -> Result<Session> {
        Ok(self.sessions.create().await?)
    }

    pub async fn get_session(&self, id: &str) -> Result<Session> {
        Ok(self.sessions.get(id).await?)
    }

    /// Delete a session. Missing or expired sessions are `NotFound`.
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        if self.sessions.delete(id).await? {
            Ok(())
        } else {
            Err(SessionError::NotFound { id: id.to_string() }.into())
        }
    }

    /// Merge arbitrary user fields (the autosave path), then run the
    /// enrichment trigger.
    pub async fn update_fields(&self, id: &str, fields: &FormFields) -> Result<FieldUpdate> {
        let session = self.sessions.update(id, fields).await?;
        let enrichment_triggered = self.maybe_trigger_enrichment(&session);
        Ok(FieldUpdate {
            session,
            enrichment_triggered,
        })
    }

    // ── Step transitions ────────────────────────────────────────────

    /// Step 1 → 2.
    pub async fn submit_personal(&self, id: &str, input: &PersonalInfo) -> Result<StepOutcome> {
        let (session, ()) = self
            .sessions
            .modify(id, |s| -> Result<()> {
                s.form_data.complete_step(FormStep::Personal)?;
                let info = validate::validate_personal(input)?;
                s.form_data.merge(&info.into());
                Ok(())
            })
            .await?;
        step_completed(&session, FormStep::Personal);
        self.maybe_trigger_enrichment(&session);

        Ok(StepOutcome {
            session,
            warnings: Vec::new(),
        })
    }

    /// Step 2 → 3. Never waits on enrichment.
    pub async fn submit_business(&self, id: &str, input: &BusinessInfo) -> Result<StepOutcome> {
        let (session, ()) = self
            .sessions
            .modify(id, |s| -> Result<()> {
                s.form_data.complete_step(FormStep::Business)?;
                let info = validate::validate_business(input)?;
                s.form_data.merge(&info.into());
                Ok(())
            })
            .await?;
        step_completed(&session, FormStep::Business);
        self.maybe_trigger_enrichment(&session);

        let mut warnings = Vec::new();
        if session.form_data.enrichment_data.is_none() {
            let warning = session
                .form_data
                .enrichment_warning
                .clone()
                .unwrap_or_else(|| ENRICHMENT_PENDING_WARNING.to_string());
            warnings.push(warning);
        }

        Ok(StepOutcome { session, warnings })
    }

    /// Step 3 → Submitted: records the financials, creates the lead and
    /// deletes the session.
    ///
    /// If the insert fails, the session keeps step 3 completed so the user
    /// can retry through `submit_session`.
    pub async fn submit_financial(&self, id: &str, input: &FinancialInfo) -> Result<Lead> {
        let (session, ()) = self
            .sessions
            .modify(id, |s| -> Result<()> {
                s.form_data.complete_step(FormStep::Financial)?;
                let financials = validate::validate_financial(input)?;
                s.form_data.merge(&financials.into());
                Ok(())
            })
            .await?;
        step_completed(&session, FormStep::Financial);

        self.finalize(session).await
    }

    /// "Back": move the step pointer one step back. No validation.
    pub async fn back(&self, id: &str) -> Result<Session> {
        let (session, moved) = self
            .sessions
            .modify(id, |s| -> Result<Option<FormStep>> { Ok(s.form_data.step_back()?) })
            .await?;
        if let Some(to) = moved {
            debug!(session_id = id, to = %to, "Stepped back");
        }
        Ok(session)
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Finalize from the stored session. All steps must be completed.
    pub async fn submit_session(&self, id: &str) -> Result<Lead> {
        let session = self.sessions.get(id).await?;
        self.finalize(session).await
    }

    /// Create a lead directly from a full payload.
    pub async fn create_lead(&self, payload: LeadPayload) -> Result<Lead> {
        let new_lead = NewLead::from_fields(&payload.fields, payload.enrichment_data)
            .map_err(SubmissionError::Invalid)?;
        let lead = self.insert_lead(new_lead).await?;
        info!(lead_id = %lead.id, "Lead created");
        Ok(lead)
    }

    pub async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>> {
        Ok(self.db.get_lead(id).await?)
    }

    /// Claim the session, then store the lead. Exactly one concurrent
    /// caller wins the claim; the rest see `NotFound`. A failed insert puts
    /// the session back.
    async fn finalize(&self, mut session: Session) -> Result<Lead> {
        let mut attempt = 1;
        let new_lead = loop {
            let missing = session.form_data.completed_steps.missing();
            if !missing.is_empty() {
                return Err(SubmissionError::Incomplete { missing }.into());
            }
            let new_lead = NewLead::from_fields(
                &session.form_data.fields,
                session.form_data.enrichment_data.clone(),
            )
            .map_err(SubmissionError::Invalid)?;

            match self.sessions.claim(&session).await {
                Ok(()) => break new_lead,
                Err(SessionError::Conflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(
                        session_id = %session.session_id,
                        attempt,
                        "Session changed before submission, re-reading"
                    );
                    attempt += 1;
                    session = self.sessions.get(&session.session_id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let lead = match self.insert_lead(new_lead).await {
            Ok(lead) => lead,
            Err(e) => {
                if let Err(restore) = self.sessions.restore(&session).await {
                    error!(
                        session_id = %session.session_id,
                        error = %restore,
                        "Lead insert failed and session could not be restored"
                    );
                }
                return Err(e.into());
            }
        };

        info!(
            session_id = %session.session_id,
            lead_id = %lead.id,
            enriched = lead.data.enrichment_data.is_some(),
            "Lead submitted"
        );
        Ok(lead)
    }

    async fn insert_lead(&self, lead: NewLead) -> std::result::Result<Lead, SubmissionError> {
        let email = lead.email.clone();
        let business_name = lead.business_name.clone();
        self.db.insert_lead(lead).await.map_err(|e| match e {
            DatabaseError::Constraint(_) => SubmissionError::Duplicate {
                email,
                business_name,
            },
            other => SubmissionError::Storage(other),
        })
    }

    // ── Enrichment ──────────────────────────────────────────────────

    fn try_acquire(&self, session_id: &str) -> Option<EnrichmentGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(session_id.to_string()) {
            return None;
        }
        Some(EnrichmentGuard {
            in_flight: Arc::clone(&self.in_flight),
            session_id: session_id.to_string(),
        })
    }

    /// Whether an enrichment call is running for this session.
    pub fn is_enriching(&self, session_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(session_id)
    }

    /// Spawn a background enrichment if the session has a business name and
    /// a valid ZIP, no matching data yet, and nothing in flight.
    ///
    /// Returns `true` when a task was spawned.
    pub fn maybe_trigger_enrichment(&self, session: &Session) -> bool {
        let Some((business_name, zip_code)) = session.form_data.enrichment_inputs() else {
            return false;
        };
        if session
            .form_data
            .has_enrichment_for(&business_name, &zip_code)
        {
            return false;
        }
        let Some(guard) = self.try_acquire(&session.session_id) else {
            debug!(session_id = %session.session_id, "Enrichment already in flight, skipping");
            return false;
        };

        let this = self.clone();
        let session_id = session.session_id.clone();
        info!(
            session_id = %session_id,
            business_name = %business_name,
            provider = this.enrichment.name(),
            "Enrichment triggered"
        );
        tokio::spawn(async move {
            this.run_enrichment(guard, session_id, business_name, zip_code)
                .await;
        });
        true
    }

    async fn run_enrichment(
        &self,
        guard: EnrichmentGuard,
        session_id: String,
        business_name: String,
        zip_code: String,
    ) {
        let result = self.enrichment.enrich(&business_name, &zip_code).await;
        let applied = self
            .apply_enrichment(&session_id, &business_name, &zip_code, result.as_ref())
            .await;
        drop(guard);

        match applied {
            Ok(Applied::Stale) => self.retrigger(&session_id).await,
            Ok(_) => {}
            Err(e) => warn!(session_id = %session_id, error = %e, "Failed to store enrichment result"),
        }
    }

    /// Explicit enrichment call (`POST /enrichment`). Waits for the result.
    pub async fn enrich_now(
        &self,
        session_id: &str,
        business_name: &str,
        zip_code: &str,
    ) -> Result<VerificationResult> {
        let business_name = business_name.trim();
        let zip_code = zip_code.trim();
        if business_name.is_empty() || zip_code.is_empty() {
            return Err(EnrichmentError::MissingInput {
                business_name: !business_name.is_empty(),
                zip_code: !zip_code.is_empty(),
            }
            .into());
        }

        self.sessions.get(session_id).await?;
        let guard = self
            .try_acquire(session_id)
            .ok_or_else(|| EnrichmentError::InProgress {
                session_id: session_id.to_string(),
            })?;

        let result = self.enrichment.enrich(business_name, zip_code).await;
        let applied = self
            .apply_enrichment(session_id, business_name, zip_code, result.as_ref())
            .await;
        drop(guard);

        match applied {
            Ok(Applied::Stale) => self.retrigger(session_id).await,
            Ok(_) => {}
            Err(e) => warn!(session_id = session_id, error = %e, "Failed to store enrichment result"),
        }

        Ok(result?)
    }

    /// Store an enrichment outcome on the session if it is still relevant.
    ///
    /// Relevant means the session exists and its business name and ZIP are
    /// either unset or equal to the inputs the call was made with.
    async fn apply_enrichment(
        &self,
        session_id: &str,
        business_name: &str,
        zip_code: &str,
        result: std::result::Result<&VerificationResult, &EnrichmentError>,
    ) -> std::result::Result<Applied, SessionError> {
        let outcome = self
            .sessions
            .modify(session_id, |session| -> std::result::Result<Applied, SessionError> {
                let fields = &session.form_data.fields;
                let same = |current: &Option<String>, used: &str| {
                    current.as_deref().is_none_or(|c| c.trim() == used)
                };
                if !same(&fields.business_name, business_name) || !same(&fields.zip_code, zip_code)
                {
                    return Ok(Applied::Stale);
                }

                match result {
                    Ok(data) => {
                        session.form_data.enrichment_data = Some(data.clone());
                        session.form_data.enrichment_warning = None;
                    }
                    Err(e) => {
                        session.form_data.enrichment_warning = Some(e.to_string());
                    }
                }
                Ok(Applied::Stored)
            })
            .await;

        match outcome {
            Ok((_, Applied::Stale)) => {
                debug!(session_id = session_id, "Business inputs changed, dropping stale enrichment");
                Ok(Applied::Stale)
            }
            Ok((_, applied)) => {
                info!(
                    session_id = session_id,
                    success = result.is_ok(),
                    "Enrichment result stored"
                );
                Ok(applied)
            }
            Err(SessionError::NotFound { .. }) => {
                debug!(session_id = session_id, "Session gone, dropping enrichment result");
                Ok(Applied::SessionGone)
            }
            Err(e) => Err(e),
        }
    }

    async fn retrigger(&self, session_id: &str) {
        if let Ok(session) = self.sessions.get(session_id).await {
            self.maybe_trigger_enrichment(&session);
        }
    }
}

fn step_completed(session: &Session, step: FormStep) {
    info!(
        session_id = %session.session_id,
        step = step.number(),
        "Form step completed"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};

    use super::*;
    use crate::error::{Error, FormError};
    use crate::store::LibSqlBackend;

    /// Deterministic provider: fixed delay, echoes inputs, optional failure.
    struct StubProvider {
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                delay,
                fail,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EnrichmentProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn enrich(
            &self,
            business_name: &str,
            zip_code: &str,
        ) -> std::result::Result<VerificationResult, EnrichmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(EnrichmentError::Unavailable {
                    reason: "stub failure".into(),
                });
            }
            Ok(VerificationResult {
                business_name: business_name.into(),
                zip_code: zip_code.into(),
                verified: true,
                business_start_date: NaiveDate::from_ymd_opt(2014, 2, 3).unwrap(),
                sos_status: "Active".into(),
                industry_code: "722511".into(),
                naics_code: "722511".into(),
                business_address: None,
                additional_data: None,
            })
        }
    }

    /// Backend whose second session read stalls after reading, so the
    /// caller acts on a snapshot that goes stale in the meantime.
    struct SlowReads {
        inner: LibSqlBackend,
        reads: AtomicUsize,
        stall: Duration,
    }

    #[async_trait]
    impl Database for SlowReads {
        async fn run_migrations(&self) -> std::result::Result<(), DatabaseError> {
            self.inner.run_migrations().await
        }

        async fn insert_lead(&self, lead: NewLead) -> std::result::Result<Lead, DatabaseError> {
            self.inner.insert_lead(lead).await
        }

        async fn get_lead(&self, id: Uuid) -> std::result::Result<Option<Lead>, DatabaseError> {
            self.inner.get_lead(id).await
        }

        async fn insert_session(&self, session: &Session) -> std::result::Result<(), DatabaseError> {
            self.inner.insert_session(session).await
        }

        async fn get_session(
            &self,
            id: &str,
        ) -> std::result::Result<Option<Session>, DatabaseError> {
            let snapshot = self.inner.get_session(id).await;
            if self.reads.fetch_add(1, Ordering::SeqCst) == 1 {
                tokio::time::sleep(self.stall).await;
            }
            snapshot
        }

        async fn update_session(
            &self,
            session: &Session,
            read_at: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> std::result::Result<bool, DatabaseError> {
            self.inner.update_session(session, read_at, now).await
        }

        async fn delete_session(
            &self,
            id: &str,
            read_at: Option<DateTime<Utc>>,
            now: DateTime<Utc>,
        ) -> std::result::Result<bool, DatabaseError> {
            self.inner.delete_session(id, read_at, now).await
        }

        async fn purge_expired_sessions(
            &self,
            now: DateTime<Utc>,
        ) -> std::result::Result<usize, DatabaseError> {
            self.inner.purge_expired_sessions(now).await
        }
    }

    async fn orchestrator_on(db: Arc<dyn Database>, provider: Arc<StubProvider>) -> FormOrchestrator {
        let sessions = SessionStore::new(Arc::clone(&db), chrono::Duration::hours(24));
        FormOrchestrator::new(sessions, db, provider)
    }

    async fn orchestrator(provider: Arc<StubProvider>) -> FormOrchestrator {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        orchestrator_on(db, provider).await
    }

    fn personal() -> PersonalInfo {
        PersonalInfo {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            phone: "+1 415 555 0100".into(),
        }
    }

    fn business(zip: &str) -> BusinessInfo {
        BusinessInfo {
            business_name: "Acme LLC".into(),
            tin: "12-3456789".into(),
            zip_code: zip.into(),
        }
    }

    fn financial() -> FinancialInfo {
        FinancialInfo {
            monthly_revenue: Some(40_000.0),
            years_in_business: Some(6.0),
        }
    }

    /// Poll the session until `pred` holds or two seconds pass.
    async fn wait_for(
        orch: &FormOrchestrator,
        id: &str,
        pred: impl Fn(&Session) -> bool,
    ) -> Session {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let session = orch.get_session(id).await.unwrap();
                if pred(&session) && !orch.is_enriching(id) {
                    return session;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time")
    }

    #[tokio::test]
    async fn full_flow_creates_lead_and_deletes_session() {
        let provider = StubProvider::new(Duration::ZERO, false);
        let orch = orchestrator(Arc::clone(&provider)).await;
        let id = orch.create_session().await.unwrap().session_id;

        let out = orch.submit_personal(&id, &personal()).await.unwrap();
        assert_eq!(out.session.form_data.current_step, FormStep::Business);
        assert!(out.session.form_data.completed_steps.step1);

        orch.submit_business(&id, &business("94107")).await.unwrap();
        let session = wait_for(&orch, &id, |s| s.form_data.enrichment_data.is_some()).await;
        assert_eq!(session.form_data.current_step, FormStep::Financial);
        assert_eq!(session.form_data.fields.tin.as_deref(), Some("123456789"));

        let lead = orch.submit_financial(&id, &financial()).await.unwrap();
        assert_eq!(lead.data.email, "ada@example.com");
        assert_eq!(lead.data.monthly_revenue, 40_000.0);
        assert_eq!(
            lead.data.enrichment_data.as_ref().map(|d| d.sos_status.as_str()),
            Some("Active")
        );

        let err = orch.get_session(&id).await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::NotFound { .. })));
        assert_eq!(orch.get_lead(lead.id).await.unwrap().unwrap(), lead);
    }

    #[tokio::test]
    async fn invalid_personal_info_is_rejected_per_field() {
        let orch = orchestrator(StubProvider::new(Duration::ZERO, false)).await;
        let id = orch.create_session().await.unwrap().session_id;

        let input = PersonalInfo {
            email: "nope".into(),
            phone: "12".into(),
            ..personal()
        };
        let err = orch.submit_personal(&id, &input).await.unwrap_err();
        match err {
            Error::Validation(errors) => {
                assert_eq!(errors.fields.len(), 2);
                assert!(errors.message_for("email").is_some());
                assert!(errors.message_for("phone").is_some());
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let session = orch.get_session(&id).await.unwrap();
        assert!(!session.form_data.completed_steps.step1);
        assert!(session.form_data.fields.email.is_none());
    }

    #[tokio::test]
    async fn steps_cannot_be_skipped() {
        let orch = orchestrator(StubProvider::new(Duration::ZERO, false)).await;
        let id = orch.create_session().await.unwrap().session_id;

        let err = orch.submit_business(&id, &business("94107")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Form(FormError::OutOfOrder { step: 2, .. })
        ));

        orch.submit_personal(&id, &personal()).await.unwrap();
        let err = orch.submit_financial(&id, &financial()).await.unwrap_err();
        match err {
            Error::Form(FormError::OutOfOrder { step, missing }) => {
                assert_eq!(step, 3);
                assert_eq!(missing, vec!["step2"]);
            }
            other => panic!("expected out-of-order, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn enrichment_failure_does_not_block_progress() {
        let provider = StubProvider::new(Duration::ZERO, true);
        let orch = orchestrator(Arc::clone(&provider)).await;
        let id = orch.create_session().await.unwrap().session_id;

        orch.submit_personal(&id, &personal()).await.unwrap();
        let out = orch.submit_business(&id, &business("94107")).await.unwrap();
        assert!(out.session.form_data.completed_steps.step2);
        assert_eq!(out.warnings.len(), 1);

        let session = wait_for(&orch, &id, |s| s.form_data.enrichment_warning.is_some()).await;
        assert!(session.form_data.enrichment_data.is_none());

        let lead = orch.submit_financial(&id, &financial()).await.unwrap();
        assert!(lead.data.enrichment_data.is_none());
    }

    #[tokio::test]
    async fn field_update_triggers_enrichment_once() {
        let provider = StubProvider::new(Duration::from_millis(100), false);
        let orch = orchestrator(Arc::clone(&provider)).await;
        let id = orch.create_session().await.unwrap().session_id;

        let only_name = FormFields {
            business_name: Some("Acme LLC".into()),
            ..Default::default()
        };
        assert!(!orch.update_fields(&id, &only_name).await.unwrap().enrichment_triggered);

        let with_zip = FormFields {
            zip_code: Some("94107".into()),
            ..Default::default()
        };
        assert!(orch.update_fields(&id, &with_zip).await.unwrap().enrichment_triggered);

        // In flight: a second trigger is skipped
        let again = FormFields {
            first_name: Some("Ada".into()),
            ..Default::default()
        };
        assert!(!orch.update_fields(&id, &again).await.unwrap().enrichment_triggered);

        let session = wait_for(&orch, &id, |s| s.form_data.enrichment_data.is_some()).await;
        assert!(session.form_data.has_enrichment_for("Acme LLC", "94107"));
        assert_eq!(provider.calls(), 1);

        // Already enriched for these inputs
        assert!(!orch.update_fields(&id, &again).await.unwrap().enrichment_triggered);
    }

    #[tokio::test]
    async fn stale_result_is_dropped_and_rerun() {
        let provider = StubProvider::new(Duration::from_millis(150), false);
        let orch = orchestrator(Arc::clone(&provider)).await;
        let id = orch.create_session().await.unwrap().session_id;

        let first = FormFields {
            business_name: Some("Acme LLC".into()),
            zip_code: Some("94107".into()),
            ..Default::default()
        };
        assert!(orch.update_fields(&id, &first).await.unwrap().enrichment_triggered);

        let moved = FormFields {
            zip_code: Some("10001".into()),
            ..Default::default()
        };
        orch.update_fields(&id, &moved).await.unwrap();

        let session = wait_for(&orch, &id, |s| s.form_data.enrichment_data.is_some()).await;
        let data = session.form_data.enrichment_data.unwrap();
        assert_eq!(data.zip_code, "10001");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn user_edit_survives_enrichment_on_a_stale_read() {
        let db = Arc::new(SlowReads {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            reads: AtomicUsize::new(0),
            stall: Duration::from_millis(300),
        });
        let provider = StubProvider::new(Duration::ZERO, false);
        let orch = orchestrator_on(db, Arc::clone(&provider)).await;
        let id = orch.create_session().await.unwrap().session_id;

        // Read #1 is this update; read #2 is the enrichment task's re-read,
        // which stalls while the user changes the ZIP.
        let first = FormFields {
            business_name: Some("Acme LLC".into()),
            zip_code: Some("94107".into()),
            ..Default::default()
        };
        assert!(orch.update_fields(&id, &first).await.unwrap().enrichment_triggered);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let moved = FormFields {
            zip_code: Some("10001".into()),
            ..Default::default()
        };
        orch.update_fields(&id, &moved).await.unwrap();

        let session = wait_for(&orch, &id, |s| {
            s.form_data
                .enrichment_data
                .as_ref()
                .is_some_and(|d| d.zip_code == "10001")
        })
        .await;
        assert_eq!(session.form_data.fields.zip_code.as_deref(), Some("10001"));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn replaying_an_earlier_step_is_rejected() {
        let orch = orchestrator(StubProvider::new(Duration::ZERO, false)).await;
        let id = orch.create_session().await.unwrap().session_id;
        orch.submit_personal(&id, &personal()).await.unwrap();

        let input = PersonalInfo {
            first_name: "Grace".into(),
            ..personal()
        };
        let err = orch.submit_personal(&id, &input).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Form(FormError::InvalidTransition { from: 2, to: 2 })
        ));

        let session = orch.get_session(&id).await.unwrap();
        assert_eq!(session.form_data.fields.first_name.as_deref(), Some("Ada"));
        assert_eq!(session.form_data.current_step, FormStep::Business);
    }

    #[tokio::test]
    async fn concurrent_submissions_create_one_lead() {
        let orch = orchestrator(StubProvider::new(Duration::ZERO, true)).await;
        let id = orch.create_session().await.unwrap().session_id;
        orch.submit_personal(&id, &personal()).await.unwrap();
        orch.submit_business(&id, &business("94107")).await.unwrap();
        wait_for(&orch, &id, |s| s.form_data.enrichment_warning.is_some()).await;
        orch.sessions
            .modify(&id, |s| -> Result<()> {
                s.form_data.complete_step(FormStep::Financial)?;
                s.form_data.merge(&FormFields {
                    monthly_revenue: Some(40_000.0),
                    years_in_business: Some(6.0),
                    ..Default::default()
                });
                Ok(())
            })
            .await
            .unwrap();

        let (a, b) = tokio::join!(orch.submit_session(&id), orch.submit_session(&id));
        let (won, lost) = match (a, b) {
            (Ok(lead), Err(e)) | (Err(e), Ok(lead)) => (lead, e),
            other => panic!("expected exactly one winner, got {other:?}"),
        };
        assert!(matches!(lost, Error::Session(SessionError::NotFound { .. })));
        assert_eq!(orch.get_lead(won.id).await.unwrap().unwrap(), won);
        assert!(orch.get_session(&id).await.is_err());
    }

    #[tokio::test]
    async fn explicit_enrichment_rejects_concurrent_call() {
        let provider = StubProvider::new(Duration::from_millis(200), false);
        let orch = orchestrator(Arc::clone(&provider)).await;
        let id = orch.create_session().await.unwrap().session_id;

        let first = {
            let orch = orch.clone();
            let id = id.clone();
            tokio::spawn(async move { orch.enrich_now(&id, "Acme LLC", "94107").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = orch.enrich_now(&id, "Acme LLC", "94107").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Enrichment(EnrichmentError::InProgress { .. })
        ));

        let data = first.await.unwrap().unwrap();
        assert_eq!(data.business_name, "Acme LLC");
        let session = orch.get_session(&id).await.unwrap();
        assert_eq!(session.form_data.enrichment_data, Some(data));
        assert!(!orch.is_enriching(&id));
    }

    #[tokio::test]
    async fn explicit_enrichment_validates_input_and_session() {
        let orch = orchestrator(StubProvider::new(Duration::ZERO, false)).await;

        let err = orch.enrich_now("whatever", "", "94107").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Enrichment(EnrichmentError::MissingInput {
                business_name: false,
                zip_code: true
            })
        ));

        let err = orch.enrich_now("missing", "Acme LLC", "94107").await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::NotFound { .. })));
    }

    #[tokio::test]
    async fn explicit_enrichment_failure_is_recorded_as_warning() {
        let orch = orchestrator(StubProvider::new(Duration::ZERO, true)).await;
        let id = orch.create_session().await.unwrap().session_id;

        let err = orch.enrich_now(&id, "Acme LLC", "94107").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Enrichment(EnrichmentError::Unavailable { .. })
        ));
        let session = orch.get_session(&id).await.unwrap();
        assert!(session.form_data.enrichment_warning.is_some());
    }

    #[tokio::test]
    async fn second_submission_is_not_found() {
        let orch = orchestrator(StubProvider::new(Duration::ZERO, false)).await;
        let id = orch.create_session().await.unwrap().session_id;

        orch.submit_personal(&id, &personal()).await.unwrap();
        orch.submit_business(&id, &business("94107")).await.unwrap();
        wait_for(&orch, &id, |s| s.form_data.enrichment_data.is_some()).await;
        orch.submit_financial(&id, &financial()).await.unwrap();

        let err = orch.submit_session(&id).await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::NotFound { .. })));
    }

    #[tokio::test]
    async fn submit_session_requires_all_steps() {
        let orch = orchestrator(StubProvider::new(Duration::ZERO, false)).await;
        let id = orch.create_session().await.unwrap().session_id;
        orch.submit_personal(&id, &personal()).await.unwrap();

        let err = orch.submit_session(&id).await.unwrap_err();
        match err {
            Error::Submission(SubmissionError::Incomplete { missing }) => {
                assert_eq!(missing, vec!["step2", "step3"]);
            }
            other => panic!("expected incomplete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_lead_keeps_session_for_retry() {
        let orch = orchestrator(StubProvider::new(Duration::ZERO, true)).await;

        let payload = LeadPayload {
            fields: FormFields {
                first_name: Some("Ada".into()),
                last_name: Some("Lovelace".into()),
                email: Some("ada@example.com".into()),
                phone: Some("4155550100".into()),
                business_name: Some("Acme LLC".into()),
                tin: Some("123456789".into()),
                zip_code: Some("94107".into()),
                monthly_revenue: Some(1_000.0),
                years_in_business: Some(1.0),
            },
            enrichment_data: None,
        };
        orch.create_lead(payload).await.unwrap();

        let id = orch.create_session().await.unwrap().session_id;
        orch.submit_personal(&id, &personal()).await.unwrap();
        orch.submit_business(&id, &business("94107")).await.unwrap();
        wait_for(&orch, &id, |s| s.form_data.enrichment_warning.is_some()).await;

        let err = orch.submit_financial(&id, &financial()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Submission(SubmissionError::Duplicate { .. })
        ));

        let session = orch.get_session(&id).await.unwrap();
        assert!(session.form_data.completed_steps.all_completed());
    }

    #[tokio::test]
    async fn back_moves_pointer_only() {
        let orch = orchestrator(StubProvider::new(Duration::ZERO, false)).await;
        let id = orch.create_session().await.unwrap().session_id;

        // No-op at step 1
        let session = orch.back(&id).await.unwrap();
        assert_eq!(session.form_data.current_step, FormStep::Personal);

        orch.submit_personal(&id, &personal()).await.unwrap();
        let session = orch.back(&id).await.unwrap();
        assert_eq!(session.form_data.current_step, FormStep::Personal);
        assert!(session.form_data.completed_steps.step1);
        assert_eq!(session.form_data.fields.first_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn delete_unknown_session_is_not_found() {
        let orch = orchestrator(StubProvider::new(Duration::ZERO, false)).await;
        let err = orch.delete_session("nope").await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::NotFound { .. })));
    }
}
