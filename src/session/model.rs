//! Session record.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::form::model::FormData;

/// Server-side form state addressed by an opaque, unguessable ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub form_data: FormData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Fixed at creation, never extended.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(ttl: Duration) -> Self {
        // Stored timestamps carry microseconds.
        let now = Utc::now().trunc_subsecs(6);
        Self {
            session_id: Uuid::new_v4().to_string(),
            form_data: FormData::default(),
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::state::FormStep;

    #[test]
    fn new_session_starts_at_step_one() {
        let session = Session::new(Duration::hours(24));
        assert!(Uuid::parse_str(&session.session_id).is_ok());
        assert_eq!(session.form_data.current_step, FormStep::Personal);
        assert_eq!(session.expires_at - session.created_at, Duration::hours(24));
        assert!(!session.is_expired());
    }

    #[test]
    fn zero_ttl_is_expired_immediately() {
        let session = Session::new(Duration::zero());
        assert!(session.is_expired());
    }

    #[test]
    fn ids_are_unique() {
        let a = Session::new(Duration::hours(1));
        let b = Session::new(Duration::hours(1));
        assert_ne!(a.session_id, b.session_id);
    }
}
