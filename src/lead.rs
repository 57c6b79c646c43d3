//! Lead records: the finalized, immutable output of a completed form.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enrichment::VerificationResult;
use crate::error::ValidationErrors;
use crate::form::model::FormFields;
use crate::form::validate;

/// A fully validated lead, ready to insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLead {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub business_name: String,
    pub tin: String,
    pub zip_code: String,
    pub monthly_revenue: f64,
    pub years_in_business: f64,
    pub enrichment_data: Option<VerificationResult>,
}

impl NewLead {
    /// Build from accumulated form fields, re-running every step's checks.
    ///
    /// Failures from all steps are collected together.
    pub fn from_fields(
        fields: &FormFields,
        enrichment_data: Option<VerificationResult>,
    ) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let personal = validate::validate_personal(&fields.personal())
            .map_err(|e| errors.fields.extend(e.fields))
            .ok();
        let business = validate::validate_business(&fields.business())
            .map_err(|e| errors.fields.extend(e.fields))
            .ok();
        let financial = validate::validate_financial(&fields.financial())
            .map_err(|e| errors.fields.extend(e.fields))
            .ok();

        match (personal, business, financial) {
            (Some(p), Some(b), Some(f)) => Ok(Self {
                first_name: p.first_name,
                last_name: p.last_name,
                email: p.email,
                phone: p.phone,
                business_name: b.business_name,
                tin: b.tin,
                zip_code: b.zip_code,
                monthly_revenue: f.monthly_revenue,
                years_in_business: f.years_in_business,
                enrichment_data,
            }),
            _ => Err(errors),
        }
    }
}

/// Body of `POST /leads`: the whole form in one payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadPayload {
    #[serde(flatten)]
    pub fields: FormFields,
    #[serde(default)]
    pub enrichment_data: Option<VerificationResult>,
}

/// A stored lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    #[serde(flatten)]
    pub data: NewLead,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(data: NewLead) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        Self {
            id: Uuid::new_v4(),
            data,
            created_at: now,
            updated_at: now,
        }
    }
}
