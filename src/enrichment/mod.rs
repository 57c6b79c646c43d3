//! Business verification enrichment.
//!
//! The upstream verification API is simulated: `SimulatedEnrichment` adds
//! latency and a fixed failure rate, and returns synthetic records. Callers
//! depend on the `EnrichmentProvider` trait so tests can swap in a
//! deterministic provider.

pub mod simulator;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::EnrichmentError;

pub use simulator::{SimulatedEnrichment, SimulatorConfig};

/// Verification record returned by the enrichment source.
///
/// Echoes the inputs it was produced for, so a stored record can be checked
/// against the session's current business fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub business_name: String,
    pub zip_code: String,
    #[serde(default)]
    pub verified: bool,
    pub business_start_date: NaiveDate,
    pub sos_status: String,
    pub industry_code: String,
    pub naics_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_address: Option<BusinessAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<AdditionalData>,
}

/// Registered address on file for the business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

/// Coarse firmographics. Ranges are display strings, e.g. `"12-140"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalData {
    pub employee_count_range: String,
    pub revenue_range: String,
    pub credit_score_range: String,
}

impl VerificationResult {
    /// Whether this record was produced for the given inputs.
    pub fn matches(&self, business_name: &str, zip_code: &str) -> bool {
        self.business_name == business_name && self.zip_code == zip_code
    }
}

/// A source of business verification data.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Look up verification data for a business.
    async fn enrich(
        &self,
        business_name: &str,
        zip_code: &str,
    ) -> Result<VerificationResult, EnrichmentError>;
}
