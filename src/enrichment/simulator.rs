//! Simulated business verification API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use super::{AdditionalData, BusinessAddress, EnrichmentProvider, VerificationResult};
use crate::error::EnrichmentError;

const SOS_STATUSES: &[&str] = &["Active", "Good Standing", "Inactive", "Revoked", "Suspended"];

const INDUSTRY_CODES: &[&str] = &["445110", "541330", "722511", "621111", "238220"];

/// Probability that a synthetic record is marked verified.
const VERIFIED_RATE: f64 = 0.8;

/// Latency and failure settings for the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Lower bound of the injected delay.
    pub delay_min: Duration,
    /// Upper bound of the injected delay.
    pub delay_max: Duration,
    /// Probability in [0, 1] that a call fails regardless of input.
    pub failure_rate: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            delay_min: Duration::from_millis(500),
            delay_max: Duration::from_millis(2000),
            failure_rate: 0.1,
        }
    }
}

impl SimulatorConfig {
    /// No delay, never fails.
    pub fn instant() -> Self {
        Self {
            delay_min: Duration::ZERO,
            delay_max: Duration::ZERO,
            failure_rate: 0.0,
        }
    }
}

/// Stand-in for the third-party verification API.
pub struct SimulatedEnrichment {
    config: SimulatorConfig,
}

impl SimulatedEnrichment {
    pub fn new(config: SimulatorConfig) -> Self {
        info!(
            delay_min_ms = config.delay_min.as_millis() as u64,
            delay_max_ms = config.delay_max.as_millis() as u64,
            failure_rate = config.failure_rate,
            "Enrichment simulator initialized"
        );
        Self { config }
    }

    /// Uniform delay in `[delay_min, delay_max]`.
    fn draw_delay(&self) -> Duration {
        let min = self.config.delay_min.as_millis() as u64;
        let max = self.config.delay_max.as_millis() as u64;
        if max <= min {
            return self.config.delay_min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn should_fail(&self) -> bool {
        let rate = self.config.failure_rate.clamp(0.0, 1.0);
        rand::thread_rng().gen_bool(rate)
    }

    fn synthesize(business_name: &str, zip_code: &str) -> VerificationResult {
        let mut rng = rand::thread_rng();
        let years_ago: i64 = rng.gen_range(1..=20);
        let today = Utc::now().date_naive();
        let business_start_date = today
            .checked_sub_signed(chrono::Duration::days(365 * years_ago))
            .unwrap_or(NaiveDate::MIN);

        VerificationResult {
            business_name: business_name.to_string(),
            zip_code: zip_code.to_string(),
            verified: rng.gen_bool(VERIFIED_RATE),
            business_start_date,
            sos_status: pick(&mut rng, SOS_STATUSES),
            industry_code: pick(&mut rng, INDUSTRY_CODES),
            naics_code: pick(&mut rng, INDUSTRY_CODES),
            business_address: Some(BusinessAddress {
                street: format!("{} Main St", rng.gen_range(100..=9999)),
                city: "Sample City".to_string(),
                state: "CA".to_string(),
                zip: zip_code.to_string(),
            }),
            additional_data: Some(AdditionalData {
                employee_count_range: format!(
                    "{}-{}",
                    rng.gen_range(1..=50),
                    rng.gen_range(51..=200)
                ),
                revenue_range: format!("${}K-${}M", rng.gen_range(100..=999), rng.gen_range(1..=10)),
                credit_score_range: rng.gen_range(300..=850).to_string(),
            }),
        }
    }
}

fn pick<R: Rng>(rng: &mut R, options: &[&str]) -> String {
    options.choose(rng).copied().unwrap_or_default().to_string()
}

#[async_trait]
impl EnrichmentProvider for SimulatedEnrichment {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn enrich(
        &self,
        business_name: &str,
        zip_code: &str,
    ) -> Result<VerificationResult, EnrichmentError> {
        let business_name = business_name.trim();
        let zip_code = zip_code.trim();
        if business_name.is_empty() || zip_code.is_empty() {
            return Err(EnrichmentError::MissingInput {
                business_name: !business_name.is_empty(),
                zip_code: !zip_code.is_empty(),
            });
        }

        let delay = self.draw_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Simulating API delay");
        tokio::time::sleep(delay).await;

        if self.should_fail() {
            warn!(
                business_name = business_name,
                zip_code = zip_code,
                failure_type = "simulated",
                "Simulated verification failure"
            );
            return Err(EnrichmentError::Unavailable {
                reason: "verification service did not respond".to_string(),
            });
        }

        let result = Self::synthesize(business_name, zip_code);
        info!(
            business_name = business_name,
            zip_code = zip_code,
            verified = result.verified,
            sos_status = %result.sos_status,
            "Business verification complete"
        );
        Ok(result)
    }
}
