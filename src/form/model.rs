//! Form data carried by a session, and the per-step payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::state::{CompletedSteps, FormStep};
use super::validate;
use crate::enrichment::VerificationResult;
use crate::error::{FormError, ValidationErrors};

/// User-entered fields. Every field is optional until its step is completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormFields {
    // Step 1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    // Step 2
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,

    // Step 3
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_revenue: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub years_in_business: Option<f64>,
}

fn overwrite<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if let Some(v) = value {
        *slot = Some(v.clone());
    }
}

impl FormFields {
    /// Keys a client may write.
    pub const KEYS: [&'static str; 9] = [
        "first_name",
        "last_name",
        "email",
        "phone",
        "business_name",
        "tin",
        "zip_code",
        "monthly_revenue",
        "years_in_business",
    ];

    /// Parse a client update body.
    ///
    /// Bookkeeping keys echoed back from a `GET` are ignored. Any other
    /// unrecognised key is reported so typos do not vanish silently.
    pub fn from_update(body: Map<String, Value>) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        let mut known = Map::new();
        for (key, value) in body {
            if Self::KEYS.contains(&key.as_str()) {
                known.insert(key, value);
            } else if !FormData::BOOKKEEPING_KEYS.contains(&key.as_str()) {
                errors.push(key, "Unknown field");
            }
        }
        errors.into_result()?;

        serde_json::from_value(Value::Object(known)).map_err(|e| {
            let mut errors = ValidationErrors::default();
            errors.push("form_data", e.to_string());
            errors
        })
    }

    /// Merge `update` into `self`. Present fields overwrite, absent ones are kept.
    ///
    /// Returns `true` when `business_name` or `zip_code` changed value.
    pub fn apply(&mut self, update: &FormFields) -> bool {
        let before = (self.business_name.clone(), self.zip_code.clone());

        overwrite(&mut self.first_name, &update.first_name);
        overwrite(&mut self.last_name, &update.last_name);
        overwrite(&mut self.email, &update.email);
        overwrite(&mut self.phone, &update.phone);
        overwrite(&mut self.business_name, &update.business_name);
        overwrite(&mut self.tin, &update.tin);
        overwrite(&mut self.zip_code, &update.zip_code);
        overwrite(&mut self.monthly_revenue, &update.monthly_revenue);
        overwrite(&mut self.years_in_business, &update.years_in_business);

        before != (self.business_name.clone(), self.zip_code.clone())
    }

    pub fn personal(&self) -> PersonalInfo {
        PersonalInfo {
            first_name: self.first_name.clone().unwrap_or_default(),
            last_name: self.last_name.clone().unwrap_or_default(),
            email: self.email.clone().unwrap_or_default(),
            phone: self.phone.clone().unwrap_or_default(),
        }
    }

    pub fn business(&self) -> BusinessInfo {
        BusinessInfo {
            business_name: self.business_name.clone().unwrap_or_default(),
            tin: self.tin.clone().unwrap_or_default(),
            zip_code: self.zip_code.clone().unwrap_or_default(),
        }
    }

    pub fn financial(&self) -> FinancialInfo {
        FinancialInfo {
            monthly_revenue: self.monthly_revenue,
            years_in_business: self.years_in_business,
        }
    }
}

/// Everything stored in a session: user fields plus server-owned bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormData {
    #[serde(flatten)]
    pub fields: FormFields,
    #[serde(default)]
    pub enrichment_data: Option<VerificationResult>,
    /// Last non-fatal enrichment failure, shown to the user as a soft warning.
    #[serde(default)]
    pub enrichment_warning: Option<String>,
    #[serde(default)]
    pub completed_steps: CompletedSteps,
    #[serde(default)]
    pub current_step: FormStep,
}

impl FormData {
    /// Server-owned keys. Clients may send them back but never set them.
    pub const BOOKKEEPING_KEYS: [&'static str; 4] = [
        "enrichment_data",
        "enrichment_warning",
        "completed_steps",
        "current_step",
    ];

    /// Take the edge out of `step` after its input was accepted.
    ///
    /// Only the step the pointer is on can be completed. Steps 1 and 2 move
    /// the pointer forward; step 3 leaves it in place since `Submitted` is
    /// never stored.
    pub fn complete_step(&mut self, step: FormStep) -> Result<(), FormError> {
        let current = self.current_step;
        let target = step.next().ok_or(FormError::UnknownStep(step.number()))?;

        if step.number() > current.number() {
            let missing: Vec<String> = std::iter::successors(Some(current), FormStep::next)
                .take_while(|s| *s != step)
                .filter(|s| !self.completed_steps.is_completed(*s))
                .filter_map(|s| s.completion_key().map(String::from))
                .collect();
            if !missing.is_empty() {
                return Err(FormError::OutOfOrder {
                    step: step.number(),
                    missing,
                });
            }
        }
        if current != step || !current.can_transition_to(target) {
            return Err(FormError::InvalidTransition {
                from: current.number(),
                to: target.number(),
            });
        }

        self.completed_steps.mark(step);
        if !target.is_terminal() {
            self.current_step = target;
        }
        Ok(())
    }

    /// "Back" edge. Returns the new step, or `None` when already at step 1.
    pub fn step_back(&mut self) -> Result<Option<FormStep>, FormError> {
        let current = self.current_step;
        let Some(prev) = current.prev() else {
            return Ok(None);
        };
        if !current.can_transition_to(prev) {
            return Err(FormError::InvalidTransition {
                from: current.number(),
                to: prev.number(),
            });
        }
        self.current_step = prev;
        Ok(Some(prev))
    }

    /// Merge user fields, dropping enrichment results that no longer match.
    ///
    /// Returns `true` when the business inputs changed.
    pub fn merge(&mut self, update: &FormFields) -> bool {
        let changed = self.fields.apply(update);
        if changed {
            let name = self.fields.business_name.as_deref().unwrap_or_default().trim();
            let zip = self.fields.zip_code.as_deref().unwrap_or_default().trim();
            if !self.has_enrichment_for(name, zip) {
                self.enrichment_data = None;
            }
            self.enrichment_warning = None;
        }
        changed
    }

    /// Business name and ZIP when both are usable for an enrichment lookup.
    pub fn enrichment_inputs(&self) -> Option<(String, String)> {
        let name = self.fields.business_name.as_deref()?.trim();
        let zip = self.fields.zip_code.as_deref()?.trim();
        if name.is_empty() || !validate::is_valid_zip(zip) {
            return None;
        }
        Some((name.to_string(), zip.to_string()))
    }

    /// Whether stored enrichment data was produced for the current inputs.
    pub fn has_enrichment_for(&self, business_name: &str, zip_code: &str) -> bool {
        self.enrichment_data
            .as_ref()
            .is_some_and(|d| d.matches(business_name, zip_code))
    }
}

/// Step 1 payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

/// Step 2 payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessInfo {
    pub business_name: String,
    pub tin: String,
    pub zip_code: String,
}

/// Step 3 payload. Missing values are reported as validation failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinancialInfo {
    pub monthly_revenue: Option<f64>,
    pub years_in_business: Option<f64>,
}

/// Validated step 3 values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Financials {
    pub monthly_revenue: f64,
    pub years_in_business: f64,
}

impl From<PersonalInfo> for FormFields {
    fn from(p: PersonalInfo) -> Self {
        Self {
            first_name: Some(p.first_name),
            last_name: Some(p.last_name),
            email: Some(p.email),
            phone: Some(p.phone),
            ..Default::default()
        }
    }
}

impl From<BusinessInfo> for FormFields {
    fn from(b: BusinessInfo) -> Self {
        Self {
            business_name: Some(b.business_name),
            tin: Some(b.tin),
            zip_code: Some(b.zip_code),
            ..Default::default()
        }
    }
}

impl From<Financials> for FormFields {
    fn from(f: Financials) -> Self {
        Self {
            monthly_revenue: Some(f.monthly_revenue),
            years_in_business: Some(f.years_in_business),
            ..Default::default()
        }
    }
}
