//! Field format rules for each form step.
//!
//! Every failing field is reported with its own message; a step is rejected
//! with all failures at once rather than the first one.

use std::sync::LazyLock;

use regex::Regex;

use super::model::{BusinessInfo, FinancialInfo, Financials, PersonalInfo};
use crate::error::ValidationErrors;

const MAX_PERSON_NAME_CHARS: usize = 100;
const MAX_BUSINESS_NAME_CHARS: usize = 200;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+?[\d\s\-.()]+$").unwrap());

static ZIP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{5}(?:-?\d{4})?$").unwrap());

fn check_name(errors: &mut ValidationErrors, field: &str, label: &str, value: &str, max: usize) {
    if value.is_empty() {
        errors.push(field, format!("{label} is required"));
    } else if value.chars().count() > max {
        errors.push(field, format!("{label} must be at most {max} characters"));
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// 10 to 15 digits, optional leading `+`, separators `space - . ( )`.
pub fn is_valid_phone(phone: &str) -> bool {
    if !PHONE_RE.is_match(phone) {
        return false;
    }
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    (10..=15).contains(&digits)
}

/// Five digits with an optional four-digit extension (`94107`, `94107-1234`).
pub fn is_valid_zip(zip: &str) -> bool {
    ZIP_RE.is_match(zip)
}

/// Strip hyphens and spaces from a tax identifier.
pub fn normalize_tin(tin: &str) -> String {
    tin.chars().filter(|c| *c != '-' && *c != ' ').collect()
}

/// Validate step 1. Returns the trimmed values on success.
pub fn validate_personal(input: &PersonalInfo) -> Result<PersonalInfo, ValidationErrors> {
    let info = PersonalInfo {
        first_name: input.first_name.trim().to_string(),
        last_name: input.last_name.trim().to_string(),
        email: input.email.trim().to_string(),
        phone: input.phone.trim().to_string(),
    };

    let mut errors = ValidationErrors::default();
    check_name(
        &mut errors,
        "first_name",
        "First name",
        &info.first_name,
        MAX_PERSON_NAME_CHARS,
    );
    check_name(
        &mut errors,
        "last_name",
        "Last name",
        &info.last_name,
        MAX_PERSON_NAME_CHARS,
    );

    if info.email.is_empty() {
        errors.push("email", "Email is required");
    } else if !is_valid_email(&info.email) {
        errors.push("email", "Invalid email address");
    }

    if info.phone.is_empty() {
        errors.push("phone", "Phone number is required");
    } else if !is_valid_phone(&info.phone) {
        errors.push("phone", "Phone number must contain 10 to 15 digits");
    }

    errors.into_result()?;
    Ok(info)
}

/// Validate step 2. Returns trimmed values with the TIN normalized to digits.
pub fn validate_business(input: &BusinessInfo) -> Result<BusinessInfo, ValidationErrors> {
    let info = BusinessInfo {
        business_name: input.business_name.trim().to_string(),
        tin: normalize_tin(input.tin.trim()),
        zip_code: input.zip_code.trim().to_string(),
    };

    let mut errors = ValidationErrors::default();
    check_name(
        &mut errors,
        "business_name",
        "Business name",
        &info.business_name,
        MAX_BUSINESS_NAME_CHARS,
    );

    if info.tin.is_empty() {
        errors.push("tin", "TIN is required");
    } else if !info.tin.chars().all(|c| c.is_ascii_digit()) {
        errors.push("tin", "TIN must contain only digits");
    } else if !(9..=11).contains(&info.tin.len()) {
        errors.push("tin", "TIN must be 9 to 11 digits");
    }

    if info.zip_code.is_empty() {
        errors.push("zip_code", "ZIP code is required");
    } else if !is_valid_zip(&info.zip_code) {
        errors.push(
            "zip_code",
            "ZIP code must be 5 digits, optionally followed by a 4-digit extension",
        );
    }

    errors.into_result()?;
    Ok(info)
}

/// Validate step 3.
pub fn validate_financial(input: &FinancialInfo) -> Result<Financials, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    match input.monthly_revenue {
        None => errors.push("monthly_revenue", "Monthly revenue is required"),
        Some(v) if !v.is_finite() || v <= 0.0 => {
            errors.push("monthly_revenue", "Monthly revenue must be greater than 0")
        }
        Some(_) => {}
    }

    match input.years_in_business {
        None => errors.push("years_in_business", "Years in business is required"),
        Some(v) if !v.is_finite() || v < 0.0 => {
            errors.push("years_in_business", "Years in business cannot be negative")
        }
        Some(_) => {}
    }

    match (input.monthly_revenue, input.years_in_business) {
        (Some(monthly_revenue), Some(years_in_business)) if errors.is_empty() => Ok(Financials {
            monthly_revenue,
            years_in_business,
        }),
        _ => Err(errors),
    }
}
