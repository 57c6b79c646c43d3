//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::enrichment::SimulatorConfig;
use crate::error::ConfigError;
use crate::session::store::DEFAULT_TTL_SECS;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Directory for daily-rotated log files. Stdout only when unset.
    pub dir: Option<PathBuf>,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    pub bind: SocketAddr,
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Session lifetime, fixed at creation.
    pub session_ttl: Duration,
    /// How often expired session rows are purged.
    pub sweep_interval: Duration,
    pub enrichment: SimulatorConfig,
    pub log: LogConfig,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            db_path: PathBuf::from("./data/lead-form.db"),
            session_ttl: Duration::from_secs(DEFAULT_TTL_SECS.unsigned_abs()),
            sweep_interval: Duration::from_secs(60),
            enrichment: SimulatorConfig::default(),
            log: LogConfig::default(),
            cors_origins: vec!["*".to_string()],
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| invalid(key, format!("{raw:?}: {e}"))),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind = parse(&lookup, "LEAD_FORM_BIND", defaults.bind)?;
        let db_path = lookup("LEAD_FORM_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let ttl_secs = parse(
            &lookup,
            "LEAD_FORM_SESSION_TTL_SECS",
            defaults.session_ttl.as_secs(),
        )?;
        let sweep_secs = parse(
            &lookup,
            "LEAD_FORM_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
        )?;
        if sweep_secs == 0 {
            return Err(invalid("LEAD_FORM_SWEEP_INTERVAL_SECS", "must be at least 1"));
        }

        let delay_min_ms = parse(
            &lookup,
            "LEAD_FORM_ENRICH_DELAY_MIN_MS",
            defaults.enrichment.delay_min.as_millis() as u64,
        )?;
        let delay_max_ms = parse(
            &lookup,
            "LEAD_FORM_ENRICH_DELAY_MAX_MS",
            defaults.enrichment.delay_max.as_millis() as u64,
        )?;
        if delay_min_ms > delay_max_ms {
            return Err(invalid(
                "LEAD_FORM_ENRICH_DELAY_MIN_MS",
                format!("{delay_min_ms} is greater than the max delay {delay_max_ms}"),
            ));
        }

        let failure_rate: f64 = parse(
            &lookup,
            "LEAD_FORM_ENRICH_FAILURE_RATE",
            defaults.enrichment.failure_rate,
        )?;
        if !(0.0..=1.0).contains(&failure_rate) {
            return Err(invalid(
                "LEAD_FORM_ENRICH_FAILURE_RATE",
                format!("{failure_rate} is outside [0, 1]"),
            ));
        }

        let format = match lookup("LEAD_FORM_LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(invalid(
                    "LEAD_FORM_LOG_FORMAT",
                    format!("{other:?} (expected \"text\" or \"json\")"),
                ));
            }
        };
        let dir = lookup("LEAD_FORM_LOG_DIR")
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from);

        let cors_origins = match lookup("LEAD_FORM_CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.cors_origins,
        };

        Ok(Self {
            bind,
            db_path,
            session_ttl: Duration::from_secs(ttl_secs),
            sweep_interval: Duration::from_secs(sweep_secs),
            enrichment: SimulatorConfig {
                delay_min: Duration::from_millis(delay_min_ms),
                delay_max: Duration::from_millis(delay_max_ms),
                failure_rate,
            },
            log: LogConfig { format, dir },
            cors_origins,
        })
    }
}
