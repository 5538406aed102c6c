//! Gateway configuration
//!
//! Defaults, overridden by environment variables (a `.env` file is loaded by
//! the binary before this runs), overridden again by CLI flags.

use crate::error::{GatewayError, Result};
use crate::schema::is_dataset_name;
use chrono::Duration;
use std::path::PathBuf;
use std::str::FromStr;

/// Upper bound for both TTLs; larger values overflow timestamp arithmetic.
const MAX_TTL_DAYS: i64 = 1;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub project_id: String,
    pub default_dataset: String,
    pub default_session: String,
    pub confirmation_keyword: String,
    pub confirmation_ttl: Duration,
    /// Zero disables schema caching.
    pub schema_cache_ttl: Duration,
    pub max_rendered_rows: usize,
    /// `None` keeps pending operations in process memory.
    pub pending_db: Option<PathBuf>,
    pub warehouse_url: String,
    pub warehouse_token: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub bind_addr: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            project_id: "business-analytics".to_string(),
            default_dataset: "business_data".to_string(),
            default_session: "default".to_string(),
            confirmation_keyword: "CONFIRM".to_string(),
            confirmation_ttl: Duration::minutes(5),
            schema_cache_ttl: Duration::seconds(60),
            max_rendered_rows: 20,
            pending_db: None,
            warehouse_url: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
            warehouse_token: None,
            llm_api_key: None,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Unset keys keep
    /// their defaults; malformed numbers are a configuration error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("GATEWAY_PROJECT_ID") {
            config.project_id = v;
        }
        if let Some(v) = lookup("GATEWAY_DATASET") {
            config.default_dataset = v;
        }
        if let Some(v) = lookup("GATEWAY_DEFAULT_SESSION") {
            config.default_session = v;
        }
        if let Some(v) = lookup("GATEWAY_CONFIRM_KEYWORD") {
            config.confirmation_keyword = v;
        }
        if let Some(secs) = parse_var::<i64, _>(&lookup, "GATEWAY_CONFIRM_TTL_SECS")? {
            config.confirmation_ttl = Duration::seconds(secs);
        }
        if let Some(secs) = parse_var::<i64, _>(&lookup, "GATEWAY_SCHEMA_CACHE_TTL_SECS")? {
            config.schema_cache_ttl = Duration::seconds(secs);
        }
        if let Some(rows) = parse_var::<usize, _>(&lookup, "GATEWAY_MAX_ROWS")? {
            config.max_rendered_rows = rows;
        }
        if let Some(v) = lookup("GATEWAY_PENDING_DB") {
            config.pending_db = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("WAREHOUSE_URL") {
            config.warehouse_url = v;
        }
        config.warehouse_token = lookup("WAREHOUSE_TOKEN");
        config.llm_api_key = lookup("OPENAI_API_KEY");
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            config.llm_base_url = v;
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            config.llm_model = v;
        }
        if let Some(v) = lookup("GATEWAY_BIND") {
            config.bind_addr = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let max_ttl = Duration::days(MAX_TTL_DAYS);
        if self.confirmation_ttl <= Duration::zero() || self.confirmation_ttl > max_ttl {
            return Err(GatewayError::Configuration(format!(
                "Confirmation TTL must be between 1s and {}s",
                max_ttl.num_seconds()
            )));
        }
        if self.schema_cache_ttl < Duration::zero() || self.schema_cache_ttl > max_ttl {
            return Err(GatewayError::Configuration(format!(
                "Schema cache TTL must be between 0s and {}s",
                max_ttl.num_seconds()
            )));
        }
        if !is_dataset_name(&self.default_dataset) {
            return Err(GatewayError::Configuration(format!(
                "Invalid default dataset '{}'",
                self.default_dataset
            )));
        }
        if self.confirmation_keyword.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "Confirmation keyword must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| GatewayError::Configuration(format!("Invalid {}='{}': {}", key, raw, e))),
        None => Ok(None),
    }
}
