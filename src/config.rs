use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::RecallClass;
use crate::error::RecallError;
use crate::source::Pagination;

pub const DEFAULT_SOURCE_URL: &str = "https://recalls-rappels.canada.ca/sites/default/files/opendata-donneesouvertes/HCRSAMOpenData.csv";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 200;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5000;

/// Runtime settings, resolved from the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub source_url: String,
    pub database_path: Utf8PathBuf,
    pub http_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub pagination: Pagination,
    pub food_only: bool,
    pub rules_path: Option<Utf8PathBuf>,
}

pub struct SettingsLoader;

impl SettingsLoader {
    /// Loads `.env` (if present) and then reads `CFIA_*` variables.
    pub fn load() -> Result<Settings, RecallError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(RecallError::Config(format!(".env: {err}"))),
        }
        Self::resolve(|key| std::env::var(key).ok())
    }

    pub fn resolve<F>(lookup: F) -> Result<Settings, RecallError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let source_url = var("CFIA_SOURCE_URL").unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string());
        let database_path = match var("CFIA_DATABASE_PATH") {
            Some(path) => Utf8PathBuf::from(path),
            None => default_database_path()?,
        };
        let http_timeout = Duration::from_secs(
            parse_var(&var, "CFIA_HTTP_TIMEOUT_SECS")?.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        );
        let max_retries = parse_var(&var, "CFIA_MAX_RETRIES")?.unwrap_or(DEFAULT_MAX_RETRIES);
        let retry_delay = Duration::from_millis(
            parse_var(&var, "CFIA_RETRY_DELAY_MS")?.unwrap_or(DEFAULT_RETRY_DELAY_MS),
        );
        let pagination = match parse_var::<_, u32>(&var, "CFIA_PAGE_SIZE")? {
            Some(0) => {
                return Err(RecallError::Config(
                    "CFIA_PAGE_SIZE must be greater than zero".to_string(),
                ));
            }
            Some(page_size) => Pagination::paged(page_size),
            None => Pagination::Single,
        };
        let food_only = match var("CFIA_FOOD_ONLY") {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                RecallError::Config(format!("CFIA_FOOD_ONLY: expected a boolean, got {value:?}"))
            })?,
            None => true,
        };
        let rules_path = var("CFIA_RULES_PATH").map(Utf8PathBuf::from);

        Ok(Settings {
            source_url,
            database_path,
            http_timeout,
            max_retries,
            retry_delay,
            pagination,
            food_only,
            rules_path,
        })
    }
}

fn parse_var<F, T>(var: &F, key: &str) -> Result<Option<T>, RecallError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|err| RecallError::Config(format!("{key}={value:?}: {err}")))
        })
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn default_database_path() -> Result<Utf8PathBuf, RecallError> {
    ProjectDirs::from("ca", "cfia", "cfia-recalls")
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_dir().join("recalls.db")).ok())
        .ok_or_else(|| RecallError::Filesystem("unable to resolve data directory".to_string()))
}

/// One `(pattern -> label)` pair as written in a rules file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleEntry<L> {
    pub pattern: String,
    pub label: L,
}

/// Optional overrides for the classifier tables. Each present list replaces
/// the built-in one; entries keep the order they have in the file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub category: Option<Vec<RuleEntry<String>>>,
    #[serde(default)]
    pub main_issue: Option<Vec<RuleEntry<String>>>,
    #[serde(default)]
    pub secondary_issue: Option<Vec<RuleEntry<String>>>,
    #[serde(default)]
    pub bacteria_subtype: Option<Vec<RuleEntry<String>>>,
    #[serde(default)]
    pub class: Option<Vec<RuleEntry<RecallClass>>>,
    #[serde(default)]
    pub default_category: Option<String>,
}

pub struct RulesLoader;

impl RulesLoader {
    pub fn read(path: &Utf8PathBuf) -> Result<RulesConfig, RecallError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| RecallError::ConfigRead(path.as_std_path().to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| RecallError::RulesParse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let env = HashMap::from([
            ("CFIA_DATABASE_PATH", "/tmp/recalls.db"),
            ("CFIA_SOURCE_URL", "   "),
        ]);
        let settings = SettingsLoader::resolve(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.source_url, DEFAULT_SOURCE_URL);
        assert_eq!(settings.max_retries, DEFAULT_MAX_RETRIES);
    }
}
