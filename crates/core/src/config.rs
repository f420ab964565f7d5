use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::{PipelineMapError, PipelineStageMap};

pub const CONFIG_FILE_NAME: &str = "ticket-merge.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub crm: CrmConfig,
    pub workflow: WorkflowConfig,
    pub pipelines: PipelineStageMap,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub base_url: String,
    pub access_token: SecretString,
    pub timeout_secs: u64,
    pub association_page_limit: u32,
    pub paginate_associations: bool,
    pub max_association_pages: u32,
    pub open_property: String,
    pub open_value: String,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub candidate_selection: CandidateSelection,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Which duplicate candidate becomes the surviving ticket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSelection {
    /// First candidate in the order the CRM returned the tickets.
    #[default]
    FetchOrder,
    /// Candidate with the earliest creation date.
    OldestCreated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub crm_base_url: Option<String>,
    pub crm_access_token: Option<String>,
    pub crm_timeout_secs: Option<u64>,
    pub paginate_associations: Option<bool>,
    pub candidate_selection: Option<CandidateSelection>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid pipeline stage map: {0}")]
    Pipelines(#[from] PipelineMapError),
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crm: CrmConfig {
                base_url: "https://api.hubapi.com".to_string(),
                access_token: String::new().into(),
                timeout_secs: 30,
                association_page_limit: 100,
                paginate_associations: false,
                max_association_pages: 10,
                open_property: "is_ticket_open_".to_string(),
                open_value: "1".to_string(),
            },
            workflow: WorkflowConfig { candidate_selection: CandidateSelection::FetchOrder },
            pipelines: PipelineStageMap::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for CandidateSelection {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fetch_order" => Ok(Self::FetchOrder),
            "oldest_created" => Ok(Self::OldestCreated),
            other => Err(ConfigError::Validation(format!(
                "unsupported candidate selection `{other}` (expected fetch_order|oldest_created)"
            ))),
        }
    }
}

impl CandidateSelection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchOrder => "fetch_order",
            Self::OldestCreated => "oldest_created",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(crm) = patch.crm {
            if let Some(base_url) = crm.base_url {
                self.crm.base_url = base_url;
            }
            if let Some(access_token) = crm.access_token {
                self.crm.access_token = secret_value(access_token);
            }
            if let Some(timeout_secs) = crm.timeout_secs {
                self.crm.timeout_secs = timeout_secs;
            }
            if let Some(association_page_limit) = crm.association_page_limit {
                self.crm.association_page_limit = association_page_limit;
            }
            if let Some(paginate_associations) = crm.paginate_associations {
                self.crm.paginate_associations = paginate_associations;
            }
            if let Some(max_association_pages) = crm.max_association_pages {
                self.crm.max_association_pages = max_association_pages;
            }
            if let Some(open_property) = crm.open_property {
                self.crm.open_property = open_property;
            }
            if let Some(open_value) = crm.open_value {
                self.crm.open_value = open_value;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(candidate_selection) = workflow.candidate_selection {
                self.workflow.candidate_selection = candidate_selection;
            }
        }

        // A `[pipelines]` table replaces the built-in map rather than extending it.
        if let Some(pipelines) = patch.pipelines {
            self.pipelines = PipelineStageMap::new(pipelines)?;
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TICKET_MERGE_CRM_BASE_URL") {
            self.crm.base_url = value;
        }
        if let Some(value) = read_env("TICKET_MERGE_CRM_ACCESS_TOKEN") {
            self.crm.access_token = secret_value(value);
        }
        if let Some(value) = read_env("TICKET_MERGE_CRM_TIMEOUT_SECS") {
            self.crm.timeout_secs = parse_u64("TICKET_MERGE_CRM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TICKET_MERGE_CRM_ASSOCIATION_PAGE_LIMIT") {
            self.crm.association_page_limit =
                parse_u32("TICKET_MERGE_CRM_ASSOCIATION_PAGE_LIMIT", &value)?;
        }
        if let Some(value) = read_env("TICKET_MERGE_CRM_PAGINATE_ASSOCIATIONS") {
            self.crm.paginate_associations =
                parse_bool("TICKET_MERGE_CRM_PAGINATE_ASSOCIATIONS", &value)?;
        }
        if let Some(value) = read_env("TICKET_MERGE_CRM_MAX_ASSOCIATION_PAGES") {
            self.crm.max_association_pages =
                parse_u32("TICKET_MERGE_CRM_MAX_ASSOCIATION_PAGES", &value)?;
        }
        if let Some(value) = read_env("TICKET_MERGE_CRM_OPEN_PROPERTY") {
            self.crm.open_property = value;
        }
        if let Some(value) = read_env("TICKET_MERGE_CRM_OPEN_VALUE") {
            self.crm.open_value = value;
        }

        if let Some(value) = read_env("TICKET_MERGE_WORKFLOW_CANDIDATE_SELECTION") {
            self.workflow.candidate_selection = value.parse()?;
        }

        if let Some(value) = read_env("TICKET_MERGE_PIPELINE_STAGES") {
            self.pipelines = PipelineStageMap::parse_pairs(&value)?;
        }

        let log_level =
            read_env("TICKET_MERGE_LOGGING_LEVEL").or_else(|| read_env("TICKET_MERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("TICKET_MERGE_LOGGING_FORMAT")
            .or_else(|| read_env("TICKET_MERGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(base_url) = overrides.crm_base_url {
            self.crm.base_url = base_url;
        }
        if let Some(access_token) = overrides.crm_access_token {
            self.crm.access_token = secret_value(access_token);
        }
        if let Some(timeout_secs) = overrides.crm_timeout_secs {
            self.crm.timeout_secs = timeout_secs;
        }
        if let Some(paginate_associations) = overrides.paginate_associations {
            self.crm.paginate_associations = paginate_associations;
        }
        if let Some(candidate_selection) = overrides.candidate_selection {
            self.workflow.candidate_selection = candidate_selection;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_crm(&self.crm)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(CONFIG_FILE_NAME), PathBuf::from("config").join(CONFIG_FILE_NAME)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    let base_url = crm.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "crm.base_url must start with http:// or https://".to_string(),
        ));
    }

    let token = crm.access_token.expose_secret();
    if token.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crm.access_token is required. Create a private app access token in the CRM settings and export TICKET_MERGE_CRM_ACCESS_TOKEN".to_string(),
        ));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(ConfigError::Validation(
            "crm.access_token must not contain whitespace".to_string(),
        ));
    }

    if crm.timeout_secs == 0 || crm.timeout_secs > 300 {
        return Err(ConfigError::Validation("crm.timeout_secs must be in range 1..=300".to_string()));
    }

    if crm.association_page_limit == 0 || crm.association_page_limit > 500 {
        return Err(ConfigError::Validation(
            "crm.association_page_limit must be in range 1..=500".to_string(),
        ));
    }

    if crm.max_association_pages == 0 {
        return Err(ConfigError::Validation(
            "crm.max_association_pages must be greater than zero".to_string(),
        ));
    }

    if crm.open_property.trim().is_empty() {
        return Err(ConfigError::Validation("crm.open_property must not be blank".to_string()));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    crm: Option<CrmPatch>,
    workflow: Option<WorkflowPatch>,
    pipelines: Option<BTreeMap<String, String>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    base_url: Option<String>,
    access_token: Option<String>,
    timeout_secs: Option<u64>,
    association_page_limit: Option<u32>,
    paginate_associations: Option<bool>,
    max_association_pages: Option<u32>,
    open_property: Option<String>,
    open_value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    candidate_selection: Option<CandidateSelection>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
