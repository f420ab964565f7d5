use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use ticket_merge_core::config::{AppConfig, ConfigOverrides, CONFIG_FILE_NAME};
use toml::Value;

use super::{load_options, CommandResult, EXIT_CONFIG};

struct Sources {
    file_doc: Option<Value>,
    file_path: Option<PathBuf>,
}

impl Sources {
    fn detect(explicit_path: Option<&Path>) -> Self {
        let file_path = detect_config_path(explicit_path);
        let file_doc = load_config_file_doc(file_path.as_deref());
        Self { file_doc, file_path }
    }

    fn line(&self, key_path: &str, value: &str, env_keys: &[&str]) -> String {
        render_line(key_path, value, self.field_source(key_path, env_keys))
    }

    fn field_source(&self, key_path: &str, env_keys: &[&str]) -> String {
        for env_key in env_keys {
            if env::var(env_key).is_ok_and(|value| !value.trim().is_empty()) {
                return format!("env ({env_key})");
            }
        }

        if let Some(doc) = &self.file_doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .file_path
                    .as_deref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

pub fn run(config_path: Option<PathBuf>) -> CommandResult {
    let sources = Sources::detect(config_path.as_deref());
    let config = match AppConfig::load(load_options(config_path, ConfigOverrides::default())) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            )
        }
    };

    CommandResult { exit_code: 0, output: render(&config, &sources) }
}

fn render(config: &AppConfig, sources: &Sources) -> String {
    let crm = &config.crm;
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(sources.line("crm.base_url", &crm.base_url, &["TICKET_MERGE_CRM_BASE_URL"]));
    lines.push(sources.line(
        "crm.access_token",
        &redact_token(crm.access_token.expose_secret()),
        &["TICKET_MERGE_CRM_ACCESS_TOKEN"],
    ));
    lines.push(sources.line(
        "crm.timeout_secs",
        &crm.timeout_secs.to_string(),
        &["TICKET_MERGE_CRM_TIMEOUT_SECS"],
    ));
    lines.push(sources.line(
        "crm.association_page_limit",
        &crm.association_page_limit.to_string(),
        &["TICKET_MERGE_CRM_ASSOCIATION_PAGE_LIMIT"],
    ));
    lines.push(sources.line(
        "crm.paginate_associations",
        &crm.paginate_associations.to_string(),
        &["TICKET_MERGE_CRM_PAGINATE_ASSOCIATIONS"],
    ));
    lines.push(sources.line(
        "crm.max_association_pages",
        &crm.max_association_pages.to_string(),
        &["TICKET_MERGE_CRM_MAX_ASSOCIATION_PAGES"],
    ));
    lines.push(sources.line("crm.open_property", &crm.open_property, &["TICKET_MERGE_CRM_OPEN_PROPERTY"]));
    lines.push(sources.line("crm.open_value", &crm.open_value, &["TICKET_MERGE_CRM_OPEN_VALUE"]));

    lines.push(sources.line(
        "workflow.candidate_selection",
        config.workflow.candidate_selection.as_str(),
        &["TICKET_MERGE_WORKFLOW_CANDIDATE_SELECTION"],
    ));

    let stages = config
        .pipelines
        .iter()
        .map(|(pipeline, stage)| format!("{pipeline}->{stage}"))
        .collect::<Vec<_>>()
        .join(", ");
    lines.push(sources.line(
        "pipelines",
        &format!("{} entries [{stages}]", config.pipelines.len()),
        &["TICKET_MERGE_PIPELINE_STAGES"],
    ));

    lines.push(sources.line(
        "logging.level",
        &config.logging.level,
        &["TICKET_MERGE_LOGGING_LEVEL", "TICKET_MERGE_LOG_LEVEL"],
    ));
    lines.push(sources.line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        &["TICKET_MERGE_LOGGING_FORMAT", "TICKET_MERGE_LOG_FORMAT"],
    ));

    lines.join("\n")
}

fn detect_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from(CONFIG_FILE_NAME), Path::new("config").join(CONFIG_FILE_NAME)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
