use std::path::PathBuf;

use serde::Serialize;
use ticket_merge_core::config::{AppConfig, ConfigOverrides};
use ticket_merge_core::domain::ticket::ContactId;
use ticket_merge_core::gateway::{AssociationQuery, CrmGateway};
use ticket_merge_hubspot::HubSpotClient;

use super::{load_options, CommandResult};

/// Contact id used for the reachability probe. The CRM answers with an
/// empty or not-found listing; only authentication and transport matter.
const PROBE_CONTACT_ID: &str = "0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(config_path: Option<PathBuf>, json_output: bool) -> CommandResult {
    let report = build_report(config_path);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(config_path: Option<PathBuf>) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(load_options(config_path, ConfigOverrides::default())) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(DoctorCheck {
                name: "pipeline_stage_map",
                status: CheckStatus::Pass,
                details: format!("{} pipeline(s) mapped to a target stage", config.pipelines.len()),
            });
            match HubSpotClient::from_config(&config.crm) {
                Ok(client) => {
                    checks.push(DoctorCheck {
                        name: "crm_client",
                        status: CheckStatus::Pass,
                        details: format!("client configured for `{}`", client.base_url()),
                    });
                    checks.push(check_crm_reachability(&client));
                }
                Err(error) => {
                    checks.push(DoctorCheck {
                        name: "crm_client",
                        status: CheckStatus::Fail,
                        details: error.to_string(),
                    });
                    checks.push(DoctorCheck::skipped(
                        "crm_reachability",
                        "the CRM client could not be built",
                    ));
                }
            }
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["pipeline_stage_map", "crm_client", "crm_reachability"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_crm_reachability(client: &HubSpotClient) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "crm_reachability",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let query = AssociationQuery {
        contact_id: ContactId(PROBE_CONTACT_ID.to_string()),
        limit: 1,
        after: None,
    };
    let (status, details) = match runtime.block_on(client.list_ticket_associations(&query)) {
        Ok(response) if response.status == 401 || response.status == 403 => (
            CheckStatus::Fail,
            format!("CRM rejected the access token with status {}", response.status),
        ),
        Ok(response) if response.status >= 500 => {
            (CheckStatus::Fail, format!("CRM answered with server error {}", response.status))
        }
        Ok(response) => {
            (CheckStatus::Pass, format!("CRM reachable (probe answered {})", response.status))
        }
        Err(error) => (CheckStatus::Fail, error.to_string()),
    };

    DoctorCheck { name: "crm_reachability", status, details }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
