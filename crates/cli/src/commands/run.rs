use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use ticket_merge_core::audit::TracingAuditSink;
use ticket_merge_core::config::{AppConfig, ConfigOverrides};
use ticket_merge_core::dedup::DuplicateTicketWorkflow;
use ticket_merge_core::domain::event::WorkflowEvent;
use ticket_merge_core::errors::WorkflowError;
use ticket_merge_core::gateway::CrmGateway;
use ticket_merge_hubspot::HubSpotClient;

use super::{load_options, CommandResult, EXIT_CONFIG, EXIT_FETCH};
use crate::{init_logging, RunArgs};

const COMMAND: &str = "run";

pub fn run(config_path: Option<PathBuf>, args: RunArgs) -> CommandResult {
    let config = match AppConfig::load(load_options(config_path, config_overrides(&args))) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            )
        }
    };
    init_logging(&config.logging);

    let raw_event = match read_event(&args.event) {
        Ok(raw_event) => raw_event,
        Err(error) => {
            return CommandResult::failure(COMMAND, "invalid_event", format!("{error:#}"), EXIT_CONFIG)
        }
    };

    let gateway = match HubSpotClient::from_config(&config.crm) {
        Ok(gateway) => gateway,
        Err(error) => {
            return CommandResult::failure(COMMAND, "configuration", error.to_string(), EXIT_CONFIG)
        }
    };

    execute_event(&config, gateway, &raw_event)
}

/// Flags left unset keep whatever file and environment configured.
pub fn config_overrides(args: &RunArgs) -> ConfigOverrides {
    ConfigOverrides {
        paginate_associations: args.paginate.then_some(true),
        candidate_selection: args.candidate_selection,
        ..ConfigOverrides::default()
    }
}

/// Parses one event and drives the workflow to completion on a
/// single-threaded runtime.
pub fn execute_event<G>(config: &AppConfig, gateway: G, raw_event: &str) -> CommandResult
where
    G: CrmGateway,
{
    let event = match WorkflowEvent::from_json(raw_event) {
        Ok(event) => event,
        Err(error) => return workflow_failure(&error),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                1,
            )
        }
    };

    let workflow = DuplicateTicketWorkflow::from_config(gateway, config, Arc::new(TracingAuditSink));
    match runtime.block_on(workflow.handle_event(&event)) {
        Ok(run) => {
            info!(
                event_name = "cli.run.completed",
                correlation_id = %run.correlation_id,
                merge_status = run.output.output_fields.merge_status.as_str(),
                "workflow event processed"
            );
            CommandResult::payload(&run.output)
        }
        Err(error) => workflow_failure(&error),
    }
}

fn workflow_failure(error: &WorkflowError) -> CommandResult {
    let exit_code = match error {
        WorkflowError::InvalidEvent(_) | WorkflowError::UnmappedPipeline { .. } => EXIT_CONFIG,
        WorkflowError::RemoteFetch { .. }
        | WorkflowError::FetchTransport { .. }
        | WorkflowError::MalformedResponse { .. } => EXIT_FETCH,
        WorkflowError::Domain(_) => 1,
    };
    CommandResult::failure(COMMAND, error.error_class(), error.to_string(), exit_code)
}

fn read_event(source: &str) -> Result<String> {
    if source == "-" {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw).context("failed to read event from stdin")?;
        return Ok(raw);
    }

    fs::read_to_string(source).with_context(|| format!("failed to read event file `{source}`"))
}
