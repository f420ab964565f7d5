use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::config::{AppConfig, CandidateSelection};
use crate::dedup::fetcher::{AssociationFetcher, FetchOptions};
use crate::dedup::filter::{duplicate_candidates, select_target, DuplicateCriteria};
use crate::dedup::mutator::{MergeAttempt, MergePlan, RecordMerger};
use crate::dedup::reporter::report;
use crate::domain::event::{IncomingTicket, WorkflowEvent, WorkflowOutput};
use crate::domain::ticket::{MergeStatus, TicketId};
use crate::errors::{StepFailure, StepOutcome, WorkflowError};
use crate::gateway::CrmGateway;

const WORKFLOW_ACTOR: &str = "duplicate-ticket-workflow";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub fetch: FetchOptions,
    pub candidate_selection: CandidateSelection,
}

impl WorkflowSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            fetch: FetchOptions::from(&config.crm),
            candidate_selection: config.workflow.candidate_selection,
        }
    }
}

/// Everything one invocation produced. `output` is what the platform receives;
/// the rest is kept for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowRun {
    pub correlation_id: String,
    pub output: WorkflowOutput,
    pub target: Option<TicketId>,
    pub attempt: Option<MergeAttempt>,
}

pub struct DuplicateTicketWorkflow<G> {
    gateway: G,
    settings: WorkflowSettings,
    merger: RecordMerger,
    audit: Arc<dyn AuditSink>,
}

impl<G> DuplicateTicketWorkflow<G>
where
    G: CrmGateway,
{
    pub fn new(
        gateway: G,
        settings: WorkflowSettings,
        merger: RecordMerger,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { gateway, settings, merger, audit }
    }

    pub fn from_config(gateway: G, config: &AppConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self::new(
            gateway,
            WorkflowSettings::from_config(config),
            RecordMerger::new(config.pipelines.clone()),
            audit,
        )
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub async fn handle_event(&self, event: &WorkflowEvent) -> Result<WorkflowRun, WorkflowError> {
        let incoming = event.incoming_ticket()?;
        self.run(&incoming).await
    }

    /// Fetch, filter, optionally rewrite and merge, then report. Stages run
    /// strictly in that order and none of them is retried.
    pub async fn run(&self, incoming: &IncomingTicket) -> Result<WorkflowRun, WorkflowError> {
        let correlation_id = Uuid::new_v4().to_string();
        let context = AuditContext::new(
            incoming.contact_id.clone(),
            incoming.ticket_id.clone(),
            correlation_id.clone(),
            WORKFLOW_ACTOR,
        );
        info!(
            event_name = "workflow.duplicate_ticket.started",
            correlation_id = %correlation_id,
            contact_id = %incoming.contact_id,
            ticket_id = %incoming.ticket_id,
            "duplicate ticket workflow started"
        );

        let fetcher = AssociationFetcher::new(&self.gateway, &self.settings.fetch);
        let tickets = match fetcher.fetch(&incoming.contact_id).await {
            Ok(tickets) => tickets,
            Err(fetch_error) => {
                self.emit_failure(&context, "ticket.fetch.failed", AuditCategory::Fetch, &fetch_error);
                return Err(fetch_error);
            }
        };

        let criteria = DuplicateCriteria::for_incoming(incoming);
        let candidates = duplicate_candidates(&tickets, &criteria);

        let mut merge_status = MergeStatus::default();
        let mut target_id = None;
        let mut attempt = None;

        match select_target(&candidates, self.settings.candidate_selection) {
            None => {
                info!(
                    event_name = "workflow.duplicate_ticket.none_found",
                    correlation_id = %correlation_id,
                    fetched = tickets.len(),
                    "no open duplicate ticket found"
                );
                self.audit.emit(
                    AuditEvent::new(
                        &context,
                        "ticket.duplicate.not_found",
                        AuditCategory::Detection,
                        AuditOutcome::Success,
                    )
                    .with_metadata("fetched", tickets.len().to_string()),
                );
            }
            Some(target) => {
                self.audit.emit(
                    AuditEvent::new(
                        &context,
                        "ticket.duplicate.detected",
                        AuditCategory::Detection,
                        AuditOutcome::Success,
                    )
                    .with_metadata("original_ticket_id", target.id.0.clone())
                    .with_metadata("candidate_count", candidates.len().to_string())
                    .with_metadata("selection", self.settings.candidate_selection.as_str()),
                );

                let plan = MergePlan {
                    original_ticket_id: target.id.clone(),
                    original_description: target.description.clone(),
                    duplicate_ticket_id: incoming.ticket_id.clone(),
                    duplicate_description: incoming.description.clone(),
                    pipeline: incoming.pipeline.clone(),
                };
                let merge_attempt = match self.merger.apply(&self.gateway, &plan).await {
                    Ok(merge_attempt) => merge_attempt,
                    Err(merge_error) => {
                        self.emit_failure(
                            &context,
                            "ticket.update.misconfigured",
                            AuditCategory::Mutation,
                            &merge_error,
                        );
                        return Err(merge_error);
                    }
                };

                self.record_attempt(&context, &plan, &merge_attempt);
                merge_status.transition_to(merge_attempt.merge_status())?;
                target_id = Some(target.id.clone());
                attempt = Some(merge_attempt);
            }
        }

        let output = report(&incoming.contact_id, &candidates, merge_status);
        info!(
            event_name = "workflow.duplicate_ticket.finished",
            correlation_id = %correlation_id,
            contact_id = %incoming.contact_id,
            candidates = candidates.len(),
            merge_status = merge_status.as_str(),
            "duplicate ticket workflow finished"
        );

        Ok(WorkflowRun { correlation_id, output, target: target_id, attempt })
    }

    fn record_attempt(&self, context: &AuditContext, plan: &MergePlan, attempt: &MergeAttempt) {
        self.audit.emit(
            step_event(context, "ticket.update", AuditCategory::Mutation, &attempt.update)
                .with_metadata("original_ticket_id", plan.original_ticket_id.0.clone())
                .with_metadata("pipeline", plan.pipeline.clone()),
        );

        if let Some(merge) = &attempt.merge {
            self.audit.emit(
                step_event(context, "ticket.merge", AuditCategory::Merge, merge)
                    .with_metadata("primary_object_id", plan.original_ticket_id.0.clone())
                    .with_metadata("object_id_to_merge", plan.duplicate_ticket_id.0.clone()),
            );
        }

        if attempt.has_partial_effect() {
            self.audit.emit(
                AuditEvent::new(
                    context,
                    "ticket.merge.partial_effect",
                    AuditCategory::Merge,
                    AuditOutcome::Failed,
                )
                .with_metadata("original_ticket_id", plan.original_ticket_id.0.clone())
                .with_metadata("rollback", "none"),
            );
        }
    }

    fn emit_failure(
        &self,
        context: &AuditContext,
        event_type: &str,
        category: AuditCategory,
        workflow_error: &WorkflowError,
    ) {
        error!(
            event_name = event_type,
            correlation_id = %context.correlation_id,
            error_class = workflow_error.error_class(),
            error = %workflow_error,
            "duplicate ticket workflow aborted"
        );
        self.audit.emit(
            AuditEvent::new(context, event_type, category, AuditOutcome::Failed)
                .with_metadata("error_class", workflow_error.error_class())
                .with_metadata("error", workflow_error.to_string()),
        );
    }
}

fn step_event(
    context: &AuditContext,
    prefix: &str,
    category: AuditCategory,
    outcome: &StepOutcome,
) -> AuditEvent {
    let (suffix, audit_outcome) = match outcome.failure() {
        None => ("succeeded", AuditOutcome::Success),
        Some(StepFailure::Transport(_)) => ("failed", AuditOutcome::Failed),
        Some(StepFailure::Validation(_) | StepFailure::RemoteRejection { .. }) => {
            ("rejected", AuditOutcome::Rejected)
        }
    };
    let mut event = AuditEvent::new(context, format!("{prefix}.{suffix}"), category, audit_outcome)
        .with_metadata("message", outcome.message());
    if let Some(failure) = outcome.failure() {
        event = event.with_metadata("failure_kind", failure.kind());
    }
    event
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::audit::InMemoryAuditSink;
    use crate::config::CandidateSelection;
    use crate::dedup::mutator::{merged_description, RecordMerger};
    use crate::domain::event::WorkflowEvent;
    use crate::domain::ticket::{DuplicateFlag, MergeStatus};
    use crate::errors::WorkflowError;
    use crate::gateway::{ticket_record, CrmResponse, InMemoryCrmGateway, RecordedCall};
    use crate::pipeline::PipelineStageMap;
    use crate::wire::TicketRecord;

    use super::{DuplicateTicketWorkflow, WorkflowSettings};

    fn crm_ticket(id: &str, open: &str, category: &str, pipeline: &str) -> TicketRecord {
        ticket_record(
            id,
            &[
                ("is_ticket_open_", open),
                ("hs_ticket_category", category),
                ("hs_pipeline", pipeline),
                ("content", &format!("description of {id}")),
                ("createdate", "2024-02-01T09:00:00Z"),
            ],
        )
    }

    fn scenario_gateway() -> InMemoryCrmGateway {
        InMemoryCrmGateway::new()
            .with_ticket("C1", crm_ticket("T1", "1", "payment", "P1"))
            .with_ticket("C1", crm_ticket("T2", "0", "payment", "P1"))
            .with_ticket("C1", crm_ticket("T3", "1", "sales", "P1"))
    }

    fn workflow(
        gateway: InMemoryCrmGateway,
        sink: &InMemoryAuditSink,
    ) -> DuplicateTicketWorkflow<InMemoryCrmGateway> {
        DuplicateTicketWorkflow::new(
            gateway,
            WorkflowSettings::default(),
            RecordMerger::new(PipelineStageMap::new([("P1", "S-new")]).expect("valid map")),
            Arc::new(sink.clone()),
        )
    }

    fn event(contact_id: &str, ticket_id: &str, category: &str, pipeline: &str) -> WorkflowEvent {
        WorkflowEvent::from_json(
            &serde_json::json!({
                "inputFields": {
                    "contact_id": contact_id,
                    "ticket_id": ticket_id,
                    "ticket_pipeline": pipeline,
                    "ticket_category": category,
                    "ticket_description": "charged twice"
                }
            })
            .to_string(),
        )
        .expect("valid event")
    }

    #[tokio::test]
    async fn open_ticket_with_same_category_and_pipeline_is_merged() {
        let sink = InMemoryAuditSink::default();
        let workflow = workflow(scenario_gateway(), &sink);

        let run = workflow.handle_event(&event("C1", "T4", "payment", "P1")).await.expect("run");

        let fields = &run.output.output_fields;
        assert_eq!(fields.contact_id, "C1");
        let ids: Vec<&str> =
            fields.open_tickets.iter().map(|ticket| ticket.original_ticket_id.as_str()).collect();
        assert_eq!(ids, vec!["T1"]);
        assert_eq!(fields.is_duplicate, DuplicateFlag::Yes);
        assert_eq!(fields.merge_status, MergeStatus::Success);

        let gateway = workflow.gateway();
        assert_eq!(gateway.update_calls(), 1);
        assert_eq!(gateway.merge_calls(), 1);
        assert!(gateway.calls().contains(&RecordedCall::Merge {
            primary_object_id: "T1".to_string(),
            object_id_to_merge: "T4".to_string(),
        }));
        assert_eq!(
            sink.event_types(),
            vec![
                "ticket.duplicate.detected".to_string(),
                "ticket.update.succeeded".to_string(),
                "ticket.merge.succeeded".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn contact_without_tickets_is_not_a_duplicate() {
        let sink = InMemoryAuditSink::default();
        let workflow = workflow(InMemoryCrmGateway::new(), &sink);

        let run = workflow.handle_event(&event("C2", "T9", "payment", "P1")).await.expect("run");

        let fields = &run.output.output_fields;
        assert!(fields.open_tickets.is_empty());
        assert_eq!(fields.is_duplicate, DuplicateFlag::No);
        assert_eq!(fields.merge_status, MergeStatus::NotApplicable);
        assert!(run.attempt.is_none());
        assert_eq!(workflow.gateway().update_calls(), 0);
        assert_eq!(workflow.gateway().merge_calls(), 0);
    }

    #[tokio::test]
    async fn no_match_issues_no_mutation() {
        let sink = InMemoryAuditSink::default();
        let workflow = workflow(scenario_gateway(), &sink);

        let run = workflow.handle_event(&event("C1", "T4", "refund", "P1")).await.expect("run");

        assert_eq!(run.output.output_fields.is_duplicate, DuplicateFlag::No);
        assert_eq!(run.output.output_fields.merge_status, MergeStatus::NotApplicable);
        assert_eq!(workflow.gateway().update_calls(), 0);
        assert_eq!(workflow.gateway().merge_calls(), 0);
        assert_eq!(sink.event_types(), vec!["ticket.duplicate.not_found".to_string()]);
    }

    #[tokio::test]
    async fn merge_failure_after_update_reports_error_and_keeps_rewrite() {
        let sink = InMemoryAuditSink::default();
        let gateway = scenario_gateway()
            .with_merge_response(Ok(CrmResponse::new(500, "{\"status\":\"error\"}")));
        let workflow = workflow(gateway, &sink);

        let run = workflow.handle_event(&event("C1", "T4", "payment", "P1")).await.expect("run");

        assert_eq!(run.output.output_fields.merge_status, MergeStatus::Error);
        let original = workflow.gateway().ticket("T1").expect("T1 stored");
        assert_eq!(
            original.property("content"),
            Some(merged_description("charged twice", "description of T1").as_str())
        );
        assert_eq!(original.property("hs_pipeline_stage"), Some("S-new"));
        assert!(sink.event_types().contains(&"ticket.merge.partial_effect".to_string()));
    }

    #[tokio::test]
    async fn failed_update_never_issues_merge() {
        let sink = InMemoryAuditSink::default();
        let gateway = scenario_gateway()
            .with_update_response(Ok(CrmResponse::new(400, "{\"message\":\"bad stage\"}")));
        let workflow = workflow(gateway, &sink);

        let run = workflow.handle_event(&event("C1", "T4", "payment", "P1")).await.expect("run");

        assert_eq!(run.output.output_fields.merge_status, MergeStatus::Error);
        assert_eq!(workflow.gateway().merge_calls(), 0);
        assert!(sink.event_types().contains(&"ticket.update.rejected".to_string()));
    }

    #[tokio::test]
    async fn fetch_failure_aborts_without_output() {
        let sink = InMemoryAuditSink::default();
        let gateway = scenario_gateway()
            .with_association_response(Ok(CrmResponse::new(503, "unavailable")));
        let workflow = workflow(gateway, &sink);

        let error = workflow
            .handle_event(&event("C1", "T4", "payment", "P1"))
            .await
            .expect_err("fetch failures are fatal");

        assert_eq!(error.error_class(), "remote_fetch");
        assert_eq!(sink.event_types(), vec!["ticket.fetch.failed".to_string()]);
    }

    #[tokio::test]
    async fn unmapped_pipeline_aborts_before_mutation() {
        let sink = InMemoryAuditSink::default();
        let gateway = InMemoryCrmGateway::new()
            .with_ticket("C1", crm_ticket("T1", "1", "payment", "P9"));
        let workflow = workflow(gateway, &sink);

        let error = workflow
            .handle_event(&event("C1", "T4", "payment", "P9"))
            .await
            .expect_err("unmapped pipeline is fatal");

        assert_eq!(error, WorkflowError::UnmappedPipeline { pipeline: "P9".to_string() });
        assert_eq!(workflow.gateway().update_calls(), 0);
        assert_eq!(workflow.gateway().merge_calls(), 0);
    }

    #[tokio::test]
    async fn oldest_created_policy_changes_the_target_only() {
        let sink = InMemoryAuditSink::default();
        let gateway = InMemoryCrmGateway::new()
            .with_ticket(
                "C1",
                ticket_record(
                    "T5",
                    &[
                        ("is_ticket_open_", "1"),
                        ("hs_ticket_category", "payment"),
                        ("hs_pipeline", "P1"),
                        ("content", "newer"),
                        ("createdate", "2024-06-01T00:00:00Z"),
                    ],
                ),
            )
            .with_ticket(
                "C1",
                ticket_record(
                    "T2",
                    &[
                        ("is_ticket_open_", "1"),
                        ("hs_ticket_category", "payment"),
                        ("hs_pipeline", "P1"),
                        ("content", "older"),
                        ("createdate", "2023-06-01T00:00:00Z"),
                    ],
                ),
            );
        let workflow = DuplicateTicketWorkflow::new(
            gateway,
            WorkflowSettings {
                candidate_selection: CandidateSelection::OldestCreated,
                ..WorkflowSettings::default()
            },
            RecordMerger::new(PipelineStageMap::new([("P1", "S-new")]).expect("valid map")),
            Arc::new(sink.clone()),
        );

        let run = workflow.handle_event(&event("C1", "T4", "payment", "P1")).await.expect("run");

        assert_eq!(run.target.map(|id| id.0), Some("T2".to_string()));
        let ids: Vec<String> = run
            .output
            .output_fields
            .open_tickets
            .iter()
            .map(|ticket| ticket.original_ticket_id.clone())
            .collect();
        assert_eq!(ids, vec!["T5".to_string(), "T2".to_string()]);
    }

    #[tokio::test]
    async fn invalid_event_makes_no_calls() {
        let sink = InMemoryAuditSink::default();
        let workflow = workflow(scenario_gateway(), &sink);
        let event = WorkflowEvent::from_json(r#"{"inputFields":{"contact_id":"C1"}}"#)
            .expect("json is well formed");

        let error = workflow.handle_event(&event).await.expect_err("fields missing");

        assert_eq!(error.error_class(), "invalid_event");
        assert!(workflow.gateway().calls().is_empty());
    }
}
