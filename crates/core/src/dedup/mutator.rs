use tracing::{info, warn};

use crate::domain::ticket::{MergeStatus, TicketId};
use crate::errors::{StepFailure, StepOutcome, WorkflowError};
use crate::gateway::CrmGateway;
use crate::pipeline::PipelineStageMap;
use crate::wire::{MergeRequest, TicketUpdate, TicketUpdateProperties};

pub const MERGE_BANNER: &str = "(Duplicate ticket merged)";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergePlan {
    pub original_ticket_id: TicketId,
    pub original_description: String,
    pub duplicate_ticket_id: TicketId,
    pub duplicate_description: String,
    pub pipeline: String,
}

/// Result of the two remote steps. `merge` is `None` when the update did not succeed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeAttempt {
    pub update: StepOutcome,
    pub merge: Option<StepOutcome>,
}

impl MergeAttempt {
    pub fn merge_status(&self) -> MergeStatus {
        match &self.merge {
            Some(merge) if merge.is_success() => MergeStatus::Success,
            _ => MergeStatus::Error,
        }
    }

    /// The original ticket was rewritten but the duplicate was not merged into it.
    pub fn has_partial_effect(&self) -> bool {
        self.update.is_success()
            && self.merge.as_ref().map(|merge| !merge.is_success()).unwrap_or(false)
    }
}

/// New ticket text first, then the original text. Nothing is discarded.
pub fn merged_description(duplicate_description: &str, original_description: &str) -> String {
    format!(
        "{MERGE_BANNER}\n\nNEW TICKET\n{duplicate_description}\n\nORIGINAL TICKET DESCRIPTION\n{original_description}"
    )
}

/// Rewrites the surviving ticket and asks the CRM to merge the duplicate into it.
///
/// Neither step is retried. A failed merge does not roll back the rewrite.
#[derive(Clone, Debug)]
pub struct RecordMerger {
    stages: PipelineStageMap,
}

impl RecordMerger {
    pub fn new(stages: PipelineStageMap) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &PipelineStageMap {
        &self.stages
    }

    pub async fn apply(
        &self,
        gateway: &dyn CrmGateway,
        plan: &MergePlan,
    ) -> Result<MergeAttempt, WorkflowError> {
        let update = self.update_original(gateway, plan).await?;
        if !update.is_success() {
            return Ok(MergeAttempt { update, merge: None });
        }

        let merge =
            self.merge_duplicate(gateway, &plan.original_ticket_id, &plan.duplicate_ticket_id).await;
        let attempt = MergeAttempt { update, merge: Some(merge) };
        if attempt.has_partial_effect() {
            warn!(
                event_name = "ticket.merge.partial_effect",
                original_ticket_id = %plan.original_ticket_id,
                duplicate_ticket_id = %plan.duplicate_ticket_id,
                "original ticket keeps its rewritten description and stage although the merge failed"
            );
        }
        Ok(attempt)
    }

    /// Validation problems come back as a failed outcome. A pipeline without a
    /// configured stage is an error because guessing a stage would corrupt data.
    pub async fn update_original(
        &self,
        gateway: &dyn CrmGateway,
        plan: &MergePlan,
    ) -> Result<StepOutcome, WorkflowError> {
        if let Some(reason) = validate(plan) {
            warn!(
                event_name = "ticket.update.invalid",
                original_ticket_id = %plan.original_ticket_id,
                duplicate_ticket_id = %plan.duplicate_ticket_id,
                reason = %reason,
                "update of original ticket rejected before any request"
            );
            return Ok(StepOutcome::failed("", StepFailure::Validation(reason)));
        }

        let stage = self
            .stages
            .stage_for(&plan.pipeline)
            .ok_or_else(|| WorkflowError::UnmappedPipeline { pipeline: plan.pipeline.clone() })?;

        let update = TicketUpdate {
            properties: TicketUpdateProperties {
                content: merged_description(&plan.duplicate_description, &plan.original_description),
                hs_pipeline_stage: stage.to_string(),
            },
        };

        let original = &plan.original_ticket_id;
        let outcome = match gateway.update_ticket(original, &update).await {
            Ok(response) if response.is_status(200) => StepOutcome::success(format!(
                "Ticket {original} description and stage updated successfully."
            )),
            Ok(response) => StepOutcome::failed(
                format!("Failed to update original ticket {original}"),
                StepFailure::RemoteRejection { status: response.status, body: response.body },
            ),
            Err(error) => StepOutcome::failed(
                format!("Update request for ticket {original} did not complete"),
                StepFailure::Transport(error.to_string()),
            ),
        };

        if outcome.is_success() {
            info!(
                event_name = "ticket.update.applied",
                original_ticket_id = %original,
                stage,
                "original ticket description and stage updated"
            );
        } else {
            warn!(
                event_name = "ticket.update.failed",
                original_ticket_id = %original,
                detail = %outcome.message(),
                "original ticket update failed"
            );
        }
        Ok(outcome)
    }

    /// 200 (merged) and 202 (accepted for async processing) both count as success.
    pub async fn merge_duplicate(
        &self,
        gateway: &dyn CrmGateway,
        original: &TicketId,
        duplicate: &TicketId,
    ) -> StepOutcome {
        let request = MergeRequest {
            primary_object_id: original.0.clone(),
            object_id_to_merge: duplicate.0.clone(),
        };

        let outcome = match gateway.merge_tickets(&request).await {
            Ok(response) if response.is_status(200) || response.is_status(202) => {
                StepOutcome::success(format!(
                    "Ticket {duplicate} has been successfully merged into {original}."
                ))
            }
            Ok(response) => StepOutcome::failed(
                "Failed to merge tickets",
                StepFailure::RemoteRejection { status: response.status, body: response.body },
            ),
            Err(error) => StepOutcome::failed(
                format!("Merge request for ticket {duplicate} did not complete"),
                StepFailure::Transport(error.to_string()),
            ),
        };

        if outcome.is_success() {
            info!(
                event_name = "ticket.merge.completed",
                original_ticket_id = %original,
                duplicate_ticket_id = %duplicate,
                "duplicate ticket merged"
            );
        } else {
            warn!(
                event_name = "ticket.merge.failed",
                original_ticket_id = %original,
                duplicate_ticket_id = %duplicate,
                detail = %outcome.message(),
                "duplicate ticket merge failed"
            );
        }
        outcome
    }
}

fn validate(plan: &MergePlan) -> Option<String> {
    let missing: Vec<&str> = [
        ("original_ticket_id", plan.original_ticket_id.0.as_str()),
        ("duplicate_ticket_id", plan.duplicate_ticket_id.0.as_str()),
        ("original_description", plan.original_description.as_str()),
        ("duplicate_description", plan.duplicate_description.as_str()),
        ("pipeline", plan.pipeline.as_str()),
    ]
    .into_iter()
    .filter(|(_, value)| value.is_empty())
    .map(|(name, _)| name)
    .collect();

    if !missing.is_empty() {
        return Some(format!("All input parameters must be provided (missing: {}).", missing.join(", ")));
    }

    if plan.original_ticket_id == plan.duplicate_ticket_id {
        return Some("original_ticket_id and duplicate_ticket_id cannot be the same.".to_string());
    }

    None
}
