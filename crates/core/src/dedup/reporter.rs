use crate::domain::event::{OutputFields, WorkflowOutput};
use crate::domain::ticket::{ContactId, DuplicateFlag, MergeStatus, Ticket, TicketCandidate};

pub fn report(contact_id: &ContactId, candidates: &[&Ticket], merge_status: MergeStatus) -> WorkflowOutput {
    WorkflowOutput {
        output_fields: OutputFields {
            contact_id: contact_id.0.clone(),
            open_tickets: candidates.iter().map(|ticket| TicketCandidate::from(*ticket)).collect(),
            is_duplicate: DuplicateFlag::from_candidate_count(candidates.len()),
            merge_status,
        },
    }
}
