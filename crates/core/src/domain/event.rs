use serde::{Deserialize, Serialize};

use crate::domain::ticket::{ContactId, DuplicateFlag, MergeStatus, TicketCandidate, TicketId};
use crate::errors::WorkflowError;
use crate::wire::optional_string_or_number;

/// Event payload delivered by the workflow platform.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkflowEvent {
    #[serde(rename = "inputFields")]
    pub input_fields: InputFields,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct InputFields {
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub contact_id: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub ticket_id: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub ticket_pipeline: Option<String>,
    #[serde(default)]
    pub ticket_category: Option<String>,
    #[serde(default)]
    pub ticket_description: Option<String>,
}

/// The incoming ticket as seen by the workflow, after presence checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingTicket {
    pub contact_id: ContactId,
    pub ticket_id: TicketId,
    pub pipeline: String,
    pub category: String,
    pub description: String,
}

impl WorkflowEvent {
    pub fn from_json(raw: &str) -> Result<Self, WorkflowError> {
        serde_json::from_str(raw)
            .map_err(|error| WorkflowError::InvalidEvent(format!("event is not valid JSON: {error}")))
    }

    /// Identifiers must be non-blank. Pipeline, category and description only
    /// need to be present; blank values are left for the mutator to reject.
    pub fn incoming_ticket(&self) -> Result<IncomingTicket, WorkflowError> {
        let fields = &self.input_fields;
        let contact_id = required_identifier("contact_id", fields.contact_id.as_deref())?;
        let ticket_id = required_identifier("ticket_id", fields.ticket_id.as_deref())?;

        Ok(IncomingTicket {
            contact_id: ContactId(contact_id),
            ticket_id: TicketId(ticket_id),
            pipeline: required_field("ticket_pipeline", fields.ticket_pipeline.as_deref())?,
            category: required_field("ticket_category", fields.ticket_category.as_deref())?,
            description: required_field(
                "ticket_description",
                fields.ticket_description.as_deref(),
            )?,
        })
    }
}

fn required_identifier(name: &str, value: Option<&str>) -> Result<String, WorkflowError> {
    let value = required_field(name, value)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::InvalidEvent(format!("inputFields.{name} must not be blank")));
    }
    Ok(trimmed.to_string())
}

fn required_field(name: &str, value: Option<&str>) -> Result<String, WorkflowError> {
    value
        .map(str::to_string)
        .ok_or_else(|| WorkflowError::InvalidEvent(format!("inputFields.{name} is required")))
}

/// Result payload handed back to the workflow platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOutput {
    #[serde(rename = "outputFields")]
    pub output_fields: OutputFields,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFields {
    pub contact_id: String,
    pub open_tickets: Vec<TicketCandidate>,
    pub is_duplicate: DuplicateFlag,
    pub merge_status: MergeStatus,
}

#[cfg(test)]
mod tests {
    use super::WorkflowEvent;
    use crate::errors::WorkflowError;

    #[test]
    fn parses_platform_event_with_numeric_ids() {
        let event = WorkflowEvent::from_json(
            r#"{"inputFields":{"contact_id":901,"ticket_id":"4410","ticket_pipeline":"0",
                "ticket_category":"payment","ticket_description":"refund missing"}}"#,
        )
        .expect("event should parse");

        let incoming = event.incoming_ticket().expect("all fields present");
        assert_eq!(incoming.contact_id.0, "901");
        assert_eq!(incoming.ticket_id.0, "4410");
        assert_eq!(incoming.pipeline, "0");
        assert_eq!(incoming.description, "refund missing");
    }

    #[test]
    fn missing_field_is_reported_by_name() {
        let event = WorkflowEvent::from_json(
            r#"{"inputFields":{"contact_id":"C1","ticket_id":"T4","ticket_category":"payment",
                "ticket_description":"x"}}"#,
        )
        .expect("event should parse");

        let error = event.incoming_ticket().expect_err("pipeline is missing");
        assert!(matches!(
            error,
            WorkflowError::InvalidEvent(ref message) if message.contains("ticket_pipeline")
        ));
    }

    #[test]
    fn blank_contact_id_is_rejected() {
        let event = WorkflowEvent::from_json(
            r#"{"inputFields":{"contact_id":"  ","ticket_id":"T4","ticket_pipeline":"P1",
                "ticket_category":"payment","ticket_description":"x"}}"#,
        )
        .expect("event should parse");

        assert!(event.incoming_ticket().is_err());
    }

    #[test]
    fn blank_description_passes_presence_check() {
        let event = WorkflowEvent::from_json(
            r#"{"inputFields":{"contact_id":"C1","ticket_id":"T4","ticket_pipeline":"P1",
                "ticket_category":"payment","ticket_description":""}}"#,
        )
        .expect("event should parse");

        let incoming = event.incoming_ticket().expect("presence is enough");
        assert!(incoming.description.is_empty());
    }

    #[test]
    fn malformed_json_is_an_invalid_event() {
        let error = WorkflowEvent::from_json("{not json").expect_err("should fail");
        assert_eq!(error.error_class(), "invalid_event");
    }
}
