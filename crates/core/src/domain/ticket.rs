use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(pub String);

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request-scoped copy of a CRM ticket. The CRM owns the record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub is_open: bool,
    pub category: String,
    pub pipeline: String,
    pub description: String,
    pub created_at: Option<String>,
}

impl Ticket {
    /// Parsed creation timestamp. `None` when the CRM omitted it or sent an unparseable value.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?;
        DateTime::parse_from_rfc3339(raw.trim()).ok().map(|parsed| parsed.with_timezone(&Utc))
    }
}

/// Shape reported back to the calling workflow for each duplicate candidate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCandidate {
    pub original_ticket_id: String,
    pub original_ticket_description: String,
    pub is_open: bool,
    pub created_at: String,
}

impl From<&Ticket> for TicketCandidate {
    fn from(ticket: &Ticket) -> Self {
        Self {
            original_ticket_id: ticket.id.0.clone(),
            original_ticket_description: ticket.description.clone(),
            is_open: ticket.is_open,
            created_at: ticket.created_at.clone().unwrap_or_else(|| "N/A".to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateFlag {
    Yes,
    No,
}

impl DuplicateFlag {
    pub fn from_candidate_count(count: usize) -> Self {
        if count == 0 {
            Self::No
        } else {
            Self::Yes
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    #[default]
    NotApplicable,
    Success,
    Error,
}

impl MergeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotApplicable => "not_applicable",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn can_transition_to(&self, next: MergeStatus) -> bool {
        matches!(
            (self, next),
            (MergeStatus::NotApplicable, MergeStatus::Success)
                | (MergeStatus::NotApplicable, MergeStatus::Error)
        )
    }

    pub fn transition_to(&mut self, next: MergeStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            *self = next;
            return Ok(());
        }

        Err(DomainError::InvalidMergeStatusTransition { from: *self, to: next })
    }
}
