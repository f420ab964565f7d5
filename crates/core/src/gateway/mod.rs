use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ticket::{ContactId, TicketId};
use crate::wire::{BatchReadRequest, MergeRequest, TicketUpdate};

pub mod memory;

pub use memory::{ticket_record, InMemoryCrmGateway, RecordedCall, ScriptedResponse};

/// Raw status and body of a CRM call. Status interpretation belongs to the
/// workflow stages, not to the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrmResponse {
    pub status: u16,
    pub body: String,
}

impl CrmResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_status(&self, expected: u16) -> bool {
        self.status == expected
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssociationQuery {
    pub contact_id: ContactId,
    pub limit: u32,
    pub after: Option<String>,
}

/// The four CRM operations the duplicate workflow depends on.
#[async_trait]
pub trait CrmGateway: Send + Sync {
    async fn list_ticket_associations(
        &self,
        query: &AssociationQuery,
    ) -> Result<CrmResponse, TransportError>;

    async fn batch_read_tickets(
        &self,
        request: &BatchReadRequest,
    ) -> Result<CrmResponse, TransportError>;

    async fn update_ticket(
        &self,
        ticket_id: &TicketId,
        update: &TicketUpdate,
    ) -> Result<CrmResponse, TransportError>;

    async fn merge_tickets(&self, request: &MergeRequest) -> Result<CrmResponse, TransportError>;
}
