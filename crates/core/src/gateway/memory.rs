use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;

use crate::domain::ticket::TicketId;
use crate::wire::{
    BatchReadRequest, MergeRequest, TicketRecord, TicketUpdate, PROPERTY_CONTENT,
    PROPERTY_PIPELINE_STAGE,
};

use super::{AssociationQuery, CrmGateway, CrmResponse, TransportError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCall {
    ListAssociations { contact_id: String, limit: u32, after: Option<String> },
    BatchRead { ids: Vec<String>, properties: Vec<String> },
    Update { ticket_id: String, content: String, stage: String },
    Merge { primary_object_id: String, object_id_to_merge: String },
}

pub type ScriptedResponse = Result<CrmResponse, TransportError>;

#[derive(Default)]
struct GatewayState {
    associations: HashMap<String, Vec<String>>,
    tickets: BTreeMap<String, TicketRecord>,
    association_response: Option<ScriptedResponse>,
    batch_read_response: Option<ScriptedResponse>,
    update_response: Option<ScriptedResponse>,
    merge_response: Option<ScriptedResponse>,
    calls: Vec<RecordedCall>,
}

/// CRM double holding tickets and associations in memory.
///
/// Calls are recorded in order. Each operation answers from the stored data
/// unless a scripted response was installed for it.
#[derive(Default)]
pub struct InMemoryCrmGateway {
    state: Mutex<GatewayState>,
}

impl InMemoryCrmGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a ticket and associates it with the contact, preserving insertion order.
    pub fn with_ticket(mut self, contact_id: &str, record: TicketRecord) -> Self {
        let state = self.state_mut();
        state.associations.entry(contact_id.to_string()).or_default().push(record.id.clone());
        state.tickets.insert(record.id.clone(), record);
        self
    }

    pub fn with_association_response(mut self, response: ScriptedResponse) -> Self {
        self.state_mut().association_response = Some(response);
        self
    }

    pub fn with_batch_read_response(mut self, response: ScriptedResponse) -> Self {
        self.state_mut().batch_read_response = Some(response);
        self
    }

    pub fn with_update_response(mut self, response: ScriptedResponse) -> Self {
        self.state_mut().update_response = Some(response);
        self
    }

    pub fn with_merge_response(mut self, response: ScriptedResponse) -> Self {
        self.state_mut().merge_response = Some(response);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn update_calls(&self) -> usize {
        self.calls().iter().filter(|call| matches!(call, RecordedCall::Update { .. })).count()
    }

    pub fn merge_calls(&self) -> usize {
        self.calls().iter().filter(|call| matches!(call, RecordedCall::Merge { .. })).count()
    }

    pub fn ticket(&self, id: &str) -> Option<TicketRecord> {
        self.lock().tickets.get(id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn state_mut(&mut self) -> &mut GatewayState {
        match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Builds a ticket record from property pairs.
pub fn ticket_record(id: &str, properties: &[(&str, &str)]) -> TicketRecord {
    let mut map: BTreeMap<String, Option<String>> = properties
        .iter()
        .map(|(name, value)| (name.to_string(), Some(value.to_string())))
        .collect();
    map.entry("hs_object_id".to_string()).or_insert_with(|| Some(id.to_string()));
    TicketRecord { id: id.to_string(), properties: map }
}

#[async_trait]
impl CrmGateway for InMemoryCrmGateway {
    async fn list_ticket_associations(
        &self,
        query: &AssociationQuery,
    ) -> Result<CrmResponse, TransportError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall::ListAssociations {
            contact_id: query.contact_id.0.clone(),
            limit: query.limit,
            after: query.after.clone(),
        });
        if let Some(response) = state.association_response.clone() {
            return response;
        }

        let ids = state.associations.get(&query.contact_id.0).cloned().unwrap_or_default();
        let offset = query.after.as_deref().and_then(|after| after.parse::<usize>().ok()).unwrap_or(0);
        let end = offset.saturating_add(query.limit as usize).min(ids.len());
        let page = ids.get(offset..end).unwrap_or_default();
        let results: Vec<_> = page
            .iter()
            .map(|id| {
                json!({
                    "toObjectId": id.parse::<u64>().map(|numeric| json!(numeric)).unwrap_or_else(|_| json!(id)),
                    "associationTypes": [{"category": "HUBSPOT_DEFINED", "typeId": 15, "label": null}]
                })
            })
            .collect();

        let mut body = json!({ "results": results });
        if end < ids.len() {
            body["paging"] = json!({ "next": { "after": end.to_string() } });
        }
        Ok(CrmResponse::new(200, body.to_string()))
    }

    async fn batch_read_tickets(
        &self,
        request: &BatchReadRequest,
    ) -> Result<CrmResponse, TransportError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall::BatchRead {
            ids: request.ids(),
            properties: request.properties.clone(),
        });
        if let Some(response) = state.batch_read_response.clone() {
            return response;
        }

        let results: Vec<TicketRecord> = request
            .inputs
            .iter()
            .filter_map(|input| state.tickets.get(&input.id))
            .map(|record| TicketRecord {
                id: record.id.clone(),
                properties: request
                    .properties
                    .iter()
                    .map(|name| (name.clone(), record.properties.get(name).cloned().flatten()))
                    .collect(),
            })
            .collect();

        let body = json!({ "status": "COMPLETE", "results": results });
        Ok(CrmResponse::new(200, body.to_string()))
    }

    async fn update_ticket(
        &self,
        ticket_id: &TicketId,
        update: &TicketUpdate,
    ) -> Result<CrmResponse, TransportError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall::Update {
            ticket_id: ticket_id.0.clone(),
            content: update.properties.content.clone(),
            stage: update.properties.hs_pipeline_stage.clone(),
        });
        let response = state
            .update_response
            .clone()
            .unwrap_or_else(|| Ok(CrmResponse::new(200, json!({ "id": ticket_id.0 }).to_string())));

        if matches!(response, Ok(ref ok) if ok.is_status(200)) {
            if let Some(record) = state.tickets.get_mut(&ticket_id.0) {
                record
                    .properties
                    .insert(PROPERTY_CONTENT.to_string(), Some(update.properties.content.clone()));
                record.properties.insert(
                    PROPERTY_PIPELINE_STAGE.to_string(),
                    Some(update.properties.hs_pipeline_stage.clone()),
                );
            }
        }
        response
    }

    async fn merge_tickets(&self, request: &MergeRequest) -> Result<CrmResponse, TransportError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall::Merge {
            primary_object_id: request.primary_object_id.clone(),
            object_id_to_merge: request.object_id_to_merge.clone(),
        });
        state.merge_response.clone().unwrap_or_else(|| {
            Ok(CrmResponse::new(200, json!({ "id": request.primary_object_id }).to_string()))
        })
    }
}
