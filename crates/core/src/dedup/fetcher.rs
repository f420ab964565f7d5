use std::collections::HashSet;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::CrmConfig;
use crate::domain::ticket::{ContactId, Ticket, TicketId};
use crate::errors::{FetchStage, WorkflowError};
use crate::gateway::{AssociationQuery, CrmGateway, CrmResponse};
use crate::wire::{
    AssociationPage, BatchReadRequest, BatchReadResponse, TicketRecord, BATCH_READ_MAX_INPUTS,
    PROPERTY_CATEGORY, PROPERTY_CONTENT, PROPERTY_CREATED_AT, PROPERTY_OBJECT_ID,
    PROPERTY_PIPELINE,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchOptions {
    pub page_limit: u32,
    pub paginate: bool,
    pub max_pages: u32,
    pub open_property: String,
    pub open_value: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_limit: 100,
            paginate: false,
            max_pages: 10,
            open_property: "is_ticket_open_".to_string(),
            open_value: "1".to_string(),
        }
    }
}

impl From<&CrmConfig> for FetchOptions {
    fn from(config: &CrmConfig) -> Self {
        Self {
            page_limit: config.association_page_limit,
            paginate: config.paginate_associations,
            max_pages: config.max_association_pages,
            open_property: config.open_property.clone(),
            open_value: config.open_value.clone(),
        }
    }
}

impl FetchOptions {
    fn requested_properties(&self) -> Vec<String> {
        vec![
            PROPERTY_OBJECT_ID.to_string(),
            self.open_property.clone(),
            PROPERTY_CATEGORY.to_string(),
            PROPERTY_CONTENT.to_string(),
            PROPERTY_PIPELINE.to_string(),
            PROPERTY_CREATED_AT.to_string(),
        ]
    }

    fn ticket_from_record(&self, record: TicketRecord) -> Ticket {
        let text = |name: &str| record.property(name).unwrap_or_default().to_string();
        Ticket {
            id: TicketId(record.id.clone()),
            is_open: record.property(&self.open_property) == Some(self.open_value.as_str()),
            category: text(PROPERTY_CATEGORY),
            pipeline: text(PROPERTY_PIPELINE),
            description: text(PROPERTY_CONTENT),
            created_at: record.property(PROPERTY_CREATED_AT).map(str::to_string),
        }
    }
}

/// Loads every ticket associated with a contact.
///
/// Association listing and batch reads must both succeed; any failure aborts
/// the invocation instead of continuing with a partial ticket set.
pub struct AssociationFetcher<'a> {
    gateway: &'a dyn CrmGateway,
    options: &'a FetchOptions,
}

impl<'a> AssociationFetcher<'a> {
    pub fn new(gateway: &'a dyn CrmGateway, options: &'a FetchOptions) -> Self {
        Self { gateway, options }
    }

    pub async fn fetch(&self, contact_id: &ContactId) -> Result<Vec<Ticket>, WorkflowError> {
        let ids = self.associated_ticket_ids(contact_id).await?;
        if ids.is_empty() {
            info!(
                event_name = "workflow.fetch.no_associations",
                contact_id = %contact_id,
                "contact has no associated tickets"
            );
            return Ok(Vec::new());
        }

        let tickets = self.read_tickets(&ids).await?;
        info!(
            event_name = "workflow.fetch.completed",
            contact_id = %contact_id,
            associated = ids.len(),
            fetched = tickets.len(),
            "associated tickets fetched"
        );
        Ok(tickets)
    }

    pub async fn associated_ticket_ids(
        &self,
        contact_id: &ContactId,
    ) -> Result<Vec<String>, WorkflowError> {
        let stage = FetchStage::AssociationListing;
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut after = None;
        let mut pages = 0_u32;

        loop {
            let query = AssociationQuery {
                contact_id: contact_id.clone(),
                limit: self.options.page_limit,
                after: after.take(),
            };
            let response = self
                .gateway
                .list_ticket_associations(&query)
                .await
                .map_err(|source| WorkflowError::FetchTransport { stage, source })?;
            let page: AssociationPage = decode_success(stage, response)?;
            pages += 1;

            let next = page.next_after().map(str::to_string);
            for edge in page.results {
                if seen.insert(edge.to_object_id.clone()) {
                    ids.push(edge.to_object_id);
                }
            }

            match next {
                Some(cursor) if self.options.paginate && pages < self.options.max_pages => {
                    debug!(contact_id = %contact_id, page = pages, "following association cursor");
                    after = Some(cursor);
                }
                Some(_) if self.options.paginate => {
                    warn!(
                        event_name = "workflow.fetch.page_cap_reached",
                        contact_id = %contact_id,
                        pages,
                        "association pagination stopped at the configured page cap"
                    );
                    break;
                }
                Some(_) => {
                    debug!(
                        contact_id = %contact_id,
                        "further association pages exist; only the first page is considered"
                    );
                    break;
                }
                None => break,
            }
        }

        Ok(ids)
    }

    /// Reads ticket details in as few batch requests as the CRM allows: one
    /// request for a single association page, one per hundred ids beyond that.
    pub async fn read_tickets(&self, ids: &[String]) -> Result<Vec<Ticket>, WorkflowError> {
        let stage = FetchStage::BatchRead;
        let mut tickets = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(BATCH_READ_MAX_INPUTS) {
            let request = BatchReadRequest::new(chunk, self.options.requested_properties());
            let response = self
                .gateway
                .batch_read_tickets(&request)
                .await
                .map_err(|source| WorkflowError::FetchTransport { stage, source })?;
            let batch: BatchReadResponse = decode_success(stage, response)?;
            tickets.extend(batch.results.into_iter().map(|record| self.options.ticket_from_record(record)));
        }

        Ok(tickets)
    }
}

fn decode_success<T: DeserializeOwned>(
    stage: FetchStage,
    response: CrmResponse,
) -> Result<T, WorkflowError> {
    if !response.is_status(200) {
        return Err(WorkflowError::RemoteFetch {
            stage,
            status: response.status,
            body: response.body,
        });
    }

    serde_json::from_str(&response.body)
        .map_err(|error| WorkflowError::MalformedResponse { stage, message: error.to_string() })
}

#[cfg(test)]
mod tests {
    use crate::domain::ticket::ContactId;
    use crate::errors::{FetchStage, WorkflowError};
    use crate::gateway::{ticket_record, CrmResponse, InMemoryCrmGateway, RecordedCall, TransportError};

    use super::{AssociationFetcher, FetchOptions};

    fn open_ticket(id: &str) -> crate::wire::TicketRecord {
        ticket_record(
            id,
            &[
                ("is_ticket_open_", "1"),
                ("hs_ticket_category", "payment"),
                ("hs_pipeline", "P1"),
                ("content", "text"),
                ("createdate", "2024-01-01T00:00:00Z"),
            ],
        )
    }

    #[tokio::test]
    async fn fetch_issues_one_batch_read_for_all_tickets() {
        let gateway = InMemoryCrmGateway::new()
            .with_ticket("C1", open_ticket("1"))
            .with_ticket("C1", open_ticket("2"))
            .with_ticket("C1", open_ticket("3"));
        let options = FetchOptions::default();

        let tickets = AssociationFetcher::new(&gateway, &options)
            .fetch(&ContactId("C1".to_string()))
            .await
            .expect("fetch should succeed");

        assert_eq!(tickets.len(), 3);
        assert!(tickets.iter().all(|ticket| ticket.is_open));
        let batch_reads: Vec<_> = gateway
            .calls()
            .into_iter()
            .filter(|call| matches!(call, RecordedCall::BatchRead { .. }))
            .collect();
        assert_eq!(batch_reads.len(), 1);
        assert!(matches!(
            &batch_reads[0],
            RecordedCall::BatchRead { ids, properties }
                if ids.len() == 3 && properties.contains(&"createdate".to_string())
        ));
    }

    #[tokio::test]
    async fn batch_read_requests_object_id_and_workflow_properties() {
        let gateway = InMemoryCrmGateway::new().with_ticket("C1", open_ticket("1"));
        let options = FetchOptions::default();

        AssociationFetcher::new(&gateway, &options)
            .fetch(&ContactId("C1".to_string()))
            .await
            .expect("fetch should succeed");

        let properties = gateway
            .calls()
            .into_iter()
            .find_map(|call| match call {
                RecordedCall::BatchRead { properties, .. } => Some(properties),
                _ => None,
            })
            .expect("batch read issued");
        assert_eq!(
            properties,
            vec!["hs_object_id", "is_ticket_open_", "hs_ticket_category", "content", "hs_pipeline", "createdate"]
        );
    }

    #[tokio::test]
    async fn empty_association_set_skips_batch_read() {
        let gateway = InMemoryCrmGateway::new();
        let options = FetchOptions::default();

        let tickets = AssociationFetcher::new(&gateway, &options)
            .fetch(&ContactId("C2".to_string()))
            .await
            .expect("empty set is not an error");

        assert!(tickets.is_empty());
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn non_success_listing_is_fatal() {
        let gateway = InMemoryCrmGateway::new()
            .with_association_response(Ok(CrmResponse::new(401, "{\"message\":\"expired\"}")));
        let options = FetchOptions::default();

        let error = AssociationFetcher::new(&gateway, &options)
            .fetch(&ContactId("C1".to_string()))
            .await
            .expect_err("401 must abort");

        assert!(matches!(
            error,
            WorkflowError::RemoteFetch { stage: FetchStage::AssociationListing, status: 401, .. }
        ));
    }

    #[tokio::test]
    async fn batch_read_failure_is_fatal() {
        let gateway = InMemoryCrmGateway::new()
            .with_ticket("C1", open_ticket("1"))
            .with_batch_read_response(Err(TransportError::Timeout("after 30s".to_string())));
        let options = FetchOptions::default();

        let error = AssociationFetcher::new(&gateway, &options)
            .fetch(&ContactId("C1".to_string()))
            .await
            .expect_err("transport fault must abort");

        assert!(matches!(error, WorkflowError::FetchTransport { stage: FetchStage::BatchRead, .. }));
    }

    #[tokio::test]
    async fn single_page_is_read_unless_pagination_is_enabled() {
        let mut gateway = InMemoryCrmGateway::new();
        for id in 1..=5 {
            gateway = gateway.with_ticket("C1", open_ticket(&id.to_string()));
        }
        let single_page = FetchOptions { page_limit: 2, ..FetchOptions::default() };
        let ids = AssociationFetcher::new(&gateway, &single_page)
            .associated_ticket_ids(&ContactId("C1".to_string()))
            .await
            .expect("listing");
        assert_eq!(ids, vec!["1", "2"]);

        let paginated = FetchOptions { page_limit: 2, paginate: true, ..FetchOptions::default() };
        let ids = AssociationFetcher::new(&gateway, &paginated)
            .associated_ticket_ids(&ContactId("C1".to_string()))
            .await
            .expect("listing");
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);

        let capped = FetchOptions { page_limit: 2, paginate: true, max_pages: 2, ..FetchOptions::default() };
        let ids = AssociationFetcher::new(&gateway, &capped)
            .associated_ticket_ids(&ContactId("C1".to_string()))
            .await
            .expect("listing");
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn malformed_listing_body_is_reported() {
        let gateway =
            InMemoryCrmGateway::new().with_association_response(Ok(CrmResponse::new(200, "<html>")));
        let options = FetchOptions::default();

        let error = AssociationFetcher::new(&gateway, &options)
            .fetch(&ContactId("C1".to_string()))
            .await
            .expect_err("html is not a page");

        assert_eq!(error.error_class(), "malformed_response");
    }

    #[test]
    fn open_flag_follows_configured_sentinel() {
        let options = FetchOptions { open_value: "true".to_string(), ..FetchOptions::default() };
        let ticket = options.ticket_from_record(open_ticket("1"));
        assert!(!ticket.is_open);
        assert_eq!(ticket.category, "payment");
        assert_eq!(ticket.created_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    }
}
