//! HTTP gateway for the HubSpot CRM v3/v4 ticket APIs.
//!
//! The client only moves bytes: every call returns the raw status and body so
//! the workflow stages in `ticket-merge-core` decide what counts as success.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, warn};

use ticket_merge_core::config::CrmConfig;
use ticket_merge_core::domain::ticket::TicketId;
use ticket_merge_core::gateway::{AssociationQuery, CrmGateway, CrmResponse, TransportError};
use ticket_merge_core::wire::{BatchReadRequest, MergeRequest, TicketUpdate};

#[derive(Clone, Debug)]
pub struct HubSpotSettings {
    pub base_url: String,
    pub access_token: SecretString,
    pub timeout: Duration,
}

impl HubSpotSettings {
    pub fn from_config(config: &CrmConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            access_token: config.access_token.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[derive(Debug, Error)]
pub enum HubSpotError {
    #[error("invalid CRM base url `{url}`: {message}")]
    InvalidBaseUrl { url: String, message: String },
    #[error("CRM access token cannot be sent as a header: {0}")]
    InvalidToken(String),
    #[error("failed to build CRM HTTP client: {0}")]
    Client(String),
}

#[derive(Clone, Debug)]
pub struct HubSpotClient {
    base_url: Url,
    client: Client,
}

impl HubSpotClient {
    pub fn new(settings: HubSpotSettings) -> Result<Self, HubSpotError> {
        let base_url = Url::parse(settings.base_url.trim()).map_err(|error| {
            HubSpotError::InvalidBaseUrl { url: settings.base_url.clone(), message: error.to_string() }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(HubSpotError::InvalidBaseUrl {
                url: settings.base_url,
                message: "url cannot carry a path".to_string(),
            });
        }

        let mut bearer =
            header::HeaderValue::from_str(&format!("Bearer {}", settings.access_token.expose_secret()))
                .map_err(|error| HubSpotError::InvalidToken(error.to_string()))?;
        bearer.set_sensitive(true);

        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, bearer);
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| HubSpotError::Client(error.to_string()))?;

        Ok(Self { base_url, client })
    }

    pub fn from_config(config: &CrmConfig) -> Result<Self, HubSpotError> {
        Self::new(HubSpotSettings::from_config(config))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends percent-encoded path segments to the base url.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<CrmResponse, TransportError> {
        let started = Instant::now();
        let response = request.send().await.map_err(|error| {
            let transport = transport_error(error);
            warn!(
                event_name = "crm.request.transport_failed",
                operation,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %transport,
                "CRM request did not complete"
            );
            transport
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        debug!(
            event_name = "crm.request.completed",
            operation,
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "CRM request completed"
        );

        Ok(CrmResponse::new(status, body))
    }
}

fn transport_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}

#[async_trait]
impl CrmGateway for HubSpotClient {
    async fn list_ticket_associations(
        &self,
        query: &AssociationQuery,
    ) -> Result<CrmResponse, TransportError> {
        let url = self.endpoint(&[
            "crm",
            "v4",
            "objects",
            "contacts",
            &query.contact_id.0,
            "associations",
            "tickets",
        ]);
        let mut params = vec![("limit", query.limit.to_string())];
        if let Some(after) = &query.after {
            params.push(("after", after.clone()));
        }

        self.send("list_ticket_associations", self.client.get(url).query(&params)).await
    }

    async fn batch_read_tickets(
        &self,
        request: &BatchReadRequest,
    ) -> Result<CrmResponse, TransportError> {
        let url = self.endpoint(&["crm", "v3", "objects", "tickets", "batch", "read"]);
        self.send("batch_read_tickets", self.client.post(url).json(request)).await
    }

    async fn update_ticket(
        &self,
        ticket_id: &TicketId,
        update: &TicketUpdate,
    ) -> Result<CrmResponse, TransportError> {
        let url = self.endpoint(&["crm", "v3", "objects", "tickets", &ticket_id.0]);
        self.send("update_ticket", self.client.patch(url).json(update)).await
    }

    async fn merge_tickets(&self, request: &MergeRequest) -> Result<CrmResponse, TransportError> {
        let url = self.endpoint(&["crm", "v3", "objects", "tickets", "merge"]);
        self.send("merge_tickets", self.client.post(url).json(request)).await
    }
}
