//! JSON shapes exchanged with the CRM REST API.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const PROPERTY_CATEGORY: &str = "hs_ticket_category";
pub const PROPERTY_CONTENT: &str = "content";
pub const PROPERTY_PIPELINE: &str = "hs_pipeline";
pub const PROPERTY_PIPELINE_STAGE: &str = "hs_pipeline_stage";
pub const PROPERTY_CREATED_AT: &str = "createdate";
pub const PROPERTY_OBJECT_ID: &str = "hs_object_id";

/// Largest id list the batch read endpoint accepts in one request.
pub const BATCH_READ_MAX_INPUTS: usize = 100;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AssociationPage {
    #[serde(default)]
    pub results: Vec<AssociationEdge>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl AssociationPage {
    pub fn next_after(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|paging| paging.next.as_ref())
            .map(|next| next.after.as_str())
            .filter(|after| !after.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AssociationEdge {
    #[serde(rename = "toObjectId", deserialize_with = "string_or_number")]
    pub to_object_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<NextPage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NextPage {
    pub after: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchReadRequest {
    pub inputs: Vec<BatchReadInput>,
    pub properties: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchReadInput {
    pub id: String,
}

impl BatchReadRequest {
    pub fn new(ids: &[String], properties: Vec<String>) -> Self {
        Self { inputs: ids.iter().map(|id| BatchReadInput { id: id.clone() }).collect(), properties }
    }

    pub fn ids(&self) -> Vec<String> {
        self.inputs.iter().map(|input| input.id.clone()).collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct BatchReadResponse {
    #[serde(default)]
    pub results: Vec<TicketRecord>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Option<String>>,
}

impl TicketRecord {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|value| value.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TicketUpdate {
    pub properties: TicketUpdateProperties,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TicketUpdateProperties {
    pub content: String,
    pub hs_pipeline_stage: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub primary_object_id: String,
    pub object_id_to_merge: String,
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

pub(crate) fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(value) => Ok(Some(value)),
        Value::Number(value) => Ok(Some(value.to_string())),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {other}"))),
    }
}
