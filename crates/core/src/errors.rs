use thiserror::Error;

use crate::domain::ticket::MergeStatus;
use crate::gateway::TransportError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid merge status transition from {from:?} to {to:?}")]
    InvalidMergeStatusTransition { from: MergeStatus, to: MergeStatus },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStage {
    AssociationListing,
    BatchRead,
}

impl std::fmt::Display for FetchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AssociationListing => f.write_str("association listing"),
            Self::BatchRead => f.write_str("ticket batch read"),
        }
    }
}

/// Failures that abort an invocation without an output payload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("{stage} returned status {status}: {body}")]
    RemoteFetch { stage: FetchStage, status: u16, body: String },
    #[error("{stage} transport failure: {source}")]
    FetchTransport {
        stage: FetchStage,
        #[source]
        source: TransportError,
    },
    #[error("{stage} response could not be decoded: {message}")]
    MalformedResponse { stage: FetchStage, message: String },
    #[error("no new-ticket stage is configured for pipeline `{pipeline}`")]
    UnmappedPipeline { pipeline: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl WorkflowError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::InvalidEvent(_) => "invalid_event",
            Self::RemoteFetch { .. } => "remote_fetch",
            Self::FetchTransport { .. } => "fetch_transport",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::UnmappedPipeline { .. } => "configuration",
            Self::Domain(_) => "domain",
        }
    }
}

/// Failures of the update and merge steps. These are folded into the output
/// payload instead of aborting the invocation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StepFailure {
    #[error("{0}")]
    Validation(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("status code: {status}, response: {body}")]
    RemoteRejection { status: u16, body: String },
}

impl StepFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transport(_) => "transport",
            Self::RemoteRejection { .. } => "remote_rejection",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Success { message: String },
    Failed { message: String, failure: StepFailure },
}

impl StepOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success { message: message.into() }
    }

    pub fn failed(context: impl Into<String>, failure: StepFailure) -> Self {
        let context = context.into();
        let message =
            if context.is_empty() { failure.to_string() } else { format!("{context}. {failure}") };
        Self::Failed { message, failure }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Success { message } | Self::Failed { message, .. } => message,
        }
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            Self::Success { .. } => None,
            Self::Failed { failure, .. } => Some(failure),
        }
    }
}
