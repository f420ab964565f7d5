pub mod audit;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod errors;
pub mod gateway;
pub mod pipeline;
pub mod wire;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use config::{AppConfig, CandidateSelection, ConfigError, ConfigOverrides, LoadOptions};
pub use dedup::{DuplicateTicketWorkflow, WorkflowRun, WorkflowSettings};
pub use domain::event::{IncomingTicket, WorkflowEvent, WorkflowOutput};
pub use domain::ticket::{ContactId, DuplicateFlag, MergeStatus, Ticket, TicketId};
pub use errors::{StepFailure, StepOutcome, WorkflowError};
pub use gateway::{CrmGateway, CrmResponse, InMemoryCrmGateway, TransportError};
pub use pipeline::PipelineStageMap;
