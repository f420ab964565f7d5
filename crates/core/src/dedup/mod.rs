//! Duplicate ticket detection and merge, one stage per module.
//!
//! `fetcher` loads the contact's tickets, `filter` picks duplicate candidates,
//! `mutator` rewrites and merges, `reporter` shapes the platform payload and
//! `workflow` drives the stages in order.

pub mod fetcher;
pub mod filter;
pub mod mutator;
pub mod reporter;
pub mod workflow;

pub use fetcher::{AssociationFetcher, FetchOptions};
pub use filter::{duplicate_candidates, select_target, DuplicateCriteria};
pub use mutator::{merged_description, MergeAttempt, MergePlan, RecordMerger, MERGE_BANNER};
pub use reporter::report;
pub use workflow::{DuplicateTicketWorkflow, WorkflowRun, WorkflowSettings};
