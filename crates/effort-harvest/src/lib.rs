//! Term harvest pipeline.
//!
//! Rebuilds an academic term's instructors, courses and effort records from
//! several upstream systems. A harvest can be previewed without side effects
//! or executed, which replaces the term's data in one transaction.

pub mod audit;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod phases;
pub mod r_course;
pub mod removed;
pub mod sources;
pub mod summary;
pub mod term;
pub mod types;

pub use config::{HarvestConfig, RCourseConfig};
pub use db::EffortDb;
pub use error::HarvestError;
pub use orchestrator::{HarvestOrchestrator, HarvestSources};
pub use term::{TermDates, TermStatus};
pub use types::{HarvestPreview, HarvestResult, HarvestSummary};
