//! Read-only upstream repositories consumed by the harvest phases.
//!
//! None of these share a transaction with the destination store or with each
//! other. Reads taken during one harvest may be skewed between sources.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;
use crate::types::EffortType;

/// Instructor as described by an upstream system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInstructor {
    pub person_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub department: Option<String>,
    pub title: Option<String>,
}

/// Course offering as described by an upstream system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCourse {
    pub crn: String,
    pub subj_code: String,
    pub crse_numb: String,
    pub seq_numb: String,
    pub enrollment: i32,
    pub units: f64,
    pub cust_dept: String,
}

/// One instructor/course/effort triple from the curriculum system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurriculumEffortRow {
    pub instructor: SourceInstructor,
    pub course: SourceCourse,
    pub effort_type_id: String,
    pub role: String,
    pub hours: Option<i32>,
    pub weeks: Option<i32>,
}

/// A registrar course with its assigned instructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrarCourse {
    pub course: SourceCourse,
    pub assignments: Vec<RegistrarAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrarAssignment {
    pub instructor: SourceInstructor,
    pub effort_type_id: String,
    pub role: String,
    pub hours: Option<i32>,
}

/// One instructor scheduled on one rotation for one week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalAssignment {
    pub instructor: SourceInstructor,
    pub week_id: i32,
    pub rotation_id: i32,
    pub rotation_name: String,
    /// Course the rotation is taught under
    pub course: SourceCourse,
    pub effort_type_id: String,
}

/// Account from the identity directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryAccount {
    pub person_id: i64,
    pub login_id: String,
    pub first_name: String,
    pub last_name: String,
    pub department: Option<String>,
    pub title: Option<String>,
}

/// Primary curriculum system.
#[async_trait]
pub trait CurriculumSource: Send + Sync {
    /// Returns the term's effort triples, one batch per custodial department.
    async fn effort_batches(
        &self,
        term_code: i32,
    ) -> Result<Vec<Vec<CurriculumEffortRow>>, HarvestError>;
}

/// Secondary registrar system.
#[async_trait]
pub trait RegistrarSource: Send + Sync {
    async fn courses(&self, term_code: i32) -> Result<Vec<RegistrarCourse>, HarvestError>;
}

/// Identity directory, which also serves the clinical rotation schedule.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn clinical_assignments(
        &self,
        term_code: i32,
    ) -> Result<Vec<ClinicalAssignment>, HarvestError>;

    async fn accounts(&self) -> Result<Vec<DirectoryAccount>, HarvestError>;
}

/// Code tables and instructor lookups.
#[async_trait]
pub trait LookupStore: Send + Sync {
    async fn effort_types(&self) -> Result<Vec<EffortType>, HarvestError>;

    /// Resolves the effort department for a person, given the department the
    /// upstream source reported. `None` means no department could be found.
    async fn resolve_department(
        &self,
        person_id: i64,
        reported: Option<&str>,
    ) -> Result<Option<String>, HarvestError>;
}
