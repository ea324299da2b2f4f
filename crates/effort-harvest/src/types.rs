/// Types shared by the harvest phases, the orchestrator and callers
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HarvestConfig;

/// Upstream system a harvested row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarvestSource {
    Primary,
    Secondary,
    Clinical,
    Guest,
    /// Generated by R-course post-processing
    RCourse,
}

impl HarvestSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarvestSource::Primary => "Primary",
            HarvestSource::Secondary => "Secondary",
            HarvestSource::Clinical => "Clinical",
            HarvestSource::Guest => "Guest",
            HarvestSource::RCourse => "RCourse",
        }
    }
}

/// Classification of teaching effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffortType {
    pub id: String,
    pub description: String,
    /// Weeks-based (clinical) effort rather than hours
    pub uses_weeks: bool,
    /// May appear on courses whose number ends in `R`
    pub allowed_on_r_courses: bool,
    pub is_active: bool,
}

/// Amount of effort recorded on one effort row. Exactly one unit applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffortAmount {
    Hours(i32),
    Weeks(i32),
}

impl EffortAmount {
    /// Picks the recorded unit for an effort row.
    ///
    /// Weeks-based types record weeks from the configured cutoff term on.
    /// Before the cutoff they record hours, derived from the week count when
    /// the source gave no hours.
    pub fn resolve(
        effort_type: &EffortType,
        term_code: i32,
        hours: Option<i32>,
        weeks: Option<i32>,
        config: &HarvestConfig,
    ) -> Self {
        if effort_type.uses_weeks {
            if term_code >= config.clinical_weeks_cutoff_term {
                EffortAmount::Weeks(weeks.unwrap_or(0))
            } else {
                EffortAmount::Hours(hours.unwrap_or_else(|| {
                    weeks
                        .unwrap_or(0)
                        .saturating_mul(config.clinical_hours_per_week)
                }))
            }
        } else {
            EffortAmount::Hours(hours.unwrap_or(0))
        }
    }

    pub fn hours(&self) -> Option<i32> {
        match self {
            EffortAmount::Hours(h) => Some(*h),
            EffortAmount::Weeks(_) => None,
        }
    }

    pub fn weeks(&self) -> Option<i32> {
        match self {
            EffortAmount::Weeks(w) => Some(*w),
            EffortAmount::Hours(_) => None,
        }
    }
}

/// Uniqueness key of a course within a term: reference number plus units.
/// Units are kept in hundredths so the key can be hashed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CourseKey {
    pub crn: String,
    pub units_centi: i64,
}

impl CourseKey {
    pub fn new(crn: &str, units: f64) -> Self {
        Self {
            crn: crn.trim().to_string(),
            units_centi: (units * 100.0).round() as i64,
        }
    }
}

/// Identity used when comparing persisted courses with harvested ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseIdentity {
    pub crn: String,
    pub subj_code: String,
    pub crse_numb: String,
}

impl CourseIdentity {
    pub fn new(crn: &str, subj_code: &str, crse_numb: &str) -> Self {
        Self {
            crn: crn.trim().to_string(),
            subj_code: subj_code.trim().to_string(),
            crse_numb: crse_numb.trim().to_string(),
        }
    }
}

/// True when a course number denotes an R-course.
pub fn is_r_course_number(crse_numb: &str) -> bool {
    crse_numb.trim_end().ends_with('R')
}

/// An instructor collected during a harvest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestedInstructor {
    pub person_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub department: String,
    pub title: Option<String>,
    pub source: HarvestSource,
    pub is_new: bool,
}

impl HarvestedInstructor {
    pub fn full_name(&self) -> String {
        display_name(&self.first_name, &self.last_name)
    }

    pub fn is_guest(&self) -> bool {
        self.source == HarvestSource::Guest
    }
}

/// A course collected during a harvest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestedCourse {
    pub crn: String,
    pub subj_code: String,
    pub crse_numb: String,
    pub seq_numb: String,
    pub enrollment: i32,
    pub units: f64,
    pub cust_dept: String,
    pub source: HarvestSource,
    pub is_new: bool,
}

impl HarvestedCourse {
    pub fn key(&self) -> CourseKey {
        CourseKey::new(&self.crn, self.units)
    }

    pub fn identity(&self) -> CourseIdentity {
        CourseIdentity::new(&self.crn, &self.subj_code, &self.crse_numb)
    }

    pub fn is_r_course(&self) -> bool {
        is_r_course_number(&self.crse_numb)
    }
}

/// An effort row collected during a harvest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestedEffort {
    pub person_id: i64,
    pub course: CourseKey,
    pub effort_type_id: String,
    pub role: String,
    pub amount: EffortAmount,
    pub source: HarvestSource,
    pub is_new: bool,
}

/// Problem found while harvesting. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestWarning {
    pub phase: String,
    pub message: String,
    pub details: Option<String>,
}

/// Persisted instructor that the harvest would not recreate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedInstructor {
    pub person_id: i64,
    pub full_name: String,
    pub department: String,
    pub title: Option<String>,
}

/// Persisted course that the harvest would not recreate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedCourse {
    pub course_id: i64,
    pub crn: String,
    pub subj_code: String,
    pub crse_numb: String,
    pub seq_numb: String,
    pub units: f64,
    pub enrollment: i32,
}

/// Row counts of a preview or of a completed harvest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSummary {
    pub total_instructors: usize,
    pub total_courses: usize,
    pub total_effort_records: usize,
    pub guest_accounts: usize,
}

/// Read-only view of what executing a harvest would produce.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestPreview {
    pub term_code: i32,
    pub term_name: String,
    pub instructors: Vec<HarvestedInstructor>,
    pub courses: Vec<HarvestedCourse>,
    pub effort_records: Vec<HarvestedEffort>,
    pub guest_accounts: Vec<HarvestedInstructor>,
    pub removed_instructors: Vec<RemovedInstructor>,
    pub removed_courses: Vec<RemovedCourse>,
    pub warnings: Vec<HarvestWarning>,
    pub summary: HarvestSummary,
}

impl HarvestPreview {
    /// Instructors harvested from one source.
    pub fn instructors_from(&self, source: HarvestSource) -> impl Iterator<Item = &HarvestedInstructor> {
        self.instructors.iter().filter(move |i| i.source == source)
    }

    /// Courses harvested from one source.
    pub fn courses_from(&self, source: HarvestSource) -> impl Iterator<Item = &HarvestedCourse> {
        self.courses.iter().filter(move |c| c.source == source)
    }
}

/// Outcome of executing a harvest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub summary: HarvestSummary,
    pub harvested_date: Option<DateTime<Utc>>,
    pub term_code: i32,
}

impl HarvestResult {
    pub fn failed(term_code: i32, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            summary: HarvestSummary::default(),
            harvested_date: None,
            term_code,
        }
    }
}

/// "Last, First" display name used in previews and reports.
pub fn display_name(first_name: &str, last_name: &str) -> String {
    match (first_name.trim(), last_name.trim()) {
        ("", last) => last.to_string(),
        (first, "") => first.to_string(),
        (first, last) => format!("{}, {}", last, first),
    }
}
