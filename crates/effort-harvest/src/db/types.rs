/// Row types of the destination store
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::term::{TermDates, TermStatus};
use crate::types::{display_name, is_r_course_number, EffortAmount};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbTerm {
    pub term_code: i32,
    pub dates: TermDates,
}

impl DbTerm {
    pub fn status(&self) -> TermStatus {
        self.dates.status()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbInstructor {
    pub person_id: i64,
    pub term_code: i32,
    pub first_name: String,
    pub last_name: String,
    pub department: String,
    pub title: Option<String>,
    pub is_guest: bool,
    pub effort_verified_at: Option<DateTime<Utc>>,
}

impl DbInstructor {
    pub fn full_name(&self) -> String {
        display_name(&self.first_name, &self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbCourse {
    pub course_id: i64,
    pub term_code: i32,
    pub crn: String,
    pub subj_code: String,
    pub crse_numb: String,
    pub seq_numb: String,
    pub enrollment: i32,
    pub units: f64,
    pub cust_dept: String,
}

impl DbCourse {
    pub fn is_r_course(&self) -> bool {
        is_r_course_number(&self.crse_numb)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbEffortRecord {
    pub record_id: i64,
    pub course_id: i64,
    pub person_id: i64,
    pub term_code: i32,
    pub effort_type_id: String,
    pub role: String,
    pub amount: EffortAmount,
    pub modified_by: String,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbAudit {
    pub audit_id: i64,
    pub term_code: i32,
    pub category: String,
    pub action: String,
    pub details: Option<String>,
    pub modified_by: String,
    pub modified_at: DateTime<Utc>,
}

/// Effort row created by a harvest, as handed to post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedEffort {
    pub record_id: i64,
    pub person_id: i64,
    pub course_id: i64,
    pub crse_numb: String,
    pub effort_type_id: String,
}
