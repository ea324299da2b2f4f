//! Automatic effort rows for instructors teaching R-courses.

use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

use crate::config::RCourseConfig;
use crate::context::{HarvestContext, NewCourse};
use crate::db::{self, DbCourse};
use crate::error::HarvestError;
use crate::types::{EffortAmount, HarvestSource};

/// What triggered the R-course request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RCourseContext {
    Harvest,
    Manual,
}

/// Creates the special effort row that accompanies R-course teaching.
///
/// Implementations must be idempotent: calling this repeatedly for the same
/// person and term must not create duplicate rows.
pub trait RCourseService: Send + Sync {
    /// Returns the id of the created row, or `None` if one already existed.
    fn create_r_course_effort_record(
        &self,
        conn: &Connection,
        person_id: i64,
        term_code: i32,
        modified_by: &str,
        context: RCourseContext,
    ) -> Result<Option<i64>, HarvestError>;

    /// Adds to a preview the rows that `create_r_course_effort_record`
    /// would create for this person. Services without a predictable
    /// outcome leave the preview alone.
    fn preview_r_course_effort_record(&self, _ctx: &mut HarvestContext, _person_id: i64) {}
}

/// Puts the person on the term's generic R-course, creating that course on
/// first use.
#[derive(Debug, Clone)]
pub struct GenericRCourseService {
    config: RCourseConfig,
}

impl GenericRCourseService {
    pub fn new(config: RCourseConfig) -> Self {
        Self { config }
    }

    fn ensure_course(&self, conn: &Connection, term_code: i32) -> Result<i64, HarvestError> {
        if let Some(course_id) =
            db::find_course_id(conn, term_code, &self.config.crn, self.config.units)?
        {
            return Ok(course_id);
        }

        db::insert_course_row(
            conn,
            &DbCourse {
                course_id: 0,
                term_code,
                crn: self.config.crn.clone(),
                subj_code: self.config.subj_code.clone(),
                crse_numb: self.config.crse_numb.clone(),
                seq_numb: self.config.seq_numb.clone(),
                enrollment: 0,
                units: self.config.units,
                cust_dept: self.config.cust_dept.clone(),
            },
        )
    }
}

impl RCourseService for GenericRCourseService {
    fn create_r_course_effort_record(
        &self,
        conn: &Connection,
        person_id: i64,
        term_code: i32,
        modified_by: &str,
        context: RCourseContext,
    ) -> Result<Option<i64>, HarvestError> {
        let course_id = self.ensure_course(conn, term_code)?;

        if db::effort_exists(conn, person_id, course_id, &self.config.effort_type_id)? {
            debug!(person_id, term_code, ?context, "R-course effort already present");
            return Ok(None);
        }

        let record_id = db::insert_effort_row(
            conn,
            course_id,
            person_id,
            term_code,
            &self.config.effort_type_id,
            &self.config.role,
            EffortAmount::Hours(0),
            modified_by,
            Utc::now(),
        )?;
        debug!(person_id, term_code, record_id, ?context, "R-course effort created");
        Ok(Some(record_id))
    }

    fn preview_r_course_effort_record(&self, ctx: &mut HarvestContext, person_id: i64) {
        let course = ctx.add_course(
            NewCourse {
                crn: &self.config.crn,
                subj_code: &self.config.subj_code,
                crse_numb: &self.config.crse_numb,
                seq_numb: &self.config.seq_numb,
                enrollment: 0,
                units: self.config.units,
                cust_dept: &self.config.cust_dept,
            },
            HarvestSource::RCourse,
        );
        ctx.add_effort(
            person_id,
            course,
            &self.config.effort_type_id,
            &self.config.role,
            EffortAmount::Hours(0),
            HarvestSource::RCourse,
        );
    }
}
