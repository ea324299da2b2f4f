//! Detects persisted rows that a harvest would not recreate.
//!
//! Only previews need this. An executing harvest clears the term and never
//! recreates what is absent.

use std::collections::HashSet;

use crate::context::HarvestContext;
use crate::db::{DbCourse, DbInstructor};
use crate::types::{CourseIdentity, RemovedCourse, RemovedInstructor};

/// Persisted instructors whose person id was not harvested.
pub fn removed_instructors(
    persisted: &[DbInstructor],
    ctx: &HarvestContext,
) -> Vec<RemovedInstructor> {
    persisted
        .iter()
        .filter(|i| !ctx.has_instructor(i.person_id))
        .map(|i| RemovedInstructor {
            person_id: i.person_id,
            full_name: i.full_name(),
            department: i.department.clone(),
            title: i.title.clone(),
        })
        .collect()
}

/// Persisted courses whose (reference number, subject, number) identity
/// was not harvested.
pub fn removed_courses(persisted: &[DbCourse], ctx: &HarvestContext) -> Vec<RemovedCourse> {
    let harvested: HashSet<CourseIdentity> = ctx.courses().iter().map(|c| c.identity()).collect();

    persisted
        .iter()
        .filter(|c| !harvested.contains(&CourseIdentity::new(&c.crn, &c.subj_code, &c.crse_numb)))
        .map(|c| RemovedCourse {
            course_id: c.course_id,
            crn: c.crn.clone(),
            subj_code: c.subj_code.clone(),
            crse_numb: c.crse_numb.clone(),
            seq_numb: c.seq_numb.clone(),
            units: c.units,
            enrollment: c.enrollment,
        })
        .collect()
}
