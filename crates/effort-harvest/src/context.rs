//! Accumulator threaded through the harvest phases.
//!
//! A [`HarvestContext`] lives for one preview or execute call. Phases add
//! rows to it; the orchestrator reads the result once every phase has run.
//! Rows are de-duplicated on insert: instructors by person id, courses by
//! [`CourseKey`], effort rows by (person, course, effort type).

use std::collections::{HashMap, HashSet};

use crate::config::HarvestConfig;
use crate::types::{
    CourseIdentity, CourseKey, EffortAmount, EffortType, HarvestSource, HarvestWarning,
    HarvestedCourse, HarvestedEffort, HarvestedInstructor,
};

/// Whether the phases are building a preview or the rows to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestMode {
    Preview,
    Execute,
}

/// Identities of the rows persisted for the term before this harvest.
/// Only populated for previews, where it drives the `is_new` flags.
#[derive(Debug, Clone, Default)]
pub struct PersistedSnapshot {
    pub instructors: HashSet<i64>,
    pub courses: HashSet<CourseIdentity>,
    /// (person id, reference number, effort type)
    pub effort_records: HashSet<(i64, String, String)>,
}

type EffortKey = (i64, CourseKey, String);

pub struct HarvestContext {
    term_code: i32,
    mode: HarvestMode,
    config: HarvestConfig,
    effort_types: HashMap<String, EffortType>,
    persisted: PersistedSnapshot,
    instructors: Vec<HarvestedInstructor>,
    instructor_index: HashMap<i64, usize>,
    courses: Vec<HarvestedCourse>,
    course_index: HashMap<CourseKey, usize>,
    effort_records: Vec<HarvestedEffort>,
    effort_index: HashSet<EffortKey>,
    warnings: Vec<HarvestWarning>,
}

/// Fields of a course being added to the context.
#[derive(Debug, Clone)]
pub struct NewCourse<'a> {
    pub crn: &'a str,
    pub subj_code: &'a str,
    pub crse_numb: &'a str,
    pub seq_numb: &'a str,
    pub enrollment: i32,
    pub units: f64,
    pub cust_dept: &'a str,
}

impl HarvestContext {
    pub fn new(term_code: i32, mode: HarvestMode, config: HarvestConfig) -> Self {
        Self {
            term_code,
            mode,
            config,
            effort_types: HashMap::new(),
            persisted: PersistedSnapshot::default(),
            instructors: Vec::new(),
            instructor_index: HashMap::new(),
            courses: Vec::new(),
            course_index: HashMap::new(),
            effort_records: Vec::new(),
            effort_index: HashSet::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_effort_types(mut self, effort_types: Vec<EffortType>) -> Self {
        self.effort_types = effort_types
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        self
    }

    pub fn with_persisted(mut self, persisted: PersistedSnapshot) -> Self {
        self.persisted = persisted;
        self
    }

    pub fn term_code(&self) -> i32 {
        self.term_code
    }

    pub fn mode(&self) -> HarvestMode {
        self.mode
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Active effort type by id.
    pub fn effort_type(&self, id: &str) -> Option<&EffortType> {
        self.effort_types.get(id).filter(|t| t.is_active)
    }

    /// Adds an instructor, returning false if the person was already
    /// collected. An existing row keeps its source and only gains a title
    /// it was missing.
    pub fn add_instructor(
        &mut self,
        person_id: i64,
        first_name: &str,
        last_name: &str,
        department: &str,
        title: Option<&str>,
        source: HarvestSource,
    ) -> bool {
        if let Some(&idx) = self.instructor_index.get(&person_id) {
            let existing = &mut self.instructors[idx];
            if existing.title.is_none() {
                existing.title = title.map(str::to_string);
            }
            return false;
        }

        let is_new = self.is_preview() && !self.persisted.instructors.contains(&person_id);
        self.instructor_index.insert(person_id, self.instructors.len());
        self.instructors.push(HarvestedInstructor {
            person_id,
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            department: department.trim().to_string(),
            title: title.map(|t| t.trim().to_string()),
            source,
            is_new,
        });
        true
    }

    pub fn has_instructor(&self, person_id: i64) -> bool {
        self.instructor_index.contains_key(&person_id)
    }

    /// Adds a course and returns its key. A course with the same key that
    /// was already collected wins.
    pub fn add_course(&mut self, course: NewCourse<'_>, source: HarvestSource) -> CourseKey {
        let key = CourseKey::new(course.crn, course.units);
        if self.course_index.contains_key(&key) {
            return key;
        }

        let identity = CourseIdentity::new(course.crn, course.subj_code, course.crse_numb);
        let is_new = self.is_preview() && !self.persisted.courses.contains(&identity);
        self.course_index.insert(key.clone(), self.courses.len());
        self.courses.push(HarvestedCourse {
            crn: key.crn.clone(),
            subj_code: identity.subj_code,
            crse_numb: identity.crse_numb,
            seq_numb: course.seq_numb.trim().to_string(),
            enrollment: course.enrollment,
            units: course.units,
            cust_dept: course.cust_dept.trim().to_string(),
            source,
            is_new,
        });
        key
    }

    /// True if any collected course carries this reference number.
    pub fn has_crn(&self, crn: &str) -> bool {
        let crn = crn.trim();
        self.course_index.keys().any(|k| k.crn == crn)
    }

    pub fn course(&self, key: &CourseKey) -> Option<&HarvestedCourse> {
        self.course_index.get(key).map(|&idx| &self.courses[idx])
    }

    /// Adds an effort row for an instructor and course already in the
    /// context. Returns false for duplicates and dangling references.
    pub fn add_effort(
        &mut self,
        person_id: i64,
        course: CourseKey,
        effort_type_id: &str,
        role: &str,
        amount: EffortAmount,
        source: HarvestSource,
    ) -> bool {
        if !self.has_instructor(person_id) || !self.course_index.contains_key(&course) {
            return false;
        }

        let key = (person_id, course.clone(), effort_type_id.to_string());
        if !self.effort_index.insert(key) {
            return false;
        }

        let is_new = self.is_preview()
            && !self.persisted.effort_records.contains(&(
                person_id,
                course.crn.clone(),
                effort_type_id.to_string(),
            ));
        self.effort_records.push(HarvestedEffort {
            person_id,
            course,
            effort_type_id: effort_type_id.to_string(),
            role: role.to_string(),
            amount,
            source,
            is_new,
        });
        true
    }

    /// Records a warning for the current phase.
    pub fn warn(&mut self, phase: &str, message: impl Into<String>, details: Option<String>) {
        self.warnings.push(HarvestWarning {
            phase: phase.to_string(),
            message: message.into(),
            details,
        });
    }

    pub fn instructors(&self) -> &[HarvestedInstructor] {
        &self.instructors
    }

    pub fn courses(&self) -> &[HarvestedCourse] {
        &self.courses
    }

    pub fn effort_records(&self) -> &[HarvestedEffort] {
        &self.effort_records
    }

    pub fn warnings(&self) -> &[HarvestWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<HarvestWarning> {
        std::mem::take(&mut self.warnings)
    }

    fn is_preview(&self) -> bool {
        self.mode == HarvestMode::Preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(crn: &'static str, units: f64) -> NewCourse<'static> {
        NewCourse {
            crn,
            subj_code: "VME",
            crse_numb: "401",
            seq_numb: "001",
            enrollment: 20,
            units,
            cust_dept: "VME",
        }
    }

    #[test]
    fn test_instructors_deduplicate_by_person() {
        let mut ctx = HarvestContext::new(202409, HarvestMode::Execute, HarvestConfig::default());
        assert!(ctx.add_instructor(1, "Ada", "Lovelace", "VME", None, HarvestSource::Primary));
        assert!(!ctx.add_instructor(1, "Ada", "Lovelace", "APC", Some("Prof"), HarvestSource::Clinical));

        assert_eq!(ctx.instructors().len(), 1);
        let ada = &ctx.instructors()[0];
        assert_eq!(ada.source, HarvestSource::Primary);
        assert_eq!(ada.department, "VME");
        assert_eq!(ada.title.as_deref(), Some("Prof"));
    }

    #[test]
    fn test_courses_deduplicate_by_crn_and_units() {
        let mut ctx = HarvestContext::new(202409, HarvestMode::Execute, HarvestConfig::default());
        let a = ctx.add_course(course("40001", 4.0), HarvestSource::Primary);
        let b = ctx.add_course(course("40001", 4.0), HarvestSource::Secondary);
        let c = ctx.add_course(course("40001", 2.0), HarvestSource::Secondary);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(ctx.courses().len(), 2);
        assert!(ctx.has_crn("40001"));
        assert!(!ctx.has_crn("40002"));
    }

    #[test]
    fn test_effort_requires_known_references() {
        let mut ctx = HarvestContext::new(202409, HarvestMode::Execute, HarvestConfig::default());
        let key = ctx.add_course(course("40001", 4.0), HarvestSource::Primary);

        assert!(!ctx.add_effort(7, key.clone(), "LEC", "Instructor", EffortAmount::Hours(10), HarvestSource::Primary));

        ctx.add_instructor(7, "Grace", "Hopper", "VME", None, HarvestSource::Primary);
        assert!(ctx.add_effort(7, key.clone(), "LEC", "Instructor", EffortAmount::Hours(10), HarvestSource::Primary));
        assert!(!ctx.add_effort(7, key, "LEC", "Instructor", EffortAmount::Hours(5), HarvestSource::Primary));
        assert_eq!(ctx.effort_records().len(), 1);
    }

    #[test]
    fn test_is_new_only_flags_unpersisted_rows_in_preview() {
        let mut persisted = PersistedSnapshot::default();
        persisted.instructors.insert(1);
        persisted
            .courses
            .insert(CourseIdentity::new("40001", "VME", "401"));

        let mut ctx = HarvestContext::new(202409, HarvestMode::Preview, HarvestConfig::default())
            .with_persisted(persisted);
        ctx.add_instructor(1, "Ada", "Lovelace", "VME", None, HarvestSource::Primary);
        ctx.add_instructor(2, "Grace", "Hopper", "VME", None, HarvestSource::Primary);
        ctx.add_course(course("40001", 4.0), HarvestSource::Primary);
        ctx.add_course(course("40002", 4.0), HarvestSource::Primary);

        assert!(!ctx.instructors()[0].is_new);
        assert!(ctx.instructors()[1].is_new);
        assert!(!ctx.courses()[0].is_new);
        assert!(ctx.courses()[1].is_new);
    }

    #[test]
    fn test_execute_mode_never_flags_new() {
        let mut ctx = HarvestContext::new(202409, HarvestMode::Execute, HarvestConfig::default());
        ctx.add_instructor(1, "Ada", "Lovelace", "VME", None, HarvestSource::Primary);
        assert!(!ctx.instructors()[0].is_new);
    }
}
