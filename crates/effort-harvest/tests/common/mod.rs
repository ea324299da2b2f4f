//! Shared fixtures for the harvest integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;

use effort_harvest::audit::AuditService;
use effort_harvest::context::HarvestContext;
use effort_harvest::db::{DbCourse, DbEffortRecord, DbInstructor};
use effort_harvest::r_course::{GenericRCourseService, RCourseContext, RCourseService};
use effort_harvest::sources::*;
use effort_harvest::types::{EffortAmount, EffortType};
use effort_harvest::{EffortDb, HarvestConfig, HarvestError, HarvestOrchestrator, HarvestSources};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Upstream repositories with canned rows.
#[derive(Default)]
pub struct FakeUpstream {
    pub curriculum: Vec<Vec<CurriculumEffortRow>>,
    pub registrar: Vec<RegistrarCourse>,
    pub clinical: Vec<ClinicalAssignment>,
    pub accounts: Vec<DirectoryAccount>,
    pub fail_registrar: bool,
    /// Cancelled while the curriculum source is being read
    pub cancel_during_read: Option<CancellationToken>,
}

#[async_trait]
impl CurriculumSource for FakeUpstream {
    async fn effort_batches(
        &self,
        _term_code: i32,
    ) -> Result<Vec<Vec<CurriculumEffortRow>>, HarvestError> {
        if let Some(token) = &self.cancel_during_read {
            token.cancel();
        }
        Ok(self.curriculum.clone())
    }
}

#[async_trait]
impl RegistrarSource for FakeUpstream {
    async fn courses(&self, _term_code: i32) -> Result<Vec<RegistrarCourse>, HarvestError> {
        if self.fail_registrar {
            return Err(HarvestError::source("registrar", "connection refused"));
        }
        Ok(self.registrar.clone())
    }
}

#[async_trait]
impl DirectorySource for FakeUpstream {
    async fn clinical_assignments(
        &self,
        _term_code: i32,
    ) -> Result<Vec<ClinicalAssignment>, HarvestError> {
        Ok(self.clinical.clone())
    }

    async fn accounts(&self) -> Result<Vec<DirectoryAccount>, HarvestError> {
        Ok(self.accounts.clone())
    }
}

/// Generic R-course service that counts its calls.
pub struct CountingRCourse {
    inner: GenericRCourseService,
    pub calls: AtomicUsize,
}

impl CountingRCourse {
    pub fn new(config: &HarvestConfig) -> Self {
        Self {
            inner: GenericRCourseService::new(config.r_course.clone()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RCourseService for CountingRCourse {
    fn create_r_course_effort_record(
        &self,
        conn: &Connection,
        person_id: i64,
        term_code: i32,
        modified_by: &str,
        context: RCourseContext,
    ) -> Result<Option<i64>, HarvestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .create_r_course_effort_record(conn, person_id, term_code, modified_by, context)
    }

    fn preview_r_course_effort_record(&self, ctx: &mut HarvestContext, person_id: i64) {
        self.inner.preview_r_course_effort_record(ctx, person_id)
    }
}

/// R-course service that always fails.
pub struct FailingRCourse;

impl RCourseService for FailingRCourse {
    fn create_r_course_effort_record(
        &self,
        _conn: &Connection,
        _person_id: i64,
        _term_code: i32,
        _modified_by: &str,
        _context: RCourseContext,
    ) -> Result<Option<i64>, HarvestError> {
        Err(HarvestError::validation("R-course is locked"))
    }
}

/// Audit service whose every write fails.
pub struct FailingAudit;

impl AuditService for FailingAudit {
    fn add_term_change_audit(
        &self,
        _conn: &Connection,
        _term_code: i32,
        _action: &str,
        _details: &str,
        _modified_by: &str,
    ) -> Result<(), HarvestError> {
        Err(HarvestError::validation("audit table is read-only"))
    }

    fn add_import_audit(
        &self,
        _conn: &Connection,
        _term_code: i32,
        _action: &str,
        _details: &str,
        _modified_by: &str,
    ) -> Result<(), HarvestError> {
        Err(HarvestError::validation("audit table is read-only"))
    }

    fn clear_audit_for_term(&self, _conn: &Connection, _term_code: i32) -> Result<usize, HarvestError> {
        Err(HarvestError::validation("audit table is read-only"))
    }
}

pub fn effort_type(id: &str, uses_weeks: bool, allowed_on_r_courses: bool) -> EffortType {
    EffortType {
        id: id.to_string(),
        description: id.to_string(),
        uses_weeks,
        allowed_on_r_courses,
        is_active: true,
    }
}

/// In-memory store with the standard effort types and the given terms.
pub fn store(terms: &[i32]) -> Arc<EffortDb> {
    init_tracing();
    let db = EffortDb::open_in_memory().unwrap();
    db.upsert_effort_types(&[
        effort_type("LEC", false, true),
        effort_type("LAB", false, false),
        effort_type("CLI", true, false),
        effort_type("RES", false, false),
    ])
    .unwrap();
    for term in terms {
        db.insert_term(*term).unwrap();
    }
    Arc::new(db)
}

pub fn sources(db: &Arc<EffortDb>, upstream: FakeUpstream) -> HarvestSources {
    let upstream = Arc::new(upstream);
    HarvestSources {
        curriculum: upstream.clone(),
        registrar: upstream.clone(),
        directory: upstream,
        lookups: db.clone(),
    }
}

pub fn orchestrator(db: &Arc<EffortDb>, upstream: FakeUpstream) -> HarvestOrchestrator {
    HarvestOrchestrator::new(db.clone(), HarvestConfig::default(), sources(db, upstream)).unwrap()
}

pub fn instructor(person_id: i64, first_name: &str, last_name: &str) -> SourceInstructor {
    SourceInstructor {
        person_id,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        department: Some("VME".to_string()),
        title: Some("Professor".to_string()),
    }
}

pub fn course(crn: &str, crse_numb: &str) -> SourceCourse {
    SourceCourse {
        crn: crn.to_string(),
        subj_code: "VME".to_string(),
        crse_numb: crse_numb.to_string(),
        seq_numb: "001".to_string(),
        enrollment: 24,
        units: 4.0,
        cust_dept: "VME".to_string(),
    }
}

pub fn curriculum_row(
    instructor: SourceInstructor,
    course: SourceCourse,
    effort_type_id: &str,
    hours: i32,
) -> CurriculumEffortRow {
    CurriculumEffortRow {
        instructor,
        course,
        effort_type_id: effort_type_id.to_string(),
        role: "Instructor".to_string(),
        hours: Some(hours),
        weeks: None,
    }
}

pub fn guest_account(person_id: i64, login_id: &str) -> DirectoryAccount {
    DirectoryAccount {
        person_id,
        login_id: login_id.to_string(),
        first_name: "Visiting".to_string(),
        last_name: format!("Lecturer{}", person_id),
        department: None,
        title: None,
    }
}

/// Writes one instructor with one course and one effort row straight into
/// the store, as left behind by an earlier harvest.
pub fn seed_prior_data(db: &EffortDb, term_code: i32, person_id: i64, crn: &str) -> i64 {
    db.insert_instructor(&DbInstructor {
        person_id,
        term_code,
        first_name: "Jane".to_string(),
        last_name: "Smith".to_string(),
        department: "PHR".to_string(),
        title: Some("Lecturer".to_string()),
        is_guest: false,
        effort_verified_at: None,
    })
    .unwrap();
    let course_id = db
        .insert_course(&DbCourse {
            course_id: 0,
            term_code,
            crn: crn.to_string(),
            subj_code: "PHR".to_string(),
            crse_numb: "299".to_string(),
            seq_numb: "001".to_string(),
            enrollment: 8,
            units: 2.0,
            cust_dept: "PHR".to_string(),
        })
        .unwrap();
    db.insert_effort_record(&DbEffortRecord {
        record_id: 0,
        course_id,
        person_id,
        term_code,
        effort_type_id: "LEC".to_string(),
        role: "Instructor".to_string(),
        amount: EffortAmount::Hours(10),
        modified_by: "seed".to_string(),
        modified_at: Utc::now(),
    })
    .unwrap();
    course_id
}

/// Comparable view of a term's persisted rows, without synthetic ids or
/// modification stamps.
pub fn term_state(db: &EffortDb, term_code: i32) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut instructors: Vec<String> = db
        .instructors_for_term(term_code)
        .unwrap()
        .into_iter()
        .map(|i| format!("{}|{}|{}|{}", i.person_id, i.full_name(), i.department, i.is_guest))
        .collect();
    let courses = db.courses_for_term(term_code).unwrap();
    let mut course_names: Vec<String> = courses
        .iter()
        .map(|c| format!("{}|{}{}|{}", c.crn, c.subj_code, c.crse_numb, c.units))
        .collect();
    let mut efforts: Vec<String> = db
        .effort_records_for_term(term_code)
        .unwrap()
        .into_iter()
        .map(|e| {
            let crn = courses
                .iter()
                .find(|c| c.course_id == e.course_id)
                .map(|c| c.crn.clone())
                .unwrap_or_default();
            format!("{}|{}|{}|{:?}", e.person_id, crn, e.effort_type_id, e.amount)
        })
        .collect();
    instructors.sort();
    course_names.sort();
    efforts.sort();
    (instructors, course_names, efforts)
}
