//! Harvest orchestration.
//!
//! The orchestrator is the only entry point into the pipeline:
//! 1. [`HarvestOrchestrator::generate_preview`] runs every phase against a
//!    fresh context and diffs the result against the persisted term. It
//!    never writes.
//! 2. [`HarvestOrchestrator::execute_harvest`] runs every phase, then in one
//!    transaction clears the term, writes the collected rows, runs R-course
//!    post-processing, stamps the term as harvested and writes the audit
//!    entries. Any failure rolls the whole transaction back.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::Rng;
use rusqlite::Connection;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditService, SqliteAuditService};
use crate::config::HarvestConfig;
use crate::context::{HarvestContext, HarvestMode};
use crate::db::{self, ClearedRows, CreatedEffort, EffortDb};
use crate::error::HarvestError;
use crate::lock::TermLocks;
use crate::phases::{
    check_cancelled, sort_phases, ClinicalSchedulePhase, GuestAccountPhase, HarvestPhase,
    PrimarySourcePhase, SecondarySourcePhase,
};
use crate::r_course::{GenericRCourseService, RCourseContext, RCourseService};
use crate::removed;
use crate::sources::{CurriculumSource, DirectorySource, LookupStore, RegistrarSource};
use crate::summary;
use crate::term::{self, TermDates};
use crate::types::{
    is_r_course_number, CourseKey, HarvestPreview, HarvestResult, HarvestSummary, HarvestWarning,
};

/// Warning phase label for term-level messages.
const TERM_WARNING: &str = "Term";

/// Upstream repositories the standard phases read from.
#[derive(Clone)]
pub struct HarvestSources {
    pub curriculum: Arc<dyn CurriculumSource>,
    pub registrar: Arc<dyn RegistrarSource>,
    pub directory: Arc<dyn DirectorySource>,
    pub lookups: Arc<dyn LookupStore>,
}

/// Rebuilds a term's instructors, courses and effort records.
///
/// Two executes of the same term through orchestrators sharing one
/// [`TermLocks`] never overlap; the second one fails fast. Exclusion across
/// processes is up to the caller.
pub struct HarvestOrchestrator {
    db: Arc<EffortDb>,
    config: HarvestConfig,
    phases: Vec<HarvestPhase>,
    lookups: Arc<dyn LookupStore>,
    audit: Arc<dyn AuditService>,
    r_course: Arc<dyn RCourseService>,
    locks: Arc<TermLocks>,
}

impl HarvestOrchestrator {
    /// Creates an orchestrator running the four standard phases.
    pub fn new(
        db: Arc<EffortDb>,
        config: HarvestConfig,
        sources: HarvestSources,
    ) -> Result<Self, HarvestError> {
        let phases = vec![
            HarvestPhase::Primary(PrimarySourcePhase::new(
                sources.curriculum.clone(),
                sources.lookups.clone(),
            )),
            HarvestPhase::Secondary(SecondarySourcePhase::new(
                sources.registrar.clone(),
                sources.lookups.clone(),
            )),
            HarvestPhase::Clinical(ClinicalSchedulePhase::new(
                sources.directory.clone(),
                sources.lookups.clone(),
            )),
            HarvestPhase::Guest(GuestAccountPhase::new(sources.directory.clone())),
        ];
        Self::with_phases(db, config, sources.lookups, phases)
    }

    /// Creates an orchestrator with an explicit phase list. Phases are
    /// sorted by their order regardless of the order given.
    pub fn with_phases(
        db: Arc<EffortDb>,
        config: HarvestConfig,
        lookups: Arc<dyn LookupStore>,
        mut phases: Vec<HarvestPhase>,
    ) -> Result<Self, HarvestError> {
        config.validate()?;
        sort_phases(&mut phases);

        Ok(Self {
            db,
            r_course: Arc::new(GenericRCourseService::new(config.r_course.clone())),
            config,
            phases,
            lookups,
            audit: Arc::new(SqliteAuditService),
            locks: Arc::new(TermLocks::new()),
        })
    }

    pub fn with_audit_service(mut self, audit: Arc<dyn AuditService>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_r_course_service(mut self, r_course: Arc<dyn RCourseService>) -> Self {
        self.r_course = r_course;
        self
    }

    /// Shares a lock table with other orchestrators on the same store.
    pub fn with_term_locks(mut self, locks: Arc<TermLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn phases(&self) -> &[HarvestPhase] {
        &self.phases
    }

    /// Builds a preview of what executing a harvest would do.
    ///
    /// A missing term is reported as a warning so the preview always has a
    /// well-formed shape.
    ///
    /// # Errors
    /// Upstream read failures, cancellation and store errors.
    pub async fn generate_preview(
        &self,
        term_code: i32,
        cancel: &CancellationToken,
    ) -> Result<HarvestPreview, HarvestError> {
        let run_id = generate_run_id(term_code);
        let start = Instant::now();
        info!(run_id = %run_id, term_code, "Generating harvest preview");

        let mut warnings = Vec::new();
        if self.db.term(term_code)?.is_none() {
            warnings.push(HarvestWarning {
                phase: TERM_WARNING.to_string(),
                message: format!("Term {} not found", term_code),
                details: Some("The term must be created before it can be harvested".to_string()),
            });
        }

        let persisted_instructors = self.db.instructors_for_term(term_code)?;
        let persisted_courses = self.db.courses_for_term(term_code)?;
        if !persisted_instructors.is_empty() || !persisted_courses.is_empty() {
            warnings.push(HarvestWarning {
                phase: TERM_WARNING.to_string(),
                message: "Existing data will be replaced".to_string(),
                details: Some(format!(
                    "{} instructors and {} courses are currently loaded for {}",
                    persisted_instructors.len(),
                    persisted_courses.len(),
                    term::term_name(term_code)
                )),
            });
        }

        let snapshot = self.db.persisted_snapshot(term_code)?;
        let mut ctx = self
            .new_context(term_code, HarvestMode::Preview)
            .await?
            .with_persisted(snapshot);

        for phase in &self.phases {
            check_cancelled(cancel)?;
            if !phase.should_execute(term_code) {
                debug!(run_id = %run_id, phase = phase.name(), term_code, "Phase does not apply to term");
                continue;
            }
            phase.generate_preview(&mut ctx, cancel).await?;
        }
        self.preview_r_courses(&mut ctx);

        warnings.extend(ctx.take_warnings());
        let removed_instructors = removed::removed_instructors(&persisted_instructors, &ctx);
        let removed_courses = removed::removed_courses(&persisted_courses, &ctx);
        let summary = summary::summarize(&ctx);
        let (guest_accounts, instructors): (Vec<_>, Vec<_>) = ctx
            .instructors()
            .iter()
            .cloned()
            .partition(|i| i.is_guest());

        info!(
            run_id = %run_id,
            term_code,
            instructors = summary.total_instructors,
            courses = summary.total_courses,
            effort_records = summary.total_effort_records,
            removed_instructors = removed_instructors.len(),
            removed_courses = removed_courses.len(),
            warnings = warnings.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Harvest preview ready"
        );

        Ok(HarvestPreview {
            term_code,
            term_name: term::term_name(term_code),
            instructors,
            courses: ctx.courses().to_vec(),
            effort_records: ctx.effort_records().to_vec(),
            guest_accounts,
            removed_instructors,
            removed_courses,
            warnings,
            summary,
        })
    }

    /// Replaces all of a term's harvested data with fresh upstream data.
    ///
    /// Expected failures (missing term, upstream or phase errors, R-course
    /// errors, cancellation, a concurrent harvest of the same term) come back
    /// as a `HarvestResult` with `success == false`, and the store is left
    /// untouched. Store faults propagate as `Err`, also without a commit.
    pub async fn execute_harvest(
        &self,
        term_code: i32,
        modified_by: &str,
        cancel: &CancellationToken,
    ) -> Result<HarvestResult, HarvestError> {
        let run_id = generate_run_id(term_code);
        let start = Instant::now();

        let Some(_guard) = self.locks.try_acquire(term_code) else {
            warn!(run_id = %run_id, term_code, "Harvest rejected, term is locked");
            return Ok(HarvestResult::failed(
                term_code,
                HarvestError::HarvestInProgress { term_code }.to_string(),
            ));
        };

        info!(run_id = %run_id, term_code, modified_by, "Starting harvest");

        match self.run_harvest(term_code, modified_by, cancel, &run_id).await {
            Ok(result) => {
                info!(
                    run_id = %run_id,
                    term_code,
                    instructors = result.summary.total_instructors,
                    courses = result.summary.total_courses,
                    effort_records = result.summary.total_effort_records,
                    guest_accounts = result.summary.guest_accounts,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Harvest committed"
                );
                Ok(result)
            }
            Err(e) if e.is_unexpected() => {
                error!(
                    run_id = %run_id,
                    term_code,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Harvest aborted by store fault"
                );
                Err(e)
            }
            Err(e) => {
                warn!(
                    run_id = %run_id,
                    term_code,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Harvest failed, nothing was committed"
                );
                Ok(HarvestResult::failed(term_code, e.to_string()))
            }
        }
    }

    async fn run_harvest(
        &self,
        term_code: i32,
        modified_by: &str,
        cancel: &CancellationToken,
        run_id: &str,
    ) -> Result<HarvestResult, HarvestError> {
        let term = self
            .db
            .term(term_code)?
            .ok_or(HarvestError::TermNotFound { term_code })?;

        let mut ctx = self.new_context(term_code, HarvestMode::Execute).await?;
        for phase in &self.phases {
            check_cancelled(cancel)?;
            if !phase.should_execute(term_code) {
                debug!(run_id = %run_id, phase = phase.name(), term_code, "Phase does not apply to term");
                continue;
            }
            phase.execute(&mut ctx, cancel).await?;
        }

        for warning in ctx.warnings() {
            warn!(
                run_id = %run_id,
                phase = %warning.phase,
                details = warning.details.as_deref().unwrap_or(""),
                "{}",
                warning.message
            );
        }
        check_cancelled(cancel)?;

        let harvested_at = Utc::now();
        let summary = self.db.transaction(|tx| {
            let cleared = db::clear_term_data(tx, term_code)?;
            if let Err(e) = self.audit.clear_audit_for_term(tx, term_code) {
                warn!(run_id = %run_id, term_code, error = %e, "Could not clear record audits");
            }

            let created = db::insert_harvested_rows(tx, &ctx, modified_by, harvested_at, cancel)?;
            check_cancelled(cancel)?;

            let r_course_calls =
                self.post_process_r_courses(tx, &ctx, &created, term_code, modified_by)?;
            debug!(run_id = %run_id, term_code, r_course_calls, "R-course post-processing done");

            let dates = term.dates.mark_harvested(harvested_at);
            db::set_term_dates(tx, term_code, &dates)?;

            let summary = db::term_summary(tx, term_code)?;
            self.write_audits(tx, run_id, term_code, modified_by, &term.dates, &dates, &cleared, &summary);

            check_cancelled(cancel)?;
            Ok(summary)
        })?;

        Ok(HarvestResult {
            success: true,
            error_message: None,
            summary,
            harvested_date: Some(harvested_at),
            term_code,
        })
    }

    async fn new_context(
        &self,
        term_code: i32,
        mode: HarvestMode,
    ) -> Result<HarvestContext, HarvestError> {
        let effort_types = self.lookups.effort_types().await?;
        Ok(HarvestContext::new(term_code, mode, self.config.clone()).with_effort_types(effort_types))
    }

    /// Lets the R-course service add the rows post-processing would create,
    /// so the preview matches what an execute persists.
    fn preview_r_courses(&self, ctx: &mut HarvestContext) {
        let pairs: BTreeSet<(i64, CourseKey)> = ctx
            .effort_records()
            .iter()
            .filter(|e| {
                let on_r_course = ctx.course(&e.course).is_some_and(|c| c.is_r_course());
                let allowed = ctx
                    .effort_type(&e.effort_type_id)
                    .is_some_and(|t| t.allowed_on_r_courses);
                on_r_course && allowed
            })
            .map(|e| (e.person_id, e.course.clone()))
            .collect();

        for (person_id, _) in pairs {
            self.r_course.preview_r_course_effort_record(ctx, person_id);
        }
    }

    /// Calls the R-course service once for every distinct (person, course)
    /// pair among the created rows that sit on an R-course with an effort
    /// type allowed there. Returns the number of calls made.
    fn post_process_r_courses(
        &self,
        conn: &Connection,
        ctx: &HarvestContext,
        created: &[CreatedEffort],
        term_code: i32,
        modified_by: &str,
    ) -> Result<usize, HarvestError> {
        let mut seen = HashSet::new();

        for effort in created {
            if !is_r_course_number(&effort.crse_numb) {
                continue;
            }
            let allowed = ctx
                .effort_type(&effort.effort_type_id)
                .map(|t| t.allowed_on_r_courses)
                .unwrap_or(false);
            if !allowed || !seen.insert((effort.person_id, effort.course_id)) {
                continue;
            }

            self.r_course
                .create_r_course_effort_record(
                    conn,
                    effort.person_id,
                    term_code,
                    modified_by,
                    RCourseContext::Harvest,
                )
                .map_err(|e| {
                    if e.is_unexpected() {
                        e
                    } else {
                        HarvestError::PostProcessing {
                            message: e.to_string(),
                        }
                    }
                })?;
        }

        Ok(seen.len())
    }

    /// Writes the term-change and import entries. Failures are logged and
    /// never change the outcome of the harvest.
    #[allow(clippy::too_many_arguments)]
    fn write_audits(
        &self,
        conn: &Connection,
        run_id: &str,
        term_code: i32,
        modified_by: &str,
        before: &TermDates,
        after: &TermDates,
        cleared: &ClearedRows,
        summary: &HarvestSummary,
    ) {
        let term_details = json!({
            "previous_status": before.status(),
            "status": after.status(),
            "harvested_at": after.harvested_at,
        })
        .to_string();
        if let Err(e) =
            self.audit
                .add_term_change_audit(conn, term_code, "Harvest", &term_details, modified_by)
        {
            warn!(run_id = %run_id, term_code, error = %e, "Term change audit not written");
        }

        let import_details = json!({
            "removed": {
                "instructors": cleared.instructors,
                "courses": cleared.courses,
                "effort_records": cleared.effort_records,
            },
            "summary": summary,
        })
        .to_string();
        if let Err(e) =
            self.audit
                .add_import_audit(conn, term_code, "Harvest", &import_details, modified_by)
        {
            warn!(run_id = %run_id, term_code, error = %e, "Import audit not written");
        }
    }
}

/// Short id tying together the log lines of one harvest run, prefixed
/// with the term it works on.
fn generate_run_id(term_code: i32) -> String {
    let millis = Utc::now().timestamp_millis() as u64;
    let random: u32 = rand::thread_rng().gen();
    format!("{}-{:x}-{:08x}", term_code, millis & 0xFFFF_FFFF, random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_differ_and_carry_term() {
        let id = generate_run_id(202409);
        assert!(id.starts_with("202409-"));
        assert_ne!(id, generate_run_id(202409));
    }
}
