//! Harvest phases.
//!
//! Each phase pulls exactly one upstream source into the shared
//! [`HarvestContext`]. Phases are dispatched through the [`HarvestPhase`]
//! enum and always run in ascending [`HarvestPhase::order`].

mod clinical;
mod guest;
mod primary;
mod secondary;

pub use clinical::ClinicalSchedulePhase;
pub use guest::GuestAccountPhase;
pub use primary::PrimarySourcePhase;
pub use secondary::SecondarySourcePhase;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::{HarvestContext, NewCourse};
use crate::error::HarvestError;
use crate::sources::{LookupStore, SourceCourse, SourceInstructor};
use crate::types::HarvestSource;

/// One step of the harvest pipeline.
pub enum HarvestPhase {
    Primary(PrimarySourcePhase),
    Secondary(SecondarySourcePhase),
    Clinical(ClinicalSchedulePhase),
    Guest(GuestAccountPhase),
}

impl HarvestPhase {
    /// Position in the pipeline. Lower runs first.
    pub fn order(&self) -> i32 {
        match self {
            HarvestPhase::Primary(_) => PrimarySourcePhase::ORDER,
            HarvestPhase::Secondary(_) => SecondarySourcePhase::ORDER,
            HarvestPhase::Clinical(_) => ClinicalSchedulePhase::ORDER,
            HarvestPhase::Guest(_) => GuestAccountPhase::ORDER,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HarvestPhase::Primary(_) => PrimarySourcePhase::NAME,
            HarvestPhase::Secondary(_) => SecondarySourcePhase::NAME,
            HarvestPhase::Clinical(_) => ClinicalSchedulePhase::NAME,
            HarvestPhase::Guest(_) => GuestAccountPhase::NAME,
        }
    }

    /// Whether the phase applies to this term at all.
    pub fn should_execute(&self, term_code: i32) -> bool {
        match self {
            HarvestPhase::Clinical(p) => p.should_execute(term_code),
            _ => true,
        }
    }

    /// Collects rows for a preview. Reads only.
    pub async fn generate_preview(
        &self,
        ctx: &mut HarvestContext,
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        debug!(phase = self.name(), term_code = ctx.term_code(), "Previewing phase");
        self.harvest(ctx, cancel).await
    }

    /// Collects the rows this phase contributes to an executing harvest.
    pub async fn execute(
        &self,
        ctx: &mut HarvestContext,
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        let before = (
            ctx.instructors().len(),
            ctx.courses().len(),
            ctx.effort_records().len(),
        );

        self.harvest(ctx, cancel).await?;

        info!(
            phase = self.name(),
            term_code = ctx.term_code(),
            instructors = ctx.instructors().len() - before.0,
            courses = ctx.courses().len() - before.1,
            effort_records = ctx.effort_records().len() - before.2,
            "Phase collected rows"
        );
        Ok(())
    }

    async fn harvest(
        &self,
        ctx: &mut HarvestContext,
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        match self {
            HarvestPhase::Primary(p) => p.harvest(ctx, cancel).await,
            HarvestPhase::Secondary(p) => p.harvest(ctx, cancel).await,
            HarvestPhase::Clinical(p) => p.harvest(ctx, cancel).await,
            HarvestPhase::Guest(p) => p.harvest(ctx, cancel).await,
        }
    }
}

/// Sorts phases into execution order.
pub fn sort_phases(phases: &mut [HarvestPhase]) {
    phases.sort_by_key(|p| p.order());
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<(), HarvestError> {
    if cancel.is_cancelled() {
        Err(HarvestError::Cancelled)
    } else {
        Ok(())
    }
}

/// Adds an upstream instructor, resolving their department on first sight.
pub(crate) async fn add_source_instructor(
    ctx: &mut HarvestContext,
    lookups: &dyn LookupStore,
    instructor: &SourceInstructor,
    source: HarvestSource,
) -> Result<(), HarvestError> {
    if ctx.has_instructor(instructor.person_id) {
        return Ok(());
    }

    let department = lookups
        .resolve_department(instructor.person_id, instructor.department.as_deref())
        .await?
        .unwrap_or_else(|| ctx.config().default_department.clone());

    ctx.add_instructor(
        instructor.person_id,
        &instructor.first_name,
        &instructor.last_name,
        &department,
        instructor.title.as_deref(),
        source,
    );
    Ok(())
}

pub(crate) fn new_course(course: &SourceCourse) -> NewCourse<'_> {
    NewCourse {
        crn: &course.crn,
        subj_code: &course.subj_code,
        crse_numb: &course.crse_numb,
        seq_numb: &course.seq_numb,
        enrollment: course.enrollment,
        units: course.units,
        cust_dept: &course.cust_dept,
    }
}

pub(crate) fn describe_course(course: &SourceCourse) -> String {
    format!(
        "{} {}-{} (CRN {})",
        course.subj_code, course.crse_numb, course.seq_numb, course.crn
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;

    use crate::error::HarvestError;
    use crate::sources::*;
    use crate::types::EffortType;

    /// Upstream sources backed by fixed vectors.
    #[derive(Default)]
    pub struct StaticSources {
        pub curriculum: Vec<Vec<CurriculumEffortRow>>,
        pub registrar: Vec<RegistrarCourse>,
        pub clinical: Vec<ClinicalAssignment>,
        pub accounts: Vec<DirectoryAccount>,
        pub effort_types: Vec<EffortType>,
        pub fail_registrar: bool,
    }

    #[async_trait]
    impl CurriculumSource for StaticSources {
        async fn effort_batches(
            &self,
            _term_code: i32,
        ) -> Result<Vec<Vec<CurriculumEffortRow>>, HarvestError> {
            Ok(self.curriculum.clone())
        }
    }

    #[async_trait]
    impl RegistrarSource for StaticSources {
        async fn courses(&self, _term_code: i32) -> Result<Vec<RegistrarCourse>, HarvestError> {
            if self.fail_registrar {
                return Err(HarvestError::source("registrar", "timed out"));
            }
            Ok(self.registrar.clone())
        }
    }

    #[async_trait]
    impl DirectorySource for StaticSources {
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

    #[async_trait]
    impl LookupStore for StaticSources {
        async fn effort_types(&self) -> Result<Vec<EffortType>, HarvestError> {
            Ok(self.effort_types.clone())
        }

        async fn resolve_department(
            &self,
            _person_id: i64,
            reported: Option<&str>,
        ) -> Result<Option<String>, HarvestError> {
            Ok(reported.map(str::to_string))
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

    pub fn instructor(person_id: i64, last_name: &str) -> SourceInstructor {
        SourceInstructor {
            person_id,
            first_name: "Pat".to_string(),
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
            enrollment: 12,
            units: 4.0,
            cust_dept: "VME".to_string(),
        }
    }
}
