use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{add_source_instructor, check_cancelled, describe_course, new_course};
use crate::context::HarvestContext;
use crate::error::HarvestError;
use crate::sources::{ClinicalAssignment, DirectorySource, LookupStore};
use crate::term;
use crate::types::{CourseKey, EffortAmount, HarvestSource};

/// Turns weekly rotation assignments into one weeks-based effort row per
/// (instructor, course). Only semester terms have a rotation schedule.
pub struct ClinicalSchedulePhase {
    source: Arc<dyn DirectorySource>,
    lookups: Arc<dyn LookupStore>,
}

/// Assignments of one instructor on one course.
struct RotationGroup<'a> {
    first: &'a ClinicalAssignment,
    weeks: BTreeSet<i32>,
}

impl ClinicalSchedulePhase {
    pub const ORDER: i32 = 30;
    pub const NAME: &'static str = "Clinical";

    pub fn new(source: Arc<dyn DirectorySource>, lookups: Arc<dyn LookupStore>) -> Self {
        Self { source, lookups }
    }

    pub fn should_execute(&self, term_code: i32) -> bool {
        term::is_semester(term_code)
    }

    pub(super) async fn harvest(
        &self,
        ctx: &mut HarvestContext,
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        let assignments = self.source.clinical_assignments(ctx.term_code()).await?;
        check_cancelled(cancel)?;
        debug!(assignments = assignments.len(), "Rotation assignments received");

        // BTreeMap keeps the output order stable between runs
        let mut groups: BTreeMap<(i64, CourseKey), RotationGroup<'_>> = BTreeMap::new();
        for assignment in &assignments {
            let key = (
                assignment.instructor.person_id,
                CourseKey::new(&assignment.course.crn, assignment.course.units),
            );
            groups
                .entry(key)
                .or_insert_with(|| RotationGroup {
                    first: assignment,
                    weeks: BTreeSet::new(),
                })
                .weeks
                .insert(assignment.week_id);
        }

        for group in groups.values() {
            let assignment = group.first;
            let Some(effort_type) = ctx.effort_type(&assignment.effort_type_id).cloned() else {
                ctx.warn(
                    Self::NAME,
                    format!("Unknown effort type '{}' skipped", assignment.effort_type_id),
                    Some(format!(
                        "person {} on rotation {} ({})",
                        assignment.instructor.person_id,
                        assignment.rotation_name,
                        describe_course(&assignment.course)
                    )),
                );
                continue;
            };

            add_source_instructor(
                ctx,
                self.lookups.as_ref(),
                &assignment.instructor,
                HarvestSource::Clinical,
            )
            .await?;
            let course = ctx.add_course(new_course(&assignment.course), HarvestSource::Clinical);
            let amount = EffortAmount::resolve(
                &effort_type,
                ctx.term_code(),
                None,
                Some(group.weeks.len() as i32),
                ctx.config(),
            );
            ctx.add_effort(
                assignment.instructor.person_id,
                course,
                &effort_type.id,
                "Clinician",
                amount,
                HarvestSource::Clinical,
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarvestConfig;
    use crate::context::HarvestMode;
    use crate::phases::test_support::*;

    fn assignment(person_id: i64, week_id: i32, crn: &str) -> ClinicalAssignment {
        ClinicalAssignment {
            instructor: instructor(person_id, "Vet"),
            week_id,
            rotation_id: 3,
            rotation_name: "Small Animal Surgery".to_string(),
            course: course(crn, "453"),
            effort_type_id: "CLI".to_string(),
        }
    }

    async fn harvest(term_code: i32, assignments: Vec<ClinicalAssignment>) -> HarvestContext {
        let sources = Arc::new(StaticSources {
            clinical: assignments,
            effort_types: vec![effort_type("CLI", true, false)],
            ..Default::default()
        });
        let mut ctx = HarvestContext::new(term_code, HarvestMode::Execute, HarvestConfig::default())
            .with_effort_types(sources.effort_types.clone());
        let phase = ClinicalSchedulePhase::new(sources.clone(), sources.clone());
        phase.harvest(&mut ctx, &CancellationToken::new()).await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_counts_distinct_weeks_per_instructor_and_course() {
        let ctx = harvest(
            202409,
            vec![
                assignment(1, 1, "50001"),
                assignment(1, 2, "50001"),
                assignment(1, 2, "50001"),
                assignment(1, 5, "50002"),
                assignment(2, 1, "50001"),
            ],
        )
        .await;

        assert_eq!(ctx.effort_records().len(), 3);
        let weeks: Vec<_> = ctx
            .effort_records()
            .iter()
            .map(|e| (e.person_id, e.course.crn.as_str(), e.amount))
            .collect();
        assert!(weeks.contains(&(1, "50001", EffortAmount::Weeks(2))));
        assert!(weeks.contains(&(1, "50002", EffortAmount::Weeks(1))));
        assert!(weeks.contains(&(2, "50001", EffortAmount::Weeks(1))));
    }

    #[tokio::test]
    async fn test_records_hours_before_cutoff() {
        let ctx = harvest(201509, vec![assignment(1, 1, "50001"), assignment(1, 2, "50001")]).await;
        assert_eq!(ctx.effort_records()[0].amount, EffortAmount::Hours(80));
    }

    #[test]
    fn test_only_semester_terms() {
        let sources = Arc::new(StaticSources::default());
        let phase = ClinicalSchedulePhase::new(sources.clone(), sources);
        assert!(phase.should_execute(202409));
        assert!(phase.should_execute(202502));
        assert!(!phase.should_execute(202410));
        assert!(!phase.should_execute(202501));
    }
}
