use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{add_source_instructor, check_cancelled, describe_course, new_course};
use crate::context::HarvestContext;
use crate::error::HarvestError;
use crate::sources::{LookupStore, RegistrarSource};
use crate::types::{EffortAmount, HarvestSource};

/// Pulls the registrar's courses that the curriculum system did not cover.
/// A registrar course is skipped when its reference number was already
/// collected when this phase started.
pub struct SecondarySourcePhase {
    source: Arc<dyn RegistrarSource>,
    lookups: Arc<dyn LookupStore>,
}

impl SecondarySourcePhase {
    pub const ORDER: i32 = 20;
    pub const NAME: &'static str = "Secondary";

    pub fn new(source: Arc<dyn RegistrarSource>, lookups: Arc<dyn LookupStore>) -> Self {
        Self { source, lookups }
    }

    pub(super) async fn harvest(
        &self,
        ctx: &mut HarvestContext,
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        let courses = self.source.courses(ctx.term_code()).await?;
        check_cancelled(cancel)?;

        let covered: HashSet<String> = courses
            .iter()
            .map(|c| c.course.crn.trim().to_string())
            .filter(|crn| ctx.has_crn(crn))
            .collect();
        let mut skipped = 0usize;

        for registrar_course in courses {
            if covered.contains(registrar_course.course.crn.trim()) {
                skipped += 1;
                continue;
            }

            let course = ctx.add_course(new_course(&registrar_course.course), HarvestSource::Secondary);

            for assignment in &registrar_course.assignments {
                let Some(effort_type) = ctx.effort_type(&assignment.effort_type_id).cloned() else {
                    ctx.warn(
                        Self::NAME,
                        format!("Unknown effort type '{}' skipped", assignment.effort_type_id),
                        Some(format!(
                            "person {} on {}",
                            assignment.instructor.person_id,
                            describe_course(&registrar_course.course)
                        )),
                    );
                    continue;
                };

                add_source_instructor(
                    ctx,
                    self.lookups.as_ref(),
                    &assignment.instructor,
                    HarvestSource::Secondary,
                )
                .await?;
                let amount = EffortAmount::resolve(
                    &effort_type,
                    ctx.term_code(),
                    assignment.hours,
                    None,
                    ctx.config(),
                );
                ctx.add_effort(
                    assignment.instructor.person_id,
                    course.clone(),
                    &effort_type.id,
                    &assignment.role,
                    amount,
                    HarvestSource::Secondary,
                );
            }
        }

        debug!(skipped, "Registrar courses already covered by an earlier phase");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarvestConfig;
    use crate::context::HarvestMode;
    use crate::phases::test_support::*;
    use crate::sources::{RegistrarAssignment, RegistrarCourse};

    fn registrar_course(crn: &str, person_id: i64) -> RegistrarCourse {
        RegistrarCourse {
            course: course(crn, "292"),
            assignments: vec![RegistrarAssignment {
                instructor: instructor(person_id, "Roe"),
                effort_type_id: "LEC".to_string(),
                role: "Instructor".to_string(),
                hours: Some(15),
            }],
        }
    }

    #[tokio::test]
    async fn test_skips_reference_numbers_already_collected() {
        let sources = Arc::new(StaticSources {
            registrar: vec![registrar_course("40001", 5), registrar_course("40009", 6)],
            effort_types: vec![effort_type("LEC", false, true)],
            ..Default::default()
        });
        let mut ctx = HarvestContext::new(202409, HarvestMode::Execute, HarvestConfig::default())
            .with_effort_types(sources.effort_types.clone());
        ctx.add_course(new_course(&course("40001", "410")), HarvestSource::Primary);

        let phase = SecondarySourcePhase::new(sources.clone(), sources.clone());
        phase.harvest(&mut ctx, &CancellationToken::new()).await.unwrap();

        assert_eq!(ctx.courses().len(), 2);
        assert_eq!(ctx.courses()[1].crn, "40009");
        assert_eq!(ctx.courses()[1].source, HarvestSource::Secondary);
        assert_eq!(ctx.instructors().len(), 1);
        assert_eq!(ctx.instructors()[0].person_id, 6);
        assert_eq!(ctx.effort_records().len(), 1);
    }

    #[tokio::test]
    async fn test_source_failure_propagates() {
        let sources = Arc::new(StaticSources {
            fail_registrar: true,
            ..Default::default()
        });
        let mut ctx = HarvestContext::new(202409, HarvestMode::Execute, HarvestConfig::default());
        let phase = SecondarySourcePhase::new(sources.clone(), sources.clone());

        let err = phase.harvest(&mut ctx, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, HarvestError::Source { .. }));
    }
}
