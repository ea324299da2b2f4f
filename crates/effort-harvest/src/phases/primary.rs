use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{add_source_instructor, check_cancelled, describe_course, new_course};
use crate::context::HarvestContext;
use crate::error::HarvestError;
use crate::sources::{CurriculumSource, LookupStore};
use crate::types::{EffortAmount, HarvestSource};

/// Pulls instructor/course/effort triples from the curriculum system.
pub struct PrimarySourcePhase {
    source: Arc<dyn CurriculumSource>,
    lookups: Arc<dyn LookupStore>,
}

impl PrimarySourcePhase {
    pub const ORDER: i32 = 10;
    pub const NAME: &'static str = "Primary";

    pub fn new(source: Arc<dyn CurriculumSource>, lookups: Arc<dyn LookupStore>) -> Self {
        Self { source, lookups }
    }

    pub(super) async fn harvest(
        &self,
        ctx: &mut HarvestContext,
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        let batches = self.source.effort_batches(ctx.term_code()).await?;
        debug!(batches = batches.len(), "Curriculum batches received");

        for batch in batches {
            check_cancelled(cancel)?;

            for row in batch {
                let Some(effort_type) = ctx.effort_type(&row.effort_type_id).cloned() else {
                    ctx.warn(
                        Self::NAME,
                        format!("Unknown effort type '{}' skipped", row.effort_type_id),
                        Some(format!(
                            "person {} on {}",
                            row.instructor.person_id,
                            describe_course(&row.course)
                        )),
                    );
                    continue;
                };

                add_source_instructor(ctx, self.lookups.as_ref(), &row.instructor, HarvestSource::Primary)
                    .await?;
                let course = ctx.add_course(new_course(&row.course), HarvestSource::Primary);
                let amount = EffortAmount::resolve(
                    &effort_type,
                    ctx.term_code(),
                    row.hours,
                    row.weeks,
                    ctx.config(),
                );
                ctx.add_effort(
                    row.instructor.person_id,
                    course,
                    &effort_type.id,
                    &row.role,
                    amount,
                    HarvestSource::Primary,
                );
            }
        }

        Ok(())
    }
}
