//! Row counts for previews and results.

use crate::context::HarvestContext;
use crate::types::HarvestSummary;

/// Counts the rows collected in a context. Guest accounts are instructors
/// too, so `total_instructors >= guest_accounts` always holds.
pub fn summarize(ctx: &HarvestContext) -> HarvestSummary {
    HarvestSummary {
        total_instructors: ctx.instructors().len(),
        total_courses: ctx.courses().len(),
        total_effort_records: ctx.effort_records().len(),
        guest_accounts: ctx.instructors().iter().filter(|i| i.is_guest()).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarvestConfig;
    use crate::context::HarvestMode;
    use crate::types::HarvestSource;

    #[test]
    fn test_empty_context() {
        let ctx = HarvestContext::new(202409, HarvestMode::Preview, HarvestConfig::default());
        assert_eq!(summarize(&ctx), HarvestSummary::default());
    }

    #[test]
    fn test_guests_count_as_instructors() {
        let mut ctx = HarvestContext::new(202409, HarvestMode::Preview, HarvestConfig::default());
        ctx.add_instructor(1, "Pat", "Doe", "VME", None, HarvestSource::Primary);
        ctx.add_instructor(2, "Guest", "One", "GUEST", None, HarvestSource::Guest);
        ctx.add_instructor(3, "Guest", "Two", "GUEST", None, HarvestSource::Guest);

        let summary = summarize(&ctx);
        assert_eq!(summary.total_instructors, 3);
        assert_eq!(summary.guest_accounts, 2);
        assert_eq!(summary.total_effort_records, 0);
    }
}
