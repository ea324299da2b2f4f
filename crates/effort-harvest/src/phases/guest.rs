use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::check_cancelled;
use crate::context::HarvestContext;
use crate::error::HarvestError;
use crate::sources::DirectorySource;
use crate::types::HarvestSource;

/// Adds directory guest accounts as instructors with no effort rows.
/// Guests are recognised by the configured login naming convention and are
/// never linked to a course.
pub struct GuestAccountPhase {
    source: Arc<dyn DirectorySource>,
}

impl GuestAccountPhase {
    pub const ORDER: i32 = 40;
    pub const NAME: &'static str = "Guest";

    pub fn new(source: Arc<dyn DirectorySource>) -> Self {
        Self { source }
    }

    pub(super) async fn harvest(
        &self,
        ctx: &mut HarvestContext,
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        let pattern = ctx.config().guest_regex()?;
        let accounts = self.source.accounts().await?;
        check_cancelled(cancel)?;

        let mut added = 0usize;
        for account in accounts.iter().filter(|a| pattern.is_match(a.login_id.trim())) {
            if ctx.has_instructor(account.person_id) {
                ctx.warn(
                    Self::NAME,
                    format!(
                        "Guest account '{}' is already harvested as an instructor",
                        account.login_id
                    ),
                    Some(format!("person {}", account.person_id)),
                );
                continue;
            }

            let department = account
                .department
                .clone()
                .unwrap_or_else(|| ctx.config().guest_department.clone());
            ctx.add_instructor(
                account.person_id,
                &account.first_name,
                &account.last_name,
                &department,
                account.title.as_deref(),
                HarvestSource::Guest,
            );
            added += 1;
        }

        debug!(added, "Guest accounts collected");
        Ok(())
    }
}
