use async_trait::async_trait;

use super::EffortDb;
use crate::error::HarvestError;
use crate::sources::LookupStore;
use crate::types::EffortType;

/// Effort types come from the `effort_types` table. A department reported
/// by the upstream source wins; otherwise the person's most recent
/// non-guest department from earlier terms is used.
#[async_trait]
impl LookupStore for EffortDb {
    async fn effort_types(&self) -> Result<Vec<EffortType>, HarvestError> {
        EffortDb::effort_types(self)
    }

    async fn resolve_department(
        &self,
        person_id: i64,
        reported: Option<&str>,
    ) -> Result<Option<String>, HarvestError> {
        match reported.map(str::trim).filter(|d| !d.is_empty()) {
            Some(department) => Ok(Some(department.to_uppercase())),
            None => self.latest_department(person_id),
        }
    }
}
