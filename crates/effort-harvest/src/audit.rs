//! Audit trail written by the harvest.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::HarvestError;

pub const CATEGORY_TERM: &str = "Term";
pub const CATEGORY_IMPORT: &str = "Import";

/// Writes audit entries inside the caller's transaction.
pub trait AuditService: Send + Sync {
    /// Records a change to the term itself (status dates, harvest).
    fn add_term_change_audit(
        &self,
        conn: &Connection,
        term_code: i32,
        action: &str,
        details: &str,
        modified_by: &str,
    ) -> Result<(), HarvestError>;

    /// Records a bulk import into the term.
    fn add_import_audit(
        &self,
        conn: &Connection,
        term_code: i32,
        action: &str,
        details: &str,
        modified_by: &str,
    ) -> Result<(), HarvestError>;

    /// Removes the record-level audit entries of a term whose rows are
    /// about to be rebuilt. Term and import entries are kept.
    fn clear_audit_for_term(&self, conn: &Connection, term_code: i32) -> Result<usize, HarvestError>;
}

/// Audit service backed by the `audits` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteAuditService;

impl SqliteAuditService {
    fn insert(
        conn: &Connection,
        term_code: i32,
        category: &str,
        action: &str,
        details: &str,
        modified_by: &str,
    ) -> Result<(), HarvestError> {
        conn.execute(
            "INSERT INTO audits (term_code, category, action, details, modified_by, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![term_code, category, action, details, modified_by, Utc::now()],
        )?;
        Ok(())
    }
}

impl AuditService for SqliteAuditService {
    fn add_term_change_audit(
        &self,
        conn: &Connection,
        term_code: i32,
        action: &str,
        details: &str,
        modified_by: &str,
    ) -> Result<(), HarvestError> {
        Self::insert(conn, term_code, CATEGORY_TERM, action, details, modified_by)
    }

    fn add_import_audit(
        &self,
        conn: &Connection,
        term_code: i32,
        action: &str,
        details: &str,
        modified_by: &str,
    ) -> Result<(), HarvestError> {
        Self::insert(conn, term_code, CATEGORY_IMPORT, action, details, modified_by)
    }

    fn clear_audit_for_term(&self, conn: &Connection, term_code: i32) -> Result<usize, HarvestError> {
        Ok(conn.execute(
            "DELETE FROM audits WHERE term_code = ?1 AND category NOT IN (?2, ?3)",
            params![term_code, CATEGORY_TERM, CATEGORY_IMPORT],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::EffortDb;

    #[test]
    fn test_clear_keeps_term_and_import_entries() {
        let db = EffortDb::open_in_memory().unwrap();
        let audit = SqliteAuditService;

        db.transaction(|tx| {
            audit.add_term_change_audit(tx, 202409, "Harvest", "{}", "tester")?;
            audit.add_import_audit(tx, 202409, "Harvest", "{}", "tester")?;
            SqliteAuditService::insert(tx, 202409, "Effort", "Update", "{}", "tester")?;
            SqliteAuditService::insert(tx, 202410, "Effort", "Update", "{}", "tester")?;
            assert_eq!(audit.clear_audit_for_term(tx, 202409)?, 1);
            Ok(())
        })
        .unwrap();

        let categories: Vec<_> = db
            .audits_for_term(202409)
            .unwrap()
            .into_iter()
            .map(|a| a.category)
            .collect();
        assert_eq!(categories, vec!["Term", "Import"]);
        assert_eq!(db.audits_for_term(202410).unwrap().len(), 1);
    }
}
