/// Destination store for terms, instructors, courses and effort records
mod lookups;
mod types;

pub use types::{CreatedEffort, DbAudit, DbCourse, DbEffortRecord, DbInstructor, DbTerm};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::{HarvestContext, PersistedSnapshot};
use crate::error::HarvestError;
use crate::phases::check_cancelled;
use crate::term::TermDates;
use crate::types::{CourseIdentity, CourseKey, EffortAmount, EffortType, HarvestSummary};

const SCHEMA_SQL: &str = include_str!("../../../../sql/init_effort.sql");

pub struct EffortDb {
    db: Mutex<Connection>,
}

impl EffortDb {
    /// Opens (or creates) the store at `db_path` and applies the schema.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, HarvestError> {
        Self::init(Connection::open(db_path)?)
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> Result<Self, HarvestError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, HarvestError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, HarvestError> {
        self.db.lock().map_err(|_| HarvestError::StorePoisoned)
    }

    /// Runs `f` inside one transaction. The transaction commits only when
    /// `f` returns `Ok`; any error rolls every statement back.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, HarvestError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, HarvestError>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Creates a term with no status dates.
    pub fn insert_term(&self, term_code: i32) -> Result<DbTerm, HarvestError> {
        let db = self.conn()?;
        db.execute("INSERT INTO terms (term_code) VALUES (?1)", [term_code])?;
        Ok(DbTerm {
            term_code,
            dates: TermDates::default(),
        })
    }

    pub fn term(&self, term_code: i32) -> Result<Option<DbTerm>, HarvestError> {
        let db = self.conn()?;
        get_term(&db, term_code)
    }

    pub fn update_term_dates(&self, term_code: i32, dates: &TermDates) -> Result<(), HarvestError> {
        let db = self.conn()?;
        set_term_dates(&db, term_code, dates)
    }

    pub fn instructors_for_term(&self, term_code: i32) -> Result<Vec<DbInstructor>, HarvestError> {
        let db = self.conn()?;
        get_instructors(&db, term_code)
    }

    pub fn courses_for_term(&self, term_code: i32) -> Result<Vec<DbCourse>, HarvestError> {
        let db = self.conn()?;
        get_courses(&db, term_code)
    }

    pub fn effort_records_for_term(
        &self,
        term_code: i32,
    ) -> Result<Vec<DbEffortRecord>, HarvestError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT record_id, course_id, person_id, term_code, effort_type_id, role,
                    hours, weeks, modified_by, modified_at
             FROM effort_records
             WHERE term_code = ?1
             ORDER BY record_id",
        )?;

        let records = stmt
            .query_map([term_code], |row| {
                let hours: Option<i32> = row.get(6)?;
                let weeks: Option<i32> = row.get(7)?;
                Ok(DbEffortRecord {
                    record_id: row.get(0)?,
                    course_id: row.get(1)?,
                    person_id: row.get(2)?,
                    term_code: row.get(3)?,
                    effort_type_id: row.get(4)?,
                    role: row.get(5)?,
                    amount: match (hours, weeks) {
                        (Some(h), _) => EffortAmount::Hours(h),
                        (None, Some(w)) => EffortAmount::Weeks(w),
                        (None, None) => EffortAmount::Hours(0),
                    },
                    modified_by: row.get(8)?,
                    modified_at: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    pub fn audits_for_term(&self, term_code: i32) -> Result<Vec<DbAudit>, HarvestError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT audit_id, term_code, category, action, details, modified_by, modified_at
             FROM audits
             WHERE term_code = ?1
             ORDER BY audit_id",
        )?;

        let audits = stmt
            .query_map([term_code], |row| {
                Ok(DbAudit {
                    audit_id: row.get(0)?,
                    term_code: row.get(1)?,
                    category: row.get(2)?,
                    action: row.get(3)?,
                    details: row.get(4)?,
                    modified_by: row.get(5)?,
                    modified_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(audits)
    }

    /// Identities of the rows currently persisted for a term.
    pub fn persisted_snapshot(&self, term_code: i32) -> Result<PersistedSnapshot, HarvestError> {
        let db = self.conn()?;

        let instructors = get_instructors(&db, term_code)?
            .into_iter()
            .map(|i| i.person_id)
            .collect();
        let courses = get_courses(&db, term_code)?
            .into_iter()
            .map(|c| CourseIdentity::new(&c.crn, &c.subj_code, &c.crse_numb))
            .collect();

        let mut stmt = db.prepare(
            "SELECT e.person_id, c.crn, e.effort_type_id
             FROM effort_records e
             JOIN courses c ON e.course_id = c.course_id
             WHERE e.term_code = ?1",
        )?;
        let effort_records = stmt
            .query_map([term_code], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(PersistedSnapshot {
            instructors,
            courses,
            effort_records,
        })
    }

    pub fn summary_for_term(&self, term_code: i32) -> Result<HarvestSummary, HarvestError> {
        let db = self.conn()?;
        term_summary(&db, term_code)
    }

    pub fn insert_instructor(&self, instructor: &DbInstructor) -> Result<(), HarvestError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO instructors (person_id, term_code, first_name, last_name, department,
                                      title, is_guest, effort_verified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                instructor.person_id,
                instructor.term_code,
                instructor.first_name,
                instructor.last_name,
                instructor.department,
                instructor.title,
                instructor.is_guest,
                instructor.effort_verified_at,
            ],
        )?;
        Ok(())
    }

    /// Inserts a course and returns its synthetic id.
    pub fn insert_course(&self, course: &DbCourse) -> Result<i64, HarvestError> {
        let db = self.conn()?;
        insert_course_row(&db, course)
    }

    /// Inserts an effort row. The instructor's effort verification for the
    /// term is cleared.
    pub fn insert_effort_record(&self, record: &DbEffortRecord) -> Result<i64, HarvestError> {
        let db = self.conn()?;
        insert_effort_row(
            &db,
            record.course_id,
            record.person_id,
            record.term_code,
            &record.effort_type_id,
            &record.role,
            record.amount,
            &record.modified_by,
            record.modified_at,
        )
    }

    /// Marks an instructor's effort for the term as verified.
    pub fn verify_effort(
        &self,
        person_id: i64,
        term_code: i32,
        now: DateTime<Utc>,
    ) -> Result<(), HarvestError> {
        let db = self.conn()?;
        let updated = db.execute(
            "UPDATE instructors SET effort_verified_at = ?1 WHERE person_id = ?2 AND term_code = ?3",
            params![now, person_id, term_code],
        )?;
        if updated == 0 {
            return Err(HarvestError::validation(format!(
                "instructor {} not found in term {}",
                person_id, term_code
            )));
        }
        Ok(())
    }

    /// Links a child course to a parent course.
    ///
    /// A course has at most one parent, and a course can't be both a parent
    /// and a child.
    pub fn add_course_relationship(
        &self,
        parent_course_id: i64,
        child_course_id: i64,
        relationship_type: &str,
    ) -> Result<(), HarvestError> {
        if parent_course_id == child_course_id {
            return Err(HarvestError::validation("a course cannot be its own parent"));
        }

        let db = self.conn()?;
        let count = |sql: &str, id: i64| -> Result<i64, HarvestError> {
            Ok(db.query_row(sql, [id], |row| row.get(0))?)
        };

        if count(
            "SELECT COUNT(*) FROM course_relationships WHERE child_course_id = ?1",
            child_course_id,
        )? > 0
        {
            return Err(HarvestError::validation(format!(
                "course {} already has a parent",
                child_course_id
            )));
        }
        if count(
            "SELECT COUNT(*) FROM course_relationships WHERE parent_course_id = ?1",
            child_course_id,
        )? > 0
        {
            return Err(HarvestError::validation(format!(
                "course {} is a parent and cannot become a child",
                child_course_id
            )));
        }
        if count(
            "SELECT COUNT(*) FROM course_relationships WHERE child_course_id = ?1",
            parent_course_id,
        )? > 0
        {
            return Err(HarvestError::validation(format!(
                "course {} is a child and cannot become a parent",
                parent_course_id
            )));
        }

        db.execute(
            "INSERT INTO course_relationships (parent_course_id, child_course_id, relationship_type)
             VALUES (?1, ?2, ?3)",
            params![parent_course_id, child_course_id, relationship_type],
        )?;
        Ok(())
    }

    /// Number of parent/child links whose courses belong to the term.
    pub fn course_relationship_count(&self, term_code: i32) -> Result<i64, HarvestError> {
        let db = self.conn()?;
        Ok(db.query_row(
            "SELECT COUNT(*) FROM course_relationships r
             JOIN courses c ON r.child_course_id = c.course_id
             WHERE c.term_code = ?1",
            [term_code],
            |row| row.get(0),
        )?)
    }

    /// Inserts or replaces effort type definitions.
    pub fn upsert_effort_types(&self, effort_types: &[EffortType]) -> Result<(), HarvestError> {
        let db = self.conn()?;
        for effort_type in effort_types {
            db.execute(
                "INSERT INTO effort_types (effort_type_id, description, uses_weeks,
                                           allowed_on_r_courses, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (effort_type_id) DO UPDATE SET
                    description = excluded.description,
                    uses_weeks = excluded.uses_weeks,
                    allowed_on_r_courses = excluded.allowed_on_r_courses,
                    is_active = excluded.is_active",
                params![
                    effort_type.id,
                    effort_type.description,
                    effort_type.uses_weeks,
                    effort_type.allowed_on_r_courses,
                    effort_type.is_active,
                ],
            )?;
        }
        Ok(())
    }

    pub fn effort_types(&self) -> Result<Vec<EffortType>, HarvestError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT effort_type_id, description, uses_weeks, allowed_on_r_courses, is_active
             FROM effort_types
             ORDER BY effort_type_id",
        )?;
        let types = stmt
            .query_map([], |row| {
                Ok(EffortType {
                    id: row.get(0)?,
                    description: row.get(1)?,
                    uses_weeks: row.get(2)?,
                    allowed_on_r_courses: row.get(3)?,
                    is_active: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(types)
    }

    /// Most recent department recorded for a person in any term.
    pub fn latest_department(&self, person_id: i64) -> Result<Option<String>, HarvestError> {
        let db = self.conn()?;
        Ok(db
            .query_row(
                "SELECT department FROM instructors
                 WHERE person_id = ?1 AND is_guest = 0
                 ORDER BY term_code DESC
                 LIMIT 1",
                [person_id],
                |row| row.get(0),
            )
            .optional()?)
    }
}

// Statements shared by the store methods and the harvest transaction.

pub fn get_term(conn: &Connection, term_code: i32) -> Result<Option<DbTerm>, HarvestError> {
    Ok(conn
        .query_row(
            "SELECT term_code, harvested_at, opened_at, closed_at FROM terms WHERE term_code = ?1",
            [term_code],
            |row| {
                Ok(DbTerm {
                    term_code: row.get(0)?,
                    dates: TermDates {
                        harvested_at: row.get(1)?,
                        opened_at: row.get(2)?,
                        closed_at: row.get(3)?,
                    },
                })
            },
        )
        .optional()?)
}

pub fn set_term_dates(
    conn: &Connection,
    term_code: i32,
    dates: &TermDates,
) -> Result<(), HarvestError> {
    let updated = conn.execute(
        "UPDATE terms SET harvested_at = ?1, opened_at = ?2, closed_at = ?3 WHERE term_code = ?4",
        params![dates.harvested_at, dates.opened_at, dates.closed_at, term_code],
    )?;
    if updated == 0 {
        return Err(HarvestError::TermNotFound { term_code });
    }
    Ok(())
}

fn instructor_from_row(row: &Row<'_>) -> rusqlite::Result<DbInstructor> {
    Ok(DbInstructor {
        person_id: row.get(0)?,
        term_code: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        department: row.get(4)?,
        title: row.get(5)?,
        is_guest: row.get(6)?,
        effort_verified_at: row.get(7)?,
    })
}

pub fn get_instructors(conn: &Connection, term_code: i32) -> Result<Vec<DbInstructor>, HarvestError> {
    let mut stmt = conn.prepare(
        "SELECT person_id, term_code, first_name, last_name, department, title, is_guest,
                effort_verified_at
         FROM instructors
         WHERE term_code = ?1
         ORDER BY last_name, first_name, person_id",
    )?;
    let instructors = stmt
        .query_map([term_code], instructor_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(instructors)
}

pub fn get_courses(conn: &Connection, term_code: i32) -> Result<Vec<DbCourse>, HarvestError> {
    let mut stmt = conn.prepare(
        "SELECT course_id, term_code, crn, subj_code, crse_numb, seq_numb, enrollment, units,
                cust_dept
         FROM courses
         WHERE term_code = ?1
         ORDER BY subj_code, crse_numb, seq_numb, course_id",
    )?;
    let courses = stmt
        .query_map([term_code], |row| {
            Ok(DbCourse {
                course_id: row.get(0)?,
                term_code: row.get(1)?,
                crn: row.get(2)?,
                subj_code: row.get(3)?,
                crse_numb: row.get(4)?,
                seq_numb: row.get(5)?,
                enrollment: row.get(6)?,
                units: row.get(7)?,
                cust_dept: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(courses)
}

/// Looks up a course by its uniqueness key within a term.
pub fn find_course_id(
    conn: &Connection,
    term_code: i32,
    crn: &str,
    units: f64,
) -> Result<Option<i64>, HarvestError> {
    Ok(conn
        .query_row(
            "SELECT course_id FROM courses WHERE term_code = ?1 AND crn = ?2 AND units = ?3",
            params![term_code, crn, units],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn insert_course_row(conn: &Connection, course: &DbCourse) -> Result<i64, HarvestError> {
    conn.prepare_cached(
        "INSERT INTO courses (term_code, crn, subj_code, crse_numb, seq_numb, enrollment, units,
                              cust_dept)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?
    .execute(params![
        course.term_code,
        course.crn,
        course.subj_code,
        course.crse_numb,
        course.seq_numb,
        course.enrollment,
        course.units,
        course.cust_dept,
    ])?;
    Ok(conn.last_insert_rowid())
}

/// Inserts an effort row and clears the person's effort verification for
/// the term.
#[allow(clippy::too_many_arguments)]
pub fn insert_effort_row(
    conn: &Connection,
    course_id: i64,
    person_id: i64,
    term_code: i32,
    effort_type_id: &str,
    role: &str,
    amount: EffortAmount,
    modified_by: &str,
    modified_at: DateTime<Utc>,
) -> Result<i64, HarvestError> {
    conn.prepare_cached(
        "INSERT INTO effort_records (course_id, person_id, term_code, effort_type_id, role,
                                     hours, weeks, modified_by, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?
    .execute(params![
        course_id,
        person_id,
        term_code,
        effort_type_id,
        role,
        amount.hours(),
        amount.weeks(),
        modified_by,
        modified_at,
    ])?;
    let record_id = conn.last_insert_rowid();

    conn.prepare_cached(
        "UPDATE instructors SET effort_verified_at = NULL WHERE person_id = ?1 AND term_code = ?2",
    )?
    .execute(params![person_id, term_code])?;

    Ok(record_id)
}

/// True if the person already has an effort row on the course.
pub fn effort_exists(
    conn: &Connection,
    person_id: i64,
    course_id: i64,
    effort_type_id: &str,
) -> Result<bool, HarvestError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM effort_records
         WHERE person_id = ?1 AND course_id = ?2 AND effort_type_id = ?3",
        params![person_id, course_id, effort_type_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn term_summary(conn: &Connection, term_code: i32) -> Result<HarvestSummary, HarvestError> {
    let count = |sql: &str| -> Result<usize, HarvestError> {
        let n: i64 = conn.query_row(sql, [term_code], |row| row.get(0))?;
        Ok(n as usize)
    };

    Ok(HarvestSummary {
        total_instructors: count("SELECT COUNT(*) FROM instructors WHERE term_code = ?1")?,
        total_courses: count("SELECT COUNT(*) FROM courses WHERE term_code = ?1")?,
        total_effort_records: count("SELECT COUNT(*) FROM effort_records WHERE term_code = ?1")?,
        guest_accounts: count(
            "SELECT COUNT(*) FROM instructors WHERE term_code = ?1 AND is_guest = 1",
        )?,
    })
}

/// Row counts removed by [`clear_term_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearedRows {
    pub instructors: usize,
    pub courses: usize,
    pub effort_records: usize,
}

/// Hard-deletes every instructor, course and effort row owned by a term,
/// together with the course relationships of its courses.
pub fn clear_term_data(conn: &Connection, term_code: i32) -> Result<ClearedRows, HarvestError> {
    let effort_records = conn.execute("DELETE FROM effort_records WHERE term_code = ?1", [term_code])?;
    conn.execute(
        "DELETE FROM course_relationships
         WHERE parent_course_id IN (SELECT course_id FROM courses WHERE term_code = ?1)
            OR child_course_id IN (SELECT course_id FROM courses WHERE term_code = ?1)",
        [term_code],
    )?;
    let courses = conn.execute("DELETE FROM courses WHERE term_code = ?1", [term_code])?;
    let instructors = conn.execute("DELETE FROM instructors WHERE term_code = ?1", [term_code])?;

    Ok(ClearedRows {
        instructors,
        courses,
        effort_records,
    })
}

/// Writes the rows collected in `ctx`: instructors, then courses, then the
/// effort rows that reference them. Cancellation is checked between the
/// three batches.
pub fn insert_harvested_rows(
    conn: &Connection,
    ctx: &HarvestContext,
    modified_by: &str,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Vec<CreatedEffort>, HarvestError> {
    let term_code = ctx.term_code();

    {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO instructors (person_id, term_code, first_name, last_name, department,
                                      title, is_guest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for instructor in ctx.instructors() {
            stmt.execute(params![
                instructor.person_id,
                term_code,
                instructor.first_name,
                instructor.last_name,
                instructor.department,
                instructor.title,
                instructor.is_guest(),
            ])?;
        }
    }
    check_cancelled(cancel)?;

    let mut course_ids: HashMap<CourseKey, (i64, String)> = HashMap::new();
    for course in ctx.courses() {
        let course_id = insert_course_row(
            conn,
            &DbCourse {
                course_id: 0,
                term_code,
                crn: course.crn.clone(),
                subj_code: course.subj_code.clone(),
                crse_numb: course.crse_numb.clone(),
                seq_numb: course.seq_numb.clone(),
                enrollment: course.enrollment,
                units: course.units,
                cust_dept: course.cust_dept.clone(),
            },
        )?;
        course_ids.insert(course.key(), (course_id, course.crse_numb.clone()));
    }
    check_cancelled(cancel)?;

    let mut created = Vec::with_capacity(ctx.effort_records().len());
    for effort in ctx.effort_records() {
        let (course_id, crse_numb) = course_ids.get(&effort.course).cloned().ok_or_else(|| {
            HarvestError::Phase {
                phase: effort.source.as_str().to_string(),
                message: format!("effort row references unknown course {}", effort.course.crn),
            }
        })?;
        let record_id = insert_effort_row(
            conn,
            course_id,
            effort.person_id,
            term_code,
            &effort.effort_type_id,
            &effort.role,
            effort.amount,
            modified_by,
            now,
        )?;
        created.push(CreatedEffort {
            record_id,
            person_id: effort.person_id,
            course_id,
            crse_numb,
            effort_type_id: effort.effort_type_id.clone(),
        });
    }

    debug!(
        term_code,
        instructors = ctx.instructors().len(),
        courses = course_ids.len(),
        effort_records = created.len(),
        "Harvested rows written"
    );
    Ok(created)
}
