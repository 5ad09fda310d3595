//! External identifier generation.
//!
//! Three schemes, one per entity class:
//! - academies: `ACAD-<year>-<rand 100..=999>-<YYYYMMDDHHMMSSmmm>`, never probed;
//! - students: `STU-<year>-<rand 1000..=9999>`, probed up to [`STUDENT_ID_ATTEMPTS`] times;
//! - teachers: `TCH-<year>-<NNN>`, lowest free index.
//!
//! Every generated column is `UNIQUE` in storage, so a concurrent writer that
//! wins the race surfaces as a conflict on insert rather than a duplicate.

use crate::error::{ServiceError, ServiceResult};
use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

pub const ACADEMY_PREFIX: &str = "ACAD";
pub const STUDENT_PREFIX: &str = "STU";
pub const TEACHER_PREFIX: &str = "TCH";

pub const STUDENT_ID_ATTEMPTS: usize = 5;
pub const SEQUENTIAL_INSERT_ATTEMPTS: usize = 5;

/// Columns that hold generated identifiers. Table and column names never come
/// from request input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdColumn {
    AcademyExternalId,
    StudentExternalId,
    TeacherCode,
}

impl IdColumn {
    fn table(self) -> &'static str {
        match self {
            IdColumn::AcademyExternalId => "academies",
            IdColumn::StudentExternalId => "students",
            IdColumn::TeacherCode => "teachers",
        }
    }

    fn column(self) -> &'static str {
        match self {
            IdColumn::AcademyExternalId => "academy_id",
            IdColumn::StudentExternalId => "student_id",
            IdColumn::TeacherCode => "teacher_code",
        }
    }
}

pub fn current_year() -> String {
    Utc::now().year().to_string()
}

pub fn id_exists(conn: &Connection, target: IdColumn, value: &str) -> ServiceResult<bool> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = ?",
        target.table(),
        target.column()
    );
    let found = conn
        .query_row(&sql, [value], |r| r.get::<_, i64>(0))
        .optional()?;
    Ok(found.is_some())
}

/// Lowest free `<prefix>-<year>-<NNN>` in `target`. Dense: gaps are filled first.
pub fn sequential_external_id(
    conn: &Connection,
    prefix: &str,
    year: &str,
    target: IdColumn,
) -> ServiceResult<String> {
    let mut index: u32 = 1;
    loop {
        let candidate = format!("{}-{}-{:03}", prefix, year, index);
        if !id_exists(conn, target, &candidate)? {
            return Ok(candidate);
        }
        debug!(candidate = %candidate, "sequential id taken, probing next");
        index += 1;
    }
}

/// Generates a sequential id and hands it to `insert`; when the insert loses a
/// race on the generated column the id is regenerated and the insert retried.
pub fn insert_with_sequential_id<F>(
    conn: &Connection,
    prefix: &str,
    year: &str,
    target: IdColumn,
    mut insert: F,
) -> ServiceResult<String>
where
    F: FnMut(&str) -> rusqlite::Result<()>,
{
    for _ in 0..SEQUENTIAL_INSERT_ATTEMPTS {
        let candidate = sequential_external_id(conn, prefix, year, target)?;
        match insert(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if crate::error::is_unique_violation(&e) => {
                if !id_exists(conn, target, &candidate)? {
                    // The conflict was on some other column; not ours to retry.
                    return Err(e.into());
                }
                debug!(candidate = %candidate, "sequential id claimed concurrently, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ServiceError::GenerationExhausted(format!(
        "Failed to generate unique {} identifier",
        prefix
    )))
}

/// `<prefix>-<year>-<rand 100..=999>-<compact UTC timestamp to the millisecond>`.
pub fn timestamped_external_id<R: Rng>(
    prefix: &str,
    year: &str,
    now: DateTime<Utc>,
    rng: &mut R,
) -> String {
    let random_part: u32 = rng.gen_range(100..=999);
    format!(
        "{}-{}-{}-{}",
        prefix,
        year,
        random_part,
        now.format("%Y%m%d%H%M%S%3f")
    )
}

pub fn academy_external_id() -> String {
    let now = Utc::now();
    timestamped_external_id(
        ACADEMY_PREFIX,
        &now.year().to_string(),
        now,
        &mut rand::thread_rng(),
    )
}

/// Tries up to `attempts` candidates; fails fast with `GenerationExhausted`
/// instead of falling back to an unchecked value.
pub fn bounded_probe<F>(
    conn: &Connection,
    target: IdColumn,
    attempts: usize,
    mut candidate: F,
) -> ServiceResult<String>
where
    F: FnMut() -> String,
{
    for attempt in 1..=attempts {
        let value = candidate();
        if !id_exists(conn, target, &value)? {
            return Ok(value);
        }
        debug!(attempt, candidate = %value, "generated id already in use");
    }
    Err(ServiceError::GenerationExhausted(
        "Failed to generate unique student ID".to_string(),
    ))
}

pub fn student_external_id<R: Rng>(
    conn: &Connection,
    year: &str,
    rng: &mut R,
) -> ServiceResult<String> {
    bounded_probe(conn, IdColumn::StudentExternalId, STUDENT_ID_ATTEMPTS, || {
        format!(
            "{}-{}-{}",
            STUDENT_PREFIX,
            year,
            rng.gen_range(1000..=9999u32)
        )
    })
}
