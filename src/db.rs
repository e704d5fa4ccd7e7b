use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::catalog;
use crate::terms::{ExamPeriod, StudyLevel, StudyMode};

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("rasidd.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            study_level TEXT NOT NULL,
            study_mode TEXT NOT NULL,
            is_diploma INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_level_mode ON students(study_level, study_mode)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            period TEXT NOT NULL,
            month1 REAL,
            month2 REAL,
            month3 REAL,
            work_total REAL NOT NULL,
            final_exam REAL,
            period_total REAL NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id, academic_year, period)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_grades_student ON subject_grades(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_grades_student_year
         ON subject_grades(student_id, academic_year)",
        [],
    )?;

    seed_subjects(&conn)?;

    Ok(conn)
}

// The subject catalog is reference data; reseeding an already-seeded
// workspace is a no-op.
fn seed_subjects(conn: &Connection) -> anyhow::Result<()> {
    for (i, name) in catalog::subject_names().enumerate() {
        conn.execute(
            "INSERT OR IGNORE INTO subjects(id, name, sort_order) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), name, i as i64),
        )?;
    }
    Ok(())
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub student_no: String,
    pub name: String,
    pub level: StudyLevel,
    pub mode: StudyMode,
    pub is_diploma: bool,
    pub active: bool,
    pub sort_order: i64,
}

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    let level_code: String = row.get(3)?;
    let mode_code: String = row.get(4)?;
    Ok(StudentRow {
        id: row.get(0)?,
        student_no: row.get(1)?,
        name: row.get(2)?,
        // Stored codes always come from the closed enums; a row written by
        // a newer schema falls back to defaults instead of failing the query.
        level: StudyLevel::from_code(&level_code).unwrap_or(StudyLevel::FirstYear),
        mode: StudyMode::from_code(&mode_code).unwrap_or(StudyMode::Regular),
        is_diploma: row.get::<_, i64>(5)? != 0,
        active: row.get::<_, i64>(6)? != 0,
        sort_order: row.get(7)?,
    })
}

const STUDENT_COLS: &str =
    "id, student_no, name, study_level, study_mode, is_diploma, active, sort_order";

pub fn find_student_by_number(conn: &Connection, number: &str) -> anyhow::Result<Option<StudentRow>> {
    let sql = format!("SELECT {} FROM students WHERE student_no = ?", STUDENT_COLS);
    let row = conn
        .query_row(&sql, [number], student_from_row)
        .optional()?;
    Ok(row)
}

/// Exact student-number match wins; otherwise a contains-match on the name.
/// Ambiguous name matches resolve to the lowest sort order, mirroring the
/// roster display.
pub fn find_student_by_number_or_name(
    conn: &Connection,
    number: &str,
    name: &str,
) -> anyhow::Result<Option<StudentRow>> {
    if !number.trim().is_empty() {
        if let Some(s) = find_student_by_number(conn, number.trim())? {
            return Ok(Some(s));
        }
    }
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    let sql = format!(
        "SELECT {} FROM students WHERE name LIKE '%' || ? || '%' ORDER BY sort_order LIMIT 1",
        STUDENT_COLS
    );
    let row = conn.query_row(&sql, [name], student_from_row).optional()?;
    Ok(row)
}

pub fn list_students(
    conn: &Connection,
    level: Option<StudyLevel>,
    mode: Option<StudyMode>,
) -> anyhow::Result<Vec<StudentRow>> {
    let mut sql = format!("SELECT {} FROM students WHERE 1=1", STUDENT_COLS);
    let mut binds: Vec<String> = Vec::new();
    if let Some(level) = level {
        sql.push_str(" AND study_level = ?");
        binds.push(level.code().to_string());
    }
    if let Some(mode) = mode {
        sql.push_str(" AND study_mode = ?");
        binds.push(mode.code().to_string());
    }
    sql.push_str(" ORDER BY sort_order");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_student(
    conn: &Connection,
    student_no: &str,
    name: &str,
    level: StudyLevel,
    mode: StudyMode,
    is_diploma: bool,
) -> anyhow::Result<StudentRow> {
    let next_sort: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students",
        [],
        |r| r.get(0),
    )?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, student_no, name, study_level, study_mode,
                              is_diploma, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?, ?)",
        (
            &id,
            student_no,
            name,
            level.code(),
            mode.code(),
            is_diploma as i64,
            next_sort,
            now_rfc3339(),
        ),
    )?;
    Ok(StudentRow {
        id,
        student_no: student_no.to_string(),
        name: name.to_string(),
        level,
        mode,
        is_diploma,
        active: true,
        sort_order: next_sort,
    })
}

pub fn find_subject_id(conn: &Connection, name: &str) -> anyhow::Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM subjects WHERE name = ?",
            [name.trim()],
            |r| r.get::<_, String>(0),
        )
        .optional()?;
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct GradeKey<'a> {
    pub student_id: &'a str,
    pub subject_id: &'a str,
    pub academic_year: &'a str,
    pub period: ExamPeriod,
}

#[derive(Debug, Clone)]
pub struct GradeMarks {
    pub month1: Option<f64>,
    pub month2: Option<f64>,
    pub month3: Option<f64>,
    pub work_total: f64,
    pub final_exam: Option<f64>,
    pub period_total: f64,
}

/// Atomic conditional write: one `INSERT … ON CONFLICT … DO UPDATE`, never a
/// read-modify-write, so concurrent imports touching the same key cannot
/// lose updates. Returns whether an existing record was overwritten (the
/// lookup is only for the caller's warning, the write does not depend on it).
pub fn upsert_subject_grade(
    conn: &Connection,
    key: &GradeKey<'_>,
    marks: &GradeMarks,
) -> anyhow::Result<bool> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM subject_grades
             WHERE student_id = ? AND subject_id = ? AND academic_year = ? AND period = ?",
            (key.student_id, key.subject_id, key.academic_year, key.period.code()),
            |r| r.get(0),
        )
        .optional()?;

    conn.execute(
        "INSERT INTO subject_grades(id, student_id, subject_id, academic_year, period,
                                    month1, month2, month3, work_total, final_exam,
                                    period_total, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, academic_year, period) DO UPDATE SET
           month1 = excluded.month1,
           month2 = excluded.month2,
           month3 = excluded.month3,
           work_total = excluded.work_total,
           final_exam = excluded.final_exam,
           period_total = excluded.period_total,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            key.student_id,
            key.subject_id,
            key.academic_year,
            key.period.code(),
            marks.month1,
            marks.month2,
            marks.month3,
            marks.work_total,
            marks.final_exam,
            marks.period_total,
            now_rfc3339(),
        ),
    )?;

    Ok(existing.is_some())
}

#[derive(Debug, Clone)]
pub struct GradeRow {
    pub subject_id: String,
    pub subject_name: String,
    pub period: ExamPeriod,
    pub month1: Option<f64>,
    pub month2: Option<f64>,
    pub month3: Option<f64>,
    pub work_total: f64,
    pub final_exam: Option<f64>,
    pub period_total: f64,
    pub updated_at: Option<String>,
}

pub fn list_grades_for_student(
    conn: &Connection,
    student_id: &str,
    academic_year: &str,
) -> anyhow::Result<Vec<GradeRow>> {
    let mut stmt = conn.prepare(
        "SELECT g.subject_id, s.name, g.period, g.month1, g.month2, g.month3,
                g.work_total, g.final_exam, g.period_total, g.updated_at
         FROM subject_grades g
         JOIN subjects s ON s.id = g.subject_id
         WHERE g.student_id = ? AND g.academic_year = ?
         ORDER BY s.sort_order, g.period",
    )?;
    let rows = stmt
        .query_map((student_id, academic_year), |row| {
            let period_code: String = row.get(2)?;
            Ok(GradeRow {
                subject_id: row.get(0)?,
                subject_name: row.get(1)?,
                period: ExamPeriod::from_code(&period_code).unwrap_or(ExamPeriod::First),
                month1: row.get(3)?,
                month2: row.get(4)?,
                month3: row.get(5)?,
                work_total: row.get(6)?,
                final_exam: row.get(7)?,
                period_total: row.get(8)?,
                updated_at: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
