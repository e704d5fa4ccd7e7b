use std::collections::HashSet;
use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

use crate::calc::{self, MarkKind};
use crate::catalog::{self, GradeDistribution};
use crate::db;
use crate::terms::{ExamPeriod, StudyLevel, StudyMode};
use crate::workbook::{self, Cell, SheetTable};

/// Batch-level failure: nothing was processed. Row-level problems are data,
/// carried inside the report instead.
#[derive(Debug)]
pub struct ImportError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ImportError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        ImportError {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ImportParams {
    pub subject_name: String,
    pub academic_year: String,
    pub level: StudyLevel,
    pub mode: StudyMode,
    pub period: ExamPeriod,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub duplicate_rows: usize,
    pub restricted_students: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub saved_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub summary: ImportSummary,
}

const COL_STUDENT_NUMBER: &str = "studentNumber";
const COL_STUDENT_NAME: &str = "studentName";
const COL_MONTH1: &str = "month1";
const COL_MONTH2: &str = "month2";
const COL_MONTH3: &str = "month3";
const COL_PERIOD_EXAM: &str = "periodExam";

// Canonical column keys plus the headers the institute's own Arabic
// templates use.
const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    (COL_STUDENT_NUMBER, &["رقم الطالب"]),
    (COL_STUDENT_NAME, &["اسم الطالب"]),
    (COL_MONTH1, &["الشهر الأول"]),
    (COL_MONTH2, &["الشهر الثاني"]),
    (COL_MONTH3, &["الشهر الثالث"]),
    (COL_PERIOD_EXAM, &["اختبار الفترة"]),
];

struct ColumnMap {
    student_number: usize,
    student_name: usize,
    month1: usize,
    month2: usize,
    month3: usize,
    period_exam: usize,
}

fn resolve_columns(table: &SheetTable) -> Result<ColumnMap, ImportError> {
    let find = |canonical: &str, aliases: &[&str]| -> Option<usize> {
        table.column_index(canonical).or_else(|| {
            aliases
                .iter()
                .find_map(|alias| table.column_index(alias))
        })
    };

    let mut missing: Vec<&str> = Vec::new();
    let mut indexes: Vec<usize> = Vec::new();
    for &(canonical, aliases) in REQUIRED_COLUMNS {
        match find(canonical, aliases) {
            Some(idx) => indexes.push(idx),
            None => missing.push(canonical),
        }
    }
    if !missing.is_empty() {
        return Err(ImportError::new(
            "missing_columns",
            "الملف لا يحتوي على جميع الأعمدة المطلوبة",
        )
        .with_details(json!({
            "missing": missing,
            "available": table.headers,
        })));
    }
    Ok(ColumnMap {
        student_number: indexes[0],
        student_name: indexes[1],
        month1: indexes[2],
        month2: indexes[3],
        month3: indexes[4],
        period_exam: indexes[5],
    })
}

fn cell_identifier(cell: &Cell) -> String {
    match cell {
        Cell::Text(s) => s.trim().to_string(),
        // Student numbers often arrive as numeric cells.
        Cell::Number(v) => {
            if v.fract() == 0.0 {
                format!("{}", *v as i64)
            } else {
                format!("{}", v)
            }
        }
        Cell::Empty => String::new(),
    }
}

// None = not entered; Err = present but not a number.
fn cell_mark(cell: &Cell) -> Result<Option<f64>, ()> {
    match cell {
        Cell::Empty => Ok(None),
        _ => cell.as_number().map(Some).ok_or(()),
    }
}

fn validate_marks(
    months: [Option<f64>; 3],
    exam: Option<f64>,
    dist: &GradeDistribution,
) -> Result<(), String> {
    let checks = [
        (months[0], dist.monthly_grade, MarkKind::Month1),
        (months[1], dist.monthly_grade, MarkKind::Month2),
        (months[2], dist.monthly_grade, MarkKind::Month3),
        (exam, dist.period_exam, MarkKind::PeriodExam),
    ];
    for (value, max, kind) in checks {
        if let Some(v) = value {
            let check = calc::check_mark(v, max, kind);
            if !check.ok {
                return Err(check.error.unwrap_or_else(|| "درجة غير صالحة".to_string()));
            }
        }
    }
    Ok(())
}

/// Bulk grade ingestion. Header problems, unknown enum labels, and an
/// unsupported subject/level pair abort the whole batch; everything after
/// that is per-row, continue-on-error, with 1-based spreadsheet row numbers
/// in every message (the header occupies row 1).
pub fn import_workbook(
    conn: &Connection,
    path: &Path,
    params: &ImportParams,
) -> Result<ImportReport, ImportError> {
    let dist = catalog::distribution_for(&params.subject_name, params.level).ok_or_else(|| {
        ImportError::new("unknown_subject", "المادة غير معتمدة لهذا المستوى الدراسي")
            .with_details(json!({
                "subject": params.subject_name,
                "studyLevel": params.level.label(),
            }))
    })?;
    let subject_id = db::find_subject_id(conn, &params.subject_name)
        .map_err(|e| ImportError::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| {
            ImportError::new("unknown_subject", "المادة غير موجودة في سجل المواد")
                .with_details(json!({ "subject": params.subject_name }))
        })?;

    let table = workbook::read_first_sheet(path)
        .map_err(|e| ImportError::new("workbook_read_failed", format!("{:#}", e)))?;
    let cols = resolve_columns(&table)?;

    let mut report = ImportReport::default();
    report.summary.total_rows = table.rows.len();

    let mut seen_keys: HashSet<(String, ExamPeriod)> = HashSet::new();

    for i in 0..table.rows.len() {
        // Header row is spreadsheet row 1.
        let row_no = i + 2;
        let number = cell_identifier(&table.value(i, cols.student_number));
        let name = cell_identifier(&table.value(i, cols.student_name));

        if number.is_empty() && name.is_empty() {
            report.summary.invalid_rows += 1;
            report
                .errors
                .push(format!("الصف {}: لا يحتوي على رقم الطالب أو اسمه", row_no));
            continue;
        }

        if !seen_keys.insert((number.clone(), params.period)) {
            report.summary.duplicate_rows += 1;
            report.errors.push(format!(
                "الصف {}: الطالب {} مكرر في هذا الملف لنفس الفترة",
                row_no, number
            ));
            continue;
        }

        let student = match db::find_student_by_number_or_name(conn, &number, &name) {
            Ok(Some(s)) => s,
            Ok(None) => {
                report.summary.invalid_rows += 1;
                report.errors.push(format!(
                    "الصف {}: لم يتم العثور على الطالب (الرقم: {}، الاسم: {})",
                    row_no,
                    if number.is_empty() { "-" } else { &number },
                    if name.is_empty() { "-" } else { &name }
                ));
                continue;
            }
            Err(e) => {
                return Err(ImportError::new("db_query_failed", e.to_string()));
            }
        };

        let restriction = calc::resolve_restrictions(student.level, student.mode, student.is_diploma);
        if !restriction.allows(params.period) {
            report.summary.restricted_students += 1;
            let reason = restriction
                .restrictions
                .first()
                .cloned()
                .unwrap_or_else(|| {
                    format!("لا يمكن رصد درجات {} لهذا الطالب", params.period.label())
                });
            report
                .errors
                .push(format!("الصف {}: الطالب {}: {}", row_no, student.name, reason));
            continue;
        }

        let mut months = [None, None, None];
        let mut bad_cell: Option<&'static str> = None;
        for (slot, col, kind) in [
            (0usize, cols.month1, MarkKind::Month1),
            (1, cols.month2, MarkKind::Month2),
            (2, cols.month3, MarkKind::Month3),
        ] {
            match cell_mark(&table.value(i, col)) {
                Ok(v) => months[slot] = v,
                Err(()) => {
                    bad_cell = Some(kind.label());
                    break;
                }
            }
        }
        let exam = if bad_cell.is_none() {
            match cell_mark(&table.value(i, cols.period_exam)) {
                Ok(v) => v,
                Err(()) => {
                    bad_cell = Some(MarkKind::PeriodExam.label());
                    None
                }
            }
        } else {
            None
        };
        if let Some(label) = bad_cell {
            report.summary.invalid_rows += 1;
            report.errors.push(format!(
                "الصف {}: الطالب {}: {} ليست رقمًا صالحًا",
                row_no, student.name, label
            ));
            continue;
        }

        if let Err(msg) = validate_marks(months, exam, &dist) {
            report.summary.invalid_rows += 1;
            report
                .errors
                .push(format!("الصف {}: الطالب {}: {}", row_no, student.name, msg));
            continue;
        }

        let totals = calc::calculate_totals(months[0], months[1], months[2], exam, &dist);
        let key = db::GradeKey {
            student_id: &student.id,
            subject_id: &subject_id,
            academic_year: &params.academic_year,
            period: params.period,
        };
        let marks = db::GradeMarks {
            month1: months[0],
            month2: months[1],
            month3: months[2],
            work_total: totals.work_total,
            final_exam: exam,
            period_total: totals.period_total,
        };
        match db::upsert_subject_grade(conn, &key, &marks) {
            Ok(overwrote) => {
                report.summary.valid_rows += 1;
                report.saved_count += 1;
                if overwrote {
                    report.warnings.push(format!(
                        "الصف {}: تم استبدال درجات سابقة للطالب {} في {}",
                        row_no,
                        student.name,
                        params.period.label()
                    ));
                }
            }
            Err(e) => {
                report.summary.invalid_rows += 1;
                report
                    .errors
                    .push(format!("الصف {}: تعذر حفظ الدرجات ({})", row_no, e));
            }
        }
    }

    tracing::info!(
        subject = %params.subject_name,
        period = params.period.code(),
        total = report.summary.total_rows,
        saved = report.saved_count,
        invalid = report.summary.invalid_rows,
        duplicates = report.summary.duplicate_rows,
        restricted = report.summary.restricted_students,
        "grade import finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::Sheet;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn params() -> ImportParams {
        ImportParams {
            subject_name: "التفسير".to_string(),
            academic_year: "1446".to_string(),
            level: StudyLevel::FirstYear,
            mode: StudyMode::Regular,
            period: ExamPeriod::First,
        }
    }

    fn grade_sheet(rows: Vec<Vec<Cell>>) -> Sheet {
        let mut all = vec![vec![
            Cell::text("studentNumber"),
            Cell::text("studentName"),
            Cell::text("month1"),
            Cell::text("month2"),
            Cell::text("month3"),
            Cell::text("periodExam"),
        ]];
        all.extend(rows);
        Sheet {
            name: "الدرجات".to_string(),
            rows: all,
        }
    }

    #[test]
    fn missing_columns_abort_before_any_row() {
        let ws = temp_dir("rasidd-import-cols");
        let conn = db::open_db(&ws).expect("open db");
        let path = ws.join("grades.xlsx");
        workbook::write_workbook(
            &path,
            &[Sheet {
                name: "الدرجات".to_string(),
                rows: vec![vec![Cell::text("studentNumber"), Cell::text("month1")]],
            }],
        )
        .expect("write workbook");

        let err = import_workbook(&conn, &path, &params()).expect_err("must fail");
        assert_eq!(err.code, "missing_columns");
        let details = err.details.expect("details");
        let missing = details.get("missing").and_then(|v| v.as_array()).unwrap();
        assert!(missing.iter().any(|m| m == "studentName"));
        assert!(missing.iter().any(|m| m == "periodExam"));
    }

    #[test]
    fn unknown_subject_is_a_batch_error() {
        let ws = temp_dir("rasidd-import-subject");
        let conn = db::open_db(&ws).expect("open db");
        let path = ws.join("grades.xlsx");
        workbook::write_workbook(&path, &[grade_sheet(vec![])]).expect("write workbook");

        let mut p = params();
        p.subject_name = "الكيمياء".to_string();
        let err = import_workbook(&conn, &path, &p).expect_err("must fail");
        assert_eq!(err.code, "unknown_subject");
    }

    #[test]
    fn arabic_header_aliases_resolve() {
        let ws = temp_dir("rasidd-import-alias");
        let conn = db::open_db(&ws).expect("open db");
        db::insert_student(
            &conn,
            "2024001",
            "أحمد بن علي",
            StudyLevel::FirstYear,
            StudyMode::Regular,
            false,
        )
        .expect("insert student");

        let path = ws.join("grades.xlsx");
        workbook::write_workbook(
            &path,
            &[Sheet {
                name: "الدرجات".to_string(),
                rows: vec![
                    vec![
                        Cell::text("رقم الطالب"),
                        Cell::text("اسم الطالب"),
                        Cell::text("الشهر الأول"),
                        Cell::text("الشهر الثاني"),
                        Cell::text("الشهر الثالث"),
                        Cell::text("اختبار الفترة"),
                    ],
                    vec![
                        Cell::text("2024001"),
                        Cell::text("أحمد بن علي"),
                        Cell::Number(10.0),
                        Cell::Number(11.0),
                        Cell::Number(9.0),
                        Cell::Number(15.0),
                    ],
                ],
            }],
        )
        .expect("write workbook");

        let report = import_workbook(&conn, &path, &params()).expect("import");
        assert_eq!(report.saved_count, 1);
        assert_eq!(report.summary.valid_rows, 1);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn mixed_rows_accumulate_per_gate_counters() {
        let ws = temp_dir("rasidd-import-mixed");
        let conn = db::open_db(&ws).expect("open db");
        db::insert_student(
            &conn,
            "2024001",
            "أحمد بن علي",
            StudyLevel::FirstYear,
            StudyMode::Regular,
            false,
        )
        .expect("insert student");
        db::insert_student(
            &conn,
            "2024002",
            "سالم المنتسب",
            StudyLevel::SecondYear,
            StudyMode::Correspondence,
            true,
        )
        .expect("insert restricted student");
        db::insert_student(
            &conn,
            "2024003",
            "عمر بن يوسف",
            StudyLevel::FirstYear,
            StudyMode::Regular,
            false,
        )
        .expect("insert third student");

        let path = ws.join("grades.xlsx");
        workbook::write_workbook(
            &path,
            &[grade_sheet(vec![
                // valid
                vec![
                    Cell::text("2024001"),
                    Cell::text("أحمد بن علي"),
                    Cell::Number(10.0),
                    Cell::Number(11.0),
                    Cell::Number(9.0),
                    Cell::Number(15.0),
                ],
                // out-of-range exam
                vec![
                    Cell::text("2024003"),
                    Cell::text("عمر بن يوسف"),
                    Cell::Number(10.0),
                    Cell::Number(11.0),
                    Cell::Number(9.0),
                    Cell::Number(999.0),
                ],
                // duplicate of the first row's key
                vec![
                    Cell::text("2024001"),
                    Cell::text("أحمد بن علي"),
                    Cell::Number(8.0),
                    Cell::Number(8.0),
                    Cell::Number(8.0),
                    Cell::Number(10.0),
                ],
                // restricted cohort
                vec![
                    Cell::text("2024002"),
                    Cell::text("سالم المنتسب"),
                    Cell::Number(5.0),
                    Cell::Empty,
                    Cell::Empty,
                    Cell::Empty,
                ],
                // unknown student
                vec![
                    Cell::text("2099009"),
                    Cell::text("مجهول"),
                    Cell::Number(5.0),
                    Cell::Empty,
                    Cell::Empty,
                    Cell::Empty,
                ],
            ])],
        )
        .expect("write workbook");

        let report = import_workbook(&conn, &path, &params()).expect("import");
        assert_eq!(report.summary.total_rows, 5);
        assert_eq!(report.saved_count, 1);
        assert_eq!(report.summary.valid_rows, 1);
        assert_eq!(report.summary.invalid_rows, 2);
        assert_eq!(report.summary.duplicate_rows, 1);
        assert_eq!(report.summary.restricted_students, 1);
        assert_eq!(report.errors.len(), 4);
        // The duplicate is data row 3, reported as spreadsheet row 4.
        assert!(report.errors.iter().any(|e| e.starts_with("الصف 4:")));
        assert!(report.errors.iter().any(|e| e.contains("2099009")));

        // The first occurrence of 2024001 won, not the duplicate.
        let student = db::find_student_by_number(&conn, "2024001")
            .expect("query")
            .expect("student");
        let grades =
            db::list_grades_for_student(&conn, &student.id, "1446").expect("list grades");
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[0].final_exam, Some(15.0));
    }

    #[test]
    fn second_run_overwrites_with_a_warning() {
        let ws = temp_dir("rasidd-import-idempotent");
        let conn = db::open_db(&ws).expect("open db");
        let student = db::insert_student(
            &conn,
            "2024001",
            "أحمد بن علي",
            StudyLevel::FirstYear,
            StudyMode::Regular,
            false,
        )
        .expect("insert student");

        let write_run = |exam: f64| {
            let path = ws.join("grades.xlsx");
            workbook::write_workbook(
                &path,
                &[grade_sheet(vec![vec![
                    Cell::text("2024001"),
                    Cell::text("أحمد بن علي"),
                    Cell::Number(10.0),
                    Cell::Number(11.0),
                    Cell::Number(9.0),
                    Cell::Number(exam),
                ]])],
            )
            .expect("write workbook");
            path
        };

        let first = import_workbook(&conn, &write_run(15.0), &params()).expect("first import");
        assert_eq!(first.saved_count, 1);
        assert!(first.warnings.is_empty());

        let second = import_workbook(&conn, &write_run(20.0), &params()).expect("second import");
        assert_eq!(second.saved_count, 1);
        assert!(second.errors.is_empty());
        assert_eq!(second.warnings.len(), 1);

        let grades =
            db::list_grades_for_student(&conn, &student.id, "1446").expect("list grades");
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[0].final_exam, Some(20.0));
        assert_eq!(grades[0].period_total, 30.0);
    }
}
