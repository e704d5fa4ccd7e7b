use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde_json::json;

use crate::calc::{
    self, FinalResult, LetterGrade, STATUS_FAIL, STATUS_INCOMPLETE, STATUS_PASS,
};
use crate::catalog;
use crate::db::{self, StudentRow};
use crate::terms::{ExamPeriod, StudyLevel, StudyMode};
use crate::workbook::{self, Cell, Sheet};

#[derive(Debug)]
pub struct ExportError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ExportError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        ExportError {
            code,
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    All,
    Passed,
    Failed,
}

impl ExportMode {
    pub fn code(self) -> &'static str {
        match self {
            ExportMode::All => "all",
            ExportMode::Passed => "passed",
            ExportMode::Failed => "failed",
        }
    }

    pub fn from_code(code: &str) -> Option<ExportMode> {
        match code.trim().to_ascii_lowercase().as_str() {
            "all" => Some(ExportMode::All),
            "passed" => Some(ExportMode::Passed),
            "failed" => Some(ExportMode::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportParams {
    pub academic_year: String,
    pub level: StudyLevel,
    pub mode: StudyMode,
    pub export_mode: ExportMode,
    /// Optional subset; entries match either the row id or the student
    /// number.
    pub student_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub enum SubjectOutcome {
    Complete(FinalResult),
    Incomplete,
}

#[derive(Debug, Clone)]
pub struct OverallSummary {
    pub average: f64,
    pub percentage: f64,
    pub grade: LetterGrade,
    pub completed_subjects: usize,
}

#[derive(Debug, Clone)]
pub struct StudentResults {
    pub student: StudentRow,
    pub subjects: Vec<(&'static str, SubjectOutcome)>,
    pub overall: Option<OverallSummary>,
}

impl StudentResults {
    pub fn status(&self) -> &'static str {
        match &self.overall {
            None => STATUS_INCOMPLETE,
            Some(o) => {
                if o.grade.passed() {
                    STATUS_PASS
                } else {
                    STATUS_FAIL
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportStats {
    pub exported: usize,
    pub passed: usize,
    pub failed: usize,
    pub incomplete: usize,
    pub grade_counts: Vec<(&'static str, usize)>,
}

impl ExportStats {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "exported": self.exported,
            "passed": self.passed,
            "failed": self.failed,
            "incomplete": self.incomplete,
            "gradeCounts": self
                .grade_counts
                .iter()
                .map(|(label, count)| json!({ "grade": label, "count": count }))
                .collect::<Vec<_>>(),
        })
    }
}

const LETTERS: [LetterGrade; 6] = [
    LetterGrade::Excellent,
    LetterGrade::VeryGood,
    LetterGrade::Good,
    LetterGrade::Acceptable,
    LetterGrade::Weak,
    LetterGrade::Fail,
];

/// A subject is complete when both early period totals exist and a
/// third-period exam was recorded; the cumulative rule then applies.
fn subject_outcome(
    grades: &HashMap<(String, ExamPeriod), db::GradeRow>,
    subject: &str,
    level: StudyLevel,
) -> SubjectOutcome {
    let dist = match catalog::distribution_for(subject, level) {
        Some(d) => d,
        None => return SubjectOutcome::Incomplete,
    };
    let first = grades.get(&(subject.to_string(), ExamPeriod::First));
    let second = grades.get(&(subject.to_string(), ExamPeriod::Second));
    let third_exam = grades
        .get(&(subject.to_string(), ExamPeriod::Third))
        .and_then(|g| g.final_exam);
    match (first, second, third_exam) {
        (Some(p1), Some(p2), Some(exam)) => SubjectOutcome::Complete(
            calc::calculate_final_result(p1.period_total, p2.period_total, exam, &dist),
        ),
        _ => SubjectOutcome::Incomplete,
    }
}

fn overall_summary(subjects: &[(&'static str, SubjectOutcome)]) -> Option<OverallSummary> {
    let totals: Vec<f64> = subjects
        .iter()
        .filter_map(|(_, outcome)| match outcome {
            SubjectOutcome::Complete(r) => Some(r.final_total),
            SubjectOutcome::Incomplete => None,
        })
        .collect();
    if totals.is_empty() {
        return None;
    }
    // The average divides by completed subjects only; a student graded in
    // two subjects averages over those two.
    let average = calc::round_mark(totals.iter().sum::<f64>() / totals.len() as f64);
    let percentage = calc::round_mark(average / 100.0 * 100.0);
    Some(OverallSummary {
        average,
        percentage,
        grade: LetterGrade::from_percentage(percentage),
        completed_subjects: totals.len(),
    })
}

/// Results for every student in scope, all subjects computed regardless of
/// the export-mode filter; filtering happens afterwards so the statistics
/// stay derivable from the same pass.
pub fn compute_results(
    conn: &Connection,
    params: &ExportParams,
) -> Result<Vec<StudentResults>, ExportError> {
    let students = db::list_students(conn, Some(params.level), Some(params.mode))
        .map_err(|e| ExportError::new("db_query_failed", e.to_string()))?;

    let students: Vec<StudentRow> = match &params.student_ids {
        None => students,
        Some(ids) => students
            .into_iter()
            .filter(|s| ids.iter().any(|id| id == &s.id || id == &s.student_no))
            .collect(),
    };

    let mut results = Vec::with_capacity(students.len());
    for student in students {
        let rows = db::list_grades_for_student(conn, &student.id, &params.academic_year)
            .map_err(|e| ExportError::new("db_query_failed", e.to_string()))?;
        let mut by_key: HashMap<(String, ExamPeriod), db::GradeRow> = HashMap::new();
        for row in rows {
            by_key.insert((row.subject_name.clone(), row.period), row);
        }

        let subjects: Vec<(&'static str, SubjectOutcome)> = catalog::subject_names()
            .map(|name| (name, subject_outcome(&by_key, name, student.level)))
            .collect();
        let overall = overall_summary(&subjects);
        results.push(StudentResults {
            student,
            subjects,
            overall,
        });
    }
    Ok(results)
}

pub fn filter_results<'a>(
    results: &'a [StudentResults],
    export_mode: ExportMode,
) -> Vec<&'a StudentResults> {
    results
        .iter()
        .filter(|r| match export_mode {
            ExportMode::All => true,
            ExportMode::Passed => r.status() == STATUS_PASS,
            ExportMode::Failed => r.status() == STATUS_FAIL,
        })
        .collect()
}

pub fn collect_stats(filtered: &[&StudentResults]) -> ExportStats {
    let mut stats = ExportStats {
        exported: filtered.len(),
        ..Default::default()
    };
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for r in filtered {
        match r.status() {
            STATUS_PASS => stats.passed += 1,
            STATUS_FAIL => stats.failed += 1,
            _ => stats.incomplete += 1,
        }
        if let Some(overall) = &r.overall {
            *counts.entry(overall.grade.label()).or_insert(0) += 1;
        }
    }
    stats.grade_counts = LETTERS
        .iter()
        .map(|g| (g.label(), counts.get(g.label()).copied().unwrap_or(0)))
        .collect();
    stats
}

fn results_sheet(filtered: &[&StudentResults]) -> Sheet {
    let mut header = vec![Cell::text("رقم الطالب"), Cell::text("اسم الطالب")];
    for name in catalog::subject_names() {
        header.push(Cell::text(format!("{} - المجموع", name)));
        header.push(Cell::text(format!("{} - التقدير", name)));
        header.push(Cell::text(format!("{} - الحالة", name)));
    }
    header.push(Cell::text("المعدل العام"));
    header.push(Cell::text("النسبة المئوية"));
    header.push(Cell::text("التقدير العام"));
    header.push(Cell::text("المعدل التراكمي"));
    header.push(Cell::text("الحالة"));

    let mut rows = vec![header];
    for r in filtered {
        let mut row = vec![
            Cell::text(r.student.student_no.clone()),
            Cell::text(r.student.name.clone()),
        ];
        for (_, outcome) in &r.subjects {
            match outcome {
                SubjectOutcome::Complete(res) => {
                    row.push(Cell::Number(res.final_total));
                    row.push(Cell::text(res.grade.label()));
                    row.push(Cell::text(res.status()));
                }
                SubjectOutcome::Incomplete => {
                    row.push(Cell::Empty);
                    row.push(Cell::Empty);
                    row.push(Cell::text(STATUS_INCOMPLETE));
                }
            }
        }
        match &r.overall {
            Some(o) => {
                row.push(Cell::Number(o.average));
                row.push(Cell::Number(o.percentage));
                row.push(Cell::text(o.grade.label()));
                row.push(Cell::Number(o.grade.gpa()));
            }
            None => {
                row.push(Cell::Empty);
                row.push(Cell::Empty);
                row.push(Cell::Empty);
                row.push(Cell::Empty);
            }
        }
        row.push(Cell::text(r.status()));
        rows.push(row);
    }

    Sheet {
        name: "النتائج".to_string(),
        rows,
    }
}

fn stats_sheet(stats: &ExportStats) -> Sheet {
    let mut rows = vec![
        vec![Cell::text("البيان"), Cell::text("العدد")],
        vec![Cell::text("عدد الطلاب"), Cell::Number(stats.exported as f64)],
        vec![Cell::text(STATUS_PASS), Cell::Number(stats.passed as f64)],
        vec![Cell::text(STATUS_FAIL), Cell::Number(stats.failed as f64)],
        vec![
            Cell::text(STATUS_INCOMPLETE),
            Cell::Number(stats.incomplete as f64),
        ],
    ];
    for (label, count) in &stats.grade_counts {
        rows.push(vec![
            Cell::text(format!("التقدير: {}", label)),
            Cell::Number(*count as f64),
        ]);
    }
    Sheet {
        name: "الإحصائيات".to_string(),
        rows,
    }
}

pub fn export_file_name(params: &ExportParams) -> String {
    format!(
        "النتائج_النهائية_{}_{}_{}_{}.xlsx",
        params.academic_year,
        params.level.label(),
        params.mode.label(),
        params.export_mode.code()
    )
}

#[derive(Debug)]
pub struct ExportOutput {
    pub path: PathBuf,
    pub file_name: String,
    pub exported_rows: usize,
    pub stats: ExportStats,
}

pub fn export_results(
    conn: &Connection,
    params: &ExportParams,
    out_dir: &Path,
) -> Result<ExportOutput, ExportError> {
    let results = compute_results(conn, params)?;
    let filtered = filter_results(&results, params.export_mode);
    let stats = collect_stats(&filtered);

    let sheets = vec![results_sheet(&filtered), stats_sheet(&stats)];
    let file_name = export_file_name(params);
    let path = out_dir.join(&file_name);
    workbook::write_workbook(&path, &sheets).map_err(|e| ExportError {
        code: "export_failed",
        message: format!("{:#}", e),
        details: Some(json!({ "path": path.to_string_lossy() })),
    })?;

    tracing::info!(
        year = %params.academic_year,
        level = params.level.code(),
        mode = params.mode.code(),
        export_mode = params.export_mode.code(),
        exported = stats.exported,
        "results export finished"
    );

    Ok(ExportOutput {
        path,
        file_name,
        exported_rows: stats.exported,
        stats,
    })
}
