use std::collections::BTreeMap;

use crate::calc::{self, MarkKind, STATUS_INCOMPLETE};
use crate::catalog;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::terms::ExamPeriod;
use rusqlite::Connection;
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

// Absent and null both mean "not entered"; anything else must be numeric.
fn optional_mark(req: &Request, key: &str) -> Result<Option<f64>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            HandlerErr::new("bad_params", format!("{} must be a number", key))
                .with_details(json!({ "field": key }))
        }),
    }
}

fn parse_period(req: &Request) -> Result<ExamPeriod, HandlerErr> {
    let label = required_str(req, "period")?;
    ExamPeriod::from_label(&label).ok_or_else(|| {
        HandlerErr::new("bad_params", "unknown period").with_details(json!({ "period": label }))
    })
}

fn resolve_student(conn: &Connection, number: &str) -> Result<db::StudentRow, HandlerErr> {
    db::find_student_by_number(conn, number)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| {
            HandlerErr::new("not_found", "student not found")
                .with_details(json!({ "studentNumber": number }))
        })
}

fn handle_grades_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = (|| -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let student_no = required_str(req, "studentNumber")?;
        let subject_name = required_str(req, "subjectName")?;
        let academic_year = required_str(req, "academicYear")?;
        let period = parse_period(req)?;

        let student = resolve_student(conn, &student_no)?;

        let restriction =
            calc::resolve_restrictions(student.level, student.mode, student.is_diploma);
        if !restriction.allows(period) {
            let reason = restriction
                .restrictions
                .first()
                .cloned()
                .unwrap_or_else(|| {
                    format!("لا يمكن رصد درجات {} لهذا الطالب", period.label())
                });
            return Err(HandlerErr::new("restricted", reason).with_details(json!({
                "studentNumber": student.student_no,
                "period": period.label(),
                "availablePeriods": restriction
                    .available_periods
                    .iter()
                    .map(|p| p.label())
                    .collect::<Vec<_>>(),
            })));
        }

        let dist = catalog::distribution_for(&subject_name, student.level).ok_or_else(|| {
            HandlerErr::new("unknown_subject", "المادة غير معتمدة لهذا المستوى الدراسي")
                .with_details(json!({
                    "subject": subject_name,
                    "studyLevel": student.level.label(),
                }))
        })?;
        let subject_id = db::find_subject_id(conn, &subject_name)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
            .ok_or_else(|| {
                HandlerErr::new("unknown_subject", "المادة غير موجودة في سجل المواد")
                    .with_details(json!({ "subject": subject_name }))
            })?;

        let month1 = optional_mark(req, "month1")?;
        let month2 = optional_mark(req, "month2")?;
        let month3 = optional_mark(req, "month3")?;
        let exam = optional_mark(req, "periodExam")?;

        let checks = [
            (month1, dist.monthly_grade, MarkKind::Month1, "month1"),
            (month2, dist.monthly_grade, MarkKind::Month2, "month2"),
            (month3, dist.monthly_grade, MarkKind::Month3, "month3"),
            (exam, dist.period_exam, MarkKind::PeriodExam, "periodExam"),
        ];
        for (value, max, kind, field) in checks {
            if let Some(v) = value {
                let check = calc::check_mark(v, max, kind);
                if !check.ok {
                    return Err(HandlerErr::new(
                        "bad_params",
                        check.error.unwrap_or_else(|| "درجة غير صالحة".to_string()),
                    )
                    .with_details(json!({ "field": field, "value": v })));
                }
            }
        }

        let totals = calc::calculate_totals(month1, month2, month3, exam, &dist);
        let key = db::GradeKey {
            student_id: &student.id,
            subject_id: &subject_id,
            academic_year: &academic_year,
            period,
        };
        let marks = db::GradeMarks {
            month1,
            month2,
            month3,
            work_total: totals.work_total,
            final_exam: exam,
            period_total: totals.period_total,
        };
        let overwrote = db::upsert_subject_grade(conn, &key, &marks)
            .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

        Ok(json!({
            "studentNumber": student.student_no,
            "subjectName": subject_name,
            "period": period.label(),
            "workTotal": totals.work_total,
            "periodTotal": totals.period_total,
            "overwrote": overwrote,
        }))
    })();

    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = (|| -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let student_no = required_str(req, "studentNumber")?;
        let academic_year = required_str(req, "academicYear")?;

        let student = resolve_student(conn, &student_no)?;
        let rows = db::list_grades_for_student(conn, &student.id, &academic_year)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

        let grades: Vec<serde_json::Value> = rows
            .iter()
            .map(|g| {
                json!({
                    "subjectName": g.subject_name,
                    "period": g.period.label(),
                    "month1": g.month1,
                    "month2": g.month2,
                    "month3": g.month3,
                    "workTotal": g.work_total,
                    "finalExam": g.final_exam,
                    "periodTotal": g.period_total,
                    "updatedAt": g.updated_at,
                })
            })
            .collect();

        // Per-subject final results where all three periods are in.
        let mut by_subject: BTreeMap<&str, [Option<&db::GradeRow>; 3]> = BTreeMap::new();
        for g in &rows {
            let slot = match g.period {
                ExamPeriod::First => 0,
                ExamPeriod::Second => 1,
                ExamPeriod::Third => 2,
            };
            by_subject.entry(g.subject_name.as_str()).or_default()[slot] = Some(g);
        }

        let mut final_results: Vec<serde_json::Value> = Vec::new();
        for (subject_name, periods) in &by_subject {
            let complete = match (periods[0], periods[1], periods[2].and_then(|g| g.final_exam)) {
                (Some(p1), Some(p2), Some(third_exam)) => {
                    catalog::distribution_for(subject_name, student.level).map(|dist| {
                        calc::calculate_final_result(
                            p1.period_total,
                            p2.period_total,
                            third_exam,
                            &dist,
                        )
                    })
                }
                _ => None,
            };
            final_results.push(match complete {
                Some(r) => json!({
                    "subjectName": subject_name,
                    "finalTotal": r.final_total,
                    "percentage": r.percentage,
                    "grade": r.grade.label(),
                    "status": r.status(),
                }),
                None => json!({
                    "subjectName": subject_name,
                    "status": STATUS_INCOMPLETE,
                }),
            });
        }

        Ok(json!({
            "studentNumber": student.student_no,
            "studentName": student.name,
            "academicYear": academic_year,
            "grades": grades,
            "finalResults": final_results,
        }))
    })();

    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.save" => Some(handle_grades_save(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        _ => None,
    }
}
