use std::path::PathBuf;

use crate::import::{self, ImportParams};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::terms::{ExamPeriod, StudyLevel, StudyMode};
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn parse_params(req: &Request) -> Result<(PathBuf, ImportParams), serde_json::Value> {
    let path = PathBuf::from(required_str(req, "path")?);
    let subject_name = required_str(req, "subjectName")?;
    let academic_year = required_str(req, "academicYear")?;

    let level_label = required_str(req, "studyLevel")?;
    let level = StudyLevel::from_label(&level_label).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "unknown study level",
            Some(json!({ "studyLevel": level_label })),
        )
    })?;

    let mode_label = required_str(req, "studyMode")?;
    let mode = StudyMode::from_label(&mode_label).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "unknown study mode",
            Some(json!({ "studyMode": mode_label })),
        )
    })?;

    let period_label = required_str(req, "period")?;
    let period = ExamPeriod::from_label(&period_label).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "unknown period",
            Some(json!({ "period": period_label })),
        )
    })?;

    Ok((
        path,
        ImportParams {
            subject_name,
            academic_year,
            level,
            mode,
            period,
        },
    ))
}

fn handle_import_workbook(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (path, params) = match parse_params(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match import::import_workbook(conn, &path, &params) {
        Ok(report) => {
            let message = format!(
                "تم حفظ درجات {} من أصل {} صفًا",
                report.saved_count, report.summary.total_rows
            );
            ok(
                &req.id,
                json!({
                    "success": true,
                    "message": message,
                    "savedCount": report.saved_count,
                    "totalCount": report.summary.total_rows,
                    "errors": report.errors,
                    "warnings": report.warnings,
                    "importSummary": report.summary,
                }),
            )
        }
        Err(e) => err(&req.id, e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.importWorkbook" => Some(handle_import_workbook(state, req)),
        _ => None,
    }
}
