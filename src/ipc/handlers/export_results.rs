use std::path::PathBuf;

use crate::export::{self, ExportMode, ExportParams};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::terms::{StudyLevel, StudyMode};
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn parse_params(req: &Request) -> Result<(ExportParams, PathBuf), serde_json::Value> {
    let academic_year = required_str(req, "academicYear")?;
    let out_dir = PathBuf::from(required_str(req, "outDir")?);

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

    let export_mode = match req.params.get("exportMode").and_then(|v| v.as_str()) {
        None => ExportMode::All,
        Some(code) => match ExportMode::from_code(code) {
            Some(m) => m,
            None => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "exportMode must be one of: all, passed, failed",
                    Some(json!({ "exportMode": code })),
                ))
            }
        },
    };

    // Comma-separated ids or numbers, matching the upload form field.
    let student_ids = req
        .params
        .get("studentIds")
        .and_then(|v| v.as_str())
        .map(|s| {
            s.split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|ids| !ids.is_empty());

    Ok((
        ExportParams {
            academic_year,
            level,
            mode,
            export_mode,
            student_ids,
        },
        out_dir,
    ))
}

fn handle_export_workbook(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (params, out_dir) = match parse_params(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match export::export_results(conn, &params, &out_dir) {
        Ok(out) => ok(
            &req.id,
            json!({
                "path": out.path.to_string_lossy(),
                "fileName": out.file_name,
                "exportedRows": out.exported_rows,
                "stats": out.stats.to_json(),
            }),
        ),
        Err(e) => err(&req.id, e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.exportWorkbook" => Some(handle_export_workbook(state, req)),
        _ => None,
    }
}
