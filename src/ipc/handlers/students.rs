use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::terms::{StudyLevel, StudyMode};
use rusqlite::Connection;
use serde_json::json;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn parse_level(req: &Request, key: &str) -> Result<StudyLevel, serde_json::Value> {
    let label = required_str(req, key)?;
    StudyLevel::from_label(&label).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "unknown study level",
            Some(json!({ "studyLevel": label })),
        )
    })
}

fn parse_mode(req: &Request, key: &str) -> Result<StudyMode, serde_json::Value> {
    let label = required_str(req, key)?;
    StudyMode::from_label(&label).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "unknown study mode",
            Some(json!({ "studyMode": label })),
        )
    })
}

fn student_json(s: &db::StudentRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "studentNumber": s.student_no,
        "name": s.name,
        "studyLevel": s.level.label(),
        "studyMode": s.mode.label(),
        "isDiploma": s.is_diploma,
        "active": s.active,
    })
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_no = match required_str(req, "studentNumber") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let level = match parse_level(req, "studyLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mode = match parse_mode(req, "studyMode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let is_diploma = req
        .params
        .get("isDiploma")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    match db::find_student_by_number(conn, &student_no) {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "conflict",
                "student number already registered",
                Some(json!({ "studentNumber": student_no })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match db::insert_student(conn, &student_no, &name, level, mode, is_diploma) {
        Ok(s) => ok(&req.id, json!({ "student": student_json(&s) })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let level = match req.params.get("studyLevel").and_then(|v| v.as_str()) {
        None => None,
        Some(label) => match StudyLevel::from_label(label) {
            Some(l) => Some(l),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "unknown study level",
                    Some(json!({ "studyLevel": label })),
                )
            }
        },
    };
    let mode = match req.params.get("studyMode").and_then(|v| v.as_str()) {
        None => None,
        Some(label) => match StudyMode::from_label(label) {
            Some(m) => Some(m),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "unknown study mode",
                    Some(json!({ "studyMode": label })),
                )
            }
        },
    };

    match db::list_students(conn, level, mode) {
        Ok(students) => ok(
            &req.id,
            json!({
                "students": students.iter().map(student_json).collect::<Vec<_>>()
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
