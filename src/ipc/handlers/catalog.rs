use crate::catalog;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::terms::StudyLevel;
use serde_json::json;

fn handle_catalog_list(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(label) = req.params.get("studyLevel").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studyLevel", None);
    };
    let Some(level) = StudyLevel::from_label(label) else {
        return err(
            &req.id,
            "bad_params",
            "unknown study level",
            Some(json!({ "studyLevel": label })),
        );
    };

    let subjects: Vec<serde_json::Value> = catalog::subject_names()
        .filter_map(|name| {
            catalog::distribution_for(name, level).map(|dist| {
                json!({
                    "name": name,
                    "distribution": dist,
                })
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "studyLevel": level.label(),
            "subjects": subjects,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "catalog.list" => Some(handle_catalog_list(state, req)),
        _ => None,
    }
}
