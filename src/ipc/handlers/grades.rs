use crate::calc;
use crate::gradebook;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::load_credit_policy;
use crate::ipc::handlers::planner::load_tasks;
use crate::ipc::helpers::{now_param, optional_str_list, planner_err, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::legacy;
use crate::model::{AssignmentRecord, GradeCategory};
use crate::store::{GradeStore, SqliteStore};
use crate::planner;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

fn category_json(c: &GradeCategory) -> Value {
    serde_json::to_value(c).unwrap_or_else(|_| json!({ "id": c.id }))
}

fn handle_categories_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = req.params.get("courseId").and_then(|v| v.as_str());
    let store = SqliteStore::new(conn);
    match store.list_grade_categories(course_id) {
        Ok(list) => {
            let categories: Vec<Value> = list.iter().map(category_json).collect();
            ok(&req.id, json!({ "categories": categories }))
        }
        Err(e) => planner_err(req, &e),
    }
}

fn handle_categories_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match SqliteStore::new(conn).get_grade_category(&category_id) {
        Ok(c) => ok(&req.id, json!({ "category": category_json(&c) })),
        Err(e) => planner_err(req, &e),
    }
}

fn handle_categories_create(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let weight = match required_f64(req, "weight") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = calc::validate_weight(weight) {
        return planner_err(req, &e);
    }
    let assignments = match req.params.get("assignments").filter(|v| !v.is_null()) {
        None => Vec::new(),
        Some(Value::Array(list)) => match legacy::parse_assignment_list(list) {
            Ok(v) => v,
            Err(e) => return planner_err(req, &e),
        },
        Some(_) => return err(&req.id, "bad_params", "assignments must be an array", None),
    };

    let category = GradeCategory {
        id: String::new(),
        course_id,
        name,
        weight,
        sort_order: 0,
        assignments,
        updated_at: None,
    };
    match SqliteStore::new(conn).insert_category(&category) {
        Ok(stored) => {
            tracing::info!(
                category_id = %stored.id,
                course_id = %stored.course_id,
                "grade category created"
            );
            ok(&req.id, json!({ "category": category_json(&stored) }))
        }
        Err(e) => planner_err(req, &e),
    }
}

fn handle_categories_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut name: Option<String> = None;
    let mut weight: Option<f64> = None;
    for (k, v) in patch {
        match k.as_str() {
            "name" => match v.as_str().map(str::trim) {
                Some(s) if !s.is_empty() => name = Some(s.to_string()),
                _ => return err(&req.id, "bad_params", "name must be a non-empty string", None),
            },
            "weight" => {
                let Some(w) = v.as_f64() else {
                    return err(&req.id, "bad_params", "weight must be a number", None);
                };
                if let Err(e) = calc::validate_weight(w) {
                    return planner_err(req, &e);
                }
                weight = Some(w);
            }
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown category field: {}", k),
                    None,
                )
            }
        }
    }

    match SqliteStore::new(conn).update_category_meta(&category_id, name.as_deref(), weight) {
        Ok(c) => ok(&req.id, json!({ "category": category_json(&c) })),
        Err(e) => planner_err(req, &e),
    }
}

fn handle_categories_delete(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match SqliteStore::new(conn).delete_category(&category_id) {
        Ok(()) => {
            tracing::info!(category_id = %category_id, "grade category deleted");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => planner_err(req, &e),
    }
}

/// Backend course id to local course id, as returned by `courses.import`.
fn course_id_map(raw: Option<&Value>) -> Result<HashMap<String, String>, String> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(HashMap::new());
    };
    let Some(obj) = raw.as_object() else {
        return Err("courseIdMap must be an object".to_string());
    };
    obj.iter()
        .map(|(k, v)| match v.as_str() {
            Some(local) if !local.trim().is_empty() => Ok((k.clone(), local.to_string())),
            _ => Err(format!("courseIdMap.{} must be a course id string", k)),
        })
        .collect()
}

fn handle_categories_import(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(records) = req.params.get("records").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "records must be an array", None);
    };

    let id_map = match course_id_map(req.params.get("courseIdMap")) {
        Ok(m) => m,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    // Parse and check everything before writing so a bad record imports nothing.
    let mut parsed = Vec::with_capacity(records.len());
    for (i, raw) in records.iter().enumerate() {
        match legacy::parse_backend_category(raw) {
            Ok(mut v) => {
                if let Some(local) = id_map.get(&v.category.course_id) {
                    v.category.course_id = local.clone();
                }
                parsed.push(v)
            }
            Err(e) => {
                return err(
                    &req.id,
                    e.code(),
                    e.to_string(),
                    Some(json!({ "recordIndex": i })),
                )
            }
        }
    }
    let store = SqliteStore::new(conn);
    for (i, p) in parsed.iter().enumerate() {
        match store.course_exists(&p.category.course_id) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    format!("course not found: {}", p.category.course_id),
                    Some(json!({ "recordIndex": i })),
                )
            }
            Err(e) => return planner_err(req, &e),
        }
    }

    let mut categories = Vec::with_capacity(parsed.len());
    let mut warnings = Vec::new();
    for p in parsed {
        categories.push(p.category);
        warnings.extend(p.warnings);
    }
    let category_ids: Vec<String> = match store.insert_categories(&categories) {
        Ok(stored) => stored.into_iter().map(|c| c.id).collect(),
        Err(e) => return planner_err(req, &e),
    };
    tracing::info!(
        imported = category_ids.len(),
        warnings = warnings.len(),
        "grade categories imported"
    );

    ok(
        &req.id,
        json!({
            "imported": category_ids.len(),
            "categoryIds": category_ids,
            "warnings": warnings
        }),
    )
}

fn handle_assignments_add(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let max_points = match required_f64(req, "maxPoints") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = calc::validate_grade(0.0, max_points) {
        return planner_err(req, &e);
    }

    let mut store = SqliteStore::new(conn);
    let mut category = match store.get_grade_category(&category_id) {
        Ok(c) => c,
        Err(e) => return planner_err(req, &e),
    };
    let assignment_id = Uuid::new_v4().to_string();
    category
        .assignments
        .push(AssignmentRecord::new(assignment_id.clone(), name, max_points, None));
    if let Err(e) = store.save_grade_category_assignments(&category_id, &category.assignments) {
        return planner_err(req, &e);
    }
    match store.get_grade_category(&category_id) {
        Ok(c) => ok(
            &req.id,
            json!({ "assignmentId": assignment_id, "category": category_json(&c) }),
        ),
        Err(e) => planner_err(req, &e),
    }
}

fn handle_assignments_set_grade(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let grade = match required_f64(req, "grade") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut store = SqliteStore::new(conn);
    match gradebook::update_assignment_grade(&mut store, &category_id, &assignment_id, grade) {
        Ok(c) => ok(&req.id, json!({ "category": category_json(&c) })),
        Err(e) => planner_err(req, &e),
    }
}

fn handle_course_grade(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match gradebook::course_grade(&SqliteStore::new(conn), &course_id) {
        Ok(g) => ok(&req.id, serde_json::to_value(&g).unwrap_or_else(|_| json!({}))),
        Err(e) => planner_err(req, &e),
    }
}

fn handle_gpa(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let filter = match optional_str_list(req, "courseIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let policy = match load_credit_policy(conn) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match gradebook::gpa(&SqliteStore::new(conn), filter.as_deref(), policy) {
        Ok(report) => ok(
            &req.id,
            serde_json::to_value(&report).unwrap_or_else(|_| json!({})),
        ),
        Err(e) => planner_err(req, &e),
    }
}

fn handle_overview(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let policy = match load_credit_policy(conn) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let now = match now_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let overview = match gradebook::overview(&SqliteStore::new(conn), policy) {
        Ok(o) => o,
        Err(e) => return planner_err(req, &e),
    };
    let tasks = match load_tasks(conn, None) {
        Ok(v) => v,
        Err(e) => return planner_err(req, &e),
    };
    let mut result = serde_json::to_value(&overview).unwrap_or_else(|_| json!({}));
    if let Some(obj) = result.as_object_mut() {
        let summary = serde_json::to_value(planner::summarize(&tasks, now));
        obj.insert("planner".into(), summary.unwrap_or_else(|_| Value::Object(Map::new())));
    }
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "grades.categories.list" => Some(handle_categories_list(state, req)),
        "grades.categories.get" => Some(handle_categories_get(state, req)),
        "grades.categories.create" => Some(handle_categories_create(state, req)),
        "grades.categories.update" => Some(handle_categories_update(state, req)),
        "grades.categories.delete" => Some(handle_categories_delete(state, req)),
        "grades.categories.import" => Some(handle_categories_import(state, req)),
        "grades.assignments.add" => Some(handle_assignments_add(state, req)),
        "grades.assignments.setGrade" => Some(handle_assignments_set_grade(state, req)),
        "grades.courseGrade" => Some(handle_course_grade(state, req)),
        "grades.gpa" => Some(handle_gpa(state, req)),
        "grades.overview" => Some(handle_overview(state, req)),
        _ => None,
    }
}
