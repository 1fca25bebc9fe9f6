use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use crate::legacy;
use crate::model::{DEFAULT_COURSE_COLOR, MAX_COURSE_CREDITS};
use rusqlite::OptionalExtension;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

fn parse_credits(v: &Value) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| "credits must be an integer".to_string())?;
    if !(0..=MAX_COURSE_CREDITS).contains(&n) {
        return Err(format!("credits must be in 0..={}", MAX_COURSE_CREDITS));
    }
    Ok(n)
}

fn parse_text(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_color(v: &Value) -> Result<String, String> {
    let s = parse_text(v, "color", 7)?;
    if !legacy::is_hex_color(&s) {
        return Err("color must look like #RRGGBB".into());
    }
    Ok(s.to_ascii_uppercase())
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.code,
           c.instructor,
           c.credits,
           c.color,
           (SELECT COUNT(*) FROM grade_categories g WHERE g.course_id = c.id) AS category_count
         FROM courses c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let code: String = row.get(2)?;
            let instructor: String = row.get(3)?;
            let credits: i64 = row.get(4)?;
            let color: String = row.get(5)?;
            let category_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "name": name,
                "code": code,
                "instructor": instructor,
                "credits": credits,
                "color": color,
                "categoryCount": category_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let instructor = match req.params.get("instructor").filter(|v| !v.is_null()) {
        None => String::new(),
        Some(v) => match parse_text(v, "instructor", 120) {
            Ok(s) => s,
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
    };
    let credits = match req.params.get("credits").filter(|v| !v.is_null()) {
        None => 0,
        Some(v) => match parse_credits(v) {
            Ok(n) => n,
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
    };
    let color = match req.params.get("color").filter(|v| !v.is_null()) {
        None => DEFAULT_COURSE_COLOR.to_string(),
        Some(v) => match parse_color(v) {
            Ok(s) => s,
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
    };

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, name, code, instructor, credits, color) VALUES(?, ?, ?, ?, ?, ?)",
        (&course_id, &name, &code, &instructor, credits, &color),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }
    tracing::info!(course_id = %course_id, code = %code, "course created");

    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "name": name,
            "code": code,
            "instructor": instructor,
            "credits": credits,
            "color": color
        }),
    )
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let current: Option<(String, String, String, i64, String)> = match conn
        .query_row(
            "SELECT name, code, instructor, credits, color FROM courses WHERE id = ?",
            [&course_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((mut name, mut code, mut instructor, mut credits, mut color)) = current else {
        return err(&req.id, "not_found", "course not found", None);
    };

    for (k, v) in patch {
        let applied = match k.as_str() {
            "name" => parse_text(v, k, 120).and_then(|s| {
                if s.is_empty() {
                    Err("name must not be empty".to_string())
                } else {
                    name = s;
                    Ok(())
                }
            }),
            "code" => parse_text(v, k, 32).and_then(|s| {
                if s.is_empty() {
                    Err("code must not be empty".to_string())
                } else {
                    code = s;
                    Ok(())
                }
            }),
            "instructor" => parse_text(v, k, 120).map(|s| instructor = s),
            "credits" => parse_credits(v).map(|n| credits = n),
            "color" => parse_color(v).map(|s| color = s),
            _ => Err(format!("unknown course field: {}", k)),
        };
        if let Err(msg) = applied {
            return err(&req.id, "bad_params", msg, None);
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE courses
         SET name = ?, code = ?, instructor = ?, credits = ?, color = ?
         WHERE id = ?",
        (&name, &code, &instructor, credits, &color, &course_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "name": name,
            "code": code,
            "instructor": instructor,
            "credits": credits,
            "color": color
        }),
    )
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Dependency order; there is no ON DELETE CASCADE.
    if let Err(e) = tx.execute(
        "DELETE FROM assignments
         WHERE category_id IN (SELECT id FROM grade_categories WHERE course_id = ?)",
        [&course_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM planner_tasks WHERE course_id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "planner_tasks" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM grade_categories WHERE course_id = ?",
        [&course_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grade_categories" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM courses WHERE id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    tracing::info!(course_id = %course_id, "course deleted");

    ok(&req.id, json!({ "ok": true }))
}

/// Imports hosted-backend course records under fresh local ids. The reply maps
/// each backend id to its local id so category imports can be translated.
fn handle_courses_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(records) = req.params.get("records").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "records must be an array", None);
    };

    let mut parsed = Vec::with_capacity(records.len());
    let mut seen = HashSet::new();
    for (i, raw) in records.iter().enumerate() {
        let imported = match legacy::parse_backend_course(raw) {
            Ok(v) => v,
            Err(e) => {
                return err(
                    &req.id,
                    e.code(),
                    e.to_string(),
                    Some(json!({ "recordIndex": i })),
                )
            }
        };
        if let Some(backend_id) = &imported.backend_id {
            if !seen.insert(backend_id.clone()) {
                return err(
                    &req.id,
                    "malformed_data",
                    format!("backend course id {} appears twice", backend_id),
                    Some(json!({ "recordIndex": i })),
                );
            }
        }
        parsed.push(imported);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let mut course_ids = Vec::with_capacity(parsed.len());
    let mut id_map = Map::new();
    let mut warnings = Vec::new();
    for p in parsed {
        let course_id = Uuid::new_v4().to_string();
        let c = &p.course;
        if let Err(e) = tx.execute(
            "INSERT INTO courses(id, name, code, instructor, credits, color)
             VALUES(?, ?, ?, ?, ?, ?)",
            (&course_id, &c.name, &c.code, &c.instructor, c.credits, &c.color),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "courses" })),
            );
        }
        if let Some(backend_id) = p.backend_id {
            id_map.insert(backend_id, json!(course_id));
        }
        course_ids.push(course_id);
        warnings.extend(p.warnings);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    tracing::info!(imported = course_ids.len(), "courses imported");

    ok(
        &req.id,
        json!({
            "imported": course_ids.len(),
            "courseIds": course_ids,
            "courseIdMap": id_map,
            "warnings": warnings
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        "courses.import" => Some(handle_courses_import(state, req)),
        _ => None,
    }
}
