use crate::error::PlannerError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    now_param, optional_instant, optional_limit, optional_str, planner_err, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{PlannerTask, Priority, TASK_KINDS};
use crate::planner::{self, TaskFilter, TaskSort, DEFAULT_UPCOMING_LIMIT};
use crate::store::SqliteStore;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use uuid::Uuid;

const TASK_COLUMNS: &str =
    "id, course_id, title, description, due_at, priority, kind, submission_format, completed";

fn task_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<PlannerTask> {
    let priority: String = r.get(5)?;
    Ok(PlannerTask {
        id: r.get(0)?,
        course_id: r.get(1)?,
        title: r.get(2)?,
        description: r.get(3)?,
        due_at: r.get(4)?,
        priority: Priority::parse(&priority).unwrap_or(Priority::Medium),
        kind: r.get(6)?,
        submission_format: r.get(7)?,
        completed: r.get(8)?,
    })
}

/// Tasks ordered by due date, optionally for one course.
pub fn load_tasks(
    conn: &Connection,
    course_id: Option<&str>,
) -> Result<Vec<PlannerTask>, PlannerError> {
    let tasks = match course_id {
        Some(cid) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM planner_tasks WHERE course_id = ? ORDER BY due_at, id"
            ))?;
            let rows = stmt
                .query_map([cid], task_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM planner_tasks ORDER BY due_at, id"
            ))?;
            let rows = stmt
                .query_map([], task_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(tasks)
}

fn load_task(conn: &Connection, id: &str) -> Result<PlannerTask, PlannerError> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM planner_tasks WHERE id = ?"),
        [id],
        task_from_row,
    )
    .optional()?
    .ok_or_else(|| PlannerError::not_found("planner task", id))
}

fn text(v: &Value, key: &str, max_len: usize) -> Result<String, PlannerError> {
    let s = v
        .as_str()
        .ok_or_else(|| PlannerError::InvalidField(format!("{key} must be a string")))?
        .trim();
    if s.len() > max_len {
        return Err(PlannerError::InvalidField(format!(
            "{key} length must be <= {max_len}"
        )));
    }
    Ok(s.to_string())
}

fn non_empty_text(v: &Value, key: &str, max_len: usize) -> Result<String, PlannerError> {
    let s = text(v, key, max_len)?;
    if s.is_empty() {
        return Err(PlannerError::InvalidField(format!("{key} must not be empty")));
    }
    Ok(s)
}

/// Applies request fields onto a task. Null values leave a field unchanged.
/// A changed `courseId` is not checked here.
fn apply_task_fields(
    task: &mut PlannerTask,
    fields: &Map<String, Value>,
) -> Result<(), PlannerError> {
    for (k, v) in fields {
        if v.is_null() {
            continue;
        }
        match k.as_str() {
            "courseId" => task.course_id = non_empty_text(v, k, 64)?,
            "title" => task.title = non_empty_text(v, k, 200)?,
            "description" => task.description = text(v, k, 4000)?,
            "dueDate" => {
                let raw = text(v, k, 64)?;
                task.due_at = planner::format_instant(planner::parse_instant(&raw)?);
            }
            "priority" => {
                let raw = text(v, k, 16)?;
                task.priority = Priority::parse(&raw).ok_or_else(|| {
                    PlannerError::InvalidField(format!("unknown priority: {raw}"))
                })?;
            }
            "type" => {
                let raw = text(v, k, 32)?.to_ascii_lowercase();
                if !TASK_KINDS.contains(&raw.as_str()) {
                    return Err(PlannerError::InvalidField(format!("unknown type: {raw}")));
                }
                task.kind = raw;
            }
            "submissionFormat" => task.submission_format = text(v, k, 120)?,
            "completed" => {
                task.completed = v.as_bool().ok_or_else(|| {
                    PlannerError::InvalidField("completed must be a boolean".into())
                })?
            }
            _ => return Err(PlannerError::InvalidField(format!("unknown task field: {k}"))),
        }
    }
    Ok(())
}

fn ensure_course(conn: &Connection, course_id: &str) -> Result<(), PlannerError> {
    if SqliteStore::new(conn).course_exists(course_id)? {
        Ok(())
    } else {
        Err(PlannerError::not_found("course", course_id))
    }
}

fn task_json(task: &PlannerTask) -> Value {
    serde_json::to_value(task).unwrap_or_else(|_| json!({ "id": task.id }))
}

fn handle_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match optional_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = match optional_str(req, "filter") {
        Ok(None) => TaskFilter::All,
        Ok(Some(raw)) => match TaskFilter::parse(&raw) {
            Some(f) => f,
            None => return err(&req.id, "bad_params", format!("unknown filter: {raw}"), None),
        },
        Err(resp) => return resp,
    };
    let sort = match optional_str(req, "sort") {
        Ok(None) => TaskSort::DueDate,
        Ok(Some(raw)) => match TaskSort::parse(&raw) {
            Some(s) => s,
            None => return err(&req.id, "bad_params", format!("unknown sort: {raw}"), None),
        },
        Err(resp) => return resp,
    };
    let from = match optional_instant(req, "from") {
        Ok(v) => v.map(planner::format_instant),
        Err(resp) => return resp,
    };
    let to = match optional_str(req, "to") {
        Ok(None) => None,
        Ok(Some(raw)) => match planner::parse_range_end(&raw) {
            Ok(end) => Some(planner::format_instant(end)),
            Err(e) => return planner_err(req, &e),
        },
        Err(resp) => return resp,
    };
    let now = match now_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut tasks = match load_tasks(conn, course_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return planner_err(req, &e),
    };
    // Calendar range, inclusive on both ends.
    tasks.retain(|t| {
        from.as_deref().map_or(true, |f| t.due_at.as_str() >= f)
            && to.as_deref().map_or(true, |x| t.due_at.as_str() <= x)
    });
    let views = planner::select_tasks(tasks, filter, sort, now);
    ok(
        &req.id,
        json!({ "tasks": serde_json::to_value(&views).unwrap_or_else(|_| json!([])) }),
    )
}

fn handle_upcoming(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let limit = match optional_limit(req, "limit", DEFAULT_UPCOMING_LIMIT, 100) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let now = match now_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match load_tasks(conn, None) {
        Ok(tasks) => {
            let next = planner::upcoming(&tasks, now, limit);
            ok(
                &req.id,
                json!({ "tasks": serde_json::to_value(&next).unwrap_or_else(|_| json!([])) }),
            )
        }
        Err(e) => planner_err(req, &e),
    }
}

fn handle_overdue(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let now = match now_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match load_tasks(conn, None) {
        Ok(tasks) => {
            let late: Vec<Value> = planner::overdue(&tasks, now).iter().map(task_json).collect();
            ok(&req.id, json!({ "tasks": late }))
        }
        Err(e) => planner_err(req, &e),
    }
}

fn handle_summary(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let now = match now_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match load_tasks(conn, None) {
        Ok(tasks) => ok(
            &req.id,
            serde_json::to_value(planner::summarize(&tasks, now)).unwrap_or_else(|_| json!({})),
        ),
        Err(e) => planner_err(req, &e),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(fields) = req.params.as_object() else {
        return err(&req.id, "bad_params", "params must be an object", None);
    };

    let mut task = PlannerTask {
        id: Uuid::new_v4().to_string(),
        course_id,
        title,
        description: String::new(),
        due_at: planner::format_instant(Utc::now()),
        priority: Priority::Medium,
        kind: "assignment".to_string(),
        submission_format: String::new(),
        completed: false,
    };
    if let Err(e) = apply_task_fields(&mut task, fields) {
        return planner_err(req, &e);
    }
    if let Err(e) = ensure_course(conn, &task.course_id) {
        return planner_err(req, &e);
    }

    if let Err(e) = conn.execute(
        "INSERT INTO planner_tasks(
           id, course_id, title, description, due_at, priority, kind, submission_format, completed
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &task.id,
            &task.course_id,
            &task.title,
            &task.description,
            &task.due_at,
            task.priority.as_str(),
            &task.kind,
            &task.submission_format,
            task.completed,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "planner_tasks" })),
        );
    }
    tracing::info!(task_id = %task.id, course_id = %task.course_id, "planner task created");
    ok(&req.id, json!({ "task": task_json(&task) }))
}

fn save_task(conn: &Connection, task: &PlannerTask) -> Result<(), PlannerError> {
    conn.execute(
        "UPDATE planner_tasks
         SET course_id = ?, title = ?, description = ?, due_at = ?, priority = ?,
             kind = ?, submission_format = ?, completed = ?
         WHERE id = ?",
        (
            &task.course_id,
            &task.title,
            &task.description,
            &task.due_at,
            task.priority.as_str(),
            &task.kind,
            &task.submission_format,
            task.completed,
            &task.id,
        ),
    )?;
    Ok(())
}

fn handle_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let task_id = match required_str(req, "taskId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut task = match load_task(conn, &task_id) {
        Ok(t) => t,
        Err(e) => return planner_err(req, &e),
    };
    let previous_course = task.course_id.clone();
    if let Err(e) = apply_task_fields(&mut task, patch) {
        return planner_err(req, &e);
    }
    if task.course_id != previous_course {
        if let Err(e) = ensure_course(conn, &task.course_id) {
            return planner_err(req, &e);
        }
    }
    match save_task(conn, &task) {
        Ok(()) => ok(&req.id, json!({ "task": task_json(&task) })),
        Err(e) => planner_err(req, &e),
    }
}

fn handle_complete(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let task_id = match required_str(req, "taskId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mut task = match load_task(conn, &task_id) {
        Ok(t) => t,
        Err(e) => return planner_err(req, &e),
    };
    task.completed = true;
    match save_task(conn, &task) {
        Ok(()) => {
            tracing::info!(task_id = %task.id, "planner task completed");
            ok(&req.id, json!({ "task": task_json(&task) }))
        }
        Err(e) => planner_err(req, &e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let task_id = match required_str(req, "taskId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match conn.execute("DELETE FROM planner_tasks WHERE id = ?", [&task_id]) {
        Ok(0) => planner_err(req, &PlannerError::not_found("planner task", task_id)),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "planner_tasks" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "planner.list" => Some(handle_list(state, req)),
        "planner.upcoming" => Some(handle_upcoming(state, req)),
        "planner.overdue" => Some(handle_overdue(state, req)),
        "planner.summary" => Some(handle_summary(state, req)),
        "planner.create" => Some(handle_create(state, req)),
        "planner.update" => Some(handle_update(state, req)),
        "planner.complete" => Some(handle_complete(state, req)),
        "planner.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
