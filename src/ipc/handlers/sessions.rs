use crate::error::PlannerError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_instant, optional_limit, planner_err, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::StudySession;
use crate::planner;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use uuid::Uuid;

const DEFAULT_SUBJECT: &str = "Unknown Subject";
const MAX_SESSION_SECONDS: i64 = 24 * 3600;

fn session_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudySession> {
    Ok(StudySession {
        id: r.get(0)?,
        subject: r.get(1)?,
        duration_seconds: r.get(2)?,
        start_time: r.get(3)?,
        end_time: r.get(4)?,
        created_at: r.get(5)?,
    })
}

fn load_sessions(conn: &Connection) -> Result<Vec<StudySession>, PlannerError> {
    let mut stmt = conn.prepare(
        "SELECT id, subject, duration_seconds, start_time, end_time, created_at
         FROM study_sessions
         ORDER BY end_time DESC, id",
    )?;
    let rows = stmt
        .query_map([], session_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_session(conn: &Connection, id: &str) -> Result<StudySession, PlannerError> {
    conn.query_row(
        "SELECT id, subject, duration_seconds, start_time, end_time, created_at
         FROM study_sessions
         WHERE id = ?",
        [id],
        session_from_row,
    )
    .optional()?
    .ok_or_else(|| PlannerError::not_found("study session", id))
}

fn parse_duration(v: &Value) -> Result<i64, PlannerError> {
    match v.as_i64() {
        Some(n) if (0..=MAX_SESSION_SECONDS).contains(&n) => Ok(n),
        _ => Err(PlannerError::InvalidField(format!(
            "duration must be whole seconds in 0..={MAX_SESSION_SECONDS}"
        ))),
    }
}

fn parse_time(v: &Value, key: &str) -> Result<DateTime<Utc>, PlannerError> {
    let Some(raw) = v.as_str() else {
        return Err(PlannerError::InvalidField(format!(
            "{key} must be a timestamp string"
        )));
    };
    planner::parse_instant(raw)
}

#[derive(Debug, Default)]
struct SessionFields {
    subject: Option<String>,
    duration: Option<i64>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

/// Null values count as absent.
fn read_fields(fields: &Map<String, Value>) -> Result<SessionFields, PlannerError> {
    let mut out = SessionFields::default();
    for (k, v) in fields {
        if v.is_null() {
            continue;
        }
        match k.as_str() {
            "subject" => {
                let s = v
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty() && s.len() <= 120)
                    .ok_or_else(|| {
                        PlannerError::InvalidField("subject must be 1..=120 characters".into())
                    })?;
                out.subject = Some(s.to_string());
            }
            "duration" => out.duration = Some(parse_duration(v)?),
            "startTime" => out.start = Some(parse_time(v, k)?),
            "endTime" => out.end = Some(parse_time(v, k)?),
            _ => {
                return Err(PlannerError::InvalidField(format!(
                    "unknown session field: {k}"
                )))
            }
        }
    }
    Ok(out)
}

fn check_span(session: &StudySession) -> Result<(), PlannerError> {
    if session.start_time > session.end_time {
        return Err(PlannerError::InvalidField(
            "startTime must not be after endTime".into(),
        ));
    }
    Ok(())
}

fn session_json(s: &StudySession) -> Value {
    let mut v = serde_json::to_value(s).unwrap_or_else(|_| json!({ "id": s.id }));
    if let Some(obj) = v.as_object_mut() {
        obj.insert(
            "durationLabel".into(),
            json!(planner::duration_label(s.duration_seconds)),
        );
    }
    v
}

fn handle_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let limit = match optional_limit(req, "limit", usize::MAX, 10_000) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match load_sessions(conn) {
        Ok(list) => {
            let sessions: Vec<Value> = list.iter().take(limit).map(session_json).collect();
            ok(&req.id, json!({ "sessions": sessions }))
        }
        Err(e) => planner_err(req, &e),
    }
}

/// Mirrors the study timer: only the duration is required. The end defaults
/// to now and the start to `end - duration`.
fn handle_create(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(params) = req.params.as_object() else {
        return err(&req.id, "bad_params", "params must be an object", None);
    };
    let fields = match read_fields(params) {
        Ok(f) => f,
        Err(e) => return planner_err(req, &e),
    };
    let Some(duration) = fields.duration else {
        return err(&req.id, "bad_params", "missing duration", None);
    };

    let now = Utc::now();
    let end = fields.end.unwrap_or(now);
    let start = fields
        .start
        .unwrap_or_else(|| end - Duration::seconds(duration));
    let session = StudySession {
        id: Uuid::new_v4().to_string(),
        subject: fields.subject.unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
        duration_seconds: duration,
        start_time: planner::format_instant(start),
        end_time: planner::format_instant(end),
        created_at: planner::format_instant(now),
    };
    if let Err(e) = check_span(&session) {
        return planner_err(req, &e);
    }

    if let Err(e) = conn.execute(
        "INSERT INTO study_sessions(
           id, subject, duration_seconds, start_time, end_time, created_at
         ) VALUES(?, ?, ?, ?, ?, ?)",
        (
            &session.id,
            &session.subject,
            session.duration_seconds,
            &session.start_time,
            &session.end_time,
            &session.created_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "study_sessions" })),
        );
    }
    tracing::info!(
        session_id = %session.id,
        subject = %session.subject,
        seconds = session.duration_seconds,
        "study session recorded"
    );
    ok(&req.id, json!({ "session": session_json(&session) }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let fields = match read_fields(patch) {
        Ok(f) => f,
        Err(e) => return planner_err(req, &e),
    };
    let mut session = match load_session(conn, &session_id) {
        Ok(s) => s,
        Err(e) => return planner_err(req, &e),
    };
    if let Some(subject) = fields.subject {
        session.subject = subject;
    }
    if let Some(duration) = fields.duration {
        session.duration_seconds = duration;
    }
    if let Some(start) = fields.start {
        session.start_time = planner::format_instant(start);
    }
    if let Some(end) = fields.end {
        session.end_time = planner::format_instant(end);
    }
    if let Err(e) = check_span(&session) {
        return planner_err(req, &e);
    }

    if let Err(e) = conn.execute(
        "UPDATE study_sessions
         SET subject = ?, duration_seconds = ?, start_time = ?, end_time = ?
         WHERE id = ?",
        (
            &session.subject,
            session.duration_seconds,
            &session.start_time,
            &session.end_time,
            &session.id,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "session": session_json(&session) }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match conn.execute("DELETE FROM study_sessions WHERE id = ?", [&session_id]) {
        Ok(0) => planner_err(req, &PlannerError::not_found("study session", session_id)),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "study_sessions" })),
        ),
    }
}

fn handle_totals(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let since = match optional_instant(req, "since") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match load_sessions(conn) {
        Ok(list) => ok(
            &req.id,
            serde_json::to_value(planner::study_totals(&list, since))
                .unwrap_or_else(|_| json!({})),
        ),
        Err(e) => planner_err(req, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "sessions.list" => Some(handle_list(state, req)),
        "sessions.create" => Some(handle_create(state, req)),
        "sessions.update" => Some(handle_update(state, req)),
        "sessions.delete" => Some(handle_delete(state, req)),
        "sessions.totals" => Some(handle_totals(state, req)),
        _ => None,
    }
}
