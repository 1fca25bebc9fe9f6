use crate::error::PlannerError;
use crate::ipc::error::err;
use crate::ipc::types::Request;
use crate::planner;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

pub fn planner_err(req: &Request, e: &PlannerError) -> Value {
    let details = match e {
        PlannerError::NotFound { kind, id } => Some(json!({ "kind": kind, "id": id })),
        _ => None,
    };
    err(&req.id, e.code(), e.to_string(), details)
}

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{key} must not be empty"),
            None,
        )),
        None => Err(err(&req.id, "bad_params", format!("missing {key}"), None)),
    }
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => {
            Err(err(&req.id, "bad_params", format!("missing {key}"), None))
        }
        Some(v) => v.as_f64().ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{key} must be a number"),
                None,
            )
        }),
    }
}

/// `Ok(None)` when absent or null; an error when present but not a string array.
pub fn optional_str_list(req: &Request, key: &str) -> Result<Option<Vec<String>>, Value> {
    let Some(raw) = req.params.get(key) else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(arr) = raw.as_array() else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{key} must be an array of strings"),
            None,
        ));
    };
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{key} must be an array of strings"),
                None,
            ));
        };
        out.push(s.to_string());
    }
    Ok(Some(out))
}

/// `Ok(None)` when absent, null, or blank.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{key} must be a string"),
            None,
        )),
    }
}

pub fn optional_limit(
    req: &Request,
    key: &str,
    default: usize,
    max: usize,
) -> Result<usize, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 && n <= max as u64 => Ok(n as usize),
            _ => Err(err(
                &req.id,
                "bad_params",
                format!("{key} must be an integer in 1..={max}"),
                None,
            )),
        },
    }
}

/// Optional timestamp param; absent means "not given".
pub fn optional_instant(req: &Request, key: &str) -> Result<Option<DateTime<Utc>>, Value> {
    match optional_str(req, key)? {
        None => Ok(None),
        Some(s) => planner::parse_instant(&s)
            .map(Some)
            .map_err(|e| planner_err(req, &e)),
    }
}

/// The `now` param lets the dashboard evaluate due dates against its own clock.
pub fn now_param(req: &Request) -> Result<DateTime<Utc>, Value> {
    Ok(optional_instant(req, "now")?.unwrap_or_else(Utc::now))
}
