use crate::calc::{CreditPolicy, DEFAULT_FIXED_CREDITS};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

const GPA_KEY: &str = "setup.gpa";

fn default_gpa_section() -> Value {
    json!({
        "creditsMode": "fixed",
        "fixedCredits": DEFAULT_FIXED_CREDITS
    })
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_gpa_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "creditsMode" => {
                let s = v
                    .as_str()
                    .ok_or_else(|| "creditsMode must be string".to_string())?
                    .trim()
                    .to_ascii_lowercase();
                if s != "fixed" && s != "course" {
                    return Err("creditsMode must be one of: fixed, course".into());
                }
                obj.insert(k.clone(), Value::String(s));
            }
            "fixedCredits" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 12)?));
            }
            _ => return Err(format!("unknown gpa field: {}", k)),
        }
    }
    Ok(())
}

fn load_gpa_section(conn: &rusqlite::Connection) -> anyhow::Result<Value> {
    let mut current = default_gpa_section();
    if let Some(saved) = db::settings_get_json(conn, GPA_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // A bad stored value falls back to defaults rather than blocking grade views.
            if let Err(msg) = merge_gpa_patch(&mut current, saved_obj) {
                tracing::warn!(error = %msg, "ignoring stored gpa settings");
                current = default_gpa_section();
            }
        }
    }
    Ok(current)
}

fn policy_from_section(section: &Value) -> CreditPolicy {
    match section.get("creditsMode").and_then(|v| v.as_str()) {
        Some("course") => CreditPolicy::CourseRecord,
        _ => {
            let n = section
                .get("fixedCredits")
                .and_then(|v| v.as_u64())
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(DEFAULT_FIXED_CREDITS);
            CreditPolicy::Fixed(n)
        }
    }
}

pub fn load_credit_policy(conn: &rusqlite::Connection) -> anyhow::Result<CreditPolicy> {
    Ok(policy_from_section(&load_gpa_section(conn)?))
}

fn handle_gpa_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match load_gpa_section(conn) {
        Ok(v) => ok(&req.id, json!({ "gpa": v })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_gpa_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_gpa_section(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_gpa_patch(&mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, GPA_KEY, &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(settings = %current, "gpa settings updated");
    ok(&req.id, json!({ "gpa": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.gpa.get" => Some(handle_gpa_get(state, req)),
        "setup.gpa.update" => Some(handle_gpa_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_three_fixed_credits() {
        assert_eq!(
            policy_from_section(&default_gpa_section()),
            CreditPolicy::Fixed(3)
        );
    }

    #[test]
    fn patch_validation() {
        let mut current = default_gpa_section();
        let patch = json!({ "creditsMode": "Course" });
        merge_gpa_patch(&mut current, patch.as_object().expect("obj")).expect("merge");
        assert_eq!(policy_from_section(&current), CreditPolicy::CourseRecord);

        let bad = json!({ "fixedCredits": 0 });
        assert!(merge_gpa_patch(&mut current, bad.as_object().expect("obj")).is_err());
        let bad = json!({ "roundTo": 2 });
        assert!(merge_gpa_patch(&mut current, bad.as_object().expect("obj")).is_err());
    }

    #[test]
    fn stored_settings_drive_policy() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("init");
        assert_eq!(load_credit_policy(&conn).expect("load"), CreditPolicy::Fixed(3));
        db::settings_set_json(&conn, GPA_KEY, &json!({ "fixedCredits": 4 })).expect("set");
        assert_eq!(load_credit_policy(&conn).expect("load"), CreditPolicy::Fixed(4));
        db::settings_set_json(&conn, GPA_KEY, &json!({ "creditsMode": "bogus" })).expect("set");
        assert_eq!(load_credit_policy(&conn).expect("load"), CreditPolicy::Fixed(3));
    }
}
