//! Adapter for grade category records exported by the hosted dashboard
//! backend. Two field spellings exist in the wild (`course_id_c` vs
//! `courseId`, ...) and assignments may arrive as a JSON-encoded string.
//! Everything is mapped onto [`GradeCategory`] here so the calculation code
//! only ever sees one shape.

use crate::calc;
use crate::error::PlannerError;
use crate::model::{
    AssignmentRecord, Course, GradeCategory, DEFAULT_COURSE_COLOR, MAX_COURSE_CREDITS,
};
use serde_json::{Map, Value};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ImportedCategory {
    pub category: GradeCategory,
    pub warnings: Vec<String>,
}

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// Accepts a bare id (number or string) or a lookup object `{"Id": ..}`.
fn id_value(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Object(o) => o.get("Id").or_else(|| o.get("id")).and_then(id_value),
        _ => None,
    }
}

fn number_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_assignment(raw: &Value, idx: usize) -> Result<AssignmentRecord, PlannerError> {
    let Some(obj) = raw.as_object() else {
        return Err(PlannerError::MalformedData(format!(
            "assignments[{idx}] must be an object"
        )));
    };
    let id = first(obj, &["Id", "id"]).and_then(id_value).unwrap_or_default();
    let name = first(obj, &["name", "title", "Name", "title_c"])
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    let max_points = first(obj, &["maxPoints", "max_points_c"]).and_then(number_value);
    let Some(max_points) = max_points else {
        return Err(PlannerError::MalformedData(format!(
            "assignments[{idx}] is missing maxPoints"
        )));
    };
    let grade = match first(obj, &["grade", "grade_c"]) {
        None => None,
        Some(v) => match number_value(v) {
            Some(g) => Some(g),
            None => {
                return Err(PlannerError::MalformedData(format!(
                    "assignments[{idx}].grade must be a number or null"
                )))
            }
        },
    };
    match grade {
        Some(g) => calc::validate_grade(g, max_points)?,
        None => {
            if !max_points.is_finite() || max_points <= 0.0 {
                return Err(PlannerError::InvalidGrade(format!(
                    "assignments[{idx}].maxPoints must be a positive number"
                )));
            }
        }
    }
    Ok(AssignmentRecord::new(id, name, max_points, grade))
}

/// Assignment ids are scoped to their category and must be unique within it.
pub fn parse_assignment_list(list: &[Value]) -> Result<Vec<AssignmentRecord>, PlannerError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(list.len());
    for (i, v) in list.iter().enumerate() {
        let a = parse_assignment(v, i)?;
        if !a.id.is_empty() && !seen.insert(a.id.clone()) {
            return Err(PlannerError::MalformedData(format!(
                "assignments[{i}] repeats id {}",
                a.id
            )));
        }
        out.push(a);
    }
    Ok(out)
}

/// Maps one backend record onto a canonical category. The returned category
/// has an empty `id` unless the record carried one; the store assigns fresh
/// ids on insert.
pub fn parse_backend_category(raw: &Value) -> Result<ImportedCategory, PlannerError> {
    let Some(obj) = raw.as_object() else {
        return Err(PlannerError::MalformedData("record must be an object".into()));
    };

    let Some(course_id) = first(obj, &["course_id_c", "courseId"]).and_then(id_value) else {
        return Err(PlannerError::MalformedData("record is missing a course id".into()));
    };
    let name = first(obj, &["category_name_c", "categoryName", "Name"])
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Grade Category".to_string());
    let weight = match first(obj, &["weight_c", "weight"]) {
        None => 0.0,
        Some(v) => number_value(v).ok_or_else(|| {
            PlannerError::MalformedData(format!("weight for {name} must be numeric"))
        })?,
    };
    calc::validate_weight(weight)?;

    let mut warnings = Vec::new();
    let assignments = match first(obj, &["assignments_c", "assignments"]) {
        None => Vec::new(),
        Some(Value::Array(list)) => parse_assignment_list(list)?,
        Some(Value::String(encoded)) if encoded.trim().is_empty() => Vec::new(),
        Some(Value::String(encoded)) => match serde_json::from_str::<Vec<Value>>(encoded) {
            Ok(list) => parse_assignment_list(&list)?,
            Err(e) => {
                // Unreadable lists are dropped, not fatal; the caller reports the warning.
                tracing::warn!(
                    course_id = %course_id,
                    category = %name,
                    error = %e,
                    "malformed assignments_c"
                );
                warnings.push(format!(
                    "{name}: assignment list could not be parsed ({e}); imported empty"
                ));
                Vec::new()
            }
        },
        Some(_) => {
            return Err(PlannerError::MalformedData(
                "assignments must be an array or JSON string".into(),
            ))
        }
    };

    Ok(ImportedCategory {
        category: GradeCategory {
            id: String::new(),
            course_id,
            name,
            weight,
            sort_order: 0,
            assignments,
            updated_at: None,
        },
        warnings,
    })
}

#[derive(Debug, Clone)]
pub struct ImportedCourse {
    /// Id the record had in the hosted backend, if any.
    pub backend_id: Option<String>,
    pub course: Course,
    pub warnings: Vec<String>,
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> String {
    first(obj, keys)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Maps one backend `course_c` record onto a [`Course`] with an empty local
/// id. An unusable color falls back to the default with a warning.
pub fn parse_backend_course(raw: &Value) -> Result<ImportedCourse, PlannerError> {
    let Some(obj) = raw.as_object() else {
        return Err(PlannerError::MalformedData("record must be an object".into()));
    };

    let backend_id = first(obj, &["Id", "id"]).and_then(id_value);
    let code = text_field(obj, &["code_c", "code"]);
    let mut name = text_field(obj, &["name_c", "name", "Name"]);
    if name.is_empty() {
        name = code.clone();
    }
    if name.is_empty() {
        return Err(PlannerError::MalformedData(
            "course record has neither a name nor a code".into(),
        ));
    }
    let instructor = text_field(obj, &["instructor_c", "instructor"]);

    let credits = match first(obj, &["credits_c", "credits"]) {
        None => 0,
        Some(v) => match number_value(v) {
            Some(n) if n.fract() == 0.0 && (0.0..=MAX_COURSE_CREDITS as f64).contains(&n) => {
                n as i64
            }
            _ => {
                return Err(PlannerError::InvalidField(format!(
                    "credits for {name} must be an integer in 0..={MAX_COURSE_CREDITS}"
                )))
            }
        },
    };

    let mut warnings = Vec::new();
    let raw_color = text_field(obj, &["color_c", "color"]);
    let color = if raw_color.is_empty() {
        DEFAULT_COURSE_COLOR.to_string()
    } else if is_hex_color(&raw_color) {
        raw_color.to_ascii_uppercase()
    } else {
        tracing::warn!(course = %name, color = %raw_color, "unusable course color");
        warnings.push(format!("{name}: color {raw_color} replaced with default"));
        DEFAULT_COURSE_COLOR.to_string()
    };

    Ok(ImportedCourse {
        backend_id,
        course: Course {
            id: String::new(),
            name,
            code,
            instructor,
            credits,
            color,
        },
        warnings,
    })
}

/// `#RRGGBB`
pub fn is_hex_color(s: &str) -> bool {
    s.len() == 7 && s.starts_with('#') && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}
