use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_plannerd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn plannerd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[test]
fn import_maps_backend_records_and_reports_malformed_lists() {
    let workspace = temp_dir("plannerd-import");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "name": "Statistics", "code": "STAT210", "credits": 3 }),
    );
    let course_id = course["courseId"].as_str().expect("courseId").to_string();

    let records = json!([
        {
            "Id": 1,
            "Name": "Homework",
            "course_id_c": { "Id": course_id, "Name": "Statistics" },
            "category_name_c": "Homework",
            "weight_c": 40,
            "assignments_c": concat!(
                "[{\"Id\":1,\"name\":\"HW1\",\"maxPoints\":10,\"grade\":8},",
                "{\"Id\":2,\"name\":\"HW2\",\"maxPoints\":10,\"grade\":9}]"
            )
        },
        {
            "courseId": course_id,
            "categoryName": "Exam",
            "weight": 60,
            "assignments": [{ "Id": 1, "name": "Midterm", "maxPoints": 100, "grade": 85 }]
        },
        {
            "course_id_c": course_id,
            "category_name_c": "Quizzes",
            "weight_c": 25,
            "assignments_c": "[{\"Id\":1,"
        }
    ]);
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.categories.import",
        json!({ "records": records }),
    );
    assert_eq!(result["imported"], 3);
    let warnings = result["warnings"].as_array().expect("warnings");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].as_str().unwrap_or("").contains("Quizzes"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.categories.list",
        json!({ "courseId": course_id }),
    );
    let categories = listed["categories"].as_array().expect("categories");
    assert_eq!(categories.len(), 3);
    let names: Vec<&str> = categories
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Homework", "Exam", "Quizzes"]);
    assert_eq!(categories[0]["assignments"][1]["id"], "2");
    assert_eq!(categories[2]["assignments"].as_array().map(|a| a.len()), Some(0));

    // Quizzes has no graded work, so the two imported categories decide the grade.
    let grade = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.courseGrade",
        json!({ "courseId": course_id }),
    );
    assert!((grade["percentage"].as_f64().expect("percentage") - 85.0).abs() < 1e-9);
    assert_eq!(grade["letter"], "B");

    let _ = child.kill();
}

#[test]
fn import_with_unknown_course_writes_nothing() {
    let workspace = temp_dir("plannerd-import-unknown");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "name": "Biology", "code": "BIO101" }),
    );
    let course_id = course["courseId"].as_str().expect("courseId").to_string();

    let value = request(
        &mut stdin,
        &mut reader,
        "3",
        "grades.categories.import",
        json!({
            "records": [
                { "courseId": course_id, "categoryName": "Labs", "weight": 20 },
                { "course_id_c": 999, "category_name_c": "Ghost", "weight_c": 20 }
            ]
        }),
    );
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "not_found");
    assert_eq!(value["error"]["details"]["recordIndex"], 1);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "grades.categories.import",
        json!({
            "records": [{
                "courseId": course_id,
                "assignments": [{ "name": "x", "maxPoints": 5, "grade": 6 }]
            }]
        }),
    );
    assert_eq!(code, "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.categories.list",
        json!({}),
    );
    assert_eq!(listed["categories"].as_array().map(|a| a.len()), Some(0));

    let _ = child.kill();
}

#[test]
fn backend_course_ids_are_translated_through_the_import_map() {
    let workspace = temp_dir("plannerd-import-courses");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.import",
        json!({
            "records": [
                {
                    "Id": 12,
                    "Name": "Calculus",
                    "code_c": "MATH221",
                    "instructor_c": "Dr. Reyes",
                    "credits_c": 4,
                    "color_c": "#10b981"
                },
                { "Id": 13, "name_c": "Chemistry", "code_c": "CHEM101", "color_c": "teal" }
            ]
        }),
    );
    assert_eq!(imported["imported"], 2);
    assert_eq!(imported["warnings"].as_array().map(|a| a.len()), Some(1));
    let id_map = imported["courseIdMap"].clone();
    let calculus = id_map["12"].as_str().expect("mapped id").to_string();
    assert_ne!(calculus, "12");

    let listed = request_ok(&mut stdin, &mut reader, "3", "courses.list", json!({}));
    let courses = listed["courses"].as_array().expect("courses");
    let row = courses
        .iter()
        .find(|c| c["id"] == calculus.as_str())
        .expect("calculus row");
    assert_eq!(row["code"], "MATH221");
    assert_eq!(row["credits"], 4);
    assert_eq!(row["color"], "#10B981");

    let records = json!([
        {
            "course_id_c": 12,
            "category_name_c": "Homework",
            "weight_c": 40,
            "assignments_c": concat!(
                "[{\"Id\":1,\"name\":\"HW1\",\"maxPoints\":10,\"grade\":8},",
                "{\"Id\":2,\"name\":\"HW2\",\"maxPoints\":10,\"grade\":9}]"
            )
        },
        {
            "course_id_c": { "Id": 12, "Name": "Calculus" },
            "category_name_c": "Exams",
            "weight_c": 60,
            "assignments": [{ "Id": 1, "name": "Midterm", "maxPoints": 100, "grade": 85 }]
        }
    ]);

    // Without the map the backend id names no local course.
    let value = request(
        &mut stdin,
        &mut reader,
        "4",
        "grades.categories.import",
        json!({ "records": records }),
    );
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "not_found");
    assert_eq!(value["error"]["details"]["recordIndex"], 0);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.categories.import",
        json!({ "records": records, "courseIdMap": id_map }),
    );
    assert_eq!(result["imported"], 2);

    let grade = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.courseGrade",
        json!({ "courseId": calculus }),
    );
    assert!((grade["percentage"].as_f64().expect("percentage") - 85.0).abs() < 1e-9);
    assert_eq!(grade["letter"], "B");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "grades.categories.import",
        json!({ "records": [], "courseIdMap": { "12": 7 } }),
    );
    assert_eq!(code, "bad_params");

    let _ = child.kill();
}

#[test]
fn rejected_course_import_writes_nothing() {
    let workspace = temp_dir("plannerd-import-courses-bad");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let value = request(
        &mut stdin,
        &mut reader,
        "2",
        "courses.import",
        json!({
            "records": [
                { "Id": 1, "Name": "Biology" },
                { "Id": 2, "Name": "Physics", "credits_c": 40 }
            ]
        }),
    );
    assert_eq!(value["error"]["code"], "bad_params");
    assert_eq!(value["error"]["details"]["recordIndex"], 1);

    let value = request(
        &mut stdin,
        &mut reader,
        "3",
        "courses.import",
        json!({ "records": [{ "Id": 5, "Name": "Biology" }, { "Id": 5, "Name": "Botany" }] }),
    );
    assert_eq!(value["error"]["code"], "malformed_data");

    let listed = request_ok(&mut stdin, &mut reader, "4", "courses.list", json!({}));
    assert_eq!(listed["courses"].as_array().map(|a| a.len()), Some(0));

    let _ = child.kill();
}
