use crate::calc::{self, CourseGrade, CreditPolicy, GpaReport};
use crate::error::PlannerError;
use crate::model::{Course, GradeCategory};
use crate::store::GradeStore;
use serde::Serialize;

/// Grades one assignment and persists the category's assignment list.
///
/// The read-modify-write is not atomic across callers; the sidecar's request
/// loop is single-threaded, which serializes updates per category.
pub fn update_assignment_grade<S: GradeStore>(
    store: &mut S,
    category_id: &str,
    assignment_id: &str,
    grade: f64,
) -> Result<GradeCategory, PlannerError> {
    let current = store.get_grade_category(category_id)?;
    let updated = calc::apply_assignment_grade(
        std::slice::from_ref(&current),
        category_id,
        assignment_id,
        grade,
    )?;
    store.save_grade_category_assignments(category_id, &updated.assignments)?;
    tracing::info!(category_id, assignment_id, grade, "assignment graded");
    store.get_grade_category(category_id)
}

pub fn course_grade<S: GradeStore>(
    store: &S,
    course_id: &str,
) -> Result<CourseGrade, PlannerError> {
    let courses = store.list_courses()?;
    if !courses.iter().any(|c| c.id == course_id) {
        return Err(PlannerError::not_found("course", course_id));
    }
    let categories = store.list_grade_categories(Some(course_id))?;
    calc::compute_course_grade(course_id, &categories)
}

pub fn gpa<S: GradeStore>(
    store: &S,
    course_filter: Option<&[String]>,
    policy: CreditPolicy,
) -> Result<GpaReport, PlannerError> {
    let categories = store.list_grade_categories(None)?;
    let courses = store.list_courses()?;
    calc::gpa_report(&categories, course_filter, &courses, policy)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseOverview {
    pub course: Course,
    pub grade: CourseGrade,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub courses: Vec<CourseOverview>,
    pub gpa: f64,
    /// False when no course has graded work or the GPA could not be computed.
    pub has_data: bool,
    pub gpa_band: &'static str,
}

/// Dashboard feed: every course with its grade, plus the overall GPA.
pub fn overview<S: GradeStore>(
    store: &S,
    policy: CreditPolicy,
) -> Result<Overview, PlannerError> {
    let courses = store.list_courses()?;
    let categories = store.list_grade_categories(None)?;

    let mut rows = Vec::with_capacity(courses.len());
    for course in &courses {
        let grade = match calc::compute_course_grade(&course.id, &categories) {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(
                    course_id = %course.id,
                    error = %e,
                    "skipping course with malformed grades"
                );
                continue;
            }
        };
        rows.push(CourseOverview {
            course: course.clone(),
            grade,
        });
    }

    let report = calc::compute_gpa(&categories, None, &courses, policy);
    Ok(Overview {
        courses: rows,
        gpa: report.gpa,
        has_data: report.has_data,
        gpa_band: gpa_band(&report),
    })
}

/// Label for the GPA stat card.
fn gpa_band(report: &GpaReport) -> &'static str {
    if !report.has_data {
        "No Data"
    } else if report.gpa >= 3.5 {
        "Excellent"
    } else if report.gpa >= 3.0 {
        "Good"
    } else {
        "Needs Improvement"
    }
}
