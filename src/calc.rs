use crate::error::PlannerError;
use crate::model::{Course, GradeCategory};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Percentage floors for letter grades, highest first. Anything below the last
/// floor is an F.
const LETTER_THRESHOLDS: [(f64, &str); 11] = [
    (97.0, "A+"),
    (93.0, "A"),
    (90.0, "A-"),
    (87.0, "B+"),
    (83.0, "B"),
    (80.0, "B-"),
    (77.0, "C+"),
    (73.0, "C"),
    (70.0, "C-"),
    (67.0, "D+"),
    (65.0, "D"),
];

/// Percentage floors for honor points on the 4.0 scale.
const GRADE_POINT_THRESHOLDS: [(f64, f64); 11] = [
    (97.0, 4.0),
    (93.0, 3.7),
    (90.0, 3.3),
    (87.0, 3.0),
    (83.0, 2.7),
    (80.0, 2.3),
    (77.0, 2.0),
    (73.0, 1.7),
    (70.0, 1.3),
    (67.0, 1.0),
    (65.0, 0.7),
];

pub const DEFAULT_FIXED_CREDITS: u32 = 3;

/// Category weights are percentages.
pub const MAX_CATEGORY_WEIGHT: f64 = 100.0;

/// 1-decimal rounding for display: `Int(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn letter_grade(percentage: f64) -> &'static str {
    LETTER_THRESHOLDS
        .iter()
        .find(|(floor, _)| percentage >= *floor)
        .map(|(_, letter)| *letter)
        .unwrap_or("F")
}

pub fn percentage_to_grade_points(percentage: f64) -> f64 {
    GRADE_POINT_THRESHOLDS
        .iter()
        .find(|(floor, _)| percentage >= *floor)
        .map(|(_, points)| *points)
        .unwrap_or(0.0)
}

/// Rejects grades that would push a category average outside `[0, 1]`.
pub fn validate_grade(grade: f64, max_points: f64) -> Result<(), PlannerError> {
    if !max_points.is_finite() || max_points <= 0.0 {
        return Err(PlannerError::InvalidGrade(format!(
            "maxPoints must be a positive number (got {max_points})"
        )));
    }
    if !grade.is_finite() {
        return Err(PlannerError::InvalidGrade("grade must be a finite number".into()));
    }
    if grade < 0.0 || grade > max_points {
        return Err(PlannerError::InvalidGrade(format!(
            "grade must be in 0..={max_points} (got {grade})"
        )));
    }
    Ok(())
}

pub fn validate_weight(weight: f64) -> Result<(), PlannerError> {
    if !(0.0..=MAX_CATEGORY_WEIGHT).contains(&weight) {
        return Err(PlannerError::InvalidGrade(format!(
            "weight must be in 0..={MAX_CATEGORY_WEIGHT} (got {weight})"
        )));
    }
    Ok(())
}

fn check_category(category: &GradeCategory) -> Result<(), PlannerError> {
    if !(0.0..=MAX_CATEGORY_WEIGHT).contains(&category.weight) {
        return Err(PlannerError::MalformedData(format!(
            "category {} has weight {}",
            category.id, category.weight
        )));
    }
    for a in &category.assignments {
        if !a.max_points.is_finite() || a.max_points <= 0.0 {
            return Err(PlannerError::MalformedData(format!(
                "assignment {} in category {} has maxPoints {}",
                a.id, category.id, a.max_points
            )));
        }
        if let Some(g) = a.grade {
            if !g.is_finite() {
                return Err(PlannerError::MalformedData(format!(
                    "assignment {} in category {} has a non-finite grade",
                    a.id, category.id
                )));
            }
        }
    }
    Ok(())
}

/// Mean of `grade / maxPoints` over graded assignments, or `None` when nothing
/// in the category has been graded yet.
pub fn category_average(category: &GradeCategory) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for a in &category.assignments {
        let Some(g) = a.grade else {
            continue;
        };
        sum += g / a.max_points;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CourseTotals {
    weighted_points: f64,
    total_weight: f64,
}

impl CourseTotals {
    fn add(&mut self, category: &GradeCategory) {
        // Ungraded categories stay out of both sums.
        if let Some(avg) = category_average(category) {
            self.weighted_points += avg * category.weight;
            self.total_weight += category.weight;
        }
    }

    fn percentage(&self) -> Option<f64> {
        if self.total_weight <= 0.0 {
            return None;
        }
        let raw = 100.0 * self.weighted_points / self.total_weight;
        // clamp() passes NaN through.
        raw.is_finite().then(|| raw.clamp(0.0, 100.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub category_id: String,
    pub name: String,
    pub weight: f64,
    pub graded_count: usize,
    pub assignment_count: usize,
    /// Category average as a percentage; `None` when nothing is graded.
    pub average_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseGrade {
    pub course_id: String,
    pub percentage: f64,
    pub display_percent: f64,
    pub letter: &'static str,
    pub grade_points: f64,
    pub has_graded_work: bool,
    pub categories: Vec<CategoryBreakdown>,
}

/// Percentage and letter grade for one course. Categories belonging to other
/// courses are ignored, so callers may pass the full category list.
pub fn compute_course_grade(
    course_id: &str,
    categories: &[GradeCategory],
) -> Result<CourseGrade, PlannerError> {
    let mut totals = CourseTotals::default();
    let mut breakdown = Vec::new();
    for c in categories.iter().filter(|c| c.course_id == course_id) {
        check_category(c)?;
        totals.add(c);
        breakdown.push(CategoryBreakdown {
            category_id: c.id.clone(),
            name: c.name.clone(),
            weight: c.weight,
            graded_count: c.assignments.iter().filter(|a| a.is_graded()).count(),
            assignment_count: c.assignments.len(),
            average_percent: category_average(c).map(|avg| 100.0 * avg),
        });
    }

    let percentage = totals.percentage();
    let has_graded_work = percentage.is_some();
    let percentage = percentage.unwrap_or(0.0);
    Ok(CourseGrade {
        course_id: course_id.to_string(),
        percentage,
        display_percent: round_off_1_decimal(percentage),
        letter: letter_grade(percentage),
        grade_points: percentage_to_grade_points(percentage),
        has_graded_work,
        categories: breakdown,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditPolicy {
    /// Every course counts the same number of credits.
    Fixed(u32),
    /// Use the credit count stored on each course record.
    CourseRecord,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_FIXED_CREDITS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaCourseRow {
    pub course_id: String,
    pub percentage: f64,
    pub grade_points: f64,
    pub credits: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaReport {
    pub gpa: f64,
    /// False when no course has graded work; `gpa` is then 0.0 by convention.
    pub has_data: bool,
    pub total_credits: u32,
    pub courses: Vec<GpaCourseRow>,
}

/// Credit-weighted GPA over every course that has at least one graded
/// category. `course_filter` limits the courses considered.
pub fn gpa_report(
    categories: &[GradeCategory],
    course_filter: Option<&[String]>,
    courses: &[Course],
    policy: CreditPolicy,
) -> Result<GpaReport, PlannerError> {
    let mut by_course: BTreeMap<&str, CourseTotals> = BTreeMap::new();
    for c in categories {
        if let Some(filter) = course_filter {
            if !filter.iter().any(|id| *id == c.course_id) {
                continue;
            }
        }
        check_category(c)?;
        by_course.entry(c.course_id.as_str()).or_default().add(c);
    }

    let credit_map: HashMap<&str, i64> = courses
        .iter()
        .map(|c| (c.id.as_str(), c.credits))
        .collect();

    let mut quality_points = 0.0_f64;
    let mut total_credits = 0_u32;
    let mut rows = Vec::new();
    for (course_id, totals) in by_course {
        let Some(percentage) = totals.percentage() else {
            continue;
        };
        let credits = match policy {
            CreditPolicy::Fixed(n) => n,
            CreditPolicy::CourseRecord => match credit_map.get(course_id) {
                Some(n) => u32::try_from(*n).unwrap_or(0),
                None => {
                    tracing::warn!(course_id, "graded categories reference an unknown course");
                    0
                }
            },
        };
        if credits == 0 {
            continue;
        }
        let grade_points = percentage_to_grade_points(percentage);
        quality_points += grade_points * f64::from(credits);
        total_credits += credits;
        rows.push(GpaCourseRow {
            course_id: course_id.to_string(),
            percentage,
            grade_points,
            credits,
        });
    }

    let gpa = if total_credits > 0 {
        (quality_points / f64::from(total_credits)).clamp(0.0, 4.0)
    } else {
        0.0
    };
    Ok(GpaReport {
        gpa,
        has_data: total_credits > 0,
        total_credits,
        courses: rows,
    })
}

impl GpaReport {
    pub fn empty() -> Self {
        Self {
            gpa: 0.0,
            has_data: false,
            total_credits: 0,
            courses: Vec::new(),
        }
    }
}

/// Like [`gpa_report`], but malformed data degrades to an empty report
/// (`gpa` 0.0, `has_data` false) instead of failing.
pub fn compute_gpa(
    categories: &[GradeCategory],
    course_filter: Option<&[String]>,
    courses: &[Course],
    policy: CreditPolicy,
) -> GpaReport {
    match gpa_report(categories, course_filter, courses, policy) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(error = %e, "gpa calculation degraded to 0.0");
            GpaReport::empty()
        }
    }
}

/// Returns a copy of the category with the assignment graded. The input
/// slice is never modified.
pub fn apply_assignment_grade(
    categories: &[GradeCategory],
    category_id: &str,
    assignment_id: &str,
    grade: f64,
) -> Result<GradeCategory, PlannerError> {
    let Some(category) = categories.iter().find(|c| c.id == category_id) else {
        return Err(PlannerError::not_found("grade category", category_id));
    };
    let mut updated = category.clone();
    let Some(assignment) = updated
        .assignments
        .iter_mut()
        .find(|a| a.id == assignment_id)
    else {
        return Err(PlannerError::not_found("assignment", assignment_id));
    };
    validate_grade(grade, assignment.max_points)?;
    assignment.grade = Some(grade);
    assignment.completed = true;
    Ok(updated)
}
