use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
    pub code: String,
    pub instructor: String,
    pub credits: i64,
    pub color: String,
}

pub const DEFAULT_COURSE_COLOR: &str = "#3B82F6";
pub const MAX_COURSE_CREDITS: i64 = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub id: String,
    pub name: String,
    pub max_points: f64,
    pub grade: Option<f64>,
    /// Always equal to `grade.is_some()`; kept on the record for the dashboard.
    pub completed: bool,
}

impl AssignmentRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        max_points: f64,
        grade: Option<f64>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            max_points,
            grade,
            completed: grade.is_some(),
        }
    }

    pub fn is_graded(&self) -> bool {
        self.grade.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCategory {
    pub id: String,
    pub course_id: String,
    pub name: String,
    pub weight: f64,
    pub sort_order: i64,
    pub assignments: Vec<AssignmentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

/// Work kinds offered by the planner form.
pub const TASK_KINDS: [&str; 7] = [
    "assignment",
    "homework",
    "quiz",
    "exam",
    "project",
    "lab",
    "essay",
];

/// A planner entry with a due date. Separate from [`AssignmentRecord`], which
/// only exists inside a grade category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerTask {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub description: String,
    /// RFC 3339, UTC, whole seconds. Sorts lexicographically.
    #[serde(rename = "dueDate")]
    pub due_at: String,
    pub priority: Priority,
    #[serde(rename = "type")]
    pub kind: String,
    pub submission_format: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    pub id: String,
    pub subject: String,
    pub duration_seconds: i64,
    pub start_time: String,
    pub end_time: String,
    pub created_at: String,
}
