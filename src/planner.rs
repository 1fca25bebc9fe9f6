//! Due-date planner and study-time rollups. Everything here works on records
//! already loaded from storage; the handlers own the SQL.
//!
//! Timestamps are compared as strings. That is only sound because every
//! stored timestamp goes through [`format_instant`] first.

use crate::calc::round_off_1_decimal;
use crate::error::PlannerError;
use crate::model::{PlannerTask, Priority, StudySession};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_UPCOMING_LIMIT: usize = 5;

/// Accepts RFC 3339, a zone-less `YYYY-MM-DDTHH:MM[:SS]` (read as UTC), or a
/// bare date (midnight UTC).
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, PlannerError> {
    let t = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Some(naive) = NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(PlannerError::InvalidField(format!(
        "{t:?} is not a date or RFC 3339 timestamp"
    )))
}

/// Upper bound of a calendar range. A bare date covers that whole day.
pub fn parse_range_end(s: &str) -> Result<DateTime<Utc>, PlannerError> {
    let t = s.trim();
    if let Some(end) = NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
    {
        return Ok(Utc.from_utc_datetime(&end));
    }
    parse_instant(t)
}

/// Canonical storage form: `2026-10-19T08:30:00Z`.
pub fn format_instant(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Pending,
    Overdue,
}

fn status_at(task: &PlannerTask, now: &str) -> TaskStatus {
    if task.completed {
        TaskStatus::Completed
    } else if task.due_at.as_str() < now {
        TaskStatus::Overdue
    } else {
        TaskStatus::Pending
    }
}

pub fn task_status(task: &PlannerTask, now: DateTime<Utc>) -> TaskStatus {
    status_at(task, &format_instant(now))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFilter {
    All,
    Completed,
    Pending,
    Overdue,
    Priority(Priority),
}

impl TaskFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "completed" => Some(Self::Completed),
            "pending" => Some(Self::Pending),
            "overdue" => Some(Self::Overdue),
            other => Priority::parse(other).map(Self::Priority),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSort {
    DueDate,
    Title,
    Priority,
}

impl TaskSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dueDate" => Some(Self::DueDate),
            "title" => Some(Self::Title),
            "priority" => Some(Self::Priority),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(flatten)]
    pub task: PlannerTask,
    pub status: TaskStatus,
}

/// Filters and orders tasks the way the planner list does. Sorting is
/// stable, so equal keys keep their due-date order from storage.
pub fn select_tasks(
    tasks: Vec<PlannerTask>,
    filter: TaskFilter,
    sort: TaskSort,
    now: DateTime<Utc>,
) -> Vec<TaskView> {
    let now = format_instant(now);
    let mut views: Vec<TaskView> = tasks
        .into_iter()
        .map(|task| {
            let status = status_at(&task, &now);
            TaskView { task, status }
        })
        .filter(|v| match filter {
            TaskFilter::All => true,
            TaskFilter::Completed => v.status == TaskStatus::Completed,
            TaskFilter::Pending => v.status == TaskStatus::Pending,
            TaskFilter::Overdue => v.status == TaskStatus::Overdue,
            TaskFilter::Priority(p) => v.task.priority == p,
        })
        .collect();
    match sort {
        TaskSort::DueDate => views.sort_by(|a, b| a.task.due_at.cmp(&b.task.due_at)),
        TaskSort::Title => views.sort_by_cached_key(|v| v.task.title.to_lowercase()),
        TaskSort::Priority => {
            views.sort_by(|a, b| b.task.priority.rank().cmp(&a.task.priority.rank()))
        }
    }
    views
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DueBucket {
    Overdue,
    Today,
    Tomorrow,
    ThisWeek,
    Later,
}

pub fn due_bucket(due: DateTime<Utc>, now: DateTime<Utc>) -> DueBucket {
    let today = now.date_naive();
    let day = due.date_naive();
    if due < now {
        DueBucket::Overdue
    } else if day == today {
        DueBucket::Today
    } else if today.succ_opt() == Some(day) {
        DueBucket::Tomorrow
    } else if due <= now + Duration::days(7) {
        DueBucket::ThisWeek
    } else {
        DueBucket::Later
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingTask {
    #[serde(flatten)]
    pub task: PlannerTask,
    pub due_bucket: DueBucket,
}

/// Open tasks due strictly after `now`, soonest first.
pub fn upcoming(tasks: &[PlannerTask], now: DateTime<Utc>, limit: usize) -> Vec<UpcomingTask> {
    let stamp = format_instant(now);
    let mut open: Vec<&PlannerTask> = tasks
        .iter()
        .filter(|t| !t.completed && t.due_at.as_str() > stamp.as_str())
        .collect();
    open.sort_by(|a, b| a.due_at.cmp(&b.due_at));
    open.into_iter()
        .take(limit)
        .map(|t| {
            let bucket = match parse_instant(&t.due_at) {
                Ok(due) => due_bucket(due, now),
                Err(e) => {
                    tracing::warn!(task_id = %t.id, error = %e, "unreadable due date");
                    DueBucket::Later
                }
            };
            UpcomingTask {
                task: t.clone(),
                due_bucket: bucket,
            }
        })
        .collect()
}

/// Open tasks whose due date has passed, oldest first.
pub fn overdue(tasks: &[PlannerTask], now: DateTime<Utc>) -> Vec<PlannerTask> {
    let stamp = format_instant(now);
    let mut late: Vec<PlannerTask> = tasks
        .iter()
        .filter(|t| status_at(t, &stamp) == TaskStatus::Overdue)
        .cloned()
        .collect();
    late.sort_by(|a, b| a.due_at.cmp(&b.due_at));
    late
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerSummary {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub overdue: usize,
    /// Pending tasks due strictly after now.
    pub upcoming: usize,
    /// Completed share as a 1-decimal percentage; 0 with no tasks.
    pub completion_rate: f64,
}

pub fn summarize(tasks: &[PlannerTask], now: DateTime<Utc>) -> PlannerSummary {
    let stamp = format_instant(now);
    let mut s = PlannerSummary {
        total: tasks.len(),
        completed: 0,
        pending: 0,
        overdue: 0,
        upcoming: 0,
        completion_rate: 0.0,
    };
    for t in tasks {
        match status_at(t, &stamp) {
            TaskStatus::Completed => s.completed += 1,
            TaskStatus::Overdue => s.overdue += 1,
            TaskStatus::Pending => {
                s.pending += 1;
                if t.due_at.as_str() > stamp.as_str() {
                    s.upcoming += 1;
                }
            }
        }
    }
    if s.total > 0 {
        s.completion_rate = round_off_1_decimal(100.0 * s.completed as f64 / s.total as f64);
    }
    s
}

/// `1h 5m` above an hour, `42m` below.
pub fn duration_label(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn hours(seconds: i64) -> f64 {
    round_off_1_decimal(seconds as f64 / 3600.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectTotal {
    pub subject: String,
    pub sessions: usize,
    pub seconds: i64,
    pub hours: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyTotals {
    pub sessions: usize,
    pub total_seconds: i64,
    pub total_hours: f64,
    pub label: String,
    pub by_subject: Vec<SubjectTotal>,
}

/// Study time per subject, busiest first. `since` keeps sessions that ended
/// at or after that instant.
pub fn study_totals(sessions: &[StudySession], since: Option<DateTime<Utc>>) -> StudyTotals {
    let since = since.map(format_instant);
    let mut by_subject: BTreeMap<&str, (usize, i64)> = BTreeMap::new();
    let mut count = 0_usize;
    let mut total = 0_i64;
    for s in sessions {
        if let Some(cut) = since.as_deref() {
            if s.end_time.as_str() < cut {
                continue;
            }
        }
        let seconds = s.duration_seconds.max(0);
        let entry = by_subject.entry(s.subject.as_str()).or_default();
        entry.0 += 1;
        entry.1 = entry.1.saturating_add(seconds);
        count += 1;
        total = total.saturating_add(seconds);
    }

    let mut rows: Vec<SubjectTotal> = by_subject
        .into_iter()
        .map(|(subject, (sessions, seconds))| SubjectTotal {
            subject: subject.to_string(),
            sessions,
            seconds,
            hours: hours(seconds),
            label: duration_label(seconds),
        })
        .collect();
    rows.sort_by(|a, b| b.seconds.cmp(&a.seconds));

    StudyTotals {
        sessions: count,
        total_seconds: total,
        total_hours: hours(total),
        label: duration_label(total),
        by_subject: rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        parse_instant(s).expect("timestamp")
    }

    fn task(
        id: &str,
        title: &str,
        due: &str,
        priority: Priority,
        completed: bool,
    ) -> PlannerTask {
        PlannerTask {
            id: id.to_string(),
            course_id: "c1".to_string(),
            title: title.to_string(),
            description: String::new(),
            due_at: format_instant(at(due)),
            priority,
            kind: "homework".to_string(),
            submission_format: String::new(),
            completed,
        }
    }

    fn session(subject: &str, seconds: i64, end: &str) -> StudySession {
        StudySession {
            id: format!("{subject}-{end}"),
            subject: subject.to_string(),
            duration_seconds: seconds,
            start_time: end.to_string(),
            end_time: format_instant(at(end)),
            created_at: end.to_string(),
        }
    }

    fn board() -> Vec<PlannerTask> {
        vec![
            task("essay", "Essay draft", "2026-10-25T17:00:00Z", Priority::Low, false),
            task("lab", "Lab report", "2026-10-18T09:00:00Z", Priority::High, false),
            task("quiz", "quiz prep", "2026-10-20T08:00:00Z", Priority::Medium, false),
            task("hw", "Problem set", "2026-10-19T20:00:00Z", Priority::High, false),
            task("done", "Reading", "2026-10-10T12:00:00Z", Priority::Medium, true),
        ]
    }

    #[test]
    fn parses_the_accepted_timestamp_shapes() {
        assert_eq!(
            format_instant(at("2026-10-19T10:30:00+02:00")),
            "2026-10-19T08:30:00Z"
        );
        assert_eq!(format_instant(at("2026-10-19T08:30")), "2026-10-19T08:30:00Z");
        assert_eq!(format_instant(at("2026-10-19")), "2026-10-19T00:00:00Z");
        let err = parse_instant("next tuesday").unwrap_err();
        assert_eq!(err.code(), "bad_params");
    }

    #[test]
    fn range_end_covers_the_whole_day() {
        let end = parse_range_end("2026-10-20").expect("date");
        assert_eq!(format_instant(end), "2026-10-20T23:59:59Z");
        let end = parse_range_end("2026-10-20T09:00:00Z").expect("instant");
        assert_eq!(format_instant(end), "2026-10-20T09:00:00Z");
    }

    #[test]
    fn status_splits_on_due_date() {
        let now = at("2026-10-19T12:00:00Z");
        let tasks = board();
        assert_eq!(task_status(&tasks[0], now), TaskStatus::Pending);
        assert_eq!(task_status(&tasks[1], now), TaskStatus::Overdue);
        assert_eq!(task_status(&tasks[4], now), TaskStatus::Completed);
    }

    #[test]
    fn upcoming_is_open_future_work_soonest_first() {
        let now = at("2026-10-19T12:00:00Z");
        let next = upcoming(&board(), now, DEFAULT_UPCOMING_LIMIT);
        let ids: Vec<&str> = next.iter().map(|u| u.task.id.as_str()).collect();
        assert_eq!(ids, ["hw", "quiz", "essay"]);
        assert_eq!(next[0].due_bucket, DueBucket::Today);
        assert_eq!(next[1].due_bucket, DueBucket::Tomorrow);
        assert_eq!(next[2].due_bucket, DueBucket::ThisWeek);

        let capped = upcoming(&board(), now, 1);
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].task.id, "hw");
    }

    #[test]
    fn overdue_excludes_completed_work() {
        let now = at("2026-10-19T12:00:00Z");
        let late = overdue(&board(), now);
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].id, "lab");
    }

    #[test]
    fn due_buckets() {
        let now = at("2026-10-19T12:00:00Z");
        assert_eq!(due_bucket(at("2026-10-19T11:00:00Z"), now), DueBucket::Overdue);
        assert_eq!(due_bucket(at("2026-10-19T23:59:00Z"), now), DueBucket::Today);
        assert_eq!(due_bucket(at("2026-10-20T00:00:00Z"), now), DueBucket::Tomorrow);
        assert_eq!(due_bucket(at("2026-10-26T12:00:00Z"), now), DueBucket::ThisWeek);
        assert_eq!(due_bucket(at("2026-10-26T12:00:01Z"), now), DueBucket::Later);
    }

    #[test]
    fn list_filters_and_sorts() {
        let now = at("2026-10-19T12:00:00Z");

        let pending = select_tasks(board(), TaskFilter::Pending, TaskSort::DueDate, now);
        let ids: Vec<&str> = pending.iter().map(|v| v.task.id.as_str()).collect();
        assert_eq!(ids, ["hw", "quiz", "essay"]);

        let high = select_tasks(
            board(),
            TaskFilter::Priority(Priority::High),
            TaskSort::DueDate,
            now,
        );
        assert_eq!(high.len(), 2);
        assert_eq!(high[0].status, TaskStatus::Overdue);

        let by_title = select_tasks(board(), TaskFilter::All, TaskSort::Title, now);
        let titles: Vec<&str> = by_title.iter().map(|v| v.task.title.as_str()).collect();
        assert_eq!(
            titles,
            ["Essay draft", "Lab report", "Problem set", "quiz prep", "Reading"]
        );

        let by_priority = select_tasks(board(), TaskFilter::All, TaskSort::Priority, now);
        assert_eq!(by_priority[0].task.priority, Priority::High);
        assert_eq!(by_priority[4].task.priority, Priority::Low);

        assert_eq!(TaskFilter::parse("medium"), Some(TaskFilter::Priority(Priority::Medium)));
        assert_eq!(TaskFilter::parse("soon"), None);
        assert_eq!(TaskSort::parse("course"), None);
    }

    #[test]
    fn summary_counts_and_completion_rate() {
        let now = at("2026-10-19T12:00:00Z");
        let s = summarize(&board(), now);
        assert_eq!(s.total, 5);
        assert_eq!(s.completed, 1);
        assert_eq!(s.overdue, 1);
        assert_eq!(s.pending, 3);
        assert_eq!(s.upcoming, 3);
        assert_eq!(s.completion_rate, 20.0);

        let empty = summarize(&[], now);
        assert_eq!(empty.completion_rate, 0.0);
    }

    #[test]
    fn duration_labels() {
        assert_eq!(duration_label(0), "0m");
        assert_eq!(duration_label(59), "0m");
        assert_eq!(duration_label(25 * 60), "25m");
        assert_eq!(duration_label(3600 + 5 * 60 + 30), "1h 5m");
        assert_eq!(duration_label(-10), "0m");
    }

    #[test]
    fn study_totals_group_by_subject() {
        let sessions = vec![
            session("Calculus", 3600, "2026-10-12T10:00:00Z"),
            session("Calculus", 1800, "2026-10-18T10:00:00Z"),
            session("History", 2700, "2026-10-19T09:00:00Z"),
        ];
        let all = study_totals(&sessions, None);
        assert_eq!(all.sessions, 3);
        assert_eq!(all.total_seconds, 8100);
        assert_eq!(all.total_hours, 2.3);
        assert_eq!(all.label, "2h 15m");
        assert_eq!(all.by_subject[0].subject, "Calculus");
        assert_eq!(all.by_subject[0].hours, 1.5);
        assert_eq!(all.by_subject[1].label, "45m");

        let recent = study_totals(&sessions, Some(at("2026-10-18T00:00:00Z")));
        assert_eq!(recent.sessions, 2);
        assert_eq!(recent.total_seconds, 4500);
        assert_eq!(recent.by_subject[0].subject, "History");
    }
}
