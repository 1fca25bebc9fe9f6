use crate::error::PlannerError;
use crate::model::{AssignmentRecord, Course, GradeCategory};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

/// Storage operations the grade engine depends on.
pub trait GradeStore {
    fn list_grade_categories(
        &self,
        course_id: Option<&str>,
    ) -> Result<Vec<GradeCategory>, PlannerError>;

    fn get_grade_category(&self, id: &str) -> Result<GradeCategory, PlannerError>;

    /// Replaces the category's assignment list, keeping the given order.
    fn save_grade_category_assignments(
        &mut self,
        id: &str,
        assignments: &[AssignmentRecord],
    ) -> Result<(), PlannerError>;

    fn list_courses(&self) -> Result<Vec<Course>, PlannerError>;
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn load_assignments(&self, category_id: &str) -> Result<Vec<AssignmentRecord>, PlannerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, max_points, grade
             FROM assignments
             WHERE category_id = ?
             ORDER BY sort_order",
        )?;
        let rows = stmt
            .query_map([category_id], |r| {
                Ok(AssignmentRecord::new(
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, Option<f64>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_categories(
        &self,
        sql: &str,
        param: Option<&str>,
    ) -> Result<Vec<GradeCategory>, PlannerError> {
        let mut stmt = self.conn.prepare(sql)?;
        let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<GradeCategory> {
            Ok(GradeCategory {
                id: r.get(0)?,
                course_id: r.get(1)?,
                name: r.get(2)?,
                weight: r.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                sort_order: r.get(4)?,
                assignments: Vec::new(),
                updated_at: r.get(5)?,
            })
        };
        let mut categories = match param {
            Some(p) => stmt
                .query_map([p], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };
        for c in &mut categories {
            c.assignments = self.load_assignments(&c.id)?;
        }
        Ok(categories)
    }

    pub fn course_exists(&self, course_id: &str) -> Result<bool, PlannerError> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Inserts a category and its assignments; ids are generated when blank.
    pub fn insert_category(&self, category: &GradeCategory) -> Result<GradeCategory, PlannerError> {
        let mut stored = self.insert_categories(std::slice::from_ref(category))?;
        stored
            .pop()
            .ok_or_else(|| PlannerError::not_found("grade category", category.id.clone()))
    }

    /// Inserts every category in one transaction. Nothing is written unless
    /// all of them succeed.
    pub fn insert_categories(
        &self,
        categories: &[GradeCategory],
    ) -> Result<Vec<GradeCategory>, PlannerError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut stored = Vec::with_capacity(categories.len());
        for c in categories {
            stored.push(insert_category_rows(&tx, c)?);
        }
        tx.commit()?;
        Ok(stored)
    }

    pub fn update_category_meta(
        &self,
        id: &str,
        name: Option<&str>,
        weight: Option<f64>,
    ) -> Result<GradeCategory, PlannerError> {
        let current = self.get_grade_category(id)?;
        let name = name.unwrap_or(&current.name);
        let weight = weight.unwrap_or(current.weight);
        self.conn.execute(
            "UPDATE grade_categories SET name = ?, weight = ?, updated_at = ? WHERE id = ?",
            (name, weight, now_rfc3339(), id),
        )?;
        self.get_grade_category(id)
    }

    pub fn delete_category(&self, id: &str) -> Result<(), PlannerError> {
        // Existence check first so callers get not_found instead of a silent no-op.
        self.get_grade_category(id)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM assignments WHERE category_id = ?", [id])?;
        tx.execute("DELETE FROM grade_categories WHERE id = ?", [id])?;
        tx.commit()?;
        Ok(())
    }
}

fn insert_category_rows(
    conn: &Connection,
    category: &GradeCategory,
) -> Result<GradeCategory, PlannerError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM courses WHERE id = ?",
            [&category.course_id],
            |r| r.get(0),
        )
        .optional()?;
    if found.is_none() {
        return Err(PlannerError::not_found("course", category.course_id.clone()));
    }
    let mut stored = category.clone();
    if stored.id.is_empty() {
        stored.id = Uuid::new_v4().to_string();
    }
    stored.sort_order = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM grade_categories WHERE course_id = ?",
        [&stored.course_id],
        |r| r.get(0),
    )?;
    stored.updated_at = Some(now_rfc3339());
    for a in &mut stored.assignments {
        if a.id.is_empty() {
            a.id = Uuid::new_v4().to_string();
        }
    }

    conn.execute(
        "INSERT INTO grade_categories(id, course_id, name, weight, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &stored.id,
            &stored.course_id,
            &stored.name,
            stored.weight,
            stored.sort_order,
            &stored.updated_at,
        ),
    )?;
    write_assignments(conn, &stored.id, &stored.assignments)?;
    Ok(stored)
}

fn write_assignments(
    conn: &Connection,
    category_id: &str,
    assignments: &[AssignmentRecord],
) -> Result<(), PlannerError> {
    conn.execute("DELETE FROM assignments WHERE category_id = ?", [category_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO assignments(id, category_id, sort_order, name, max_points, grade)
         VALUES(?, ?, ?, ?, ?, ?)",
    )?;
    for (i, a) in assignments.iter().enumerate() {
        stmt.execute((&a.id, category_id, i as i64, &a.name, a.max_points, a.grade))?;
    }
    Ok(())
}

impl GradeStore for SqliteStore<'_> {
    fn list_grade_categories(
        &self,
        course_id: Option<&str>,
    ) -> Result<Vec<GradeCategory>, PlannerError> {
        match course_id {
            Some(cid) => self.load_categories(
                "SELECT id, course_id, name, weight, sort_order, updated_at
                 FROM grade_categories
                 WHERE course_id = ?
                 ORDER BY sort_order",
                Some(cid),
            ),
            None => self.load_categories(
                "SELECT id, course_id, name, weight, sort_order, updated_at
                 FROM grade_categories
                 ORDER BY course_id, sort_order",
                None,
            ),
        }
    }

    fn get_grade_category(&self, id: &str) -> Result<GradeCategory, PlannerError> {
        let mut found = self.load_categories(
            "SELECT id, course_id, name, weight, sort_order, updated_at
             FROM grade_categories
             WHERE id = ?",
            Some(id),
        )?;
        found
            .pop()
            .ok_or_else(|| PlannerError::not_found("grade category", id))
    }

    fn save_grade_category_assignments(
        &mut self,
        id: &str,
        assignments: &[AssignmentRecord],
    ) -> Result<(), PlannerError> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE grade_categories SET updated_at = ? WHERE id = ?",
            (now_rfc3339(), id),
        )?;
        if changed == 0 {
            return Err(PlannerError::not_found("grade category", id));
        }
        write_assignments(&tx, id, assignments)?;
        tx.commit()?;
        Ok(())
    }

    fn list_courses(&self) -> Result<Vec<Course>, PlannerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, code, instructor, credits, color
             FROM courses
             ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Course {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    code: r.get(2)?,
                    instructor: r.get(3)?,
                    credits: r.get(4)?,
                    color: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// In-memory backend; mirrors the dashboard's mock mode.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub courses: Vec<Course>,
    pub categories: Vec<GradeCategory>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new(courses: Vec<Course>, categories: Vec<GradeCategory>) -> Self {
        Self {
            courses,
            categories,
        }
    }
}

#[cfg(test)]
impl GradeStore for MemoryStore {
    fn list_grade_categories(
        &self,
        course_id: Option<&str>,
    ) -> Result<Vec<GradeCategory>, PlannerError> {
        Ok(self
            .categories
            .iter()
            .filter(|c| course_id.map(|id| c.course_id == id).unwrap_or(true))
            .cloned()
            .collect())
    }

    fn get_grade_category(&self, id: &str) -> Result<GradeCategory, PlannerError> {
        self.categories
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| PlannerError::not_found("grade category", id))
    }

    fn save_grade_category_assignments(
        &mut self,
        id: &str,
        assignments: &[AssignmentRecord],
    ) -> Result<(), PlannerError> {
        let Some(category) = self.categories.iter_mut().find(|c| c.id == id) else {
            return Err(PlannerError::not_found("grade category", id));
        };
        category.assignments = assignments.to_vec();
        category.updated_at = Some(now_rfc3339());
        Ok(())
    }

    fn list_courses(&self) -> Result<Vec<Course>, PlannerError> {
        Ok(self.courses.clone())
    }
}
