use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;
use super::navigator::{Direction, OrderedLookup, Position};
use super::visibility::{traversable_lesson_sql, traversable_section_sql};

/// Async-safe handle to the course database.
///
/// Wraps `CourseDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads. The mutex also serializes store access.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<CourseDb>>,
}

impl DbHandle {
    pub fn new(db: CourseDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&CourseDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup and tests only.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, CourseDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

const SECTION_COLUMNS: &str = "id, course_id, name, sort_order, status, created_at, updated_at";
const LESSON_COLUMNS: &str =
    "id, section_id, name, description, youtube_video_id, sort_order, status, created_at, updated_at";
const PRODUCT_COLUMNS: &str =
    "id, name, description, image_url, price_in_dollars, status, created_at, updated_at";
const PURCHASE_COLUMNS: &str = "id, user_id, product_id, price_paid_in_cents, product_details, stripe_session_id, refunded_at, created_at";

fn course_from_row(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn section_row(row: &Row<'_>) -> rusqlite::Result<SectionRow> {
    Ok(SectionRow {
        id: row.get(0)?,
        course_id: row.get(1)?,
        name: row.get(2)?,
        order: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn lesson_row(row: &Row<'_>) -> rusqlite::Result<LessonRow> {
    Ok(LessonRow {
        id: row.get(0)?,
        section_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        youtube_video_id: row.get(4)?,
        order: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn purchase_row(row: &Row<'_>) -> rusqlite::Result<PurchaseRow> {
    Ok(PurchaseRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        product_id: row.get(2)?,
        price_paid_in_cents: row.get(3)?,
        product_details: row.get(4)?,
        stripe_session_id: row.get(5)?,
        refunded_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        id: row.get(0)?,
        scope_id: row.get(1)?,
        order: row.get(2)?,
    })
}

pub struct CourseDb {
    conn: Connection,
}

impl CourseDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        // sort_order is not UNIQUE: a reorder rewrites rows one statement at
        // a time and would collide mid-transaction.
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL DEFAULT '',
                    email TEXT NOT NULL DEFAULT '',
                    role TEXT NOT NULL DEFAULT 'user',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS courses (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS course_sections (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    course_id INTEGER NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    sort_order INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'private',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS lessons (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    section_id INTEGER NOT NULL REFERENCES course_sections(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT,
                    youtube_video_id TEXT NOT NULL,
                    sort_order INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'private',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS user_lesson_complete (
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    lesson_id INTEGER NOT NULL REFERENCES lessons(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (user_id, lesson_id)
                );

                CREATE TABLE IF NOT EXISTS products (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL,
                    image_url TEXT NOT NULL,
                    price_in_dollars INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'private',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS course_products (
                    course_id INTEGER NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
                    product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                    PRIMARY KEY (course_id, product_id)
                );

                CREATE TABLE IF NOT EXISTS user_course_access (
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    course_id INTEGER NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (user_id, course_id)
                );

                CREATE TABLE IF NOT EXISTS purchases (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
                    product_id INTEGER REFERENCES products(id) ON DELETE SET NULL,
                    price_paid_in_cents INTEGER NOT NULL,
                    product_details TEXT NOT NULL,
                    stripe_session_id TEXT NOT NULL UNIQUE,
                    refunded_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_sections_course ON course_sections(course_id, sort_order);
                CREATE INDEX IF NOT EXISTS idx_lessons_section ON lessons(section_id, sort_order);
                CREATE INDEX IF NOT EXISTS idx_purchases_user ON purchases(user_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    /// Insert or refresh a user seen through the identity proxy. Empty name
    /// or email never overwrite stored values; `role = None` keeps the
    /// stored role (or `user` for a new row).
    pub fn upsert_user(
        &self,
        id: &str,
        name: &str,
        email: &str,
        role: Option<UserRole>,
    ) -> Result<User> {
        self.conn
            .execute(
                "INSERT INTO users (id, name, email, role) VALUES (?1, ?2, ?3, COALESCE(?4, 'user'))
                 ON CONFLICT(id) DO UPDATE SET
                    name = CASE WHEN excluded.name <> '' THEN excluded.name ELSE users.name END,
                    email = CASE WHEN excluded.email <> '' THEN excluded.email ELSE users.email END,
                    role = COALESCE(?4, users.role)",
                params![id, name, email, role.map(|r| r.as_str())],
            )
            .context("Failed to upsert user")?;
        self.get_user(id)?.context("User not found after upsert")
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, email, role, created_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query user")?;
        match row {
            Some((id, name, email, role, created_at)) => {
                let role = role.parse::<UserRole>().map_err(|e| anyhow::anyhow!(e))?;
                Ok(Some(User {
                    id,
                    name,
                    email,
                    role,
                    created_at,
                }))
            }
            None => Ok(None),
        }
    }

    // ── Courses ───────────────────────────────────────────────────────

    pub fn create_course(&self, input: &CourseInput) -> Result<Course> {
        self.conn
            .execute(
                "INSERT INTO courses (name, description) VALUES (?1, ?2)",
                params![input.name, input.description],
            )
            .context("Failed to insert course")?;
        let id = self.conn.last_insert_rowid();
        self.get_course(id)?.context("Course not found after insert")
    }

    pub fn get_course(&self, id: i64) -> Result<Option<Course>> {
        self.conn
            .query_row(
                "SELECT id, name, description, created_at, updated_at FROM courses WHERE id = ?1",
                params![id],
                course_from_row,
            )
            .optional()
            .context("Failed to query course")
    }

    pub fn update_course(&self, id: i64, input: &CourseInput) -> Result<Option<Course>> {
        let count = self
            .conn
            .execute(
                "UPDATE courses SET name = ?1, description = ?2, updated_at = datetime('now') WHERE id = ?3",
                params![input.name, input.description, id],
            )
            .context("Failed to update course")?;
        if count == 0 {
            return Ok(None);
        }
        self.get_course(id)
    }

    pub fn delete_course(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM courses WHERE id = ?1", params![id])
            .context("Failed to delete course")?;
        Ok(count > 0)
    }

    pub fn list_courses_admin(&self) -> Result<Vec<AdminCourseSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.name, c.description, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM course_sections s WHERE s.course_id = c.id),
                    (SELECT COUNT(*) FROM lessons l JOIN course_sections s ON l.section_id = s.id
                        WHERE s.course_id = c.id),
                    (SELECT COUNT(DISTINCT a.user_id) FROM user_course_access a WHERE a.course_id = c.id)
                 FROM courses c ORDER BY c.name, c.id",
            )
            .context("Failed to prepare list_courses_admin")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AdminCourseSummary {
                    course: course_from_row(row)?,
                    sections_count: row.get(5)?,
                    lessons_count: row.get(6)?,
                    students_count: row.get(7)?,
                })
            })
            .context("Failed to query courses")?;
        let mut courses = Vec::new();
        for row in rows {
            courses.push(row.context("Failed to read course row")?);
        }
        Ok(courses)
    }

    /// Courses the user can access, with traversable lesson and completion counts.
    pub fn list_user_courses(&self, user_id: &str) -> Result<Vec<UserCourseSummary>> {
        let lesson_statuses = traversable_lesson_sql();
        let section_statuses = traversable_section_sql();
        let sql = format!(
            "SELECT c.id, c.name, c.description,
                (SELECT COUNT(*) FROM lessons l JOIN course_sections s ON l.section_id = s.id
                    WHERE s.course_id = c.id AND s.status IN {sections} AND l.status IN {lessons}),
                (SELECT COUNT(*) FROM user_lesson_complete ulc
                    JOIN lessons l ON ulc.lesson_id = l.id
                    JOIN course_sections s ON l.section_id = s.id
                    WHERE ulc.user_id = ?1 AND s.course_id = c.id
                      AND s.status IN {sections} AND l.status IN {lessons})
             FROM courses c
             JOIN user_course_access a ON a.course_id = c.id
             WHERE a.user_id = ?1
             ORDER BY c.name, c.id",
            sections = section_statuses,
            lessons = lesson_statuses,
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_user_courses")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(UserCourseSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    lessons_count: row.get(3)?,
                    lessons_complete: row.get(4)?,
                })
            })
            .context("Failed to query user courses")?;
        let mut courses = Vec::new();
        for row in rows {
            courses.push(row.context("Failed to read user course row")?);
        }
        Ok(courses)
    }

    /// Traversable sections and lessons of a course in navigation order.
    pub fn get_course_outline(
        &self,
        course_id: i64,
        user_id: Option<&str>,
    ) -> Result<Option<CourseOutline>> {
        let Some(course) = self.get_course(course_id)? else {
            return Ok(None);
        };

        let mut sections = Vec::new();
        for section in self.list_sections(course_id)? {
            if !section.status.is_traversable() {
                continue;
            }
            let mut lessons = Vec::new();
            for lesson in self.list_lessons(section.id)? {
                if !lesson.status.is_traversable() {
                    continue;
                }
                let is_complete = match user_id {
                    Some(uid) => self.is_lesson_complete(uid, lesson.id)?,
                    None => false,
                };
                lessons.push(LessonOutline {
                    id: lesson.id,
                    name: lesson.name,
                    order: lesson.order,
                    status: lesson.status,
                    is_complete,
                });
            }
            sections.push(SectionOutline {
                id: section.id,
                name: section.name,
                order: section.order,
                lessons,
            });
        }

        Ok(Some(CourseOutline { course, sections }))
    }

    // ── Sections ──────────────────────────────────────────────────────

    pub fn next_section_order(&self, course_id: i64) -> Result<i32> {
        let max: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(sort_order), -1) FROM course_sections WHERE course_id = ?1",
                params![course_id],
                |row| row.get(0),
            )
            .context("Failed to get max section order")?;
        Ok(max + 1)
    }

    pub fn create_section(&self, course_id: i64, input: &SectionInput) -> Result<Section> {
        let order = self.next_section_order(course_id)?;
        self.conn
            .execute(
                "INSERT INTO course_sections (course_id, name, sort_order, status) VALUES (?1, ?2, ?3, ?4)",
                params![course_id, input.name, order, input.status.as_str()],
            )
            .context("Failed to insert section")?;
        let id = self.conn.last_insert_rowid();
        self.get_section(id)?.context("Section not found after insert")
    }

    pub fn get_section(&self, id: i64) -> Result<Option<Section>> {
        let sql = format!("SELECT {} FROM course_sections WHERE id = ?1", SECTION_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], section_row)
            .optional()
            .context("Failed to query section")?;
        row.map(SectionRow::into_section).transpose()
    }

    pub fn list_sections(&self, course_id: i64) -> Result<Vec<Section>> {
        let sql = format!(
            "SELECT {} FROM course_sections WHERE course_id = ?1 ORDER BY sort_order, id",
            SECTION_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_sections")?;
        let rows = stmt
            .query_map(params![course_id], section_row)
            .context("Failed to query sections")?;
        let mut sections = Vec::new();
        for row in rows {
            let r = row.context("Failed to read section row")?;
            sections.push(r.into_section()?);
        }
        Ok(sections)
    }

    pub fn update_section(&self, id: i64, input: &SectionInput) -> Result<Option<Section>> {
        let count = self
            .conn
            .execute(
                "UPDATE course_sections SET name = ?1, status = ?2, updated_at = datetime('now') WHERE id = ?3",
                params![input.name, input.status.as_str(), id],
            )
            .context("Failed to update section")?;
        if count == 0 {
            return Ok(None);
        }
        self.get_section(id)
    }

    /// Delete a section and return it, so callers can invalidate its course scope.
    pub fn delete_section(&self, id: i64) -> Result<Option<Section>> {
        let Some(section) = self.get_section(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM course_sections WHERE id = ?1", params![id])
            .context("Failed to delete section")?;
        Ok(Some(section))
    }

    /// Parent course of each id, `None` for unknown ids. Preserves input order.
    pub fn section_courses(&self, ids: &[i64]) -> Result<Vec<Option<i64>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT course_id FROM course_sections WHERE id = ?1")
            .context("Failed to prepare section_courses")?;
        let mut scopes = Vec::with_capacity(ids.len());
        for id in ids {
            let scope = stmt
                .query_row(params![id], |row| row.get(0))
                .optional()
                .context("Failed to query section course")?;
            scopes.push(scope);
        }
        Ok(scopes)
    }

    /// Set `sort_order` for each `(id, order)` pair in one transaction.
    pub fn rewrite_section_orders(&self, orders: &[(i64, i32)]) -> Result<()> {
        self.rewrite_orders("course_sections", orders)
    }

    // ── Lessons ───────────────────────────────────────────────────────

    pub fn next_lesson_order(&self, section_id: i64) -> Result<i32> {
        let max: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(sort_order), -1) FROM lessons WHERE section_id = ?1",
                params![section_id],
                |row| row.get(0),
            )
            .context("Failed to get max lesson order")?;
        Ok(max + 1)
    }

    pub fn create_lesson(&self, input: &LessonInput) -> Result<Lesson> {
        let order = self.next_lesson_order(input.section_id)?;
        self.conn
            .execute(
                "INSERT INTO lessons (section_id, name, description, youtube_video_id, sort_order, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    input.section_id,
                    input.name,
                    input.description,
                    input.youtube_video_id,
                    order,
                    input.status.as_str()
                ],
            )
            .context("Failed to insert lesson")?;
        let id = self.conn.last_insert_rowid();
        self.get_lesson(id)?.context("Lesson not found after insert")
    }

    pub fn get_lesson(&self, id: i64) -> Result<Option<Lesson>> {
        let sql = format!("SELECT {} FROM lessons WHERE id = ?1", LESSON_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], lesson_row)
            .optional()
            .context("Failed to query lesson")?;
        row.map(LessonRow::into_lesson).transpose()
    }

    pub fn list_lessons(&self, section_id: i64) -> Result<Vec<Lesson>> {
        let sql = format!(
            "SELECT {} FROM lessons WHERE section_id = ?1 ORDER BY sort_order, id",
            LESSON_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_lessons")?;
        let rows = stmt
            .query_map(params![section_id], lesson_row)
            .context("Failed to query lessons")?;
        let mut lessons = Vec::new();
        for row in rows {
            let r = row.context("Failed to read lesson row")?;
            lessons.push(r.into_lesson()?);
        }
        Ok(lessons)
    }

    /// Update a lesson. Moving it to another section appends it at the end
    /// of that section. Returns the lesson and its previous section id.
    pub fn update_lesson(&self, id: i64, input: &LessonInput) -> Result<Option<(Lesson, i64)>> {
        let Some(existing) = self.get_lesson(id)? else {
            return Ok(None);
        };
        let order = if existing.section_id == input.section_id {
            existing.order
        } else {
            self.next_lesson_order(input.section_id)?
        };
        self.conn
            .execute(
                "UPDATE lessons SET section_id = ?1, name = ?2, description = ?3, youtube_video_id = ?4,
                    sort_order = ?5, status = ?6, updated_at = datetime('now')
                 WHERE id = ?7",
                params![
                    input.section_id,
                    input.name,
                    input.description,
                    input.youtube_video_id,
                    order,
                    input.status.as_str(),
                    id
                ],
            )
            .context("Failed to update lesson")?;
        let lesson = self.get_lesson(id)?.context("Lesson not found after update")?;
        Ok(Some((lesson, existing.section_id)))
    }

    pub fn delete_lesson(&self, id: i64) -> Result<Option<Lesson>> {
        let Some(lesson) = self.get_lesson(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM lessons WHERE id = ?1", params![id])
            .context("Failed to delete lesson")?;
        Ok(Some(lesson))
    }

    /// Parent section of each id, `None` for unknown ids. Preserves input order.
    pub fn lesson_sections(&self, ids: &[i64]) -> Result<Vec<Option<i64>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT section_id FROM lessons WHERE id = ?1")
            .context("Failed to prepare lesson_sections")?;
        let mut scopes = Vec::with_capacity(ids.len());
        for id in ids {
            let scope = stmt
                .query_row(params![id], |row| row.get(0))
                .optional()
                .context("Failed to query lesson section")?;
            scopes.push(scope);
        }
        Ok(scopes)
    }

    pub fn rewrite_lesson_orders(&self, orders: &[(i64, i32)]) -> Result<()> {
        self.rewrite_orders("lessons", orders)
    }

    fn rewrite_orders(&self, table: &str, orders: &[(i64, i32)]) -> Result<()> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        {
            let sql = format!(
                "UPDATE {} SET sort_order = ?1, updated_at = datetime('now') WHERE id = ?2",
                table
            );
            let mut stmt = tx.prepare(&sql).context("Failed to prepare order rewrite")?;
            for (id, order) in orders {
                stmt.execute(params![order, id])
                    .with_context(|| format!("Failed to set order for {} {}", table, id))?;
            }
        }
        tx.commit().context("Failed to commit order rewrite")?;
        Ok(())
    }

    fn nearest_position(
        &self,
        table: &str,
        scope_column: &str,
        statuses: &str,
        scope_id: i64,
        after: Option<i32>,
        direction: Direction,
    ) -> Result<Option<Position>> {
        let (cmp, dir) = match direction {
            Direction::Next => (">", "ASC"),
            Direction::Previous => ("<", "DESC"),
        };
        let bound = match after {
            Some(_) => format!(" AND sort_order {} ?2", cmp),
            None => String::new(),
        };
        let sql = format!(
            "SELECT id, {scope}, sort_order FROM {table}
             WHERE {scope} = ?1{bound} AND status IN {statuses}
             ORDER BY sort_order {dir}, id ASC LIMIT 1",
            scope = scope_column,
            table = table,
            bound = bound,
            statuses = statuses,
            dir = dir,
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare adjacent lookup")?;
        let found = match after {
            Some(order) => stmt.query_row(params![scope_id, order], position_from_row),
            None => stmt.query_row(params![scope_id], position_from_row),
        };
        found
            .optional()
            .with_context(|| format!("Failed to query adjacent {}", table))
    }

    // ── Completion ────────────────────────────────────────────────────

    pub fn is_lesson_complete(&self, user_id: &str, lesson_id: i64) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM user_lesson_complete WHERE user_id = ?1 AND lesson_id = ?2",
                params![user_id, lesson_id],
                |row| row.get(0),
            )
            .context("Failed to query lesson completion")
    }

    pub fn set_lesson_complete(&self, user_id: &str, lesson_id: i64, complete: bool) -> Result<()> {
        if complete {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO user_lesson_complete (user_id, lesson_id) VALUES (?1, ?2)",
                    params![user_id, lesson_id],
                )
                .context("Failed to mark lesson complete")?;
        } else {
            self.conn
                .execute(
                    "DELETE FROM user_lesson_complete WHERE user_id = ?1 AND lesson_id = ?2",
                    params![user_id, lesson_id],
                )
                .context("Failed to mark lesson incomplete")?;
        }
        Ok(())
    }

    // ── Course access ─────────────────────────────────────────────────

    pub fn has_course_access(&self, user_id: &str, course_id: i64) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM user_course_access WHERE user_id = ?1 AND course_id = ?2",
                params![user_id, course_id],
                |row| row.get(0),
            )
            .context("Failed to query course access")
    }

    /// True when the user holds access to the course containing the lesson,
    /// and both the lesson and its section are traversable.
    pub fn has_lesson_access(&self, user_id: &str, lesson_id: i64) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) > 0 FROM user_course_access a
             JOIN course_sections s ON s.course_id = a.course_id AND s.status IN {}
             JOIN lessons l ON l.section_id = s.id AND l.status IN {}
             WHERE l.id = ?1 AND a.user_id = ?2",
            traversable_section_sql(),
            traversable_lesson_sql()
        );
        self.conn
            .query_row(&sql, params![lesson_id, user_id], |row| row.get(0))
            .context("Failed to query lesson access")
    }

    // ── Products ──────────────────────────────────────────────────────

    pub fn create_product(&self, input: &ProductInput) -> Result<Product> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO products (name, description, image_url, price_in_dollars, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                input.name,
                input.description,
                input.image_url,
                input.price_in_dollars,
                input.status.as_str()
            ],
        )
        .context("Failed to insert product")?;
        let id = tx.last_insert_rowid();
        for course_id in &input.course_ids {
            tx.execute(
                "INSERT OR IGNORE INTO course_products (course_id, product_id) VALUES (?1, ?2)",
                params![course_id, id],
            )
            .context("Failed to link product course")?;
        }
        tx.commit().context("Failed to commit product insert")?;
        self.get_product(id)?.context("Product not found after insert")
    }

    pub fn update_product(&self, id: i64, input: &ProductInput) -> Result<Option<Product>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let count = tx
            .execute(
                "UPDATE products SET name = ?1, description = ?2, image_url = ?3, price_in_dollars = ?4,
                    status = ?5, updated_at = datetime('now')
                 WHERE id = ?6",
                params![
                    input.name,
                    input.description,
                    input.image_url,
                    input.price_in_dollars,
                    input.status.as_str(),
                    id
                ],
            )
            .context("Failed to update product")?;
        if count == 0 {
            return Ok(None);
        }
        tx.execute(
            "DELETE FROM course_products WHERE product_id = ?1",
            params![id],
        )
        .context("Failed to clear product courses")?;
        for course_id in &input.course_ids {
            tx.execute(
                "INSERT OR IGNORE INTO course_products (course_id, product_id) VALUES (?1, ?2)",
                params![course_id, id],
            )
            .context("Failed to link product course")?;
        }
        tx.commit().context("Failed to commit product update")?;
        self.get_product(id)
    }

    pub fn delete_product(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM products WHERE id = ?1", params![id])
            .context("Failed to delete product")?;
        Ok(count > 0)
    }

    fn product_course_ids(&self, product_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT course_id FROM course_products WHERE product_id = ?1 ORDER BY course_id")
            .context("Failed to prepare product_course_ids")?;
        let rows = stmt
            .query_map(params![product_id], |row| row.get(0))
            .context("Failed to query product courses")?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.context("Failed to read product course row")?);
        }
        Ok(ids)
    }

    fn query_products(&self, where_clause: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Product>> {
        let sql = format!(
            "SELECT {} FROM products {} ORDER BY name, id",
            PRODUCT_COLUMNS, where_clause
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare product query")?;
        let rows = stmt
            .query_map(args, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .context("Failed to query products")?;
        let mut raw = Vec::new();
        for row in rows {
            raw.push(row.context("Failed to read product row")?);
        }
        let mut products = Vec::with_capacity(raw.len());
        for (id, name, description, image_url, price_in_dollars, status, created_at, updated_at) in
            raw
        {
            let status = status
                .parse::<ProductStatus>()
                .map_err(|e| anyhow::anyhow!(e))?;
            products.push(Product {
                id,
                name,
                description,
                image_url,
                price_in_dollars,
                status,
                course_ids: self.product_course_ids(id)?,
                created_at,
                updated_at,
            });
        }
        Ok(products)
    }

    pub fn get_product(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.query_products("WHERE id = ?1", &[&id])?.into_iter().next())
    }

    pub fn get_public_product(&self, id: i64) -> Result<Option<Product>> {
        Ok(self
            .query_products("WHERE id = ?1 AND status = 'public'", &[&id])?
            .into_iter()
            .next())
    }

    pub fn list_public_products(&self) -> Result<Vec<Product>> {
        self.query_products("WHERE status = 'public'", &[])
    }

    pub fn list_products_admin(&self) -> Result<Vec<AdminProductSummary>> {
        let products = self.query_products("", &[])?;
        let mut summaries = Vec::with_capacity(products.len());
        for product in products {
            let customers_count: i64 = self
                .conn
                .query_row(
                    "SELECT COUNT(DISTINCT user_id) FROM purchases WHERE product_id = ?1 AND refunded_at IS NULL",
                    params![product.id],
                    |row| row.get(0),
                )
                .context("Failed to count product customers")?;
            summaries.push(AdminProductSummary {
                courses_count: product.course_ids.len() as i64,
                customers_count,
                product,
            });
        }
        Ok(summaries)
    }

    pub fn user_owns_product(&self, user_id: &str, product_id: i64) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM purchases WHERE user_id = ?1 AND product_id = ?2 AND refunded_at IS NULL",
                params![user_id, product_id],
                |row| row.get(0),
            )
            .context("Failed to query product ownership")
    }

    // ── Purchases ─────────────────────────────────────────────────────

    /// Fulfill a completed checkout: record the purchase with a product
    /// snapshot and grant access to every course the product contains.
    /// Only public products can be bought; a private or unknown product
    /// returns `None`.
    ///
    /// Returns the purchase and whether it was newly created; a replayed
    /// session id returns the existing purchase and changes nothing.
    pub fn record_purchase(&self, input: &PurchaseInput) -> Result<Option<(Purchase, bool)>> {
        if let Some(existing) = self.get_purchase_by_session(&input.stripe_session_id)? {
            return Ok(Some((existing, false)));
        }
        let Some(product) = self.get_public_product(input.product_id)? else {
            return Ok(None);
        };
        let details = serde_json::to_string(&ProductDetails {
            name: product.name.clone(),
            description: product.description.clone(),
            image_url: product.image_url.clone(),
        })
        .context("Failed to serialize product details")?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT OR IGNORE INTO users (id) VALUES (?1)",
            params![input.user_id],
        )
        .context("Failed to ensure purchasing user")?;
        tx.execute(
            "INSERT INTO purchases (user_id, product_id, price_paid_in_cents, product_details, stripe_session_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                input.user_id,
                product.id,
                input.price_paid_in_cents,
                details,
                input.stripe_session_id
            ],
        )
        .context("Failed to insert purchase")?;
        let id = tx.last_insert_rowid();
        for course_id in &product.course_ids {
            tx.execute(
                "INSERT OR IGNORE INTO user_course_access (user_id, course_id) VALUES (?1, ?2)",
                params![input.user_id, course_id],
            )
            .context("Failed to grant course access")?;
        }
        tx.commit().context("Failed to commit purchase")?;

        let purchase = self
            .get_purchase(id)?
            .context("Purchase not found after insert")?;
        Ok(Some((purchase, true)))
    }

    pub fn get_purchase(&self, id: i64) -> Result<Option<Purchase>> {
        let sql = format!("SELECT {} FROM purchases WHERE id = ?1", PURCHASE_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], purchase_row)
            .optional()
            .context("Failed to query purchase")?;
        row.map(PurchaseRow::into_purchase).transpose()
    }

    fn get_purchase_by_session(&self, session_id: &str) -> Result<Option<Purchase>> {
        let sql = format!(
            "SELECT {} FROM purchases WHERE stripe_session_id = ?1",
            PURCHASE_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![session_id], purchase_row)
            .optional()
            .context("Failed to query purchase by session")?;
        row.map(PurchaseRow::into_purchase).transpose()
    }

    pub fn list_user_purchases(&self, user_id: &str) -> Result<Vec<Purchase>> {
        let sql = format!(
            "SELECT {} FROM purchases WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
            PURCHASE_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_user_purchases")?;
        let rows = stmt
            .query_map(params![user_id], purchase_row)
            .context("Failed to query purchases")?;
        let mut purchases = Vec::new();
        for row in rows {
            let r = row.context("Failed to read purchase row")?;
            purchases.push(r.into_purchase()?);
        }
        Ok(purchases)
    }

    pub fn list_sales(&self) -> Result<Vec<SaleRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.id, p.user_id, p.product_id, p.price_paid_in_cents, p.product_details,
                    p.stripe_session_id, p.refunded_at, p.created_at, NULLIF(u.name, '')
                 FROM purchases p LEFT JOIN users u ON u.id = p.user_id
                 ORDER BY p.created_at DESC, p.id DESC",
            )
            .context("Failed to prepare list_sales")?;
        let rows = stmt
            .query_map([], |row| Ok((purchase_row(row)?, row.get::<_, Option<String>>(8)?)))
            .context("Failed to query sales")?;
        let mut sales = Vec::new();
        for row in rows {
            let (r, user_name) = row.context("Failed to read sale row")?;
            sales.push(SaleRow {
                purchase: r.into_purchase()?,
                user_name,
            });
        }
        Ok(sales)
    }

    /// Mark a purchase refunded and revoke the course access it granted,
    /// except courses the user still holds through another live purchase.
    /// Returns `None` if the purchase is unknown or already refunded.
    pub fn refund_purchase(&self, id: i64) -> Result<Option<Purchase>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let count = tx
            .execute(
                "UPDATE purchases SET refunded_at = datetime('now') WHERE id = ?1 AND refunded_at IS NULL",
                params![id],
            )
            .context("Failed to refund purchase")?;
        if count == 0 {
            return Ok(None);
        }
        tx.execute(
            "DELETE FROM user_course_access
             WHERE user_id = (SELECT user_id FROM purchases WHERE id = ?1)
               AND course_id IN (
                   SELECT cp.course_id FROM course_products cp
                   JOIN purchases p ON p.product_id = cp.product_id
                   WHERE p.id = ?1
               )
               AND course_id NOT IN (
                   SELECT cp.course_id FROM course_products cp
                   JOIN purchases p ON p.product_id = cp.product_id
                   WHERE p.user_id = (SELECT user_id FROM purchases WHERE id = ?1)
                     AND p.refunded_at IS NULL
               )",
            params![id],
        )
        .context("Failed to revoke course access")?;
        tx.commit().context("Failed to commit refund")?;
        self.get_purchase(id)
    }

    // ── Dashboard ─────────────────────────────────────────────────────

    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        let sales = |refunded: bool| -> Result<(i64, i64, i64)> {
            let sql = format!(
                "SELECT COALESCE(SUM(price_paid_in_cents), 0), COUNT(*), COUNT(DISTINCT user_id)
                 FROM purchases WHERE refunded_at IS {}",
                if refunded { "NOT NULL" } else { "NULL" }
            );
            self.conn
                .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                .context("Failed to aggregate purchases")
        };
        let count = |sql: &str| -> Result<i64> {
            self.conn
                .query_row(sql, [], |row| row.get(0))
                .with_context(|| format!("Failed to run count: {}", sql))
        };

        let (net_cents, net_purchases, customers) = sales(false)?;
        let (refund_cents, refunded_purchases, _) = sales(true)?;
        let average_net_purchases_per_customer = if customers > 0 {
            net_purchases as f64 / customers as f64
        } else {
            0.0
        };

        Ok(DashboardStats {
            net_sales: net_cents as f64 / 100.0,
            total_refunds: refund_cents as f64 / 100.0,
            net_purchases,
            refunded_purchases,
            average_net_purchases_per_customer,
            total_students: count("SELECT COUNT(DISTINCT user_id) FROM user_course_access")?,
            total_products: count("SELECT COUNT(*) FROM products")?,
            total_courses: count("SELECT COUNT(*) FROM courses")?,
            total_sections: count("SELECT COUNT(*) FROM course_sections")?,
            total_lessons: count("SELECT COUNT(*) FROM lessons")?,
        })
    }
}

impl OrderedLookup for CourseDb {
    fn first_lesson(
        &self,
        section_id: i64,
        after: Option<i32>,
        direction: Direction,
    ) -> Result<Option<Position>> {
        self.nearest_position(
            "lessons",
            "section_id",
            &traversable_lesson_sql(),
            section_id,
            after,
            direction,
        )
    }

    fn first_section(
        &self,
        course_id: i64,
        after: Option<i32>,
        direction: Direction,
    ) -> Result<Option<Position>> {
        self.nearest_position(
            "course_sections",
            "course_id",
            &traversable_section_sql(),
            course_id,
            after,
            direction,
        )
    }

    fn section_position(&self, section_id: i64) -> Result<Option<Position>> {
        self.conn
            .query_row(
                "SELECT id, course_id, sort_order FROM course_sections WHERE id = ?1",
                params![section_id],
                position_from_row,
            )
            .optional()
            .context("Failed to query section position")
    }
}

impl From<&Lesson> for Position {
    fn from(lesson: &Lesson) -> Self {
        Position {
            id: lesson.id,
            scope_id: lesson.section_id,
            order: lesson.order,
        }
    }
}
