use crate::types::{
    AttendanceRecord, AttendanceStatus, Dashboard, DailyOutcome, DetectionMethod, NewAttendance,
    NewStudent, RecordFilter, Student, ToggleOutcome,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("student ID already exists: {0}")]
    DuplicateStudentId(String),
    #[error("student not found: {0}")]
    StudentNotFound(i64),
}

const RECORD_COLUMNS: &str = "a.id, a.student_id, s.name, s.student_id, a.timestamp, a.date, \
     a.status, a.confidence_score, a.detection_method";

/// SQLite-backed roster and attendance log.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        tracing::info!(path = %db_path.display(), "opened attendance store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS students (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              student_id TEXT NOT NULL UNIQUE,
              email TEXT,
              photo_path TEXT,
              created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS attendance (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              student_id INTEGER NOT NULL REFERENCES students(id) ON DELETE CASCADE,
              timestamp TEXT NOT NULL,
              date TEXT NOT NULL,
              status TEXT NOT NULL DEFAULT 'in',
              confidence_score REAL,
              detection_method TEXT NOT NULL DEFAULT 'face_detection'
            );

            CREATE INDEX IF NOT EXISTS idx_attendance_student_date ON attendance(student_id, date);
            CREATE INDEX IF NOT EXISTS idx_attendance_timestamp ON attendance(timestamp);
            "#,
        )?;
        Ok(())
    }

    // --- Students ---

    pub fn add_student(&self, new: &NewStudent, now: NaiveDateTime) -> Result<Student, StoreError> {
        if self.student_by_code(&new.student_id)?.is_some() {
            return Err(StoreError::DuplicateStudentId(new.student_id.clone()));
        }

        self.conn.execute(
            r#"
            INSERT INTO students(name, student_id, email, photo_path, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![new.name, new.student_id, new.email, new.photo_path, now],
        )?;

        let id = self.conn.last_insert_rowid();
        tracing::info!(id, student_id = %new.student_id, "student registered");
        self.student(id)?.ok_or(StoreError::StudentNotFound(id))
    }

    pub fn student(&self, id: i64) -> Result<Option<Student>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, student_id, email, photo_path, created_at FROM students WHERE id = ?1",
                params![id],
                student_from_row,
            )
            .optional()?)
    }

    /// Look up a student by external code.
    pub fn student_by_code(&self, code: &str) -> Result<Option<Student>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, student_id, email, photo_path, created_at FROM students WHERE student_id = ?1",
                params![code],
                student_from_row,
            )
            .optional()?)
    }

    pub fn students(&self) -> Result<Vec<Student>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, student_id, email, photo_path, created_at FROM students ORDER BY id",
        )?;
        let rows = stmt.query_map([], student_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn students_with_photos(&self) -> Result<Vec<Student>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, student_id, email, photo_path, created_at FROM students \
             WHERE photo_path IS NOT NULL ORDER BY id",
        )?;
        let rows = stmt.query_map([], student_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_students(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    /// Delete a student and, by cascade, their attendance records.
    pub fn delete_student(&self, id: i64) -> Result<Option<Student>, StoreError> {
        let Some(student) = self.student(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM students WHERE id = ?1", params![id])?;
        tracing::info!(id, student_id = %student.student_id, "student deleted");
        Ok(Some(student))
    }

    // --- Attendance ---

    pub fn record_attendance(&self, new: &NewAttendance) -> Result<AttendanceRecord, StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO attendance(student_id, timestamp, date, status, confidence_score, detection_method)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                new.student,
                new.timestamp,
                new.timestamp.date(),
                new.status,
                new.confidence_score,
                new.detection_method
            ],
        )?;
        let id = self.conn.last_insert_rowid();

        tracing::info!(
            id,
            student = new.student,
            status = %new.status,
            method = %new.detection_method,
            confidence = ?new.confidence_score,
            "attendance recorded"
        );

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance a JOIN students s ON s.id = a.student_id WHERE a.id = ?1"
        );
        Ok(self.conn.query_row(&sql, params![id], record_from_row)?)
    }

    /// Most recent event of `student` on `date`.
    pub fn last_attendance_on(
        &self,
        student: i64,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance a JOIN students s ON s.id = a.student_id \
             WHERE a.student_id = ?1 AND a.date = ?2 ORDER BY a.timestamp DESC, a.id DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![student, date], record_from_row)
            .optional()?)
    }

    /// Whether an event with `status` exists at or after `since`.
    pub fn has_status_since(
        &self,
        student: i64,
        status: AttendanceStatus,
        since: NaiveDateTime,
    ) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM attendance WHERE student_id = ?1 AND status = ?2 AND timestamp >= ?3 LIMIT 1",
                params![student, status, since],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn count_attendance_on(&self, date: NaiveDate) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE date = ?1",
            params![date],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    /// Attendance records matching `filter`, newest first.
    pub fn records(&self, filter: &RecordFilter) -> Result<Vec<AttendanceRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance a JOIN students s ON s.id = a.student_id \
             WHERE (?1 IS NULL OR s.name LIKE '%' || ?1 || '%') \
               AND (?2 IS NULL OR a.date = ?2) \
             ORDER BY a.timestamp DESC, a.id DESC LIMIT ?3"
        );
        let name = filter.student_name.as_deref().filter(|s| !s.is_empty());
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![name, filter.date, limit], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn dashboard(&self, today: NaiveDate, recent: usize) -> Result<Dashboard, StoreError> {
        Ok(Dashboard {
            total_students: self.count_students()?,
            today_attendance: self.count_attendance_on(today)?,
            recent_attendance: self.records(&RecordFilter {
                limit: Some(recent),
                ..RecordFilter::default()
            })?,
        })
    }

    // --- Workflows ---

    /// Record the opposite of today's latest status.
    ///
    /// With a `dedup_window`, nothing is recorded when an event with the new
    /// status already exists inside the window.
    pub fn check_in_or_out(
        &self,
        student: i64,
        now: NaiveDateTime,
        confidence_score: Option<f32>,
        detection_method: DetectionMethod,
        dedup_window: Option<Duration>,
    ) -> Result<ToggleOutcome, StoreError> {
        if self.student(student)?.is_none() {
            return Err(StoreError::StudentNotFound(student));
        }

        let last = self.last_attendance_on(student, now.date())?;
        let status = AttendanceStatus::next_after(last.map(|r| r.status));

        if let Some(window) = dedup_window {
            // Windows reaching past the calendar range cover all history.
            let since = now.checked_sub_signed(window).unwrap_or(NaiveDateTime::MIN);
            if self.has_status_since(student, status, since)? {
                tracing::info!(student, status = %status, "duplicate within dedup window; skipped");
                return Ok(ToggleOutcome {
                    status,
                    already_marked: true,
                    record: None,
                });
            }
        }

        let record = self.record_attendance(&NewAttendance {
            student,
            timestamp: now,
            status,
            confidence_score,
            detection_method,
        })?;
        Ok(ToggleOutcome {
            status,
            already_marked: false,
            record: Some(record),
        })
    }

    /// Record a check-in unless the student already has any event today.
    pub fn mark_once_per_day(
        &self,
        student: i64,
        now: NaiveDateTime,
        confidence_score: Option<f32>,
        detection_method: DetectionMethod,
    ) -> Result<DailyOutcome, StoreError> {
        if self.student(student)?.is_none() {
            return Err(StoreError::StudentNotFound(student));
        }
        if self.last_attendance_on(student, now.date())?.is_some() {
            return Ok(DailyOutcome::AlreadyMarked);
        }

        let record = self.record_attendance(&NewAttendance {
            student,
            timestamp: now,
            status: AttendanceStatus::In,
            confidence_score,
            detection_method,
        })?;
        Ok(DailyOutcome::Marked { record })
    }
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        student_id: row.get(2)?,
        email: row.get(3)?,
        photo_path: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get(0)?,
        student: row.get(1)?,
        student_name: row.get(2)?,
        student_code: row.get(3)?,
        timestamp: row.get(4)?,
        date: row.get(5)?,
        status: row.get(6)?,
        confidence_score: row.get(7)?,
        detection_method: row.get(8)?,
    })
}
