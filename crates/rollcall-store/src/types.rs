use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown {kind} {value:?}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// Direction of an attendance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    In,
    Out,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }

    /// Status of the next event given the latest one today.
    pub fn next_after(last: Option<AttendanceStatus>) -> AttendanceStatus {
        match last {
            Some(Self::In) => Self::Out,
            _ => Self::In,
        }
    }
}

/// How an attendance event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Manual,
    FaceDetection,
    LiveRecognition,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::FaceDetection => "face_detection",
            Self::LiveRecognition => "live_recognition",
        }
    }
}

macro_rules! sql_text_enum {
    ($ty:ty, $kind:literal, [$($variant:path),+]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(if s == $variant.as_str() {
                    return Ok($variant);
                })+
                Err(ParseEnumError { kind: $kind, value: s.to_string() })
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: ParseEnumError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

sql_text_enum!(AttendanceStatus, "status", [AttendanceStatus::In, AttendanceStatus::Out]);
sql_text_enum!(
    DetectionMethod,
    "detection method",
    [
        DetectionMethod::Manual,
        DetectionMethod::FaceDetection,
        DetectionMethod::LiveRecognition
    ]
);

/// A registered student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    /// External student code, unique across the roster.
    pub student_id: String,
    pub email: Option<String>,
    pub photo_path: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Fields needed to register a student.
#[derive(Debug, Clone, Default)]
pub struct NewStudent {
    pub name: String,
    pub student_id: String,
    pub email: Option<String>,
    pub photo_path: Option<String>,
}

/// An attendance event joined with its student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    /// Row id of the student.
    pub student: i64,
    pub student_name: String,
    pub student_code: String,
    pub timestamp: NaiveDateTime,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub confidence_score: Option<f32>,
    pub detection_method: DetectionMethod,
}

/// Fields needed to record an attendance event.
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub student: i64,
    pub timestamp: NaiveDateTime,
    pub status: AttendanceStatus,
    pub confidence_score: Option<f32>,
    pub detection_method: DetectionMethod,
}

/// Filters for listing attendance records.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Case-insensitive substring of the student name.
    pub student_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub limit: Option<usize>,
}

/// Overview counts for the landing page.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub total_students: usize,
    pub today_attendance: usize,
    pub recent_attendance: Vec<AttendanceRecord>,
}

/// Result of a check-in/check-out toggle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToggleOutcome {
    pub status: AttendanceStatus,
    /// An event with the same status already exists inside the dedup window.
    pub already_marked: bool,
    pub record: Option<AttendanceRecord>,
}

/// Result of a once-per-day attendance mark.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DailyOutcome {
    Marked { record: AttendanceRecord },
    AlreadyMarked,
}
