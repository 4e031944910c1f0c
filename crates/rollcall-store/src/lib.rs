//! rollcall-store — Student roster and attendance log backed by SQLite.

pub mod store;
pub mod types;

pub use store::{Store, StoreError};
pub use types::{
    AttendanceRecord, AttendanceStatus, DailyOutcome, Dashboard, DetectionMethod, NewAttendance,
    NewStudent, ParseEnumError, RecordFilter, Student, ToggleOutcome,
};
