use crate::engine::EngineHandle;
use crate::service::{AttendanceService, ServiceError};
use serde::Serialize;
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "io.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/io/rollcall/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: io.rollcall.Attendance1
/// Object path: /io/rollcall/Attendance1
///
/// Every method answers with a JSON document. Empty string arguments stand
/// for absent optional values.
pub struct AttendanceInterface {
    engine: EngineHandle,
}

impl AttendanceInterface {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }

    async fn call<T, F>(&self, op: F) -> zbus::fdo::Result<String>
    where
        T: Serialize + Send + 'static,
        F: FnOnce(&mut AttendanceService) -> Result<T, ServiceError> + Send + 'static,
    {
        let value = self
            .engine
            .run(op)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?
            .map_err(to_fdo_error)?;
        serde_json::to_string(&value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}

#[interface(name = "io.rollcall.Attendance1")]
impl AttendanceInterface {
    /// Version, detector mode and threshold.
    async fn status(&self) -> zbus::fdo::Result<String> {
        self.call(|svc| svc.status()).await
    }

    /// Student count, today's event count and the latest events.
    async fn dashboard(&self) -> zbus::fdo::Result<String> {
        self.call(|svc| svc.dashboard()).await
    }

    async fn list_students(&self) -> zbus::fdo::Result<String> {
        self.call(|svc| svc.students()).await
    }

    /// Register a student; `photo_path` is copied into the upload directory.
    async fn register_student(
        &self,
        name: &str,
        student_id: &str,
        email: &str,
        photo_path: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(student_id, "register requested");
        let name = name.to_string();
        let student_id = student_id.to_string();
        let email = optional(email);
        let photo = optional(photo_path).map(PathBuf::from);
        self.call(move |svc| {
            svc.register_student(&name, &student_id, email.as_deref(), photo.as_deref())
        })
        .await
    }

    /// Mark a once-per-day check-in from a photo.
    async fn mark_attendance(&self, photo_path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(photo = photo_path, "mark attendance requested");
        let photo = PathBuf::from(photo_path);
        self.call(move |svc| svc.mark_attendance(&photo)).await
    }

    /// Recognize a face and toggle check-in/check-out.
    async fn recognize(&self, photo_path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(photo = photo_path, "recognize requested");
        let photo = PathBuf::from(photo_path);
        self.call(move |svc| svc.recognize(&photo)).await
    }

    async fn detect_faces(&self, photo_path: &str) -> zbus::fdo::Result<String> {
        let photo = PathBuf::from(photo_path);
        self.call(move |svc| Ok(svc.detect_faces(&photo))).await
    }

    async fn records(&self, student_filter: &str, date_filter: &str) -> zbus::fdo::Result<String> {
        let student = optional(student_filter);
        let date = optional(date_filter);
        self.call(move |svc| svc.records(student.as_deref(), date.as_deref()))
            .await
    }

    async fn delete_student(&self, id: i64) -> zbus::fdo::Result<String> {
        tracing::info!(id, "delete requested");
        self.call(move |svc| svc.delete_student(id)).await
    }

    /// Toggle a student's status without a photo.
    async fn manual_attendance(&self, id: i64) -> zbus::fdo::Result<String> {
        tracing::info!(id, "manual attendance requested");
        self.call(move |svc| svc.manual_attendance(id)).await
    }
}

fn optional(arg: &str) -> Option<String> {
    let arg = arg.trim();
    (!arg.is_empty()).then(|| arg.to_string())
}

/// Caller mistakes become `InvalidArgs`; everything else is `Failed`.
pub fn to_fdo_error(err: ServiceError) -> zbus::fdo::Error {
    if err.is_invalid_input() {
        tracing::info!(error = %err, "request rejected");
        zbus::fdo::Error::InvalidArgs(err.to_string())
    } else {
        tracing::warn!(error = %err, "request failed");
        zbus::fdo::Error::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_store::StoreError;

    #[test]
    fn test_optional_args() {
        assert_eq!(optional(""), None);
        assert_eq!(optional("   "), None);
        assert_eq!(optional(" Ada "), Some("Ada".to_string()));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            to_fdo_error(ServiceError::MissingField("name")),
            zbus::fdo::Error::InvalidArgs(_)
        ));
        assert!(matches!(
            to_fdo_error(ServiceError::Store(StoreError::StudentNotFound(7))),
            zbus::fdo::Error::InvalidArgs(_)
        ));
        match to_fdo_error(ServiceError::NoMatch) {
            zbus::fdo::Error::Failed(msg) => assert_eq!(msg, "face not recognized"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
