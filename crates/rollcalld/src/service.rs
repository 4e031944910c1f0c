//! Attendance workflows: registration, photo marking, live recognition and
//! record queries, on top of the detector and the store.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use rollcall_core::{
    is_allowed_extension, DetectionReport, DetectorMode, FaceDetector, FaceMatcher, Reference,
};
use rollcall_store::{
    AttendanceStatus, DailyOutcome, Dashboard, DetectionMethod, NewStudent, RecordFilter,
    AttendanceRecord, Store, StoreError, Student, ToggleOutcome,
};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("no face detected in the photo")]
    NoFaceDetected,
    #[error("face not recognized")]
    NoMatch,
    #[error("a stored photo named {0:?} already exists")]
    PhotoExists(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("photo storage: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Errors caused by the caller's arguments rather than by the service.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::MissingField(_)
                | Self::UnsupportedFileType(_)
                | Self::InvalidDate(_)
                | Self::PhotoExists(_)
                | Self::Store(StoreError::DuplicateStudentId(_))
                | Self::Store(StoreError::StudentNotFound(_))
        )
    }
}

/// Tunables of the attendance workflows.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub upload_dir: PathBuf,
    pub match_threshold: f32,
    pub dedup_window: Duration,
    pub dashboard_recent: usize,
}

/// Result of marking attendance from a photo.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MarkOutcome {
    Marked { student: Student, confidence: f32 },
    AlreadyMarked { student: Student },
}

/// Response of a live recognition attempt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Recognition {
    pub recognized: bool,
    pub student_name: Option<String>,
    pub student_id: Option<String>,
    /// Similarity as a percentage, two decimals.
    pub confidence: Option<f64>,
    pub status: Option<AttendanceStatus>,
    pub already_marked: bool,
    pub message: String,
}

impl Recognition {
    fn rejected(message: &str) -> Self {
        Self {
            message: message.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub version: &'static str,
    pub detector_mode: &'static str,
    pub match_threshold: f32,
    pub dedup_window_secs: i64,
    pub students: usize,
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send>;

/// Owns the detector and the store; every workflow runs on one thread.
pub struct AttendanceService {
    detector: FaceDetector,
    store: Store,
    config: ServiceConfig,
    clock: Clock,
}

impl AttendanceService {
    pub fn new(detector: FaceDetector, store: Store, config: ServiceConfig) -> Self {
        Self {
            detector,
            store,
            config,
            clock: Box::new(|| Local::now().naive_local()),
        }
    }

    /// Replace the wall clock, for deterministic timestamps.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    pub fn status(&self) -> Result<ServiceStatus, ServiceError> {
        Ok(ServiceStatus {
            version: env!("CARGO_PKG_VERSION"),
            detector_mode: match self.detector.mode() {
                DetectorMode::CascadeOnly => "cascade_only",
                DetectorMode::CascadeWithDeepFallback(_) => "cascade_with_deep_fallback",
            },
            match_threshold: self.config.match_threshold,
            dedup_window_secs: self.config.dedup_window.num_seconds(),
            students: self.store.count_students()?,
        })
    }

    pub fn dashboard(&self) -> Result<Dashboard, ServiceError> {
        Ok(self
            .store
            .dashboard(self.now().date(), self.config.dashboard_recent)?)
    }

    pub fn students(&self) -> Result<Vec<Student>, ServiceError> {
        Ok(self.store.students()?)
    }

    /// Register a student, copying their photo into the upload directory.
    ///
    /// A photo without a detectable face is rejected and its copy removed.
    pub fn register_student(
        &self,
        name: &str,
        student_id: &str,
        email: Option<&str>,
        photo: Option<&Path>,
    ) -> Result<Student, ServiceError> {
        let name = name.trim();
        let student_id = student_id.trim();
        if name.is_empty() {
            return Err(ServiceError::MissingField("name"));
        }
        if student_id.is_empty() {
            return Err(ServiceError::MissingField("student_id"));
        }
        if self.store.student_by_code(student_id)?.is_some() {
            return Err(StoreError::DuplicateStudentId(student_id.to_string()).into());
        }

        let stored_photo = match photo {
            Some(source) => Some(self.store_photo(student_id, source)?),
            None => None,
        };

        let new = NewStudent {
            name: name.to_string(),
            student_id: student_id.to_string(),
            email: email.map(str::trim).filter(|e| !e.is_empty()).map(String::from),
            photo_path: stored_photo
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        };

        match self.store.add_student(&new, self.now()) {
            Ok(student) => Ok(student),
            Err(e) => {
                if let Some(path) = &stored_photo {
                    remove_photo(path);
                }
                Err(e.into())
            }
        }
    }

    /// Copy `source` into the upload directory and verify it shows a face.
    fn store_photo(&self, student_id: &str, source: &Path) -> Result<PathBuf, ServiceError> {
        if !is_allowed_extension(source) {
            return Err(ServiceError::UnsupportedFileType(source.display().to_string()));
        }
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let safe_name = secure_filename(&format!("{student_id}_{file_name}"));
        if safe_name.is_empty() {
            return Err(ServiceError::UnsupportedFileType(source.display().to_string()));
        }

        std::fs::create_dir_all(&self.config.upload_dir)?;
        let dest = self.config.upload_dir.join(&safe_name);
        let mut reader = File::open(source)?;
        // Distinct IDs can sanitize to the same name; never clobber a stored photo.
        let mut writer = match OpenOptions::new().write(true).create_new(true).open(&dest) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ServiceError::PhotoExists(safe_name));
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = std::io::copy(&mut reader, &mut writer) {
            drop(writer);
            remove_photo(&dest);
            return Err(e.into());
        }
        drop(writer);

        if !self.detector.has_face_in_file(&dest) {
            tracing::info!(student_id, photo = %source.display(), "registration photo has no face");
            remove_photo(&dest);
            return Err(ServiceError::NoFaceDetected);
        }
        Ok(dest)
    }

    /// Mark a check-in from a photo, at most once per student per day.
    pub fn mark_attendance(&self, photo: &Path) -> Result<MarkOutcome, ServiceError> {
        if !is_allowed_extension(photo) {
            return Err(ServiceError::UnsupportedFileType(photo.display().to_string()));
        }
        if !self.detector.has_face_in_file(photo) {
            return Err(ServiceError::NoFaceDetected);
        }

        let (student, similarity) = self.identify(photo)?.ok_or(ServiceError::NoMatch)?;

        let outcome = self.store.mark_once_per_day(
            student.id,
            self.now(),
            Some(similarity),
            DetectionMethod::FaceDetection,
        )?;
        Ok(match outcome {
            DailyOutcome::Marked { .. } => MarkOutcome::Marked {
                student,
                confidence: similarity,
            },
            DailyOutcome::AlreadyMarked => MarkOutcome::AlreadyMarked { student },
        })
    }

    /// Recognize a student and toggle their check-in/check-out status.
    pub fn recognize(&self, photo: &Path) -> Result<Recognition, ServiceError> {
        if !self.detector.has_face_in_file(photo) {
            return Ok(Recognition::rejected("No faces detected"));
        }
        let Some((student, similarity)) = self.identify(photo)? else {
            return Ok(Recognition::rejected(
                "Face detected but no matching student found",
            ));
        };

        let ToggleOutcome {
            status,
            already_marked,
            ..
        } = self.store.check_in_or_out(
            student.id,
            self.now(),
            Some(similarity),
            DetectionMethod::LiveRecognition,
            Some(self.config.dedup_window),
        )?;

        let message = if already_marked {
            format!("{} already checked {status} recently", student.name)
        } else {
            format!("{} checked {status}", student.name)
        };

        Ok(Recognition {
            recognized: true,
            student_name: Some(student.name),
            student_id: Some(student.student_id),
            confidence: Some(percent(similarity)),
            status: Some(status),
            already_marked,
            message,
        })
    }

    pub fn detect_faces(&self, photo: &Path) -> DetectionReport {
        self.detector.detection_report_for_file(photo)
    }

    pub fn records(
        &self,
        student_filter: Option<&str>,
        date_filter: Option<&str>,
    ) -> Result<Vec<AttendanceRecord>, ServiceError> {
        let date = date_filter.map(parse_date).transpose()?;
        Ok(self.store.records(&RecordFilter {
            student_name: student_filter.map(String::from),
            date,
            limit: None,
        })?)
    }

    /// Delete a student, their records and their stored photo.
    pub fn delete_student(&self, id: i64) -> Result<Student, ServiceError> {
        let student = self
            .store
            .delete_student(id)?
            .ok_or(StoreError::StudentNotFound(id))?;
        if let Some(photo) = &student.photo_path {
            remove_photo(Path::new(photo));
        }
        Ok(student)
    }

    /// Toggle a student's status without a photo.
    pub fn manual_attendance(&self, id: i64) -> Result<ToggleOutcome, ServiceError> {
        Ok(self
            .store
            .check_in_or_out(id, self.now(), None, DetectionMethod::Manual, None)?)
    }

    /// Best match among students whose photo is still on disk.
    fn identify(&self, query: &Path) -> Result<Option<(Student, f32)>, ServiceError> {
        let students: Vec<Student> = self
            .store
            .students_with_photos()?
            .into_iter()
            .filter(|s| s.photo_path.as_deref().is_some_and(|p| Path::new(p).exists()))
            .collect();

        let references: Vec<Reference> = students
            .iter()
            .filter_map(|s| {
                Some(Reference {
                    id: s.id,
                    label: s.name.clone(),
                    photo: PathBuf::from(s.photo_path.as_ref()?),
                })
            })
            .collect();

        let result = FaceMatcher::new(&self.detector).identify(
            query,
            &references,
            self.config.match_threshold,
        );
        tracing::info!(
            query = %query.display(),
            gallery = references.len(),
            matched = result.matched,
            similarity = result.similarity,
            "identification finished"
        );

        let matched = result
            .reference_id
            .filter(|_| result.matched)
            .and_then(|id| students.into_iter().find(|s| s.id == id));
        Ok(matched.map(|s| (s, result.similarity)))
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, ServiceError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ServiceError::InvalidDate(s.to_string()))
}

fn percent(similarity: f32) -> f64 {
    (similarity as f64 * 100.0 * 100.0).round() / 100.0
}

fn remove_photo(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove photo");
        }
    }
}

/// Reduce a file name to ASCII letters, digits, `_`, `.` and `-`.
///
/// Path separators and whitespace become `_`; leading and trailing dots and
/// underscores are stripped, so the result never escapes the upload directory.
pub fn secure_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter_map(|c| match c {
            '/' | '\\' => Some(' '),
            c if c.is_whitespace() => Some(' '),
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') => Some(c),
            _ => None,
        })
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use rollcall_core::HaarCascade;
    use tempfile::TempDir;

    const EDGE_CASCADE_XML: &str =
        include_str!("../../rollcall-core/testdata/edge_cascade.xml");

    /// Textured bright-over-dark block that the edge cascade reports as a face.
    fn face_image(seed: u32) -> DynamicImage {
        let img = RgbImage::from_fn(160, 160, |x, y| {
            if !(32..128).contains(&x) || !(32..128).contains(&y) {
                return Rgb([128, 128, 128]);
            }
            let texture = ((x * 7 + y * 13 + seed * 5) % 23) as u8;
            let v = if y < 80 { 200 + texture } else { 40 + texture };
            Rgb([v, v, v])
        });
        DynamicImage::ImageRgb8(img)
    }

    /// A different identity: narrower block, harder edge, darker background.
    fn other_face_image(seed: u32) -> DynamicImage {
        let img = RgbImage::from_fn(160, 160, |x, y| {
            if !(40..120).contains(&x) || !(26..133).contains(&y) {
                return Rgb([100, 100, 100]);
            }
            let texture = ((x * 11 + y * 3 + seed * 7) % 23) as u8;
            let v = if y < 79 { 232 + texture } else { texture };
            Rgb([v, v, v])
        });
        DynamicImage::ImageRgb8(img)
    }

    fn flat_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(160, 160, Rgb([128, 128, 128])))
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    struct Fixture {
        dir: TempDir,
        service: AttendanceService,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let cascade = HaarCascade::from_xml_str(EDGE_CASCADE_XML).unwrap();
            let config = ServiceConfig {
                upload_dir: dir.path().join("uploads"),
                match_threshold: rollcall_core::DEFAULT_ACCEPTANCE_THRESHOLD,
                dedup_window: Duration::minutes(5),
                dashboard_recent: 5,
            };
            let service = AttendanceService::new(
                FaceDetector::cascade_only(cascade),
                Store::open_in_memory().unwrap(),
                config,
            )
            .with_clock(noon);
            Self { dir, service }
        }

        fn photo(&self, name: &str, image: &DynamicImage) -> PathBuf {
            let path = self.dir.path().join(name);
            image.save(&path).unwrap();
            path
        }

        fn uploads(&self) -> Vec<PathBuf> {
            match std::fs::read_dir(self.dir.path().join("uploads")) {
                Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
                Err(_) => Vec::new(),
            }
        }

        fn register_ada(&self) -> Student {
            let photo = self.photo("ada photo.png", &face_image(1));
            self.service
                .register_student("Ada", "S001", Some("ada@example.edu"), Some(&photo))
                .unwrap()
        }
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("S001_my photo.png"), "S001_my_photo.png");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("S2_café.jpg"), "S2_caf.jpg");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn test_percent_rounds_to_two_decimals() {
        assert_eq!(percent(0.87654), 87.65);
        assert_eq!(percent(1.0), 100.0);
    }

    #[test]
    fn test_register_copies_photo() {
        let fx = Fixture::new();
        let student = fx.register_ada();

        let stored = PathBuf::from(student.photo_path.as_deref().unwrap());
        assert_eq!(stored, fx.dir.path().join("uploads/S001_ada_photo.png"));
        assert!(stored.exists());
        assert_eq!(student.email.as_deref(), Some("ada@example.edu"));
        assert_eq!(student.created_at, noon());
    }

    #[test]
    fn test_register_validation() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.service.register_student("  ", "S1", None, None),
            Err(ServiceError::MissingField("name"))
        ));
        assert!(matches!(
            fx.service.register_student("Ada", "", None, None),
            Err(ServiceError::MissingField("student_id"))
        ));

        let bmp = fx.dir.path().join("ada.bmp");
        let err = fx
            .service
            .register_student("Ada", "S1", None, Some(&bmp))
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedFileType(_)));
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_register_duplicate_id() {
        let fx = Fixture::new();
        fx.service.register_student("Ada", "S001", None, None).unwrap();
        let err = fx
            .service
            .register_student("Other", "S001", None, None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::DuplicateStudentId(_))));
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_register_rejects_photo_without_face() {
        let fx = Fixture::new();
        let photo = fx.photo("blank.png", &flat_image());
        let err = fx
            .service
            .register_student("Ada", "S001", None, Some(&photo))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoFaceDetected));
        assert!(!err.is_invalid_input());
        assert!(fx.uploads().is_empty());
        assert!(fx.service.students().unwrap().is_empty());
    }

    #[test]
    fn test_mark_attendance_once_per_day() {
        let fx = Fixture::new();
        let ada = fx.register_ada();
        let query = fx.photo("query.png", &face_image(1));

        match fx.service.mark_attendance(&query).unwrap() {
            MarkOutcome::Marked { student, confidence } => {
                assert_eq!(student.id, ada.id);
                assert!(confidence > 0.6);
            }
            other => panic!("expected a new mark, got {other:?}"),
        }
        assert!(matches!(
            fx.service.mark_attendance(&query).unwrap(),
            MarkOutcome::AlreadyMarked { .. }
        ));

        let records = fx.service.records(None, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].detection_method, DetectionMethod::FaceDetection);
        assert_eq!(records[0].status, AttendanceStatus::In);
    }

    #[test]
    fn test_mark_attendance_failures() {
        let fx = Fixture::new();
        let blank = fx.photo("blank.png", &flat_image());
        assert!(matches!(
            fx.service.mark_attendance(&blank),
            Err(ServiceError::NoFaceDetected)
        ));

        let txt = fx.dir.path().join("notes.txt");
        assert!(matches!(
            fx.service.mark_attendance(&txt),
            Err(ServiceError::UnsupportedFileType(_))
        ));

        // Nobody with a photo is registered.
        fx.service.register_student("Ada", "S001", None, None).unwrap();
        let query = fx.photo("query.png", &face_image(1));
        assert!(matches!(
            fx.service.mark_attendance(&query),
            Err(ServiceError::NoMatch)
        ));
    }

    #[test]
    fn test_mark_attendance_skips_missing_reference_photos() {
        let fx = Fixture::new();
        let ada = fx.register_ada();
        std::fs::remove_file(ada.photo_path.as_deref().unwrap()).unwrap();

        let query = fx.photo("query.png", &face_image(1));
        assert!(matches!(
            fx.service.mark_attendance(&query),
            Err(ServiceError::NoMatch)
        ));
    }

    #[test]
    fn test_recognize_toggles_and_dedups() {
        let fx = Fixture::new();
        fx.register_ada();
        let query = fx.photo("frame.png", &face_image(1));

        let first = fx.service.recognize(&query).unwrap();
        assert!(first.recognized);
        assert_eq!(first.student_name.as_deref(), Some("Ada"));
        assert_eq!(first.student_id.as_deref(), Some("S001"));
        assert_eq!(first.status, Some(AttendanceStatus::In));
        assert!(!first.already_marked);
        assert_eq!(first.message, "Ada checked in");
        assert!(first.confidence.unwrap() > 60.0);

        let second = fx.service.recognize(&query).unwrap();
        assert_eq!(second.status, Some(AttendanceStatus::Out));
        assert_eq!(second.message, "Ada checked out");

        // Toggling back to `in` within five minutes of the first check-in.
        let third = fx.service.recognize(&query).unwrap();
        assert_eq!(third.status, Some(AttendanceStatus::In));
        assert!(third.already_marked);
        assert_eq!(third.message, "Ada already checked in recently");

        let records = fx.service.records(Some("ada"), Some("2026-03-02")).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.detection_method == DetectionMethod::LiveRecognition));
    }

    #[test]
    fn test_recognize_rejections() {
        let fx = Fixture::new();
        let blank = fx.photo("blank.png", &flat_image());
        let none = fx.service.recognize(&blank).unwrap();
        assert!(!none.recognized);
        assert_eq!(none.message, "No faces detected");

        let query = fx.photo("frame.png", &face_image(1));
        let unknown = fx.service.recognize(&query).unwrap();
        assert!(!unknown.recognized);
        assert_eq!(unknown.message, "Face detected but no matching student found");
        assert!(unknown.student_name.is_none());
    }

    #[test]
    fn test_detect_faces_report() {
        let fx = Fixture::new();
        let face = fx.photo("face.png", &face_image(3));
        let report = fx.service.detect_faces(&face);
        assert!(report.success);
        assert_eq!(report.total_faces, report.faces.len());

        let missing = fx.service.detect_faces(&fx.dir.path().join("missing.png"));
        assert!(!missing.success);
        assert_eq!(missing.error.as_deref(), Some("Could not read image"));
    }

    #[test]
    fn test_records_invalid_date() {
        let fx = Fixture::new();
        let err = fx.service.records(None, Some("02/03/2026")).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidDate(_)));
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_delete_student_removes_photo() {
        let fx = Fixture::new();
        let ada = fx.register_ada();
        fx.service.manual_attendance(ada.id).unwrap();

        let deleted = fx.service.delete_student(ada.id).unwrap();
        assert_eq!(deleted.id, ada.id);
        assert!(fx.uploads().is_empty());
        assert!(fx.service.records(None, None).unwrap().is_empty());

        assert!(matches!(
            fx.service.delete_student(ada.id),
            Err(ServiceError::Store(StoreError::StudentNotFound(_)))
        ));
    }

    #[test]
    fn test_manual_attendance_toggles_without_confidence() {
        let fx = Fixture::new();
        let ada = fx.service.register_student("Ada", "S001", None, None).unwrap();

        let first = fx.service.manual_attendance(ada.id).unwrap();
        assert_eq!(first.status, AttendanceStatus::In);
        let record = first.record.unwrap();
        assert_eq!(record.detection_method, DetectionMethod::Manual);
        assert_eq!(record.confidence_score, None);

        let second = fx.service.manual_attendance(ada.id).unwrap();
        assert_eq!(second.status, AttendanceStatus::Out);
        assert!(!second.already_marked);
    }

    #[test]
    fn test_dashboard_and_status() {
        let fx = Fixture::new();
        let ada = fx.register_ada();
        fx.service.manual_attendance(ada.id).unwrap();

        let dash = fx.service.dashboard().unwrap();
        assert_eq!(dash.total_students, 1);
        assert_eq!(dash.today_attendance, 1);
        assert_eq!(dash.recent_attendance.len(), 1);

        let status = fx.service.status().unwrap();
        assert_eq!(status.detector_mode, "cascade_only");
        assert_eq!(status.students, 1);
        assert_eq!(status.dedup_window_secs, 300);
    }

    #[test]
    fn test_register_refuses_to_overwrite_stored_photo() {
        let fx = Fixture::new();
        let photo = fx.photo("face.png", &face_image(1));
        let first = fx
            .service
            .register_student("Ada", "S 1", None, Some(&photo))
            .unwrap();
        let stored = PathBuf::from(first.photo_path.as_deref().unwrap());
        let before = std::fs::read(&stored).unwrap();

        // "S_1" sanitizes to the same stored name as "S 1".
        std::fs::create_dir(fx.dir.path().join("other")).unwrap();
        let blank = fx.photo("other/face.png", &flat_image());
        let err = fx
            .service
            .register_student("Grace", "S_1", None, Some(&blank))
            .unwrap_err();
        assert!(matches!(err, ServiceError::PhotoExists(ref name) if name == "S_1_face.png"));
        assert!(err.is_invalid_input());

        assert_eq!(std::fs::read(&stored).unwrap(), before);
        assert_eq!(fx.service.students().unwrap().len(), 1);
    }

    #[test]
    fn test_mark_attendance_tells_students_apart() {
        let fx = Fixture::new();
        let ada = fx.register_ada();
        let grace_photo = fx.photo("grace.png", &other_face_image(1));
        let grace = fx
            .service
            .register_student("Grace", "S002", None, Some(&grace_photo))
            .unwrap();

        let query = fx.photo("query-grace.png", &other_face_image(1));
        match fx.service.mark_attendance(&query).unwrap() {
            MarkOutcome::Marked { student, .. } => assert_eq!(student.id, grace.id),
            other => panic!("expected Grace to be marked, got {other:?}"),
        }

        let query = fx.photo("query-ada.png", &face_image(2));
        let recognition = fx.service.recognize(&query).unwrap();
        assert!(recognition.recognized);
        assert_eq!(recognition.student_id.as_deref(), Some("S001"));

        let records = fx.service.records(None, None).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.student == ada.id));
        assert!(records.iter().any(|r| r.student == grace.id));
    }
}
