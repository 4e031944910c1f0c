use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rollcall_core::{FaceDetector, FaceMatcher, DEFAULT_ACCEPTANCE_THRESHOLD};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Show totals and the latest attendance events
    Dashboard,
    /// List registered students
    Students,
    /// Register a student, optionally with a reference photo
    Register {
        name: String,
        /// External student ID (must be unique)
        student_id: String,
        #[arg(short, long)]
        email: Option<String>,
        /// Reference photo (png, jpg, jpeg or gif)
        #[arg(short, long)]
        photo: Option<PathBuf>,
    },
    /// Mark today's attendance from a photo
    Mark { photo: PathBuf },
    /// Recognize a face and toggle check-in/check-out
    Recognize { photo: PathBuf },
    /// Report face regions found in a photo
    Detect { photo: PathBuf },
    /// List attendance records, newest first
    Records {
        /// Substring of the student name
        #[arg(short, long)]
        student: Option<String>,
        /// Day to show (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Delete a student with their records and photo
    Delete { id: i64 },
    /// Toggle a student's status without a photo
    Manual { id: i64 },
    /// Detect faces locally, without the daemon
    Check {
        image: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Compare two photos locally, without the daemon
    Compare {
        a: PathBuf,
        b: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// Haar cascade XML
    #[arg(long, env = "ROLLCALL_CASCADE_PATH")]
    cascade: Option<PathBuf>,
    /// Optional SSD face model (ONNX)
    #[arg(long, env = "ROLLCALL_DNN_MODEL_PATH")]
    dnn_model: Option<PathBuf>,
}

impl ModelArgs {
    fn load_detector(&self) -> Result<FaceDetector> {
        let model_dir = rollcall_core::default_model_dir();
        let cascade = self
            .cascade
            .clone()
            .unwrap_or_else(|| model_dir.join(rollcall_core::CASCADE_FILE_NAME));
        let dnn_model = match &self.dnn_model {
            Some(p) if p.as_os_str().is_empty() => None,
            Some(p) => Some(p.clone()),
            None => Some(model_dir.join(rollcall_core::DNN_MODEL_FILE_NAME)),
        };
        FaceDetector::load(&cascade, dnn_model.as_deref())
            .with_context(|| format!("failed to load cascade {}", cascade.display()))
    }
}

// `#[zbus::proxy]` generates `RollcallProxy` (async) and `RollcallProxyBlocking`.
#[zbus::proxy(
    interface = "io.rollcall.Attendance1",
    default_service = "io.rollcall.Attendance1",
    default_path = "/io/rollcall/Attendance1"
)]
trait Rollcall {
    async fn status(&self) -> zbus::Result<String>;
    async fn dashboard(&self) -> zbus::Result<String>;
    async fn list_students(&self) -> zbus::Result<String>;
    async fn register_student(
        &self,
        name: &str,
        student_id: &str,
        email: &str,
        photo_path: &str,
    ) -> zbus::Result<String>;
    async fn mark_attendance(&self, photo_path: &str) -> zbus::Result<String>;
    async fn recognize(&self, photo_path: &str) -> zbus::Result<String>;
    async fn detect_faces(&self, photo_path: &str) -> zbus::Result<String>;
    async fn records(&self, student_filter: &str, date_filter: &str) -> zbus::Result<String>;
    async fn delete_student(&self, id: i64) -> zbus::Result<String>;
    async fn manual_attendance(&self, id: i64) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let response = match cli.command {
        Commands::Check { image, models } => {
            let detector = models.load_detector()?;
            tracing::debug!(image = %image.display(), deep = detector.has_deep_detector(), "local face check");
            serde_json::json!({
                "has_face": detector.has_face_in_file(&image),
                "report": detector.detection_report_for_file(&image),
            })
            .to_string()
        }
        Commands::Compare { a, b, models } => {
            let detector = models.load_detector()?;
            tracing::debug!(a = %a.display(), b = %b.display(), "local comparison");
            let similarity = FaceMatcher::new(&detector).similarity_files(&a, &b);
            serde_json::json!({
                "similarity": similarity,
                "matched": similarity > DEFAULT_ACCEPTANCE_THRESHOLD,
            })
            .to_string()
        }
        command => {
            tracing::debug!(system_bus = cli.system, "connecting to rollcalld");
            let conn = if cli.system {
                zbus::Connection::system().await
            } else {
                zbus::Connection::session().await
            }
            .context("failed to connect to D-Bus")?;
            let proxy = RollcallProxy::new(&conn).await?;
            call_daemon(&proxy, command)
                .await
                .context("rollcalld request failed")?
        }
    };

    print_json(&response)
}

async fn call_daemon(proxy: &RollcallProxy<'_>, command: Commands) -> Result<String> {
    tracing::debug!(interface = "io.rollcall.Attendance1", "calling rollcalld");
    let reply = match command {
        Commands::Status => proxy.status().await?,
        Commands::Dashboard => proxy.dashboard().await?,
        Commands::Students => proxy.list_students().await?,
        Commands::Register {
            name,
            student_id,
            email,
            photo,
        } => {
            let photo = photo.as_deref().map(absolute).transpose()?;
            proxy
                .register_student(
                    &name,
                    &student_id,
                    email.as_deref().unwrap_or_default(),
                    photo.as_deref().unwrap_or_default(),
                )
                .await?
        }
        Commands::Mark { photo } => proxy.mark_attendance(&absolute(&photo)?).await?,
        Commands::Recognize { photo } => proxy.recognize(&absolute(&photo)?).await?,
        Commands::Detect { photo } => proxy.detect_faces(&absolute(&photo)?).await?,
        Commands::Records { student, date } => {
            proxy
                .records(
                    student.as_deref().unwrap_or_default(),
                    date.as_deref().unwrap_or_default(),
                )
                .await?
        }
        Commands::Delete { id } => proxy.delete_student(id).await?,
        Commands::Manual { id } => proxy.manual_attendance(id).await?,
        Commands::Check { .. } | Commands::Compare { .. } => {
            anyhow::bail!("local commands do not use the daemon")
        }
    };
    Ok(reply)
}

/// The daemon resolves paths on its own, so send absolute ones.
fn absolute(path: &Path) -> Result<String> {
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("cannot access {}", path.display()))?;
    Ok(path.to_string_lossy().into_owned())
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon sent invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
