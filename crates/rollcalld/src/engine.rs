use crate::config::Config;
use crate::service::AttendanceService;
use rollcall_core::FaceDetector;
use rollcall_store::Store;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("cascade error: {0}")]
    Cascade(#[from] rollcall_core::cascade::CascadeError),
    #[error("store error: {0}")]
    Store(#[from] rollcall_store::StoreError),
    #[error("failed to prepare data directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Work item executed on the engine thread.
type Job = Box<dyn FnOnce(&mut AttendanceService) + Send>;

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Job>,
}

impl EngineHandle {
    /// Run `op` against the service on the engine thread and await its result.
    pub async fn run<T, F>(&self, op: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut AttendanceService) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |service| {
            let _ = reply_tx.send(op(service));
        });
        self.tx
            .send(job)
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Load the detector and open the store from `config`, then start the engine.
///
/// Fails fast at startup if the cascade or the database is unavailable; a
/// missing deep model only downgrades detection.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let detector = FaceDetector::load(&config.cascade_path, config.dnn_model_path.as_deref())?;
    tracing::info!(
        cascade = %config.cascade_path.display(),
        deep = detector.has_deep_detector(),
        "face detector loaded"
    );

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.upload_dir)?;
    let store = Store::open(&config.db_path)?;

    let service = AttendanceService::new(detector, store, config.service_config());
    start(service)
}

/// Move `service` onto a dedicated OS thread and return a handle to it.
pub fn start(mut service: AttendanceService) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<Job>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(job) = rx.blocking_recv() {
                job(&mut service);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
