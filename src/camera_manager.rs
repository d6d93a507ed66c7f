use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::camera_worker::CameraWorker;
use crate::config::Config;
use crate::detector::FaceDetector;
use crate::dispatcher::AlertDispatcher;
use crate::errors::{Result, WorkerError};

/// Registry of camera workers. All worker lifetimes are nested inside the
/// manager's cancellation scope.
pub struct CameraManager {
    token: CancellationToken,
    config: Arc<Config>,
    detector: Arc<dyn FaceDetector>,
    dispatcher: Arc<dyn AlertDispatcher>,
    workers: RwLock<HashMap<String, Arc<CameraWorker>>>,
}

impl CameraManager {
    pub fn new(
        config: Arc<Config>,
        detector: Arc<dyn FaceDetector>,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Self {
        Self {
            token: CancellationToken::new(),
            config,
            detector,
            dispatcher,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Starts processing for a configured camera.
    pub async fn start_camera(&self, camera_id: &str) -> Result<()> {
        let mut workers = self.workers.write().await;

        let camera = self
            .config
            .camera_configs
            .get(camera_id)
            .ok_or_else(|| WorkerError::unknown_camera(camera_id))?;
        if workers.contains_key(camera_id) {
            return Err(WorkerError::already_running(camera_id));
        }

        let output_url = egress_url(&self.config.mediamtx_url, camera_id);
        let worker = Arc::new(CameraWorker::new(
            camera_id,
            &camera.rtsp_url,
            &output_url,
            &self.config.ffmpeg_bin,
            self.config.processing_fps,
            Arc::clone(&self.detector),
            Arc::clone(&self.dispatcher),
        ));
        worker.start(&self.token).await?;
        workers.insert(camera_id.to_string(), worker);

        info!(camera_id = %camera_id, output_url = %output_url, "camera registered");
        Ok(())
    }

    /// Stops and deregisters a camera worker; no-op for unknown ids.
    pub async fn stop_camera(&self, camera_id: &str) {
        let removed = { self.workers.write().await.remove(camera_id) };
        if let Some(worker) = removed {
            // Await the teardown outside the registry lock.
            worker.stop().await;
        }
    }

    /// Snapshot of currently registered camera ids, in no particular order.
    pub async fn active_cameras(&self) -> Vec<String> {
        self.workers.read().await.keys().cloned().collect()
    }

    /// Cancels the manager scope and drains every worker. Idempotent.
    pub async fn shutdown(&self) {
        self.token.cancel();

        let drained: Vec<(String, Arc<CameraWorker>)> =
            { self.workers.write().await.drain().collect() };
        for (_, worker) in drained {
            worker.stop().await;
        }
        info!("camera manager shut down");
    }
}

/// Egress URL for a camera: the relay base with exactly one slash before the
/// camera id.
fn egress_url(mediamtx_url: &str, camera_id: &str) -> String {
    format!("{}/{}", mediamtx_url.trim_end_matches('/'), camera_id)
}
