use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod backoff;
mod camera_manager;
mod camera_worker;
mod config;
mod detector;
mod dispatcher;
mod errors;
mod frame_publisher;
mod frame_source;
mod mjpeg;
mod overlay;
mod processor;
mod types;

use camera_manager::CameraManager;
use config::Config;
use detector::{FaceDetector, StubDetector};
use dispatcher::{AlertDispatcher, HttpAlertDispatcher};
use errors::{Result, WorkerError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config.log_level)?;

    info!(
        app_env = %config.app_env,
        fps = config.processing_fps,
        cameras = config.camera_configs.len(),
        "starting rtsp-face-worker"
    );

    let detector: Arc<dyn FaceDetector> = Arc::new(StubDetector);
    let dispatcher: Arc<dyn AlertDispatcher> = Arc::new(HttpAlertDispatcher::new(
        &config.backend_base_url,
        &config.backend_alert_endpoint,
    ));

    let config = Arc::new(config);
    let manager = Arc::new(CameraManager::new(
        Arc::clone(&config),
        detector,
        dispatcher,
    ));

    for camera_id in config.camera_configs.keys() {
        if let Err(err) = manager.start_camera(camera_id).await {
            warn!(camera_id = %camera_id, error = %err, "failed to start camera");
        }
    }

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    api::serve(Arc::clone(&manager), &config.bind_address(), shutdown).await?;

    manager.shutdown().await;
    info!("worker exiting");
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = terminate.recv() => {}
                    }
                }
                Err(err) => {
                    warn!("failed to install SIGTERM handler: {err}");
                    let _ = ctrl_c.await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        shutdown.cancel();
    });
}

fn init_tracing(log_level: &str) -> Result<()> {
    // logrus level names, including its aliases, map onto tracing levels.
    let level = match log_level.to_lowercase().as_str() {
        "panic" | "fatal" | "error" => "error",
        "warn" | "warning" => "warn",
        "info" => "info",
        "debug" => "debug",
        other => {
            return Err(WorkerError::config(format!("unknown LOG_LEVEL: {other}")));
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("rtsp_face_worker={level},{level}"))
        .init();
    Ok(())
}
