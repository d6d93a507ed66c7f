use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backoff::ExponentialBackoff;
use crate::detector::FaceDetector;
use crate::dispatcher::AlertDispatcher;
use crate::errors::{Result, WorkerError};
use crate::frame_publisher::FfmpegFramePublisher;
use crate::frame_source::FfmpegFrameSource;
use crate::processor::FrameProcessor;
use crate::types::{Alert, DetectionResult};

/// End-to-end pipeline for a single camera stream: ingress subprocess,
/// per-frame processing and alerting, egress subprocess, and the retry loop
/// that keeps the pipeline alive across transient failures.
pub struct CameraWorker {
    camera_id: String,
    rtsp_url: String,
    output_url: String,
    ffmpeg_bin: String,
    fps: u32,
    processor: FrameProcessor,
    dispatcher: Arc<dyn AlertDispatcher>,
    backoff: ExponentialBackoff,
    running: AtomicBool,
    handle: Mutex<Option<WorkerHandle>>,
}

struct WorkerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl CameraWorker {
    pub fn new(
        camera_id: &str,
        rtsp_url: &str,
        output_url: &str,
        ffmpeg_bin: &str,
        fps: u32,
        detector: Arc<dyn FaceDetector>,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            rtsp_url: rtsp_url.to_string(),
            output_url: output_url.to_string(),
            ffmpeg_bin: ffmpeg_bin.to_string(),
            fps,
            processor: FrameProcessor::new(camera_id, detector),
            dispatcher,
            backoff: ExponentialBackoff {
                base: Duration::from_secs(1),
                max: Duration::from_secs(30),
                jitter: true,
            },
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Spawns the pipeline task under a child scope of `parent`. Starting an
    /// already-running worker is an error.
    pub async fn start(self: &Arc<Self>, parent: &CancellationToken) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WorkerError::already_running(&self.camera_id));
        }

        let token = parent.child_token();
        let worker = Arc::clone(self);
        let run_token = token.clone();
        let task = tokio::spawn(async move { worker.run(run_token).await });
        *self.handle.lock().await = Some(WorkerHandle { token, task });

        info!(camera_id = %self.camera_id, "camera worker started");
        Ok(())
    }

    /// Cancels the worker scope and waits for the pipeline task to exit and
    /// its subprocesses to be reaped. No-op when the worker is not running.
    pub async fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Some(WorkerHandle { token, task }) = self.handle.lock().await.take() {
            token.cancel();
            if let Err(err) = task.await {
                warn!(camera_id = %self.camera_id, "worker task ended abnormally: {err}");
            }
        }
        info!(camera_id = %self.camera_id, "camera worker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut attempt = 0u32;
        loop {
            match self.process_once(&token).await {
                Ok(()) => {
                    info!(camera_id = %self.camera_id, "camera stream ended");
                    return;
                }
                Err(WorkerError::Cancelled) => return,
                Err(err) => {
                    attempt += 1;
                    let delay = self.backoff.duration(attempt);
                    warn!(
                        camera_id = %self.camera_id,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "camera pipeline error, retrying"
                    );
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One pipeline attempt with a fresh source and publisher. Both are
    /// closed on every exit path.
    async fn process_once(&self, token: &CancellationToken) -> Result<()> {
        let attempt_scope = token.child_token();
        let _guard = attempt_scope.clone().drop_guard();

        let mut source = FfmpegFrameSource::spawn(
            &self.ffmpeg_bin,
            &self.rtsp_url,
            self.fps,
            &self.camera_id,
            attempt_scope.clone(),
        )?;
        let publisher = match FfmpegFramePublisher::spawn(
            &self.ffmpeg_bin,
            &self.output_url,
            self.fps,
            &self.camera_id,
            attempt_scope.clone(),
        ) {
            Ok(publisher) => publisher,
            Err(err) => {
                source.close().await;
                return Err(err);
            }
        };

        let result = self.pump(token, &mut source, &publisher).await;
        let exit = source.close().await;
        publisher.close().await;

        match result {
            // The frame channel closed at end of stream; a non-zero ffmpeg
            // exit still counts as a failed attempt.
            Ok(()) => match exit {
                Some(status) if !status.success() => {
                    Err(WorkerError::subprocess_exit("ingress ffmpeg", status))
                }
                _ => Ok(()),
            },
            other => other,
        }
    }

    async fn pump(
        &self,
        token: &CancellationToken,
        source: &mut FfmpegFrameSource,
        publisher: &FfmpegFramePublisher,
    ) -> Result<()> {
        let mut fps_counter = FpsCounter::new();
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(WorkerError::Cancelled),
                Some(err) = source.errors.recv() => return Err(err),
                frame = source.frames.recv() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    if let Some(annotated) = self.process_and_alert(&frame, &mut fps_counter).await {
                        publisher.publish(&annotated).await?;
                    }
                }
            }
        }
    }

    /// Runs the frame processor and fires an alert when faces were found.
    /// Processing failures skip the frame; dispatch failures are logged and
    /// do not disturb the pipeline.
    async fn process_and_alert(&self, frame: &Bytes, fps_counter: &mut FpsCounter) -> Option<Bytes> {
        let fps = fps_counter.next();
        let (annotated, detection) = match self.processor.process(frame, fps) {
            Ok(processed) => processed,
            Err(err) => {
                warn!(camera_id = %self.camera_id, error = %err, "frame processing failed, skipping frame");
                return None;
            }
        };

        if !detection.boxes.is_empty() {
            if let Err(err) = self.send_alert(&annotated, &detection).await {
                warn!(camera_id = %self.camera_id, error = %err, "alert dispatch failed");
            }
        }

        Some(annotated)
    }

    async fn send_alert(&self, frame: &[u8], detection: &DetectionResult) -> Result<()> {
        let alert = Alert {
            camera_id: self.camera_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            detections: detection.boxes.clone(),
            snapshot: B64.encode(frame),
            metadata: None,
        };
        self.dispatcher.dispatch(alert).await
    }
}

/// Frame-rate estimate over one-second windows, updated on every frame.
struct FpsCounter {
    count: u32,
    last_reset: Instant,
    fps: f64,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            count: 0,
            last_reset: Instant::now(),
            fps: 0.0,
        }
    }

    fn next(&mut self) -> f64 {
        self.count += 1;
        let elapsed = self.last_reset.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.last_reset = Instant::now();
        } else if self.fps == 0.0 && !elapsed.is_zero() {
            // Before the first full window closes, estimate from what we
            // have so the overlay is not stuck at zero.
            self.fps = self.count as f64 / elapsed.as_secs_f64();
        }
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::StubDetector;
    use crate::types::BoundingBox;
    use async_trait::async_trait;
    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};

    struct StaticDetector {
        boxes: Vec<BoundingBox>,
    }

    impl FaceDetector for StaticDetector {
        fn detect(&self, _img: &image::RgbaImage) -> Result<DetectionResult> {
            Ok(DetectionResult { boxes: self.boxes.clone() })
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        alerts: Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl AlertDispatcher for RecordingDispatcher {
        async fn dispatch(&self, alert: Alert) -> Result<()> {
            self.alerts.lock().await.push(alert);
            Ok(())
        }
    }

    fn test_jpeg() -> Bytes {
        let img = RgbImage::from_pixel(64, 48, Rgb([0, 0, 0]));
        let mut data = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut data, 90);
        encoder.encode_image(&img).unwrap();
        Bytes::from(data)
    }

    fn worker_with(
        detector: Arc<dyn FaceDetector>,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> CameraWorker {
        CameraWorker::new(
            "cam1",
            "rtsp://localhost/stream",
            "rtsp://localhost:8554/cam1",
            "true",
            15,
            detector,
            dispatcher,
        )
    }

    #[tokio::test]
    async fn detection_bearing_frame_fires_one_alert() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let detector = Arc::new(StaticDetector {
            boxes: vec![BoundingBox::new(0, 0, 10, 10, 9.0)],
        });
        let worker = worker_with(detector, dispatcher.clone());

        let mut fps_counter = FpsCounter::new();
        let annotated = worker
            .process_and_alert(&test_jpeg(), &mut fps_counter)
            .await
            .unwrap();
        assert!(!annotated.is_empty());

        let alerts = dispatcher.alerts.lock().await;
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.camera_id, "cam1");
        assert_eq!(alert.detections.len(), 1);
        assert_eq!(alert.detections[0], BoundingBox::new(0, 0, 10, 10, 9.0));
        assert!(!alert.snapshot.is_empty());
        let snapshot = B64.decode(&alert.snapshot).unwrap();
        assert_eq!(&snapshot[..2], &[0xFF, 0xD8]);
        assert!((chrono::Utc::now().timestamp() - alert.timestamp).abs() <= 2);
    }

    #[tokio::test]
    async fn detection_free_frame_dispatches_nothing() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let worker = worker_with(Arc::new(StubDetector), dispatcher.clone());

        let mut fps_counter = FpsCounter::new();
        let annotated = worker
            .process_and_alert(&test_jpeg(), &mut fps_counter)
            .await;
        assert!(annotated.is_some());
        assert!(dispatcher.alerts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn processing_failure_skips_frame() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let worker = worker_with(Arc::new(StubDetector), dispatcher.clone());

        let mut fps_counter = FpsCounter::new();
        let garbage = Bytes::from_static(b"definitely not a jpeg");
        assert!(worker.process_and_alert(&garbage, &mut fps_counter).await.is_none());
        assert!(dispatcher.alerts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_does_not_block_publishing() {
        struct FailingDispatcher;
        #[async_trait]
        impl AlertDispatcher for FailingDispatcher {
            async fn dispatch(&self, _alert: Alert) -> Result<()> {
                Err(WorkerError::alert_dispatch("backend down"))
            }
        }

        let detector = Arc::new(StaticDetector {
            boxes: vec![BoundingBox::new(0, 0, 10, 10, 1.0)],
        });
        let worker = worker_with(detector, Arc::new(FailingDispatcher));

        let mut fps_counter = FpsCounter::new();
        let annotated = worker.process_and_alert(&test_jpeg(), &mut fps_counter).await;
        assert!(annotated.is_some());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let worker = Arc::new(worker_with(
            Arc::new(StubDetector),
            Arc::new(RecordingDispatcher::default()),
        ));
        let token = CancellationToken::new();
        worker.start(&token).await.unwrap();
        let err = worker.start(&token).await.unwrap_err();
        assert!(matches!(err, WorkerError::AlreadyRunning { .. }));
        worker.stop().await;
    }

    #[tokio::test]
    async fn stop_on_idle_worker_is_noop() {
        let worker = worker_with(
            Arc::new(StubDetector),
            Arc::new(RecordingDispatcher::default()),
        );
        worker.stop().await;
        assert!(!worker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_survives_repeated_pipeline_failures() {
        let worker = Arc::new(CameraWorker::new(
            "cam1",
            "rtsp://localhost/stream",
            "rtsp://localhost:8554/cam1",
            "/nonexistent/ffmpeg",
            15,
            Arc::new(StubDetector),
            Arc::new(RecordingDispatcher::default()),
        ));
        let token = CancellationToken::new();
        worker.start(&token).await.unwrap();

        // Let several retry cycles elapse; the worker keeps retrying with
        // backoff instead of dying.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(worker.is_running());

        worker.stop().await;
        assert!(!worker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn fps_counter_measures_rate_over_a_second() {
        let mut counter = FpsCounter::new();
        let mut last = 0.0;
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(100)).await;
            last = counter.next();
        }
        assert!((last - 10.0).abs() < 0.5, "expected ~10 fps, got {last}");
    }

    #[tokio::test(start_paused = true)]
    async fn fps_counter_estimates_before_first_window() {
        let mut counter = FpsCounter::new();
        tokio::time::advance(Duration::from_millis(500)).await;
        let fps = counter.next();
        assert!(fps > 0.0, "expected opportunistic estimate, got {fps}");
    }
}
