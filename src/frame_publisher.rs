use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::{Result, WorkerError};
use crate::frame_source::forward_stderr;

/// Egress side of a camera pipeline: an ffmpeg child that encodes JPEG
/// frames written to its stdin into an RTSP stream for the media relay.
#[derive(Debug)]
pub struct FfmpegFramePublisher {
    inner: Arc<PublisherInner>,
}

#[derive(Debug)]
struct PublisherInner {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
}

impl FfmpegFramePublisher {
    pub fn spawn(
        ffmpeg_bin: &str,
        output_url: &str,
        fps: u32,
        camera_id: &str,
        token: CancellationToken,
    ) -> Result<Self> {
        let mut child = Command::new(ffmpeg_bin)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "mjpeg",
                "-r",
                &fps.to_string(),
                "-i",
                "pipe:0",
                "-an",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-tune",
                "zerolatency",
                "-f",
                "rtsp",
                "-rtsp_transport",
                "tcp",
                output_url,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::subprocess_start("egress ffmpeg", e))?;

        let stdin = child.stdin.take().ok_or_else(|| {
            WorkerError::subprocess_start("egress ffmpeg", std::io::Error::other("stdin not captured"))
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, camera_id.to_string(), "egress"));
        }

        let inner = Arc::new(PublisherInner {
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
        });

        // Lifetime watcher: release the subprocess when the owning scope
        // cancels, even if the owner never gets to call close.
        let watched = Arc::downgrade(&inner);
        tokio::spawn(async move {
            token.cancelled().await;
            if let Some(inner) = watched.upgrade() {
                inner.close().await;
            }
        });

        Ok(Self { inner })
    }

    /// Writes one JPEG frame to the subprocess stdin. Serialized internally;
    /// any failure is pipeline-fatal for the caller.
    pub async fn publish(&self, frame: &[u8]) -> Result<()> {
        let mut guard = self.inner.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            WorkerError::publish(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "publisher closed",
            ))
        })?;
        stdin.write_all(frame).await.map_err(WorkerError::publish)?;
        stdin.flush().await.map_err(WorkerError::publish)?;
        Ok(())
    }

    /// Closes stdin, kills the subprocess, and reaps it. Safe to call more
    /// than once.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

impl PublisherInner {
    async fn close(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
