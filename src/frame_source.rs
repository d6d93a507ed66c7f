use std::process::Stdio;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::{Result, WorkerError};
use crate::mjpeg::MjpegFramer;

/// Ingress side of a camera pipeline: an ffmpeg child pulling the RTSP
/// stream and re-emitting it as MJPEG on stdout, sliced into JPEG frames.
///
/// The frame channel has capacity 1 with a non-blocking producer, so a slow
/// consumer always sees the freshest available frame and the just-read frame
/// is dropped under overload.
#[derive(Debug)]
pub struct FfmpegFrameSource {
    pub(crate) frames: mpsc::Receiver<Bytes>,
    pub(crate) errors: mpsc::Receiver<WorkerError>,
    child: Option<Child>,
}

impl FfmpegFrameSource {
    pub fn spawn(
        ffmpeg_bin: &str,
        rtsp_url: &str,
        fps: u32,
        camera_id: &str,
        token: CancellationToken,
    ) -> Result<Self> {
        let mut child = Command::new(ffmpeg_bin)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-rtsp_transport",
                "tcp",
                "-i",
                rtsp_url,
                "-an",
                "-vf",
                &format!("fps={fps}"),
                "-f",
                "mjpeg",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::subprocess_start("ingress ffmpeg", e))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            WorkerError::subprocess_start("ingress ffmpeg", std::io::Error::other("stdout not captured"))
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, camera_id.to_string(), "ingress"));
        }

        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(1);
        tokio::spawn(read_frames(BufReader::new(stdout), frame_tx, err_tx, token));

        Ok(Self {
            frames: frame_rx,
            errors: err_rx,
            child: Some(child),
        })
    }

    /// Kills and reaps the subprocess. Idempotent; the first call returns the
    /// child's exit status, later calls return `None`.
    pub async fn close(&mut self) -> Option<std::process::ExitStatus> {
        let mut child = self.child.take()?;
        let _ = child.start_kill();
        child.wait().await.ok()
    }
}

/// Pulls JPEGs off the framer and places them on the frame channel until
/// cancellation, end of stream, or a framer error (published best-effort to
/// the error channel). Closing both channels by returning signals the
/// consumer.
pub(crate) async fn read_frames<R: AsyncRead + Unpin>(
    reader: R,
    frames: mpsc::Sender<Bytes>,
    errors: mpsc::Sender<WorkerError>,
    token: CancellationToken,
) {
    let mut framer = MjpegFramer::new(reader);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            next = framer.next_frame() => match next {
                Ok(Some(frame)) => {
                    // Drop the just-read frame when the consumer is behind.
                    let _ = frames.try_send(frame);
                }
                Ok(None) => return,
                Err(err) => {
                    let _ = errors.try_send(err);
                    return;
                }
            }
        }
    }
}

pub(crate) async fn forward_stderr(stderr: ChildStderr, camera_id: String, stage: &'static str) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(camera_id = %camera_id, stage, "ffmpeg: {line}");
    }
}
