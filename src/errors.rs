use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("server error: {message}")]
    Server { message: String },

    #[error("camera {camera_id} is not configured")]
    UnknownCamera { camera_id: String },

    #[error("camera {camera_id} already running")]
    AlreadyRunning { camera_id: String },

    #[error("failed to start {process}: {source}")]
    SubprocessStart {
        process: &'static str,
        source: std::io::Error,
    },

    #[error("{process} exited with {status}")]
    SubprocessExit {
        process: &'static str,
        status: std::process::ExitStatus,
    },

    #[error("source read error: {source}")]
    SourceIo { source: std::io::Error },

    #[error("source stream ended mid-frame")]
    TruncatedFrame,

    #[error("publish frame: {source}")]
    Publish { source: std::io::Error },

    #[error("decode frame: {source}")]
    Decode { source: image::ImageError },

    #[error("encode frame: {source}")]
    Encode { source: image::ImageError },

    #[error("face detection failed: {message}")]
    Detect { message: String },

    #[error("alert dispatch failed: {message}")]
    AlertDispatch { message: String },

    #[error("cancelled")]
    Cancelled,
}

impl WorkerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::Server { message: message.into() }
    }

    pub fn unknown_camera(camera_id: impl Into<String>) -> Self {
        Self::UnknownCamera { camera_id: camera_id.into() }
    }

    pub fn already_running(camera_id: impl Into<String>) -> Self {
        Self::AlreadyRunning { camera_id: camera_id.into() }
    }

    pub fn subprocess_start(process: &'static str, source: std::io::Error) -> Self {
        Self::SubprocessStart { process, source }
    }

    pub fn subprocess_exit(process: &'static str, status: std::process::ExitStatus) -> Self {
        Self::SubprocessExit { process, status }
    }

    pub fn source_io(source: std::io::Error) -> Self {
        Self::SourceIo { source }
    }

    pub fn publish(source: std::io::Error) -> Self {
        Self::Publish { source }
    }

    pub fn decode(source: image::ImageError) -> Self {
        Self::Decode { source }
    }

    pub fn encode(source: image::ImageError) -> Self {
        Self::Encode { source }
    }

    pub fn detect(message: impl Into<String>) -> Self {
        Self::Detect { message: message.into() }
    }

    pub fn alert_dispatch(message: impl Into<String>) -> Self {
        Self::AlertDispatch { message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
