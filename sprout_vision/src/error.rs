use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the analysis side of the engine and its file hand-offs.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("frame is empty or unreadable")]
    InvalidFrame,
    #[error("image processing failed: {0}")]
    Processing(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl VisionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VisionError::Io { path: path.into(), source }
    }
}

/// Errors raised by the publish-only telemetry transport.
///
/// Every transport operation reports failure through this type instead of
/// panicking; the caller logs it and keeps processing frames.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("session is not connected")]
    NotConnected,
    #[error("could not resolve {host}:{port}")]
    Resolve { host: String, port: u16 },
    #[error("could not connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("broker refused the connection (return code {return_code})")]
    ConnackRejected { return_code: u8 },
    #[error("malformed CONNACK: {0:02X?}")]
    MalformedConnack(Vec<u8>),
    #[error("field of {len} bytes does not fit the packet encoding")]
    PayloadTooLarge { len: usize },
}
