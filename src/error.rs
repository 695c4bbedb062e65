use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MemorError {
    #[error("invalid input file: {0}")]
    InvalidInput(String),

    #[error("required tool not found: {0}")]
    #[diagnostic(help("install the tool or place it in a `bin` directory next to the executable"))]
    Dependency(String),

    #[error("failed to parse export: {0}")]
    Parse(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("image processing failed: {0}")]
    ImageProcessing(String),

    #[error("video processing failed: {0}")]
    VideoProcessing(String),

    #[error("no decoder for {codec} video in {}", .path.display())]
    UnsupportedDecoder { codec: String, path: PathBuf },

    #[error("zip extraction failed: {0}")]
    ZipExtraction(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("coordinates out of range: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {}", .0.display())]
    ConfigRead(PathBuf),

    #[error("failed to parse config: {0}")]
    ConfigParse(String),
}
