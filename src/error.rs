use std::path::{Path, PathBuf};
use thiserror::Error;

/// Everything that can stop an export run.
///
/// Every variant that concerns a file names it, so a failed run can always be
/// retried by hand once the offending file is fixed or closed.
#[derive(Debug, Error)]
pub enum Board2PdfError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{capability} is required by this configuration but is not available. {hint}")]
    EngineUnavailable {
        capability: &'static str,
        hint: &'static str,
    },

    #[error("{function} failed on input file {} in {}", .file.display(), .dir.display())]
    Io {
        function: &'static str,
        file: PathBuf,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{function} failed on input file {}: {source}", .file.display())]
    Pdf {
        function: &'static str,
        file: PathBuf,
        #[source]
        source: lopdf::Error,
    },

    #[error("malformed content stream in {}: {context}", .file.display())]
    ContentStream { file: PathBuf, context: String },

    #[error("plotting layer {layer} failed: {message}")]
    HostPlot { layer: String, message: String },

    #[error("crop utility failed on {} (exit code {exit_code:?}): {stderr}", .file.display())]
    Crop {
        file: PathBuf,
        exit_code: Option<i32>,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, Board2PdfError>;

impl Board2PdfError {
    pub fn io(function: &'static str, path: &Path, source: std::io::Error) -> Self {
        let (file, dir) = split_path(path);
        Board2PdfError::Io {
            function,
            file,
            dir,
            source,
        }
    }

    pub fn pdf(function: &'static str, path: &Path, source: lopdf::Error) -> Self {
        Board2PdfError::Pdf {
            function,
            file: path.to_path_buf(),
            source,
        }
    }

    pub fn content_stream(path: &Path, context: impl Into<String>) -> Self {
        Board2PdfError::ContentStream {
            file: path.to_path_buf(),
            context: context.into(),
        }
    }

    /// Short category label used in status messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Board2PdfError::Config(_) => "ConfigError",
            Board2PdfError::EngineUnavailable { .. } => "EngineUnavailableError",
            Board2PdfError::Io { .. } | Board2PdfError::Pdf { .. } => "IOError",
            Board2PdfError::ContentStream { .. } => "ContentStreamError",
            Board2PdfError::HostPlot { .. } => "HostPlotError",
            Board2PdfError::Crop { .. } => "CropError",
        }
    }
}

fn split_path(path: &Path) -> (PathBuf, PathBuf) {
    let file = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| path.to_path_buf());
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    (file, dir)
}
