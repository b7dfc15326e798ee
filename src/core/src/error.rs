use std::fmt;

use thiserror::Error;

/// Scope a missing-priority-files report was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingScope {
    /// A single image (intersection over its layers).
    Image,
    /// An index (intersection over its child images).
    Index,
}

impl fmt::Display for MissingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Index => write!(f, "all images"),
        }
    }
}

/// a3s-stargz error types
#[derive(Error, Debug)]
pub enum OptimizeError {
    /// Image reference could not be parsed
    #[error("Invalid reference '{reference}': {message}")]
    ReferenceError { reference: String, message: String },

    /// Registry fetch failed
    #[error("Fetch failed: {reference} - {message}")]
    FetchError { reference: String, message: String },

    /// Manifest format the optimizer cannot handle (never retried)
    #[error("Unsupported manifest format: {0}")]
    UnsupportedFormat(String),

    /// Image config or layer content could not be read
    #[error("Image read error: {0}")]
    ImageReadError(String),

    /// Layer encoding engine failed
    #[error("Layer encoding failed: {0}")]
    LayerEncodingError(String),

    /// Some prioritized files were not found anywhere in the artifact
    #[error("the following prioritized files were missing from {scope}: {paths:?}")]
    MissingPriorityFiles {
        scope: MissingScope,
        paths: Vec<String>,
    },

    /// Registry publish failed
    #[error("Publish failed: {reference} - {message}")]
    PublishError { reference: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An error wrapped with the stage it happened in
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<OptimizeError>,
    },
}

impl OptimizeError {
    /// Wrap this error with a description of the failing stage.
    pub fn context(self, context: impl Into<String>) -> Self {
        OptimizeError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context layers.
    pub fn root(&self) -> &OptimizeError {
        match self {
            OptimizeError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Unsatisfied priority paths, if this is a missing-files error.
    pub fn missing_paths(&self) -> Option<&[String]> {
        match self.root() {
            OptimizeError::MissingPriorityFiles { paths, .. } => Some(paths),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for OptimizeError {
    fn from(err: serde_json::Error) -> Self {
        OptimizeError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for OptimizeError {
    fn from(err: serde_yaml::Error) -> Self {
        OptimizeError::SerializationError(err.to_string())
    }
}

/// Result type alias for a3s-stargz operations
pub type Result<T> = std::result::Result<T, OptimizeError>;

/// Attach stage context to a failing result.
pub trait ResultExt<T> {
    fn context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_priority_files_image_display() {
        let error = OptimizeError::MissingPriorityFiles {
            scope: MissingScope::Image,
            paths: vec!["/x".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "the following prioritized files were missing from image: [\"/x\"]"
        );
    }

    #[test]
    fn test_missing_priority_files_index_display() {
        let error = OptimizeError::MissingPriorityFiles {
            scope: MissingScope::Index,
            paths: vec!["/a".to_string(), "/b".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "the following prioritized files were missing from all images: [\"/a\", \"/b\"]"
        );
    }

    #[test]
    fn test_unsupported_format_display() {
        let error = OptimizeError::UnsupportedFormat("docker schema 1 images are not supported".into());
        assert_eq!(
            error.to_string(),
            "Unsupported manifest format: docker schema 1 images are not supported"
        );
    }

    #[test]
    fn test_context_display_chains() {
        let error = OptimizeError::ImageReadError("bad config".to_string())
            .context("reading image config")
            .context("failed to optimize image");
        assert_eq!(
            error.to_string(),
            "failed to optimize image: reading image config: Image read error: bad config"
        );
    }

    #[test]
    fn test_missing_paths_through_context() {
        let error = OptimizeError::MissingPriorityFiles {
            scope: MissingScope::Image,
            paths: vec!["/x".to_string()],
        }
        .context("failed to optimize image");
        assert_eq!(error.missing_paths(), Some(&["/x".to_string()][..]));
    }

    #[test]
    fn test_missing_paths_other_error() {
        let error = OptimizeError::ConfigError("nope".to_string());
        assert!(error.missing_paths().is_none());
    }

    #[test]
    fn test_result_ext_context() {
        let result: Result<()> = Err(OptimizeError::LayerEncodingError("boom".to_string()));
        let err = result.context(|| "encoding layer 2").unwrap_err();
        assert!(matches!(err.root(), OptimizeError::LayerEncodingError(_)));
        assert!(err.to_string().starts_with("encoding layer 2: "));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OptimizeError = io_error.into();
        assert!(matches!(err, OptimizeError::IoError(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: OptimizeError = json_err.into();
        assert!(matches!(err, OptimizeError::SerializationError(_)));
    }
}
