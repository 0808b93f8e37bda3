//! Error types shared by the classifier training crates.

use thiserror::Error;

/// Main error type for classifier training.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested backbone name is not in the registry
    #[error("Unknown variant: {0}")]
    UnknownVariant(String),

    /// Structurally invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pretrained weights could not be fetched, decoded or matched
    #[error("Weight load error: {0}")]
    WeightLoad(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or processing error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Dataset layout error
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl From<burn::record::RecorderError> for Error {
    fn from(err: burn::record::RecorderError) -> Self {
        Error::WeightLoad(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::WeightLoad(err.to_string())
    }
}

/// Specialized Result type for classifier training operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownVariant("not_a_model".to_string());
        assert_eq!(err.to_string(), "Unknown variant: not_a_model");

        let err = Error::Config("warmup_epochs must be < epochs".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: warmup_epochs must be < epochs"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_recorder_error_is_weight_load() {
        let err: Error = burn::record::RecorderError::Unknown("bad record".to_string()).into();
        assert!(matches!(err, Error::WeightLoad(_)));
    }
}
