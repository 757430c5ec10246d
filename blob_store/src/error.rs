//! Error types for blob store operations.

/// Result type for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// Object not found at the specified location.
    #[error("Blob not found: {uri}")]
    NotFound { uri: String },

    /// The destination bucket does not exist.
    #[error("Bucket does not exist: {bucket}")]
    NoSuchBucket { bucket: String },

    /// Bucket creation was rejected because the bucket is already there.
    #[error("Bucket already exists: {bucket}")]
    BucketAlreadyExists { bucket: String },

    /// Client configuration is unusable (missing credentials, bad endpoint).
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Network error talking to the object store.
    #[error("Network error: {source}")]
    NetworkError { source: anyhow::Error },

    /// Multipart upload error.
    #[error("Multipart upload error: {reason}")]
    MultipartError { reason: String },

    /// The body stream handed to an upload failed before it was exhausted.
    #[error("Upload body failed: {source}")]
    BodyError { source: anyhow::Error },

    /// Generic error.
    #[error("Blob store error: {source}")]
    Other { source: anyhow::Error },
}

impl BlobError {
    /// Wraps an error produced by the body stream of an upload.
    pub fn body(err: impl Into<anyhow::Error>) -> Self {
        BlobError::BodyError { source: err.into() }
    }

    /// Whether the error originated in the caller-supplied body rather than
    /// in the object store.
    pub fn is_body_error(&self) -> bool {
        matches!(self, BlobError::BodyError { .. })
    }
}

impl From<anyhow::Error> for BlobError {
    fn from(err: anyhow::Error) -> Self {
        BlobError::Other { source: err }
    }
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => BlobError::NotFound { uri: path },
            _ => BlobError::NetworkError {
                source: anyhow::Error::from(err),
            },
        }
    }
}

impl From<url::ParseError> for BlobError {
    fn from(err: url::ParseError) -> Self {
        BlobError::InvalidConfig {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_store_not_found_maps_to_not_found() {
        let err = object_store::Error::NotFound {
            path: "bucket/missing".to_string(),
            source: "gone".into(),
        };
        match BlobError::from(err) {
            BlobError::NotFound { uri } => assert_eq!(uri, "bucket/missing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_body_error_is_flagged() {
        let err = BlobError::body(anyhow::anyhow!("pipe closed"));
        assert!(err.is_body_error());
        assert!(err.to_string().contains("pipe closed"));
        assert!(!BlobError::NoSuchBucket {
            bucket: "b".to_string()
        }
        .is_body_error());
    }
}
