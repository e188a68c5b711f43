//! Error types module
//!
//! All terminal upload failures are unified under the `UploadError` enum.
//! Every failure resolves to exactly one of these kinds for the current
//! request; none are retried internally.

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like limit overruns
    Warn,
    /// Error level - for unexpected failures
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("upload file field name is invalid")]
    InvalidField,

    #[error("{0}")]
    FileInvalid(String),

    #[error("the file is too large")]
    FileTooLarge,

    #[error("only one file can be uploaded at once")]
    FileLimit,

    #[error("form contains too many parts")]
    PartsLimit,

    #[error("form contains too many fields")]
    FieldsLimit,

    #[error("file storage is currently unavailable")]
    StorageUnavailable,

    #[error("request is not a well-formed multipart/form-data submission")]
    ContentType,

    #[error("upload timed out")]
    Timeout,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Aborted(String),
}

impl UploadError {
    /// MIME type or extension failed the policy allow-lists.
    pub fn file_invalid() -> Self {
        UploadError::FileInvalid("unsupported file type".to_string())
    }

    /// The body ended without an accepted file field.
    pub fn missing_file() -> Self {
        UploadError::FileInvalid("please specify the file to upload".to_string())
    }

    /// Machine-readable error code for programmatic handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            UploadError::InvalidField => "INVALID_FIELD",
            UploadError::FileInvalid(_) => "FILE_INVALID",
            UploadError::FileTooLarge => "FILE_TOO_LARGE",
            UploadError::FileLimit => "FILE_LIMIT",
            UploadError::PartsLimit => "SIZE_LIMIT",
            UploadError::FieldsLimit => "FIELDS_LIMIT",
            UploadError::StorageUnavailable => "STORAGE_UNAVAILABLE",
            UploadError::ContentType => "CONTENT_TYPE",
            UploadError::Timeout => "TIMEOUT",
            UploadError::Storage(_) => "STORAGE_ERROR",
            UploadError::Aborted(_) => "ABORTED",
        }
    }

    /// HTTP status code to return.
    pub fn http_status_code(&self) -> u16 {
        match self {
            UploadError::InvalidField
            | UploadError::FileInvalid(_)
            | UploadError::FileLimit
            | UploadError::PartsLimit
            | UploadError::FieldsLimit
            | UploadError::Aborted(_) => 400,
            UploadError::FileTooLarge => 413,
            UploadError::ContentType => 415,
            UploadError::Timeout => 408,
            UploadError::StorageUnavailable => 503,
            UploadError::Storage(_) => 500,
        }
    }

    /// Log level for this error.
    pub fn log_level(&self) -> LogLevel {
        match self {
            UploadError::InvalidField
            | UploadError::FileInvalid(_)
            | UploadError::ContentType
            | UploadError::Aborted(_) => LogLevel::Debug,
            UploadError::FileTooLarge
            | UploadError::FileLimit
            | UploadError::PartsLimit
            | UploadError::FieldsLimit
            | UploadError::Timeout => LogLevel::Warn,
            UploadError::StorageUnavailable | UploadError::Storage(_) => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(UploadError::InvalidField.error_code(), "INVALID_FIELD");
        assert_eq!(UploadError::file_invalid().error_code(), "FILE_INVALID");
        assert_eq!(UploadError::missing_file().error_code(), "FILE_INVALID");
        assert_eq!(UploadError::PartsLimit.error_code(), "SIZE_LIMIT");
        assert_eq!(
            UploadError::Storage("disk full".to_string()).error_code(),
            "STORAGE_ERROR"
        );
    }

    #[test]
    fn test_file_too_large_maps_to_413() {
        assert_eq!(UploadError::FileTooLarge.http_status_code(), 413);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(UploadError::ContentType.http_status_code(), 415);
        assert_eq!(UploadError::StorageUnavailable.http_status_code(), 503);
        assert_eq!(UploadError::Timeout.http_status_code(), 408);
        assert_eq!(UploadError::InvalidField.http_status_code(), 400);
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(UploadError::file_invalid().log_level(), LogLevel::Debug);
        assert_eq!(UploadError::FileTooLarge.log_level(), LogLevel::Warn);
        assert_eq!(
            UploadError::Storage("boom".to_string()).log_level(),
            LogLevel::Error
        );
    }
}
