//! Error types and result definitions for replication operations.
//!
//! [`SiphonError`] carries an [`ErrorKind`] classification, a static description, an
//! optional dynamic detail, an optional source error, and captured callsite/backtrace
//! metadata. Errors are usually created through the [`crate::siphon_error!`] and
//! [`crate::bail!`] macros.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for replication operations.
pub type SiphonResult<T> = Result<T, SiphonError>;

/// Categories of errors that can occur in the pipeline.
///
/// The kind determines how an error propagates: source-side kinds stay inside the
/// consumer/reconnect path, while destination-side kinds are fatal to the process.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source side.
    SourceConnectionFailed,
    SourceDecodeError,
    SourceIoError,

    // Destination side.
    DestinationConnectionFailed,
    DestinationQueryFailed,
    DestinationTableMissing,
    DestinationIoError,

    // Data handling.
    ConversionError,
    InvalidPosition,
    SerializationError,
    DeserializationError,

    // Setup and state.
    ConfigError,
    EncryptionError,
    AuthenticationError,
    InvalidState,

    // General.
    IoError,
    Unknown,
}

/// Main error type for replication operations.
#[derive(Debug, Clone)]
pub struct SiphonError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

impl SiphonError {
    /// Creates a [`SiphonError`] from its components, capturing the callsite.
    #[track_caller]
    pub fn new(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the dynamic detail, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the callsite location where the error was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Returns the captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        self.backtrace.as_ref()
    }

    /// Attaches an originating error and returns the modified instance.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }
}

impl PartialEq for SiphonError {
    fn eq(&self, other: &SiphonError) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for SiphonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.kind,
            self.description,
            self.location.file(),
            self.location.line(),
            self.location.column()
        )?;

        if let Some(detail) = self.detail.as_deref() {
            write!(f, "\n  Detail: {detail}")?;
        }

        Ok(())
    }
}

impl error::Error for SiphonError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Creates a [`SiphonError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for SiphonError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> SiphonError {
        SiphonError::new(kind, Cow::Borrowed(description), None, None)
    }
}

/// Creates a [`SiphonError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for SiphonError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, D)) -> SiphonError {
        SiphonError::new(kind, Cow::Borrowed(description), Some(detail.into()), None)
    }
}

impl From<std::io::Error> for SiphonError {
    #[track_caller]
    fn from(err: std::io::Error) -> SiphonError {
        let detail = err.to_string();
        SiphonError::new(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for SiphonError {
    #[track_caller]
    fn from(err: serde_json::Error) -> SiphonError {
        let kind = match err.classify() {
            serde_json::error::Category::Io => ErrorKind::IoError,
            _ => ErrorKind::DeserializationError,
        };

        let detail = err.to_string();
        SiphonError::new(
            kind,
            Cow::Borrowed("JSON handling failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<std::str::Utf8Error> for SiphonError {
    #[track_caller]
    fn from(err: std::str::Utf8Error) -> SiphonError {
        let detail = err.to_string();
        SiphonError::new(
            ErrorKind::ConversionError,
            Cow::Borrowed("UTF-8 conversion failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<std::num::ParseIntError> for SiphonError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> SiphonError {
        let detail = err.to_string();
        SiphonError::new(
            ErrorKind::ConversionError,
            Cow::Borrowed("Integer parsing failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<uuid::Error> for SiphonError {
    #[track_caller]
    fn from(err: uuid::Error) -> SiphonError {
        let detail = err.to_string();
        SiphonError::new(
            ErrorKind::InvalidPosition,
            Cow::Borrowed("Source instance id parsing failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`tokio_postgres::Error`] to [`SiphonError`] with an appropriate kind.
///
/// The mapping is SQLSTATE-driven so callers can distinguish connectivity problems
/// from query and constraint failures.
impl From<tokio_postgres::Error> for SiphonError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> SiphonError {
        use tokio_postgres::error::SqlState;

        let (kind, description) = match err.code() {
            Some(sqlstate) => match *sqlstate {
                SqlState::CONNECTION_EXCEPTION
                | SqlState::CONNECTION_DOES_NOT_EXIST
                | SqlState::CONNECTION_FAILURE
                | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
                | SqlState::TOO_MANY_CONNECTIONS => (
                    ErrorKind::DestinationConnectionFailed,
                    "warehouse connection failed",
                ),

                SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                    ErrorKind::AuthenticationError,
                    "warehouse authentication failed",
                ),

                SqlState::UNDEFINED_TABLE | SqlState::UNDEFINED_COLUMN | SqlState::UNDEFINED_SCHEMA => {
                    (ErrorKind::DestinationTableMissing, "warehouse object missing")
                }

                SqlState::DATA_EXCEPTION
                | SqlState::INVALID_TEXT_REPRESENTATION
                | SqlState::INVALID_DATETIME_FORMAT
                | SqlState::NUMERIC_VALUE_OUT_OF_RANGE => {
                    (ErrorKind::ConversionError, "warehouse data conversion failed")
                }

                SqlState::IO_ERROR | SqlState::DISK_FULL => {
                    (ErrorKind::DestinationIoError, "warehouse I/O error")
                }

                _ => (ErrorKind::DestinationQueryFailed, "warehouse query failed"),
            },
            // No SQL state means the failure happened below the protocol, i.e. the
            // connection itself.
            None => (
                ErrorKind::DestinationConnectionFailed,
                "warehouse connection failed",
            ),
        };

        let detail = err.to_string();
        SiphonError::new(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<rustls::Error> for SiphonError {
    #[track_caller]
    fn from(err: rustls::Error) -> SiphonError {
        let detail = err.to_string();
        SiphonError::new(
            ErrorKind::EncryptionError,
            Cow::Borrowed("TLS configuration failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_compare_by_kind() {
        let a = SiphonError::from((ErrorKind::ConfigError, "one"));
        let b = SiphonError::from((ErrorKind::ConfigError, "two", "detail"));
        let c = SiphonError::from((ErrorKind::InvalidState, "three"));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn detail_is_preserved() {
        let err = SiphonError::from((ErrorKind::InvalidPosition, "bad position", "id:x"));
        assert_eq!(err.detail(), Some("id:x"));
        assert_eq!(err.kind(), ErrorKind::InvalidPosition);
    }
}
