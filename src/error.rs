//! Unified error type.
//!
//! Controllers, presenters and the dispatcher share one error type. Every
//! error carries an [`ErrorKind`]; the kind decides the HTTP status an error
//! response falls back to when nobody set one explicitly.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;

use thiserror::Error as ThisError;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error categories and their default status codes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    BadRequest,      // 400
    Unauthorized,    // 401
    NotFound,        // 404
    Conflict,        // 409
    InvalidArgument, // 422
    NotImplemented,  // 501
    Integration,     // 503
    NotModified,     // 304
    Internal,        // 500
}

impl ErrorKind {
    pub fn default_status(self) -> u16 {
        match self {
            Self::BadRequest      => 400,
            Self::Unauthorized    => 401,
            Self::NotFound        => 404,
            Self::Conflict        => 409,
            Self::InvalidArgument => 422,
            Self::NotImplemented  => 501,
            Self::Integration     => 503,
            Self::NotModified     => 304,
            Self::Internal        => 500,
        }
    }

    /// Message used when an error is raised with an empty one.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::BadRequest      => "Bad Request",
            Self::Unauthorized    => "Unauthorized",
            Self::NotFound        => "Not Found",
            Self::Conflict        => "Conflict",
            Self::InvalidArgument => "Invalid Argument",
            Self::NotImplemented  => "Not Implemented",
            Self::Integration     => "Integration Error",
            Self::NotModified     => "Not Modified",
            Self::Internal        => "Internal Server Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_message())
    }
}

/// Alias keeps thiserror from treating the field as a provided backtrace,
/// which requires the unstable `error_generic_member_access` feature.
type CapturedBacktrace = Backtrace;

/// The error type returned by tessera's fallible operations.
///
/// Raised inside a controller action it becomes an error response; raised
/// while routing it is logged and rendered at the application boundary.
#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: u16,
    field: Option<String>,
    reason: Option<String>,
    location: &'static Location<'static>,
    #[source]
    source: Option<BoxError>,
    trace: CapturedBacktrace,
}

impl Error {
    /// Creates an error of `kind`. An empty message is replaced by the kind's
    /// default message.
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.is_empty() {
            kind.default_message().to_owned()
        } else {
            message
        };
        Self {
            kind,
            message,
            status: 0,
            field: None,
            reason: None,
            location: Location::caller(),
            source: None,
            trace: Backtrace::capture(),
        }
    }

    #[track_caller]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    #[track_caller]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    #[track_caller]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[track_caller]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// A rejected input value. `field` names the offending request field.
    #[track_caller]
    pub fn invalid_argument(message: impl Into<String>, field: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::InvalidArgument, message);
        err.field = Some(field.into());
        err
    }

    #[track_caller]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, message)
    }

    #[track_caller]
    pub fn integration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integration, message)
    }

    #[track_caller]
    pub fn not_modified(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotModified, message)
    }

    #[track_caller]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Overrides the status code the kind would otherwise imply.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Attaches a machine-readable reason code (e.g. `"too_short"`).
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Explicitly assigned status, `0` when none was set.
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn default_status(&self) -> u16 {
        self.kind.default_status()
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Where the error was raised.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Diagnostic frames as `"file line"` strings, outermost first: the
    /// raise location, the source chain, then captured backtrace frames.
    pub fn traceback(&self) -> Vec<String> {
        let mut frames = vec![format!("{} {}", self.location.file(), self.location.line())];

        let mut source = self.source.as_deref().map(|s| s as &(dyn StdError + 'static));
        while let Some(err) = source {
            frames.push(format!("caused by: {err}"));
            source = err.source();
        }

        if self.trace.status() == BacktraceStatus::Captured {
            frames.extend(
                self.trace
                    .to_string()
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_owned),
            );
        }
        frames
    }

    #[track_caller]
    fn wrap(kind: ErrorKind, context: &str, source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self::new(kind, format!("{context}: {source}")).with_source(source)
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        Self::wrap(ErrorKind::Internal, "io", e)
    }
}

impl From<serde_json::Error> for Error {
    #[track_caller]
    fn from(e: serde_json::Error) -> Self {
        Self::wrap(ErrorKind::Internal, "json", e)
    }
}

impl From<handlebars::RenderError> for Error {
    #[track_caller]
    fn from(e: handlebars::RenderError) -> Self {
        Self::wrap(ErrorKind::Internal, "template rendering", e)
    }
}

impl From<handlebars::TemplateError> for Error {
    #[track_caller]
    fn from(e: handlebars::TemplateError) -> Self {
        Self::wrap(ErrorKind::Internal, "template parsing", e)
    }
}

impl From<dotenvy::Error> for Error {
    #[track_caller]
    fn from(e: dotenvy::Error) -> Self {
        Self::wrap(ErrorKind::Internal, "env file", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_documented_statuses() {
        let table = [
            (ErrorKind::BadRequest, 400),
            (ErrorKind::Unauthorized, 401),
            (ErrorKind::NotFound, 404),
            (ErrorKind::Conflict, 409),
            (ErrorKind::InvalidArgument, 422),
            (ErrorKind::NotImplemented, 501),
            (ErrorKind::Integration, 503),
            (ErrorKind::NotModified, 304),
            (ErrorKind::Internal, 500),
        ];
        for (kind, status) in table {
            assert_eq!(kind.default_status(), status, "{kind:?}");
        }
    }

    #[test]
    fn empty_message_falls_back_to_kind_message() {
        assert_eq!(Error::not_found("").to_string(), "Not Found");
        assert_eq!(Error::integration("").message(), "Integration Error");
        assert_eq!(Error::conflict("taken").message(), "taken");
    }

    #[test]
    fn explicit_status_is_kept_apart_from_default() {
        let err = Error::bad_request("nope");
        assert_eq!(err.status(), 0);
        assert_eq!(err.default_status(), 400);

        let err = err.with_status(418);
        assert_eq!(err.status(), 418);
        assert_eq!(err.default_status(), 400);
    }

    #[test]
    fn invalid_argument_carries_field_and_reason() {
        let err = Error::invalid_argument("too short", "password").with_reason("min_length");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.field(), Some("password"));
        assert_eq!(err.reason(), Some("min_length"));
    }

    #[test]
    fn traceback_starts_at_raise_location_and_follows_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.txt");
        let err = Error::from(io);
        let frames = err.traceback();

        assert!(frames[0].starts_with(file!()), "{frames:?}");
        assert!(frames.iter().any(|f| f == "caused by: missing.txt"), "{frames:?}");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
