//! Centralized error types for the sandbar S3 emulator.

use http::StatusCode;

#[derive(Debug)]
pub enum SandbarError {
    MissingAuthorization,
    MalformedAuthorization(String),
    InvalidAccessKeyId(String),
    SignatureMismatch,
    RequestTimeTooSkewed,
    NoSuchKey(String),
    NoSuchUpload(String),
    InvalidRange(String),
    MissingContentLength,
    InvalidArgument(String),
    EntityTooLarge { size: u64, max: u64 },
    InvalidPath(String),
    MethodNotAllowed,
    Configuration(String),
    XmlSerialization(String),
    HttpResponse(String),
    Hyper(String),
    SerdeJson(serde_json::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for SandbarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandbarError::MissingAuthorization => f.write_str("Missing Authorization header"),
            SandbarError::MalformedAuthorization(msg) => {
                write!(f, "Malformed Authorization header: {}", msg)
            }
            SandbarError::InvalidAccessKeyId(key) => {
                write!(f, "Access key '{}' is not known to this server", key)
            }
            SandbarError::SignatureMismatch => f.write_str(
                "The request signature we calculated does not match the signature you provided",
            ),
            SandbarError::RequestTimeTooSkewed => f.write_str(
                "The difference between the request time and the server's time is too large",
            ),
            SandbarError::NoSuchKey(key) => {
                write!(f, "The specified key '{}' does not exist", key)
            }
            SandbarError::NoSuchUpload(upload_id) => {
                write!(f, "The specified upload '{}' does not exist", upload_id)
            }
            SandbarError::InvalidRange(msg) => {
                write!(f, "The requested range is not satisfiable: {}", msg)
            }
            SandbarError::MissingContentLength => {
                f.write_str("You must provide the Content-Length HTTP header")
            }
            SandbarError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            SandbarError::EntityTooLarge { size, max } => write!(
                f,
                "Proposed upload of {} bytes exceeds the maximum allowed object size of {} bytes",
                size, max
            ),
            SandbarError::InvalidPath(msg) => write!(f, "Invalid path: {}", msg),
            SandbarError::MethodNotAllowed => {
                f.write_str("The specified method is not allowed against this resource")
            }
            SandbarError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            SandbarError::XmlSerialization(msg) => write!(f, "XML serialization error: {}", msg),
            SandbarError::HttpResponse(msg) => write!(f, "HTTP response error: {}", msg),
            SandbarError::Hyper(msg) => write!(f, "Hyper HTTP error: {}", msg),
            SandbarError::SerdeJson(e) => write!(f, "Serde-JSON error: {}", e),
            SandbarError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for SandbarError {}

impl SandbarError {
    /// The S3 error code serialized into the XML error body.
    pub fn code(&self) -> &'static str {
        match self {
            SandbarError::MissingAuthorization => "AccessDenied",
            SandbarError::MalformedAuthorization(_) => "AuthorizationHeaderMalformed",
            SandbarError::InvalidAccessKeyId(_) => "InvalidAccessKeyId",
            SandbarError::SignatureMismatch => "SignatureDoesNotMatch",
            SandbarError::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            SandbarError::NoSuchKey(_) => "NoSuchKey",
            SandbarError::NoSuchUpload(_) => "NoSuchUpload",
            SandbarError::InvalidRange(_) => "InvalidRange",
            SandbarError::MissingContentLength => "MissingContentLength",
            SandbarError::InvalidArgument(_) => "InvalidArgument",
            SandbarError::EntityTooLarge { .. } => "EntityTooLarge",
            SandbarError::InvalidPath(_) => "InvalidArgument",
            SandbarError::MethodNotAllowed => "MethodNotAllowed",
            SandbarError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                "AccessDenied"
            }
            _ => "InternalError",
        }
    }

    /// The HTTP status the error is surfaced with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SandbarError::MissingAuthorization
            | SandbarError::InvalidAccessKeyId(_)
            | SandbarError::SignatureMismatch
            | SandbarError::RequestTimeTooSkewed => StatusCode::FORBIDDEN,
            SandbarError::MalformedAuthorization(_)
            | SandbarError::MissingContentLength
            | SandbarError::InvalidArgument(_)
            | SandbarError::EntityTooLarge { .. }
            | SandbarError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            SandbarError::NoSuchKey(_) | SandbarError::NoSuchUpload(_) => StatusCode::NOT_FOUND,
            SandbarError::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            SandbarError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for SandbarError {
    fn from(err: std::io::Error) -> Self {
        SandbarError::Io(err)
    }
}

impl From<serde_json::Error> for SandbarError {
    fn from(err: serde_json::Error) -> Self {
        SandbarError::SerdeJson(err)
    }
}

impl From<http::Error> for SandbarError {
    fn from(err: http::Error) -> Self {
        SandbarError::HttpResponse(err.to_string())
    }
}

impl From<hyper::Error> for SandbarError {
    fn from(err: hyper::Error) -> Self {
        SandbarError::Hyper(err.to_string())
    }
}

impl From<quick_xml::SeError> for SandbarError {
    fn from(err: quick_xml::SeError) -> Self {
        SandbarError::XmlSerialization(err.to_string())
    }
}

impl From<std::net::AddrParseError> for SandbarError {
    fn from(err: std::net::AddrParseError) -> Self {
        SandbarError::Configuration(err.to_string())
    }
}
