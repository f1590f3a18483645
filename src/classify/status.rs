//! Normalised call status.

use axum::http::{HeaderMap, StatusCode};

use crate::classify::Code;
use crate::error::{GuardError, Rejection};

/// Response header/trailer carrying the gRPC status.
pub const GRPC_STATUS: &str = "grpc-status";

/// Which side a status is attributable to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The calling side (cancellation, bad arguments it built).
    Caller,
    /// The remote side or the transport to it.
    Callee,
    /// This layer rejected the call.
    Guard,
}

/// Terminal status of a call, reduced to what the classifier needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallStatus {
    pub code: Code,
    pub origin: Origin,
}

impl CallStatus {
    pub fn new(code: Code, origin: Origin) -> Self {
        Self { code, origin }
    }

    pub fn ok() -> Self {
        Self::new(Code::Ok, Origin::Callee)
    }

    pub fn callee(code: Code) -> Self {
        Self::new(code, Origin::Callee)
    }

    pub fn caller(code: Code) -> Self {
        Self::new(code, Origin::Caller)
    }

    /// The caller abandoned the call.
    pub fn cancelled() -> Self {
        Self::caller(Code::Cancelled)
    }

    /// The call overran its deadline. Counted against the callee.
    pub fn deadline_exceeded() -> Self {
        Self::callee(Code::DeadlineExceeded)
    }

    /// Status of an HTTP response head.
    ///
    /// A `grpc-status` header (trailers-only response) wins over the HTTP
    /// status line.
    pub fn from_http(status: StatusCode, headers: &HeaderMap) -> Self {
        if let Some(code) = grpc_status(headers) {
            return Self::callee(code);
        }
        match code_for_http_status(status) {
            // 499: the client closed the request.
            Code::Cancelled => Self::cancelled(),
            code => Self::callee(code),
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.code, self.origin)
    }
}

impl std::error::Error for CallStatus {}

/// Parse the `grpc-status` entry of a header or trailer map.
pub fn grpc_status(headers: &HeaderMap) -> Option<Code> {
    headers
        .get(GRPC_STATUS)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i32>().ok())
        .map(Code::from_i32)
}

fn code_for_http_status(status: StatusCode) -> Code {
    match status.as_u16() {
        100..=399 => Code::Ok,
        400 => Code::InvalidArgument,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::NotFound,
        408 | 504 => Code::DeadlineExceeded,
        409 => Code::Aborted,
        429 => Code::ResourceExhausted,
        499 => Code::Cancelled,
        501 => Code::Unimplemented,
        502 | 503 => Code::Unavailable,
        500..=599 => Code::Internal,
        _ => Code::Unknown,
    }
}

/// Errors that can report the status of the call that produced them.
pub trait ClassifyError {
    fn call_status(&self) -> CallStatus;
}

impl ClassifyError for CallStatus {
    fn call_status(&self) -> CallStatus {
        *self
    }
}

impl ClassifyError for Rejection {
    fn call_status(&self) -> CallStatus {
        CallStatus::new(self.code(), Origin::Guard)
    }
}

impl<E: ClassifyError> ClassifyError for GuardError<E> {
    fn call_status(&self) -> CallStatus {
        match self {
            GuardError::Rejected(rejection) => rejection.call_status(),
            GuardError::DeadlineExceeded { .. } => CallStatus::deadline_exceeded(),
            GuardError::Call(inner) => inner.call_status(),
        }
    }
}

impl ClassifyError for std::io::Error {
    fn call_status(&self) -> CallStatus {
        use std::io::ErrorKind;
        match self.kind() {
            ErrorKind::TimedOut => CallStatus::deadline_exceeded(),
            ErrorKind::InvalidInput | ErrorKind::InvalidData => {
                CallStatus::caller(Code::InvalidArgument)
            }
            ErrorKind::Interrupted => CallStatus::cancelled(),
            _ => CallStatus::callee(Code::Unavailable),
        }
    }
}

impl ClassifyError for tower::BoxError {
    fn call_status(&self) -> CallStatus {
        if let Some(status) = self.downcast_ref::<CallStatus>() {
            return *status;
        }
        if let Some(rejection) = self.downcast_ref::<Rejection>() {
            return rejection.call_status();
        }
        if self.is::<tokio::time::error::Elapsed>() {
            return CallStatus::deadline_exceeded();
        }
        if let Some(io) = self.downcast_ref::<std::io::Error>() {
            return io.call_status();
        }
        CallStatus::callee(Code::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn grpc_status_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(GRPC_STATUS, HeaderValue::from_static("14"));

        let status = CallStatus::from_http(StatusCode::OK, &headers);
        assert_eq!(status, CallStatus::callee(Code::Unavailable));
    }

    #[test]
    fn http_status_mapping() {
        let empty = HeaderMap::new();
        let code = |s: u16| {
            CallStatus::from_http(StatusCode::from_u16(s).unwrap(), &empty).code
        };

        assert_eq!(code(200), Code::Ok);
        assert_eq!(code(400), Code::InvalidArgument);
        assert_eq!(code(429), Code::ResourceExhausted);
        assert_eq!(code(502), Code::Unavailable);
        assert_eq!(code(503), Code::Unavailable);
        assert_eq!(code(504), Code::DeadlineExceeded);
        assert_eq!(code(500), Code::Internal);
    }

    #[test]
    fn boxed_errors_are_classified() {
        let err: tower::BoxError = Box::new(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert_eq!(err.call_status(), CallStatus::callee(Code::Unavailable));

        let err: tower::BoxError = Box::new(Rejection::RateLimited { key: "k".into() });
        assert_eq!(err.call_status().origin, Origin::Guard);
    }
}
