//! Tower middleware for gRPC-over-HTTP/2 services and clients.
//!
//! # Responsibilities
//! - Derive the method identity from the request path and the context from
//!   request headers
//! - Answer rejections with trailers-only gRPC responses
//! - Track the response body so streamed calls report their terminal
//!   `grpc-status` trailer
//!
//! # Design Decisions
//! - Works on `http::Request`/`http::Response`, so the same layer wraps a
//!   server (axum/tonic router) or a client channel
//! - Responses whose head already carries the final status (trailers-only,
//!   or a non-2xx HTTP status) are recorded immediately
//! - A response carrying `x-guard-rejection` came from a stacked guard and is
//!   ignored by this guard's breaker
//! - Inner service errors are classified through `ClassifyError` for
//!   `BoxError` and passed through unchanged

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use tower::{BoxError, Layer, Service};

use crate::classify::status::{grpc_status, GRPC_STATUS};
use crate::classify::{CallStatus, ClassifyError, Code, Origin};
use crate::error::Rejection;
use crate::interceptor::{CallPermit, Guard};
use crate::key::CallKey;

/// Response header naming why the guard answered a call itself.
pub const REJECTION_HEADER: &str = "x-guard-rejection";

const GRPC_MESSAGE: &str = "grpc-message";
const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Applies a [`Guard`] to every request.
#[derive(Debug, Clone)]
pub struct GuardLayer {
    guard: Guard,
}

impl GuardLayer {
    pub fn new(guard: Guard) -> Self {
        Self { guard }
    }
}

impl<S> Layer<S> for GuardLayer {
    type Service = GuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GuardService {
            inner,
            guard: self.guard.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardService<S> {
    inner: S,
    guard: Guard,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for GuardService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    ResBody: Body + Send + 'static,
{
    type Response = Response<GuardBody<ResBody>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let permit = match self.guard.admit(req.uri().path(), req.headers()) {
            Ok(permit) => permit,
            Err(rejection) => {
                let response = rejection_response(&rejection);
                return Box::pin(async move { Ok::<_, BoxError>(response) });
            }
        };

        let deadline = permit.deadline();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let result = match deadline {
                Some(deadline) => match tokio::time::timeout(deadline, fut).await {
                    Ok(result) => result,
                    Err(_) => {
                        let key = permit.key().clone();
                        permit.complete(&CallStatus::deadline_exceeded());
                        return Ok(deadline_response(&key, deadline));
                    }
                },
                None => fut.await,
            };

            match result {
                Ok(response) => Ok(track(response, permit)),
                Err(e) => {
                    let e: BoxError = e.into();
                    permit.complete(&e.call_status());
                    Err(e)
                }
            }
        })
    }
}

fn track<B>(response: Response<B>, permit: CallPermit) -> Response<GuardBody<B>> {
    let (parts, body) = response.into_parts();

    let final_status = grpc_status(&parts.headers).is_some() || !parts.status.is_success();
    let body = if final_status {
        permit.complete(&head_status(parts.status, &parts.headers));
        GuardBody::new(body, None)
    } else {
        GuardBody::new(body, Some(permit))
    };

    Response::from_parts(parts, body)
}

/// Status carried by a response head. A rejection answered by another
/// guard further down the chain never counts against the callee.
fn head_status(status: StatusCode, headers: &HeaderMap) -> CallStatus {
    if headers.contains_key(REJECTION_HEADER) {
        let code = grpc_status(headers).unwrap_or(Code::Unavailable);
        return CallStatus::new(code, Origin::Guard);
    }
    CallStatus::from_http(status, headers)
}

fn rejection_response<B>(rejection: &Rejection) -> Response<GuardBody<B>> {
    let mut response = status_response(rejection.code(), &rejection.to_string());
    response.headers_mut().insert(
        HeaderName::from_static(REJECTION_HEADER),
        HeaderValue::from_static(rejection.reason().as_str()),
    );
    response
}

fn deadline_response<B>(key: &CallKey, deadline: Duration) -> Response<GuardBody<B>> {
    let message = format!("call for {key} exceeded its {deadline:?} deadline");
    status_response(Code::DeadlineExceeded, &message)
}

/// A trailers-only gRPC response.
fn status_response<B>(code: Code, message: &str) -> Response<GuardBody<B>> {
    let mut response = Response::new(GuardBody::empty());
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    headers.insert(
        HeaderName::from_static(GRPC_STATUS),
        HeaderValue::from(code.as_i32()),
    );
    if let Ok(message) = HeaderValue::from_str(message) {
        headers.insert(HeaderName::from_static(GRPC_MESSAGE), message);
    }
    response
}

/// Response body that reports the call's terminal status when it ends.
pub struct GuardBody<B> {
    inner: Option<Pin<Box<B>>>,
    permit: Option<CallPermit>,
}

impl<B> GuardBody<B> {
    fn new(inner: B, permit: Option<CallPermit>) -> Self {
        Self {
            inner: Some(Box::pin(inner)),
            permit,
        }
    }

    /// An empty body, used for responses the guard produces itself.
    pub fn empty() -> Self {
        Self {
            inner: None,
            permit: None,
        }
    }

    fn finish(&mut self, status: &CallStatus) {
        if let Some(permit) = self.permit.take() {
            permit.complete(status);
        }
    }
}

impl<B> Body for GuardBody<B>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match ready!(inner.as_mut().poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(trailers) = frame.trailers_ref() {
                    this.finish(&trailer_status(trailers));
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) => {
                let e: BoxError = e.into();
                this.finish(&CallStatus::callee(Code::Unavailable));
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.finish(&CallStatus::ok());
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.as_ref().map_or(true, |inner| inner.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        self.inner
            .as_ref()
            .map_or_else(|| SizeHint::with_exact(0), |inner| inner.size_hint())
    }
}

fn trailer_status(trailers: &HeaderMap) -> CallStatus {
    CallStatus::callee(grpc_status(trailers).unwrap_or(Code::Ok))
}
