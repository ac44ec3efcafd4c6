use axum::http::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

use super::extract::request_meta;
use super::response::{decorate_allowed, denial_response};
use crate::core::{ClientIdentity, RateLimiter};
use crate::utils::create_request_span;

/// Applies admission control in front of the wrapped routes
#[derive(Clone)]
pub struct AdmissionLayer {
    limiter: Arc<RateLimiter>,
}

impl AdmissionLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

/// Service produced by [`AdmissionLayer`].
///
/// Denied requests are answered directly and never reach the inner service.
/// Admitted requests run inside a span carrying a fresh request id, and any
/// 4xx or 5xx they produce is reported back to the limiter as a failure.
#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S, B> Service<Request<B>> for AdmissionService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let limiter = Arc::clone(&self.limiter);
        // keep the instance that was polled ready
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let meta = request_meta(&req);
            let identity = ClientIdentity::from_meta(&meta);
            let request_id = Uuid::new_v4().to_string();
            let span = create_request_span(&request_id, identity.key());

            let decision =
                span.in_scope(|| limiter.check(&identity, meta.role(), &meta.path, &meta));
            if !decision.allowed {
                return Ok(denial_response(&decision));
            }

            let mut response = inner.call(req).instrument(span).await?;
            let status = response.status();
            limiter.record_outcome(
                identity.key(),
                !(status.is_client_error() || status.is_server_error()),
            );
            decorate_allowed(response.headers_mut(), &decision, &request_id);
            Ok(response)
        })
    }
}
