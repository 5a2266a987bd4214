use crate::future::ResponseFuture;
use crate::negotiate::Stage;
use crate::policy::NegotiationContext;
use http::Request;
use http_body::Body;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that encodes HTTP response bodies.
///
/// Produced by both [`CompressionLayer`](crate::CompressionLayer) and
/// [`SdchLayer`](crate::SdchLayer); the layer decides how encodings are
/// chosen.
#[derive(Clone)]
pub struct CompressionService<S> {
    inner: S,
    stage: Stage,
}

impl<S> CompressionService<S> {
    pub(crate) fn new(inner: S, stage: Stage) -> Self {
        Self { inner, stage }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for CompressionService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionService")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CompressionService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
    ResBody: Body,
{
    type Response = http::Response<crate::body::CompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Capture what negotiation needs before the request moves on
        let ctx = NegotiationContext::from_request(&req);

        let inner = self.inner.call(req);

        ResponseFuture::new(inner, ctx, self.stage.clone())
    }
}
