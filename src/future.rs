use crate::body::CompressionBody;
use crate::negotiate::{Stage, is_streaming};
use crate::policy::NegotiationContext;
use http::Response;
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Future for compression service responses.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        ctx: NegotiationContext,
        stage: Stage,
    }
}

impl<F> ResponseFuture<F> {
    pub(crate) fn new(inner: F, ctx: NegotiationContext, stage: Stage) -> Self {
        Self { inner, ctx, stage }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(response)) => {
                let response = wrap_response(response, this.ctx, this.stage);
                Poll::Ready(Ok(response))
            }
        }
    }
}

/// Negotiates on the response head and wraps the body accordingly.
fn wrap_response<B: Body>(
    response: Response<B>,
    ctx: &NegotiationContext,
    stage: &Stage,
) -> Response<CompressionBody<B>> {
    let (mut parts, body) = response.into_parts();
    let declared_len = body.size_hint().exact();

    let body = match stage.negotiate(ctx, &mut parts, declared_len) {
        Some(encoding) => {
            let always_flush = is_streaming(&parts.headers);
            CompressionBody::compressed(body, encoding.encoder, always_flush)
        }
        None => CompressionBody::passthrough(body),
    };

    Response::from_parts(parts, body)
}
