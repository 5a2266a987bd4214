use crate::dictionary::{DICTIONARY_CONTENT_TYPE, Dictionary};
use crate::index::DictionaryIndex;
use crate::range::ByteRange;
use bytes::{Buf, Bytes};
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body::{Body, Frame};
use http_body_util::Full;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::trace;

const ALLOWED_METHODS: &str = "GET, HEAD, OPTIONS";

/// A Tower layer that answers requests for published dictionaries.
#[derive(Debug, Clone)]
pub struct ServeDictionariesLayer {
    index: Arc<DictionaryIndex>,
}

impl ServeDictionariesLayer {
    /// Serves every dictionary in `index` at its URL.
    pub fn new(index: Arc<DictionaryIndex>) -> Self {
        Self { index }
    }
}

impl<S> Layer<S> for ServeDictionariesLayer {
    type Service = ServeDictionaries<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ServeDictionaries {
            inner,
            index: Arc::clone(&self.index),
        }
    }
}

/// A Tower service answering dictionary URLs and delegating everything else.
#[derive(Debug, Clone)]
pub struct ServeDictionaries<S> {
    inner: S,
    index: Arc<DictionaryIndex>,
}

impl<S> ServeDictionaries<S> {
    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ServeDictionaries<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = Response<DictionaryBody<ResBody>>;
    type Error = S::Error;
    type Future = ServeFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The query is part of the published URL.
        let target = req
            .uri()
            .path_and_query()
            .map_or_else(|| req.uri().path(), |pq| pq.as_str());

        match self.index.by_url(target) {
            Some(dictionary) => {
                trace!(url = dictionary.url(), method = %req.method(), "serving dictionary");
                ServeFuture::Dictionary {
                    response: Some(respond(dictionary, req.method(), req.headers())),
                }
            }
            None => ServeFuture::Inner {
                future: self.inner.call(req),
            },
        }
    }
}

/// Builds the response for a request addressed at `dictionary`.
fn respond(dictionary: &Dictionary, method: &Method, headers: &HeaderMap) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());

    if method != Method::GET && method != Method::HEAD {
        *response.status_mut() = if method == Method::OPTIONS {
            StatusCode::OK
        } else {
            StatusCode::METHOD_NOT_ALLOWED
        };
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        return response;
    }

    if matches_etag(headers.get(header::IF_NONE_MATCH), dictionary.etag()) {
        trace!(url = dictionary.url(), "dictionary not modified");
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        set_validators(response.headers_mut(), dictionary);
        return response;
    }

    let range = match effective_range(headers, dictionary) {
        Some(header) => match ByteRange::parse(header, dictionary.len()) {
            Ok(range) => Some(range),
            Err(error) => {
                trace!(url = dictionary.url(), %error, "unsatisfiable range");
                *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                return response;
            }
        },
        None => None,
    };

    let out = response.headers_mut();
    out.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(DICTIONARY_CONTENT_TYPE),
    );
    set_validators(out, dictionary);

    let body = match range {
        Some(range) => {
            let content_range = format!("{}-{}/{}", range.start, range.end, dictionary.len());
            if let Ok(value) = HeaderValue::from_str(&content_range) {
                out.insert(header::CONTENT_RANGE, value);
            }
            out.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len()));
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            dictionary.slice(range.start, range.end)
        }
        None => {
            out.insert(header::CONTENT_LENGTH, HeaderValue::from(dictionary.len()));
            dictionary.data().clone()
        }
    };

    if method == Method::GET {
        *response.body_mut() = body;
    }
    response
}

/// The `Range` header, unless `If-Range` names another representation.
fn effective_range<'a>(headers: &'a HeaderMap, dictionary: &Dictionary) -> Option<&'a str> {
    let range = headers.get(header::RANGE)?.to_str().ok()?;
    match headers.get(header::IF_RANGE) {
        None => Some(range),
        Some(if_range) if if_range.as_bytes() == dictionary.etag().as_bytes() => Some(range),
        Some(_) => None,
    }
}

/// Whether an `If-None-Match` list names `etag`.
fn matches_etag(if_none_match: Option<&HeaderValue>, etag: &str) -> bool {
    if_none_match
        .and_then(|v| v.to_str().ok())
        .is_some_and(|list| list.split(',').map(str::trim).any(|t| t == etag || t == "*"))
}

fn set_validators(headers: &mut HeaderMap, dictionary: &Dictionary) {
    if let Ok(etag) = HeaderValue::from_str(dictionary.etag()) {
        headers.insert(header::ETAG, etag);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
}

pin_project! {
    /// Future for [`ServeDictionaries`] responses.
    #[project = ServeFutureProj]
    #[allow(missing_docs)]
    pub enum ServeFuture<F> {
        /// Waiting on the inner service.
        Inner {
            #[pin]
            future: F,
        },
        /// A dictionary response, ready immediately.
        Dictionary {
            response: Option<Response<Bytes>>,
        },
    }
}

impl<F, B, E> Future for ServeFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<DictionaryBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ServeFutureProj::Inner { future } => match future.poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                Poll::Ready(Ok(response)) => {
                    Poll::Ready(Ok(response.map(|inner| DictionaryBody::Inner { inner })))
                }
            },
            ServeFutureProj::Dictionary { response } => match response.take() {
                Some(response) => Poll::Ready(Ok(response.map(|bytes| DictionaryBody::Dictionary {
                    body: Full::new(bytes),
                }))),
                None => panic!("ServeFuture polled after completion"),
            },
        }
    }
}

pin_project! {
    /// Response body of [`ServeDictionaries`]: dictionary bytes or the inner body.
    #[project = DictionaryBodyProj]
    #[allow(missing_docs)]
    pub enum DictionaryBody<B> {
        /// Dictionary bytes (or an empty body for bodiless responses).
        Dictionary {
            #[pin]
            body: Full<Bytes>,
        },
        /// Body produced by the inner service.
        Inner {
            #[pin]
            inner: B,
        },
    }
}

impl<B> Body for DictionaryBody<B>
where
    B: Body,
    B::Data: Buf,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            DictionaryBodyProj::Dictionary { body } => body
                .poll_frame(cx)
                .map(|frame| frame.map(|result| result.map_err(|never| match never {}))),
            DictionaryBodyProj::Inner { inner } => inner.poll_frame(cx).map(|frame| {
                frame.map(|result| {
                    result.map(|frame| {
                        frame.map_data(|mut data| data.copy_to_bytes(data.remaining()))
                    })
                })
            }),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            DictionaryBody::Dictionary { body } => body.is_end_stream(),
            DictionaryBody::Inner { inner } => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            DictionaryBody::Dictionary { body } => body.size_hint(),
            DictionaryBody::Inner { inner } => inner.size_hint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KOTIKI: &str = "kotiki are small furry animals that purr";

    fn dictionary() -> Dictionary {
        Dictionary::builder("/dict/kotiki.dict", "kotiki.cc")
            .path("/")
            .build(KOTIKI)
            .unwrap()
    }

    fn request<I>(method: Method, headers: I) -> (Method, HeaderMap)
    where
        I: IntoIterator<Item = (&'static str, String)>,
    {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(name, HeaderValue::from_str(&value).unwrap());
        }
        (method, map)
    }

    fn serve<I>(method: Method, headers: I) -> (Response<Bytes>, Dictionary)
    where
        I: IntoIterator<Item = (&'static str, String)>,
    {
        let dict = dictionary();
        let (method, headers) = request(method, headers);
        (respond(&dict, &method, &headers), dict)
    }

    fn header<'a>(response: &'a Response<Bytes>, name: header::HeaderName) -> Option<&'a str> {
        response.headers().get(name).map(|v| v.to_str().unwrap())
    }

    #[test]
    fn test_full_body() {
        let (response, dict) = serve(Method::GET, []);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), dict.data());
        assert_eq!(
            header(&response, header::CONTENT_LENGTH),
            Some(dict.len().to_string().as_str())
        );
        assert_eq!(header(&response, header::CONTENT_TYPE), Some(DICTIONARY_CONTENT_TYPE));
        assert_eq!(header(&response, header::ETAG), Some(dict.etag()));
        assert_eq!(header(&response, header::ACCEPT_RANGES), Some("bytes"));
    }

    #[test]
    fn test_head_has_headers_only() {
        let (response, dict) = serve(Method::HEAD, []);

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_empty());
        assert_eq!(
            header(&response, header::CONTENT_LENGTH),
            Some(dict.len().to_string().as_str())
        );
    }

    #[test]
    fn test_method_handling() {
        let (response, _) = serve(Method::POST, []);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(header(&response, header::ALLOW), Some("GET, HEAD, OPTIONS"));
        assert!(response.body().is_empty());

        let (response, _) = serve(Method::OPTIONS, []);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, header::ALLOW), Some("GET, HEAD, OPTIONS"));
    }

    #[test]
    fn test_if_none_match() {
        let etag = dictionary().etag().to_string();
        let (response, _) = serve(
            Method::GET,
            [("if-none-match", format!("\"other\", {etag}"))],
        );

        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.body().is_empty());
        assert_eq!(header(&response, header::ETAG), Some(etag.as_str()));
        assert_eq!(header(&response, header::ACCEPT_RANGES), Some("bytes"));

        let (response, _) = serve(Method::GET, [("if-none-match", "\"other\"".to_string())]);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_range() {
        let (response, dict) = serve(Method::GET, [("range", "bytes=0-9".to_string())]);

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.body().len(), 10);
        assert_eq!(response.body(), &dict.data().slice(0..10));
        assert_eq!(
            header(&response, header::CONTENT_RANGE),
            Some(format!("0-9/{}", dict.len()).as_str())
        );
    }

    #[test]
    fn test_every_single_range_is_exact() {
        let dict = dictionary();
        let len = dict.len();
        for (start, end) in [(0, 0), (3, 17), (len - 1, len - 1), (0, len - 1)] {
            let (response, _) = serve(Method::GET, [("range", format!("bytes={start}-{end}"))]);
            assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
            assert_eq!(
                response.body(),
                &dict.data().slice(start as usize..end as usize + 1)
            );
            assert_eq!(
                header(&response, header::CONTENT_RANGE),
                Some(format!("{start}-{end}/{len}").as_str())
            );
        }
    }

    #[test]
    fn test_bad_ranges() {
        for range in ["bytes=0-1,4-5", "items=0-5", "bytes=9999-", "0-5"] {
            let (response, _) = serve(Method::GET, [("range", range.to_string())]);
            assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE, "{range}");
            assert!(response.body().is_empty());
        }
    }

    #[test]
    fn test_if_range() {
        let etag = dictionary().etag().to_string();

        let (response, _) = serve(
            Method::GET,
            [("range", "bytes=0-9".to_string()), ("if-range", etag)],
        );
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

        let (response, dict) = serve(
            Method::GET,
            [("range", "bytes=0-9".to_string()), ("if-range", "\"stale\"".to_string())],
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), dict.data());
    }

    #[test]
    fn test_not_a_dictionary_is_delegated() {
        let index = Arc::new(DictionaryIndex::new(vec![dictionary()]).unwrap());
        let mut service = ServeDictionariesLayer::new(index).layer(tower::service_fn(
            |_req: Request<()>| async { Ok::<_, std::convert::Infallible>(Response::new("app")) },
        ));

        match service.call(Request::get("/index.html").body(()).unwrap()) {
            ServeFuture::Inner { .. } => {}
            _ => panic!("Expected delegation to the inner service"),
        }
        match service.call(Request::get("/dict/kotiki.dict").body(()).unwrap()) {
            ServeFuture::Dictionary { response } => {
                assert_eq!(response.unwrap().status(), StatusCode::OK);
            }
            _ => panic!("Expected a dictionary response"),
        }
    }

    #[test]
    fn test_query_is_part_of_the_url() {
        let versioned = Dictionary::builder("/dict/kotiki.dict?v=2", "kotiki.cc")
            .build("versioned kotiki")
            .unwrap();
        let index = Arc::new(DictionaryIndex::new(vec![dictionary(), versioned]).unwrap());
        let mut service = ServeDictionariesLayer::new(index).layer(tower::service_fn(
            |_req: Request<()>| async { Ok::<_, std::convert::Infallible>(Response::new("app")) },
        ));

        match service.call(Request::get("/dict/kotiki.dict?v=3").body(()).unwrap()) {
            ServeFuture::Inner { .. } => {}
            _ => panic!("Expected delegation to the inner service"),
        }
        match service.call(Request::get("/dict/kotiki.dict?v=2").body(()).unwrap()) {
            ServeFuture::Dictionary { response } => {
                let body = response.unwrap().into_body();
                assert!(body.ends_with(b"versioned kotiki"));
            }
            _ => panic!("Expected the versioned dictionary"),
        }
    }
}
