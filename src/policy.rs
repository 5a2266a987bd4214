use crate::codec::AcceptEncoding;
use crate::dictionary::Dictionary;
use crate::index::DictionaryIndex;
use http::header::HeaderName;
use http::{HeaderMap, Method, Request};
use std::fmt;
use std::sync::Arc;

/// Request header listing the client hashes of dictionaries the client holds.
pub const AVAIL_DICTIONARY: HeaderName = HeaderName::from_static("avail-dictionary");

/// What negotiation needs to know about the request, captured before the
/// request is handed to the inner service.
#[derive(Debug, Clone)]
pub struct NegotiationContext {
    /// Request method.
    pub method: Method,
    /// Request path, without query.
    pub path: String,
    /// Parsed `Accept-Encoding`.
    pub accept_encoding: AcceptEncoding,
    /// Client hashes from `Avail-Dictionary`, in header order.
    pub available_dictionaries: Vec<String>,
}

impl NegotiationContext {
    /// Captures the negotiation inputs of a request.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            accept_encoding: req
                .headers()
                .get(http::header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .map(AcceptEncoding::parse)
                .unwrap_or_default(),
            available_dictionaries: available_dictionaries(req.headers()),
        }
    }
}

/// Parses every `Avail-Dictionary` header into a flat list of hashes.
fn available_dictionaries(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(AVAIL_DICTIONARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|hash| !hash.is_empty())
        .map(str::to_string)
        .collect()
}

/// Dictionaries the client does not hold yet, in index order.
pub fn default_to_send(index: &DictionaryIndex, client_hashes: &[String]) -> Vec<Arc<Dictionary>> {
    index
        .all()
        .iter()
        .filter(|d| !client_hashes.iter().any(|h| h == d.client_hash()))
        .cloned()
        .collect()
}

/// The most specific advertised dictionary whose path scope covers `request_path`.
///
/// Unknown hashes are ignored. A dictionary without a path applies
/// everywhere but loses to any scoped one. Equal lengths keep the
/// client's order.
pub fn default_to_encode(
    index: &DictionaryIndex,
    client_hashes: &[String],
    request_path: &str,
) -> Option<Arc<Dictionary>> {
    let mut candidates: Vec<&Arc<Dictionary>> = client_hashes
        .iter()
        .filter_map(|hash| index.by_client_hash(hash))
        .filter(|d| d.path().is_none_or(|p| request_path.starts_with(p)))
        .collect();

    candidates.sort_by_key(|d| std::cmp::Reverse(d.path().map(|p| p.len() + 1).unwrap_or(0)));
    candidates.first().map(|d| Arc::clone(d))
}

type ToSendFn = dyn Fn(&NegotiationContext) -> Vec<Arc<Dictionary>> + Send + Sync;
type ToEncodeFn = dyn Fn(&NegotiationContext) -> Option<Arc<Dictionary>> + Send + Sync;

/// The pair of selection strategies used by the SDCH layer.
#[derive(Clone)]
pub struct Selectors {
    to_send: Arc<ToSendFn>,
    to_encode: Arc<ToEncodeFn>,
}

impl Selectors {
    /// Uses custom strategies.
    pub fn new<S, E>(to_send: S, to_encode: E) -> Self
    where
        S: Fn(&NegotiationContext) -> Vec<Arc<Dictionary>> + Send + Sync + 'static,
        E: Fn(&NegotiationContext) -> Option<Arc<Dictionary>> + Send + Sync + 'static,
    {
        Self {
            to_send: Arc::new(to_send),
            to_encode: Arc::new(to_encode),
        }
    }

    /// Uses [`default_to_send`] and [`default_to_encode`] over `index`.
    pub fn from_index(index: Arc<DictionaryIndex>) -> Self {
        let send_index = Arc::clone(&index);
        Self::new(
            move |ctx| default_to_send(&send_index, &ctx.available_dictionaries),
            move |ctx| default_to_encode(&index, &ctx.available_dictionaries, &ctx.path),
        )
    }

    /// Dictionaries to advertise with `Get-Dictionary`.
    pub fn to_send(&self, ctx: &NegotiationContext) -> Vec<Arc<Dictionary>> {
        (self.to_send)(ctx)
    }

    /// Dictionary to encode the current response with.
    pub fn to_encode(&self, ctx: &NegotiationContext) -> Option<Arc<Dictionary>> {
        (self.to_encode)(ctx)
    }
}

impl fmt::Debug for Selectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selectors").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(url: &str, path: Option<&str>) -> Dictionary {
        let builder = Dictionary::builder(url, "example.com");
        let builder = match path {
            Some(p) => builder.path(p),
            None => builder,
        };
        builder.build(url).unwrap()
    }

    fn index(dicts: Vec<Dictionary>) -> DictionaryIndex {
        DictionaryIndex::new(dicts).unwrap()
    }

    fn hashes(index: &DictionaryIndex, urls: &[&str]) -> Vec<String> {
        urls.iter()
            .map(|u| index.by_url(u).unwrap().client_hash().to_string())
            .collect()
    }

    #[test]
    fn test_to_send_skips_held_dictionaries() {
        let index = index(vec![scoped("/a.dict", None), scoped("/b.dict", None)]);
        let held = hashes(&index, &["/a.dict"]);

        let urls: Vec<_> = default_to_send(&index, &held)
            .iter()
            .map(|d| d.url().to_string())
            .collect();
        assert_eq!(urls, vec!["/b.dict"]);

        assert_eq!(default_to_send(&index, &[]).len(), 2);
        assert!(default_to_send(&index, &hashes(&index, &["/a.dict", "/b.dict"])).is_empty());
    }

    #[test]
    fn test_to_encode_longest_path_wins() {
        let index = index(vec![
            scoped("/a.dict", Some("/a")),
            scoped("/ab.dict", Some("/a/b")),
        ]);
        let held = hashes(&index, &["/a.dict", "/ab.dict"]);

        let chosen = default_to_encode(&index, &held, "/a/b/c").unwrap();
        assert_eq!(chosen.url(), "/ab.dict");

        let chosen = default_to_encode(&index, &held, "/a/x").unwrap();
        assert_eq!(chosen.url(), "/a.dict");
    }

    #[test]
    fn test_to_encode_never_picks_foreign_path() {
        let index = index(vec![scoped("/a.dict", Some("/a"))]);
        let held = hashes(&index, &["/a.dict"]);

        assert!(default_to_encode(&index, &held, "/b").is_none());
    }

    #[test]
    fn test_to_encode_unscoped_sorts_last() {
        let index = index(vec![scoped("/any.dict", None), scoped("/root.dict", Some("/"))]);
        let held = hashes(&index, &["/any.dict", "/root.dict"]);

        let chosen = default_to_encode(&index, &held, "/page").unwrap();
        assert_eq!(chosen.url(), "/root.dict");

        let held = hashes(&index, &["/any.dict"]);
        let chosen = default_to_encode(&index, &held, "/page").unwrap();
        assert_eq!(chosen.url(), "/any.dict");
    }

    #[test]
    fn test_to_encode_ties_keep_client_order() {
        let index = index(vec![scoped("/x.dict", Some("/x")), scoped("/y.dict", Some("/x"))]);

        let held = hashes(&index, &["/y.dict", "/x.dict"]);
        assert_eq!(default_to_encode(&index, &held, "/x/1").unwrap().url(), "/y.dict");
    }

    #[test]
    fn test_to_encode_ignores_unknown_hashes() {
        let index = index(vec![scoped("/a.dict", None)]);
        assert!(default_to_encode(&index, &["unknown0".to_string()], "/").is_none());
    }

    #[test]
    fn test_context_from_request() {
        let req = Request::get("/page?x=1")
            .header("accept-encoding", "sdch, gzip")
            .header("avail-dictionary", "aaaa, bbbb,")
            .header("avail-dictionary", "cccc")
            .body(())
            .unwrap();

        let ctx = NegotiationContext::from_request(&req);
        assert_eq!(ctx.path, "/page");
        assert_eq!(ctx.method, Method::GET);
        assert!(ctx.accept_encoding.accepts("sdch"));
        assert_eq!(ctx.available_dictionaries, vec!["aaaa", "bbbb", "cccc"]);
    }

    #[test]
    fn test_avail_dictionary_header_name() {
        assert_eq!(AVAIL_DICTIONARY, "avail-dictionary");

        let req = Request::get("/")
            .header(AVAIL_DICTIONARY, "aaaa")
            .body(())
            .unwrap();
        let ctx = NegotiationContext::from_request(&req);
        assert_eq!(ctx.available_dictionaries, vec!["aaaa"]);
    }

    #[test]
    fn test_selectors_from_index() {
        let index = Arc::new(index(vec![scoped("/a.dict", None)]));
        let selectors = Selectors::from_index(Arc::clone(&index));
        let req = Request::get("/").body(()).unwrap();
        let mut ctx = NegotiationContext::from_request(&req);

        assert_eq!(selectors.to_send(&ctx).len(), 1);
        assert!(selectors.to_encode(&ctx).is_none());

        ctx.available_dictionaries = vec![index.all()[0].client_hash().to_string()];
        assert!(selectors.to_send(&ctx).is_empty());
        assert_eq!(selectors.to_encode(&ctx).unwrap().url(), "/a.dict");
    }
}
