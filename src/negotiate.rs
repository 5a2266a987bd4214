use crate::codec::{Codec, IDENTITY};
use crate::dictionary::{DICTIONARY_CONTENT_TYPE, DictionaryCodec, EncodeOptions};
use crate::policy::{NegotiationContext, Selectors};
use compression_codecs::EncodeV2;
use http::Method;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::response::Parts;
use std::sync::Arc;
use tracing::{debug, warn};

/// Response header advertising dictionaries the client should fetch.
pub const GET_DICTIONARY: HeaderName = HeaderName::from_static("get-dictionary");

/// Diagnostic response header set to `0` when no advertised dictionary fits.
pub const X_SDCH_ENCODE: HeaderName = HeaderName::from_static("x-sdch-encode");

/// The content coding of dictionary-compressed bodies.
pub const SDCH: &str = "sdch";

/// Decides whether a response may be encoded at all.
pub type Filter = Arc<dyn Fn(&NegotiationContext, &Parts) -> bool + Send + Sync>;

/// Default response filter: requires a compressible `Content-Type`.
///
/// Dictionaries themselves are always eligible.
pub fn default_filter(_ctx: &NegotiationContext, parts: &Parts) -> bool {
    let Some(content_type) = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        debug!("no content-type header, not compressible");
        return false;
    };

    if essence(content_type) == DICTIONARY_CONTENT_TYPE {
        return true;
    }
    if !is_compressible(content_type) {
        debug!(content_type, "not compressible");
        return false;
    }
    true
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Whether a media type benefits from compression.
pub fn is_compressible(content_type: &str) -> bool {
    let ty = essence(content_type);

    if ty.starts_with("text/") {
        return true;
    }
    if ["+json", "+xml", "+text"].iter().any(|suffix| ty.ends_with(suffix)) {
        return true;
    }
    matches!(
        ty.as_str(),
        "application/json"
            | "application/javascript"
            | "application/x-javascript"
            | "application/ecmascript"
            | "application/xml"
            | "application/wasm"
            | "application/x-www-form-urlencoded"
            | "application/grpc-web"
            | "application/vnd.ms-fontobject"
            | "font/otf"
            | "font/ttf"
            | "image/bmp"
            | "image/x-icon"
    )
}

pub(crate) struct CompressConfig {
    pub(crate) threshold: usize,
    pub(crate) filter: Filter,
}

pub(crate) struct SdchConfig {
    pub(crate) threshold: usize,
    pub(crate) filter: Filter,
    pub(crate) selectors: Selectors,
    pub(crate) codec: Arc<dyn DictionaryCodec>,
    pub(crate) options: EncodeOptions,
}

/// Which configuration negotiates a response.
#[derive(Clone)]
pub(crate) enum Stage {
    Compress(Arc<CompressConfig>),
    Sdch(Arc<SdchConfig>),
}

/// An encoder chosen for one response, with the coding it produces.
pub(crate) struct Encoding {
    pub(crate) coding: &'static str,
    pub(crate) encoder: Box<dyn EncodeV2 + Send>,
}

impl Stage {
    /// Runs negotiation on the response head.
    ///
    /// `declared_len` is the body length if known up front. When an
    /// encoding is returned, the head already carries its headers.
    pub(crate) fn negotiate(
        &self,
        ctx: &NegotiationContext,
        parts: &mut Parts,
        declared_len: Option<u64>,
    ) -> Option<Encoding> {
        let encoding = match self {
            Stage::Compress(config) => negotiate_compress(config, ctx, parts, declared_len),
            Stage::Sdch(config) => negotiate_sdch(config, ctx, parts, declared_len),
        }?;

        append_content_encoding(&mut parts.headers, encoding.coding);
        // Encoded size is unknown and byte ranges no longer apply
        parts.headers.remove(header::CONTENT_LENGTH);
        parts.headers.remove(header::ACCEPT_RANGES);
        Some(encoding)
    }
}

/// Byte-stream pass over a body the SDCH pass already encoded.
fn negotiate_compress(
    config: &CompressConfig,
    ctx: &NegotiationContext,
    parts: &mut Parts,
    declared_len: Option<u64>,
) -> Option<Encoding> {
    if !(config.filter)(ctx, parts) {
        debug!("no compression: filtered");
        return None;
    }

    add_vary(&mut parts.headers, "Accept-Encoding");

    if is_below_threshold(&parts.headers, declared_len, config.threshold) {
        debug!("no compression: size below threshold");
        return None;
    }
    if last_coding(&parts.headers).as_deref() != Some(SDCH) {
        debug!("no compression: not sdch-encoded");
        return None;
    }
    if !accepts_transform(ctx, parts) {
        return None;
    }

    let Some(codec) = Codec::negotiate(&ctx.accept_encoding) else {
        debug!("no compression: not acceptable");
        return None;
    };

    Some(Encoding {
        coding: codec.content_encoding(),
        encoder: codec.encoder(),
    })
}

/// Dictionary pass over an unencoded body.
fn negotiate_sdch(
    config: &SdchConfig,
    ctx: &NegotiationContext,
    parts: &mut Parts,
    declared_len: Option<u64>,
) -> Option<Encoding> {
    if !(config.filter)(ctx, parts) {
        debug!("no sdch: filtered");
        return None;
    }

    add_vary(&mut parts.headers, "Accept-Encoding");
    add_vary(&mut parts.headers, "Avail-Dictionary");

    advertise(&mut parts.headers, &config.selectors, ctx);

    if is_below_threshold(&parts.headers, declared_len, config.threshold) {
        debug!("no sdch: size below threshold");
        return None;
    }
    if !is_identity(&parts.headers) {
        debug!("no sdch: already encoded");
        return None;
    }
    if !accepts_transform(ctx, parts) {
        return None;
    }
    if ctx.accept_encoding.negotiate(&[SDCH, IDENTITY]) != Some(SDCH) {
        debug!("no sdch: not acceptable");
        return None;
    }
    if ctx.available_dictionaries.is_empty() {
        debug!("no sdch: client holds no dictionaries");
        return None;
    }

    let Some(dictionary) = config.selectors.to_encode(ctx) else {
        debug!("no sdch: no suitable dictionary found");
        parts
            .headers
            .insert(X_SDCH_ENCODE, HeaderValue::from_static("0"));
        return None;
    };

    match config.codec.encoder(&dictionary, config.options) {
        Ok(encoder) => {
            debug!(dictionary = dictionary.url(), "sdch encoding");
            Some(Encoding {
                coding: SDCH,
                encoder,
            })
        }
        Err(error) => {
            warn!(dictionary = dictionary.url(), %error, "failed to create sdch encoder");
            None
        }
    }
}

/// Sets `Get-Dictionary` to the URLs of the dictionaries selected for sending.
fn advertise(headers: &mut HeaderMap, selectors: &Selectors, ctx: &NegotiationContext) {
    let to_send = selectors.to_send(ctx);
    if to_send.is_empty() {
        return;
    }

    let urls: Vec<&str> = to_send.iter().map(|d| d.url()).collect();
    match HeaderValue::from_str(&urls.join(", ")) {
        Ok(value) => {
            headers.insert(GET_DICTIONARY, value);
        }
        Err(_) => warn!(?urls, "dictionary urls are not a valid header value"),
    }
}

/// HEAD responses and partial responses are never encoded.
fn accepts_transform(ctx: &NegotiationContext, parts: &Parts) -> bool {
    if ctx.method == Method::HEAD {
        debug!("no compression: HEAD request");
        return false;
    }
    if parts.headers.contains_key(header::CONTENT_RANGE) {
        debug!("no compression: range response");
        return false;
    }
    true
}

/// Whether the body is still unencoded.
fn is_identity(headers: &HeaderMap) -> bool {
    match headers.get(header::CONTENT_ENCODING) {
        None => true,
        Some(value) => value
            .to_str()
            .is_ok_and(|v| v.trim().eq_ignore_ascii_case(IDENTITY)),
    }
}

/// The most recently applied content coding, lowercased.
fn last_coding(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .last()
        .map(str::to_ascii_lowercase)
}

/// Appends `coding` to `Content-Encoding`, replacing a bare `identity`.
fn append_content_encoding(headers: &mut HeaderMap, coding: &'static str) {
    let existing: Vec<&str> = headers
        .get_all(header::CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(IDENTITY))
        .collect();

    let value = if existing.is_empty() {
        HeaderValue::from_static(coding)
    } else {
        match HeaderValue::from_str(&format!("{}, {coding}", existing.join(", "))) {
            Ok(value) => value,
            Err(_) => HeaderValue::from_static(coding),
        }
    };
    headers.insert(header::CONTENT_ENCODING, value);
}

/// Adds `field` to the `Vary` header unless already covered.
///
/// All `Vary` lines are merged into one comma-joined value.
fn add_vary(headers: &mut HeaderMap, field: &'static str) {
    let existing: Vec<&str> = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    if existing
        .iter()
        .any(|v| *v == "*" || v.eq_ignore_ascii_case(field))
    {
        return;
    }

    let value = if existing.is_empty() {
        HeaderValue::from_static(field)
    } else {
        match HeaderValue::from_str(&format!("{}, {field}", existing.join(", "))) {
            Ok(value) => value,
            Err(_) => {
                warn!(field, "cannot merge vary header");
                return;
            }
        }
    };
    headers.insert(header::VARY, value);
}

/// Whether the declared length is below the threshold. 0 disables the check.
fn is_below_threshold(headers: &HeaderMap, declared_len: Option<u64>, threshold: usize) -> bool {
    if threshold == 0 {
        return false;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or(declared_len)
        .is_some_and(|len| len < threshold as u64)
}

/// Checks if the response requires flushing after each chunk (e.g., streaming).
pub(crate) fn is_streaming(headers: &HeaderMap) -> bool {
    let no_buffering = headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"));

    no_buffering
        || headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
            })
}
