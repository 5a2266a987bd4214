use crate::error::DictionaryFormatError;
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use bytes::Bytes;
use compression_codecs::EncodeV2;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;

/// Media type dictionaries are published under.
pub const DICTIONARY_CONTENT_TYPE: &str = "application/x-sdch-dictionary";

/// An immutable SDCH dictionary.
///
/// The published text is a block of `name: value` header lines, an empty
/// line, and the reference content. The SHA-256 digest of the whole text
/// yields the client hash advertised in `Avail-Dictionary` (first 48 bits)
/// and the server hash prefixed to encoded responses (next 48 bits).
#[derive(Clone, PartialEq, Eq)]
pub struct Dictionary {
    url: String,
    domain: String,
    path: Option<String>,
    ports: Vec<u16>,
    max_age: Option<u64>,
    client_hash: String,
    server_hash: String,
    etag: String,
    data: Bytes,
    content_offset: usize,
}

impl Dictionary {
    /// Starts building a dictionary published at `url` for `domain`.
    pub fn builder(url: impl Into<String>, domain: impl Into<String>) -> DictionaryBuilder {
        DictionaryBuilder {
            url: url.into(),
            domain: domain.into(),
            path: None,
            ports: Vec::new(),
            max_age: None,
        }
    }

    /// Parses raw dictionary bytes (header block plus content) published at `url`.
    pub fn parse(
        url: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Result<Self, DictionaryFormatError> {
        let data = data.into();
        let (header_end, content_offset) =
            split_headers(&data).ok_or(DictionaryFormatError::UnterminatedHeaders)?;
        let headers = std::str::from_utf8(&data[..header_end])
            .map_err(|_| DictionaryFormatError::InvalidEncoding)?;

        let mut domain = None;
        let mut path = None;
        let mut ports = Vec::new();
        let mut max_age = None;

        for line in headers.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| DictionaryFormatError::MalformedHeader(line.to_string()))?;
            let value = value.trim();

            match name.trim().to_ascii_lowercase().as_str() {
                "domain" => domain = Some(value.to_string()),
                "path" => path = Some(value.to_string()),
                "format-version" => {
                    if value != "1.0" {
                        return Err(DictionaryFormatError::UnsupportedVersion(value.to_string()));
                    }
                }
                "max-age" => {
                    let age = value
                        .parse()
                        .map_err(|_| DictionaryFormatError::InvalidMaxAge(value.to_string()))?;
                    max_age = Some(age);
                }
                "port" => {
                    for port in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                        let port = port
                            .parse()
                            .map_err(|_| DictionaryFormatError::InvalidPort(port.to_string()))?;
                        ports.push(port);
                    }
                }
                // Unknown headers are reserved for future use.
                _ => {}
            }
        }

        let domain = domain.ok_or(DictionaryFormatError::MissingDomain)?;
        let digest = Sha256::digest(&data);

        Ok(Self {
            url: url.into(),
            domain,
            path,
            ports,
            max_age,
            client_hash: URL_SAFE.encode(&digest[..6]),
            server_hash: URL_SAFE.encode(&digest[6..12]),
            etag: format!("\"{}\"", URL_SAFE_NO_PAD.encode(digest)),
            data,
            content_offset,
        })
    }

    /// Publication URL (path) of the dictionary.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Domain the dictionary applies to.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Path prefix the dictionary is scoped to, if any.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Ports the dictionary is restricted to. Empty means any port.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Lifetime in seconds advertised by the dictionary.
    pub fn max_age(&self) -> Option<u64> {
        self.max_age
    }

    /// Identifier clients advertise in `Avail-Dictionary`.
    pub fn client_hash(&self) -> &str {
        &self.client_hash
    }

    /// Identifier prefixed to SDCH-encoded responses.
    pub fn server_hash(&self) -> &str {
        &self.server_hash
    }

    /// Strong validator for the published resource, quoted.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// Complete dictionary text as served to clients.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Reference content following the header block.
    pub fn content(&self) -> Bytes {
        self.data.slice(self.content_offset..)
    }

    /// Length in bytes of the published resource.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the published resource is empty. Never true for a parsed dictionary.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the inclusive byte range `start..=end` of the published resource.
    ///
    /// Bounds are clamped to the resource.
    pub fn slice(&self, start: u64, end: u64) -> Bytes {
        let len = self.data.len();
        let start = (start as usize).min(len);
        let end = (end as usize).saturating_add(1).min(len).max(start);
        self.data.slice(start..end)
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dictionary")
            .field("url", &self.url)
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("client_hash", &self.client_hash)
            .field("etag", &self.etag)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Returns `(header_end, content_offset)`.
fn split_headers(data: &[u8]) -> Option<(usize, usize)> {
    if data.first() == Some(&b'\n') {
        return Some((0, 1));
    }
    data.windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos + 1, pos + 2))
}

/// Builds a dictionary by generating its header block.
#[derive(Debug, Clone)]
pub struct DictionaryBuilder {
    url: String,
    domain: String,
    path: Option<String>,
    ports: Vec<u16>,
    max_age: Option<u64>,
}

impl DictionaryBuilder {
    /// Restricts the dictionary to request paths starting with `path`.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Restricts the dictionary to the given port. May be called repeatedly.
    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }

    /// Sets the advertised lifetime in seconds.
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Generates the header block, appends `content` and parses the result.
    pub fn build(self, content: impl AsRef<[u8]>) -> Result<Dictionary, DictionaryFormatError> {
        let mut text = format!("Domain: {}\n", self.domain);
        if let Some(path) = &self.path {
            text.push_str(&format!("Path: {path}\n"));
        }
        text.push_str("Format-Version: 1.0\n");
        if let Some(age) = self.max_age {
            text.push_str(&format!("Max-Age: {age}\n"));
        }
        if !self.ports.is_empty() {
            let ports: Vec<String> = self.ports.iter().map(u16::to_string).collect();
            text.push_str(&format!("Port: {}\n", ports.join(", ")));
        }
        text.push('\n');

        let mut data = text.into_bytes();
        data.extend_from_slice(content.as_ref());
        Dictionary::parse(self.url, data)
    }
}

/// Options handed to the dictionary codec when building an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Interleave instructions, addresses and data in the output windows.
    pub interleaved: bool,
    /// Append an Adler-32 checksum to every window.
    pub checksum: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            interleaved: true,
            checksum: true,
        }
    }
}

/// Differential codec producing SDCH-encoded output against a dictionary.
///
/// Implementations own the diff format; the middleware only drives the
/// returned encoder like any other byte-stream compressor.
pub trait DictionaryCodec: Send + Sync {
    /// Creates an encoder for one response body.
    fn encoder(
        &self,
        dictionary: &Dictionary,
        options: EncodeOptions,
    ) -> io::Result<Box<dyn EncodeV2 + Send>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_generates_headers() {
        let dict = Dictionary::builder("/dict/kotiki.dict", "kotiki.cc")
            .path("/")
            .max_age(3600)
            .port(80)
            .port(443)
            .build("kotiki kotiki kotiki")
            .unwrap();

        assert_eq!(dict.url(), "/dict/kotiki.dict");
        assert_eq!(dict.domain(), "kotiki.cc");
        assert_eq!(dict.path(), Some("/"));
        assert_eq!(dict.max_age(), Some(3600));
        assert_eq!(dict.ports(), &[80, 443]);
        assert_eq!(dict.content(), Bytes::from("kotiki kotiki kotiki"));
        assert!(dict.data().starts_with(b"Domain: kotiki.cc\n"));
    }

    #[test]
    fn test_hash_shapes() {
        let dict = Dictionary::parse("/d", "Domain: example.com\n\nabc").unwrap();

        assert_eq!(dict.client_hash().len(), 8);
        assert_eq!(dict.server_hash().len(), 8);
        assert_ne!(dict.client_hash(), dict.server_hash());
        assert!(dict.etag().starts_with('"') && dict.etag().ends_with('"'));
    }

    #[test]
    fn test_hash_depends_on_content() {
        let a = Dictionary::parse("/a", "Domain: example.com\n\nabc").unwrap();
        let b = Dictionary::parse("/a", "Domain: example.com\n\nabd").unwrap();

        assert_ne!(a.client_hash(), b.client_hash());
        assert_ne!(a.etag(), b.etag());
    }

    #[test]
    fn test_parse_without_path() {
        let dict = Dictionary::parse("/d", "domain: example.com\r\n\nabc").unwrap();
        assert_eq!(dict.path(), None);
        assert_eq!(dict.domain(), "example.com");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Dictionary::parse("/d", "Domain: example.com"),
            Err(DictionaryFormatError::UnterminatedHeaders)
        );
        assert_eq!(
            Dictionary::parse("/d", "Path: /\n\nabc"),
            Err(DictionaryFormatError::MissingDomain)
        );
        assert_eq!(
            Dictionary::parse("/d", "\nabc"),
            Err(DictionaryFormatError::MissingDomain)
        );
        assert_eq!(
            Dictionary::parse("/d", "Domain: a\nFormat-Version: 2.0\n\nabc"),
            Err(DictionaryFormatError::UnsupportedVersion("2.0".into()))
        );
        assert_eq!(
            Dictionary::parse("/d", "Domain: a\nbogus\n\nabc"),
            Err(DictionaryFormatError::MalformedHeader("bogus".into()))
        );
        assert_eq!(
            Dictionary::parse("/d", "Domain: a\nPort: 80, http\n\nabc"),
            Err(DictionaryFormatError::InvalidPort("http".into()))
        );
        assert_eq!(
            Dictionary::parse("/d", "Domain: a\nMax-Age: soon\n\nabc"),
            Err(DictionaryFormatError::InvalidMaxAge("soon".into()))
        );
    }

    #[test]
    fn test_slice() {
        let dict = Dictionary::parse("/d", "Domain: a\n\n0123456789").unwrap();
        let len = dict.len();

        assert_eq!(dict.slice(0, 0), Bytes::from("D"));
        assert_eq!(dict.slice(len - 3, len - 1), Bytes::from("789"));
        assert_eq!(dict.slice(len - 3, len + 10), Bytes::from("789"));
        assert!(dict.slice(len, len + 1).is_empty());
    }
}
