use thiserror::Error;

/// Invalid or missing configuration, reported before any request is handled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Two dictionaries in one index share a publication URL.
    #[error("duplicate dictionary url: {0}")]
    DuplicateUrl(String),

    /// Two dictionaries in one index share a client hash.
    #[error("duplicate dictionary client hash: {0}")]
    DuplicateClientHash(String),

    /// Two dictionaries in one index share an etag.
    #[error("duplicate dictionary etag: {0}")]
    DuplicateEtag(String),

    /// Neither a dictionary storage nor explicit selectors were configured.
    #[error("either a dictionary storage or a to_send/to_encode pair is required")]
    MissingSelectors,

    /// No dictionary codec was configured for the SDCH layer.
    #[error("a dictionary codec is required")]
    MissingCodec,
}

/// A dictionary could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DictionaryFormatError {
    /// The header block is not terminated by an empty line.
    #[error("dictionary header block is not terminated")]
    UnterminatedHeaders,

    /// The header block is not valid UTF-8.
    #[error("dictionary headers are not valid utf-8")]
    InvalidEncoding,

    /// A header line has no `name: value` shape.
    #[error("malformed dictionary header line: {0}")]
    MalformedHeader(String),

    /// The mandatory `Domain` header is missing.
    #[error("dictionary has no domain")]
    MissingDomain,

    /// `Format-Version` names a version other than 1.0.
    #[error("unsupported dictionary format version: {0}")]
    UnsupportedVersion(String),

    /// `Max-Age` is not an integer.
    #[error("invalid dictionary max-age: {0}")]
    InvalidMaxAge(String),

    /// `Port` contains something other than port numbers.
    #[error("invalid dictionary port: {0}")]
    InvalidPort(String),
}
