//! SDCH dictionary compression middleware for Tower.
//!
//! This crate negotiates Shared Dictionary Compression over HTTP. It is
//! made of three layers that stack around an application service:
//!
//! - [`ServeDictionariesLayer`] answers requests for dictionary URLs with
//!   conditional and ranged responses.
//! - [`SdchLayer`] advertises dictionaries through `Get-Dictionary` and
//!   encodes response bodies against a dictionary the client already has.
//! - [`CompressionLayer`] runs a byte-stream codec (gzip, deflate, zstd or
//!   brotli) over SDCH-encoded bodies.
//!
//! # Example
//!
//! ```ignore
//! use http_sdch_compression::{
//!     CompressionLayer, Dictionary, DictionaryIndex, SdchLayer, ServeDictionariesLayer,
//! };
//! use std::sync::Arc;
//! use tower::ServiceBuilder;
//!
//! let dict = Dictionary::builder("/dict/site.dict", "example.com").build(content)?;
//! let index = Arc::new(DictionaryIndex::new(vec![dict])?);
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::new())
//!     .layer(SdchLayer::builder().storage(index.clone()).codec(my_codec).build()?)
//!     .layer(ServeDictionariesLayer::new(index))
//!     .service(my_service);
//! ```
//!
//! # Negotiation Rules
//!
//! A response is SDCH-encoded only when:
//! - the request sent `Avail-Dictionary` and the dictionary selector picked one
//! - `Accept-Encoding` prefers `sdch` over `identity`
//! - the response has no `Content-Encoding` and no `Content-Range`
//! - the method is not `HEAD`
//! - the `Content-Type` is compressible and the known length meets the threshold
//!
//! [`CompressionLayer`] only compresses bodies whose last coding is `sdch`.
//!
//! # Response Modifications
//!
//! When an encoding is applied:
//! - the coding is appended to `Content-Encoding`
//! - `Content-Length` and `Accept-Ranges` are removed
//! - `Vary` includes `Accept-Encoding` (and `Avail-Dictionary` for SDCH)

#![deny(missing_docs)]

mod body;
mod codec;
mod dictionary;
mod error;
mod future;
mod index;
mod layer;
mod negotiate;
mod policy;
mod range;
mod serve;
mod service;
#[cfg(test)]
mod testing;

pub use body::CompressionBody;
pub use codec::{AcceptEncoding, Codec};
pub use dictionary::{
    DICTIONARY_CONTENT_TYPE, Dictionary, DictionaryBuilder, DictionaryCodec, EncodeOptions,
};
pub use error::{ConfigError, DictionaryFormatError};
pub use future::ResponseFuture;
pub use index::DictionaryIndex;
pub use layer::{CompressionLayer, DEFAULT_THRESHOLD, SdchLayer, SdchLayerBuilder};
pub use negotiate::{Filter, GET_DICTIONARY, X_SDCH_ENCODE, default_filter, is_compressible};
pub use policy::{
    AVAIL_DICTIONARY, NegotiationContext, Selectors, default_to_encode, default_to_send,
};
pub use range::{ByteRange, RangeError};
pub use serve::{DictionaryBody, ServeDictionaries, ServeDictionariesLayer, ServeFuture};
pub use service::CompressionService;

pub use compression_codecs::EncodeV2;
pub use compression_core::util::{PartialBuffer, WriteBuffer};
