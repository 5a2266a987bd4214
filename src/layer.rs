use crate::dictionary::{DictionaryCodec, EncodeOptions};
use crate::error::ConfigError;
use crate::index::DictionaryIndex;
use crate::negotiate::{CompressConfig, Filter, SdchConfig, Stage, default_filter};
use crate::policy::{NegotiationContext, Selectors};
use crate::service::CompressionService;
use http::response::Parts;
use std::fmt;
use std::sync::Arc;
use tower::Layer;

/// Default minimum body size for encoding.
pub const DEFAULT_THRESHOLD: usize = 1024;

/// A Tower layer that compresses SDCH-encoded response bodies a second time.
///
/// Place it outside [`SdchLayer`] so the byte-stream pass runs over the
/// dictionary pass, producing `Content-Encoding: sdch, gzip`.
#[derive(Clone)]
pub struct CompressionLayer {
    threshold: usize,
    filter: Filter,
}

impl CompressionLayer {
    /// Creates a new compression layer with default settings.
    ///
    /// The default threshold is 1024 bytes.
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            filter: Arc::new(default_filter),
        }
    }

    /// Sets the minimum body size required for compression. 0 disables the check.
    ///
    /// Responses with a known length smaller than this value will not be
    /// compressed.
    pub fn threshold(mut self, size: usize) -> Self {
        self.threshold = size;
        self
    }

    /// Replaces the response filter.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&NegotiationContext, &Parts) -> bool + Send + Sync + 'static,
    {
        self.filter = Arc::new(filter);
        self
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompressionLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionLayer")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        let config = CompressConfig {
            threshold: self.threshold,
            filter: Arc::clone(&self.filter),
        };
        CompressionService::new(inner, Stage::Compress(Arc::new(config)))
    }
}

/// A Tower layer that encodes response bodies against SDCH dictionaries.
#[derive(Clone)]
pub struct SdchLayer {
    config: Arc<SdchConfig>,
}

impl SdchLayer {
    /// Starts configuring an SDCH layer.
    pub fn builder() -> SdchLayerBuilder {
        SdchLayerBuilder::default()
    }
}

impl fmt::Debug for SdchLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdchLayer")
            .field("threshold", &self.config.threshold)
            .field("options", &self.config.options)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for SdchLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, Stage::Sdch(Arc::clone(&self.config)))
    }
}

/// Builder for [`SdchLayer`].
pub struct SdchLayerBuilder {
    threshold: usize,
    filter: Filter,
    storage: Option<Arc<DictionaryIndex>>,
    selectors: Option<Selectors>,
    codec: Option<Arc<dyn DictionaryCodec>>,
    options: EncodeOptions,
}

impl Default for SdchLayerBuilder {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            filter: Arc::new(default_filter),
            storage: None,
            selectors: None,
            codec: None,
            options: EncodeOptions::default(),
        }
    }
}

impl SdchLayerBuilder {
    /// Selects dictionaries from `index` with the default policies.
    pub fn storage(mut self, index: Arc<DictionaryIndex>) -> Self {
        self.storage = Some(index);
        self
    }

    /// Uses custom selection policies. Takes precedence over [`storage`](Self::storage).
    pub fn selectors(mut self, selectors: Selectors) -> Self {
        self.selectors = Some(selectors);
        self
    }

    /// Sets the codec that builds dictionary encoders.
    pub fn codec<C>(mut self, codec: C) -> Self
    where
        C: DictionaryCodec + 'static,
    {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Sets the minimum body size required for encoding. 0 disables the check.
    pub fn threshold(mut self, size: usize) -> Self {
        self.threshold = size;
        self
    }

    /// Replaces the response filter.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&NegotiationContext, &Parts) -> bool + Send + Sync + 'static,
    {
        self.filter = Arc::new(filter);
        self
    }

    /// Sets the options passed to the codec for every encoder.
    pub fn options(mut self, options: EncodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the configuration and builds the layer.
    pub fn build(self) -> Result<SdchLayer, ConfigError> {
        let selectors = match (self.selectors, self.storage) {
            (Some(selectors), _) => selectors,
            (None, Some(index)) => Selectors::from_index(index),
            (None, None) => return Err(ConfigError::MissingSelectors),
        };
        let codec = self.codec.ok_or(ConfigError::MissingCodec)?;

        Ok(SdchLayer {
            config: Arc::new(SdchConfig {
                threshold: self.threshold,
                filter: self.filter,
                selectors,
                codec,
                options: self.options,
            }),
        })
    }
}

impl fmt::Debug for SdchLayerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdchLayerBuilder")
            .field("threshold", &self.threshold)
            .field("storage", &self.storage)
            .field("selectors", &self.selectors)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
