#[cfg(feature = "brotli")]
use compression_codecs::brotli::{BrotliEncoder, params::EncoderParams as BrotliParams};
#[cfg(feature = "deflate")]
use compression_codecs::deflate::DeflateEncoder;
#[cfg(feature = "gzip")]
use compression_codecs::gzip::GzipEncoder;
#[cfg(feature = "zstd")]
use compression_codecs::zstd::ZstdEncoder;
use compression_codecs::EncodeV2;
#[cfg(any(feature = "gzip", feature = "deflate"))]
use compression_core::Level;

/// Byte-stream compression codecs applied after the SDCH pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Zstd compression.
    #[cfg(feature = "zstd")]
    Zstd,
    /// Brotli compression.
    #[cfg(feature = "brotli")]
    Brotli,
    /// Gzip compression.
    #[cfg(feature = "gzip")]
    Gzip,
    /// Deflate compression.
    #[cfg(feature = "deflate")]
    Deflate,
}

/// Enabled codecs; the order breaks ties the client leaves open.
const PREFERENCE: &[Codec] = &[
    #[cfg(feature = "zstd")]
    Codec::Zstd,
    #[cfg(feature = "brotli")]
    Codec::Brotli,
    #[cfg(feature = "gzip")]
    Codec::Gzip,
    #[cfg(feature = "deflate")]
    Codec::Deflate,
];

impl Codec {
    /// Returns the Content-Encoding header value for this codec.
    pub fn content_encoding(&self) -> &'static str {
        match *self {
            #[cfg(feature = "zstd")]
            Codec::Zstd => "zstd",
            #[cfg(feature = "brotli")]
            Codec::Brotli => "br",
            #[cfg(feature = "gzip")]
            Codec::Gzip => "gzip",
            #[cfg(feature = "deflate")]
            Codec::Deflate => "deflate",
        }
    }

    /// Creates a new encoder for this codec.
    pub fn encoder(&self) -> Box<dyn EncodeV2 + Send> {
        match *self {
            #[cfg(feature = "zstd")]
            Codec::Zstd => Box::new(ZstdEncoder::new(3)), // level 3 is a good default
            #[cfg(feature = "brotli")]
            Codec::Brotli => Box::new(BrotliEncoder::new(BrotliParams::default())),
            #[cfg(feature = "gzip")]
            Codec::Gzip => Box::new(GzipEncoder::new(Level::Default.into())),
            #[cfg(feature = "deflate")]
            Codec::Deflate => Box::new(DeflateEncoder::new(Level::Default.into())),
        }
    }

    /// Picks the best enabled codec the client accepts over `identity`.
    ///
    /// Returns `None` when identity is preferred or nothing is acceptable.
    pub fn negotiate(accept: &AcceptEncoding) -> Option<Codec> {
        let mut candidates: Vec<&str> = PREFERENCE.iter().map(Codec::content_encoding).collect();
        candidates.push(IDENTITY);

        let chosen = accept.negotiate(&candidates)?;
        PREFERENCE
            .iter()
            .copied()
            .find(|codec| codec.content_encoding() == chosen)
    }
}

/// The coding meaning "no transformation".
pub const IDENTITY: &str = "identity";

/// Parsed `Accept-Encoding` request header.
///
/// Codings are kept in header order, lowercased, with their quality values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcceptEncoding {
    codings: Vec<(String, f32)>,
}

/// How strongly a client accepts a coding.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Preference {
    quality: f32,
    /// Position in the header; `None` for an implied `identity`.
    position: Option<usize>,
}

impl Preference {
    /// Orders equal-quality preferences: listed before implied, then header order.
    fn rank(&self) -> usize {
        self.position.unwrap_or(usize::MAX)
    }
}

impl AcceptEncoding {
    /// Parses a header value such as `"gzip, br;q=1.0, zstd;q=0.8"`.
    pub fn parse(header: &str) -> Self {
        let codings = header
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (coding, quality) = parse_encoding_with_quality(part);
                let coding = match coding.to_ascii_lowercase().as_str() {
                    "x-gzip" => "gzip".to_string(),
                    "brotli" => "br".to_string(),
                    other => other.to_string(),
                };
                (coding, quality)
            })
            .collect();

        Self { codings }
    }

    /// Whether the header listed no codings at all.
    pub fn is_empty(&self) -> bool {
        self.codings.is_empty()
    }

    /// Whether `coding` is acceptable to the client.
    pub fn accepts(&self, coding: &str) -> bool {
        self.preference(coding).is_some()
    }

    /// Chooses the candidate the client prefers most.
    ///
    /// Highest quality wins. Among equal qualities, listed codings beat an
    /// implied `identity` and earlier header entries beat later ones;
    /// anything still tied goes to the earlier candidate.
    pub fn negotiate<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        let mut best: Option<(&'a str, Preference)> = None;

        for &candidate in candidates {
            let Some(pref) = self.preference(candidate) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((_, current)) => {
                    pref.quality > current.quality
                        || (pref.quality == current.quality && pref.rank() < current.rank())
                }
            };
            if better {
                best = Some((candidate, pref));
            }
        }

        best.map(|(candidate, _)| candidate)
    }

    fn preference(&self, coding: &str) -> Option<Preference> {
        let explicit = self
            .codings
            .iter()
            .position(|(c, _)| c.eq_ignore_ascii_case(coding))
            .or_else(|| self.codings.iter().position(|(c, _)| c == "*"));

        let pref = match explicit {
            Some(position) => Preference {
                quality: self.codings[position].1,
                position: Some(position),
            },
            None if coding.eq_ignore_ascii_case(IDENTITY) => Preference {
                quality: self
                    .codings
                    .iter()
                    .map(|(_, q)| *q)
                    .filter(|q| *q > 0.0)
                    .fold(1.0, f32::min),
                position: None,
            },
            None => return None,
        };

        (pref.quality > 0.0).then_some(pref)
    }
}

/// Parses an encoding entry like "gzip" or "br;q=0.8" into (encoding, quality).
fn parse_encoding_with_quality(s: &str) -> (&str, f32) {
    let mut parts = s.splitn(2, ';');
    let encoding = parts.next().unwrap_or("").trim();

    let quality = parts
        .next()
        .and_then(|q| {
            let q = q.trim();
            if q.starts_with("q=") || q.starts_with("Q=") {
                q[2..].trim().parse::<f32>().ok()
            } else {
                None
            }
        })
        .unwrap_or(1.0);

    (encoding, quality)
}
