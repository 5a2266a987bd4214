use crate::dictionary::{Dictionary, DictionaryCodec, EncodeOptions};
use compression_codecs::EncodeV2;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::io;

/// Writes a fixed prefix, then copies its input unchanged.
pub(crate) struct PrefixEncoder {
    prefix: PartialBuffer<Vec<u8>>,
}

impl PrefixEncoder {
    pub(crate) fn new(prefix: Vec<u8>) -> Self {
        Self {
            prefix: PartialBuffer::new(prefix),
        }
    }

    /// Returns whether the whole prefix has been written.
    fn write_prefix(&mut self, output: &mut WriteBuffer<'_>) -> bool {
        output.copy_unwritten_from(&mut self.prefix);
        self.prefix.unwritten().is_empty()
    }
}

impl EncodeV2 for PrefixEncoder {
    fn encode(
        &mut self,
        input: &mut PartialBuffer<&[u8]>,
        output: &mut WriteBuffer<'_>,
    ) -> io::Result<()> {
        if self.write_prefix(output) {
            output.copy_unwritten_from(input);
        }
        Ok(())
    }

    fn flush(&mut self, output: &mut WriteBuffer<'_>) -> io::Result<bool> {
        Ok(self.write_prefix(output))
    }

    fn finish(&mut self, output: &mut WriteBuffer<'_>) -> io::Result<bool> {
        Ok(self.write_prefix(output))
    }
}

/// SDCH framing without a diff: server hash, NUL, then the body verbatim.
pub(crate) struct FramingCodec;

impl DictionaryCodec for FramingCodec {
    fn encoder(
        &self,
        dictionary: &Dictionary,
        _options: EncodeOptions,
    ) -> io::Result<Box<dyn EncodeV2 + Send>> {
        let mut prefix = dictionary.server_hash().as_bytes().to_vec();
        prefix.push(0);
        Ok(Box::new(PrefixEncoder::new(prefix)))
    }
}

/// A codec that cannot build encoders.
pub(crate) struct BrokenCodec;

impl DictionaryCodec for BrokenCodec {
    fn encoder(
        &self,
        _dictionary: &Dictionary,
        _options: EncodeOptions,
    ) -> io::Result<Box<dyn EncodeV2 + Send>> {
        Err(io::Error::other("dictionary rejected"))
    }
}
