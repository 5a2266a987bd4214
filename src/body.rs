use bytes::{Buf, Bytes, BytesMut};
use compression_codecs::EncodeV2;
use compression_core::util::{PartialBuffer, WriteBuffer};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

pin_project! {
    /// A response body that may be encoded.
    ///
    /// Wraps the inner body and either pushes every data frame through an
    /// encoder or passes frames through unchanged. The inner body is only
    /// polled when this body is polled, so a slow consumer holds back the
    /// producer and no encoded output is ever dropped. Dropping the body
    /// releases the encoder without emitting anything further.
    #[project = CompressionBodyProj]
    #[allow(missing_docs)]
    pub enum CompressionBody<B> {
        /// Encoded body.
        Compressed {
            #[pin]
            inner: B,
            state: CompressedBody,
        },
        /// Passthrough body without encoding.
        Passthrough {
            #[pin]
            inner: B,
        },
    }
}

/// State and buffers for an actively encoded body.
pub(crate) struct CompressedBody {
    encoder: Box<dyn EncodeV2 + Send>,
    output_buffer: Vec<u8>,
    always_flush: bool,
    state: CompressState,
    pending_trailers: Option<http::HeaderMap>,
}

/// State machine for encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompressState {
    /// Reading data from inner body and encoding.
    Reading,
    /// Finishing the encoder after inner body is done.
    Finishing,
    /// Emitting buffered trailers.
    Trailers,
    /// Encoding is complete.
    Done,
}

impl CompressedBody {
    fn new(encoder: Box<dyn EncodeV2 + Send>, always_flush: bool) -> Self {
        Self {
            encoder,
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
            always_flush,
            state: CompressState::Reading,
            pending_trailers: None,
        }
    }

    /// Returns the current encoding state.
    pub(crate) fn state(&self) -> CompressState {
        self.state
    }

    /// Returns whether always flush is enabled.
    #[allow(dead_code)]
    pub(crate) fn always_flush(&self) -> bool {
        self.always_flush
    }

    fn after_finish(&self) -> CompressState {
        if self.pending_trailers.is_some() {
            CompressState::Trailers
        } else {
            CompressState::Done
        }
    }

    /// Polls the inner body and encodes data.
    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.state {
                CompressState::Done => return Poll::Ready(None),

                CompressState::Trailers => {
                    self.state = CompressState::Done;
                    if let Some(trailers) = self.pending_trailers.take() {
                        return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                    }
                    return Poll::Ready(None);
                }

                CompressState::Finishing => {
                    let mut output =
                        WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

                    let done = match self.encoder.finish(&mut output) {
                        Ok(done) => done,
                        Err(e) => {
                            self.state = CompressState::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                    };
                    let written = output.written_len();
                    if done {
                        self.state = self.after_finish();
                    }
                    if written > 0 {
                        let data = Bytes::copy_from_slice(&self.output_buffer[..written]);
                        return Poll::Ready(Some(Ok(Frame::data(data))));
                    }
                    if !done {
                        self.state = CompressState::Done;
                        return Poll::Ready(Some(Err(io::Error::other(
                            "encoder made no progress while finishing",
                        ))));
                    }
                }

                CompressState::Reading => match inner.as_mut().poll_frame(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => {
                        self.state = CompressState::Finishing;
                    }
                    Poll::Ready(Some(Err(e))) => {
                        return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                    }
                    Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                        Ok(mut data) => {
                            let input = data.copy_to_bytes(data.remaining());
                            let encoded = match self.compress_chunk(&input) {
                                Ok(encoded) => encoded,
                                Err(e) => {
                                    self.state = CompressState::Done;
                                    return Poll::Ready(Some(Err(e)));
                                }
                            };
                            // Encoders may buffer; keep reading until they emit.
                            if !encoded.is_empty() {
                                return Poll::Ready(Some(Ok(Frame::data(encoded))));
                            }
                        }
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                // Buffer trailers and finish the encoder first
                                self.pending_trailers = Some(trailers);
                                self.state = CompressState::Finishing;
                            }
                        }
                    },
                },
            }
        }
    }

    /// Encodes a chunk of input data.
    fn compress_chunk(&mut self, input: &[u8]) -> io::Result<Bytes> {
        let mut input_buf = PartialBuffer::new(input);
        let mut all_output = BytesMut::new();

        // Keep encoding until all input is consumed
        while !input_buf.unwritten().is_empty() {
            let consumed = input_buf.written_len();
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

            self.encoder.encode(&mut input_buf, &mut output)?;

            let written = output.written_len();
            if written > 0 {
                all_output.extend_from_slice(&self.output_buffer[..written]);
            }

            if written == 0 && input_buf.written_len() == consumed {
                return Err(io::Error::other("encoder made no progress"));
            }
        }

        if self.always_flush {
            loop {
                let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
                let done = self.encoder.flush(&mut output)?;
                let written = output.written_len();
                if written > 0 {
                    all_output.extend_from_slice(&self.output_buffer[..written]);
                }
                if done {
                    break;
                }
            }
        }

        Ok(all_output.freeze())
    }
}

impl<B> CompressionBody<B> {
    /// Creates a body that pushes the inner body through `encoder`.
    pub fn compressed(inner: B, encoder: Box<dyn EncodeV2 + Send>, always_flush: bool) -> Self {
        Self::Compressed {
            inner,
            state: CompressedBody::new(encoder, always_flush),
        }
    }

    /// Creates a passthrough body without encoding.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }

    /// Whether an encoder is attached.
    pub fn is_compressed(&self) -> bool {
        matches!(self, CompressionBody::Compressed { .. })
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CompressionBodyProj::Passthrough { inner } => match inner.poll_frame(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Ok(frame))) => {
                    let frame = frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                    Poll::Ready(Some(Ok(frame)))
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
            },
            CompressionBodyProj::Compressed { inner, state } => state.poll_compressed(cx, inner),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Passthrough { inner } => inner.is_end_stream(),
            CompressionBody::Compressed { state, .. } => state.state() == CompressState::Done,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            CompressionBody::Passthrough { inner } => inner.size_hint(),
            // Encoded size is unknown
            CompressionBody::Compressed { .. } => http_body::SizeHint::default(),
        }
    }
}
