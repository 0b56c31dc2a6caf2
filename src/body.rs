use crate::codec::Encoding;
use bytes::{Buf, Bytes, BytesMut};
use compression_codecs::EncodeV2;
use compression_core::util::{PartialBuffer, WriteBuffer};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

const SCRATCH_SIZE: usize = 8 * 1024;

pin_project! {
    /// Response body produced by the compression service.
    ///
    /// Either streams the inner body through an encoder or forwards it as is.
    #[project = CompressionBodyProj]
    #[allow(missing_docs)]
    pub enum CompressionBody<B> {
        /// Body encoded with a negotiated content coding.
        Encoded {
            #[pin]
            inner: B,
            state: EncoderState,
        },
        /// Body forwarded without compression.
        Identity {
            #[pin]
            inner: B,
        },
    }
}

impl<B> CompressionBody<B> {
    /// Wraps `inner` so that it is encoded with `encoding`.
    ///
    /// With `flush_each_chunk` the encoder is flushed after every data frame,
    /// so streaming clients see data as soon as it is produced.
    pub fn encoded(inner: B, encoding: Encoding, flush_each_chunk: bool) -> Self {
        Self::Encoded {
            inner,
            state: EncoderState::new(encoding, flush_each_chunk),
        }
    }

    /// Wraps `inner` without compressing it.
    pub fn identity(inner: B) -> Self {
        Self::Identity { inner }
    }

    /// Returns true if this body is being compressed.
    pub fn is_encoded(&self) -> bool {
        matches!(self, Self::Encoded { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Pulling frames from the inner body.
    Streaming,
    /// Inner body is exhausted; the encoder still has to emit its footer.
    Finishing,
    /// Encoder is done; buffered trailers are next.
    Trailers,
    Done,
}

#[derive(Clone, Copy)]
enum Drain {
    Flush,
    Finish,
}

/// Encoder plus the bookkeeping for one compressed body.
pub(crate) struct EncoderState {
    encoder: Box<dyn EncodeV2 + Send>,
    scratch: Box<[u8]>,
    flush_each_chunk: bool,
    phase: Phase,
    trailers: Option<HeaderMap>,
}

impl EncoderState {
    fn new(encoding: Encoding, flush_each_chunk: bool) -> Self {
        Self {
            encoder: encoding.encoder(),
            scratch: vec![0u8; SCRATCH_SIZE].into_boxed_slice(),
            flush_each_chunk,
            phase: Phase::Streaming,
            trailers: None,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub(crate) fn flush_each_chunk(&self) -> bool {
        self.flush_each_chunk
    }

    /// Feeds `input` through the encoder and returns whatever it produced.
    fn encode(&mut self, input: &[u8]) -> io::Result<Bytes> {
        let mut out = BytesMut::new();
        let mut input_buf = PartialBuffer::new(input);

        while input_buf.written_len() < input.len() {
            let consumed = input_buf.written_len();
            let mut buf = WriteBuffer::new_initialized(&mut self.scratch[..]);
            self.encoder
                .encode(&mut input_buf, &mut buf)
                .map_err(io::Error::other)?;
            let written = buf.written_len();
            out.extend_from_slice(&self.scratch[..written]);

            if written == 0 && input_buf.written_len() == consumed {
                return Err(io::Error::other("encoder made no progress"));
            }
        }

        if self.flush_each_chunk {
            self.drain(Drain::Flush, &mut out)?;
        }

        Ok(out.freeze())
    }

    /// Repeatedly flushes or finishes the encoder until it reports completion.
    fn drain(&mut self, step: Drain, out: &mut BytesMut) -> io::Result<()> {
        loop {
            let mut buf = WriteBuffer::new_initialized(&mut self.scratch[..]);
            let done = match step {
                Drain::Flush => self.encoder.flush(&mut buf),
                Drain::Finish => self.encoder.finish(&mut buf),
            }
            .map_err(io::Error::other)?;
            let written = buf.written_len();
            out.extend_from_slice(&self.scratch[..written]);

            if done {
                return Ok(());
            }
        }
    }

    fn fail(&mut self, err: io::Error) -> Poll<Option<io::Result<Frame<Bytes>>>> {
        self.phase = Phase::Done;
        Poll::Ready(Some(Err(err)))
    }

    fn poll_encoded<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<io::Result<Frame<Bytes>>>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.phase {
                Phase::Done => return Poll::Ready(None),

                Phase::Trailers => {
                    self.phase = Phase::Done;
                    if let Some(trailers) = self.trailers.take() {
                        return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                    }
                }

                Phase::Finishing => {
                    let mut out = BytesMut::new();
                    if let Err(err) = self.drain(Drain::Finish, &mut out) {
                        return self.fail(err);
                    }
                    self.phase = if self.trailers.is_some() {
                        Phase::Trailers
                    } else {
                        Phase::Done
                    };
                    if !out.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(out.freeze()))));
                    }
                }

                Phase::Streaming => match ready!(inner.as_mut().poll_frame(cx)) {
                    None => self.phase = Phase::Finishing,
                    Some(Err(err)) => return self.fail(io::Error::other(err.into())),
                    Some(Ok(frame)) => match frame.into_data() {
                        Ok(mut data) => {
                            let chunk = data.copy_to_bytes(data.remaining());
                            match self.encode(&chunk) {
                                // encoder buffered everything; keep reading
                                Ok(out) if out.is_empty() => {}
                                Ok(out) => return Poll::Ready(Some(Ok(Frame::data(out)))),
                                Err(err) => return self.fail(err),
                            }
                        }
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                self.trailers = Some(trailers);
                                self.phase = Phase::Finishing;
                            }
                        }
                    },
                },
            }
        }
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CompressionBodyProj::Encoded { inner, state } => state.poll_encoded(cx, inner),
            CompressionBodyProj::Identity { inner } => match ready!(inner.poll_frame(cx)) {
                None => Poll::Ready(None),
                Some(Ok(frame)) => Poll::Ready(Some(Ok(
                    frame.map_data(|mut data| data.copy_to_bytes(data.remaining()))
                ))),
                Some(Err(err)) => Poll::Ready(Some(Err(io::Error::other(err.into())))),
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Encoded { state, .. } => state.phase() == Phase::Done,
            CompressionBody::Identity { inner } => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            CompressionBody::Encoded { .. } => SizeHint::default(),
            CompressionBody::Identity { inner } => inner.size_hint(),
        }
    }
}
