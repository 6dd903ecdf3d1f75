// Copyright 2026 OPeNDAP, Inc.

//! Read side of a PPT connection.

use std::io::{ErrorKind, Read, Write};

use bytes::{Bytes, BytesMut};
use slog::{debug, error, info, trace, Logger};
use tokio_util::codec::Decoder;

use crate::error::{PptError, Result};
use crate::mark::MarkFinder;
use crate::protocol::{
    parse_extensions, Chunk, ChunkCodec, ChunkType, Extension, Status,
};
use crate::session::{PPTSERVER_COMPLETE_DATA_TRANSMITION, PPT_EXIT_NOW};

const READ_BUFFER_SIZE: usize = 4096;

/// Reads from `inner` into `buf`, returning the number of bytes read.
/// Zero means end of stream.
fn fill<R: Read>(inner: &mut R, read_buf: &mut [u8]) -> Result<usize> {
    loop {
        match inner.read(read_buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Reassembles chunked messages and separates data from error payload.
pub struct ChunkedReader<R: Read> {
    inner: R,
    codec: ChunkCodec,
    buf: BytesMut,
    is_closed: bool,
    log: Logger,
}

impl<R: Read> ChunkedReader<R> {
    pub fn new(inner: R, log: Option<&Logger>) -> ChunkedReader<R> {
        ChunkedReader::with_codec(inner, ChunkCodec::default(), log)
    }

    pub fn with_codec(
        inner: R,
        codec: ChunkCodec,
        log: Option<&Logger>,
    ) -> ChunkedReader<R> {
        ChunkedReader {
            inner,
            codec,
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            is_closed: false,
            log: crate::logger_or_default(log),
        }
    }

    /// True once the peer has signalled that it is going away.
    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Returns the next chunk, or `None` if the stream ended cleanly on a
    /// chunk boundary.
    pub fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.is_closed {
            return Err(PptError::Closed);
        }
        let mut read_buf = [0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(chunk) = self.codec.decode(&mut self.buf)? {
                trace!(self.log, "read chunk";
                    "type" => ?chunk.chunk_type, "size" => chunk.body.len());
                return Ok(Some(chunk));
            }
            let n = fill(&mut self.inner, &mut read_buf)?;
            if n == 0 {
                return self.codec.decode_eof(&mut self.buf);
            }
            self.buf.extend_from_slice(&read_buf[..n]);
        }
    }

    /// Reads one complete message. Data chunks go to `data` until the
    /// peer reports an error status, and to `errors` from then on.
    ///
    /// Returns `false` if an error status was seen, in which case the
    /// contents of `errors` describe the failure.
    pub fn read_chunked_message<D, E>(
        &mut self,
        data: &mut D,
        errors: &mut E,
    ) -> Result<bool>
    where
        D: Write + ?Sized,
        E: Write + ?Sized,
    {
        let mut is_error = false;
        let mut exiting = false;
        let mut bytes_read: u64 = 0;

        loop {
            let chunk = self.read_chunk()?;
            let exit_requested = std::mem::replace(&mut exiting, false);

            let chunk = match chunk {
                Some(chunk) if chunk.is_last() => {
                    if exit_requested {
                        debug!(self.log, "stream closed by source");
                        self.is_closed = true;
                    }
                    break;
                }
                Some(chunk) => chunk,
                None if exit_requested => {
                    debug!(self.log, "stream closed by source");
                    self.is_closed = true;
                    break;
                }
                None => {
                    return Err(PptError::end_of_stream(
                        "stream ended before the closing chunk",
                    ))
                }
            };

            match chunk.chunk_type {
                ChunkType::Data => {
                    bytes_read += chunk.body.len() as u64;
                    if is_error {
                        errors.write_all(&chunk.body)?;
                        errors.flush()?;
                    } else {
                        data.write_all(&chunk.body)?;
                        data.flush()?;
                    }
                }
                ChunkType::Extension => {
                    let content = String::from_utf8_lossy(&chunk.body);
                    for extension in parse_extensions(&content) {
                        match extension {
                            Extension::Status(Status::Error) => is_error = true,
                            Extension::Status(Status::EmergencyExit) => {
                                error!(self.log, "stream source requested an \
                                    emergency exit, closing connection");
                                self.is_closed = true;
                            }
                            Extension::Status(Status::Exit) => exiting = true,
                            other => {
                                debug!(self.log, "received extension";
                                    "extension" => ?other);
                            }
                        }
                    }
                    if self.is_closed {
                        break;
                    }
                }
            }
        }

        info!(self.log, "read chunked message";
            "bytes" => bytes_read, "error" => is_error);
        Ok(!is_error)
    }
}

/// Reads messages delimited by `PPTSERVER_COMPLETE_DATA_TRANSMITION`.
///
/// Bytes that might be the start of the mark are held back. If the mark
/// completes they are dropped; if it falls apart they are released to the
/// output unchanged, so nothing that merely resembles the mark is lost.
pub struct MarkedReader<R: Read> {
    inner: R,
    finder: MarkFinder,
    held: Vec<u8>,
    pending: BytesMut,
    out_buf: BytesMut,
    is_closed: bool,
    log: Logger,
}

impl<R: Read> MarkedReader<R> {
    pub fn new(inner: R, log: Option<&Logger>) -> MarkedReader<R> {
        MarkedReader::with_mark(
            inner,
            PPTSERVER_COMPLETE_DATA_TRANSMITION.as_bytes(),
            log,
        )
    }

    pub fn with_mark(
        inner: R,
        mark: &'static [u8],
        log: Option<&Logger>,
    ) -> MarkedReader<R> {
        MarkedReader {
            inner,
            finder: MarkFinder::new(mark),
            held: Vec::with_capacity(mark.len()),
            pending: BytesMut::new(),
            out_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            is_closed: false,
            log: crate::logger_or_default(log),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Feeds one byte, returning `true` when it completes the mark.
    fn feed(&mut self, b: u8) -> bool {
        if self.finder.check(b) {
            self.held.clear();
            return true;
        }
        if self.finder.mark_index() > 0 {
            self.held.push(b);
            return false;
        }
        if self.held.is_empty() {
            self.out_buf.extend_from_slice(&[b]);
            return false;
        }

        // A suspected mark fell apart. Release held bytes one at a time
        // until what is left is again the start of the mark.
        self.held.push(b);
        loop {
            let first = self.held.remove(0);
            self.out_buf.extend_from_slice(&[first]);
            let finder = &mut self.finder;
            let still_mark = self.held.iter().all(|&h| {
                finder.check(h);
                finder.mark_index() > 0
            });
            if still_mark {
                return false;
            }
        }
    }

    /// Copies one message to `data`, stripping the trailing mark. Bytes
    /// that follow the mark are kept for the next message.
    pub fn read_marked_message<D: Write + ?Sized>(
        &mut self,
        data: &mut D,
    ) -> Result<()> {
        if self.is_closed {
            return Err(PptError::Closed);
        }
        self.finder.reset();
        self.held.clear();

        let exit_token = PPT_EXIT_NOW.as_bytes();
        let mut read_buf = [0u8; READ_BUFFER_SIZE];
        let mut at_start = true;
        let mut lead = BytesMut::new();
        let mut bytes_read: u64 = 0;

        loop {
            let input = if self.pending.is_empty() {
                let n = fill(&mut self.inner, &mut read_buf)?;
                if n == 0 {
                    return Err(PptError::end_of_stream(
                        "stream ended before the end of message mark",
                    ));
                }
                Bytes::copy_from_slice(&read_buf[..n])
            } else {
                self.pending.split().freeze()
            };

            // The opening bytes are held until they either spell out the
            // exit token or cannot.
            let input = if at_start {
                lead.extend_from_slice(&input);
                if lead.starts_with(exit_token) {
                    info!(self.log, "peer requested exit");
                    self.is_closed = true;
                    return Ok(());
                }
                if exit_token.starts_with(&lead) {
                    continue;
                }
                at_start = false;
                lead.split().freeze()
            } else {
                input
            };

            let mut done = false;
            for (i, &b) in input.iter().enumerate() {
                if self.feed(b) {
                    self.pending.extend_from_slice(&input[i + 1..]);
                    done = true;
                    break;
                }
            }

            bytes_read += self.out_buf.len() as u64;
            data.write_all(&self.out_buf)?;
            self.out_buf.clear();

            if done {
                data.flush()?;
                debug!(self.log, "read marked message"; "bytes" => bytes_read);
                return Ok(());
            }
        }
    }
}

/// The read half of a connection in whichever framing was negotiated.
pub enum FrameDecoder<R: Read> {
    Chunked(ChunkedReader<R>),
    Marked(MarkedReader<R>),
}

impl<R: Read> FrameDecoder<R> {
    /// Reads one response. The terminator based framing has no error
    /// channel, so it always reports success.
    pub fn read_message<D, E>(
        &mut self,
        data: &mut D,
        errors: &mut E,
    ) -> Result<bool>
    where
        D: Write + ?Sized,
        E: Write + ?Sized,
    {
        match self {
            FrameDecoder::Chunked(r) => r.read_chunked_message(data, errors),
            FrameDecoder::Marked(r) => {
                r.read_marked_message(data)?;
                Ok(true)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            FrameDecoder::Chunked(r) => r.is_closed(),
            FrameDecoder::Marked(r) => r.is_closed(),
        }
    }

    pub fn into_inner(self) -> R {
        match self {
            FrameDecoder::Chunked(r) => r.into_inner(),
            FrameDecoder::Marked(r) => r.into_inner(),
        }
    }
}
