// Copyright 2026 OPeNDAP, Inc.

//! Write side of a PPT connection.

use std::io::{self, Error, ErrorKind, Write};

use bytes::BytesMut;
use slog::{debug, trace, Logger};
use tokio_util::codec::Encoder;

use crate::protocol::{
    Chunk, ChunkCodec, ChunkType, DEFAULT_CHUNK_SIZE, ERROR_STATUS,
    EXIT_STATUS, MAX_CHUNK_SIZE,
};
use crate::session::{PPTCLIENT_COMPLETE_DATA_TRANSMITION, PPT_EXIT_NOW};

const CLOSED_MSG: &str = "chunked writer has been closed";

fn closed_error() -> Error {
    Error::new(ErrorKind::NotConnected, CLOSED_MSG)
}

/// Splits written bytes into data chunks.
///
/// Bytes are cached until `chunk_size` of them are available, at which
/// point a full chunk goes out. `finish` sends whatever is cached followed
/// by the closing chunk, after which the writer is ready for the next
/// message.
pub struct ChunkedWriter<W: Write> {
    inner: W,
    codec: ChunkCodec,
    cache: BytesMut,
    wire_buf: BytesMut,
    chunk_size: usize,
    in_error: bool,
    is_open: bool,
    log: Logger,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W, log: Option<&Logger>) -> ChunkedWriter<W> {
        ChunkedWriter::build(inner, DEFAULT_CHUNK_SIZE, log)
    }

    /// Fails when `chunk_size` is zero or cannot be encoded in a header.
    pub fn with_chunk_size(
        inner: W,
        chunk_size: usize,
        log: Option<&Logger>,
    ) -> io::Result<ChunkedWriter<W>> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            let msg = format!(
                "chunk size must be between 1 and {} bytes, you asked for {}",
                MAX_CHUNK_SIZE, chunk_size
            );
            return Err(Error::new(ErrorKind::InvalidInput, msg));
        }
        Ok(ChunkedWriter::build(inner, chunk_size, log))
    }

    fn build(inner: W, chunk_size: usize, log: Option<&Logger>) -> Self {
        ChunkedWriter {
            inner,
            codec: ChunkCodec::default(),
            cache: BytesMut::with_capacity(chunk_size),
            wire_buf: BytesMut::new(),
            chunk_size,
            in_error: false,
            is_open: true,
            log: crate::logger_or_default(log),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// True while the current message is carrying error payload.
    pub fn is_error(&self) -> bool {
        self.in_error
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn check_open(&self) -> io::Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(closed_error())
        }
    }

    fn emit(&mut self, chunk: Chunk) -> io::Result<()> {
        trace!(self.log, "writing chunk";
            "type" => ?chunk.chunk_type, "size" => chunk.body.len());
        self.codec
            .encode(chunk, &mut self.wire_buf)
            .map_err(|e| Error::new(ErrorKind::InvalidInput, e))?;
        let result = self.inner.write_all(&self.wire_buf);
        self.wire_buf.clear();
        result
    }

    fn flush_cache(&mut self) -> io::Result<()> {
        if !self.cache.is_empty() {
            let body = self.cache.split().freeze();
            self.emit(Chunk {
                chunk_type: ChunkType::Data,
                body,
            })?;
        }
        Ok(())
    }

    /// Switches the current message to error payload. Data written from
    /// here until `finish` reaches the peer's error stream.
    pub fn begin_error(&mut self) -> io::Result<()> {
        self.check_open()?;
        self.flush_cache()?;
        self.emit(Chunk::status(ERROR_STATUS))?;
        self.in_error = true;
        Ok(())
    }

    pub fn write_extension(&mut self, content: &str) -> io::Result<()> {
        self.check_open()?;
        self.flush_cache()?;
        self.emit(Chunk::extension(content))
    }

    /// Ends the current message.
    pub fn finish(&mut self) -> io::Result<()> {
        self.check_open()?;
        debug!(self.log, "finishing message"; "cached" => self.cache.len());
        self.flush_cache()?;
        self.emit(Chunk::closing())?;
        self.in_error = false;
        self.inner.flush()
    }

    /// Tells the peer this side is going away and closes the writer.
    /// Closing an already closed writer does nothing.
    pub fn close(&mut self) -> io::Result<()> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;
        debug!(self.log, "closing chunked writer");
        self.flush_cache()?;
        self.emit(Chunk::status(EXIT_STATUS))?;
        self.emit(Chunk::closing())?;
        self.inner.flush()
    }
}

impl<W: Write> Write for ChunkedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;
        let mut rest = buf;
        while !rest.is_empty() {
            let room = self.chunk_size - self.cache.len();
            let n = room.min(rest.len());
            self.cache.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            if self.cache.len() >= self.chunk_size {
                self.flush_cache()?;
            }
        }
        Ok(buf.len())
    }

    /// Flushes the underlying sink. Cached bytes stay cached until a full
    /// chunk accumulates or the message is finished.
    fn flush(&mut self) -> io::Result<()> {
        self.check_open()?;
        self.inner.flush()
    }
}

/// Writer for the terminator based framing: each message is followed by
/// `PPTCLIENT_COMPLETE_DATA_TRANSMITION`.
pub struct MarkedWriter<W: Write> {
    inner: W,
    is_open: bool,
    log: Logger,
}

impl<W: Write> MarkedWriter<W> {
    pub fn new(inner: W, log: Option<&Logger>) -> MarkedWriter<W> {
        MarkedWriter {
            inner,
            is_open: true,
            log: crate::logger_or_default(log),
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_message(&mut self, payload: &[u8]) -> io::Result<()> {
        if !self.is_open {
            return Err(closed_error());
        }
        debug!(self.log, "writing marked message"; "size" => payload.len());
        self.inner.write_all(payload)?;
        self.inner
            .write_all(PPTCLIENT_COMPLETE_DATA_TRANSMITION.as_bytes())?;
        self.inner.flush()
    }

    pub fn close(&mut self) -> io::Result<()> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;
        self.inner.write_all(PPT_EXIT_NOW.as_bytes())?;
        self.inner.flush()
    }
}

/// The write half of a connection in whichever framing was negotiated.
pub enum FrameEncoder<W: Write> {
    Chunked(ChunkedWriter<W>),
    Marked(MarkedWriter<W>),
}

impl<W: Write> FrameEncoder<W> {
    /// Sends `payload` as one complete message.
    pub fn write_message(&mut self, payload: &[u8]) -> io::Result<()> {
        match self {
            FrameEncoder::Chunked(w) => {
                w.write_all(payload)?;
                w.finish()
            }
            FrameEncoder::Marked(w) => w.write_message(payload),
        }
    }

    /// Signals the peer that the session is over.
    pub fn close(&mut self) -> io::Result<()> {
        match self {
            FrameEncoder::Chunked(w) => w.close(),
            FrameEncoder::Marked(w) => w.close(),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            FrameEncoder::Chunked(w) => w.is_open(),
            FrameEncoder::Marked(w) => w.is_open(),
        }
    }

    pub fn into_inner(self) -> W {
        match self {
            FrameEncoder::Chunked(w) => w.into_inner(),
            FrameEncoder::Marked(w) => w.into_inner(),
        }
    }
}
