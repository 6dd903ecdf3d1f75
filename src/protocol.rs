// Copyright 2026 OPeNDAP, Inc.

//! Chunk framing used on a PPT connection once the handshake completes.
//!
//! Every chunk starts with an eight byte ASCII header:
//!
//! * SIZE0...SIZE6  seven hex digits, zero padded, giving the number of
//!                  body bytes that follow (at most 0x0fffffff).
//!
//! * TYPE           one byte. The supported values are:
//!
//!     * 'd'  a data chunk, the body is message payload
//!
//!     * 'x'  an extension chunk, the body is a list of `key=value;`
//!            entries that carry out of band status
//!
//! A data chunk with an empty body (`0000000d`) closes the current message.
//! Error responses are signalled by an extension chunk containing
//! `status=error;`, after which every data chunk of that message carries
//! error payload.

use std::str;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{PptError, Result};
use crate::session::PPT_EXIT_NOW;

pub const CHUNK_SIZE_ENCODING_BYTES: usize = 7;
pub const CHUNK_TYPE_ENCODING_BYTES: usize = 1;
pub const CHUNK_HEADER_SZ: usize =
    CHUNK_SIZE_ENCODING_BYTES + CHUNK_TYPE_ENCODING_BYTES;

/// Largest body size the seven hex digit header can describe.
pub const MAX_CHUNK_SIZE: usize = 0x0fff_ffff;

/// Body size at which the writer emits a chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 65535;

/// Largest chunk body the reader is willing to buffer.
pub const DEFAULT_MAX_READ_CHUNK_SIZE: usize = 16_777_216;

pub const CLOSING_CHUNK: &[u8; CHUNK_HEADER_SZ] = b"0000000d";

pub const STATUS_EXTENSION: &str = "status=";
pub const COUNT_EXTENSION: &str = "count=";
pub const ERROR_STATUS: &str = "error";
pub const EMERGENCY_EXIT_STATUS: &str = "exit";
pub const EXIT_STATUS: &str = PPT_EXIT_NOW;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ChunkType {
    Data = 0x64,
    Extension = 0x78,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_type: ChunkType,
    pub data_len: usize,
}

impl ChunkHeader {
    pub fn parse(buf: &[u8]) -> Result<ChunkHeader> {
        if buf.len() < CHUNK_HEADER_SZ {
            return Err(PptError::protocol(format!(
                "chunk header needs {} bytes, got {}",
                CHUNK_HEADER_SZ,
                buf.len()
            )));
        }

        let size_bytes = &buf[..CHUNK_SIZE_ENCODING_BYTES];
        if !size_bytes.iter().all(u8::is_ascii_hexdigit) {
            return Err(PptError::protocol(format!(
                "chunk size is not hex encoded: {:?}",
                String::from_utf8_lossy(size_bytes)
            )));
        }
        // All bytes are ASCII hex digits at this point.
        let size_str = str::from_utf8(size_bytes)
            .map_err(|e| PptError::protocol(e.to_string()))?;
        let data_len = usize::from_str_radix(size_str, 16)
            .map_err(|e| PptError::protocol(e.to_string()))?;

        let type_byte = buf[CHUNK_SIZE_ENCODING_BYTES];
        let chunk_type = ChunkType::from_u8(type_byte).ok_or_else(|| {
            PptError::protocol(format!(
                "unknown chunk type {:?}",
                char::from(type_byte)
            ))
        })?;

        Ok(ChunkHeader {
            chunk_type,
            data_len,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        if self.data_len > MAX_CHUNK_SIZE {
            return Err(PptError::protocol(format!(
                "chunk size of {} bytes is too large to be encoded",
                self.data_len
            )));
        }
        let type_byte = self
            .chunk_type
            .to_u8()
            .ok_or_else(|| PptError::protocol("invalid chunk type"))?;
        buf.reserve(CHUNK_HEADER_SZ);
        buf.put_slice(format!("{:07x}", self.data_len).as_bytes());
        buf.put_u8(type_byte);
        Ok(())
    }

    pub fn is_last(&self) -> bool {
        self.chunk_type == ChunkType::Data && self.data_len == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_type: ChunkType,
    pub body: Bytes,
}

impl Chunk {
    pub fn data(body: impl Into<Bytes>) -> Chunk {
        Chunk {
            chunk_type: ChunkType::Data,
            body: body.into(),
        }
    }

    pub fn extension(content: &str) -> Chunk {
        Chunk {
            chunk_type: ChunkType::Extension,
            body: Bytes::copy_from_slice(content.as_bytes()),
        }
    }

    pub fn status(status: &str) -> Chunk {
        Chunk::extension(&format!("{}{};", STATUS_EXTENSION, status))
    }

    pub fn closing() -> Chunk {
        Chunk::data(Bytes::new())
    }

    pub fn is_last(&self) -> bool {
        self.chunk_type == ChunkType::Data && self.body.is_empty()
    }

    pub fn header(&self) -> ChunkHeader {
        ChunkHeader {
            chunk_type: self.chunk_type,
            data_len: self.body.len(),
        }
    }
}

/// Status values carried by `status=` extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Error,
    EmergencyExit,
    Exit,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    Status(Status),
    Count(String),
    Other(String),
}

/// Splits the body of an extension chunk into its entries.
pub fn parse_extensions(content: &str) -> Vec<Extension> {
    content
        .split(';')
        .filter(|e| !e.is_empty())
        .map(|e| {
            if let Some(status) = e.strip_prefix(STATUS_EXTENSION) {
                let status = if status.eq_ignore_ascii_case(ERROR_STATUS) {
                    Status::Error
                } else if status.eq_ignore_ascii_case(EMERGENCY_EXIT_STATUS) {
                    Status::EmergencyExit
                } else if status.eq_ignore_ascii_case(EXIT_STATUS) {
                    Status::Exit
                } else {
                    Status::Other(status.to_string())
                };
                Extension::Status(status)
            } else if let Some(count) = e.strip_prefix(COUNT_EXTENSION) {
                Extension::Count(count.to_string())
            } else {
                Extension::Other(e.to_string())
            }
        })
        .collect()
}

/// Codec for PPT chunks.
#[derive(Debug, Clone)]
pub struct ChunkCodec {
    max_chunk_size: usize,
}

impl ChunkCodec {
    pub fn new(max_chunk_size: usize) -> ChunkCodec {
        ChunkCodec { max_chunk_size }
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        ChunkCodec::new(DEFAULT_MAX_READ_CHUNK_SIZE)
    }
}

impl Decoder for ChunkCodec {
    type Item = Chunk;
    type Error = PptError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Chunk>> {
        if buf.len() < CHUNK_HEADER_SZ {
            return Ok(None);
        }

        let header = ChunkHeader::parse(&buf[..CHUNK_HEADER_SZ])?;
        if header.data_len > self.max_chunk_size {
            return Err(PptError::protocol(format!(
                "found a chunk of {} bytes, larger than the supported {} bytes",
                header.data_len, self.max_chunk_size
            )));
        }

        let frame_len = CHUNK_HEADER_SZ + header.data_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(CHUNK_HEADER_SZ);
        let body = buf.split_to(header.data_len).freeze();

        Ok(Some(Chunk {
            chunk_type: header.chunk_type,
            body,
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Chunk>> {
        match self.decode(buf)? {
            Some(chunk) => Ok(Some(chunk)),
            None if buf.is_empty() => Ok(None),
            None => Err(PptError::end_of_stream(format!(
                "stream ended inside a chunk, {} bytes left over",
                buf.len()
            ))),
        }
    }
}

impl Encoder<Chunk> for ChunkCodec {
    type Error = PptError;

    fn encode(&mut self, chunk: Chunk, buf: &mut BytesMut) -> Result<()> {
        chunk.header().encode(buf)?;
        buf.extend_from_slice(&chunk.body);
        Ok(())
    }
}
