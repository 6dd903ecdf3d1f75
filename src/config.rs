// Copyright 2026 OPeNDAP, Inc.

//! Connection settings supplied by the caller.

use std::time::Duration;

use serde_derive::Deserialize;

use crate::error::{PptError, Result};
use crate::protocol::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_READ_CHUNK_SIZE, MAX_CHUNK_SIZE,
};
use crate::session::{HANDSHAKE_BUFFER_SIZE, PPTSERVER_CONNECTION_OK};

/// Socket timeout used by the OLFS for BES connections.
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Framing used for requests and responses once the handshake is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Length prefixed chunks.
    Chunked,
    /// Messages terminated by the COMPLETE_DATA_TRANSMITION tokens.
    Marked,
}

impl Default for Framing {
    fn default() -> Self {
        Framing::Chunked
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Applied to connect and to every blocking read. Zero disables the
    /// read timeout.
    pub timeout_ms: u64,
    /// Body size at which outgoing chunks are emitted.
    pub chunk_size: usize,
    /// Largest incoming chunk accepted before the response is rejected.
    pub max_read_chunk_size: usize,
    pub handshake_buffer_size: usize,
    pub framing: Framing,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_read_chunk_size: DEFAULT_MAX_READ_CHUNK_SIZE,
            handshake_buffer_size: HANDSHAKE_BUFFER_SIZE,
            framing: Framing::default(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(PptError::Config(format!(
                "chunk_size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        if self.max_read_chunk_size > MAX_CHUNK_SIZE {
            return Err(PptError::Config(format!(
                "max_read_chunk_size may not exceed {}, got {}",
                MAX_CHUNK_SIZE, self.max_read_chunk_size
            )));
        }
        if self.handshake_buffer_size < PPTSERVER_CONNECTION_OK.len() {
            return Err(PptError::Config(format!(
                "handshake_buffer_size of {} cannot hold the OK token",
                self.handshake_buffer_size
            )));
        }
        if self.handshake_buffer_size > MAX_CHUNK_SIZE {
            return Err(PptError::Config(format!(
                "handshake_buffer_size may not exceed {}, got {}",
                MAX_CHUNK_SIZE, self.handshake_buffer_size
            )));
        }
        Ok(())
    }
}
