// Copyright 2026 OPeNDAP, Inc.

//! Error types for the PPT client.

use std::io;

use thiserror::Error;

use crate::client::ConnectionState;

/// Result type alias using `PptError`.
pub type Result<T> = std::result::Result<T, PptError>;

/// Every failure the transport can report.
///
/// Any error returned by a socket-touching operation means the connection
/// has already been torn down and must be discarded.
#[derive(Debug, Error)]
pub enum PptError {
    /// The BES host name could not be resolved to an address.
    #[error("don't know about host {host}: {source}")]
    HostResolution {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The socket could not be opened or configured.
    #[error("could not connect to host {host} on port {port}: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The handshake response was missing or not the OK token.
    #[error("failed to initialize connection: {0}")]
    Initialization(String),

    /// Read or write failure in the middle of a session.
    #[error("transport I/O error: {0}")]
    TransportIo(#[from] io::Error),

    /// The peer closed the stream before a complete chunk or message arrived.
    #[error("premature end of stream: {0}")]
    EndOfStream(String),

    /// A chunk header or extension could not be understood.
    #[error("malformed chunk: {0}")]
    Protocol(String),

    /// The operation is not valid in the connection's current state.
    #[error("{operation} is not permitted while the connection is {state}")]
    OutOfSequence {
        operation: &'static str,
        state: ConnectionState,
    },

    /// The connection (or stream) has already been closed.
    #[error("connection is closed")]
    Closed,

    /// The client configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PptError {
    pub(crate) fn end_of_stream(msg: impl Into<String>) -> Self {
        PptError::EndOfStream(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        PptError::Protocol(msg.into())
    }
}
