// Copyright 2026 OPeNDAP, Inc.

//! PPT: the transport between the OLFS and the BES
//!
//! The BES (Back End Server) serves scientific data to the OLFS front end
//! over a plain TCP connection. A session runs as follows:
//!
//! * Handshake. The client sends `PPTCLIENT_TESTING_CONNECTION` as raw
//!   ASCII and the server answers `PPTSERVER_CONNECTION_OK`. Anything else
//!   ends the session.
//!
//! * Requests and responses. Each message is a sequence of chunks, see
//!   [`protocol`] for the header layout. A response may switch to error
//!   payload part way through with a `status=error;` extension chunk.
//!
//! * Shutdown. Either side may send a `status=PPT_EXIT_NOW;` extension
//!   followed by a closing chunk before closing the socket.
//!
//! Older servers frame messages without length prefixes, ending each one
//! with a `*_COMPLETE_DATA_TRANSMITION` token instead. That framing is
//! still available through [`config::Framing::Marked`].
//!
//! The client is blocking and owns its socket; use one client per thread.

#![allow(missing_docs)]

use slog::{o, Drain, Logger};

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod mark;
pub mod protocol;
pub mod reader;
pub mod session;
mod teardown;
pub mod writer;

pub use client::{CancelHandle, ConnectionState, PptClient};
pub use command::{BesCommand, CommandElement};
pub use config::{ClientConfig, Framing};
pub use error::{PptError, Result};

/// The caller's logger, or one that forwards to the `log` crate.
pub(crate) fn logger_or_default(log: Option<&Logger>) -> Logger {
    log.cloned()
        .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()))
}
