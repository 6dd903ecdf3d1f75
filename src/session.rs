// Copyright 2026 OPeNDAP, Inc.

//! The PPT session vocabulary.
//!
//! These tokens are exchanged as raw ASCII outside of any chunk framing.
//! The testing/OK pair makes up the handshake performed once per
//! connection. The data transmission tokens belong to the older
//! terminator based transport, and `PPT_EXIT_NOW` is the peer's request
//! to end the session.

use std::fmt;

pub const PPTCLIENT_TESTING_CONNECTION: &str = "PPTCLIENT_TESTING_CONNECTION";
pub const PPTSERVER_CONNECTION_OK: &str = "PPTSERVER_CONNECTION_OK";
pub const PPT_PROTOCOL_UNDEFINED: &str = "PPT_PROTOCOL_UNDEFINED";
pub const PPT_EXIT_NOW: &str = "PPT_EXIT_NOW";
pub const PPTCLIENT_COMPLETE_DATA_TRANSMITION: &str =
    "PPTCLIENT_COMPLETE_DATA_TRANSMITION";
pub const PPTSERVER_COMPLETE_DATA_TRANSMITION: &str =
    "PPTSERVER_COMPLETE_DATA_TRANSMITION";

/// Size of the buffer used to receive the handshake response.
pub const HANDSHAKE_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionToken {
    ClientTestingConnection,
    ServerConnectionOk,
    ProtocolUndefined,
    ExitNow,
    ClientCompleteDataTransmition,
    ServerCompleteDataTransmition,
}

impl SessionToken {
    const ALL: [SessionToken; 6] = [
        SessionToken::ClientTestingConnection,
        SessionToken::ServerConnectionOk,
        SessionToken::ProtocolUndefined,
        SessionToken::ExitNow,
        SessionToken::ClientCompleteDataTransmition,
        SessionToken::ServerCompleteDataTransmition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SessionToken::ClientTestingConnection => PPTCLIENT_TESTING_CONNECTION,
            SessionToken::ServerConnectionOk => PPTSERVER_CONNECTION_OK,
            SessionToken::ProtocolUndefined => PPT_PROTOCOL_UNDEFINED,
            SessionToken::ExitNow => PPT_EXIT_NOW,
            SessionToken::ClientCompleteDataTransmition => {
                PPTCLIENT_COMPLETE_DATA_TRANSMITION
            }
            SessionToken::ServerCompleteDataTransmition => {
                PPTSERVER_COMPLETE_DATA_TRANSMITION
            }
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// Matches a received buffer against the token set. The whole buffer
    /// must equal the token.
    pub fn parse(buf: &[u8]) -> Option<SessionToken> {
        SessionToken::ALL
            .iter()
            .copied()
            .find(|t| t.as_bytes() == buf)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of checking a handshake response.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HandshakeReply {
    Ok,
    /// The OK token followed by this many bytes of padding.
    OkWithPadding(usize),
    Undefined,
    Invalid(String),
}

/// NUL bytes and ASCII whitespace, as some servers pad fixed size replies.
fn is_padding(rest: &[u8]) -> bool {
    rest.iter().all(|&b| b == 0 || b.is_ascii_whitespace())
}

pub(crate) fn check_handshake_reply(buf: &[u8]) -> HandshakeReply {
    let ok = PPTSERVER_CONNECTION_OK.as_bytes();
    match SessionToken::parse(buf) {
        Some(SessionToken::ServerConnectionOk) => HandshakeReply::Ok,
        Some(SessionToken::ProtocolUndefined) => HandshakeReply::Undefined,
        _ if buf.starts_with(ok) && is_padding(&buf[ok.len()..]) => {
            HandshakeReply::OkWithPadding(buf.len() - ok.len())
        }
        _ => HandshakeReply::Invalid(String::from_utf8_lossy(buf).into_owned()),
    }
}
