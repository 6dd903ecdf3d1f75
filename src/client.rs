// Copyright 2026 OPeNDAP, Inc.

//! Blocking PPT client.
//!
//! A client owns exactly one socket. Requests and responses strictly
//! alternate: `send_request` is only accepted once the previous response
//! has been drained with `get_response`.
//!
//! Every call blocks the calling thread. There is no cancellation token;
//! a blocked call is cancelled by closing the socket from another thread
//! through a `CancelHandle`, which surfaces as an error in the blocked
//! call.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

use slog::{debug, error, info, o, warn, Logger};

use crate::command::BesCommand;
use crate::config::{ClientConfig, Framing};
use crate::error::{PptError, Result};
use crate::protocol::ChunkCodec;
use crate::reader::{ChunkedReader, FrameDecoder, MarkedReader};
use crate::session::{
    check_handshake_reply, HandshakeReply, PPTCLIENT_TESTING_CONNECTION,
};
use crate::teardown::Teardown;
use crate::writer::{ChunkedWriter, FrameEncoder, MarkedWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Ready,
    AwaitingResponse,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Ready => "ready",
            ConnectionState::AwaitingResponse => "awaiting a response",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Closes a client's socket from another thread.
pub struct CancelHandle {
    socket: TcpStream,
    log: Logger,
}

impl CancelHandle {
    /// Shuts the socket down in both directions. Any call blocked on it
    /// returns an error.
    pub fn cancel(&self) {
        info!(self.log, "cancelling connection");
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            warn!(self.log, "unable to shut down socket"; "error" => %e);
        }
    }
}

pub struct PptClient {
    host: String,
    port: u16,
    config: ClientConfig,
    state: ConnectionState,
    socket: Option<TcpStream>,
    encoder: Option<FrameEncoder<TcpStream>>,
    decoder: Option<FrameDecoder<TcpStream>>,
    command_count: u64,
    log: Logger,
}

fn read_retrying(socket: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match socket.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Discards whatever is already waiting in the receive buffer.
fn drain(socket: &mut TcpStream) -> io::Result<usize> {
    socket.set_nonblocking(true)?;
    let mut buf = [0u8; 4096];
    let mut skipped = 0;
    let result = loop {
        match socket.read(&mut buf) {
            Ok(0) => break Ok(skipped),
            Ok(n) => skipped += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(skipped),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        }
    };
    socket.set_nonblocking(false)?;
    result
}

impl PptClient {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        config: ClientConfig,
        log: Option<&Logger>,
    ) -> PptClient {
        let host = host.into();
        let log = crate::logger_or_default(log)
            .new(o!("bes_host" => host.clone(), "bes_port" => port));
        PptClient {
            host,
            port,
            config,
            state: ConnectionState::Unconnected,
            socket: None,
            encoder: None,
            decoder: None,
            command_count: 0,
            log,
        }
    }

    /// Connects and performs the handshake, returning a client that is
    /// ready for its first request.
    pub fn open(
        host: impl Into<String>,
        port: u16,
        config: ClientConfig,
        log: Option<&Logger>,
    ) -> Result<PptClient> {
        let mut client = PptClient::new(host, port, config, log);
        client.connect()?;
        client.init_connection()?;
        Ok(client)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// True between a successful handshake and the close of the session.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Ready | ConnectionState::AwaitingResponse
        )
    }

    /// Number of request/response exchanges completed through
    /// `execute_command`.
    pub fn command_count(&self) -> u64 {
        self.command_count
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.peer_addr().ok())
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: ConnectionState,
    ) -> Result<()> {
        match self.state {
            s if s == expected => Ok(()),
            ConnectionState::Closed => Err(PptError::Closed),
            state => Err(PptError::OutOfSequence { operation, state }),
        }
    }

    fn connect_addr(&self, addr: &SocketAddr) -> io::Result<TcpStream> {
        match self.config.timeout() {
            Some(timeout) => TcpStream::connect_timeout(addr, timeout),
            None => TcpStream::connect(addr),
        }
    }

    /// Resolves the host and opens the socket.
    pub fn connect(&mut self) -> Result<()> {
        self.expect_state("connect", ConnectionState::Unconnected)?;
        if let Err(e) = self.config.validate() {
            self.state = ConnectionState::Closed;
            return Err(e);
        }

        let addrs: Vec<SocketAddr> =
            match (self.host.as_str(), self.port).to_socket_addrs() {
                Ok(addrs) => addrs.collect(),
                Err(source) => {
                    self.state = ConnectionState::Closed;
                    return Err(PptError::HostResolution {
                        host: self.host.clone(),
                        source,
                    });
                }
            };
        if addrs.is_empty() {
            self.state = ConnectionState::Closed;
            return Err(PptError::HostResolution {
                host: self.host.clone(),
                source: io::Error::new(ErrorKind::NotFound, "no addresses found"),
            });
        }

        let mut last_err = None;
        for addr in &addrs {
            match self.connect_addr(addr) {
                Ok(socket) => {
                    self.socket = Some(socket);
                    break;
                }
                Err(e) => {
                    debug!(self.log, "connect attempt failed";
                        "address" => %addr, "error" => %e);
                    last_err = Some(e);
                }
            }
        }

        let configured = match self.socket.as_ref() {
            Some(socket) => socket.set_read_timeout(self.config.timeout()),
            None => Err(last_err.unwrap_or_else(|| {
                io::Error::new(ErrorKind::NotConnected, "no address accepted")
            })),
        };
        if let Err(source) = configured {
            self.close_connection(false);
            return Err(PptError::Connection {
                host: self.host.clone(),
                port: self.port,
                source,
            });
        }

        self.state = ConnectionState::Connected;
        info!(self.log, "connected to BES";
            "timeout_ms" => self.config.timeout_ms);
        Ok(())
    }

    /// Performs the handshake and sets up the configured framing.
    pub fn init_connection(&mut self) -> Result<()> {
        self.expect_state("init_connection", ConnectionState::Connected)?;
        match self.handshake() {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                debug!(self.log, "connection initialized";
                    "framing" => ?self.config.framing);
                Ok(())
            }
            Err(e) => {
                error!(self.log, "handshake failed"; "error" => %e);
                self.close_connection(false);
                Err(e)
            }
        }
    }

    fn handshake(&mut self) -> Result<()> {
        let socket = self.socket.as_mut().ok_or(PptError::Closed)?;

        socket.write_all(PPTCLIENT_TESTING_CONNECTION.as_bytes())?;
        socket.flush()?;
        debug!(self.log, "sent handshake"; "token" => PPTCLIENT_TESTING_CONNECTION);

        let mut in_buf = vec![0u8; self.config.handshake_buffer_size];
        let n = read_retrying(socket, &mut in_buf)?;
        match check_handshake_reply(&in_buf[..n]) {
            HandshakeReply::Ok => (),
            HandshakeReply::OkWithPadding(extra) => {
                warn!(self.log, "discarding padding after handshake response";
                    "bytes" => extra);
            }
            HandshakeReply::Undefined => {
                return Err(PptError::Initialization(String::from(
                    "could not connect to server, server may be down or busy",
                )));
            }
            HandshakeReply::Invalid(status) => {
                return Err(PptError::Initialization(format!(
                    "server reported an invalid connection status {:?}",
                    status
                )));
            }
        }

        let skipped = drain(socket)?;
        if skipped > 0 {
            warn!(self.log, "skipped bytes in the input stream";
                "bytes" => skipped);
        }

        let out_half = socket.try_clone()?;
        let in_half = socket.try_clone()?;
        let log = Some(&self.log);
        let (encoder, decoder) = match self.config.framing {
            Framing::Chunked => (
                FrameEncoder::Chunked(ChunkedWriter::with_chunk_size(
                    out_half,
                    self.config.chunk_size,
                    log,
                )?),
                FrameDecoder::Chunked(ChunkedReader::with_codec(
                    in_half,
                    ChunkCodec::new(self.config.max_read_chunk_size),
                    log,
                )),
            ),
            Framing::Marked => (
                FrameEncoder::Marked(MarkedWriter::new(out_half, log)),
                FrameDecoder::Marked(MarkedReader::new(in_half, log)),
            ),
        };
        self.encoder = Some(encoder);
        self.decoder = Some(decoder);
        Ok(())
    }

    /// Sends one request. The response must be read with `get_response`
    /// before another request is accepted.
    pub fn send_request(&mut self, payload: &[u8]) -> Result<()> {
        self.expect_state("send_request", ConnectionState::Ready)?;
        let encoder = self.encoder.as_mut().ok_or(PptError::Closed)?;
        debug!(self.log, "sending request"; "bytes" => payload.len());
        if let Err(e) = encoder.write_message(payload) {
            error!(self.log, "failed to write to socket"; "error" => %e);
            self.close_connection(false);
            return Err(e.into());
        }
        self.state = ConnectionState::AwaitingResponse;
        Ok(())
    }

    /// Sends a BES XML request document.
    pub fn send_command(&mut self, command: &BesCommand) -> Result<()> {
        let xml = command.to_xml();
        debug!(self.log, "sending command";
            "request_id" => command.request_id(), "document" => &xml);
        self.send_request(xml.as_bytes())
    }

    /// Copies the response to `data`, or to `errors` once the BES reports
    /// an error. Returns `false` when the response is an error.
    pub fn get_response<D, E>(&mut self, data: &mut D, errors: &mut E) -> Result<bool>
    where
        D: Write + ?Sized,
        E: Write + ?Sized,
    {
        self.expect_state("get_response", ConnectionState::AwaitingResponse)?;
        let decoder = self.decoder.as_mut().ok_or(PptError::Closed)?;
        let result = decoder.read_message(data, errors);
        let peer_closed = decoder.is_closed();

        match result {
            Ok(ok) => {
                if peer_closed {
                    info!(self.log, "BES closed the session");
                    self.close_connection(false);
                } else {
                    self.state = ConnectionState::Ready;
                }
                Ok(ok)
            }
            Err(e) => {
                error!(self.log, "cannot read response"; "error" => %e);
                self.close_connection(false);
                Err(e)
            }
        }
    }

    /// Sends one request and reads its response.
    pub fn execute_command<D, E>(
        &mut self,
        command: &[u8],
        data: &mut D,
        errors: &mut E,
    ) -> Result<bool>
    where
        D: Write + ?Sized,
        E: Write + ?Sized,
    {
        self.send_request(command)?;
        let ok = self.get_response(data, errors)?;
        self.command_count += 1;
        Ok(ok)
    }

    /// Runs each `;` terminated command in `commands` in turn, stopping at
    /// the first error response. Blank commands are skipped.
    pub fn execute_commands<D, E>(
        &mut self,
        commands: &str,
        data: &mut D,
        errors: &mut E,
    ) -> Result<bool>
    where
        D: Write + ?Sized,
        E: Write + ?Sized,
    {
        for command in commands.split(';').filter(|c| !c.trim().is_empty()) {
            let command = format!("{};", command);
            if !self.execute_command(command.as_bytes(), data, errors)? {
                debug!(self.log, "command failed, skipping the rest";
                    "command" => &command);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Closes the connection, optionally telling the BES first. Each step
    /// runs even if an earlier one failed, and failures are only logged.
    /// Safe to call any number of times.
    pub fn close_connection(&mut self, inform_server: bool) {
        let live = matches!(
            self.state,
            ConnectionState::Ready | ConnectionState::AwaitingResponse
        );
        let mut encoder = self.encoder.take();
        let decoder = self.decoder.take();
        let socket = self.socket.take();
        self.state = ConnectionState::Closed;

        let mut teardown = Teardown::new(&self.log, "close_connection");
        teardown
            .step("inform server that client is exiting", || {
                match encoder.as_mut() {
                    Some(enc) if inform_server && live => enc.close(),
                    _ => Ok(()),
                }
            })
            .step("close output stream", || match encoder.take() {
                Some(enc) => enc.into_inner().shutdown(Shutdown::Write),
                None => Ok(()),
            })
            .step("close input stream", || match decoder {
                Some(dec) => dec.into_inner().shutdown(Shutdown::Read),
                None => Ok(()),
            })
            .step("close socket", || match socket {
                Some(s) => s.shutdown(Shutdown::Both),
                None => Ok(()),
            });
        debug!(self.log, "connection closed"; "failures" => teardown.failures());
    }

    /// Drops the connection immediately without a word to the BES.
    pub fn die_now(&mut self) {
        if let Some(socket) = self.socket.as_ref() {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                error!(self.log, "die_now: unable to shut down socket";
                    "error" => %e);
            }
        }
        self.encoder = None;
        self.decoder = None;
        self.socket = None;
        self.state = ConnectionState::Closed;
    }

    /// Returns a handle that can close this connection from another
    /// thread while a request is blocked.
    pub fn cancel_handle(&mut self) -> Result<CancelHandle> {
        let socket = self.socket.as_ref().ok_or(PptError::Closed)?;
        match socket.try_clone() {
            Ok(socket) => Ok(CancelHandle {
                socket,
                log: self.log.clone(),
            }),
            Err(e) => {
                self.close_connection(false);
                Err(e.into())
            }
        }
    }

    pub fn connection_properties(&self) -> String {
        fn show<T: fmt::Debug>(r: io::Result<T>) -> String {
            match r {
                Ok(v) => format!("{:?}", v),
                Err(e) => format!("unavailable ({})", e),
            }
        }

        let mut msg = format!(
            "connection to {}:{} ({})\n",
            self.host, self.port, self.state
        );
        if let Some(s) = self.socket.as_ref() {
            msg.push_str(&format!("    local address:  {}\n", show(s.local_addr())));
            msg.push_str(&format!("    peer address:   {}\n", show(s.peer_addr())));
            msg.push_str(&format!("    read timeout:   {}\n", show(s.read_timeout())));
            msg.push_str(&format!("    write timeout:  {}\n", show(s.write_timeout())));
            msg.push_str(&format!("    nodelay:        {}\n", show(s.nodelay())));
            msg.push_str(&format!("    ttl:            {}\n", show(s.ttl())));
        }
        msg
    }
}
