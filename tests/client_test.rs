// Copyright 2026 OPeNDAP, Inc.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::RngCore;
use slog::{o, Drain, Level, LevelFilter, Logger};

use bes_ppt::protocol::CLOSING_CHUNK;
use bes_ppt::reader::{ChunkedReader, MarkedReader};
use bes_ppt::session::{
    PPTCLIENT_COMPLETE_DATA_TRANSMITION, PPTCLIENT_TESTING_CONNECTION,
    PPTSERVER_COMPLETE_DATA_TRANSMITION, PPTSERVER_CONNECTION_OK,
    PPT_PROTOCOL_UNDEFINED,
};
use bes_ppt::writer::ChunkedWriter;
use bes_ppt::{
    BesCommand, ClientConfig, ConnectionState, Framing, PptClient, PptError,
};

fn test_logger() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            Level::Info,
        ))
        .fuse(),
        o!("build-id" => "0.1.0"),
    )
}

/// Runs `bes` against the first connection made to a fresh local port.
fn spawn_bes<F>(bes: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("failed to accept");
        bes(stream);
    });
    (port, handle)
}

fn accept_handshake(stream: &mut TcpStream) {
    let mut token = vec![0u8; PPTCLIENT_TESTING_CONNECTION.len()];
    stream.read_exact(&mut token).unwrap();
    assert_eq!(token, PPTCLIENT_TESTING_CONNECTION.as_bytes());
    stream.write_all(PPTSERVER_CONNECTION_OK.as_bytes()).unwrap();
}

fn client(port: u16) -> PptClient {
    client_with(port, ClientConfig::default())
}

fn client_with(port: u16, config: ClientConfig) -> PptClient {
    PptClient::open("127.0.0.1", port, config, Some(&test_logger()))
        .expect("failed to open client")
}

/// Echoes `count` requests back as responses, then expects the client's
/// exit message.
fn echo_bes(count: usize) -> impl FnOnce(TcpStream) + Send + 'static {
    move |mut stream| {
        accept_handshake(&mut stream);
        let mut reader = ChunkedReader::new(stream.try_clone().unwrap(), None);
        let mut writer = ChunkedWriter::new(stream, None);
        for _ in 0..count {
            let mut request = Vec::new();
            assert!(reader
                .read_chunked_message(&mut request, &mut Vec::new())
                .unwrap());
            writer.write_all(&request).unwrap();
            writer.finish().unwrap();
        }
        reader
            .read_chunked_message(&mut Vec::new(), &mut Vec::new())
            .unwrap();
        assert!(reader.is_closed());
    }
}

#[test]
fn request_response_cycle() {
    let (port, bes) = spawn_bes(echo_bes(3));
    let mut client = client(port);
    assert_eq!(client.state(), ConnectionState::Ready);

    for i in 0..3 {
        let cmd = BesCommand::with_request_id(format!("req-{}", i))
            .set_context("xdap_accept", "3.2")
            .command(bes_ppt::CommandElement::new("showVersion"));
        client.send_command(&cmd).unwrap();
        assert_eq!(client.state(), ConnectionState::AwaitingResponse);

        let mut data = Vec::new();
        let mut errors = Vec::new();
        assert!(client.get_response(&mut data, &mut errors).unwrap());
        assert_eq!(data, cmd.to_xml().into_bytes());
        assert!(errors.is_empty());
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    client.close_connection(true);
    assert!(client.is_closed());
    bes.join().unwrap();
}

#[test]
fn large_payload_spans_chunks() {
    let (port, bes) = spawn_bes(echo_bes(1));
    let config = ClientConfig {
        chunk_size: 1000,
        ..ClientConfig::default()
    };
    let mut client = client_with(port, config);

    let mut payload = vec![0u8; 200_000];
    rand::thread_rng().fill_bytes(&mut payload);
    client.send_request(&payload).unwrap();

    let mut data = Vec::new();
    assert!(client.get_response(&mut data, &mut Vec::new()).unwrap());
    assert_eq!(data.len(), payload.len());
    assert!(data == payload);

    client.close_connection(true);
    bes.join().unwrap();
}

#[test]
fn error_response() {
    let (port, bes) = spawn_bes(|mut stream| {
        accept_handshake(&mut stream);
        let mut reader = ChunkedReader::new(stream.try_clone().unwrap(), None);
        let mut writer = ChunkedWriter::new(stream, None);
        reader
            .read_chunked_message(&mut Vec::new(), &mut Vec::new())
            .unwrap();
        writer.write_all(b"<partial/>").unwrap();
        writer.begin_error().unwrap();
        writer.write_all(b"<BESError>").unwrap();
        writer.write_all(b"no such file</BESError>").unwrap();
        writer.finish().unwrap();
        reader
            .read_chunked_message(&mut Vec::new(), &mut Vec::new())
            .unwrap();
    });
    let mut client = client(port);
    client.send_request(b"get dds for bogus;").unwrap();

    let mut data = Vec::new();
    let mut errors = Vec::new();
    assert!(!client.get_response(&mut data, &mut errors).unwrap());
    assert_eq!(data, b"<partial/>");
    assert_eq!(errors, b"<BESError>no such file</BESError>");
    assert_eq!(client.state(), ConnectionState::Ready);

    client.close_connection(true);
    bes.join().unwrap();
}

#[test]
fn handshake_rejected() {
    let replies: [&[u8]; 4] = [
        PPT_PROTOCOL_UNDEFINED.as_bytes(),
        b"PPTSERVER_CONNECTION_NOT_OK",
        b"PPTSERVER_CONNECTION_OKAY_NOT",
        b"",
    ];
    for reply in replies.iter() {
        let reply = reply.to_vec();
        let (port, bes) = spawn_bes(move |mut stream| {
            let mut token = vec![0u8; PPTCLIENT_TESTING_CONNECTION.len()];
            stream.read_exact(&mut token).unwrap();
            stream.write_all(&reply).unwrap();
        });

        let mut client =
            PptClient::new("127.0.0.1", port, ClientConfig::default(), None);
        client.connect().unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        let result = client.init_connection();
        assert!(
            matches!(result, Err(PptError::Initialization(_))),
            "unexpected result {:?}",
            result
        );
        assert!(client.is_closed());
        assert!(client.peer_addr().is_none());
        bes.join().unwrap();
    }
}

#[test]
fn handshake_padding_discarded() {
    let (port, bes) = spawn_bes(|mut stream| {
        let mut token = vec![0u8; PPTCLIENT_TESTING_CONNECTION.len()];
        stream.read_exact(&mut token).unwrap();
        let mut reply = PPTSERVER_CONNECTION_OK.as_bytes().to_vec();
        reply.extend_from_slice(&[0u8; 16]);
        stream.write_all(&reply).unwrap();
        echo_after_handshake(stream);
    });
    let mut client = client(port);
    client.send_request(b"ping").unwrap();
    let mut data = Vec::new();
    assert!(client.get_response(&mut data, &mut Vec::new()).unwrap());
    assert_eq!(data, b"ping");
    client.close_connection(true);
    bes.join().unwrap();
}

fn echo_after_handshake(stream: TcpStream) {
    let mut reader = ChunkedReader::new(stream.try_clone().unwrap(), None);
    let mut writer = ChunkedWriter::new(stream, None);
    let mut request = Vec::new();
    reader
        .read_chunked_message(&mut request, &mut Vec::new())
        .unwrap();
    writer.write_all(&request).unwrap();
    writer.finish().unwrap();
    let _ = reader.read_chunked_message(&mut Vec::new(), &mut Vec::new());
}

#[test]
fn premature_close() {
    let (port, bes) = spawn_bes(|mut stream| {
        accept_handshake(&mut stream);
        let mut reader = ChunkedReader::new(stream.try_clone().unwrap(), None);
        reader
            .read_chunked_message(&mut Vec::new(), &mut Vec::new())
            .unwrap();
        stream.write_all(b"0000100d0123456789").unwrap();
    });
    let mut client = client(port);
    client.send_request(b"show version;").unwrap();

    let mut data = Vec::new();
    let result = client.get_response(&mut data, &mut Vec::new());
    assert!(
        matches!(result, Err(PptError::EndOfStream(_))),
        "unexpected result {:?}",
        result
    );
    assert!(client.is_closed());
    bes.join().unwrap();
}

#[test]
fn close_is_idempotent() {
    let (port, bes) = spawn_bes(|mut stream| {
        accept_handshake(&mut stream);
    });
    let mut client = client(port);
    bes.join().unwrap();

    // The BES is gone, informing it may fail but must not panic.
    client.close_connection(true);
    client.close_connection(true);
    client.die_now();
    client.close_connection(false);
    assert!(client.is_closed());
}

#[test]
fn die_now_skips_exit_message() {
    let (tx, rx) = mpsc::channel();
    let (port, bes) = spawn_bes(move |mut stream| {
        accept_handshake(&mut stream);
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        tx.send(rest).unwrap();
    });
    let mut client = client(port);
    client.die_now();
    assert!(client.is_closed());
    bes.join().unwrap();
    assert!(rx.recv().unwrap().is_empty());
}

#[test]
fn strict_alternation() {
    let (port, bes) = spawn_bes(echo_bes(1));
    let mut client = client(port);

    let result = client.get_response(&mut Vec::new(), &mut Vec::new());
    assert!(matches!(
        result,
        Err(PptError::OutOfSequence {
            state: ConnectionState::Ready,
            ..
        })
    ));

    client.send_request(b"first").unwrap();
    let result = client.send_request(b"second");
    assert!(matches!(
        result,
        Err(PptError::OutOfSequence {
            state: ConnectionState::AwaitingResponse,
            ..
        })
    ));
    assert_eq!(client.state(), ConnectionState::AwaitingResponse);

    let mut data = Vec::new();
    assert!(client.get_response(&mut data, &mut Vec::new()).unwrap());
    assert_eq!(data, b"first");

    client.close_connection(true);
    assert!(matches!(client.send_request(b"late"), Err(PptError::Closed)));
    bes.join().unwrap();
}

#[test]
fn bes_requests_exit() {
    let (port, bes) = spawn_bes(|mut stream| {
        accept_handshake(&mut stream);
        let mut reader = ChunkedReader::new(stream.try_clone().unwrap(), None);
        reader
            .read_chunked_message(&mut Vec::new(), &mut Vec::new())
            .unwrap();
        let mut writer = ChunkedWriter::new(stream, None);
        writer.write_all(b"bye").unwrap();
        writer.close().unwrap();
    });
    let mut client = client(port);
    client.send_request(b"exit;").unwrap();

    let mut data = Vec::new();
    assert!(client.get_response(&mut data, &mut Vec::new()).unwrap());
    assert_eq!(data, b"bye");
    assert!(client.is_closed());
    bes.join().unwrap();
}

#[test]
fn client_exit_message_on_wire() {
    let (tx, rx) = mpsc::channel();
    let (port, bes) = spawn_bes(move |mut stream| {
        accept_handshake(&mut stream);
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        tx.send(rest).unwrap();
    });
    let mut client = client(port);
    client.close_connection(true);
    bes.join().unwrap();

    let mut expected = b"0000014xstatus=PPT_EXIT_NOW;".to_vec();
    expected.extend_from_slice(CLOSING_CHUNK);
    assert_eq!(rx.recv().unwrap(), expected);
}

#[test]
fn marked_framing() {
    let (port, bes) = spawn_bes(|mut stream| {
        accept_handshake(&mut stream);
        let mut reader = MarkedReader::with_mark(
            stream.try_clone().unwrap(),
            PPTCLIENT_COMPLETE_DATA_TRANSMITION.as_bytes(),
            None,
        );
        let mut request = Vec::new();
        reader.read_marked_message(&mut request).unwrap();
        stream.write_all(b"echo: ").unwrap();
        stream.write_all(&request).unwrap();
        stream
            .write_all(PPTSERVER_COMPLETE_DATA_TRANSMITION.as_bytes())
            .unwrap();
        reader.read_marked_message(&mut Vec::new()).unwrap();
        assert!(reader.is_closed());
    });
    let config = ClientConfig {
        framing: Framing::Marked,
        ..ClientConfig::default()
    };
    let mut client = client_with(port, config);
    client.send_request(b"show version;").unwrap();

    let mut data = Vec::new();
    assert!(client.get_response(&mut data, &mut Vec::new()).unwrap());
    assert_eq!(data, b"echo: show version;");

    client.close_connection(true);
    bes.join().unwrap();
}

#[test]
fn read_timeout() {
    let (tx, rx) = mpsc::channel::<()>();
    let (port, bes) = spawn_bes(move |mut stream| {
        accept_handshake(&mut stream);
        // Hold the connection open without answering.
        let _ = rx.recv();
    });
    let config = ClientConfig {
        timeout_ms: 200,
        ..ClientConfig::default()
    };
    let mut client = client_with(port, config);
    client.send_request(b"slow;").unwrap();

    let result = client.get_response(&mut Vec::new(), &mut Vec::new());
    assert!(
        matches!(result, Err(PptError::TransportIo(_))),
        "unexpected result {:?}",
        result
    );
    assert!(client.is_closed());
    tx.send(()).unwrap();
    bes.join().unwrap();
}

#[test]
fn cancel_from_another_thread() {
    let (tx, rx) = mpsc::channel::<()>();
    let (port, bes) = spawn_bes(move |mut stream| {
        accept_handshake(&mut stream);
        let _ = rx.recv();
    });
    let mut client = client(port);
    let handle = client.cancel_handle().unwrap();
    client.send_request(b"hang;").unwrap();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.cancel();
    });
    let result = client.get_response(&mut Vec::new(), &mut Vec::new());
    assert!(result.is_err());
    assert!(client.is_closed());

    canceller.join().unwrap();
    tx.send(()).unwrap();
    bes.join().unwrap();
}

/// Answers every request until the client exits, reporting an error for
/// requests that mention "bogus". Sends back the requests it saw.
fn scripted_bes(
    seen: mpsc::Sender<Vec<String>>,
) -> impl FnOnce(TcpStream) + Send + 'static {
    move |mut stream| {
        accept_handshake(&mut stream);
        let mut reader = ChunkedReader::new(stream.try_clone().unwrap(), None);
        let mut writer = ChunkedWriter::new(stream, None);
        let mut requests = Vec::new();
        loop {
            let mut request = Vec::new();
            reader
                .read_chunked_message(&mut request, &mut Vec::new())
                .unwrap();
            if reader.is_closed() {
                break;
            }
            let request = String::from_utf8(request).unwrap();
            if request.contains("bogus") {
                writer.begin_error().unwrap();
                writer.write_all(b"no such dataset").unwrap();
            } else {
                writer.write_all(b"ok:").unwrap();
                writer.write_all(request.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
            requests.push(request);
        }
        seen.send(requests).unwrap();
    }
}

#[test]
fn execute_command_counts() {
    let (tx, rx) = mpsc::channel();
    let (port, bes) = spawn_bes(scripted_bes(tx));
    let mut client = client(port);
    assert!(client.is_running());
    assert_eq!(client.command_count(), 0);

    let mut data = Vec::new();
    let mut errors = Vec::new();
    assert!(client
        .execute_command(b"show version;", &mut data, &mut errors)
        .unwrap());
    assert_eq!(data, b"ok:show version;");
    assert!(!client
        .execute_command(b"get dds for bogus;", &mut data, &mut errors)
        .unwrap());
    assert_eq!(errors, b"no such dataset");
    assert_eq!(client.command_count(), 2);
    assert_eq!(client.state(), ConnectionState::Ready);

    client.close_connection(true);
    assert!(!client.is_running());
    bes.join().unwrap();
    assert_eq!(rx.recv().unwrap().len(), 2);
}

#[test]
fn execute_commands_stops_at_error() {
    let (tx, rx) = mpsc::channel();
    let (port, bes) = spawn_bes(scripted_bes(tx));
    let mut client = client(port);

    let mut data = Vec::new();
    let mut errors = Vec::new();
    let commands = "set container in catalog values c,x;show version;\n";
    assert!(client
        .execute_commands(commands, &mut data, &mut errors)
        .unwrap());
    assert_eq!(client.command_count(), 2);

    data.clear();
    assert!(!client
        .execute_commands(
            "show help; get das for bogus;show version;",
            &mut data,
            &mut errors
        )
        .unwrap());
    assert_eq!(data, b"ok:show help;");
    assert_eq!(errors, b"no such dataset");
    assert_eq!(client.command_count(), 4);

    client.close_connection(true);
    bes.join().unwrap();
    assert_eq!(
        rx.recv().unwrap(),
        vec![
            "set container in catalog values c,x;",
            "show version;",
            "show help;",
            " get das for bogus;",
        ]
    );
}

#[test]
fn unknown_host() {
    let mut client = PptClient::new(
        "no-such-bes.invalid",
        10022,
        ClientConfig::default(),
        None,
    );
    let result = client.connect();
    assert!(
        matches!(result, Err(PptError::HostResolution { .. })),
        "unexpected result {:?}",
        result
    );
    assert!(client.is_closed());
}

#[test]
fn connection_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let result = PptClient::open("127.0.0.1", port, ClientConfig::default(), None);
    assert!(
        matches!(result, Err(PptError::Connection { .. })),
        "unexpected result {:?}",
        result.err()
    );
}

#[test]
fn invalid_config() {
    let config = ClientConfig {
        chunk_size: 0,
        ..ClientConfig::default()
    };
    let mut client = PptClient::new("127.0.0.1", 10022, config, None);
    assert!(matches!(client.connect(), Err(PptError::Config(_))));
    assert!(client.is_closed());
}

#[test]
fn connection_properties() {
    let (port, bes) = spawn_bes(echo_bes(0));
    let mut client = client(port);
    let props = client.connection_properties();
    assert!(props.contains("ready"));
    assert!(props.contains("read timeout:   Some(300s)"));
    client.close_connection(true);
    assert!(client.connection_properties().contains("closed"));
    bes.join().unwrap();
}
