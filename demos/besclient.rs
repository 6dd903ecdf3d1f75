// Copyright 2026 OPeNDAP, Inc.

use std::fs;
use std::io::{self, BufRead, Write};
use std::process;
use std::sync::Mutex;

use clap::{crate_version, value_t, App, Arg, ArgMatches};
use slog::{error, info, o, Drain, Level, LevelFilter, Logger};

use bes_ppt::{ClientConfig, Framing, PptClient};

static APP: &str = "besclient";
static DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 10022;
const DEFAULT_TIMEOUT_SECS: u64 = 300;

enum Request {
    /// `;` separated commands, sent one at a time.
    Commands(String),
    /// A request document sent as is.
    Document(String),
}

pub fn parse_opts<'a>(app: String) -> ArgMatches<'a> {
    App::new(app)
        .about("Command-line client for a BES over PPT")
        .version(crate_version!())
        .arg(
            Arg::with_name("host")
                .help("Hostname of the BES (Default: localhost)")
                .long("host")
                .short("n")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .help("Port number of the BES (Default: 10022)")
                .long("port")
                .short("p")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("timeout")
                .help("Timeout in seconds for the BES connection (Default: 300)")
                .long("timeout")
                .short("t")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("execute")
                .help("Commands to run, each ending with a semicolon")
                .long("execute")
                .short("x")
                .takes_value(true)
                .conflicts_with("file"),
        )
        .arg(
            Arg::with_name("file")
                .help("File holding a BES request document")
                .long("file")
                .short("i")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("reps")
                .help("Number of times to send the request (Default: 1)")
                .long("reps")
                .short("r")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("max_cmds")
                .help("Requests to send before opening a new connection (Default: 1)")
                .long("max-cmds")
                .short("c")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("marked")
                .help("Use terminator marks instead of chunks")
                .long("marked")
                .short("m")
                .takes_value(false),
        )
        .arg(
            Arg::with_name("verbose")
                .long("verbose")
                .short("v")
                .takes_value(false),
        )
        .get_matches()
}

fn open(host: &str, port: u16, config: &ClientConfig, log: &Logger) -> PptClient {
    PptClient::open(host, port, config.clone(), Some(log)).unwrap_or_else(|e| {
        eprintln!("Failed to connect to BES: {}", e);
        process::exit(1)
    })
}

fn run(client: &mut PptClient, request: &Request) -> bes_ppt::Result<bool> {
    let stdout = io::stdout();
    let stderr = io::stderr();
    let mut out = stdout.lock();
    let mut err = stderr.lock();
    let ok = match request {
        Request::Commands(commands) => {
            client.execute_commands(commands, &mut out, &mut err)?
        }
        Request::Document(doc) => {
            client.execute_command(doc.as_bytes(), &mut out, &mut err)?
        }
    };
    writeln!(out)?;
    Ok(ok)
}

fn interact(client: &mut PptClient) -> bes_ppt::Result<()> {
    let stdin = io::stdin();
    loop {
        print!("BES> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        match line.trim() {
            "exit" => return Ok(()),
            "" => continue,
            commands => {
                let request = Request::Commands(commands.to_string());
                if !run(client, &request)? {
                    eprintln!();
                }
            }
        }
    }
}

fn main() {
    let matches = parse_opts(APP.to_string());
    let host = String::from(matches.value_of("host").unwrap_or(DEFAULT_HOST));
    let port = value_t!(matches, "port", u16).unwrap_or(DEFAULT_PORT);
    let timeout =
        value_t!(matches, "timeout", u64).unwrap_or(DEFAULT_TIMEOUT_SECS);
    let reps = value_t!(matches, "reps", u32).unwrap_or(1);
    let max_cmds = value_t!(matches, "max_cmds", u32).unwrap_or(1).max(1);

    let level = if matches.is_present("verbose") {
        Level::Debug
    } else {
        Level::Warning
    };
    let plain = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let log = Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            level,
        ))
        .fuse(),
        o!("app" => APP),
    );

    let config = ClientConfig {
        timeout_ms: timeout * 1000,
        framing: if matches.is_present("marked") {
            Framing::Marked
        } else {
            Framing::Chunked
        },
        ..ClientConfig::default()
    };

    let request = if let Some(commands) = matches.value_of("execute") {
        Some(Request::Commands(String::from(commands)))
    } else if let Some(path) = matches.value_of("file") {
        let doc = fs::read_to_string(path).unwrap_or_else(|e| {
            eprintln!("Failed to read {}: {}", path, e);
            process::exit(1)
        });
        Some(Request::Document(doc))
    } else {
        None
    };

    let mut client = open(&host, port, &config, &log);
    let mut connections = 1;
    let result = match request {
        None => interact(&mut client),
        Some(request) => (0..reps).try_for_each(|r| {
            if r > 0 && r % max_cmds == 0 {
                client.close_connection(true);
                client = open(&host, port, &config, &log);
                connections += 1;
            }
            run(&mut client, &request).map(|_| ())
        }),
    };

    if let Err(e) = result {
        error!(log, "session failed"; "error" => %e);
        eprintln!("Error: {}", e);
    }
    if client.is_running() {
        client.close_connection(true);
    }
    info!(log, "done";
        "commands" => client.command_count(), "connections" => connections);
}
