//! Control channel (§6): a blocking `TcpListener` text-line protocol for
//! runtime attach/detach/insert/eject/protect-toggle and shutdown.
//!
//! The accept loop runs on its own thread and only ever touches sockets;
//! it never reaches into the device table directly. Each parsed request
//! is handed to the engine worker through an `mpsc` channel together with
//! a one-shot reply channel, matching §9's "Monitor / worker coupling"
//! redesign note: the worker drains the queue only at bus-free/selection
//! boundaries, so the device table is never mutated mid-transaction.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{info, warn};

use crate::config::ImageType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command line")]
    Empty,
    #[error("expected 5 fields, got {0}")]
    WrongFieldCount(usize),
    #[error("invalid target id {0:?}")]
    InvalidId(String),
    #[error("invalid lun {0:?}")]
    InvalidLun(String),
    #[error("invalid command code {0:?}")]
    InvalidCommand(String),
    #[error("invalid device type {0:?}")]
    InvalidType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Attach,
    Detach,
    Insert,
    Eject,
    ProtectToggle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Shutdown,
    Operate { id: u8, lun: u8, op: Operation, image_type: ImageType, path: String },
}

/// Parses one control-channel line (§6): `list`, `shutdown`/`stop`, or
/// `<id> <lun> <cmd> <type> <file>`.
pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "list" => return Ok(Command::List),
        "shutdown" | "stop" => return Ok(Command::Shutdown),
        _ => {}
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ParseError::WrongFieldCount(fields.len()));
    }
    let id: u8 = fields[0].parse().map_err(|_| ParseError::InvalidId(fields[0].to_string()))?;
    if id > 7 {
        return Err(ParseError::InvalidId(fields[0].to_string()));
    }
    let lun: u8 = fields[1].parse().map_err(|_| ParseError::InvalidLun(fields[1].to_string()))?;
    if lun > 7 {
        return Err(ParseError::InvalidLun(fields[1].to_string()));
    }
    let op = match fields[2] {
        "0" => Operation::Attach,
        "1" => Operation::Detach,
        "2" => Operation::Insert,
        "3" => Operation::Eject,
        "4" => Operation::ProtectToggle,
        other => return Err(ParseError::InvalidCommand(other.to_string())),
    };
    let image_type = match fields[3] {
        "0" => ImageType::Hdf,
        "1" => ImageType::Hds,
        "2" => ImageType::Mo,
        "3" => ImageType::Cd,
        "4" => ImageType::Bridge,
        other => return Err(ParseError::InvalidType(other.to_string())),
    };

    Ok(Command::Operate { id, lun, op, image_type, path: fields[4].to_string() })
}

/// One parsed request plus the channel its response text goes back on.
pub struct ControlRequest {
    pub command: Command,
    pub reply: mpsc::Sender<String>,
}

/// Runs the accept loop on a background thread until a `shutdown`/`stop`
/// line is received, forwarding every other line to `requests`. Returns
/// immediately with the join handle.
pub fn spawn(listener: TcpListener, requests: mpsc::Sender<ControlRequest>) -> JoinHandle<()> {
    thread::spawn(move || accept_loop(listener, requests))
}

fn accept_loop(listener: TcpListener, requests: mpsc::Sender<ControlRequest>) {
    for incoming in listener.incoming() {
        let Ok(stream) = incoming else { continue };
        match handle_connection(stream, &requests) {
            Ok(stop) => {
                if stop {
                    return;
                }
            }
            Err(err) => warn!(error = %err, "control connection ended with an error"),
        }
    }
}

/// Returns `Ok(true)` if the connection issued `shutdown`/`stop`.
fn handle_connection(stream: TcpStream, requests: &mpsc::Sender<ControlRequest>) -> std::io::Result<bool> {
    let peer = stream.peer_addr().ok();
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(err) => {
                writeln!(writer, "ERROR {err}")?;
                continue;
            }
        };
        let is_shutdown = matches!(command, Command::Shutdown);
        let (reply_tx, reply_rx) = mpsc::channel();
        if requests.send(ControlRequest { command, reply: reply_tx }).is_err() {
            writeln!(writer, "ERROR engine is not running")?;
            return Ok(true);
        }
        if let Ok(response) = reply_rx.recv() {
            writeln!(writer, "{response}")?;
        }
        if is_shutdown {
            info!(peer = ?peer, "control channel requested shutdown");
            return Ok(true);
        }
    }
    Ok(false)
}
