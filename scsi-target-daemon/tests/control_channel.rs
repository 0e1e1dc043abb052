//! End-to-end test of the control channel against a running engine: a
//! real `TcpListener`, the accept thread from `control::spawn`, and a
//! `Daemon` driven by hand instead of `main`'s main loop (§6, §9).

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;

#[path = "../src/attach.rs"]
mod attach;
#[path = "../src/config.rs"]
mod config;
#[path = "../src/control.rs"]
mod control;
#[path = "../src/engine.rs"]
mod engine;

use config::{ImageSpec, ImageType};
use control::{Command, ControlRequest};
use engine::Daemon;
use scsi_target_core::bus::{Bus, BusSnapshot, SelectEvent, Signal};

#[derive(Clone)]
struct NullBus;

impl Bus for NullBus {
    fn acquire(&mut self) -> BusSnapshot {
        BusSnapshot::new()
    }
    fn get_signal(&mut self, _signal: Signal) -> bool {
        false
    }
    fn set_signal(&mut self, _signal: Signal, _asserted: bool) {}
    fn get_data(&mut self) -> u8 {
        0
    }
    fn set_data(&mut self, _value: u8) {}
    fn poll_select_event(&mut self) -> SelectEvent {
        SelectEvent::new()
    }
    fn clear_select_event(&mut self) {}
}

fn dispatch(daemon: &mut Daemon<NullBus>, command: Command) -> String {
    match command {
        Command::List => {
            let lines = daemon.list();
            if lines.is_empty() {
                "OK no devices attached".to_string()
            } else {
                lines.join("\n")
            }
        }
        Command::Shutdown => "OK shutting down".to_string(),
        Command::Operate { id, lun, op, image_type, path } => {
            let path = if path.is_empty() || image_type == ImageType::Bridge {
                None
            } else {
                Some(std::path::PathBuf::from(path))
            };
            let spec = ImageSpec { id, lun, image_type, path, write_protected: false };
            let result = match op {
                control::Operation::Attach => daemon.attach(&spec),
                control::Operation::Insert => daemon.insert(&spec),
                control::Operation::Detach => daemon.detach(id, lun),
                control::Operation::Eject => daemon.eject(id, lun),
                control::Operation::ProtectToggle => daemon.toggle_protect(id, lun),
            };
            match result {
                Ok(()) => "OK".to_string(),
                Err(err) => format!("ERROR {err}"),
            }
        }
    }
}

fn run_worker(mut daemon: Daemon<NullBus>, requests: mpsc::Receiver<ControlRequest>) {
    for request in requests {
        let shutdown = matches!(request.command, Command::Shutdown);
        let response = dispatch(&mut daemon, request.command);
        let _ = request.reply.send(response);
        if shutdown {
            return;
        }
    }
}

fn send_line(stream: &mut TcpStream, line: &str) -> String {
    writeln!(stream, "{line}").unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut response = String::new();
    reader.read_line(&mut response).unwrap();
    response.trim().to_string()
}

#[test]
fn attach_list_detach_and_shutdown_round_trip_over_the_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel::<ControlRequest>();
    control::spawn(listener, tx);

    let daemon = Daemon::new(NullBus);
    let worker = std::thread::spawn(move || run_worker(daemon, rx));

    let mut stream = TcpStream::connect(addr).unwrap();

    assert_eq!(send_line(&mut stream, "list"), "OK no devices attached");
    assert_eq!(send_line(&mut stream, "0 0 0 4 -"), "OK");
    assert_eq!(send_line(&mut stream, "list"), "0 0 SCBR ATTACHED");
    assert_eq!(send_line(&mut stream, "0 0 1 4 -"), "OK");
    assert_eq!(send_line(&mut stream, "list"), "OK no devices attached");
    assert_eq!(send_line(&mut stream, "shutdown"), "OK shutting down");

    worker.join().unwrap();
}

#[test]
fn malformed_line_gets_an_error_reply_and_the_connection_stays_open() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel::<ControlRequest>();
    control::spawn(listener, tx);

    let daemon = Daemon::new(NullBus);
    let worker = std::thread::spawn(move || run_worker(daemon, rx));

    let mut stream = TcpStream::connect(addr).unwrap();
    let reply = send_line(&mut stream, "9 9 9 9 9");
    assert!(reply.starts_with("ERROR"));
    assert_eq!(send_line(&mut stream, "shutdown"), "OK shutting down");

    worker.join().unwrap();
}
