//! Bootstrap/monitor daemon: loads the device table, opens the bus, runs
//! the main loop and the control channel (§2, §6, §9).

mod attach;
mod config;
mod control;
mod engine;

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scsi_target_core::bus::{Bus, SharedBus};
use scsi_target_core::mainloop;

use config::{Config, ImageSpec, ImageType};
use control::{Command, ControlRequest, Operation};
use engine::Daemon;

#[derive(Parser, Debug)]
#[command(name = "scsi-target", about = "SCSI/SASI target-device emulator daemon")]
struct Args {
    /// Path to a TOML config file listing image attachments.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the control channel's TCP port (default from config, else 6868).
    #[arg(long)]
    port: Option<u16>,

    /// Enables debug-level tracing.
    #[arg(short, long)]
    verbose: bool,

    /// GPIO chip device to bit-bang the SCSI bus over.
    #[arg(long, default_value = "/dev/gpiochip0")]
    gpio_chip: PathBuf,

    /// Inline attach arguments, one per image: "id lun type path".
    #[arg(long = "attach", value_name = "ID LUN TYPE PATH")]
    attach: Vec<String>,
}

fn parse_cli_attach(arg: &str) -> anyhow::Result<ImageSpec> {
    let fields: Vec<&str> = arg.split_whitespace().collect();
    anyhow::ensure!(fields.len() == 4, "--attach expects \"id lun type path\", got {arg:?}");
    let id: u8 = fields[0].parse()?;
    let lun: u8 = fields[1].parse()?;
    let image_type = match fields[2] {
        "0" => ImageType::Hdf,
        "1" => ImageType::Hds,
        "2" => ImageType::Mo,
        "3" => ImageType::Cd,
        "4" => ImageType::Bridge,
        other => anyhow::bail!("unknown device type {other:?}"),
    };
    let path = if image_type == ImageType::Bridge { None } else { Some(PathBuf::from(fields[3])) };
    Ok(ImageSpec { id, lun, image_type, path, write_protected: false })
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(filter)).init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    for arg in &args.attach {
        config.images.push(parse_cli_attach(arg)?);
    }
    let port = args.port.unwrap_or_else(|| config.control_port());

    #[cfg(target_os = "linux")]
    let bus = {
        let pins = scsi_target_gpio::PinLayout::default();
        scsi_target_gpio::GpioBus::open(&args.gpio_chip, pins)?
    };
    #[cfg(not(target_os = "linux"))]
    let bus: NoBus = {
        anyhow::bail!("no Bus implementation is available on this platform");
    };

    let shared = SharedBus::new(bus);
    let mut daemon = Daemon::new(shared);

    for spec in &config.images {
        daemon.attach(spec)?;
        info!(id = spec.id, lun = spec.lun, "attached at startup");
    }

    let listener = TcpListener::bind(("127.0.0.1", port))?;
    info!(port, "control channel listening");
    let (tx, rx) = mpsc::channel::<ControlRequest>();
    control::spawn(listener, tx);

    run(&mut daemon, &rx)
}

/// Drains the control queue, drives the main loop once, and repeats.
/// Sleeps briefly when neither produced any work, so the process doesn't
/// spin a CPU core while idle on a quiet bus.
fn run<B>(daemon: &mut Daemon<B>, requests: &mpsc::Receiver<ControlRequest>) -> anyhow::Result<()>
where
    B: Bus + Clone,
{
    loop {
        for request in requests.try_iter() {
            let shutdown = matches!(request.command, Command::Shutdown);
            let response = dispatch(daemon, request.command);
            let _ = request.reply.send(response);
            if shutdown {
                info!("shutting down");
                return Ok(());
            }
        }

        let drove_something = mainloop::run_once(daemon.controllers_mut());
        if !drove_something {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

fn dispatch<B>(daemon: &mut Daemon<B>, command: Command) -> String
where
    B: Bus + Clone,
{
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
            let path = if path.is_empty() || image_type == ImageType::Bridge { None } else { Some(PathBuf::from(path)) };
            let spec = ImageSpec { id, lun, image_type, path, write_protected: false };
            let result = match op {
                Operation::Attach => daemon.attach(&spec),
                Operation::Insert => daemon.insert(&spec),
                Operation::Detach => daemon.detach(id, lun),
                Operation::Eject => daemon.eject(id, lun),
                Operation::ProtectToggle => daemon.toggle_protect(id, lun),
            };
            match result {
                Ok(()) => "OK".to_string(),
                Err(err) => format!("ERROR {err}"),
            }
        }
    }
}

/// Placeholder `Bus` used only to satisfy the type checker on non-Linux
/// hosts, where `main` always exits through the `bail!` above it before
/// any value of this type could be constructed.
#[cfg(not(target_os = "linux"))]
enum NoBus {}

#[cfg(not(target_os = "linux"))]
impl Clone for NoBus {
    fn clone(&self) -> Self {
        match *self {}
    }
}

#[cfg(not(target_os = "linux"))]
impl Bus for NoBus {
    fn acquire(&mut self) -> scsi_target_core::bus::BusSnapshot {
        match *self {}
    }
    fn get_signal(&mut self, _signal: scsi_target_core::bus::Signal) -> bool {
        match *self {}
    }
    fn set_signal(&mut self, _signal: scsi_target_core::bus::Signal, _asserted: bool) {
        match *self {}
    }
    fn get_data(&mut self) -> u8 {
        match *self {}
    }
    fn set_data(&mut self, _value: u8) {
        match *self {}
    }
    fn poll_select_event(&mut self) -> scsi_target_core::bus::SelectEvent {
        match *self {}
    }
    fn clear_select_event(&mut self) {
        match *self {}
    }
}
