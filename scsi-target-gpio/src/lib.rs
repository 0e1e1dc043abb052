//! GPIO bit-banged SCSI bus driver.
//!
//! The wire-level driver is a platform concern the core spec deliberately
//! excludes (only the `Bus` contract is specified); this crate supplies
//! one concrete implementation of it for Linux single-board computers,
//! using the kernel's GPIO character-device ioctl interface rather than
//! raw `/dev/mem` register pokes.

#![cfg(target_os = "linux")]

use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use nix::ioctl_readwrite;
use thiserror::Error;
use tracing::{debug, warn};

use scsi_target_core::bus::{Bus, BusError, BusSnapshot, SelectEvent, Signal};

const GPIO_IOC_MAGIC: u8 = 0xb4;
const GPIO_MAX_LINES: usize = 64;
const GPIO_HANDLE_FLAG_OUTPUT: u32 = 1 << 1;
const GPIO_HANDLE_FLAG_INPUT: u32 = 1 << 0;

#[repr(C)]
struct GpioHandleRequest {
    line_offsets: [u32; GPIO_MAX_LINES],
    flags: u32,
    default_values: [u8; GPIO_MAX_LINES],
    consumer_label: [u8; 32],
    lines: u32,
    fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct GpioHandleData {
    values: [u8; GPIO_MAX_LINES],
}

ioctl_readwrite!(gpio_get_linehandle, GPIO_IOC_MAGIC, 0x03, GpioHandleRequest);
ioctl_readwrite!(gpio_get_line_values, GPIO_IOC_MAGIC, 0x08, GpioHandleData);
ioctl_readwrite!(gpio_set_line_values, GPIO_IOC_MAGIC, 0x09, GpioHandleData);

#[derive(Error, Debug)]
pub enum GpioError {
    #[error("could not open gpio chip {0}: {1}")]
    ChipOpen(String, std::io::Error),
    #[error("could not request line handle: {0}")]
    LineRequest(#[from] nix::errno::Errno),
}

/// Signal pin assignments, BCM numbering, matching the RaSCSI-derived
/// wiring used by this project's reference hardware.
#[derive(Debug, Clone, Copy)]
pub struct PinLayout {
    pub bsy: u32,
    pub sel: u32,
    pub atn: u32,
    pub ack: u32,
    pub rst: u32,
    pub msg: u32,
    pub cd: u32,
    pub io: u32,
    pub req: u32,
    pub data: [u32; 8],
    pub parity: u32,
}

impl Default for PinLayout {
    fn default() -> Self {
        Self {
            bsy: 2,
            sel: 3,
            atn: 4,
            ack: 5,
            rst: 6,
            msg: 7,
            cd: 8,
            io: 9,
            req: 10,
            data: [11, 12, 13, 14, 15, 16, 17, 18],
            parity: 19,
        }
    }
}

/// One line handle opened against the GPIO chip character device.
struct LineHandle {
    fd: RawFd,
    index: usize,
}

impl LineHandle {
    fn request(chip_fd: RawFd, offset: u32, output: bool, index: usize) -> Result<Self, GpioError> {
        let mut request = GpioHandleRequest {
            line_offsets: [0; GPIO_MAX_LINES],
            flags: if output { GPIO_HANDLE_FLAG_OUTPUT } else { GPIO_HANDLE_FLAG_INPUT },
            default_values: [0; GPIO_MAX_LINES],
            consumer_label: [0; 32],
            lines: 1,
            fd: -1,
        };
        request.line_offsets[0] = offset;
        let label = b"scsi-target\0";
        request.consumer_label[..label.len()].copy_from_slice(label);

        unsafe { gpio_get_linehandle(chip_fd, &mut request) }?;
        Ok(Self { fd: request.fd, index })
    }

    fn get(&self) -> bool {
        let mut data = GpioHandleData { values: [0; GPIO_MAX_LINES] };
        let result = unsafe { gpio_get_line_values(self.fd, &mut data) };
        if let Err(err) = result {
            warn!(error = %err, "gpio line read failed");
            return false;
        }
        data.values[0] != 0
    }

    fn set(&self, asserted: bool) {
        let mut data = GpioHandleData { values: [0; GPIO_MAX_LINES] };
        data.values[0] = asserted as u8;
        if let Err(err) = unsafe { gpio_set_line_values(self.fd, &mut data) } {
            warn!(error = %err, "gpio line write failed");
        }
    }
}

/// Concrete [`Bus`] over a GPIO character-device chip. Asynchronous
/// (per-byte REQ/ACK) only; burst primitives are not implemented on this
/// platform, so `supports_burst` stays at its default `false`.
pub struct GpioBus {
    _chip_fd: std::fs::File,
    bsy: LineHandle,
    sel: LineHandle,
    atn: LineHandle,
    ack: LineHandle,
    rst: LineHandle,
    msg: LineHandle,
    cd: LineHandle,
    io: LineHandle,
    req: LineHandle,
    data: [LineHandle; 8],
    parity: LineHandle,
    select_pending: bool,
    reset_pending: bool,
}

impl GpioBus {
    pub fn open(chip_path: &Path, pins: PinLayout) -> Result<Self, GpioError> {
        let chip = OpenOptions::new()
            .read(true)
            .write(true)
            .open(chip_path)
            .map_err(|e| GpioError::ChipOpen(chip_path.display().to_string(), e))?;
        let fd = chip.as_raw_fd();

        debug!(path = %chip_path.display(), "opened gpio chip");

        let mut data_lines = Vec::with_capacity(8);
        for (i, offset) in pins.data.iter().enumerate() {
            data_lines.push(LineHandle::request(fd, *offset, false, i)?);
        }

        Ok(Self {
            bsy: LineHandle::request(fd, pins.bsy, true, 0)?,
            sel: LineHandle::request(fd, pins.sel, false, 0)?,
            atn: LineHandle::request(fd, pins.atn, false, 0)?,
            ack: LineHandle::request(fd, pins.ack, false, 0)?,
            rst: LineHandle::request(fd, pins.rst, false, 0)?,
            msg: LineHandle::request(fd, pins.msg, true, 0)?,
            cd: LineHandle::request(fd, pins.cd, true, 0)?,
            io: LineHandle::request(fd, pins.io, true, 0)?,
            req: LineHandle::request(fd, pins.req, true, 0)?,
            data: data_lines.try_into().unwrap_or_else(|_| unreachable!("exactly 8 data lines requested")),
            parity: LineHandle::request(fd, pins.parity, true, 0)?,
            select_pending: false,
            reset_pending: false,
            _chip_fd: chip,
        })
    }

    fn signal_handle(&self, signal: Signal) -> &LineHandle {
        match signal {
            Signal::Bsy => &self.bsy,
            Signal::Sel => &self.sel,
            Signal::Atn => &self.atn,
            Signal::Ack => &self.ack,
            Signal::Rst => &self.rst,
            Signal::Msg => &self.msg,
            Signal::Cd => &self.cd,
            Signal::Io => &self.io,
            Signal::Req => &self.req,
        }
    }
}

impl Bus for GpioBus {
    fn acquire(&mut self) -> BusSnapshot {
        BusSnapshot::new()
            .with_bsy(self.bsy.get())
            .with_sel(self.sel.get())
            .with_atn(self.atn.get())
            .with_ack(self.ack.get())
            .with_rst(self.rst.get())
            .with_msg(self.msg.get())
            .with_cd(self.cd.get())
            .with_io(self.io.get())
            .with_req(self.req.get())
            .with_parity(self.parity.get())
    }

    fn get_signal(&mut self, signal: Signal) -> bool {
        self.signal_handle(signal).get()
    }

    fn set_signal(&mut self, signal: Signal, asserted: bool) {
        self.signal_handle(signal).set(asserted);
    }

    fn get_data(&mut self) -> u8 {
        let mut byte = 0u8;
        for (i, line) in self.data.iter().enumerate() {
            if line.get() {
                byte |= 1 << i;
            }
        }
        byte
    }

    fn set_data(&mut self, value: u8) {
        for (i, line) in self.data.iter().enumerate() {
            line.set(value & (1 << i) != 0);
        }
    }

    fn poll_select_event(&mut self) -> SelectEvent {
        let selected = self.sel.get() && !self.bsy.get();
        let reset = self.rst.get();
        self.select_pending = selected;
        self.reset_pending = reset;
        SelectEvent::new().with_selected(selected).with_reset(reset)
    }

    fn clear_select_event(&mut self) {
        self.select_pending = false;
        self.reset_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pin_layout_assigns_eight_distinct_data_lines() {
        let pins = PinLayout::default();
        let unique: std::collections::HashSet<_> = pins.data.iter().collect();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn pin_layout_control_signals_do_not_overlap_data_lines() {
        let pins = PinLayout::default();
        let control = [pins.bsy, pins.sel, pins.atn, pins.ack, pins.rst, pins.msg, pins.cd, pins.io, pins.req, pins.parity];
        for pin in control {
            assert!(!pins.data.contains(&pin));
        }
    }
}
