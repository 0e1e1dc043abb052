//! Per-controller target protocol engine (§4.7, §4.8).
//!
//! Drives one target-id's phase state machine: selection, CDB reception,
//! dispatch to the selected LUN, data transfer, and status/message-in
//! reporting. Generic over `Bus` so tests can drive it against an
//! in-memory fake instead of the GPIO driver.

use crate::bus::{Bus, BusError, Phase, Signal};
use crate::disk::{CommandResult, Disk};
use crate::error::ControllerError;

pub use crate::bus::Phase as ControllerPhase;

/// Default and maximum sizes for the per-controller transfer buffer
/// (§3 "Controller state"): default for ordinary block transfers, grown
/// to the larger size only for host-bridge bulk messages.
pub const TRANSFER_BUFFER_DEFAULT: usize = 2048;
pub const TRANSFER_BUFFER_MAX: usize = 32 * 1024 * 1024;

/// Synchronous-negotiation limits (§4.7): period floor of 50 (200 ns
/// units) and offset cap of 16.
pub const SYNC_PERIOD_FLOOR: u8 = 50;
pub const SYNC_OFFSET_CAP: u8 = 16;

/// Bound on REQ/ACK polling iterations per byte, standing in for the
/// hardware watchdog of §5 (`GPIO_TIMEOUT_MAX ≈ 3 s`).
const HANDSHAKE_RETRY_LIMIT: u32 = 1 << 20;

pub const STATUS_GOOD: u8 = 0x00;
pub const MESSAGE_COMMAND_COMPLETE: u8 = 0x00;
const MESSAGE_ABORT: u8 = 0x06;
const MESSAGE_BUS_DEVICE_RESET: u8 = 0x0c;
const MESSAGE_EXTENDED: u8 = 0x01;
const MESSAGE_REJECT: u8 = 0x07;
const EXTENDED_SDTR: u8 = 0x01;

/// Result of interpreting one byte received during message-out (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutAction {
    Abort,
    BusDeviceReset,
    Identify(u8),
    ExtendedStart,
    Other(u8),
}

pub fn classify_message_out(byte: u8) -> MessageOutAction {
    match byte {
        MESSAGE_ABORT => MessageOutAction::Abort,
        MESSAGE_BUS_DEVICE_RESET => MessageOutAction::BusDeviceReset,
        MESSAGE_EXTENDED => MessageOutAction::ExtendedStart,
        0x80..=0xff => MessageOutAction::Identify(byte & 0x07),
        other => MessageOutAction::Other(other),
    }
}

/// Clamps a requested SDTR period/offset to the negotiable range.
pub fn negotiate_sync(period: u8, offset: u8) -> (u8, u8) {
    (period.max(SYNC_PERIOD_FLOOR), offset.min(SYNC_OFFSET_CAP))
}

/// Builds the five-byte SDTR reply for an accepted sync request, or
/// `None` for any other extended message (rejected with MESSAGE REJECT).
pub fn extended_message_reply(bytes: &[u8]) -> Option<[u8; 5]> {
    if bytes.len() < 5 || bytes[1] != 0x03 || bytes[2] != EXTENDED_SDTR {
        return None;
    }
    let (period, offset) = negotiate_sync(bytes[3], bytes[4]);
    Some([MESSAGE_EXTENDED, 0x03, EXTENDED_SDTR, period, offset])
}

pub fn reject_message() -> u8 {
    MESSAGE_REJECT
}

/// Six bytes unless the opcode falls in 0x20..=0x7D, per §4.7/§8.
pub fn cdb_length(opcode: u8) -> usize {
    if (0x20..=0x7d).contains(&opcode) {
        10
    } else {
        6
    }
}

/// Status byte on failure: plain CHECK CONDITION for SCSI, LUN folded
/// into the top three bits for SASI (§4.7).
pub fn check_condition_status(sasi: bool, lun: u8) -> u8 {
    if sasi {
        (lun << 5) | 0x02
    } else {
        0x02
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncState {
    pub enabled: bool,
    pub period: u8,
    pub offset: u8,
}

pub struct Controller<B: Bus> {
    pub bus: B,
    pub target_id: u8,
    pub sasi: bool,
    pub phase: Phase,
    pub cdb: [u8; 10],
    pub cdb_len: usize,
    pub status: u8,
    pub message: u8,
    pub buffer: Vec<u8>,
    pub next_lba: u32,
    pub remaining_blocks: u32,
    pub offset: usize,
    pub length: usize,
    pub luns: [Option<Disk>; 8],
    pub current_lun: usize,
    pub sync: SyncState,
    pub atn_capture: bool,
    pub message_collect: Vec<u8>,
}

impl<B: Bus> Controller<B> {
    pub fn new(bus: B, target_id: u8, sasi: bool, luns: [Option<Disk>; 8]) -> Self {
        Self {
            bus,
            target_id,
            sasi,
            phase: Phase::BusFree,
            cdb: [0; 10],
            cdb_len: 0,
            status: STATUS_GOOD,
            message: MESSAGE_COMMAND_COMPLETE,
            buffer: Vec::with_capacity(TRANSFER_BUFFER_DEFAULT),
            next_lba: 0,
            remaining_blocks: 0,
            offset: 0,
            length: 0,
            luns,
            current_lun: 0,
            sync: SyncState::default(),
            atn_capture: false,
            message_collect: Vec::new(),
        }
    }

    fn lun(&mut self) -> Option<&mut Disk> {
        self.luns.get_mut(self.current_lun)?.as_mut()
    }

    fn has_any_lun(&self) -> bool {
        self.luns.iter().any(Option::is_some)
    }

    /// Bus reset (§5 "Cancellation & timeouts"): drops to bus-free,
    /// clears transfer state, marks every attached LUN reset-pending.
    pub fn reset(&mut self) {
        self.phase = Phase::BusFree;
        self.bus.set_signal(Signal::Req, false);
        self.bus.set_signal(Signal::Msg, false);
        self.bus.set_signal(Signal::Cd, false);
        self.bus.set_signal(Signal::Io, false);
        self.bus.set_signal(Signal::Bsy, false);
        self.status = STATUS_GOOD;
        self.message = MESSAGE_COMMAND_COMPLETE;
        self.remaining_blocks = 0;
        self.offset = 0;
        self.length = 0;
        for lun in self.luns.iter_mut().flatten() {
            lun.locked = false;
            lun.attention_pending = false;
            lun.reset_pending = true;
        }
    }

    /// Bus-free phase entry (§4.7): clears all driven signals and the
    /// cached status/message bytes.
    pub fn enter_bus_free(&mut self) {
        self.phase = Phase::BusFree;
        self.bus.set_signal(Signal::Req, false);
        self.bus.set_signal(Signal::Msg, false);
        self.bus.set_signal(Signal::Cd, false);
        self.bus.set_signal(Signal::Io, false);
        self.bus.set_signal(Signal::Bsy, false);
        self.status = STATUS_GOOD;
        self.message = MESSAGE_COMMAND_COMPLETE;
    }

    /// Attempts selection: target-id bit set on the data bus and at
    /// least one LUN attached (§4.7 "Selection").
    pub fn try_select(&mut self) -> bool {
        let data = self.bus.get_data();
        if data & (1 << self.target_id) == 0 || !self.has_any_lun() {
            return false;
        }
        self.bus.set_signal(Signal::Bsy, true);
        self.phase = Phase::Selection;
        true
    }

    /// Called once SEL deasserts while BSY is asserted: routes to
    /// message-out if ATN is set (SCSI only), else to command.
    pub fn after_selection(&mut self) {
        if !self.sasi && self.bus.get_signal(Signal::Atn) {
            self.atn_capture = true;
            self.message_collect.clear();
            self.enter_message_out();
        } else {
            self.enter_command();
        }
    }

    fn enter_command(&mut self) {
        self.phase = Phase::Command;
        self.bus.set_signal(Signal::Msg, false);
        self.bus.set_signal(Signal::Cd, true);
        self.bus.set_signal(Signal::Io, false);
    }

    /// Receives one CDB (§4.7 "Command"), via burst `command_handshake`
    /// when available, else the per-byte REQ/ACK fallback.
    pub fn receive_command(&mut self) -> Result<(), ControllerError> {
        if self.bus.supports_burst() {
            let mut buf = [0u8; 10];
            let n = self
                .bus
                .command_handshake(&mut buf)
                .map_err(map_bus_error)?;
            self.cdb_len = n;
            self.cdb[..n].copy_from_slice(&buf[..n]);
            return Ok(());
        }

        let first = self.handshake_byte_in()?;
        let len = cdb_length(first);
        self.cdb[0] = first;
        for slot in self.cdb[1..len].iter_mut() {
            *slot = self.handshake_byte_in()?;
        }
        self.cdb_len = len;
        Ok(())
    }

    fn handshake_byte_in(&mut self) -> Result<u8, ControllerError> {
        self.bus.set_signal(Signal::Req, true);
        let mut tries = 0;
        while !self.bus.get_signal(Signal::Ack) {
            tries += 1;
            if tries >= HANDSHAKE_RETRY_LIMIT {
                return Err(ControllerError::HandshakeTimeout("ACK"));
            }
        }
        let byte = self.bus.get_data();
        self.bus.set_signal(Signal::Req, false);
        tries = 0;
        while self.bus.get_signal(Signal::Ack) {
            tries += 1;
            if tries >= HANDSHAKE_RETRY_LIMIT {
                return Err(ControllerError::HandshakeTimeout("ACK release"));
            }
        }
        Ok(byte)
    }

    fn handshake_byte_out(&mut self, byte: u8) -> Result<(), ControllerError> {
        self.bus.set_data(byte);
        self.bus.set_signal(Signal::Req, true);
        let mut tries = 0;
        while !self.bus.get_signal(Signal::Ack) {
            tries += 1;
            if tries >= HANDSHAKE_RETRY_LIMIT {
                return Err(ControllerError::HandshakeTimeout("ACK"));
            }
        }
        self.bus.set_signal(Signal::Req, false);
        tries = 0;
        while self.bus.get_signal(Signal::Ack) {
            tries += 1;
            if tries >= HANDSHAKE_RETRY_LIMIT {
                return Err(ControllerError::HandshakeTimeout("ACK release"));
            }
        }
        Ok(())
    }

    /// Data-in phase entry (§4.7): `MSG=0, CD=0, IO=1`.
    pub fn enter_data_in(&mut self) {
        self.phase = Phase::DataIn;
        self.bus.set_signal(Signal::Msg, false);
        self.bus.set_signal(Signal::Cd, false);
        self.bus.set_signal(Signal::Io, true);
    }

    /// Data-out phase entry (§4.7): `MSG=0, CD=0, IO=0`.
    pub fn enter_data_out(&mut self) {
        self.phase = Phase::DataOut;
        self.bus.set_signal(Signal::Msg, false);
        self.bus.set_signal(Signal::Cd, false);
        self.bus.set_signal(Signal::Io, false);
    }

    /// Status phase entry (§4.7): `MSG=0, CD=1, IO=1`, then sends the one
    /// cached status byte.
    pub fn enter_status(&mut self) -> Result<(), ControllerError> {
        self.phase = Phase::Status;
        self.bus.set_signal(Signal::Msg, false);
        self.bus.set_signal(Signal::Cd, true);
        self.bus.set_signal(Signal::Io, true);
        let status = self.status;
        self.send_byte(status)
    }

    /// Message-in phase entry (§4.7): `MSG=1, CD=1, IO=1`, then sends the
    /// one cached message byte.
    pub fn enter_message_in(&mut self) -> Result<(), ControllerError> {
        self.phase = Phase::MessageIn;
        self.bus.set_signal(Signal::Msg, true);
        self.bus.set_signal(Signal::Cd, true);
        self.bus.set_signal(Signal::Io, true);
        let message = self.message;
        self.send_byte(message)
    }

    /// Sends a single byte, via burst `send_handshake` when available,
    /// else the per-byte REQ/ACK fallback. Used by status and message-in,
    /// which always transfer exactly one byte (§4.7).
    fn send_byte(&mut self, byte: u8) -> Result<(), ControllerError> {
        if self.bus.supports_burst() {
            let buf = [byte];
            self.bus.send_handshake(&buf, 1, None).map_err(map_bus_error)?;
            return Ok(());
        }
        self.handshake_byte_out(byte)
    }

    /// Transfers the current block (`buffer[..length]`) to the initiator,
    /// via burst `send_handshake` when available, else per-byte REQ/ACK.
    pub fn send_block(&mut self) -> Result<(), ControllerError> {
        let sync_offset = if self.sync.enabled { Some(self.sync.offset) } else { None };
        if self.bus.supports_burst() {
            self.bus
                .send_handshake(&self.buffer, self.length, sync_offset)
                .map_err(map_bus_error)?;
            return Ok(());
        }
        for i in 0..self.length {
            let byte = self.buffer[i];
            self.handshake_byte_out(byte)?;
        }
        Ok(())
    }

    /// Receives the current block (`length` bytes) from the initiator
    /// into `buffer`, via burst `receive_handshake` when available, else
    /// per-byte REQ/ACK.
    pub fn receive_block(&mut self) -> Result<(), ControllerError> {
        let sync_offset = if self.sync.enabled { Some(self.sync.offset) } else { None };
        if self.buffer.len() < self.length {
            self.buffer.resize(self.length, 0);
        }
        if self.bus.supports_burst() {
            let mut buf = std::mem::take(&mut self.buffer);
            if buf.len() < self.length {
                buf.resize(self.length, 0);
            }
            let result = self.bus.receive_handshake(&mut buf, self.length, sync_offset);
            self.buffer = buf;
            result.map_err(map_bus_error)?;
            return Ok(());
        }
        for i in 0..self.length {
            self.buffer[i] = self.handshake_byte_in()?;
        }
        Ok(())
    }

    /// Dispatches the latched CDB to the current LUN (§4.7 "Execute").
    /// Sets up transfer parameters for the following data or status
    /// phase and returns which phase to enter next.
    pub fn execute(&mut self) -> Phase {
        self.phase = Phase::Execute;
        let opcode = self.cdb[0];
        let cdb = self.cdb;
        let sasi = self.sasi;

        let current = self.current_lun;
        let Some(lun) = self.luns.get_mut(current).and_then(Option::as_mut) else {
            self.status = check_condition_status(sasi, 0);
            return Phase::Status;
        };

        let outcome = dispatch(lun, opcode, &cdb, &mut self.buffer);
        match outcome {
            Ok(CommandResult::Status) => {
                self.status = STATUS_GOOD;
                Phase::Status
            }
            Ok(CommandResult::Data(len)) => {
                self.length = len;
                self.offset = 0;
                self.status = STATUS_GOOD;
                match lba_and_blocks(opcode, &cdb) {
                    Some((lba, blocks)) if is_write_opcode(opcode) => {
                        self.next_lba = lba;
                        self.remaining_blocks = blocks.saturating_sub(1);
                    }
                    Some((lba, blocks)) => {
                        self.next_lba = lba.wrapping_add(1);
                        self.remaining_blocks = blocks.saturating_sub(1);
                    }
                    None => {
                        self.next_lba = 0;
                        self.remaining_blocks = 0;
                    }
                }
                if is_write_opcode(opcode) {
                    Phase::DataOut
                } else {
                    Phase::DataIn
                }
            }
            Err(()) => {
                self.status = check_condition_status(sasi, self.current_lun as u8);
                Phase::Status
            }
        }
    }

    fn enter_message_out(&mut self) {
        self.phase = Phase::MessageOut;
        self.bus.set_signal(Signal::Msg, true);
        self.bus.set_signal(Signal::Cd, true);
        self.bus.set_signal(Signal::Io, false);
    }

    /// Processes one message-out byte and returns the next phase
    /// (§4.7 extended-message table).
    pub fn receive_message_out_byte(&mut self, byte: u8) -> Phase {
        if self.atn_capture {
            self.message_collect.push(byte);
        }
        match classify_message_out(byte) {
            MessageOutAction::Abort => Phase::BusFree,
            MessageOutAction::BusDeviceReset => {
                self.reset();
                Phase::BusFree
            }
            MessageOutAction::Identify(_) => {
                if self.bus.get_signal(Signal::Atn) {
                    Phase::MessageOut
                } else {
                    Phase::Command
                }
            }
            MessageOutAction::ExtendedStart => {
                if self.message_collect.len() >= 5 {
                    self.message = match extended_message_reply(&self.message_collect) {
                        Some(reply) if self.sync.enabled => {
                            self.sync.period = reply[3];
                            self.sync.offset = reply[4];
                            reply[0]
                        }
                        _ => reject_message(),
                    };
                    self.message_collect.clear();
                }
                if self.bus.get_signal(Signal::Atn) {
                    Phase::MessageOut
                } else {
                    Phase::Command
                }
            }
            MessageOutAction::Other(_) => {
                if self.bus.get_signal(Signal::Atn) {
                    Phase::MessageOut
                } else {
                    Phase::Command
                }
            }
        }
    }

    /// Drains MESSAGE OUT phase byte-by-byte until the initiator drops
    /// ATN, returning once the phase lands on Command or BusFree (§4.7).
    pub fn receive_message_out(&mut self) -> Result<(), ControllerError> {
        loop {
            let byte = self.handshake_byte_in()?;
            self.phase = self.receive_message_out_byte(byte);
            if matches!(self.phase, Phase::Command | Phase::BusFree) {
                return Ok(());
            }
        }
    }

    /// XferIn hook (§4.8): refills the transfer buffer with the next
    /// block for READ(6)/READ(10) data-in.
    pub fn xfer_in(&mut self) -> Result<(), ControllerError> {
        let lba = self.next_lba;
        let Some(lun) = self.lun() else {
            return Err(ControllerError::ShortTransfer { wanted: 1, got: 0 });
        };
        let mut buf = Vec::new();
        match lun.read(&mut buf, lba, 1) {
            Ok(CommandResult::Data(len)) => {
                self.buffer = buf;
                self.offset = 0;
                self.length = len;
                self.next_lba = self.next_lba.wrapping_add(1);
                Ok(())
            }
            _ => Err(ControllerError::ShortTransfer { wanted: 1, got: 0 }),
        }
    }

    /// XferOut hook (§4.8): delivers one completed block to the LUN,
    /// dispatching by CDB opcode.
    pub fn xfer_out(&mut self, cont: bool) -> Result<(), ControllerError> {
        let opcode = self.cdb[0];
        let lba = self.next_lba;
        let buffer = self.buffer.clone();
        let function = self.cdb[3];
        let phase = self.cdb[9];
        let bytchk = self.cdb[1] & 0x02 != 0;
        let Some(lun) = self.lun() else {
            return Err(ControllerError::ShortTransfer { wanted: 1, got: 0 });
        };

        match opcode {
            0x15 | 0x55 => lun
                .mode_select(&buffer, opcode == 0x55)
                .map(|_| ())
                .map_err(|_| ControllerError::ShortTransfer { wanted: 1, got: 0 }),
            0x0a | 0x2a | 0x2e => {
                lun.write(&buffer, lba)
                    .map_err(|_| ControllerError::ShortTransfer { wanted: 1, got: 0 })?;
                if cont {
                    self.next_lba = self.next_lba.wrapping_add(1);
                }
                Ok(())
            }
            0x2f => {
                lun.verify(lba, bytchk, Some(&buffer))
                    .map_err(|_| ControllerError::ShortTransfer { wanted: 1, got: 0 })?;
                if cont {
                    self.next_lba = self.next_lba.wrapping_add(1);
                }
                Ok(())
            }
            0xc6 => Ok(()), // SPECIFY (SASI-only): no-op
            0xd9 => lun
                .send_message10(function, phase, &buffer)
                .map(|_| ())
                .map_err(|_| ControllerError::ShortTransfer { wanted: 1, got: 0 }),
            _ => Ok(()),
        }
    }
}

fn is_write_opcode(opcode: u8) -> bool {
    matches!(opcode, 0x0a | 0x2a | 0x2e | 0x15 | 0x55 | 0xd9 | 0x2f)
}

/// LBA and block count for the opcodes whose data phase is driven block
/// by block via XferIn/XferOut (§4.8). `None` for single-shot transfers
/// (INQUIRY, MODE SENSE, GET MESSAGE(10), ...) whose length has nothing
/// to do with logical block addressing.
fn lba_and_blocks(opcode: u8, cdb: &[u8; 10]) -> Option<(u32, u32)> {
    match opcode {
        0x08 | 0x0a => {
            let lba = u32::from_be_bytes([0, cdb[1] & 0x1f, cdb[2], cdb[3]]);
            let blocks = if cdb[4] == 0 { 256 } else { cdb[4] as u32 };
            Some((lba, blocks))
        }
        0x28 | 0x2a | 0x2e | 0x2f => {
            let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
            let blocks = u16::from_be_bytes([cdb[7], cdb[8]]) as u32;
            Some((lba, blocks))
        }
        _ => None,
    }
}

fn map_bus_error(err: BusError) -> ControllerError {
    match err {
        BusError::Timeout => ControllerError::HandshakeTimeout("burst transfer"),
        BusError::Reset => ControllerError::Reset,
        BusError::BurstUnsupported => ControllerError::HandshakeTimeout("burst transfer"),
    }
}

/// Dispatches a CDB to the disk-command surface of §4.6. Commands the
/// LUN never issues directly return `invalid command`.
fn dispatch(
    lun: &mut Disk,
    opcode: u8,
    cdb: &[u8; 10],
    buffer: &mut Vec<u8>,
) -> Result<CommandResult, ()> {
    match opcode {
        0x00 => lun.test_unit_ready(),
        0x03 => {
            let sasi = lun.media.is_sasi();
            lun.request_sense(buffer, cdb[4] as usize, sasi)
        }
        0x12 => lun.inquiry(buffer, "0010"),
        0x1a => {
            let long_header = false;
            let dbd = cdb[1] & 0x08 != 0;
            let page_code = cdb[2] & 0x3f;
            let changeable = cdb[2] & 0xc0 == 0x40;
            lun.mode_sense(buffer, long_header, dbd, page_code, changeable)
        }
        0x5a => {
            let dbd = cdb[1] & 0x08 != 0;
            let page_code = cdb[2] & 0x3f;
            let changeable = cdb[2] & 0xc0 == 0x40;
            lun.mode_sense(buffer, true, dbd, page_code, changeable)
        }
        0x1b => lun.start_stop_unit(cdb),
        0x1e => lun.prevent_allow_removal(cdb),
        0x0b | 0x2b => {
            let lba = u32::from_be_bytes([0, cdb[1] & 0x1f, cdb[2], cdb[3]]);
            lun.seek(lba)
        }
        0x2f => {
            let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
            let bytchk = cdb[1] & 0x02 != 0;
            // Ready/range check up front; the actual byte compare (if
            // BytChk=1) happens once the comparison block arrives via
            // XferOut, which calls `verify` again with the real bytes.
            lun.verify(lba, false, None)?;
            if bytchk {
                Ok(CommandResult::Data(lun.block_size() as usize))
            } else {
                Ok(CommandResult::Status)
            }
        }
        0x25 => lun.read_capacity(buffer),
        0x37 => lun.read_defect_data(buffer),
        0x08 => {
            let lba = u32::from_be_bytes([0, cdb[1] & 0x1f, cdb[2], cdb[3]]);
            let blocks = if cdb[4] == 0 { 256 } else { cdb[4] as u32 };
            lun.read(buffer, lba, blocks)
        }
        0x28 => {
            let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
            let blocks = u16::from_be_bytes([cdb[7], cdb[8]]) as u32;
            lun.read(buffer, lba, blocks)
        }
        0x0a | 0x2a | 0x2e => {
            let (lba, blocks) = if opcode == 0x0a {
                (
                    u32::from_be_bytes([0, cdb[1] & 0x1f, cdb[2], cdb[3]]),
                    if cdb[4] == 0 { 256 } else { cdb[4] as u32 },
                )
            } else {
                (
                    u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]),
                    u16::from_be_bytes([cdb[7], cdb[8]]) as u32,
                )
            };
            if blocks == 0 {
                return Ok(CommandResult::Status);
            }
            if lun.write_protected || lun.read_only {
                lun.sense = crate::sense::SenseCode::write_protected();
                return Err(());
            }
            if lba >= lun.block_count {
                lun.sense = crate::sense::SenseCode::invalid_lba();
                return Err(());
            }
            Ok(CommandResult::Data(lun.block_size() as usize))
        }
        0x15 | 0x55 => Ok(CommandResult::Data(lun.block_size() as usize)),
        0x43 => {
            let track = cdb[6];
            let msf = cdb[1] & 0x02 != 0;
            lun.read_toc(buffer, track, msf)
        }
        0xd8 => {
            let function = cdb[3];
            let phase = cdb[9];
            lun.get_message10(function, phase, buffer)
        }
        0xd9 => {
            let function = cdb[3];
            let phase = cdb[9];
            let length = u32::from_be_bytes([0, cdb[6], cdb[7], cdb[8]]) as usize;
            if length == 0 {
                lun.send_message10(function, phase, &[])
            } else {
                buffer.resize(length, 0);
                Ok(CommandResult::Data(length))
            }
        }
        _ => lun.unsupported_command(),
    }
}
