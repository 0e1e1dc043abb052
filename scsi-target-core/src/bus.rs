//! Logical bus abstraction (§4.1).
//!
//! The protocol engine never talks to GPIO registers directly; it talks to
//! this trait. The concrete bit-banging driver lives in `scsi-target-gpio`
//! and is out of scope for this crate beyond the contract below.

use bitfield_struct::bitfield;

/// One of the bus states a target ever enters. `BusFree` through
/// `MessageOut` are the eight phases the target drives; `Selection` and
/// `BusFree` bookend every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    BusFree,
    Selection,
    Command,
    Execute,
    DataIn,
    DataOut,
    Status,
    MessageIn,
    MessageOut,
}

/// A snapshot of every control signal and the data bus, packed one bit per
/// signal the way the real hardware register reads it back.
#[bitfield(u16)]
pub struct BusSnapshot {
    pub bsy: bool,
    pub sel: bool,
    pub atn: bool,
    pub ack: bool,
    pub rst: bool,
    pub msg: bool,
    pub cd: bool,
    pub io: bool,
    pub req: bool,
    pub parity: bool,
    #[bits(6)]
    __padding: u8,
}

/// Event bitmask returned by [`Bus::poll_select_event`].
#[bitfield(u8)]
pub struct SelectEvent {
    pub selected: bool,
    pub reset: bool,
    #[bits(6)]
    __padding: u8,
}

/// Control signal identifiers, used with [`Bus::get_signal`] /
/// [`Bus::set_signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Bsy,
    Sel,
    Atn,
    Ack,
    Rst,
    Msg,
    Cd,
    Io,
    Req,
}

/// Polymorphic target-side bus interface.
///
/// Every operation here is treated as atomic against concurrent
/// inspection; the engine is single-threaded (§4.1, §5), so no locking is
/// required inside implementations used by this crate.
pub trait Bus {
    /// Reads every control signal and the data bus in one snapshot.
    fn acquire(&mut self) -> BusSnapshot;

    fn get_signal(&mut self, signal: Signal) -> bool;
    fn set_signal(&mut self, signal: Signal, asserted: bool);

    fn get_data(&mut self) -> u8;
    fn set_data(&mut self, value: u8);

    /// Blocks until a SEL edge (or RST edge) is observed.
    fn poll_select_event(&mut self) -> SelectEvent;
    fn clear_select_event(&mut self);

    /// True if the driver beneath this bus supports the burst transfer
    /// primitives below instead of per-byte REQ/ACK handshaking.
    fn supports_burst(&self) -> bool {
        false
    }

    /// Receives one CDB using the first-byte length disambiguation of
    /// §4.7 ("Command" phase). Only called when `supports_burst()` is true.
    fn command_handshake(&mut self, _buf: &mut [u8]) -> Result<usize, BusError> {
        Err(BusError::BurstUnsupported)
    }

    fn send_handshake(
        &mut self,
        _buf: &[u8],
        _len: usize,
        _sync_offset: Option<u8>,
    ) -> Result<usize, BusError> {
        Err(BusError::BurstUnsupported)
    }

    fn receive_handshake(
        &mut self,
        _buf: &mut [u8],
        _len: usize,
        _sync_offset: Option<u8>,
    ) -> Result<usize, BusError> {
        Err(BusError::BurstUnsupported)
    }
}

/// Lets several [`Controller`](crate::controller::Controller)s (one per
/// target id) share the one physical bus a parallel SCSI cable actually
/// is. Cheap `Rc<RefCell<_>>` sharing is enough because the engine is
/// single-threaded (§4.1, §5) — there is never a concurrent borrow.
pub struct SharedBus<B> {
    inner: std::rc::Rc<std::cell::RefCell<B>>,
}

impl<B> SharedBus<B> {
    pub fn new(bus: B) -> Self {
        Self { inner: std::rc::Rc::new(std::cell::RefCell::new(bus)) }
    }
}

impl<B> Clone for SharedBus<B> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<B: Bus> Bus for SharedBus<B> {
    fn acquire(&mut self) -> BusSnapshot {
        self.inner.borrow_mut().acquire()
    }
    fn get_signal(&mut self, signal: Signal) -> bool {
        self.inner.borrow_mut().get_signal(signal)
    }
    fn set_signal(&mut self, signal: Signal, asserted: bool) {
        self.inner.borrow_mut().set_signal(signal, asserted)
    }
    fn get_data(&mut self) -> u8 {
        self.inner.borrow_mut().get_data()
    }
    fn set_data(&mut self, value: u8) {
        self.inner.borrow_mut().set_data(value)
    }
    fn poll_select_event(&mut self) -> SelectEvent {
        self.inner.borrow_mut().poll_select_event()
    }
    fn clear_select_event(&mut self) {
        self.inner.borrow_mut().clear_select_event()
    }
    fn supports_burst(&self) -> bool {
        self.inner.borrow().supports_burst()
    }
    fn command_handshake(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        self.inner.borrow_mut().command_handshake(buf)
    }
    fn send_handshake(&mut self, buf: &[u8], len: usize, sync_offset: Option<u8>) -> Result<usize, BusError> {
        self.inner.borrow_mut().send_handshake(buf, len, sync_offset)
    }
    fn receive_handshake(&mut self, buf: &mut [u8], len: usize, sync_offset: Option<u8>) -> Result<usize, BusError> {
        self.inner.borrow_mut().receive_handshake(buf, len, sync_offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("burst transfer requested but not supported by this bus")]
    BurstUnsupported,
    #[error("handshake timed out")]
    Timeout,
    #[error("bus reset observed mid-transfer")]
    Reset,
}
