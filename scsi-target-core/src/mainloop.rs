//! Main loop and selection dispatch (§2, §4.7).
//!
//! Waits for a SEL edge, acquires the bus snapshot, routes to the
//! selected controller, drives it to bus-free, then returns to waiting.
//! This is the only place that iterates over more than one controller at
//! once; within a single pass through [`run_once`], at most one
//! controller is ever selected (§5 "only one is selected at a time").

use crate::bus::{Bus, Phase, Signal};
use crate::controller::Controller;

/// One full pass: poll for a SEL/RST edge, and if a controller claims
/// the selection, drive it through command/execute/transfer/status
/// until bus-free. Returns `true` if a controller was driven.
///
/// Slots are `Option<Controller<B>>` because a target id may have no
/// controller at all until something is attached to it (§9 "Global
/// state"); empty slots are simply skipped.
pub fn run_once<B: Bus>(controllers: &mut [Option<Controller<B>>]) -> bool {
    let event = match controllers.iter_mut().flatten().next() {
        Some(c) => c.bus.poll_select_event(),
        None => return false,
    };

    if event.reset() {
        for controller in controllers.iter_mut().flatten() {
            controller.reset();
        }
        for controller in controllers.iter_mut().flatten() {
            controller.bus.clear_select_event();
        }
        return true;
    }

    if !event.selected() {
        return false;
    }

    let selected = controllers
        .iter_mut()
        .flatten()
        .position(|c| c.try_select());
    let Some(index) = selected else {
        for controller in controllers.iter_mut().flatten() {
            controller.bus.clear_select_event();
        }
        return false;
    };

    let controller = controllers.iter_mut().flatten().nth(index).expect("index came from this iterator");
    drive_transaction(controller);
    controller.bus.clear_select_event();
    true
}

/// Drives one already-selected controller from selection through to
/// bus-free (§4.7's phase sequence), stopping early on a protocol error.
fn drive_transaction<B: Bus>(controller: &mut Controller<B>) {
    controller.after_selection();

    loop {
        match controller.phase {
            Phase::MessageOut => {
                if controller.receive_message_out().is_err() {
                    controller.enter_bus_free();
                    break;
                }
            }
            Phase::Command => {
                if controller.receive_command().is_err() {
                    controller.enter_bus_free();
                    break;
                }
                controller.phase = controller.execute();
            }
            Phase::DataIn => {
                controller.enter_data_in();
                if pump_data_in(controller).is_err() {
                    controller.enter_bus_free();
                    break;
                }
                controller.phase = Phase::Status;
            }
            Phase::DataOut => {
                controller.enter_data_out();
                if pump_data_out(controller).is_err() {
                    controller.enter_bus_free();
                    break;
                }
                controller.phase = Phase::Status;
            }
            Phase::Status => {
                if controller.enter_status().is_err() {
                    controller.enter_bus_free();
                    break;
                }
                controller.phase = Phase::MessageIn;
            }
            Phase::MessageIn => {
                let _ = controller.enter_message_in();
                controller.enter_bus_free();
                break;
            }
            Phase::BusFree | Phase::Selection | Phase::Execute => break,
        }
    }
}

/// Sends the current block, then refills it via `xfer_in` and sends again
/// for as many blocks as `execute` requested (§4.7 "Data-in", §4.8
/// "XferIn").
fn pump_data_in<B: Bus>(controller: &mut Controller<B>) -> Result<(), crate::error::ControllerError> {
    loop {
        controller.send_block()?;
        if controller.remaining_blocks == 0 {
            return Ok(());
        }
        controller.remaining_blocks -= 1;
        controller.xfer_in()?;
    }
}

/// Receives the current block, then hands it to `xfer_out` for as many
/// blocks as `execute` requested (§4.7 "Data-out", §4.8 "XferOut").
fn pump_data_out<B: Bus>(controller: &mut Controller<B>) -> Result<(), crate::error::ControllerError> {
    loop {
        controller.receive_block()?;
        let cont = controller.remaining_blocks > 0;
        if cont {
            controller.remaining_blocks -= 1;
        }
        controller.xfer_out(cont)?;
        if !cont {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusSnapshot, SelectEvent};
    use crate::controller::Controller;
    use crate::disk::Disk;

    struct StubBus {
        data: u8,
        select_events: std::collections::VecDeque<SelectEvent>,
        sel: bool,
    }

    impl Bus for StubBus {
        fn acquire(&mut self) -> BusSnapshot {
            BusSnapshot::new()
        }
        fn get_signal(&mut self, signal: Signal) -> bool {
            matches!(signal, Signal::Sel) && self.sel
        }
        fn set_signal(&mut self, _signal: Signal, _asserted: bool) {}
        fn get_data(&mut self) -> u8 {
            self.data
        }
        fn set_data(&mut self, value: u8) {
            self.data = value;
        }
        fn poll_select_event(&mut self) -> SelectEvent {
            self.select_events.pop_front().unwrap_or_else(SelectEvent::new)
        }
        fn clear_select_event(&mut self) {
            self.sel = false;
        }
    }

    fn idle_controller() -> Controller<StubBus> {
        const NO_LUNS: [Option<Disk>; 8] = [None, None, None, None, None, None, None, None];
        Controller::new(
            StubBus { data: 0, select_events: std::collections::VecDeque::new(), sel: false },
            0,
            true,
            NO_LUNS,
        )
    }

    #[test]
    fn run_once_with_no_event_does_nothing() {
        let mut controllers = [Some(idle_controller())];
        assert!(!run_once(&mut controllers));
    }

    #[test]
    fn empty_slots_are_skipped() {
        let mut controllers: [Option<Controller<StubBus>>; 2] = [None, None];
        assert!(!run_once(&mut controllers));
    }

    #[test]
    fn reset_event_resets_every_controller() {
        let mut controllers = [Some(idle_controller())];
        controllers[0].as_mut().unwrap().bus.select_events.push_back(SelectEvent::new().with_reset(true));
        assert!(run_once(&mut controllers));
        assert_eq!(controllers[0].as_ref().unwrap().phase, Phase::BusFree);
    }

    #[test]
    fn selection_without_matching_target_does_not_drive_anything() {
        let mut controllers = [Some(idle_controller())];
        let c = controllers[0].as_mut().unwrap();
        c.bus.select_events.push_back(SelectEvent::new().with_selected(true));
        c.bus.data = 0; // no target bit set, no LUNs attached either
        assert!(!run_once(&mut controllers));
    }

    /// A burst-capable bus: `command_handshake` hands back a scripted
    /// CDB, `send_handshake` records every byte sent during data-in.
    struct BurstBus {
        data: u8,
        select_events: std::collections::VecDeque<SelectEvent>,
        cdb: Vec<u8>,
        sent: Vec<u8>,
    }

    impl Bus for BurstBus {
        fn acquire(&mut self) -> BusSnapshot {
            BusSnapshot::new()
        }
        fn get_signal(&mut self, _signal: Signal) -> bool {
            false
        }
        fn set_signal(&mut self, _signal: Signal, _asserted: bool) {}
        fn get_data(&mut self) -> u8 {
            self.data
        }
        fn set_data(&mut self, value: u8) {
            self.data = value;
        }
        fn poll_select_event(&mut self) -> SelectEvent {
            self.select_events.pop_front().unwrap_or_else(SelectEvent::new)
        }
        fn clear_select_event(&mut self) {}
        fn supports_burst(&self) -> bool {
            true
        }
        fn command_handshake(&mut self, buf: &mut [u8]) -> Result<usize, crate::bus::BusError> {
            let n = self.cdb.len();
            buf[..n].copy_from_slice(&self.cdb);
            Ok(n)
        }
        fn send_handshake(
            &mut self,
            buf: &[u8],
            len: usize,
            _sync_offset: Option<u8>,
        ) -> Result<usize, crate::bus::BusError> {
            self.sent.extend_from_slice(&buf[..len]);
            Ok(len)
        }
    }

    fn two_block_disk() -> Disk {
        use crate::cache::TrackCache;
        use crate::fileio::{FileIo, MemFileIo, OpenMode};
        use crate::image::MediaKind;
        use crate::sense::SenseCode;

        let mut bytes = vec![0xAAu8; 512];
        bytes.extend(vec![0xBBu8; 512]);
        let mut io = MemFileIo::from_bytes(bytes);
        io.open(std::path::Path::new("x"), OpenMode::ReadWrite).unwrap();

        Disk {
            media: MediaKind::ScsiHd,
            ready: true,
            write_protected: false,
            read_only: false,
            removable: false,
            locked: false,
            attention_pending: false,
            reset_pending: false,
            sector_size_exp: 9,
            block_count: 2,
            lun: 0,
            sense: SenseCode::NONE,
            io: Box::new(io),
            path: std::path::PathBuf::from("x"),
            image_offset: 0,
            cache: Some(TrackCache::new(9, 2, 0)),
            write_back: false,
            cd_tracks: Vec::new(),
            message_channel: None,
        }
    }

    #[test]
    fn read_six_two_blocks_pumps_both_blocks_through_data_in() {
        let bus = BurstBus {
            data: 0,
            select_events: std::collections::VecDeque::from([SelectEvent::new().with_selected(true)]),
            cdb: vec![0x08, 0, 0, 0, 2, 0], // READ(6) lba=0 blocks=2
            sent: Vec::new(),
        };
        let mut luns: [Option<Disk>; 8] = std::array::from_fn(|_| None);
        luns[0] = Some(two_block_disk());
        let mut controllers = [Some(Controller::new(bus, 0, true, luns))];
        controllers[0].as_mut().unwrap().bus.data = 0x01;

        assert!(run_once(&mut controllers));

        let controller = controllers[0].as_ref().unwrap();
        assert_eq!(controller.phase, Phase::BusFree);
        assert_eq!(controller.status, crate::controller::STATUS_GOOD);
        let mut expected = vec![0xAAu8; 512];
        expected.extend(vec![0xBBu8; 512]);
        expected.push(crate::controller::STATUS_GOOD);
        expected.push(crate::controller::MESSAGE_COMMAND_COMPLETE);
        assert_eq!(controller.bus.sent, expected);
    }
}
