//! Device table and per-target-id controller ownership (§9 "Global state").
//!
//! The ID→controller table is a normal struct built once at startup, not
//! global state. Attach/detach/insert/eject requests arriving over the
//! control channel mutate it directly; the caller is responsible for only
//! doing so at a bus-free/selection boundary (§9 "Monitor / worker
//! coupling").

use thiserror::Error;

use scsi_target_core::bus::Bus;
use scsi_target_core::controller::Controller;
use scsi_target_core::disk::Disk;

use crate::attach::{self, AttachError};
use crate::config::ImageSpec;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("target id {0} must be 0..7")]
    InvalidId(u8),

    #[error("lun {0} must be 0..7")]
    InvalidLun(u8),

    #[error(transparent)]
    Attach(#[from] AttachError),

    #[error("no device attached at id {id} lun {lun}")]
    NotAttached { id: u8, lun: u8 },

    #[error("medium at id {id} lun {lun} is locked against removal")]
    Locked { id: u8, lun: u8 },
}

/// One target id's controller per slot, created lazily on first attach.
pub struct Daemon<B: Bus + Clone> {
    bus: B,
    controllers: [Option<Controller<B>>; 8],
}

impl<B: Bus + Clone> Daemon<B> {
    pub fn new(bus: B) -> Self {
        Self { bus, controllers: std::array::from_fn(|_| None) }
    }

    fn controller_mut(&mut self, id: u8) -> Result<&mut Controller<B>, EngineError> {
        let idx = id as usize;
        if idx >= 8 {
            return Err(EngineError::InvalidId(id));
        }
        if self.controllers[idx].is_none() {
            let luns: [Option<Disk>; 8] = std::array::from_fn(|_| None);
            self.controllers[idx] = Some(Controller::new(self.bus.clone(), id, false, luns));
        }
        Ok(self.controllers[idx].as_mut().expect("just inserted above"))
    }

    fn lun_mut(&mut self, id: u8, lun: u8) -> Result<Option<&mut Disk>, EngineError> {
        if lun > 7 {
            return Err(EngineError::InvalidLun(lun));
        }
        let idx = id as usize;
        if idx >= 8 {
            return Err(EngineError::InvalidId(id));
        }
        Ok(self.controllers[idx]
            .as_mut()
            .and_then(|c| c.luns.get_mut(lun as usize))
            .and_then(Option::as_mut))
    }

    /// Attaches a fresh medium at `spec.id`/`spec.lun`, replacing whatever
    /// was there before (§6 attach command `0`).
    pub fn attach(&mut self, spec: &ImageSpec) -> Result<(), EngineError> {
        if spec.lun > 7 {
            return Err(EngineError::InvalidLun(spec.lun));
        }
        let disk = attach::attach(spec)?;
        let controller = self.controller_mut(spec.id)?;
        controller.luns[spec.lun as usize] = Some(disk);
        Ok(())
    }

    /// Detaches whatever is at `id`/`lun` (§6 attach command `1`).
    pub fn detach(&mut self, id: u8, lun: u8) -> Result<(), EngineError> {
        if lun > 7 {
            return Err(EngineError::InvalidLun(lun));
        }
        let controller = self.controller_mut(id)?;
        if controller.luns[lun as usize].take().is_none() {
            return Err(EngineError::NotAttached { id, lun });
        }
        Ok(())
    }

    /// Loads a fresh medium into an already-attached removable LUN (§6
    /// attach command `2`), reusing the same attach path as a fresh
    /// attach since the slot simply gets overwritten.
    pub fn insert(&mut self, spec: &ImageSpec) -> Result<(), EngineError> {
        self.attach(spec)
    }

    /// Ejects the medium at `id`/`lun` (§6 attach command `3`): refused
    /// while PREVENT ALLOW REMOVAL has the medium locked.
    pub fn eject(&mut self, id: u8, lun: u8) -> Result<(), EngineError> {
        let Some(disk) = self.lun_mut(id, lun)? else {
            return Err(EngineError::NotAttached { id, lun });
        };
        if disk.locked {
            return Err(EngineError::Locked { id, lun });
        }
        if let Some(cache) = disk.cache.as_mut() {
            let _ = cache.save(disk.io.as_mut());
        }
        disk.cache = None;
        disk.ready = false;
        Ok(())
    }

    /// Toggles write-protect on the medium at `id`/`lun` (§6 attach
    /// command `4`).
    pub fn toggle_protect(&mut self, id: u8, lun: u8) -> Result<(), EngineError> {
        let Some(disk) = self.lun_mut(id, lun)? else {
            return Err(EngineError::NotAttached { id, lun });
        };
        disk.write_protected = !disk.write_protected;
        Ok(())
    }

    /// One line per attached LUN, for the control channel's `list`
    /// response (§6): `<id> <lun> <type> <status>[ (WRITEPROTECT)]`.
    pub fn list(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (id, controller) in self.controllers.iter().enumerate() {
            let Some(controller) = controller else { continue };
            for (lun, disk) in controller.luns.iter().enumerate() {
                let Some(disk) = disk else { continue };
                let tag = String::from_utf8_lossy(disk.media.tag()).into_owned();
                let status = if disk.ready { "ATTACHED" } else { "NO MEDIA" };
                let protect = if disk.write_protected { " (WRITEPROTECT)" } else { "" };
                lines.push(format!("{id} {lun} {tag} {status}{protect}"));
            }
        }
        lines
    }

    pub fn controllers_mut(&mut self) -> &mut [Option<Controller<B>>; 8] {
        &mut self.controllers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageType;
    use scsi_target_core::bus::{BusSnapshot, SelectEvent, Signal};

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
    impl Clone for NullBus {
        fn clone(&self) -> Self {
            NullBus
        }
    }

    fn bridge_spec(id: u8, lun: u8) -> ImageSpec {
        ImageSpec { id, lun, image_type: ImageType::Bridge, path: None, write_protected: false }
    }

    #[test]
    fn attach_then_list_reports_the_new_lun() {
        let mut daemon = Daemon::new(NullBus);
        daemon.attach(&bridge_spec(2, 0)).unwrap();
        let lines = daemon.list();
        assert_eq!(lines, vec!["2 0 SCBR ATTACHED".to_string()]);
    }

    #[test]
    fn detach_removes_the_lun_from_the_list() {
        let mut daemon = Daemon::new(NullBus);
        daemon.attach(&bridge_spec(2, 0)).unwrap();
        daemon.detach(2, 0).unwrap();
        assert!(daemon.list().is_empty());
    }

    #[test]
    fn detach_without_attach_is_an_error() {
        let mut daemon = Daemon::new(NullBus);
        assert!(matches!(daemon.detach(0, 0), Err(EngineError::NotAttached { .. })));
    }

    #[test]
    fn eject_refuses_a_locked_medium() {
        let mut daemon = Daemon::new(NullBus);
        daemon.attach(&bridge_spec(0, 0)).unwrap();
        daemon.lun_mut(0, 0).unwrap().unwrap().locked = true;
        assert!(matches!(daemon.eject(0, 0), Err(EngineError::Locked { .. })));
    }

    #[test]
    fn toggle_protect_flips_the_flag_twice_back_to_original() {
        let mut daemon = Daemon::new(NullBus);
        daemon.attach(&bridge_spec(0, 0)).unwrap();
        daemon.toggle_protect(0, 0).unwrap();
        assert!(daemon.lun_mut(0, 0).unwrap().unwrap().write_protected);
        daemon.toggle_protect(0, 0).unwrap();
        assert!(!daemon.lun_mut(0, 0).unwrap().unwrap().write_protected);
    }

    #[test]
    fn out_of_range_lun_is_rejected() {
        let mut daemon = Daemon::new(NullBus);
        assert!(matches!(daemon.attach(&bridge_spec(0, 8)), Err(EngineError::InvalidLun(8))));
    }
}
