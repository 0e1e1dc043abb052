//! Logical unit / disk command dispatch (§4.6).
//!
//! A `Disk` is one logical unit: its media state, its track cache, and
//! the SCSI/SASI command surface a disk-class device must expose.

use std::path::PathBuf;

use crate::cache::TrackCache;
use crate::fileio::FileIo;
use crate::image::MediaKind;
use crate::mode_pages::{self, ModeSenseParams};
use crate::msf::Msf;
use crate::sense::SenseCode;

/// Outcome of a command method: either it produced `len` bytes of data in
/// the caller-supplied buffer, or it merely completed (status only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Data(usize),
    Status,
}

/// Commands never unwind `Result` for ordinary SCSI failures; they latch
/// a sense code on `self` and return `Err(())`. The caller (the protocol
/// engine) reads `disk.sense` to build CHECK CONDITION.
pub type CmdResult = Result<CommandResult, ()>;

/// A registered host-bridge message channel (§4.6 GET/SEND MESSAGE).
pub trait MessageChannel {
    fn get_message(&mut self, function: u8, phase: u8) -> Vec<u8>;
    fn send_message(&mut self, function: u8, phase: u8, data: &[u8]);
}

/// CD track table entry (§3 "CD track").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdTrack {
    pub number: u8,
    pub first_lba: u32,
    pub last_lba: u32,
    pub audio: bool,
    pub raw: bool,
}

pub struct Disk {
    pub media: MediaKind,
    pub ready: bool,
    pub write_protected: bool,
    pub read_only: bool,
    pub removable: bool,
    pub locked: bool,
    pub attention_pending: bool,
    pub reset_pending: bool,

    pub sector_size_exp: u8,
    pub block_count: u32,
    pub lun: u8,
    pub sense: SenseCode,

    pub io: Box<dyn FileIo>,
    pub path: PathBuf,
    pub image_offset: u64,

    pub cache: Option<TrackCache>,
    pub write_back: bool,

    pub cd_tracks: Vec<CdTrack>,
    pub message_channel: Option<Box<dyn MessageChannel>>,
}

impl Disk {
    pub fn block_size(&self) -> u32 {
        1u32 << self.sector_size_exp
    }

    fn set_sense(&mut self, code: SenseCode) {
        self.sense = code;
    }

    /// Every command runs this first (§4.6).
    fn ready_check(&mut self) -> CmdResult {
        if self.reset_pending {
            self.set_sense(SenseCode::device_reset());
            self.reset_pending = false;
            return Err(());
        }
        if self.attention_pending {
            self.set_sense(SenseCode::attention());
            self.attention_pending = false;
            return Err(());
        }
        if !self.ready {
            self.set_sense(SenseCode::not_ready());
            return Err(());
        }
        Ok(CommandResult::Status)
    }

    fn write_check(&mut self, lba: u32) -> CmdResult {
        self.ready_check()?;
        if self.write_protected || self.read_only {
            self.set_sense(SenseCode::write_protected());
            return Err(());
        }
        if lba >= self.block_count {
            self.set_sense(SenseCode::invalid_lba());
            return Err(());
        }
        Ok(CommandResult::Status)
    }

    // ---- status-only commands ----

    pub fn test_unit_ready(&mut self) -> CmdResult {
        self.ready_check()
    }

    pub fn start_stop_unit(&mut self, cdb: &[u8]) -> CmdResult {
        self.ready_check()?;
        let load_eject = cdb[4] & 0x02 != 0;
        let start = cdb[4] & 0x01 != 0;
        if load_eject && !start {
            if self.locked {
                self.set_sense(SenseCode::medium_removal_prevented());
                return Err(());
            }
            if let Some(cache) = self.cache.as_mut() {
                let _ = cache.save(self.io.as_mut());
            }
            self.cache = None;
            self.ready = false;
        }
        Ok(CommandResult::Status)
    }

    pub fn prevent_allow_removal(&mut self, cdb: &[u8]) -> CmdResult {
        self.ready_check()?;
        self.locked = cdb[4] & 0x01 != 0;
        Ok(CommandResult::Status)
    }

    pub fn seek(&mut self, lba: u32) -> CmdResult {
        self.ready_check()?;
        if lba >= self.block_count {
            self.set_sense(SenseCode::invalid_lba());
            return Err(());
        }
        Ok(CommandResult::Status)
    }

    /// VERIFY without BytChk=1 is a range check only. With BytChk=1 the
    /// caller's buffer is compared against storage (§9 open question,
    /// resolved as a real byte-compare).
    pub fn verify(&mut self, lba: u32, bytchk: bool, expected: Option<&[u8]>) -> CmdResult {
        self.ready_check()?;
        if lba >= self.block_count {
            self.set_sense(SenseCode::invalid_lba());
            return Err(());
        }
        if bytchk {
            let mut buf = vec![0u8; self.block_size() as usize];
            if self.read_block(&mut buf, lba).is_err() {
                return Err(());
            }
            if Some(buf.as_slice()) != expected {
                self.set_sense(SenseCode::miscompare());
                return Err(());
            }
        }
        Ok(CommandResult::Status)
    }

    // ---- data-producing commands ----

    pub fn request_sense(&mut self, buf: &mut Vec<u8>, allocation_length: usize, sasi: bool) -> CmdResult {
        let code = self.sense;
        self.sense = SenseCode::NONE;

        if sasi {
            let bytes = code.to_sasi_bytes(self.lun);
            buf.clear();
            buf.extend_from_slice(&bytes);
            return Ok(CommandResult::Data(4));
        }

        let bytes = code.to_extended_bytes();
        let len = if allocation_length == 0 { 4 } else { allocation_length.min(18) };
        buf.clear();
        buf.extend_from_slice(&bytes[..len]);
        Ok(CommandResult::Data(len))
    }

    pub fn inquiry(&mut self, buf: &mut Vec<u8>, build_revision: &str) -> CmdResult {
        self.ready_check().ok();
        let capacity_mib = (self.block_count as u64 * self.block_size() as u64) / (1024 * 1024);
        let bytes = self.media.inquiry_bytes(capacity_mib, build_revision);
        buf.clear();
        buf.extend_from_slice(&bytes);
        Ok(CommandResult::Data(bytes.len()))
    }

    pub fn mode_sense(&mut self, buf: &mut Vec<u8>, long_header: bool, dbd: bool, page_code: u8, changeable: bool) -> CmdResult {
        self.ready_check()?;
        let params = ModeSenseParams {
            kind: self.media,
            block_count: self.block_count,
            block_size: self.block_size(),
            write_protected: self.write_protected,
            removable: self.removable,
            long_header,
            dbd,
            page_code,
            changeable,
        };
        match mode_pages::mode_sense(&params) {
            Ok(bytes) => {
                buf.clear();
                buf.extend_from_slice(&bytes);
                Ok(CommandResult::Data(bytes.len()))
            }
            Err(code) => {
                self.set_sense(code);
                Err(())
            }
        }
    }

    pub fn mode_select(&mut self, data: &[u8], long_header: bool) -> CmdResult {
        self.ready_check()?;
        match mode_pages::mode_select(data, self.block_size(), long_header) {
            Ok(()) => Ok(CommandResult::Status),
            Err(code) => {
                self.set_sense(code);
                Err(())
            }
        }
    }

    pub fn read_capacity(&mut self, buf: &mut Vec<u8>) -> CmdResult {
        self.ready_check()?;
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&(self.block_count - 1).to_be_bytes());
        bytes[4..8].copy_from_slice(&self.block_size().to_be_bytes());
        buf.clear();
        buf.extend_from_slice(&bytes);
        Ok(CommandResult::Data(8))
    }

    pub fn read_defect_data(&mut self, buf: &mut Vec<u8>) -> CmdResult {
        self.ready_check()?;
        let bytes = [0u8, 0, 0, 0];
        buf.clear();
        buf.extend_from_slice(&bytes);
        Ok(CommandResult::Data(4))
    }

    /// Reads one logical block into `buf`, via the cache.
    pub fn read_block(&mut self, buf: &mut [u8], lba: u32) -> Result<(), ()> {
        if lba >= self.block_count {
            return Err(());
        }
        let cache = self.cache.as_mut().ok_or(())?;
        cache.read(self.io.as_mut(), buf, lba).map_err(|_| ())
    }

    /// Pre-flight for READ(6)/READ(10): checks the range and loads block
    /// `lba` into `buf` (subsequent blocks come through the XferIn hook).
    pub fn read(&mut self, buf: &mut Vec<u8>, lba: u32, blocks: u32) -> CmdResult {
        self.ready_check()?;
        if blocks == 0 {
            return Ok(CommandResult::Status);
        }
        if lba >= self.block_count || lba as u64 + blocks as u64 > self.block_count as u64 {
            self.set_sense(SenseCode::invalid_lba());
            return Err(());
        }
        let size = self.block_size() as usize;
        buf.resize(size, 0);
        let mut tmp = vec![0u8; size];
        if self.read_block(&mut tmp, lba).is_err() {
            self.set_sense(SenseCode::read_fault());
            return Err(());
        }
        buf.copy_from_slice(&tmp);
        Ok(CommandResult::Data(size))
    }

    /// Writes one logical block from `buf`. Used both by WRITE and by the
    /// XferOut hook for subsequent blocks of a multi-block transfer.
    pub fn write(&mut self, buf: &[u8], lba: u32) -> CmdResult {
        self.write_check(lba)?;
        let cache = match self.cache.as_mut() {
            Some(c) => c,
            None => {
                self.set_sense(SenseCode::not_ready());
                return Err(());
            }
        };
        if cache.write(self.io.as_mut(), buf, lba).is_err() {
            self.set_sense(SenseCode::write_fault());
            return Err(());
        }
        Ok(CommandResult::Status)
    }

    /// Invoked at end of a WRITE transfer when the cache is not
    /// write-back.
    pub fn flush(&mut self) -> CmdResult {
        if let Some(cache) = self.cache.as_mut() {
            if cache.save(self.io.as_mut()).is_err() {
                self.set_sense(SenseCode::write_fault());
                return Err(());
            }
        }
        Ok(CommandResult::Status)
    }

    // ---- CD-only ----

    pub fn read_toc(&mut self, buf: &mut Vec<u8>, track_number: u8, msf: bool) -> CmdResult {
        self.ready_check()?;
        if self.media != MediaKind::Cd {
            self.set_sense(SenseCode::invalid_command());
            return Err(());
        }

        buf.clear();
        buf.extend_from_slice(&[0u8, 0]); // toc length, filled below
        let first = self.cd_tracks.first().map(|t| t.number).unwrap_or(1);
        let last = self.cd_tracks.last().map(|t| t.number).unwrap_or(1);
        buf.push(first);
        buf.push(last);

        if track_number == 0xaa {
            let last_lba = self.cd_tracks.last().map(|t| t.last_lba + 1).unwrap_or(0);
            push_toc_entry(buf, 0xaa, 0x14, last_lba, msf);
        } else {
            for track in self.cd_tracks.iter().filter(|t| track_number == 0 || t.number >= track_number) {
                let control = if track.audio { 0x10 } else { 0x14 };
                push_toc_entry(buf, track.number, control, track.first_lba, msf);
            }
        }

        let len = (buf.len() - 2) as u16;
        buf[0..2].copy_from_slice(&len.to_be_bytes());
        let n = buf.len();
        Ok(CommandResult::Data(n))
    }

    // ---- host-bridge only ----

    pub fn get_message10(&mut self, function: u8, phase: u8, buf: &mut Vec<u8>) -> CmdResult {
        self.ready_check().ok();
        if self.media != MediaKind::Bridge {
            self.set_sense(SenseCode::invalid_command());
            return Err(());
        }
        let Some(chan) = self.message_channel.as_mut() else {
            self.set_sense(SenseCode::invalid_command());
            return Err(());
        };
        let data = chan.get_message(function, phase);
        buf.clear();
        buf.extend_from_slice(&data);
        Ok(CommandResult::Data(data.len()))
    }

    pub fn send_message10(&mut self, function: u8, phase: u8, data: &[u8]) -> CmdResult {
        self.ready_check().ok();
        if self.media != MediaKind::Bridge {
            self.set_sense(SenseCode::invalid_command());
            return Err(());
        }
        let Some(chan) = self.message_channel.as_mut() else {
            self.set_sense(SenseCode::invalid_command());
            return Err(());
        };
        chan.send_message(function, phase, data);
        Ok(CommandResult::Status)
    }

    pub fn unsupported_command(&mut self) -> CmdResult {
        self.set_sense(SenseCode::invalid_command());
        Err(())
    }
}

fn push_toc_entry(buf: &mut Vec<u8>, track: u8, control: u8, lba: u32, msf: bool) {
    buf.push(0); // reserved
    buf.push(control);
    buf.push(track);
    buf.push(0); // reserved
    if msf {
        let m = Msf::from_lba(lba);
        buf.push(0);
        buf.push(m.minute);
        buf.push(m.second);
        buf.push(m.frame);
    } else {
        buf.extend_from_slice(&lba.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileio::{MemFileIo, OpenMode};
    use std::path::Path;

    fn test_disk(block_count: u32) -> Disk {
        let mut io = MemFileIo::from_bytes(vec![0u8; block_count as usize * 512]);
        io.open(Path::new("x"), OpenMode::ReadWrite).unwrap();
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
            block_count,
            lun: 0,
            sense: SenseCode::NONE,
            io: Box::new(io),
            path: PathBuf::from("x"),
            image_offset: 0,
            cache: Some(TrackCache::new(9, block_count, 0)),
            write_back: false,
            cd_tracks: Vec::new(),
            message_channel: None,
        }
    }

    #[test]
    fn not_ready_disk_fails_ready_check() {
        let mut disk = test_disk(64);
        disk.ready = false;
        assert!(disk.test_unit_ready().is_err());
        assert_eq!(disk.sense.key(), Some(crate::sense::SenseKey::NotReady));
    }

    #[test]
    fn reset_pending_reports_once_then_clears() {
        let mut disk = test_disk(64);
        disk.reset_pending = true;
        assert!(disk.test_unit_ready().is_err());
        assert_eq!(disk.sense.key(), Some(crate::sense::SenseKey::UnitAttention));
        assert!(!disk.reset_pending);
        disk.sense = SenseCode::NONE;
        assert!(disk.test_unit_ready().is_ok());
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut disk = test_disk(64);
        let data = vec![0x55u8; 512];
        assert!(disk.write(&data, 3).is_ok());
        let mut buf = Vec::new();
        assert!(disk.read(&mut buf, 3, 1).is_ok());
        assert_eq!(buf, data);
    }

    #[test]
    fn read_ten_with_zero_blocks_completes_with_status() {
        let mut disk = test_disk(64);
        let mut buf = Vec::new();
        let result = disk.read(&mut buf, 0, 0).unwrap();
        assert_eq!(result, CommandResult::Status);
    }

    #[test]
    fn write_rejects_out_of_range_lba() {
        let mut disk = test_disk(64);
        assert!(disk.write(&[0u8; 512], 64).is_err());
        assert_eq!(disk.sense.key(), Some(crate::sense::SenseKey::IllegalRequest));
    }

    #[test]
    fn write_protected_disk_rejects_write() {
        let mut disk = test_disk(64);
        disk.write_protected = true;
        assert!(disk.write(&[0u8; 512], 0).is_err());
    }

    #[test]
    fn request_sense_zero_allocation_length_returns_four_bytes() {
        let mut disk = test_disk(64);
        disk.sense = SenseCode::invalid_cdb();
        let mut buf = Vec::new();
        let result = disk.request_sense(&mut buf, 0, false).unwrap();
        assert_eq!(result, CommandResult::Data(4));
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn request_sense_clears_latched_sense_after_reporting() {
        let mut disk = test_disk(64);
        disk.sense = SenseCode::invalid_cdb();
        let mut buf = Vec::new();
        disk.request_sense(&mut buf, 18, false).unwrap();
        assert!(disk.sense.is_none());
    }

    #[test]
    fn eject_locked_media_is_refused() {
        let mut disk = test_disk(64);
        disk.removable = true;
        disk.locked = true;
        let cdb = [0x1b, 0, 0, 0, 0x03, 0];
        assert!(disk.start_stop_unit(&cdb).is_err());
        assert!(disk.ready); // still present
    }

    #[test]
    fn read_capacity_returns_last_lba_and_block_length() {
        let mut disk = test_disk(64);
        let mut buf = Vec::new();
        disk.read_capacity(&mut buf).unwrap();
        assert_eq!(&buf[0..4], &63u32.to_be_bytes());
        assert_eq!(&buf[4..8], &512u32.to_be_bytes());
    }

    #[test]
    fn verify_bytchk_detects_miscompare() {
        let mut disk = test_disk(64);
        disk.write(&[1u8; 512], 0).unwrap();
        assert!(disk.verify(0, true, Some(&[1u8; 512])).is_ok());
        assert!(disk.verify(0, true, Some(&[2u8; 512])).is_err());
        assert_eq!(disk.sense.key(), Some(crate::sense::SenseKey::Miscompare));
    }

    #[test]
    fn read_toc_track_aa_returns_last_lba_plus_one() {
        let mut disk = test_disk(64);
        disk.media = MediaKind::Cd;
        disk.cd_tracks = vec![CdTrack { number: 1, first_lba: 0, last_lba: 63, audio: false, raw: false }];
        let mut buf = Vec::new();
        disk.read_toc(&mut buf, 0xaa, false).unwrap();
        let entry_lba = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        assert_eq!(entry_lba, 64);
    }
}
