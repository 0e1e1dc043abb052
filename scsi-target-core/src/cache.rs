//! Track cache (§3 "Cache", §4.5): a fixed-size associative cache of disk
//! tracks with write-back semantics and LRU-by-serial eviction.

use crate::error::DiskError;
use crate::fileio::FileIo;
use crate::track::{DiskTrack, SECTORS_PER_TRACK};

/// Fixed capacity per §3/§4.5.
pub const CAPACITY: usize = 16;

struct Slot {
    track: Option<DiskTrack>,
    serial: u32,
}

pub struct TrackCache {
    slots: Vec<Slot>,
    serial: u32,
    sector_size_exp: u8,
    block_count: u32,
    image_offset: u64,
    raw: bool,
}

impl TrackCache {
    pub fn new(sector_size_exp: u8, block_count: u32, image_offset: u64) -> Self {
        let mut slots = Vec::with_capacity(CAPACITY);
        for _ in 0..CAPACITY {
            slots.push(Slot {
                track: None,
                serial: 0,
            });
        }
        Self {
            slots,
            serial: 0,
            sector_size_exp,
            block_count,
            image_offset,
            raw: false,
        }
    }

    /// Raw mode is only meaningful for 2048-byte user sectors nested in
    /// 2352-byte RAW CD frames (sector_size_exp == 11).
    pub fn set_raw(&mut self, raw: bool) -> Result<(), DiskError> {
        if raw && self.sector_size_exp != 11 {
            return Err(DiskError::Unsupported);
        }
        self.raw = raw;
        Ok(())
    }

    fn track_sector_count(&self, track_index: u32) -> u32 {
        let first_block = track_index * SECTORS_PER_TRACK;
        (self.block_count - first_block).min(SECTORS_PER_TRACK)
    }

    fn bump_serial(&mut self) -> u32 {
        self.serial = self.serial.wrapping_add(1);
        if self.serial == 0 {
            for slot in &mut self.slots {
                slot.serial = 0;
            }
        }
        self.serial
    }

    /// Resolves the track for `track_index`, loading it if necessary,
    /// per the assignment algorithm of §4.5.
    fn assign(&mut self, io: &mut dyn FileIo, track_index: u32) -> Result<usize, DiskError> {
        if let Some(pos) = self
            .slots
            .iter()
            .position(|s| s.track.as_ref().is_some_and(|t| t.index == track_index))
        {
            let serial = self.bump_serial();
            self.slots[pos].serial = serial;
            return Ok(pos);
        }

        if let Some(pos) = self.slots.iter().position(|s| s.track.is_none()) {
            let sector_count = self.track_sector_count(track_index);
            let mut track = DiskTrack::new(
                track_index,
                self.sector_size_exp,
                sector_count,
                self.raw,
                self.image_offset,
            );
            track.load(io)?;
            let serial = self.bump_serial();
            self.slots[pos] = Slot {
                track: Some(track),
                serial,
            };
            return Ok(pos);
        }

        let victim = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.serial)
            .map(|(i, _)| i)
            .expect("capacity is non-zero");

        if let Some(track) = self.slots[victim].track.as_mut() {
            if track.is_dirty() {
                track.save(io)?;
            }
        }

        let sector_count = self.track_sector_count(track_index);
        let mut track = self.slots[victim].track.take().expect("checked above");
        track.reset_for(
            track_index,
            self.sector_size_exp,
            sector_count,
            self.raw,
            self.image_offset,
        );
        track.load(io)?;
        let serial = self.bump_serial();
        self.slots[victim] = Slot {
            track: Some(track),
            serial,
        };
        Ok(victim)
    }

    pub fn read(&mut self, io: &mut dyn FileIo, buf: &mut [u8], block: u32) -> Result<(), DiskError> {
        let track_index = block / SECTORS_PER_TRACK;
        let sector_in_track = block % SECTORS_PER_TRACK;
        let slot = self.assign(io, track_index)?;
        self.slots[slot]
            .track
            .as_ref()
            .expect("just assigned")
            .read(buf, sector_in_track)
    }

    pub fn write(&mut self, io: &mut dyn FileIo, buf: &[u8], block: u32) -> Result<(), DiskError> {
        let track_index = block / SECTORS_PER_TRACK;
        let sector_in_track = block % SECTORS_PER_TRACK;
        let slot = self.assign(io, track_index)?;
        self.slots[slot]
            .track
            .as_mut()
            .expect("just assigned")
            .write(buf, sector_in_track)
    }

    /// Writes back every dirty track.
    pub fn save(&mut self, io: &mut dyn FileIo) -> Result<(), DiskError> {
        for slot in &mut self.slots {
            if let Some(track) = slot.track.as_mut() {
                if track.is_dirty() {
                    track.save(io)?;
                }
            }
        }
        Ok(())
    }

    /// Releases all tracks without saving.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.track = None;
            slot.serial = 0;
        }
        self.serial = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileio::{MemFileIo, OpenMode};
    use std::path::Path;

    fn opened_io(size: usize) -> MemFileIo {
        let mut io = MemFileIo::from_bytes(vec![0u8; size]);
        io.open(Path::new("x"), OpenMode::ReadWrite).unwrap();
        io
    }

    #[test]
    fn write_then_read_same_block_round_trips() {
        let mut io = opened_io(64 * 512);
        let mut cache = TrackCache::new(9, 64, 0);
        let data = [0x42u8; 512];
        cache.write(&mut io, &data, 5).unwrap();
        let mut buf = [0u8; 512];
        cache.read(&mut io, &mut buf, 5).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn no_duplicate_slots_for_same_track() {
        let mut io = opened_io(64 * 512);
        let mut cache = TrackCache::new(9, 64, 0);
        let mut buf = [0u8; 512];
        cache.read(&mut io, &mut buf, 0).unwrap();
        cache.read(&mut io, &mut buf, 1).unwrap();
        let count = cache
            .slots
            .iter()
            .filter(|s| s.track.as_ref().is_some_and(|t| t.index == 0))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn eviction_saves_dirty_victim_before_reuse() {
        // block_count covers CAPACITY + 1 tracks so the (CAPACITY+1)-th
        // access must evict.
        let blocks = (CAPACITY as u32 + 1) * SECTORS_PER_TRACK;
        let mut io = opened_io(blocks as usize * 512);
        let mut cache = TrackCache::new(9, blocks, 0);

        cache.write(&mut io, &[0x99u8; 512], 0).unwrap();
        for t in 1..CAPACITY as u32 {
            let mut buf = [0u8; 512];
            cache.read(&mut io, &mut buf, t * SECTORS_PER_TRACK).unwrap();
        }
        // one more distinct track forces eviction of the oldest (track 0)
        let mut buf = [0u8; 512];
        cache
            .read(&mut io, &mut buf, CAPACITY as u32 * SECTORS_PER_TRACK)
            .unwrap();

        // track 0's dirty sector 0 must now be durable on disk
        let mut verify = [0u8; 512];
        io.seek(0).unwrap();
        io.read(&mut verify).unwrap();
        assert_eq!(verify, [0x99u8; 512]);
    }

    #[test]
    fn set_raw_requires_2048_byte_user_sectors() {
        let mut cache = TrackCache::new(9, 64, 0);
        assert!(cache.set_raw(true).is_err());
        let mut cd_cache = TrackCache::new(11, 64, 0);
        assert!(cd_cache.set_raw(true).is_ok());
    }

    #[test]
    fn clear_releases_without_saving() {
        let mut io = opened_io(64 * 512);
        let mut cache = TrackCache::new(9, 64, 0);
        cache.write(&mut io, &[0xAAu8; 512], 0).unwrap();
        cache.clear();
        let mut verify = [0u8; 512];
        io.seek(0).unwrap();
        io.read(&mut verify).unwrap();
        assert_eq!(verify, [0u8; 512]);
    }
}
