//! Disk-image layer (§4.3): media-specific openers that determine sector
//! size, block count, and image offset from a backing file, plus the
//! per-variant INQUIRY and MODE-page augmentation hooks described in §9.

use crate::error::DiskError;
use crate::fileio::FileIo;

/// Four-byte media-kind signature (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Null,
    SasiHd,
    ScsiHd,
    ScsiHdNec,
    ScsiHdApple,
    Mo,
    Cd,
    Bridge,
}

impl MediaKind {
    pub fn tag(&self) -> &'static [u8; 4] {
        match self {
            MediaKind::Null => b"NULL",
            MediaKind::SasiHd => b"SAHD",
            MediaKind::ScsiHd | MediaKind::ScsiHdNec | MediaKind::ScsiHdApple => b"SCHD",
            MediaKind::Mo => b"SCMO",
            MediaKind::Cd => b"SCCD",
            MediaKind::Bridge => b"SCBR",
        }
    }

    pub fn removable(&self) -> bool {
        matches!(self, MediaKind::Mo | MediaKind::Cd)
    }

    pub fn is_sasi(&self) -> bool {
        matches!(self, MediaKind::SasiHd)
    }
}

/// Geometry derived at attach time by an `Open` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub sector_size_exp: u8,
    pub block_count: u32,
    pub image_offset: u64,
    pub raw: bool,
}

const MIB: u64 = 1024 * 1024;
const SASI_MIN_SIZE: u64 = 10 * MIB;
const SASI_T98NEXT_SIZE: u64 = 22_437_888;
const SCSI_MIN_SIZE: u64 = 10 * MIB;
const SCSI_MAX_SIZE: u64 = 2 * 1024 * 1024 * MIB; // 2 TiB
const CD_MAX_ISO_SIZE: u64 = 700 * MIB;
const RAW_SYNC: [u8; 12] = [0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00];

pub fn open_sasi_hd(file_size: u64) -> Result<DiskGeometry, DiskError> {
    if file_size == SASI_T98NEXT_SIZE {
        return Ok(DiskGeometry {
            sector_size_exp: 10,
            block_count: (file_size / 1024) as u32,
            image_offset: 0,
            raw: false,
        });
    }
    if file_size % 256 != 0 || file_size < SASI_MIN_SIZE {
        return Err(DiskError::BadGeometry { kind: "SASI HD", size: file_size });
    }
    Ok(DiskGeometry {
        sector_size_exp: 8,
        block_count: (file_size / 256) as u32,
        image_offset: 0,
        raw: false,
    })
}

pub fn open_scsi_hd_generic(file_size: u64) -> Result<DiskGeometry, DiskError> {
    if file_size % 512 != 0 || file_size < SCSI_MIN_SIZE || file_size > SCSI_MAX_SIZE {
        return Err(DiskError::BadGeometry { kind: "SCSI HD", size: file_size });
    }
    Ok(DiskGeometry {
        sector_size_exp: 9,
        block_count: (file_size / 512) as u32,
        image_offset: 0,
        raw: false,
    })
}

/// NEC variants: `.hdn` (plain 512-byte, no header), `.hdi` (Anex86,
/// 4-byte little-endian header fields), `.nhd` (T98Next, 15-byte magic
/// `T98HDDIMAGE.R0\0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NecVariant {
    Hdn,
    Hdi,
    Nhd,
}

pub fn open_scsi_hd_nec(
    variant: NecVariant,
    header: &[u8],
    file_size: u64,
) -> Result<DiskGeometry, DiskError> {
    let (sector_size, image_offset, image_size) = match variant {
        NecVariant::Hdn => (512u32, 0u64, file_size),
        NecVariant::Hdi => {
            if header.len() < 0x18 {
                return Err(DiskError::BadGeometry { kind: "HDI", size: file_size });
            }
            let offset = u32::from_le_bytes(header[4..8].try_into().unwrap()) as u64;
            let size = u32::from_le_bytes(header[8..12].try_into().unwrap()) as u64;
            let sector_size = u32::from_le_bytes(header[0x10..0x14].try_into().unwrap());
            (sector_size, offset, size)
        }
        NecVariant::Nhd => {
            const MAGIC: &[u8; 15] = b"T98HDDIMAGE.R0\0";
            if header.len() < 0x24 || &header[0..15] != MAGIC {
                return Err(DiskError::BadGeometry { kind: "NHD", size: file_size });
            }
            // Header layout (little-endian, relative to file start):
            // 0x10 headersize(u32), 0x20 sector bytes(u32).
            let header_size = u32::from_le_bytes(header[0x10..0x14].try_into().unwrap());
            let sector_size = u32::from_le_bytes(header[0x20..0x24].try_into().unwrap());
            (sector_size, header_size as u64, file_size.saturating_sub(header_size as u64))
        }
    };

    if !matches!(sector_size, 256 | 512) {
        return Err(DiskError::BadGeometry { kind: "NEC HD", size: file_size });
    }
    if image_offset + image_size > file_size {
        return Err(DiskError::OffsetOutOfRange { offset: image_offset, file_size });
    }
    if image_size % sector_size as u64 != 0 {
        return Err(DiskError::BadGeometry { kind: "NEC HD", size: file_size });
    }

    let sector_size_exp = if sector_size == 256 { 8 } else { 9 };
    Ok(DiskGeometry {
        sector_size_exp,
        block_count: (image_size / sector_size as u64) as u32,
        image_offset,
        raw: false,
    })
}

pub fn open_scsi_hd_apple(file_size: u64) -> Result<DiskGeometry, DiskError> {
    open_scsi_hd_generic(file_size)
}

pub fn open_mo(file_size: u64) -> Result<DiskGeometry, DiskError> {
    let (sector_size_exp, block_count) = match file_size {
        s if s == 128 * MIB => (9u8, 248_826u32),
        s if s == 230 * MIB => (9, 446_325),
        s if s == 540 * MIB => (9, 1_041_500),
        s if s == 640 * MIB => (11, 310_352),
        _ => return Err(DiskError::BadGeometry { kind: "MO", size: file_size }),
    };
    Ok(DiskGeometry {
        sector_size_exp,
        block_count,
        image_offset: 0,
        raw: false,
    })
}

pub fn open_cd(first_12_bytes: &[u8; 12], file_size: u64) -> Result<DiskGeometry, DiskError> {
    if first_12_bytes == &RAW_SYNC {
        if file_size % 2352 != 0 {
            return Err(DiskError::BadGeometry { kind: "RAW CD", size: file_size });
        }
        return Ok(DiskGeometry {
            sector_size_exp: 11,
            block_count: (file_size / 2352) as u32,
            image_offset: 0,
            raw: true,
        });
    }

    if file_size % 2048 != 0 || file_size > CD_MAX_ISO_SIZE {
        return Err(DiskError::BadGeometry { kind: "ISO CD", size: file_size });
    }
    Ok(DiskGeometry {
        sector_size_exp: 11,
        block_count: (file_size / 2048) as u32,
        image_offset: 0,
        raw: false,
    })
}

/// CUE sheets are recognized but parsing them is intentionally left a
/// stub (§9 "Raw vs. file-backed CD tracks").
pub fn open_cue(_contents: &str) -> Result<DiskGeometry, DiskError> {
    Err(DiskError::Unsupported)
}

/// Reads the first 12 bytes of a just-opened file to discriminate RAW
/// from ISO CD images without yet knowing the geometry.
pub fn peek_cd_sync(io: &mut dyn FileIo) -> Result<[u8; 12], DiskError> {
    io.seek(0)?;
    let mut buf = [0u8; 12];
    io.read(&mut buf)?;
    Ok(buf)
}

/// 36-byte standard INQUIRY response for disk-class devices (§4.3).
pub struct InquiryData {
    pub device_type: u8,
    pub removable: bool,
    pub vendor: &'static [u8; 8],
    pub product: &'static str,
    pub ansi_version: u8,
    pub extended: bool,
}

impl MediaKind {
    pub fn inquiry(&self) -> InquiryData {
        match self {
            MediaKind::SasiHd => InquiryData {
                device_type: 0x00,
                removable: false,
                vendor: b"RASCSI  ",
                product: "SASI HD",
                ansi_version: 1,
                extended: false,
            },
            MediaKind::ScsiHdNec => InquiryData {
                device_type: 0x00,
                removable: false,
                vendor: b"NEC     ",
                product: "HD NEC",
                ansi_version: 1,
                extended: true,
            },
            MediaKind::ScsiHdApple => InquiryData {
                device_type: 0x00,
                removable: false,
                vendor: b"SEAGATE ",
                product: "ST225N",
                ansi_version: 2,
                extended: true,
            },
            MediaKind::Mo => InquiryData {
                device_type: 0x07,
                removable: true,
                vendor: b"RASCSI  ",
                product: "MO",
                ansi_version: 2,
                extended: true,
            },
            MediaKind::Cd => InquiryData {
                device_type: 0x05,
                removable: true,
                vendor: b"RASCSI  ",
                product: "CD-ROM",
                ansi_version: 2,
                extended: true,
            },
            MediaKind::Bridge => InquiryData {
                device_type: 0x03,
                removable: false,
                vendor: b"RASCSI  ",
                product: "BRIDGE",
                ansi_version: 2,
                extended: true,
            },
            MediaKind::ScsiHd | MediaKind::Null => InquiryData {
                device_type: 0x00,
                removable: false,
                vendor: b"RASCSI  ",
                product: "PRODRIVE LPS",
                ansi_version: 2,
                extended: true,
            },
        }
    }

    /// Builds the full 36-byte response (or short-form for SASI).
    pub fn inquiry_bytes(&self, capacity_mib: u64, build_revision: &str) -> Vec<u8> {
        let info = self.inquiry();
        if !info.extended {
            let mut buf = vec![0u8; 36];
            buf[0] = info.device_type;
            buf[1] = if info.removable { 0x80 } else { 0 };
            buf[2] = info.ansi_version;
            buf[4] = 31;
            fill_padded(&mut buf[8..16], info.vendor);
            let product = format!("{}  {}MB", info.product, capacity_mib);
            fill_padded(&mut buf[16..32], product.as_bytes());
            fill_padded(&mut buf[32..36], build_revision.as_bytes());
            return buf;
        }

        let mut buf = vec![0u8; 36];
        buf[0] = info.device_type;
        buf[1] = if info.removable { 0x80 } else { 0 };
        buf[2] = info.ansi_version;
        buf[3] = 0x02;
        buf[4] = 31;
        fill_padded(&mut buf[8..16], info.vendor);
        let product = format!("{}  {}MB", info.product, capacity_mib);
        fill_padded(&mut buf[16..32], product.as_bytes());
        fill_padded(&mut buf[32..36], build_revision.as_bytes());
        buf
    }
}

fn fill_padded(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    for b in dst[n..].iter_mut() {
        *b = b' ';
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sasi_hd_accepts_floor_and_rejects_one_byte_below() {
        assert!(open_sasi_hd(10 * MIB).is_ok());
        assert!(open_sasi_hd(10 * MIB - 1).is_err());
    }

    #[test]
    fn sasi_hd_t98next_special_case() {
        let geom = open_sasi_hd(SASI_T98NEXT_SIZE).unwrap();
        assert_eq!(geom.sector_size_exp, 10);
        assert_eq!(geom.block_count, (SASI_T98NEXT_SIZE / 1024) as u32);
    }

    #[test]
    fn scsi_hd_rejects_non_512_multiple() {
        assert!(open_scsi_hd_generic(10 * MIB + 1).is_err());
    }

    #[test]
    fn mo_sizes_map_to_documented_geometry() {
        let geom = open_mo(230 * MIB).unwrap();
        assert_eq!(geom.sector_size_exp, 9);
        assert_eq!(geom.block_count, 446_325);
    }

    #[test]
    fn raw_cd_requires_multiple_of_2352() {
        assert!(open_cd(&RAW_SYNC, 2352 * 10 + 1).is_err());
        assert!(open_cd(&RAW_SYNC, 2352 * 10).is_ok());
    }

    #[test]
    fn iso_cd_uses_2048_byte_sectors() {
        let not_raw = [0u8; 12];
        let geom = open_cd(&not_raw, 2048 * 10).unwrap();
        assert_eq!(geom.block_count, 10);
        assert!(!geom.raw);
    }

    #[test]
    fn inquiry_vendor_strings_are_media_specific() {
        let bytes = MediaKind::ScsiHd.inquiry_bytes(20, "0010");
        assert_eq!(bytes.len(), 36);
        assert_eq!(&bytes[8..16], b"RASCSI  ");
        assert!(bytes[16..28].starts_with(b"PRODRIVE LPS"));
    }

    #[test]
    fn nec_vendor_and_ansi_version_are_downgraded() {
        let info = MediaKind::ScsiHdNec.inquiry();
        assert_eq!(info.vendor, b"NEC     ");
        assert_eq!(info.ansi_version, 1);
    }
}
