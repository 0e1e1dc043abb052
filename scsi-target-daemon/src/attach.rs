//! Turns one configured image spec into an attached [`Disk`] (§6 attach
//! argument grammar, §4.3 media openers).

use std::path::PathBuf;

use thiserror::Error;

use scsi_target_core::cache::TrackCache;
use scsi_target_core::daemon::MessageRegistry;
use scsi_target_core::disk::Disk;
use scsi_target_core::fileio::{FileIo, MemFileIo, OpenMode, OsFileIo};
use scsi_target_core::image::{self, DiskGeometry, MediaKind, NecVariant};
use scsi_target_core::sense::SenseCode;
use scsi_target_core::{DiskError, FileIoError};

use crate::config::{ImageSpec, ImageType};

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("could not open image {path}: {source}")]
    Open { path: String, source: FileIoError },

    #[error(transparent)]
    Io(#[from] FileIoError),

    #[error(transparent)]
    Geometry(#[from] DiskError),

    #[error("image type {0:?} requires a path")]
    MissingPath(ImageType),
}

pub fn attach(spec: &ImageSpec) -> Result<Disk, AttachError> {
    match spec.image_type {
        ImageType::Bridge => Ok(bridge_disk(spec)),
        ImageType::Hdf => open_sized(spec, image::open_sasi_hd, MediaKind::SasiHd, false),
        ImageType::Hds => open_hds(spec),
        ImageType::Mo => open_sized(spec, image::open_mo, MediaKind::Mo, true),
        ImageType::Cd => open_cd(spec),
    }
}

fn open_err(path: &std::path::Path, source: FileIoError) -> AttachError {
    AttachError::Open { path: path.display().to_string(), source }
}

fn open_sized(
    spec: &ImageSpec,
    opener: fn(u64) -> Result<DiskGeometry, DiskError>,
    media: MediaKind,
    removable_override: bool,
) -> Result<Disk, AttachError> {
    let path = spec.path.as_ref().ok_or(AttachError::MissingPath(spec.image_type))?;
    let mut io = OsFileIo::new();
    io.open(path, OpenMode::ReadWrite).map_err(|e| open_err(path, e))?;
    let file_size = io.file_size().map_err(|e| open_err(path, e))?;
    let geometry = opener(file_size)?;
    Ok(build_disk(spec, Box::new(io), geometry, media, removable_override))
}

/// `.hds`/`.hda` are plain-headered SCSI geometries; `.hdn`/`.hdi`/`.nhd`
/// carry the NEC-family headers `open_scsi_hd_nec` needs to inspect.
fn open_hds(spec: &ImageSpec) -> Result<Disk, AttachError> {
    let path = spec.path.as_ref().ok_or(AttachError::MissingPath(spec.image_type))?;
    let mut io = OsFileIo::new();
    io.open(path, OpenMode::ReadWrite).map_err(|e| open_err(path, e))?;
    let file_size = io.file_size().map_err(|e| open_err(path, e))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let (geometry, media) = match ext.as_str() {
        "hda" => (image::open_scsi_hd_apple(file_size)?, MediaKind::ScsiHdApple),
        "hdn" => (image::open_scsi_hd_nec(NecVariant::Hdn, &[], file_size)?, MediaKind::ScsiHdNec),
        "hdi" => {
            let header = read_header(&mut io, 0x18)?;
            (image::open_scsi_hd_nec(NecVariant::Hdi, &header, file_size)?, MediaKind::ScsiHdNec)
        }
        "nhd" => {
            let header = read_header(&mut io, 0x24)?;
            (image::open_scsi_hd_nec(NecVariant::Nhd, &header, file_size)?, MediaKind::ScsiHdNec)
        }
        _ => (image::open_scsi_hd_generic(file_size)?, MediaKind::ScsiHd),
    };

    Ok(build_disk(spec, Box::new(io), geometry, media, false))
}

fn read_header(io: &mut OsFileIo, len: usize) -> Result<Vec<u8>, AttachError> {
    io.seek(0)?;
    let mut header = vec![0u8; len];
    io.read(&mut header)?;
    Ok(header)
}

fn open_cd(spec: &ImageSpec) -> Result<Disk, AttachError> {
    let path = spec.path.as_ref().ok_or(AttachError::MissingPath(spec.image_type))?;
    let mut io = OsFileIo::new();
    io.open(path, OpenMode::ReadOnly).map_err(|e| open_err(path, e))?;
    let sync = image::peek_cd_sync(&mut io)?;
    let file_size = io.file_size().map_err(|e| open_err(path, e))?;
    let geometry = image::open_cd(&sync, file_size)?;

    let mut disk = build_disk(spec, Box::new(io), geometry, MediaKind::Cd, true);
    disk.read_only = true;
    disk.cd_tracks = vec![scsi_target_core::disk::CdTrack {
        number: 1,
        first_lba: 0,
        last_lba: geometry.block_count.saturating_sub(1),
        audio: false,
        raw: geometry.raw,
    }];
    Ok(disk)
}

/// The host-bridge device has no backing image; its data path is the
/// registered GET/SEND MESSAGE handlers, not block I/O.
fn bridge_disk(spec: &ImageSpec) -> Disk {
    Disk {
        media: MediaKind::Bridge,
        ready: true,
        write_protected: false,
        read_only: true,
        removable: false,
        locked: false,
        attention_pending: true,
        reset_pending: false,
        sector_size_exp: 9,
        block_count: 0,
        lun: spec.lun,
        sense: SenseCode::NONE,
        io: Box::new(MemFileIo::from_bytes(Vec::new())),
        path: PathBuf::new(),
        image_offset: 0,
        cache: None,
        write_back: false,
        cd_tracks: Vec::new(),
        message_channel: Some(Box::new(MessageRegistry::new())),
    }
}

fn build_disk(
    spec: &ImageSpec,
    io: Box<dyn FileIo>,
    geometry: DiskGeometry,
    media: MediaKind,
    removable_override: bool,
) -> Disk {
    let mut cache = TrackCache::new(geometry.sector_size_exp, geometry.block_count, geometry.image_offset);
    let _ = cache.set_raw(geometry.raw);

    Disk {
        media,
        ready: true,
        write_protected: spec.write_protected,
        read_only: false,
        removable: media.removable() || removable_override,
        locked: false,
        attention_pending: true,
        reset_pending: false,
        sector_size_exp: geometry.sector_size_exp,
        block_count: geometry.block_count,
        lun: spec.lun,
        sense: SenseCode::NONE,
        io,
        path: spec.path.clone().unwrap_or_default(),
        image_offset: geometry.image_offset,
        cache: Some(cache),
        write_back: false,
        cd_tracks: Vec::new(),
        message_channel: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spec(image_type: ImageType, path: Option<std::path::PathBuf>) -> ImageSpec {
        ImageSpec { id: 0, lun: 0, image_type, path, write_protected: false }
    }

    #[test]
    fn bridge_needs_no_backing_file() {
        let disk = attach(&spec(ImageType::Bridge, None)).unwrap();
        assert_eq!(disk.media, MediaKind::Bridge);
        assert!(disk.message_channel.is_some());
    }

    #[test]
    fn missing_path_is_rejected_for_file_backed_types() {
        assert!(attach(&spec(ImageType::Hdf, None)).is_err());
    }

    #[test]
    fn hdf_image_is_opened_as_sasi_hd() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 10 * 1024 * 1024]).unwrap();
        let disk = attach(&spec(ImageType::Hdf, Some(file.path().to_path_buf()))).unwrap();
        assert_eq!(disk.media, MediaKind::SasiHd);
        assert_eq!(disk.sector_size_exp, 8);
    }

    #[test]
    fn iso_image_is_opened_as_read_only_cd() {
        let mut file = tempfile::Builder::new().suffix(".iso").tempfile().unwrap();
        file.write_all(&vec![0u8; 2048 * 10]).unwrap();
        let disk = attach(&spec(ImageType::Cd, Some(file.path().to_path_buf()))).unwrap();
        assert_eq!(disk.media, MediaKind::Cd);
        assert!(disk.read_only);
        assert_eq!(disk.cd_tracks.len(), 1);
        assert_eq!(disk.cd_tracks[0].last_lba, 9);
    }

    #[test]
    fn hds_generic_extension_uses_512_byte_sectors() {
        let mut file = tempfile::Builder::new().suffix(".hds").tempfile().unwrap();
        file.write_all(&vec![0u8; 10 * 1024 * 1024]).unwrap();
        let disk = attach(&spec(ImageType::Hds, Some(file.path().to_path_buf()))).unwrap();
        assert_eq!(disk.media, MediaKind::ScsiHd);
        assert_eq!(disk.sector_size_exp, 9);
    }
}
