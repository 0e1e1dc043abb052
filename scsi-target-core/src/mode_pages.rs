//! MODE SENSE / MODE SELECT page machinery (§4.4).

use crate::image::MediaKind;
use crate::sense::SenseCode;

/// Page codes this target understands, in the order §8's "boundaries"
/// property requires them to be emitted for page 0x3F.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModePage {
    ErrorRecovery = 0x01,
    FormatDevice = 0x03,
    DriveParameter = 0x04,
    Optical = 0x06,
    Caching = 0x08,
    CdRom = 0x0d,
    CdDa = 0x0e,
    VendorMo = 0x20,
    VendorApple = 0x30,
}

/// Pages a given media kind supports, in emission order.
pub fn supported_pages(kind: MediaKind) -> Vec<ModePage> {
    let mut pages = vec![ModePage::ErrorRecovery, ModePage::FormatDevice, ModePage::DriveParameter];
    if kind == MediaKind::Mo {
        pages.push(ModePage::Optical);
    }
    pages.push(ModePage::Caching);
    if kind == MediaKind::Cd {
        pages.push(ModePage::CdRom);
        pages.push(ModePage::CdDa);
    }
    match kind {
        MediaKind::Mo => pages.push(ModePage::VendorMo),
        MediaKind::ScsiHdApple => pages.push(ModePage::VendorApple),
        _ => {}
    }
    pages
}

pub struct ModeSenseParams {
    pub kind: MediaKind,
    pub block_count: u32,
    pub block_size: u32,
    pub write_protected: bool,
    pub removable: bool,
    /// `true` for the 10-byte variant's header/block-descriptor shape.
    pub long_header: bool,
    pub dbd: bool,
    pub page_code: u8,
    pub changeable: bool,
}

/// MO vendor page (0x20) user/spare band table, indexed by total capacity.
fn mo_vendor_bands(block_count: u32) -> (u32, u16, u16) {
    match block_count {
        248_826 => (248_826, 1025, 10),
        446_325 => (446_325, 1025, 10),
        1_041_500 => (1_041_500, 1025, 10),
        310_352 => (310_352, 1025, 10),
        _ => (block_count, 1025, 10),
    }
}

fn page_body(page: ModePage, p: &ModeSenseParams) -> Vec<u8> {
    match page {
        ModePage::ErrorRecovery => {
            let mut b = vec![0u8; 10];
            if !p.changeable {
                b[0] = 1; // retry count
            }
            prefixed(0x01, &b)
        }
        ModePage::FormatDevice => {
            let mut b = vec![0u8; 22];
            if p.changeable {
                return prefixed(0x03, &vec![0u8; 22]);
            }
            b[2..4].copy_from_slice(&8u16.to_be_bytes()); // tracks/zone
            b[10..12].copy_from_slice(&25u16.to_be_bytes()); // sectors/track
            b[12..14].copy_from_slice(&(p.block_size as u16).to_be_bytes());
            if p.removable {
                b[20] = 0x20;
            }
            prefixed(0x03, &b)
        }
        ModePage::DriveParameter => {
            let mut b = vec![0u8; 22];
            if p.changeable {
                return prefixed(0x04, &vec![0u8; 22]);
            }
            let cylinders = p.block_count / (8 * 25);
            b[0..3].copy_from_slice(&cylinders.to_be_bytes()[1..4]);
            b[3] = 8; // heads
            prefixed(0x04, &b)
        }
        ModePage::Optical => prefixed(0x06, &[0u8; 2]),
        ModePage::Caching => {
            let mut b = vec![0u8; 10];
            if !p.changeable {
                b[0] = 0x01; // read cache enabled, no write cache
            }
            prefixed(0x08, &b)
        }
        ModePage::CdRom => {
            let mut b = vec![0u8; 6];
            if !p.changeable {
                b[1] = 2; // inactivity timer: 2 seconds
                b[2..4].copy_from_slice(&60u16.to_be_bytes());
                b[4..6].copy_from_slice(&75u16.to_be_bytes());
            }
            prefixed(0x0d, &b)
        }
        ModePage::CdDa => prefixed(0x0e, &vec![0u8; 14]),
        ModePage::VendorMo => {
            let mut b = vec![0u8; 10];
            if !p.changeable {
                let (bands, spare, alt) = mo_vendor_bands(p.block_count);
                b[2..6].copy_from_slice(&bands.to_be_bytes());
                b[6..8].copy_from_slice(&spare.to_be_bytes());
                b[8..10].copy_from_slice(&alt.to_be_bytes());
            }
            prefixed(0x20, &b)
        }
        ModePage::VendorApple => {
            let mut b = vec![0u8; 28];
            if !p.changeable {
                let s = b"APPLE COMPUTER, INC.";
                b[..s.len()].copy_from_slice(s);
            }
            prefixed(0x30, &b)
        }
    }
}

fn prefixed(code: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    out.push(code);
    out.push(body.len() as u8);
    out.extend_from_slice(body);
    out
}

/// Builds a full MODE SENSE response.
pub fn mode_sense(p: &ModeSenseParams) -> Result<Vec<u8>, SenseCode> {
    let mut pages_body = Vec::new();

    if p.page_code == 0x3f {
        for page in supported_pages(p.kind) {
            pages_body.extend(page_body(page, p));
        }
    } else {
        let page = supported_pages(p.kind)
            .into_iter()
            .find(|pg| *pg as u8 == p.page_code)
            .ok_or(SenseCode::invalid_cdb())?;
        pages_body.extend(page_body(page, p));
    }

    let block_descriptor: Vec<u8> = if p.dbd {
        Vec::new()
    } else {
        let mut bd = vec![0u8; 8];
        bd[0..4].copy_from_slice(&p.block_count.to_be_bytes());
        bd[5..8].copy_from_slice(&p.block_size.to_be_bytes()[1..4]);
        bd
    };

    let device_specific = if p.write_protected { 0x80u8 } else { 0 };

    let mut out = Vec::new();
    if p.long_header {
        out.extend_from_slice(&[0, 0]); // mode data length, filled below
        out.push(0); // medium type
        out.push(device_specific);
        out.extend_from_slice(&[0, 0]); // reserved
        out.extend_from_slice(&(block_descriptor.len() as u16).to_be_bytes());
        out.extend_from_slice(&block_descriptor);
        out.extend_from_slice(&pages_body);
        let len = (out.len() - 2) as u16;
        out[0..2].copy_from_slice(&len.to_be_bytes());
    } else {
        out.push(0); // length, filled below
        out.push(0); // medium type
        out.push(device_specific);
        out.push(block_descriptor.len() as u8);
        out.extend_from_slice(&block_descriptor);
        out.extend_from_slice(&pages_body);
        out[0] = (out.len() - 1) as u8;
    }

    Ok(out)
}

/// Validates a MODE SELECT parameter list. Any attempt to change sector
/// size is rejected with invalid parameter (§4.4).
pub fn mode_select(
    data: &[u8],
    current_block_size: u32,
    long_header: bool,
) -> Result<(), SenseCode> {
    let header_len = if long_header { 8 } else { 4 };
    if data.len() < header_len {
        return Err(SenseCode::parameter_length_error());
    }

    let bd_len = if long_header {
        u16::from_be_bytes([data[6], data[7]]) as usize
    } else {
        data[3] as usize
    };

    if bd_len >= 8 {
        let bd = &data[header_len..header_len + bd_len];
        let block_size = u32::from_be_bytes([0, bd[5], bd[6], bd[7]]);
        if block_size != 0 && block_size != current_block_size {
            return Err(SenseCode::invalid_parameter());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(kind: MediaKind, page_code: u8) -> ModeSenseParams {
        ModeSenseParams {
            kind,
            block_count: 446_325,
            block_size: 512,
            write_protected: false,
            removable: kind.removable(),
            long_header: false,
            dbd: false,
            page_code,
            changeable: false,
        }
    }

    #[test]
    fn page_3f_concatenates_supported_pages_in_order() {
        let p = params(MediaKind::Mo, 0x3f);
        let resp = mode_sense(&p).unwrap();
        // header(4) + block descriptor(8) = 12 bytes before pages
        assert_eq!(resp[12], 0x01);
        let next = 12 + 2 + 10;
        assert_eq!(resp[next], 0x03);
    }

    #[test]
    fn unknown_page_is_invalid_cdb() {
        let p = params(MediaKind::ScsiHd, 0x99);
        assert!(mode_sense(&p).is_err());
    }

    #[test]
    fn mo_vendor_page_reports_block_count_and_band_table() {
        let p = params(MediaKind::Mo, 0x20);
        let resp = mode_sense(&p).unwrap();
        let page_start = resp.len() - 10;
        assert_eq!(&resp[page_start..page_start + 4], &446_325u32.to_be_bytes());
        assert_eq!(
            u16::from_be_bytes([resp[page_start + 4], resp[page_start + 5]]),
            1025
        );
        assert_eq!(
            u16::from_be_bytes([resp[page_start + 6], resp[page_start + 7]]),
            10
        );
    }

    #[test]
    fn block_descriptor_carries_count_and_length() {
        let p = params(MediaKind::Mo, 0x3f);
        let resp = mode_sense(&p).unwrap();
        assert_eq!(&resp[4..8], &446_325u32.to_be_bytes());
        assert_eq!(resp[8], 0); // reserved block-descriptor byte
        assert_eq!(&resp[9..12], &512u32.to_be_bytes()[1..4]); // 512 = 0x000200
    }

    #[test]
    fn mode_select_rejects_sector_size_change() {
        let mut data = vec![0u8; 12];
        data[3] = 8;
        data[9..12].copy_from_slice(&1024u32.to_be_bytes()[1..4]);
        assert!(mode_select(&data, 512, false).is_err());
    }

    #[test]
    fn mode_select_accepts_matching_sector_size() {
        let mut data = vec![0u8; 12];
        data[3] = 8;
        data[9..12].copy_from_slice(&512u32.to_be_bytes()[1..4]);
        assert!(mode_select(&data, 512, false).is_ok());
    }
}
