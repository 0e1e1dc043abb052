//! Sense code representation and the fixed set of conditions a logical
//! unit can latch.
//!
//! A sense code is a packed 32-bit value `(reserved:8, sense_key:8, asc:8,
//! ascq:8)`. Zero means "no error". See SCSI-2 §8.2.14 for the general
//! shape of the extended sense data this is built from.

use bitfield_struct::bitfield;

/// SCSI sense key, upper nibble of byte 2 of extended sense data.
#[repr(u8)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenseKey {
    #[default]
    NoSense = 0x00,
    RecoveredError = 0x01,
    NotReady = 0x02,
    MediumError = 0x03,
    HardwareError = 0x04,
    IllegalRequest = 0x05,
    UnitAttention = 0x06,
    DataProtect = 0x07,
    BlankCheck = 0x08,
    Aborted = 0x0b,
    VolumeOverflow = 0x0d,
    Miscompare = 0x0e,
}

/// Additional Sense Code. Only the values this target actually emits are
/// named; anything else would come from a command this target never issues.
#[repr(u8)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenseAsc {
    #[default]
    NoAdditionalInfo = 0x00,
    WriteFault = 0x03,
    LogicalUnitNotReady = 0x04,
    UnrecoveredReadError = 0x11,
    DefectListNotFound = 0x1c,
    ParameterListLengthError = 0x1a,
    MiscompareDuringVerify = 0x1d,
    InvalidCommandOpcode = 0x20,
    LbaOutOfRange = 0x21,
    InvalidFieldInCdb = 0x24,
    LogicalUnitNotSupported = 0x25,
    InvalidFieldInParameterList = 0x26,
    WriteProtected = 0x27,
    NotReadyToReadyTransition = 0x28,
    PowerOnResetOrBusDeviceReset = 0x29,
    MediumRemovalPrevented = 0x53,
    SavingParametersNotSupported = 0x39,
}

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SenseCode {
    pub ascq: u8,
    pub asc: u8,
    pub sense_key: u8,
    pub reserved: u8,
}

impl SenseCode {
    pub const NONE: Self = Self(0);

    fn of(key: SenseKey, asc: SenseAsc, ascq: u8) -> Self {
        Self::new()
            .with_sense_key(key as u8)
            .with_asc(asc as u8)
            .with_ascq(ascq)
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn key(&self) -> Option<SenseKey> {
        num_traits::FromPrimitive::from_u8(self.sense_key())
    }

    pub fn device_reset() -> Self {
        Self::of(SenseKey::UnitAttention, SenseAsc::PowerOnResetOrBusDeviceReset, 0)
    }

    pub fn not_ready() -> Self {
        Self::of(SenseKey::NotReady, SenseAsc::LogicalUnitNotReady, 0)
    }

    pub fn attention() -> Self {
        Self::of(SenseKey::UnitAttention, SenseAsc::NotReadyToReadyTransition, 0)
    }

    pub fn medium_removal_prevented() -> Self {
        Self::of(SenseKey::IllegalRequest, SenseAsc::MediumRemovalPrevented, 0)
    }

    pub fn read_fault() -> Self {
        Self::of(SenseKey::MediumError, SenseAsc::UnrecoveredReadError, 0)
    }

    pub fn write_fault() -> Self {
        Self::of(SenseKey::MediumError, SenseAsc::WriteFault, 0)
    }

    pub fn write_protected() -> Self {
        Self::of(SenseKey::DataProtect, SenseAsc::WriteProtected, 0)
    }

    pub fn miscompare() -> Self {
        Self::of(SenseKey::Miscompare, SenseAsc::MiscompareDuringVerify, 0)
    }

    pub fn invalid_command() -> Self {
        Self::of(SenseKey::IllegalRequest, SenseAsc::InvalidCommandOpcode, 0)
    }

    pub fn invalid_lba() -> Self {
        Self::of(SenseKey::IllegalRequest, SenseAsc::LbaOutOfRange, 0)
    }

    pub fn invalid_cdb() -> Self {
        Self::of(SenseKey::IllegalRequest, SenseAsc::InvalidFieldInCdb, 0)
    }

    pub fn invalid_lun() -> Self {
        Self::of(SenseKey::IllegalRequest, SenseAsc::LogicalUnitNotSupported, 0)
    }

    pub fn invalid_parameter() -> Self {
        Self::of(SenseKey::IllegalRequest, SenseAsc::InvalidFieldInParameterList, 0)
    }

    pub fn parameter_length_error() -> Self {
        Self::of(SenseKey::IllegalRequest, SenseAsc::ParameterListLengthError, 0)
    }

    pub fn parameter_not_supported() -> Self {
        Self::of(SenseKey::IllegalRequest, SenseAsc::InvalidFieldInParameterList, 1)
    }

    pub fn parameter_save_not_supported() -> Self {
        Self::of(SenseKey::IllegalRequest, SenseAsc::SavingParametersNotSupported, 0)
    }

    pub fn defect_list_not_found() -> Self {
        Self::of(SenseKey::MediumError, SenseAsc::DefectListNotFound, 0)
    }

    /// Builds the 18-byte extended REQUEST SENSE payload (SCSI variant).
    pub fn to_extended_bytes(&self) -> [u8; 18] {
        let mut buf = [0u8; 18];
        buf[0] = 0x70;
        buf[2] = self.sense_key();
        buf[7] = 10;
        buf[12] = self.asc();
        buf[13] = self.ascq();
        buf
    }

    /// Builds the 4-byte non-extended REQUEST SENSE payload (SASI variant):
    /// LUN in the top three bits and sense key in the low five bits of
    /// byte 1, matching the `(lun<<5)|sense_key` packing
    /// `check_condition_status` uses for the status byte.
    pub fn to_sasi_bytes(&self, lun: u8) -> [u8; 4] {
        let mut buf = [0u8; 4];
        buf[1] = (lun << 5) | (self.sense_key() & 0x1f);
        buf
    }
}
