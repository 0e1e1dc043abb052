//! SCSI/SASI target-device protocol engine and block-device emulation core.
//!
//! This crate contains the parts of a SCSI target emulator that do not
//! depend on any particular bus transport or host platform: the per-target
//! phase state machine, the logical-unit command surface, the disk-image
//! abstraction, and the track-level cache. The concrete GPIO bus driver
//! lives in `scsi-target-gpio`; the bootstrap/monitor process lives in
//! `scsi-target-daemon`.

#[macro_use]
extern crate num_derive;

pub mod bus;
pub mod cache;
pub mod controller;
pub mod daemon;
pub mod disk;
pub mod error;
pub mod fileio;
pub mod image;
pub mod mainloop;
pub mod mode_pages;
pub mod msf;
pub mod sense;
pub mod track;

pub use error::{ControllerError, DiskError, FileIoError};
pub use sense::{SenseAsc, SenseCode, SenseKey};
