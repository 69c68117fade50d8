//! ## Volume descriptor and locator
//!
//! The volume descriptor occupies one sector at a fixed distance from the start of the
//! game partition.  Where the partition starts depends on the kind of disc, so the
//! locator probes a list of candidate positions and takes the first that carries
//! the magic string at both the head and the tail of the sector.

use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use chrono::NaiveDateTime;
use log::{debug,info,trace};
use crate::img::{SectorDecoder,SECTOR_SIZE};

pub const MAGIC: [u8;20] = *b"MICROSOFT*XBOX*MEDIA";
/// byte offset of the mirrored magic string
pub const TAIL_MAGIC_OFFSET: usize = SECTOR_SIZE - MAGIC.len();
/// sector of the volume descriptor relative to the partition
pub const MAGIC_SECTOR: u32 = 0x20;

/// seconds between 1601-01-01 and 1970-01-01
const FILETIME_EPOCH_SECS: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SEC: u64 = 10_000_000;

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum VolumeKind {
    XGD1,
    XGD2,
    XGD3,
    /// partition starts at sector 0, i.e., the video partition was stripped
    Stripped
}

impl std::fmt::Display for VolumeKind {
    fn fmt(&self,f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::XGD1 => write!(f,"XGD1"),
            Self::XGD2 => write!(f,"XGD2"),
            Self::XGD3 => write!(f,"XGD3"),
            Self::Stripped => write!(f,"stripped")
        }
    }
}

/// Absolute magic sector candidates, probed in this order.
pub const CANDIDATES: [(u32,VolumeKind);4] = [
    (0x30620,VolumeKind::XGD1),
    (0x1fb40,VolumeKind::XGD2),
    (0x4120,VolumeKind::XGD3),
    (MAGIC_SECTOR,VolumeKind::Stripped)
];

// all numbers are LE
#[derive(DiskStruct)]
pub struct VolumeDescriptor {
    magic: [u8;20],
    root_sector: [u8;4],
    root_size: [u8;4],
    created: [u8;8],
    pad: [u8;1992],
    tail_magic: [u8;20]
}

impl VolumeDescriptor {
    pub fn create(root_sector: u32,root_size: u32,created: u64) -> Self {
        Self {
            magic: MAGIC,
            root_sector: u32::to_le_bytes(root_sector),
            root_size: u32::to_le_bytes(root_size),
            created: u64::to_le_bytes(created),
            pad: [0;1992],
            tail_magic: MAGIC
        }
    }
    pub fn verify(&self) -> bool {
        self.magic==MAGIC && self.tail_magic==MAGIC
    }
    pub fn root_sector(&self) -> u32 {
        u32::from_le_bytes(self.root_sector)
    }
    pub fn root_size(&self) -> u32 {
        u32::from_le_bytes(self.root_size)
    }
    pub fn created(&self) -> u64 {
        u64::from_le_bytes(self.created)
    }
}

/// Where the file system lives within the decoded sector range.
/// Directory and file sectors are relative to `base_sector`.
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct VolumeInfo {
    pub kind: VolumeKind,
    pub base_sector: u32,
    pub root_sector: u32,
    pub root_size: u32,
    /// creation time as a FILETIME
    pub created: u64
}

impl VolumeInfo {
    /// absolute sector of the volume descriptor
    pub fn magic_sector(&self) -> u32 {
        self.base_sector + MAGIC_SECTOR
    }
    pub fn created_datetime(&self) -> Option<NaiveDateTime> {
        filetime_to_datetime(self.created)
    }
}

/// Probe the candidate positions, returns None if the decoder holds no XDVDFS volume.
/// Read errors count as a failed probe.
pub fn locate(decoder: &dyn SectorDecoder) -> Option<VolumeInfo> {
    let total = decoder.total_sectors();
    for (candidate,kind) in CANDIDATES {
        if total <= candidate {
            trace!("image too small for {} candidate",kind);
            continue;
        }
        let sector = match decoder.read_sector(candidate) {
            Ok(s) => s,
            Err(e) => {
                debug!("could not read candidate {:X}: {}",candidate,e);
                continue;
            }
        };
        let desc = match VolumeDescriptor::from_bytes(&sector) {
            Ok(d) => d,
            Err(_) => continue
        };
        if desc.verify() {
            info!("identified {} volume, magic sector {:X}",kind,candidate);
            return Some(VolumeInfo {
                kind,
                base_sector: candidate - MAGIC_SECTOR,
                root_sector: desc.root_sector(),
                root_size: desc.root_size(),
                created: desc.created()
            });
        }
        debug!("no magic at candidate {:X}",candidate);
    }
    None
}

/// Convert a FILETIME (100 ns ticks since 1601) to a date and time,
/// None if it cannot be represented.
pub fn filetime_to_datetime(ft: u64) -> Option<NaiveDateTime> {
    let secs = (ft / FILETIME_TICKS_PER_SEC) as i64 - FILETIME_EPOCH_SECS;
    let nanos = (ft % FILETIME_TICKS_PER_SEC) as u32 * 100;
    chrono::DateTime::from_timestamp(secs,nanos).map(|dt| dt.naive_utc())
}

/// Convert a date and time to a FILETIME, times before 1601 become 0.
pub fn datetime_to_filetime(dt: NaiveDateTime) -> u64 {
    let utc = dt.and_utc();
    let secs = utc.timestamp() + FILETIME_EPOCH_SECS;
    if secs < 0 {
        return 0;
    }
    secs as u64 * FILETIME_TICKS_PER_SEC + utc.timestamp_subsec_nanos() as u64 / 100
}

#[test]
fn test_filetime() {
    let dt = chrono::NaiveDate::from_ymd_opt(2005,11,22).and_then(|d| d.and_hms_opt(12,30,15))
        .expect("bad date");
    let ft = datetime_to_filetime(dt);
    assert_eq!(filetime_to_datetime(ft),Some(dt));
    assert_eq!(filetime_to_datetime(116_444_736_000_000_000),chrono::DateTime::from_timestamp(0,0).map(|d| d.naive_utc()));
    assert_eq!(datetime_to_filetime(chrono::NaiveDate::from_ymd_opt(1500,1,1).and_then(|d| d.and_hms_opt(0,0,0)).expect("bad date")),0);
}

#[test]
fn test_descriptor_layout() {
    let desc = VolumeDescriptor::create(0x24,0x800,0x01c0_0000_0000_0000);
    let buf = desc.to_bytes();
    assert_eq!(buf.len(),SECTOR_SIZE);
    assert_eq!(buf[0..20],MAGIC);
    assert_eq!(buf[TAIL_MAGIC_OFFSET..],MAGIC);
    assert_eq!(buf[20..24],[0x24,0,0,0]);
    assert_eq!(buf[24..28],[0,8,0,0]);
    let back = VolumeDescriptor::from_bytes(&buf).expect("bad size");
    assert!(back.verify());
    assert_eq!(back.root_sector(),0x24);
    assert_eq!(back.created(),0x01c0_0000_0000_0000);
}
