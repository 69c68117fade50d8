//! # Disc Image Module
//!
//! Disc images are represented by objects implementing the `SectorDecoder` trait.
//! The object type is named for the container type that it handles, e.g., `Cci`.
//!
//! ## Basic Functions
//!
//! The trait includes counting and reading logical sectors.  Every sector is 2048 bytes.
//! It is agnostic as to the specific manner in which the sectors are stored:
//! a raw dump, a scattered set of data files, or an indexed sequence of compressed blocks.
//!
//! ## Relation to File Systems
//!
//! The `SectorDecoder` trait object serves as the underlying storage for the `fs` module.
//! The task of mapping logical sectors to byte positions happens in submodules of `img`,
//! never with any help from `fs`.  The `fs` module runs heuristics on the magic sector
//! candidates when a decoder is first connected.  If these fail the container is refused.
//!
//! ## Concurrency
//!
//! Decoders own their file handles behind a mutex, so `read_sector` takes `&self`
//! and concurrent reads of one decoder are serialized around the seek and read.
//!
//! ## Split Volumes
//!
//! Outputs that are split across several files are named `name.1.ext`, `name.2.ext`, and so on.
//! Raw and compressed decoders will pick up all the parts when given the first one.

pub mod iso;
pub mod god;
pub mod cci;

use std::fmt;
use std::str::FromStr;
use std::path::{Path,PathBuf};
use log::debug;
use crate::DYNERR;

/// Bytes in every logical sector
pub const SECTOR_SIZE: usize = 2048;

/// One logical sector of payload
pub type Sector = [u8;SECTOR_SIZE];

/// Enumerates disc image errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("unknown image type")]
    UnknownImageType,
    #[error("image type not compatible with request")]
    ImageTypeMismatch,
    #[error("unable to access sector")]
    SectorAccess,
    #[error("short read while accessing sector")]
    ShortRead,
    #[error("compressed block could not be decoded")]
    BlockDecode,
    #[error("data file is missing")]
    MissingDataFile,
    #[error("image size did not match the request")]
    ImageSizeMismatch
}

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum DiskImageType {
    /// raw sector dump
    ISO,
    /// scattered multi-file container
    GOD,
    /// indexed container with compressed sectors
    CCI
}

impl FromStr for DiskImageType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "iso" => Ok(Self::ISO),
            "xiso" => Ok(Self::ISO),
            "god" => Ok(Self::GOD),
            "cci" => Ok(Self::CCI),
            _ => Err(Error::UnknownImageType)
        }
    }
}

impl fmt::Display for DiskImageType {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ISO => write!(f,"iso"),
            Self::GOD => write!(f,"god"),
            Self::CCI => write!(f,"cci")
        }
    }
}

/// The main trait for working with any kind of disc container.
/// The corresponding trait object serves as storage for the file system.
pub trait SectorDecoder: Send + Sync {
    /// Count of logical sectors, including any leading sectors that are not backed by data
    fn total_sectors(&self) -> u32;
    /// Read one logical sector; fails on short reads or corrupt blocks
    fn read_sector(&self,index: u32) -> Result<Sector,DYNERR>;
    fn what_am_i(&self) -> DiskImageType;
    fn file_extensions(&self) -> Vec<String>;
    /// Read `count` consecutive sectors into one buffer
    fn read_sectors(&self,start: u32,count: u32) -> Result<Vec<u8>,DYNERR> {
        let mut ans: Vec<u8> = Vec::with_capacity(count as usize * SECTOR_SIZE);
        for i in start..start+count {
            ans.extend_from_slice(&self.read_sector(i)?);
        }
        Ok(ans)
    }
}

/// Number of sectors needed to hold `bytes`
pub fn sectors_for(bytes: u64) -> u64 {
    (bytes + SECTOR_SIZE as u64 - 1) / SECTOR_SIZE as u64
}

/// If a data source is smaller than a sector, pad it with `fill`.
/// If it is larger, do not include the extra bytes.
pub fn quantize_sector(src: &[u8],fill: u8) -> Sector {
    let mut padded: Sector = [fill;SECTOR_SIZE];
    let end = usize::min(src.len(),SECTOR_SIZE);
    padded[0..end].copy_from_slice(&src[0..end]);
    padded
}

/// Path of part `n` of a split volume, `name.ext` becomes `name.n.ext`.
pub fn part_path(path: &Path,n: usize) -> PathBuf {
    let stem = match path.file_stem() {
        Some(s) => s.to_string_lossy().to_string(),
        None => "".to_string()
    };
    let fname = match path.extension() {
        Some(ext) => format!("{}.{}.{}",stem,n,ext.to_string_lossy()),
        None => format!("{}.{}",stem,n)
    };
    path.with_file_name(fname)
}

/// Gather the parts of a split volume.  If `path` is not part 1 of a
/// numbered sequence, the list contains only `path`.
pub fn volume_parts(path: &Path) -> Vec<PathBuf> {
    let stem = match path.file_stem() {
        Some(s) => s.to_string_lossy().to_string(),
        None => return vec![path.to_path_buf()]
    };
    let base = match stem.strip_suffix(".1") {
        Some(b) => b.to_string(),
        None => return vec![path.to_path_buf()]
    };
    let unsplit = match path.extension() {
        Some(ext) => path.with_file_name(format!("{}.{}",base,ext.to_string_lossy())),
        None => path.with_file_name(base)
    };
    let mut ans = Vec::new();
    let mut n = 1;
    loop {
        let part = part_path(&unsplit,n);
        if !part.is_file() {
            break;
        }
        ans.push(part);
        n += 1;
    }
    if ans.len()==0 {
        ans.push(path.to_path_buf());
    }
    debug!("volume has {} part(s)",ans.len());
    ans
}

#[test]
fn test_part_names() {
    let p = Path::new("/tmp/out/game.iso");
    assert_eq!(part_path(p,1),PathBuf::from("/tmp/out/game.1.iso"));
    assert_eq!(part_path(p,12),PathBuf::from("/tmp/out/game.12.iso"));
    assert_eq!(part_path(Path::new("plain"),2),PathBuf::from("plain.2"));
}

#[test]
fn test_quantize() {
    let s = quantize_sector(&[1,2,3],0xff);
    assert_eq!(s[0..3],[1,2,3]);
    assert!(s[3..].iter().all(|b| *b==0xff));
    assert_eq!(sectors_for(0),0);
    assert_eq!(sectors_for(1),1);
    assert_eq!(sectors_for(2048),1);
    assert_eq!(sectors_for(2049),2);
}
