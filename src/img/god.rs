//! ## Support for scattered "games on demand" containers (GOD)
//!
//! This container consists of a signed descriptor file plus a sibling directory
//! `<name>.data` holding `Data0000`, `Data0001`, etc.  The descriptor carries a metadata block
//! with the content type, the data file count, and a packed starting block and block count.
//! The descriptor is parsed with the `binrw` crate.
//!
//! The data files use a two tier layout: every file holds 0x14388 sectors,
//! grouped in blocks of 0x198 sectors, each block preceded by a 0x1000 byte hash table.
//! The two sectors holding the volume descriptor are stored at a fixed base address
//! in the first data file.  These constants are protocol values and must not be tuned.

use binrw::io::SeekFrom;
use binrw::BinRead;
use std::fs::File;
use std::io::{Read,Seek};
use std::path::{Path,PathBuf};
use std::sync::Mutex;
use log::{trace,debug,error};
use crate::img;
use crate::img::{Sector,SECTOR_SIZE};
use crate::DYNERR;

/// signatures of the descriptor, `CON `, `LIVE`, `PIRS`
pub const SIGNATURES: [[u8;4];3] = [*b"CON ",*b"LIVE",*b"PIRS"];
pub const CONTENT_TYPE_GAMES_ON_DEMAND: u32 = 0x7000;
pub const DESCRIPTOR_SIZE: u8 = 0x24;
pub const DESCRIPTOR_TYPE_SVOD: u32 = 1;
/// feature flag bit for the enhanced layout
pub const ENHANCED_LAYOUT: u8 = 0x40;

pub const SECTORS_PER_BLOCK: u64 = 0x198;
pub const SECTORS_PER_FILE: u64 = 0x14388;
const HASH_TABLE_BYTES: u64 = 0x1000;
const BASE_ADDRESS: u64 = 0x12000;
const BASE_ADDRESS_ENHANCED: u64 = 0x2000;
/// first of the two sectors that map through the base address
pub const HEADER_SECTOR: u32 = 0x20;

fn u24_le(b: [u8;3]) -> u32 {
    u32::from_le_bytes([b[0],b[1],b[2],0])
}

/// The parts of the signed descriptor this crate needs; all numbers are big endian
/// except the two packed 3 byte block fields.
#[derive(BinRead,Debug,Clone)]
#[br(big)]
#[br(assert(SIGNATURES.contains(&magic),"unknown descriptor signature {:?}",magic))]
pub struct ContentHeader {
    pub magic: [u8;4],
    #[br(seek_before = SeekFrom::Start(0x344))]
    pub content_type: u32,
    #[br(seek_before = SeekFrom::Start(0x379))]
    pub descriptor_size: u8,
    #[br(seek_before = SeekFrom::Start(0x391))]
    pub feature_flags: u8,
    #[br(map = |b: [u8;3]| u24_le(b))]
    pub block_count: u32,
    #[br(map = |b: [u8;3]| u24_le(b))]
    pub starting_block: u32,
    #[br(seek_before = SeekFrom::Start(0x39d))]
    pub data_file_count: u32,
    #[br(seek_before = SeekFrom::Start(0x3a9))]
    pub descriptor_type: u32
}

impl ContentHeader {
    /// fixed field sanity checks
    pub fn verify(&self) -> bool {
        let mut ans = true;
        if self.content_type!=CONTENT_TYPE_GAMES_ON_DEMAND {
            debug!("content type {:X} is not games on demand",self.content_type);
            ans = false;
        }
        if self.descriptor_size!=DESCRIPTOR_SIZE {
            debug!("invalid descriptor size {:X}",self.descriptor_size);
            ans = false;
        }
        if self.descriptor_type!=DESCRIPTOR_TYPE_SVOD {
            debug!("invalid descriptor type {}",self.descriptor_type);
            ans = false;
        }
        if self.data_file_count==0 {
            debug!("no data files declared");
            ans = false;
        }
        if self.block_count==0 {
            debug!("no data blocks declared");
            ans = false;
        }
        ans
    }
    pub fn is_enhanced(&self) -> bool {
        self.feature_flags & ENHANCED_LAYOUT > 0
    }
}

/// The data directory that goes with the descriptor at `path`
pub fn data_dir(path: &Path) -> PathBuf {
    let mut fname = match path.file_name() {
        Some(n) => n.to_os_string(),
        None => "".into()
    };
    fname.push(".data");
    path.with_file_name(fname)
}

/// Name of the data file with the given index
pub fn data_file_name(idx: u32) -> String {
    format!("Data{:04}",idx)
}

fn read_header(path: &Path) -> Result<ContentHeader,DYNERR> {
    let mut file = File::open(path)?;
    Ok(ContentHeader::read(&mut file)?)
}

/// Test a path for a GOD descriptor, never fails with an error.
pub fn is_god(path: &Path) -> bool {
    match read_header(path) {
        Ok(header) => header.verify() && data_dir(path).is_dir(),
        Err(e) => {
            debug!("not a GOD descriptor: {}",e);
            false
        }
    }
}

/// Wrapper for a GOD descriptor and its data files.
pub struct God {
    header: ContentHeader,
    files: Vec<Mutex<File>>,
    total: u32
}

impl God {
    pub fn open(path: &Path) -> Result<Self,DYNERR> {
        let header = read_header(path)?;
        if !header.verify() {
            return Err(Box::new(img::Error::ImageTypeMismatch));
        }
        let dir = data_dir(path);
        let mut files = Vec::new();
        for idx in 0..header.data_file_count {
            let data_path = dir.join(data_file_name(idx));
            match File::open(&data_path) {
                Ok(f) => files.push(Mutex::new(f)),
                Err(_) => {
                    error!("missing {}",data_path.display());
                    return Err(Box::new(img::Error::MissingDataFile));
                }
            }
        }
        let enhanced_adj = match header.is_enhanced() { true => 2, false => 0 };
        let total = u64::max(
            ((header.starting_block as u64 + header.block_count as u64) * 2).saturating_sub(enhanced_adj),
            HEADER_SECTOR as u64 + 2
        );
        debug!("GOD with {} data files, {} blocks from block {}, enhanced={}",
            header.data_file_count,header.block_count,header.starting_block,header.is_enhanced());
        Ok(Self {
            header,
            files,
            total: u32::try_from(total)?
        })
    }
    /// Translate a logical sector into (data file index, byte offset).
    /// Returns None for leading sectors that have no backing data.
    pub fn locate(&self,index: u32) -> Option<(u32,u64)> {
        if index==HEADER_SECTOR || index==HEADER_SECTOR+1 {
            let base = match self.header.is_enhanced() {
                true => BASE_ADDRESS_ENHANCED,
                false => BASE_ADDRESS
            };
            return Some((0,base + (index - HEADER_SECTOR) as u64 * SECTOR_SIZE as u64));
        }
        let enhanced_adj = match self.header.is_enhanced() { true => 2, false => 0 };
        let adjusted = index as i64 - self.header.starting_block as i64 * 2 + enhanced_adj;
        if adjusted < 0 {
            return None;
        }
        let adjusted = adjusted as u64;
        let mut file_index = (adjusted / SECTORS_PER_FILE) as u32;
        if file_index > self.header.data_file_count {
            file_index = 0;
        }
        let mut data_sector = adjusted % SECTORS_PER_FILE;
        let block = data_sector / SECTORS_PER_BLOCK;
        data_sector %= SECTORS_PER_BLOCK;
        let offset = (data_sector + block*SECTORS_PER_BLOCK) * SECTOR_SIZE as u64
            + HASH_TABLE_BYTES + block*HASH_TABLE_BYTES + HASH_TABLE_BYTES;
        Some((file_index,offset))
    }
    pub fn header(&self) -> &ContentHeader {
        &self.header
    }
}

impl img::SectorDecoder for God {
    fn total_sectors(&self) -> u32 {
        self.total
    }
    fn read_sector(&self,index: u32) -> Result<Sector,DYNERR> {
        let mut ans: Sector = [0;SECTOR_SIZE];
        let (file_index,offset) = match self.locate(index) {
            Some(loc) => loc,
            None => {
                trace!("sector {} has no backing data",index);
                return Ok(ans);
            }
        };
        trace!("read sector {} from {} at {:X}",index,data_file_name(file_index),offset);
        let mutex = match self.files.get(file_index as usize) {
            Some(f) => f,
            None => return Err(Box::new(img::Error::MissingDataFile))
        };
        let mut file = match mutex.lock() {
            Ok(f) => f,
            Err(_) => return Err(Box::new(img::Error::SectorAccess))
        };
        file.seek(SeekFrom::Start(offset))?;
        match file.read_exact(&mut ans) {
            Ok(()) => Ok(ans),
            Err(e) if e.kind()==std::io::ErrorKind::UnexpectedEof => Err(Box::new(img::Error::ShortRead)),
            Err(e) => Err(Box::new(e))
        }
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::GOD
    }
    fn file_extensions(&self) -> Vec<String> {
        vec![]
    }
}

#[cfg(test)]
fn test_header(enhanced: bool,starting_block: u32,block_count: u32,count: u32) -> Vec<u8> {
    let mut ans = vec![0u8;0x400];
    ans[0..4].copy_from_slice(b"LIVE");
    ans[0x344..0x348].copy_from_slice(&CONTENT_TYPE_GAMES_ON_DEMAND.to_be_bytes());
    ans[0x379] = DESCRIPTOR_SIZE;
    ans[0x391] = match enhanced { true => ENHANCED_LAYOUT, false => 0 };
    ans[0x392..0x395].copy_from_slice(&block_count.to_le_bytes()[0..3]);
    ans[0x395..0x398].copy_from_slice(&starting_block.to_le_bytes()[0..3]);
    ans[0x39d..0x3a1].copy_from_slice(&count.to_be_bytes());
    ans[0x3a9..0x3ad].copy_from_slice(&DESCRIPTOR_TYPE_SVOD.to_be_bytes());
    ans
}

#[test]
fn test_address_translation() {
    let mut file = std::io::Cursor::new(test_header(true,0,0x20,1));
    let header = ContentHeader::read(&mut file).expect("header did not parse");
    assert!(header.verify());
    assert!(header.is_enhanced());
    let god = God { header, files: vec![], total: 0x40 };
    assert_eq!(god.locate(3),Some((0,0x4800)));
    assert_eq!(god.locate(HEADER_SECTOR),Some((0,BASE_ADDRESS_ENHANCED)));
    assert_eq!(god.locate(HEADER_SECTOR+1),Some((0,BASE_ADDRESS_ENHANCED+0x800)));
    // second block skips another hash table
    assert_eq!(god.locate(0x198 - 2),Some((0,0x198*0x800 + 0x3000)));
    let mut file = std::io::Cursor::new(test_header(false,1,0x20,1));
    let header = ContentHeader::read(&mut file).expect("header did not parse");
    let god = God { header, files: vec![], total: 0x40 };
    assert_eq!(god.locate(0),None);
    assert_eq!(god.locate(2),Some((0,0x2000)));
}

#[test]
fn test_bad_signature() {
    let mut buf = test_header(false,0,0x20,1);
    buf[0..4].copy_from_slice(b"NOPE");
    let mut file = std::io::Cursor::new(buf);
    assert!(ContentHeader::read(&mut file).is_err());
}

#[test]
fn test_read_from_data_files() {
    use img::SectorDecoder;
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let desc = dir.path().join("4D5307E6");
    std::fs::write(&desc,test_header(false,0,0x12,1)).expect("write failed");
    std::fs::create_dir(data_dir(&desc)).expect("could not create data dir");
    let mut data = vec![0u8;0x14000];
    data[0x12000] = 0x11;
    data[0x13000] = 0x22;
    std::fs::write(data_dir(&desc).join("Data0000"),&data).expect("write failed");
    assert!(is_god(&desc));
    let god = God::open(&desc).expect("open failed");
    assert_eq!(god.total_sectors(),0x24);
    assert_eq!(god.read_sector(HEADER_SECTOR).expect("read failed")[0],0x11);
    assert_eq!(god.read_sector(0x22).expect("read failed")[0],0x22);
    // past the end of the data file
    assert!(god.read_sector(0x24).is_err());
    std::fs::remove_file(data_dir(&desc).join("Data0000")).expect("remove failed");
    assert!(God::open(&desc).is_err());
}

#[test]
fn test_empty_enhanced_header() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let desc = dir.path().join("58410A5D");
    std::fs::write(&desc,test_header(true,0,0,1)).expect("write failed");
    std::fs::create_dir(data_dir(&desc)).expect("could not create data dir");
    std::fs::write(data_dir(&desc).join("Data0000"),vec![0u8;0x4000]).expect("write failed");
    assert!(!is_god(&desc));
    assert!(God::open(&desc).is_err());
    let mut reader = crate::fs::xdvdfs::ContainerReader::new(&desc);
    assert!(!reader.try_mount());
    // a single block with the enhanced layout still has the two leading sectors
    std::fs::write(&desc,test_header(true,0,1,1)).expect("write failed");
    let god = God::open(&desc).expect("open failed");
    use img::SectorDecoder;
    assert_eq!(god.total_sectors(),HEADER_SECTOR+2);
}
