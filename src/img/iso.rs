//! ## Support for raw disc images (ISO)
//!
//! ISO images are a simple sequential dump of 2048 byte sectors with no container header.
//! The volume identity can only be found by probing the magic sector candidates,
//! which is left to the file system layer.
//! Split images are handled by treating the numbered parts as one continuous sector range.

use std::fs::File;
use std::io::{Read,Seek,SeekFrom};
use std::path::Path;
use std::sync::Mutex;
use log::{trace,debug,error};
use crate::img;
use crate::img::{Sector,SECTOR_SIZE};
use crate::DYNERR;

pub fn file_extensions() -> Vec<String> {
    vec!["iso".to_string(),"xiso".to_string()]
}

struct Part {
    file: Mutex<File>,
    first_sector: u32,
    sectors: u32
}

/// Wrapper for one or more ISO files.
pub struct Iso {
    parts: Vec<Part>,
    total: u32
}

/// Test a path for a plausible raw image, never fails with an error.
pub fn is_iso(path: &Path) -> bool {
    for part in img::volume_parts(path) {
        match std::fs::metadata(&part) {
            Ok(meta) => {
                if meta.len() < SECTOR_SIZE as u64 {
                    debug!("ISO size {} is less than one sector",meta.len());
                    return false;
                }
            },
            Err(_) => return false
        }
    }
    true
}

impl Iso {
    /// Open the image at `path`, including any numbered parts that follow it.
    pub fn open(path: &Path) -> Result<Self,DYNERR> {
        let mut parts = Vec::new();
        let mut total: u64 = 0;
        for part_path in img::volume_parts(path) {
            let file = File::open(&part_path)?;
            let len = file.metadata()?.len();
            if len%SECTOR_SIZE as u64 > 0 {
                debug!("ignoring {} trailing bytes of {}",len%SECTOR_SIZE as u64,part_path.display());
            }
            let sectors = len/SECTOR_SIZE as u64;
            if total + sectors > u32::MAX as u64 {
                return Err(Box::new(img::Error::ImageSizeMismatch));
            }
            parts.push(Part {
                file: Mutex::new(file),
                first_sector: total as u32,
                sectors: sectors as u32
            });
            total += sectors;
        }
        Ok(Self {
            parts,
            total: total as u32
        })
    }
}

impl img::SectorDecoder for Iso {
    fn total_sectors(&self) -> u32 {
        self.total
    }
    fn read_sector(&self,index: u32) -> Result<Sector,DYNERR> {
        trace!("read sector {}",index);
        let part = match self.parts.iter().find(|p| index >= p.first_sector && index < p.first_sector + p.sectors) {
            Some(p) => p,
            None => {
                error!("sector {} is beyond the end of the image ({})",index,self.total);
                return Err(Box::new(img::Error::SectorAccess));
            }
        };
        let mut ans: Sector = [0;SECTOR_SIZE];
        let offset = (index - part.first_sector) as u64 * SECTOR_SIZE as u64;
        let mut file = match part.file.lock() {
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
        img::DiskImageType::ISO
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
}

#[test]
fn test_split_parts_are_continuous() {
    use img::SectorDecoder;
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let base = dir.path().join("game.iso");
    let mut p1 = vec![0u8;SECTOR_SIZE*2];
    p1[SECTOR_SIZE] = 0xaa;
    let mut p2 = vec![0u8;SECTOR_SIZE];
    p2[0] = 0xbb;
    std::fs::write(img::part_path(&base,1),&p1).expect("write failed");
    std::fs::write(img::part_path(&base,2),&p2).expect("write failed");
    let iso = Iso::open(&img::part_path(&base,1)).expect("open failed");
    assert_eq!(iso.total_sectors(),3);
    assert_eq!(iso.read_sector(1).expect("read failed")[0],0xaa);
    assert_eq!(iso.read_sector(2).expect("read failed")[0],0xbb);
    assert!(iso.read_sector(3).is_err());
}

#[test]
fn test_partial_trailing_sector() {
    use img::SectorDecoder;
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let path = dir.path().join("odd.iso");
    let mut dat = vec![0u8;SECTOR_SIZE*3 + 100];
    dat[SECTOR_SIZE*2] = 0xcc;
    std::fs::write(&path,&dat).expect("write failed");
    assert!(is_iso(&path));
    let iso = Iso::open(&path).expect("open failed");
    assert_eq!(iso.total_sectors(),3);
    assert_eq!(iso.read_sector(2).expect("read failed")[0],0xcc);
    assert!(iso.read_sector(3).is_err());
    std::fs::write(&path,vec![0u8;100]).expect("write failed");
    assert!(!is_iso(&path));
}
