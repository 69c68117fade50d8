//! ## Support for compressed indexed containers (CCI)
//!
//! This format consists of a 32 byte header, a sequence of sector blocks, and an index.
//! Every index entry holds the block offset shifted right by the index alignment, with the high bit
//! set if the block is LZ4 compressed.  There is one more entry than there are sectors, so that
//! the size of any block is the difference of two neighboring entries.
//!
//! A compressed block starts with a count of trailing padding bytes, followed by the
//! compressed data, followed by the padding.  An uncompressed block is exactly 2048 bytes.
//!
//! The writer uses the `lz4_flex` block compressor, which has a single compression level.
//! Output is valid LZ4 but is not the smallest possible, since no high compression mode is available.
//!
//! Split containers consist of `name.1.cci`, `name.2.cci`, etc., each one a complete container
//! with its own header and index.  The reader presents them as one continuous sector range.

use std::fs::File;
use std::io::{Read,Write,Seek,SeekFrom,BufWriter};
use std::path::Path;
use std::sync::Mutex;
use log::{trace,debug,error};
use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use crate::img;
use crate::img::{Sector,SECTOR_SIZE};
use crate::DYNERR;

pub const MAGIC: [u8;4] = *b"CCIM";
pub const HEADER_SIZE: usize = 32;
pub const VERSION: u8 = 1;
/// offsets are stored in units of 4 bytes
pub const INDEX_ALIGNMENT: u8 = 2;
const COMPRESSED_FLAG: u32 = 0x8000_0000;
const OFFSET_MASK: u32 = 0x7fff_ffff;
/// largest compressed block (including the padding count) that is worth storing
const MAX_COMPRESSED_BLOCK: usize = SECTOR_SIZE - 2*(1 << INDEX_ALIGNMENT);

pub fn file_extensions() -> Vec<String> {
    vec!["cci".to_string()]
}

// all header entries are LE numbers
#[derive(DiskStruct)]
pub struct Header {
    magic: [u8;4], // always `CCIM`
    header_size: [u8;4], // 32
    uncompressed_size: [u8;8],
    index_offset: [u8;8],
    block_size: [u8;4], // 2048
    version: u8, // 1
    index_alignment: u8, // 2
    reserved: [u8;2]
}

impl Header {
    fn create(uncompressed_size: u64,index_offset: u64) -> Self {
        Self {
            magic: MAGIC,
            header_size: u32::to_le_bytes(HEADER_SIZE as u32),
            uncompressed_size: u64::to_le_bytes(uncompressed_size),
            index_offset: u64::to_le_bytes(index_offset),
            block_size: u32::to_le_bytes(SECTOR_SIZE as u32),
            version: VERSION,
            index_alignment: INDEX_ALIGNMENT,
            reserved: [0,0]
        }
    }
    fn verify(&self) -> bool {
        if self.magic!=MAGIC {
            return false;
        }
        if u32::from_le_bytes(self.header_size)!=HEADER_SIZE as u32 {
            debug!("unexpected CCI header size {}",u32::from_le_bytes(self.header_size));
            return false;
        }
        if u32::from_le_bytes(self.block_size)!=SECTOR_SIZE as u32 {
            debug!("unexpected CCI block size {}",u32::from_le_bytes(self.block_size));
            return false;
        }
        if self.version!=VERSION {
            debug!("unexpected CCI version {}",self.version);
            return false;
        }
        true
    }
}

fn read_header(file: &mut File) -> Result<Header,DYNERR> {
    let mut buf = vec![0;HEADER_SIZE];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf)?;
    Ok(Header::from_bytes(&buf)?)
}

/// Test a path for a CCI header, never fails with an error.
pub fn is_cci(path: &Path) -> bool {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false
    };
    match read_header(&mut file) {
        Ok(header) => header.verify(),
        Err(_) => false
    }
}

struct Part {
    file: Mutex<File>,
    index: Vec<u32>,
    alignment: u8,
    first_sector: u32
}

impl Part {
    fn sectors(&self) -> u32 {
        self.index.len() as u32 - 1
    }
    fn open(path: &Path,first_sector: u32) -> Result<Self,DYNERR> {
        let mut file = File::open(path)?;
        let header = read_header(&mut file)?;
        if !header.verify() {
            error!("{} is not a CCI container",path.display());
            return Err(Box::new(img::Error::ImageTypeMismatch));
        }
        let uncompressed_size = u64::from_le_bytes(header.uncompressed_size);
        if uncompressed_size%SECTOR_SIZE as u64 > 0 {
            return Err(Box::new(img::Error::ImageSizeMismatch));
        }
        let sectors = u32::try_from(uncompressed_size/SECTOR_SIZE as u64)?;
        let index_offset = u64::from_le_bytes(header.index_offset);
        let index_end = index_offset.checked_add((sectors as u64 + 1)*4);
        match index_end {
            Some(end) if end <= file.metadata()?.len() => {},
            _ => {
                error!("index of {} runs past the end of the file",path.display());
                return Err(Box::new(img::Error::ImageSizeMismatch));
            }
        }
        let mut buf = vec![0;(sectors as usize + 1)*4];
        file.seek(SeekFrom::Start(index_offset))?;
        match file.read_exact(&mut buf) {
            Ok(()) => {},
            Err(e) if e.kind()==std::io::ErrorKind::UnexpectedEof => return Err(Box::new(img::Error::ShortRead)),
            Err(e) => return Err(Box::new(e))
        }
        let index = buf.chunks_exact(4).map(|c| u32::from_le_bytes([c[0],c[1],c[2],c[3]])).collect();
        debug!("CCI part {} has {} sectors",path.display(),sectors);
        Ok(Self {
            file: Mutex::new(file),
            index,
            alignment: header.index_alignment,
            first_sector
        })
    }
    fn read_block(&self,local: usize) -> Result<Sector,DYNERR> {
        let entry = self.index[local];
        let pos = ((entry & OFFSET_MASK) as u64) << self.alignment;
        let end = ((self.index[local+1] & OFFSET_MASK) as u64) << self.alignment;
        let size = match end.checked_sub(pos) {
            Some(s) if s <= SECTOR_SIZE as u64 => s as usize,
            _ => {
                error!("block {} has a bad extent {:X}..{:X}",local,pos,end);
                return Err(Box::new(img::Error::BlockDecode));
            }
        };
        let compressed = entry & COMPRESSED_FLAG > 0;
        trace!("block {} at {:X}, size {}, compressed={}",local,pos,size,compressed);
        let mut file = match self.file.lock() {
            Ok(f) => f,
            Err(_) => return Err(Box::new(img::Error::SectorAccess))
        };
        file.seek(SeekFrom::Start(pos))?;
        if size!=SECTOR_SIZE || compressed {
            if size < 2 {
                return Err(Box::new(img::Error::BlockDecode));
            }
            let mut pad = [0u8;1];
            let mut data = vec![0u8;size-1];
            if let Err(e) = file.read_exact(&mut pad).and_then(|_| file.read_exact(&mut data)) {
                return match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => Err(Box::new(img::Error::ShortRead)),
                    _ => Err(Box::new(e))
                };
            }
            let len = match data.len().checked_sub(pad[0] as usize) {
                Some(l) => l,
                None => return Err(Box::new(img::Error::BlockDecode))
            };
            return match lz4_flex::decompress(&data[0..len],SECTOR_SIZE) {
                Ok(v) if v.len()==SECTOR_SIZE => Ok(img::quantize_sector(&v,0)),
                Ok(v) => {
                    error!("block decoded to {} bytes",v.len());
                    Err(Box::new(img::Error::BlockDecode))
                },
                Err(e) => {
                    error!("block could not be decoded: {}",e);
                    Err(Box::new(img::Error::BlockDecode))
                }
            };
        }
        let mut ans: Sector = [0;SECTOR_SIZE];
        match file.read_exact(&mut ans) {
            Ok(()) => Ok(ans),
            Err(e) if e.kind()==std::io::ErrorKind::UnexpectedEof => Err(Box::new(img::Error::ShortRead)),
            Err(e) => Err(Box::new(e))
        }
    }
}

/// Wrapper for one or more CCI files.
pub struct Cci {
    parts: Vec<Part>,
    total: u32
}

impl Cci {
    /// Open the container at `path`, including any numbered parts that follow it.
    pub fn open(path: &Path) -> Result<Self,DYNERR> {
        let mut parts: Vec<Part> = Vec::new();
        let mut total: u64 = 0;
        for part_path in img::volume_parts(path) {
            let part = Part::open(&part_path,total as u32)?;
            total += part.sectors() as u64;
            if total > u32::MAX as u64 {
                return Err(Box::new(img::Error::ImageSizeMismatch));
            }
            parts.push(part);
        }
        Ok(Self {
            parts,
            total: total as u32
        })
    }
}

impl img::SectorDecoder for Cci {
    fn total_sectors(&self) -> u32 {
        self.total
    }
    fn read_sector(&self,index: u32) -> Result<Sector,DYNERR> {
        match self.parts.iter().find(|p| index >= p.first_sector && index < p.first_sector + p.sectors()) {
            Some(part) => part.read_block((index - part.first_sector) as usize),
            None => {
                error!("sector {} is beyond the end of the image ({})",index,self.total);
                Err(Box::new(img::Error::SectorAccess))
            }
        }
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::CCI
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
}

/// Streams sectors into a new CCI file.  The header is written with placeholder
/// values, which are patched when `finish` appends the index.
pub struct CciWriter {
    file: BufWriter<File>,
    index: Vec<u32>,
    position: u64
}

impl CciWriter {
    pub fn create(path: &Path) -> Result<Self,DYNERR> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&Header::create(0,0).to_bytes())?;
        Ok(Self {
            file,
            index: Vec::new(),
            position: HEADER_SIZE as u64
        })
    }
    fn index_entry(&self,compressed: bool) -> Result<u32,DYNERR> {
        let shifted = self.position >> INDEX_ALIGNMENT;
        if shifted > OFFSET_MASK as u64 {
            error!("CCI offset {:X} cannot be indexed",self.position);
            return Err(Box::new(img::Error::ImageSizeMismatch));
        }
        Ok(match compressed {
            true => shifted as u32 | COMPRESSED_FLAG,
            false => shifted as u32
        })
    }
    /// Compress and append one sector, storing it raw if compression does not pay.
    pub fn write_sector(&mut self,sector: &[u8]) -> Result<(),DYNERR> {
        let sector = img::quantize_sector(sector,0);
        let compressed = lz4_flex::compress(&sector);
        let granule = 1usize << INDEX_ALIGNMENT;
        if 1 + compressed.len() <= MAX_COMPRESSED_BLOCK {
            let pad = (granule - (1 + compressed.len()) % granule) % granule;
            let entry = self.index_entry(true)?;
            self.index.push(entry);
            self.file.write_all(&[pad as u8])?;
            self.file.write_all(&compressed)?;
            self.file.write_all(&vec![0;pad])?;
            self.position += (1 + compressed.len() + pad) as u64;
        } else {
            let entry = self.index_entry(false)?;
            self.index.push(entry);
            self.file.write_all(&sector)?;
            self.position += SECTOR_SIZE as u64;
        }
        Ok(())
    }
    /// Sectors written so far
    pub fn sectors(&self) -> u32 {
        self.index.len() as u32
    }
    /// Bytes of header and sector data written so far
    pub fn position(&self) -> u64 {
        self.position
    }
    /// Append the index and patch the header, returns the total file size.
    pub fn finish(mut self) -> Result<u64,DYNERR> {
        let index_offset = self.position;
        let last = self.index_entry(false)?;
        self.index.push(last);
        for entry in &self.index {
            self.file.write_all(&u32::to_le_bytes(*entry))?;
        }
        let uncompressed_size = (self.index.len() as u64 - 1) * SECTOR_SIZE as u64;
        let header = Header::create(uncompressed_size,index_offset);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.file.flush()?;
        debug!("CCI finished with {} sectors, index at {:X}",self.index.len()-1,index_offset);
        Ok(index_offset + self.index.len() as u64 * 4)
    }
}

#[cfg(test)]
fn noise_sector(seed: u32) -> Vec<u8> {
    let mut x = seed;
    (0..SECTOR_SIZE).map(|_| {
        x = x.wrapping_mul(1103515245).wrapping_add(12345);
        (x >> 16) as u8
    }).collect()
}

#[test]
fn test_write_and_read_back() {
    use img::SectorDecoder;
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let path = dir.path().join("game.cci");
    let mut text = vec![0u8;SECTOR_SIZE];
    for i in 0..SECTOR_SIZE {
        text[i] = b"HELLO XBOX "[i%11];
    }
    let noise = noise_sector(7);
    let mut writer = CciWriter::create(&path).expect("create failed");
    writer.write_sector(&text).expect("write failed");
    writer.write_sector(&noise).expect("write failed");
    writer.write_sector(&[0xff;SECTOR_SIZE]).expect("write failed");
    assert_eq!(writer.sectors(),3);
    let size = writer.finish().expect("finish failed");
    assert_eq!(std::fs::metadata(&path).expect("no file").len(),size);
    assert!(is_cci(&path));
    let cci = Cci::open(&path).expect("open failed");
    assert_eq!(cci.total_sectors(),3);
    assert_eq!(cci.parts[0].index[0] & COMPRESSED_FLAG,COMPRESSED_FLAG);
    assert_eq!(cci.parts[0].index[1] & COMPRESSED_FLAG,0);
    assert_eq!(cci.read_sector(0).expect("read failed").to_vec(),text);
    assert_eq!(cci.read_sector(1).expect("read failed").to_vec(),noise);
    // reading again gives the same bytes
    assert_eq!(cci.read_sector(1).expect("read failed").to_vec(),noise);
    assert_eq!(cci.read_sector(2).expect("read failed"),[0xff;SECTOR_SIZE]);
    assert!(cci.read_sector(3).is_err());
}

#[test]
fn test_uncompressed_block() {
    use img::SectorDecoder;
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let path = dir.path().join("raw.cci");
    let payload = noise_sector(3);
    let mut buf = Header::create(SECTOR_SIZE as u64,(HEADER_SIZE + SECTOR_SIZE) as u64).to_bytes();
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&u32::to_le_bytes(HEADER_SIZE as u32 >> 2));
    buf.extend_from_slice(&u32::to_le_bytes((HEADER_SIZE + SECTOR_SIZE) as u32 >> 2));
    std::fs::write(&path,&buf).expect("write failed");
    let cci = Cci::open(&path).expect("open failed");
    assert_eq!(cci.read_sector(0).expect("read failed").to_vec(),payload);
}

#[test]
fn test_corrupt_block() {
    use img::SectorDecoder;
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let path = dir.path().join("bad.cci");
    let mut writer = CciWriter::create(&path).expect("create failed");
    writer.write_sector(&[0;SECTOR_SIZE]).expect("write failed");
    let end = writer.position() as usize;
    writer.finish().expect("finish failed");
    let mut buf = std::fs::read(&path).expect("read failed");
    for i in HEADER_SIZE+1..end {
        buf[i] = 0xff;
    }
    std::fs::write(&path,&buf).expect("write failed");
    let cci = Cci::open(&path).expect("open failed");
    match cci.read_sector(0) {
        Err(e) => assert_eq!(e.to_string(),img::Error::BlockDecode.to_string()),
        Ok(_) => panic!("corrupt block was decoded")
    }
}

#[test]
fn test_split_parts() {
    use img::SectorDecoder;
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let base = dir.path().join("game.cci");
    for n in 1..3 {
        let mut writer = CciWriter::create(&img::part_path(&base,n)).expect("create failed");
        writer.write_sector(&[n as u8;SECTOR_SIZE]).expect("write failed");
        writer.write_sector(&[n as u8 + 0x10;SECTOR_SIZE]).expect("write failed");
        writer.finish().expect("finish failed");
    }
    let cci = Cci::open(&img::part_path(&base,1)).expect("open failed");
    assert_eq!(cci.total_sectors(),4);
    assert_eq!(cci.read_sector(1).expect("read failed")[0],0x11);
    assert_eq!(cci.read_sector(2).expect("read failed")[0],2);
    assert_eq!(cci.read_sector(3).expect("read failed")[100],0x12);
}

#[test]
fn test_bad_extents() {
    use img::SectorDecoder;
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let path = dir.path().join("huge.cci");
    // header claims far more sectors than the file can index
    let mut buf = Header::create(0x1ff_ffff_f800,HEADER_SIZE as u64).to_bytes();
    buf.extend_from_slice(&[0;8]);
    std::fs::write(&path,&buf).expect("write failed");
    assert!(is_cci(&path));
    assert!(Cci::open(&path).is_err());
    // a block that claims to be larger than a sector
    let mut buf = Header::create(SECTOR_SIZE as u64,(HEADER_SIZE + SECTOR_SIZE) as u64).to_bytes();
    buf.extend_from_slice(&[0;SECTOR_SIZE]);
    buf.extend_from_slice(&u32::to_le_bytes(HEADER_SIZE as u32 >> 2));
    buf.extend_from_slice(&u32::to_le_bytes(0x4000_0000));
    std::fs::write(&path,&buf).expect("write failed");
    let cci = Cci::open(&path).expect("open failed");
    match cci.read_sector(0) {
        Err(e) => assert_eq!(e.to_string(),img::Error::BlockDecode.to_string()),
        Ok(_) => panic!("oversized block was read")
    }
}
