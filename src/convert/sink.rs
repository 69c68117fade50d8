//! ## Output sinks
//!
//! A sink accepts a stream of sectors and writes them to one or more files.
//! When a split size is given, the output is spread over `name.1.ext`, `name.2.ext`, etc.
//! If the output turns out to fit in one file, it keeps the unnumbered name.
//! A split size of 0 means the output is not split.

use std::fs::File;
use std::io::{BufWriter,Write};
use std::path::{Path,PathBuf};
use log::{debug,info,error};
use crate::img;
use crate::img::cci::CciWriter;
use crate::img::{Sector,SECTOR_SIZE,DiskImageType};
use crate::{DYNERR,STDRESULT};

pub trait SectorSink {
    fn write_sector(&mut self,sector: &Sector) -> STDRESULT;
    /// Close the output, returns the paths that were written
    fn finish(self: Box<Self>) -> Result<Vec<PathBuf>,DYNERR>;
}

/// Create the sink for the given target type
pub fn create_sink(path: &Path,target: DiskImageType,split_size: Option<u64>) -> Result<Box<dyn SectorSink>,DYNERR> {
    let split_size = split_size.filter(|sz| *sz > 0);
    if let Some(sz) = split_size {
        if sz < 2*SECTOR_SIZE as u64 {
            error!("split size {} is too small",sz);
            return Err(Box::new(super::Error::SplitSize));
        }
    }
    match target {
        DiskImageType::ISO => Ok(Box::new(IsoSink::create(path,split_size)?)),
        DiskImageType::CCI => Ok(Box::new(CciSink::create(path,split_size)?)),
        DiskImageType::GOD => {
            error!("cannot write {} images",target);
            Err(Box::new(super::Error::UnsupportedTarget))
        }
    }
}

/// Sequence of numbered parts, the first part is written to the unnumbered
/// path and renamed once a second part is needed.
struct Parts {
    path: PathBuf,
    count: usize
}

impl Parts {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            count: 1
        }
    }
    fn next(&self) -> PathBuf {
        img::part_path(&self.path,self.count+1)
    }
    /// Rename the first part if needed and move on to the next part.
    /// The current part must be closed.
    fn advance(&mut self) -> STDRESULT {
        if self.count==1 {
            std::fs::rename(&self.path,img::part_path(&self.path,1))?;
        }
        self.count += 1;
        info!("continuing in part {}",self.count);
        Ok(())
    }
    fn all(&self) -> Vec<PathBuf> {
        match self.count {
            1 => vec![self.path.clone()],
            n => (1..=n).map(|i| img::part_path(&self.path,i)).collect()
        }
    }
}

pub struct IsoSink {
    parts: Parts,
    split_size: Option<u64>,
    file: BufWriter<File>,
    written: u64
}

impl IsoSink {
    pub fn create(path: &Path,split_size: Option<u64>) -> Result<Self,DYNERR> {
        debug!("raw output to {}",path.display());
        Ok(Self {
            parts: Parts::new(path),
            split_size,
            file: BufWriter::new(File::create(path)?),
            written: 0
        })
    }
}

impl SectorSink for IsoSink {
    fn write_sector(&mut self,sector: &Sector) -> STDRESULT {
        if let Some(limit) = self.split_size {
            if self.written + SECTOR_SIZE as u64 > limit {
                let next = BufWriter::new(File::create(self.parts.next())?);
                let prev = std::mem::replace(&mut self.file,next);
                prev.into_inner()?;
                self.parts.advance()?;
                self.written = 0;
            }
        }
        self.file.write_all(sector)?;
        self.written += SECTOR_SIZE as u64;
        Ok(())
    }
    fn finish(mut self: Box<Self>) -> Result<Vec<PathBuf>,DYNERR> {
        self.file.flush()?;
        Ok(self.parts.all())
    }
}

pub struct CciSink {
    parts: Parts,
    split_size: Option<u64>,
    writer: Option<CciWriter>
}

impl CciSink {
    pub fn create(path: &Path,split_size: Option<u64>) -> Result<Self,DYNERR> {
        debug!("compressed output to {}",path.display());
        Ok(Self {
            parts: Parts::new(path),
            split_size,
            writer: Some(CciWriter::create(path)?)
        })
    }
}

impl SectorSink for CciSink {
    fn write_sector(&mut self,sector: &Sector) -> STDRESULT {
        let mut writer = match self.writer.take() {
            Some(w) => w,
            None => return Err(Box::new(img::Error::SectorAccess))
        };
        if let Some(limit) = self.split_size {
            // leave room for the worst case block and the grown index
            let projected = writer.position() + SECTOR_SIZE as u64 + (writer.sectors() as u64 + 2) * 4;
            if writer.sectors() > 0 && projected > limit {
                writer.finish()?;
                let next = self.parts.next();
                self.parts.advance()?;
                writer = CciWriter::create(&next)?;
            }
        }
        writer.write_sector(sector)?;
        self.writer = Some(writer);
        Ok(())
    }
    fn finish(mut self: Box<Self>) -> Result<Vec<PathBuf>,DYNERR> {
        match self.writer.take() {
            Some(w) => {
                w.finish()?;
                Ok(self.parts.all())
            },
            None => Err(Box::new(img::Error::SectorAccess))
        }
    }
}

#[test]
fn test_iso_split_names() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let path = dir.path().join("out.iso");
    let mut sink = create_sink(&path,DiskImageType::ISO,Some(3*SECTOR_SIZE as u64)).expect("create failed");
    for i in 0..7 {
        sink.write_sector(&[i as u8;SECTOR_SIZE]).expect("write failed");
    }
    let parts = sink.finish().expect("finish failed");
    assert_eq!(parts.len(),3);
    assert!(!path.exists());
    assert_eq!(std::fs::metadata(&parts[0]).expect("missing part").len(),3*SECTOR_SIZE as u64);
    assert_eq!(std::fs::metadata(&parts[2]).expect("missing part").len(),SECTOR_SIZE as u64);
    assert_eq!(std::fs::read(&parts[2]).expect("read failed")[0],6);
}

#[test]
fn test_cci_parts_respect_limit() {
    use crate::img::cci::HEADER_SIZE;
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let path = dir.path().join("out.cci");
    let limit = (HEADER_SIZE + 4*SECTOR_SIZE) as u64;
    let mut sink = create_sink(&path,DiskImageType::CCI,Some(limit)).expect("create failed");
    let mut x: u32 = 99;
    for _i in 0..10 {
        let mut sector = [0u8;SECTOR_SIZE];
        for b in sector.iter_mut() {
            x = x.wrapping_mul(1103515245).wrapping_add(12345);
            *b = (x >> 16) as u8;
        }
        sink.write_sector(&sector).expect("write failed");
    }
    let parts = sink.finish().expect("finish failed");
    assert!(parts.len() > 1);
    for p in &parts {
        assert!(std::fs::metadata(p).expect("missing part").len() <= limit);
    }
}

#[test]
fn test_unsplit_keeps_name() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let path = dir.path().join("one.cci");
    let mut sink = create_sink(&path,DiskImageType::CCI,Some(1 << 30)).expect("create failed");
    sink.write_sector(&[0;SECTOR_SIZE]).expect("write failed");
    assert_eq!(sink.finish().expect("finish failed"),vec![path.clone()]);
    assert!(img::cci::is_cci(&path));
    assert!(create_sink(&path,DiskImageType::GOD,None).is_err());
}

#[test]
fn test_zero_split_is_unsplit() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let path = dir.path().join("whole.iso");
    let mut sink = create_sink(&path,DiskImageType::ISO,Some(0)).expect("create failed");
    for i in 0..5 {
        sink.write_sector(&[i as u8;SECTOR_SIZE]).expect("write failed");
    }
    assert_eq!(sink.finish().expect("finish failed"),vec![path.clone()]);
    assert_eq!(std::fs::metadata(&path).expect("missing image").len(),5*SECTOR_SIZE as u64);
    assert!(!img::part_path(&path,1).exists());
    assert!(create_sink(&dir.path().join("tiny.iso"),DiskImageType::ISO,Some(1)).is_err());
}
