//! # XDVDFS
//!
//! The Xbox disc file system.  The `ContainerReader` is the main entry point for reading.
//! It is tied to a path, and creates a sector decoder only while it is mounted.
//! Mounting is reference counted, every successful `try_mount` must be paired with a `dismount`,
//! or else use `mount`, which returns a guard that dismounts when dropped.
//!
//! Traversal uses an explicit work list of `(directory buffer, word offset, path)` items.
//! A stack is used when order matters (extraction and catalogs), giving each directory
//! before its contents; a queue is used for scans.

pub mod volume;
pub mod directory;
pub mod alloc;
pub mod build;

use std::collections::{HashSet,VecDeque};
use std::io::Write;
use std::ops::{Deref,DerefMut};
use std::path::{Path,PathBuf};
use std::rc::Rc;
use bit_vec::BitVec;
use log::{trace,debug,info,warn,error};
use crate::fs::Error;
use crate::img::{SectorDecoder,SECTOR_SIZE,sectors_for};
use crate::{DYNERR,STDRESULT};
use volume::{VolumeInfo,MAGIC_SECTOR};
use directory::Entry;

pub const DEFAULT_XBE: &str = "default.xbe";
pub const DEFAULT_XEX: &str = "default.xex";

/// The two kinds of default executable
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum DefaultExecutable {
    Xbe,
    Xex
}

impl DefaultExecutable {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Xbe => DEFAULT_XBE,
            Self::Xex => DEFAULT_XEX
        }
    }
}

/// One row of a catalog, sectors are absolute
#[derive(Clone,Debug,PartialEq)]
pub struct CatalogItem {
    pub path: String,
    pub is_dir: bool,
    pub sector: u32,
    pub size: u32
}

#[derive(PartialEq,Clone,Copy)]
enum WalkOrder {
    /// stack, each directory is followed by its contents
    PreOrder,
    /// queue
    Scan
}

struct WorkItem {
    buf: Rc<Vec<u8>>,
    /// directory sector the buffer was read from
    sector: u32,
    offset: u16,
    prefix: Rc<String>
}

pub struct ContainerReader {
    path: PathBuf,
    mount_count: usize,
    decoder: Option<Box<dyn SectorDecoder>>,
    volume: Option<VolumeInfo>
}

/// Keeps a `ContainerReader` mounted for as long as it lives.
pub struct Mount<'a> {
    reader: &'a mut ContainerReader
}

impl<'a> Deref for Mount<'a> {
    type Target = ContainerReader;
    fn deref(&self) -> &ContainerReader {
        &*self.reader
    }
}

impl<'a> DerefMut for Mount<'a> {
    fn deref_mut(&mut self) -> &mut ContainerReader {
        &mut *self.reader
    }
}

impl<'a> Drop for Mount<'a> {
    fn drop(&mut self) {
        self.reader.dismount();
    }
}

fn join_path(prefix: &str,name: &str) -> String {
    match prefix.len() {
        0 => name.to_string(),
        _ => [prefix,"/",name].concat()
    }
}

/// Reject names that would escape the destination when extracted
fn safe_component(name: &str) -> Result<&str,DYNERR> {
    if name=="." || name==".." || name.contains('/') || name.contains('\\') || name.contains('\0') {
        error!("refusing to extract `{}`",name);
        return Err(Box::new(Error::BadName));
    }
    Ok(name)
}

impl ContainerReader {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            mount_count: 0,
            decoder: None,
            volume: None
        }
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn mount_count(&self) -> usize {
        self.mount_count
    }
    pub fn is_mounted(&self) -> bool {
        self.mount_count > 0
    }
    /// Try to mount the container, returns false if it is not an image holding an XDVDFS volume.
    /// If already mounted only the count is incremented.
    pub fn try_mount(&mut self) -> bool {
        if self.mount_count > 0 {
            self.mount_count += 1;
            trace!("mount count {}",self.mount_count);
            return true;
        }
        let decoder = match crate::create_decoder_from_file(&self.path) {
            Ok(d) => d,
            Err(e) => {
                debug!("could not create decoder: {}",e);
                return false;
            }
        };
        match volume::locate(decoder.as_ref()) {
            Some(vol) => {
                info!("mounted {}",self.path.display());
                self.decoder = Some(decoder);
                self.volume = Some(vol);
                self.mount_count = 1;
                true
            },
            None => {
                debug!("no volume descriptor found in {}",self.path.display());
                false
            }
        }
    }
    /// Decrement the mount count, releasing the decoder when it reaches 0.
    pub fn dismount(&mut self) {
        match self.mount_count {
            0 => trace!("dismount while not mounted"),
            1 => {
                info!("dismounted {}",self.path.display());
                self.mount_count = 0;
                self.decoder = None;
                self.volume = None;
            },
            _ => self.mount_count -= 1
        }
    }
    /// Mount and return a guard that dismounts when dropped.
    pub fn mount(&mut self) -> Result<Mount<'_>,DYNERR> {
        match self.try_mount() {
            true => Ok(Mount { reader: self }),
            false => Err(Box::new(Error::FileSystemMismatch))
        }
    }
    fn storage(&self) -> Result<(&dyn SectorDecoder,&VolumeInfo),DYNERR> {
        match (&self.decoder,&self.volume) {
            (Some(d),Some(v)) => Ok((d.as_ref(),v)),
            _ => Err(Box::new(Error::NotMounted))
        }
    }
    pub fn decoder(&self) -> Result<&dyn SectorDecoder,DYNERR> {
        Ok(self.storage()?.0)
    }
    pub fn volume_info(&self) -> Result<VolumeInfo,DYNERR> {
        Ok(*self.storage()?.1)
    }
    /// Absolute sector range of an entry, None if it runs past the end of the image
    fn span(&self,sector: u32,size: u32) -> Result<Option<(u32,u32)>,DYNERR> {
        let (dec,vol) = self.storage()?;
        let start = vol.base_sector as u64 + sector as u64;
        let end = start + sectors_for(size as u64);
        if end > dec.total_sectors() as u64 {
            return Ok(None);
        }
        Ok(Some((start as u32,end as u32)))
    }
    fn read_directory(&self,sector: u32,size: u32) -> Result<Vec<u8>,DYNERR> {
        let (start,end) = match self.span(sector,size)? {
            Some(s) => s,
            None => {
                error!("directory at {:X} runs past the end of the image",sector);
                return Err(Box::new(Error::EntryBounds));
            }
        };
        self.decoder()?.read_sectors(start,end-start)
    }
    fn root_directory(&self) -> Result<Vec<u8>,DYNERR> {
        let vol = self.volume_info()?;
        self.read_directory(vol.root_sector,vol.root_size)
    }
    /// Visit every entry.  Broken entries are skipped, as are entries and directories
    /// that have already been visited, and directories that cannot be read.
    fn walk(&self,order: WalkOrder,visit: &mut dyn FnMut(&str,&Entry) -> STDRESULT) -> STDRESULT {
        let vol = self.volume_info()?;
        let mut visited: HashSet<u32> = HashSet::new();
        visited.insert(vol.root_sector);
        let mut seen_nodes: HashSet<(u32,u16)> = HashSet::new();
        let mut work: VecDeque<WorkItem> = VecDeque::new();
        work.push_back(WorkItem {
            buf: Rc::new(self.root_directory()?),
            sector: vol.root_sector,
            offset: 0,
            prefix: Rc::new(String::new())
        });
        loop {
            let item = match order {
                WalkOrder::PreOrder => work.pop_back(),
                WalkOrder::Scan => work.pop_front()
            };
            let item = match item {
                Some(i) => i,
                None => break
            };
            if !seen_nodes.insert((item.sector,item.offset)) {
                warn!("entry at word {:X} of directory {:X} is linked more than once",item.offset,item.sector);
                continue;
            }
            let entry = match directory::parse_entry(&item.buf,item.offset) {
                Ok(Some(e)) => e,
                Ok(None) => continue,
                Err(e) => {
                    debug!("skipping entry in `{}`: {}",item.prefix,e);
                    continue;
                }
            };
            let path = join_path(&item.prefix,&entry.name);
            trace!("visit {}",path);
            visit(&path,&entry)?;
            if entry.right > 0 && entry.right!=directory::PADDING {
                work.push_back(WorkItem { buf: Rc::clone(&item.buf), sector: item.sector, offset: entry.right, prefix: Rc::clone(&item.prefix) });
            }
            if entry.left > 0 && entry.left!=directory::PADDING {
                work.push_back(WorkItem { buf: Rc::clone(&item.buf), sector: item.sector, offset: entry.left, prefix: Rc::clone(&item.prefix) });
            }
            if entry.is_dir() && entry.size > 0 {
                if !visited.insert(entry.sector) {
                    warn!("directory sector {:X} is referenced more than once",entry.sector);
                    continue;
                }
                match self.read_directory(entry.sector,entry.size) {
                    Ok(buf) => work.push_back(WorkItem { buf: Rc::new(buf), sector: entry.sector, offset: 0, prefix: Rc::new(path) }),
                    Err(e) => warn!("cannot read directory `{}`: {}",path,e)
                }
            }
        }
        Ok(())
    }
    /// Flag every sector that precedes the game partition or belongs to the volume descriptor,
    /// a directory, or a file.
    pub fn get_data_sectors(&self) -> Result<BitVec,DYNERR> {
        let (dec,vol) = self.storage()?;
        let total = dec.total_sectors();
        let mut ans = BitVec::from_elem(total as usize,false);
        let mut mark = |start: u32,end: u32| {
            for s in start..end {
                ans.set(s as usize,true);
            }
        };
        mark(0,u32::min(vol.base_sector,total));
        let magic = vol.base_sector + MAGIC_SECTOR;
        mark(magic,u32::min(magic+2,total));
        match self.span(vol.root_sector,vol.root_size)? {
            Some((s,e)) => mark(s,e),
            None => warn!("root directory runs past the end of the image")
        }
        self.walk(WalkOrder::Scan,&mut |path,entry| {
            match self.span(entry.sector,entry.size)? {
                Some((s,e)) => mark(s,e),
                None => warn!("`{}` runs past the end of the image",path)
            }
            Ok(())
        })?;
        debug!("{} of {} sectors hold data",ans.iter().filter(|b| *b).count(),total);
        Ok(ans)
    }
    /// Absolute sector range and size of every entry, in pre-order.
    pub fn catalog(&self) -> Result<Vec<CatalogItem>,DYNERR> {
        let vol = self.volume_info()?;
        let mut ans = Vec::new();
        self.walk(WalkOrder::PreOrder,&mut |path,entry| {
            ans.push(CatalogItem {
                path: path.to_string(),
                is_dir: entry.is_dir(),
                sector: vol.base_sector + entry.sector,
                size: entry.size
            });
            Ok(())
        })?;
        Ok(ans)
    }
    /// Read the sectors of one file entry, truncated to the file size.
    fn read_entry_data(&self,entry: &Entry) -> Result<Vec<u8>,DYNERR> {
        let (start,end) = match self.span(entry.sector,entry.size)? {
            Some(s) => s,
            None => {
                error!("`{}` runs past the end of the image",entry.name);
                return Err(Box::new(Error::EntryBounds));
            }
        };
        let mut ans = self.decoder()?.read_sectors(start,end-start)?;
        ans.truncate(entry.size as usize);
        Ok(ans)
    }
    fn find_path(&self,path: &str) -> Result<Option<Entry>,DYNERR> {
        let mut buf = self.root_directory()?;
        let mut components = path.split('/').filter(|c| c.len() > 0).peekable();
        while let Some(name) = components.next() {
            let entry = match directory::find_entry(&buf,name)? {
                Some(e) => e,
                None => return Ok(None)
            };
            if components.peek().is_none() {
                return Ok(Some(entry));
            }
            if !entry.is_dir() {
                return Ok(None);
            }
            buf = self.read_directory(entry.sector,entry.size)?;
        }
        Ok(None)
    }
    /// Read a file given a `/` separated path, names are matched without regard to case.
    pub fn read_file(&self,path: &str) -> Result<Vec<u8>,DYNERR> {
        match self.find_path(path)? {
            Some(entry) if !entry.is_dir() => self.read_entry_data(&entry),
            _ => {
                error!("`{}` not found",path);
                Err(Box::new(Error::FileNotFound))
            }
        }
    }
    /// Find the default executable in the root directory, `default.xbe` is preferred.
    pub fn get_default(&self) -> Result<(DefaultExecutable,Vec<u8>),DYNERR> {
        let root = self.root_directory()?;
        for kind in [DefaultExecutable::Xbe,DefaultExecutable::Xex] {
            if let Some(entry) = directory::find_entry(&root,kind.file_name())? {
                if !entry.is_dir() {
                    info!("found {}",entry.name);
                    return Ok((kind,self.read_entry_data(&entry)?));
                }
            }
        }
        error!("no default executable");
        Err(Box::new(Error::FileNotFound))
    }
    fn extract_file(&self,entry: &Entry,dest: &Path) -> STDRESULT {
        let (start,end) = match self.span(entry.sector,entry.size)? {
            Some(s) => s,
            None => {
                error!("`{}` runs past the end of the image",entry.name);
                return Err(Box::new(Error::EntryBounds));
            }
        };
        let dec = self.decoder()?;
        let mut file = std::io::BufWriter::new(std::fs::File::create(dest)?);
        let mut remaining = entry.size as usize;
        for s in start..end {
            let sector = dec.read_sector(s)?;
            let n = usize::min(remaining,SECTOR_SIZE);
            file.write_all(&sector[0..n])?;
            remaining -= n;
        }
        file.flush()?;
        Ok(())
    }
    /// Write every directory and file below `dest`, reporting each relative path as it is visited.
    pub fn extract_all(&self,dest: &Path,progress: &mut dyn FnMut(&str)) -> STDRESULT {
        std::fs::create_dir_all(dest)?;
        self.walk(WalkOrder::PreOrder,&mut |path,entry| {
            let mut target = dest.to_path_buf();
            for component in path.split('/') {
                target.push(safe_component(component)?);
            }
            progress(path);
            match entry.is_dir() {
                true => std::fs::create_dir_all(&target)?,
                false => self.extract_file(entry,&target)?
            }
            Ok(())
        })
    }
    /// Volume metadata as a JSON string
    pub fn get_metadata(&self,indent: Option<u16>) -> Result<String,DYNERR> {
        let (dec,vol) = self.storage()?;
        let mut root = json::JsonValue::new_object();
        let typ = dec.what_am_i().to_string();
        root[&typ] = json::JsonValue::new_object();
        root[&typ]["total_sectors"] = dec.total_sectors().into();
        root["xdvdfs"] = json::JsonValue::new_object();
        root["xdvdfs"]["volume"] = vol.kind.to_string().into();
        root["xdvdfs"]["base_sector"] = vol.base_sector.into();
        root["xdvdfs"]["root_sector"] = vol.root_sector.into();
        root["xdvdfs"]["root_size"] = vol.root_size.into();
        root["xdvdfs"]["created"] = match vol.created_datetime() {
            Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string().into(),
            None => json::JsonValue::Null
        };
        if let Some(spaces) = indent {
            Ok(json::stringify_pretty(root,spaces))
        } else {
            Ok(json::stringify(root))
        }
    }
}
