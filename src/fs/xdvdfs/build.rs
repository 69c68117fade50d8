//! ## Image builder
//!
//! Lays out a host folder as a new XDVDFS volume.  Building happens in two phases.
//! `ImagePlan::create` scans the folder, sizes and allocates every directory and file,
//! and serializes the directories.  `ImagePlan::write_sectors` then streams the image
//! one sector at a time, reading file data only as it is needed.
//!
//! The output sink is left to the caller, see `crate::convert`.

use std::fs::File;
use std::io::{BufReader,Read};
use std::path::{Path,PathBuf};
use std::collections::VecDeque;
use a2kit_macro::DiskStruct;
use chrono::NaiveDateTime;
use log::{trace,debug,info,error};
use crate::fs::Error;
use crate::fs::xdvdfs::alloc::SectorAllocator;
use crate::fs::xdvdfs::directory::{self,TreeItem};
use crate::fs::xdvdfs::volume::{self,VolumeDescriptor};
use crate::img::{Sector,SECTOR_SIZE,sectors_for,quantize_sector};
use crate::{DYNERR,STDRESULT};

const FILL: u8 = 0xff;
/// sectors between progress reports
const PROGRESS_INTERVAL: u32 = 256;

/// Options for laying out a new image
#[derive(Clone,Debug)]
pub struct BuildOptions {
    /// absolute sector where the partition starts, 0 for an image without a video partition
    pub base_sector: u32,
    /// creation time stamp, None means now
    pub created: Option<NaiveDateTime>,
    /// put the root directory at this sector, relative to the base
    pub fixed_root: Option<u32>
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            base_sector: 0,
            created: None,
            fixed_root: None
        }
    }
}

struct BuildFile {
    name: String,
    path: PathBuf,
    size: u32,
    sector: u32
}

/// Directory in the build arena; the root is element 0 and
/// every child has a larger index than its parent.
struct BuildDir {
    name: String,
    files: Vec<BuildFile>,
    children: Vec<usize>,
    size: u32,
    sector: u32
}

impl BuildDir {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: Vec::new(),
            children: Vec::new(),
            size: 0,
            sector: 0
        }
    }
}

fn host_name(path: &Path) -> Result<String,DYNERR> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => Ok(n.to_string()),
        None => {
            error!("cannot use name of {}",path.display());
            Err(Box::new(Error::BadName))
        }
    }
}

/// Scan `root` breadth first into an arena of directories.
fn scan_folder(root: &Path) -> Result<Vec<BuildDir>,DYNERR> {
    if !root.is_dir() {
        error!("{} is not a folder",root.display());
        return Err(Box::new(Error::FileNotFound));
    }
    let mut arena = vec![BuildDir::new("")];
    let mut queue: VecDeque<(usize,PathBuf)> = VecDeque::new();
    queue.push_back((0,root.to_path_buf()));
    while let Some((idx,dir_path)) = queue.pop_front() {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir_path)? {
            paths.push(entry?.path());
        }
        paths.sort();
        for path in paths {
            let name = host_name(&path)?;
            let meta = std::fs::metadata(&path)?;
            if meta.is_dir() {
                let child = arena.len();
                arena.push(BuildDir::new(&name));
                arena[idx].children.push(child);
                queue.push_back((child,path));
            } else {
                let size = match u32::try_from(meta.len()) {
                    Ok(s) => s,
                    Err(_) => {
                        error!("{} is too large",path.display());
                        return Err(Box::new(Error::FileTooLarge));
                    }
                };
                trace!("found {} with {} bytes",path.display(),size);
                arena[idx].files.push(BuildFile { name, path, size, sector: 0 });
            }
        }
    }
    debug!("scanned {} directories",arena.len());
    Ok(arena)
}

/// Directory entries of `arena[idx]` with sectors made relative to `base`
fn tree_items(arena: &[BuildDir],idx: usize,base: u32) -> Vec<TreeItem> {
    let mut ans: Vec<TreeItem> = arena[idx].files.iter().map(|f| TreeItem {
        name: f.name.clone(),
        is_dir: false,
        sector: f.sector - base,
        size: f.size
    }).collect();
    for child in &arena[idx].children {
        let d = &arena[*child];
        ans.push(TreeItem {
            name: d.name.clone(),
            is_dir: true,
            sector: d.sector - base,
            size: d.size
        });
    }
    ans
}

enum Content {
    Directory(usize),
    File(usize)
}

struct Extent {
    start: u32,
    end: u32,
    content: Content
}

struct PlannedFile {
    path: PathBuf,
    size: u32
}

/// Complete layout of a new image
pub struct ImagePlan {
    base: u32,
    total: u32,
    root_sector: u32,
    root_size: u32,
    created: u64,
    directories: Vec<Vec<u8>>,
    files: Vec<PlannedFile>,
    /// sorted by start sector
    extents: Vec<Extent>
}

impl ImagePlan {
    /// Scan `folder` and lay out the image.  No image data is written yet.
    pub fn create(folder: &Path,opt: &BuildOptions) -> Result<Self,DYNERR> {
        let base = opt.base_sector;
        let mut arena = scan_folder(folder)?;
        for idx in (0..arena.len()).rev() {
            let size = directory::directory_size(&tree_items(&arena,idx,0))?;
            arena[idx].size = size;
        }
        let dir_sectors: Vec<u32> = arena.iter().map(|d| sectors_for(d.size as u64) as u32).collect();
        let mut alloc = SectorAllocator::new(base);
        let region: u32 = match opt.fixed_root {
            Some(rel) => {
                alloc.reserve_fixed(base + rel,dir_sectors[0])?;
                dir_sectors[1..].iter().sum()
            },
            None => dir_sectors.iter().sum()
        };
        alloc.reserve_directory_region(region)?;

        let mut order: Vec<(usize,usize)> = Vec::new();
        for (d,dir) in arena.iter().enumerate() {
            for f in 0..dir.files.len() {
                order.push((d,f));
            }
        }
        order.sort_by(|a,b| arena[b.0].files[b.1].size.cmp(&arena[a.0].files[a.1].size));
        for (d,f) in order {
            let n = sectors_for(arena[d].files[f].size as u64) as u32;
            arena[d].files[f].sector = alloc.allocate_file_sectors(n)?;
        }

        for idx in 0..arena.len() {
            arena[idx].sector = match (idx,opt.fixed_root) {
                (0,Some(rel)) => base + rel,
                _ => alloc.allocate_directory_sectors(dir_sectors[idx])?
            };
            trace!("directory `{}` at {:X}",arena[idx].name,arena[idx].sector);
        }

        let mut directories = Vec::new();
        let mut files = Vec::new();
        let mut extents = Vec::new();
        for idx in 0..arena.len() {
            directories.push(directory::build_directory(&tree_items(&arena,idx,base))?);
            extents.push(Extent {
                start: arena[idx].sector,
                end: arena[idx].sector + dir_sectors[idx],
                content: Content::Directory(idx)
            });
        }
        for dir in arena.iter_mut() {
            for f in dir.files.drain(..) {
                if f.size > 0 {
                    extents.push(Extent {
                        start: f.sector,
                        end: f.sector + sectors_for(f.size as u64) as u32,
                        content: Content::File(files.len())
                    });
                }
                files.push(PlannedFile { path: f.path, size: f.size });
            }
        }
        extents.sort_by_key(|e| e.start);
        let created = match opt.created {
            Some(dt) => volume::datetime_to_filetime(dt),
            None => volume::datetime_to_filetime(chrono::Utc::now().naive_utc())
        };
        let total = alloc.end();
        info!("planned image with {} sectors, {} files, {} directories",total,files.len(),directories.len());
        Ok(Self {
            base,
            total,
            root_sector: arena[0].sector - base,
            root_size: arena[0].size,
            created,
            directories,
            files,
            extents
        })
    }
    pub fn total_sectors(&self) -> u32 {
        self.total
    }
    pub fn base_sector(&self) -> u32 {
        self.base
    }
    /// root directory sector, relative to the base
    pub fn root_sector(&self) -> u32 {
        self.root_sector
    }
    pub fn root_size(&self) -> u32 {
        self.root_size
    }
    /// Stream the image sectors in order to `put`.
    /// Sectors before the base and sectors that hold nothing are filled with 0xFF.
    pub fn write_sectors(&self,put: &mut dyn FnMut(&Sector) -> STDRESULT,progress: &mut dyn FnMut(f32)) -> STDRESULT {
        let magic = self.base + volume::MAGIC_SECTOR;
        let descriptor = quantize_sector(&VolumeDescriptor::create(self.root_sector,self.root_size,self.created).to_bytes(),0);
        let empty: Sector = [FILL;SECTOR_SIZE];
        let mut ext_idx = 0;
        let mut reader: Option<BufReader<File>> = None;
        for s in 0..self.total {
            if s % PROGRESS_INTERVAL == 0 {
                progress(s as f32 / self.total as f32);
            }
            if s < self.base {
                put(&empty)?;
                continue;
            }
            if s==magic {
                put(&descriptor)?;
                continue;
            }
            while ext_idx < self.extents.len() && self.extents[ext_idx].end <= s {
                ext_idx += 1;
            }
            let ext = match self.extents.get(ext_idx) {
                Some(e) if e.start <= s => e,
                _ => {
                    put(&empty)?;
                    continue;
                }
            };
            match ext.content {
                Content::Directory(idx) => {
                    let offset = (s - ext.start) as usize * SECTOR_SIZE;
                    put(&quantize_sector(&self.directories[idx][offset..],FILL))?;
                },
                Content::File(idx) => {
                    let file = &self.files[idx];
                    if s==ext.start {
                        trace!("writing {}",file.path.display());
                        reader = Some(BufReader::new(File::open(&file.path)?));
                    }
                    let offset = (s - ext.start) as usize * SECTOR_SIZE;
                    let n = usize::min(SECTOR_SIZE,file.size as usize - offset);
                    let mut buf: Sector = [0;SECTOR_SIZE];
                    match reader.as_mut() {
                        Some(r) => r.read_exact(&mut buf[0..n])?,
                        None => return Err(Box::new(Error::FileNotFound))
                    }
                    put(&buf)?;
                }
            }
        }
        progress(1.0);
        Ok(())
    }
}

#[cfg(test)]
fn test_folder() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    std::fs::write(dir.path().join("default.xbe"),vec![0x58;5000]).expect("write failed");
    std::fs::write(dir.path().join("empty.txt"),b"").expect("write failed");
    std::fs::create_dir_all(dir.path().join("media").join("sounds")).expect("mkdir failed");
    std::fs::write(dir.path().join("media").join("a.bin"),vec![1;0x20*SECTOR_SIZE]).expect("write failed");
    dir
}

#[test]
fn test_plan_layout() {
    let dir = test_folder();
    let plan = ImagePlan::create(dir.path(),&BuildOptions::default()).expect("plan failed");
    // three directories follow the descriptor
    assert_eq!(plan.root_sector(),0x21);
    assert_eq!(plan.extents.iter().filter(|e| matches!(e.content,Content::Directory(_))).count(),3);
    // the largest file fills the gap before the descriptor
    let big = plan.extents.iter().find(|e| e.end - e.start==0x20).expect("no big file");
    assert_eq!(big.start,0);
    // the next file goes past the directories
    let small = plan.extents.iter().find(|e| e.end - e.start==3).expect("no small file");
    assert_eq!(small.start,0x24);
    assert_eq!(plan.total_sectors(),0x27);
}

#[test]
fn test_stream() {
    let dir = test_folder();
    let opt = BuildOptions { base_sector: 0x10, created: None, fixed_root: None };
    let plan = ImagePlan::create(dir.path(),&opt).expect("plan failed");
    let mut sectors: Vec<Sector> = Vec::new();
    let mut last = 0.0;
    plan.write_sectors(&mut |s| { sectors.push(*s); Ok(()) },&mut |p| { assert!(p >= last); last = p; }).expect("write failed");
    assert_eq!(last,1.0);
    assert_eq!(sectors.len(),plan.total_sectors() as usize);
    assert!(sectors[0].iter().all(|b| *b==0xff));
    let desc = VolumeDescriptor::from_bytes(&sectors[0x30]).expect("bad descriptor");
    assert!(desc.verify());
    assert_eq!(desc.root_sector(),plan.root_sector());
    let root = &sectors[(0x10 + plan.root_sector()) as usize];
    let xbe = directory::find_entry(root,"DEFAULT.XBE").expect("bad root").expect("not found");
    assert_eq!(xbe.size,5000);
    let data = &sectors[(0x10 + xbe.sector) as usize + 2];
    assert!(data[0..5000-2*SECTOR_SIZE].iter().all(|b| *b==0x58));
    assert!(data[5000-2*SECTOR_SIZE..].iter().all(|b| *b==0));
}

#[test]
fn test_fixed_root() {
    let dir = test_folder();
    let opt = BuildOptions { base_sector: 0x10, created: None, fixed_root: Some(0x40) };
    let plan = ImagePlan::create(dir.path(),&opt).expect("plan failed");
    assert_eq!(plan.root_sector(),0x40);
    // nothing else lands on the root
    let root_abs = 0x10 + 0x40;
    for e in plan.extents.iter().filter(|e| !matches!(e.content,Content::Directory(0))) {
        assert!(e.end <= root_abs || e.start > root_abs);
    }
    let mut sectors: Vec<Sector> = Vec::new();
    plan.write_sectors(&mut |s| { sectors.push(*s); Ok(()) },&mut |_p| {}).expect("write failed");
    let desc = VolumeDescriptor::from_bytes(&sectors[0x30]).expect("bad descriptor");
    assert!(desc.verify());
    assert_eq!(desc.root_sector(),0x40);
    let root = &sectors[root_abs as usize];
    let media = directory::find_entry(root,"media").expect("bad root").expect("not found");
    assert!(media.is_dir());
    let xbe = directory::find_entry(root,"default.xbe").expect("bad root").expect("not found");
    assert!(sectors[(0x10 + xbe.sector) as usize].iter().all(|b| *b==0x58));
    // the descriptor cannot be displaced
    let opt = BuildOptions { base_sector: 0x10, created: None, fixed_root: Some(0x20) };
    assert!(ImagePlan::create(dir.path(),&opt).is_err());
}
