//! ## Sector allocator
//!
//! Hands out sector ranges for a new image.  All sectors here are absolute,
//! i.e., they include the partition base.
//!
//! Files prefer the gap between the base and the volume descriptor, and otherwise go
//! after the descriptor.  Directories go into a region that starts right after the descriptor.
//! The descriptor sector is never handed out, and no two ranges overlap.

use log::{trace,debug,error};
use crate::fs::Error;
use crate::fs::xdvdfs::volume::MAGIC_SECTOR;
use crate::{DYNERR,STDRESULT};

pub struct SectorAllocator {
    base: u32,
    magic: u32,
    /// sorted and disjoint, `(start,end)` with `end` exclusive
    occupied: Vec<(u32,u32)>,
    /// `(next,end)` of the reserved directory region
    dir_region: Option<(u32,u32)>
}

impl SectorAllocator {
    pub fn new(base: u32) -> Self {
        let magic = base + MAGIC_SECTOR;
        Self {
            base,
            magic,
            occupied: vec![(magic,magic+1)],
            dir_region: None
        }
    }
    pub fn magic_sector(&self) -> u32 {
        self.magic
    }
    /// One past the last sector that has been handed out
    pub fn end(&self) -> u32 {
        self.occupied.iter().map(|(_,e)| *e).max().unwrap_or(self.magic+1)
    }
    fn overlaps(&self,start: u32,end: u32) -> bool {
        self.occupied.iter().any(|(s,e)| start < *e && *s < end)
    }
    fn insert(&mut self,start: u32,end: u32) {
        let pos = self.occupied.iter().position(|(s,_)| *s > start).unwrap_or(self.occupied.len());
        self.occupied.insert(pos,(start,end));
    }
    /// lowest start >= `from` where `n` sectors fit, and that end at or before `limit`
    fn first_fit(&self,from: u32,n: u32,limit: Option<u32>) -> Option<u32> {
        let mut cand = from as u64;
        for (s,e) in &self.occupied {
            if (*e as u64) <= cand {
                continue;
            }
            if (*s as u64) >= cand + n as u64 {
                break;
            }
            cand = *e as u64;
        }
        let lim = match limit {
            Some(l) => l as u64,
            None => u32::MAX as u64
        };
        match cand + n as u64 <= lim {
            true => Some(cand as u32),
            false => None
        }
    }
    /// Reserve a specific range for the root directory, before anything else is allocated.
    pub fn reserve_fixed(&mut self,start: u32,n: u32) -> STDRESULT {
        let end = match start.checked_add(n) {
            Some(e) => e,
            None => return Err(Box::new(Error::AllocationConflict))
        };
        if start < self.base || self.overlaps(start,end) {
            error!("fixed range {:X}..{:X} conflicts with the layout",start,end);
            return Err(Box::new(Error::AllocationConflict));
        }
        debug!("fixed range {:X}..{:X}",start,end);
        self.insert(start,end);
        Ok(())
    }
    /// Set aside `n` sectors for directories, as close after the descriptor as possible.
    pub fn reserve_directory_region(&mut self,n: u32) -> Result<u32,DYNERR> {
        let start = match self.first_fit(self.magic+1,n,None) {
            Some(s) => s,
            None => return Err(Box::new(Error::AllocationConflict))
        };
        debug!("directory region {:X}..{:X}",start,start+n);
        if n > 0 {
            self.insert(start,start+n);
        }
        self.dir_region = Some((start,start+n));
        Ok(start)
    }
    /// Allocate `n` sectors for a file, returns the absolute start sector.
    /// Empty files are given the base sector and occupy nothing.
    pub fn allocate_file_sectors(&mut self,n: u32) -> Result<u32,DYNERR> {
        if n==0 {
            return Ok(self.base);
        }
        let start = match self.first_fit(self.base,n,Some(self.magic)) {
            Some(s) => s,
            None => match self.first_fit(self.magic+1,n,None) {
                Some(s) => s,
                None => return Err(Box::new(Error::AllocationConflict))
            }
        };
        trace!("file sectors {:X}..{:X}",start,start+n);
        self.insert(start,start+n);
        Ok(start)
    }
    /// Allocate `n` sectors for a directory, taking from the reserved region while it lasts.
    pub fn allocate_directory_sectors(&mut self,n: u32) -> Result<u32,DYNERR> {
        if let Some((next,end)) = self.dir_region {
            if next as u64 + n as u64 <= end as u64 {
                self.dir_region = Some((next+n,end));
                trace!("directory sectors {:X}..{:X} from region",next,next+n);
                return Ok(next);
            }
        }
        let start = match self.first_fit(self.magic+1,n,None) {
            Some(s) => s,
            None => return Err(Box::new(Error::AllocationConflict))
        };
        trace!("directory sectors {:X}..{:X}",start,start+n);
        self.insert(start,start+n);
        Ok(start)
    }
}

#[test]
fn test_gap_then_past_magic() {
    let mut alloc = SectorAllocator::new(0);
    assert_eq!(alloc.reserve_directory_region(2).expect("reserve failed"),0x21);
    assert_eq!(alloc.allocate_file_sectors(0x18).expect("alloc failed"),0);
    assert_eq!(alloc.allocate_file_sectors(0x10).expect("alloc failed"),0x23);
    assert_eq!(alloc.allocate_file_sectors(8).expect("alloc failed"),0x18);
    assert_eq!(alloc.allocate_file_sectors(0).expect("alloc failed"),0);
    assert_eq!(alloc.allocate_directory_sectors(1).expect("alloc failed"),0x21);
    assert_eq!(alloc.allocate_directory_sectors(1).expect("alloc failed"),0x22);
    assert_eq!(alloc.allocate_directory_sectors(1).expect("alloc failed"),0x33);
    assert_eq!(alloc.end(),0x34);
}

#[test]
fn test_fixed_root() {
    let mut alloc = SectorAllocator::new(0x100);
    assert!(alloc.reserve_fixed(0x110,0x20).is_err());
    alloc.reserve_fixed(0x130,2).expect("reserve failed");
    assert_eq!(alloc.reserve_directory_region(3).expect("reserve failed"),0x121);
    assert_eq!(alloc.allocate_file_sectors(0x30).expect("alloc failed"),0x132);
}

#[test]
fn test_random_requests_never_overlap() {
    let mut seed: u32 = 12345;
    let mut next = |m: u32| -> u32 {
        seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
        (seed >> 16) % m
    };
    for base in [0,0x4100] {
        let mut alloc = SectorAllocator::new(base);
        alloc.reserve_directory_region(next(5)).expect("reserve failed");
        let mut ranges: Vec<(u32,u32)> = Vec::new();
        for _i in 0..200 {
            let (start,len) = match next(3) {
                0 => {
                    let n = next(40) + 1;
                    (alloc.allocate_directory_sectors(n).expect("alloc failed"),n)
                },
                _ => {
                    let n = next(40);
                    (alloc.allocate_file_sectors(n).expect("alloc failed"),n)
                }
            };
            if len > 0 {
                ranges.push((start,start+len));
            }
        }
        let magic = base + MAGIC_SECTOR;
        for (i,(s,e)) in ranges.iter().enumerate() {
            assert!(*s >= base);
            assert!(!(magic >= *s && magic < *e));
            for (s2,e2) in &ranges[i+1..] {
                assert!(e <= s2 || e2 <= s,"{:X}..{:X} overlaps {:X}..{:X}",s,e,s2,e2);
            }
        }
    }
}
