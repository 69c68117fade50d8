//! ## Directory tree codec
//!
//! A directory is a byte buffer spanning whole sectors, holding a binary search tree of entries.
//! Each entry has a fixed header followed by the name, padded to a 4 byte boundary.
//! The child links are word offsets into the same buffer: 0 means no child, and an entry
//! whose left link is 0xFFFF is padding.  Unused bytes are 0xFF.
//!
//! New trees are laid out in pre-order, so the root entry is always at offset 0.
//! No entry is allowed to cross a sector boundary.

use std::cmp::Ordering;
use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use log::{trace,debug,error};
use crate::fs::Error;
use crate::img::SECTOR_SIZE;
use crate::DYNERR;

pub const HEADER_LEN: usize = 14;
pub const PADDING: u16 = 0xffff;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_NORMAL: u8 = 0x20;
pub const MAX_NAME_LEN: usize = 255;
const FILL: u8 = 0xff;

// all numbers are LE
#[derive(DiskStruct)]
pub struct EntryHeader {
    left: [u8;2],
    right: [u8;2],
    sector: [u8;4],
    size: [u8;4],
    attributes: u8,
    name_len: u8
}

/// A decoded directory entry; `sector` is relative to the partition base.
#[derive(Clone,Debug,PartialEq)]
pub struct Entry {
    pub left: u16,
    pub right: u16,
    pub sector: u32,
    pub size: u32,
    pub attributes: u8,
    pub name: String
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.attributes & ATTR_DIRECTORY > 0
    }
}

/// Decode the entry at word offset `offset`.
/// Returns Ok(None) for padding, or `EntryBounds` if the entry does not fit in the buffer.
pub fn parse_entry(buf: &[u8],offset: u16) -> Result<Option<Entry>,DYNERR> {
    let start = offset as usize * 4;
    if start + HEADER_LEN > buf.len() {
        debug!("entry at word {:X} is past the end of the directory",offset);
        return Err(Box::new(Error::EntryBounds));
    }
    let header = EntryHeader::from_bytes(&buf[start..start+HEADER_LEN])?;
    let left = u16::from_le_bytes(header.left);
    if left==PADDING {
        trace!("padding at word {:X}",offset);
        return Ok(None);
    }
    let name_len = header.name_len as usize;
    if name_len==0 || start + HEADER_LEN + name_len > buf.len() {
        debug!("entry at word {:X} has a bad name length {}",offset,name_len);
        return Err(Box::new(Error::EntryBounds));
    }
    let name_bytes = &buf[start+HEADER_LEN..start+HEADER_LEN+name_len];
    Ok(Some(Entry {
        left,
        right: u16::from_le_bytes(header.right),
        sector: u32::from_le_bytes(header.sector),
        size: u32::from_le_bytes(header.size),
        attributes: header.attributes,
        name: String::from_utf8_lossy(name_bytes).to_string()
    }))
}

/// Order names the way the directory tree does, by uppercased bytes.
pub fn compare_names(a: &str,b: &str) -> Ordering {
    let ua = a.bytes().map(|c| c.to_ascii_uppercase());
    let ub = b.bytes().map(|c| c.to_ascii_uppercase());
    ua.cmp(ub)
}

/// Search one directory buffer for `name` by descending the tree.
pub fn find_entry(buf: &[u8],name: &str) -> Result<Option<Entry>,DYNERR> {
    let mut offset: u16 = 0;
    // a well formed tree cannot be deeper than its entry count
    for _step in 0..buf.len()/HEADER_LEN {
        let entry = match parse_entry(buf,offset)? {
            Some(e) => e,
            None => return Ok(None)
        };
        let next = match compare_names(name,&entry.name) {
            Ordering::Equal => return Ok(Some(entry)),
            Ordering::Less => entry.left,
            Ordering::Greater => entry.right
        };
        if next==0 || next==PADDING {
            return Ok(None);
        }
        offset = next;
    }
    debug!("search for {} did not terminate",name);
    Ok(None)
}

/// An entry that is to be written into a new directory.
/// `sector` is relative to the partition base.
#[derive(Clone,Debug)]
pub struct TreeItem {
    pub name: String,
    pub is_dir: bool,
    pub sector: u32,
    pub size: u32
}

impl TreeItem {
    fn encoded_len(&self) -> usize {
        (HEADER_LEN + self.name.len() + 3) & !3
    }
}

pub fn sort_items(items: &mut Vec<TreeItem>) {
    items.sort_by(|a,b| compare_names(&a.name,&b.name));
}

/// Position of one entry in a new directory buffer
struct Placement {
    item: usize,
    pos: usize,
    left: Option<usize>,
    right: Option<usize>
}

fn place(items: &[TreeItem],start: usize,end: usize,offset: &mut usize,out: &mut Vec<Placement>) -> Option<usize> {
    if start>=end {
        return None;
    }
    let mid = (start + end) / 2;
    let len = items[mid].encoded_len();
    if *offset % SECTOR_SIZE + len > SECTOR_SIZE {
        *offset = (*offset + SECTOR_SIZE - 1) / SECTOR_SIZE * SECTOR_SIZE;
    }
    let pos = *offset;
    *offset += len;
    let slot = out.len();
    out.push(Placement { item: mid, pos, left: None, right: None });
    let left = place(items,start,mid,offset,out);
    let right = place(items,mid+1,end,offset,out);
    out[slot].left = left;
    out[slot].right = right;
    Some(pos)
}

/// Lay out sorted items in pre-order, returns the placements and the byte size.
fn layout(items: &[TreeItem]) -> (Vec<Placement>,usize) {
    let mut out = Vec::new();
    let mut offset = 0;
    place(items,0,items.len(),&mut offset,&mut out);
    (out,offset)
}

fn check_name(name: &str) -> Result<(),DYNERR> {
    if name.len()==0 || name.len() > MAX_NAME_LEN {
        error!("name length {} is out of range",name.len());
        return Err(Box::new(Error::BadName));
    }
    Ok(())
}

/// Byte size of the directory that would hold `items`, which need not be sorted.
/// An empty directory still occupies a sector.
pub fn directory_size(items: &[TreeItem]) -> Result<u32,DYNERR> {
    if items.len()==0 {
        return Ok(SECTOR_SIZE as u32);
    }
    for item in items {
        check_name(&item.name)?;
    }
    let mut sorted = items.to_vec();
    sort_items(&mut sorted);
    let (_,size) = layout(&sorted);
    Ok(u32::try_from(size)?)
}

/// Serialize a directory.  The buffer spans whole sectors and its unused bytes are 0xFF.
pub fn build_directory(items: &[TreeItem]) -> Result<Vec<u8>,DYNERR> {
    let size = directory_size(items)? as usize;
    let mut ans = vec![FILL;crate::img::sectors_for(size as u64) as usize * SECTOR_SIZE];
    let mut sorted = items.to_vec();
    sort_items(&mut sorted);
    let (placements,_) = layout(&sorted);
    let word = |pos: Option<usize>| -> Result<u16,DYNERR> {
        match pos {
            None => Ok(0),
            Some(p) if p/4 < PADDING as usize => Ok((p/4) as u16),
            Some(_) => Err(Box::new(Error::DirectoryTooLarge))
        }
    };
    for p in &placements {
        let item = &sorted[p.item];
        let header = EntryHeader {
            left: u16::to_le_bytes(word(p.left)?),
            right: u16::to_le_bytes(word(p.right)?),
            sector: u32::to_le_bytes(item.sector),
            size: u32::to_le_bytes(item.size),
            attributes: match item.is_dir { true => ATTR_DIRECTORY, false => ATTR_NORMAL },
            name_len: item.name.len() as u8
        };
        let hdr = header.to_bytes();
        ans[p.pos..p.pos+HEADER_LEN].copy_from_slice(&hdr);
        ans[p.pos+HEADER_LEN..p.pos+HEADER_LEN+item.name.len()].copy_from_slice(item.name.as_bytes());
        trace!("entry {} at {:X}",item.name,p.pos);
    }
    Ok(ans)
}

#[cfg(test)]
fn in_order(buf: &[u8],offset: u16,names: &mut Vec<String>) {
    if let Some(entry) = parse_entry(buf,offset).expect("bad entry") {
        if entry.left > 0 {
            in_order(buf,entry.left,names);
        }
        names.push(entry.name.clone());
        if entry.right > 0 {
            in_order(buf,entry.right,names);
        }
    }
}

#[test]
fn test_tree_is_ordered() {
    let names = ["readme.txt","Media","default.xbe","a","ZZZ","b.bin","_x","Zeta"];
    let items: Vec<TreeItem> = names.iter().enumerate().map(|(i,n)| TreeItem {
        name: n.to_string(),
        is_dir: i==1,
        sector: 0x100 + i as u32,
        size: 10
    }).collect();
    let buf = build_directory(&items).expect("build failed");
    let mut found = Vec::new();
    in_order(&buf,0,&mut found);
    let mut expected: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    expected.sort_by(|a,b| compare_names(a,b));
    assert_eq!(found,expected);
    let media = find_entry(&buf,"MEDIA").expect("search failed").expect("not found");
    assert!(media.is_dir());
    assert_eq!(media.sector,0x101);
    assert!(find_entry(&buf,"missing").expect("search failed").is_none());
}

#[test]
fn test_root_entry_is_middle() {
    let items: Vec<TreeItem> = ["a","b","c"].iter().map(|n| TreeItem {
        name: n.to_string(), is_dir: false, sector: 0, size: 0
    }).collect();
    let buf = build_directory(&items).expect("build failed");
    let root = parse_entry(&buf,0).expect("bad entry").expect("padding");
    assert_eq!(root.name,"b");
    assert_eq!(root.left,4);
    assert_eq!(root.right,8);
    assert_eq!(directory_size(&items).expect("bad size"),48);
    assert!(buf[48..].iter().all(|b| *b==0xff));
}

#[test]
fn test_entries_do_not_cross_sectors() {
    let items: Vec<TreeItem> = (0..100).map(|i| TreeItem {
        name: format!("{:03}_{}",i,"x".repeat(40)),
        is_dir: false,
        sector: i,
        size: 1
    }).collect();
    let size = directory_size(&items).expect("bad size") as usize;
    assert!(size > SECTOR_SIZE);
    let mut sorted = items.clone();
    sort_items(&mut sorted);
    let (placements,_) = layout(&sorted);
    for p in placements {
        let len = sorted[p.item].encoded_len();
        assert_eq!(p.pos / SECTOR_SIZE,(p.pos + len - 1) / SECTOR_SIZE);
    }
    let buf = build_directory(&items).expect("build failed");
    let mut found = Vec::new();
    in_order(&buf,0,&mut found);
    assert_eq!(found.len(),100);
}

#[test]
fn test_bounds_and_names() {
    assert_eq!(directory_size(&[]).expect("bad size"),2048);
    let buf = build_directory(&[]).expect("build failed");
    assert_eq!(buf,vec![0xff;2048]);
    assert!(parse_entry(&buf,0).expect("bounds").is_none());
    assert!(parse_entry(&buf,512).is_err());
    let bad = TreeItem { name: "".to_string(), is_dir: false, sector: 0, size: 0 };
    assert!(build_directory(&[bad]).is_err());
    let long = TreeItem { name: "n".repeat(256), is_dir: false, sector: 0, size: 0 };
    assert!(directory_size(&[long]).is_err());
}
