//! # Conversion Pipeline
//!
//! Re-encodes a mounted container, or builds a host folder, into a raw or compressed image.
//! Containers can be cut down on the way:
//! * the video partition ahead of the game partition can be stripped
//! * sectors that hold no file system data can be scrubbed to 0xFF, the video partition is kept
//! * the output can be trimmed after the last sector that holds data
//!
//! Any output can be split into numbered parts once a byte threshold is reached, see `sink`.
//! Progress is reported as a fraction that never decreases and ends at 1.0.

pub mod sink;

use std::path::{Path,PathBuf};
use log::{debug,info};
use crate::fs::xdvdfs::ContainerReader;
use crate::fs::xdvdfs::build::{BuildOptions,ImagePlan};
use crate::img::{DiskImageType,SECTOR_SIZE};
use crate::DYNERR;

const FILL: u8 = 0xff;
/// sectors between progress reports
const PROGRESS_INTERVAL: u32 = 256;

/// Enumerates conversion errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("target image type cannot be written")]
    UnsupportedTarget,
    #[error("split size is too small")]
    SplitSize
}

#[derive(Clone,Copy,Debug,Default)]
pub struct ConvertFlags {
    /// start the output at the game partition
    pub strip_video_partition: bool,
    /// fill sectors that hold no data with 0xFF
    pub scrub: bool,
    /// end the output after the last sector that holds data
    pub trim: bool
}

#[derive(Clone,Debug)]
pub struct ConvertOptions {
    pub target: DiskImageType,
    /// maximum bytes per output file
    pub split_size: Option<u64>,
    pub flags: ConvertFlags
}

impl ConvertOptions {
    pub fn new(target: DiskImageType) -> Self {
        Self {
            target,
            split_size: None,
            flags: ConvertFlags::default()
        }
    }
}

/// Round a sector count up to an even number
fn round_up_even(n: u32) -> u32 {
    n + n % 2
}

/// Convert the container at `source` to `dest`, returns the paths that were written.
pub fn convert_container(source: &Path,dest: &Path,opt: &ConvertOptions,progress: &mut dyn FnMut(f32)) -> Result<Vec<PathBuf>,DYNERR> {
    let mut reader = ContainerReader::new(source);
    let mount = reader.mount()?;
    let vol = mount.volume_info()?;
    let dec = mount.decoder()?;
    let total = dec.total_sectors();
    let start = match opt.flags.strip_video_partition {
        true => vol.base_sector,
        false => 0
    };
    let data = match opt.flags.scrub || opt.flags.trim {
        true => Some(mount.get_data_sectors()?),
        false => None
    };
    let mut end = total;
    if let (true,Some(bits)) = (opt.flags.trim,&data) {
        if let Some(last) = (0..total).rev().find(|s| bits[*s as usize]) {
            let count = u32::min(round_up_even((last + 1).saturating_sub(start)),total - start);
            end = start + count;
        }
        debug!("trimmed to {} sectors",end - start);
    }
    info!("converting sectors {} to {}",start,end);
    let mut sink = sink::create_sink(dest,opt.target,opt.split_size)?;
    let span = u32::max(end - start,1) as f32;
    let empty = [FILL;SECTOR_SIZE];
    for s in start..end {
        if (s - start) % PROGRESS_INTERVAL == 0 {
            progress((s - start) as f32 / span);
        }
        let scrub = match (opt.flags.scrub,&data) {
            (true,Some(bits)) => !bits[s as usize],
            _ => false
        };
        match scrub {
            true => sink.write_sector(&empty)?,
            false => sink.write_sector(&dec.read_sector(s)?)?
        }
    }
    let ans = sink.finish()?;
    progress(1.0);
    Ok(ans)
}

/// Build a new image from `folder` and write it to `dest`, returns the paths that were written.
/// Only the target and split size are taken from `opt`, the layout comes from `build`.
pub fn convert_folder(folder: &Path,dest: &Path,opt: &ConvertOptions,build: &BuildOptions,progress: &mut dyn FnMut(f32)) -> Result<Vec<PathBuf>,DYNERR> {
    let plan = ImagePlan::create(folder,build)?;
    let mut sink = sink::create_sink(dest,opt.target,opt.split_size)?;
    plan.write_sectors(&mut |sector| sink.write_sector(sector),progress)?;
    sink.finish()
}

#[test]
fn test_round_up_even() {
    assert_eq!(round_up_even(0),0);
    assert_eq!(round_up_even(7),8);
    assert_eq!(round_up_even(8),8);
}
