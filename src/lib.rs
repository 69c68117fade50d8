//! # `xgdkit` main library
//!
//! This library reads, converts, and rebuilds Xbox game disc images.
//!
//! ## Architecture
//!
//! Disc image operations are built around two layers:
//! * `img::SectorDecoder` translates a logical sector index into 2048 bytes of payload,
//!   it does not try to interpret a file system
//! * `fs::xdvdfs::ContainerReader` imposes the disc's directory file system on a decoder
//!
//! When a `ContainerReader` is mounted it creates and takes ownership of some `SectorDecoder`.
//! The decoder is released again when the last mount is dismounted.
//!
//! Images are built from host folders by `fs::xdvdfs::build`, and whole images are
//! re-encoded by `convert`, which can also scrub, trim, and split the output.
//!
//! ## Disc Images
//!
//! In order to find sectors, `xgdkit` must understand the way the sectors are packed
//! into a disc image.  As of this writing `xgdkit` supports
//! * ISO (raw sector dump, optionally split into numbered parts)
//! * GOD (scattered "games on demand" container with a `.data` directory)
//! * CCI (indexed container with LZ4 compressed sectors, optionally split)
//!
//! ## Volume Kinds
//!
//! The file system is found by probing the known magic sector positions, covering
//! XGD1, XGD2, XGD3, and stripped images that start at the file system itself.

pub mod img;
pub mod fs;
pub mod convert;
pub mod commands;

use std::path::Path;
use log::{info,debug,warn};
use img::SectorDecoder;

type DYNERR = Box<dyn std::error::Error>;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

const KNOWN_FILE_EXTENSIONS: &str = "iso,xiso,cci";

/// Given a path return a sector decoder, or Err if the container cannot be interpreted.
/// The file extension restricts the container types that will be tried, unless it is unknown
/// (GOD descriptors normally have no extension), in which case all types are tried.
/// Detection itself never fails with an error, a mismatch simply moves on to the next type.
pub fn create_decoder_from_file(img_path: &Path) -> Result<Box<dyn SectorDecoder>,DYNERR> {
    let mut ext = match img_path.extension() {
        Some(x) => x.to_string_lossy().to_lowercase(),
        None => "".to_string()
    };
    if !KNOWN_FILE_EXTENSIONS.split(',').any(|x| x==ext) {
        ext = "".to_string();
    }
    if img::cci::file_extensions().contains(&ext) || ext=="" {
        if img::cci::is_cci(img_path) {
            info!("identified CCI container");
            return Ok(Box::new(img::cci::Cci::open(img_path)?));
        }
    }
    if ext=="" {
        if img::god::is_god(img_path) {
            info!("identified GOD container");
            return Ok(Box::new(img::god::God::open(img_path)?));
        }
    }
    if img::iso::file_extensions().contains(&ext) || ext=="" {
        if img::iso::is_iso(img_path) {
            info!("possible ISO image");
            return Ok(Box::new(img::iso::Iso::open(img_path)?));
        }
    }
    debug!("no container type matched {}",img_path.display());
    warn!("cannot match any container format");
    Err(Box::new(img::Error::ImageTypeMismatch))
}

/// Create a reader for the container at `img_path` and mount it.
/// The returned reader has a mount count of 1.
pub fn open_container(img_path: &Path) -> Result<fs::xdvdfs::ContainerReader,DYNERR> {
    let mut reader = fs::xdvdfs::ContainerReader::new(img_path);
    if !reader.try_mount() {
        return Err(Box::new(fs::Error::FileSystemMismatch));
    }
    Ok(reader)
}

/// Display binary to stdout in columns of hex and ascii
pub fn display_block(start_addr: usize,block: &[u8]) {
    let mut slice_start = 0;
    loop {
        let row_label = start_addr + slice_start;
        let mut slice_end = slice_start + 16;
        if slice_end > block.len() {
            slice_end = block.len();
        }
        let slice = block[slice_start..slice_end].to_vec();
        let txt: Vec<u8> = slice.iter().map(|c| match *c {
            x if x<32 => '.' as u8,
            x if x<127 => x,
            _ => '.' as u8
        }).collect();
        print!("{:08X} : ",row_label);
        for byte in slice {
            print!("{:02X} ",byte);
        }
        for _blank in slice_end..slice_start+16 {
            print!("   ");
        }
        println!("| {}",String::from_utf8_lossy(&txt));
        slice_start += 16;
        if slice_end==block.len() {
            break;
        }
    }
}
