//! # File System Module
//!
//! File system modules handle interactions with directories and files.  The Xbox disc carries
//! a single file system, here called XDVDFS, found in the `xdvdfs` sub-module.
//!
//! The file system takes ownership of some `img::SectorDecoder`, which it uses as storage.
//! All addresses handed to the decoder are absolute sector indices; addresses found inside
//! the file system are relative to the start of the game partition and are shifted by the
//! partition's base sector before use.
//!
//! Image construction is also handled here, since the layout of a new image is determined
//! entirely by the file system's directory and allocation rules.

pub mod xdvdfs;

/// Enumerates file system errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("operation requires a mounted container")]
    NotMounted,
    #[error("file system not compatible with request")]
    FileSystemMismatch,
    #[error("directory entry is outside its buffer")]
    EntryBounds,
    #[error("file not found")]
    FileNotFound,
    #[error("directory is too large to be indexed")]
    DirectoryTooLarge,
    #[error("bad file name")]
    BadName,
    #[error("file is too large for the file system")]
    FileTooLarge,
    #[error("sector allocation conflict")]
    AllocationConflict
}
