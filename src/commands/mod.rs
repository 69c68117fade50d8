//! # CLI Subcommands
//!
//! Contains modules that run the subcommands.

pub mod stat;
pub mod get;
pub mod convert;

use crate::DYNERR;

#[derive(thiserror::Error,Debug)]
pub enum CommandError {
    #[error("Command could not be interpreted")]
    InvalidCommand,
    #[error("One of the parameters was out of range")]
    OutOfRange,
    #[error("Output type is not supported")]
    UnsupportedFormat
}

/// Get a string argument that clap should already have required
fn required<'a>(cmd: &'a clap::ArgMatches,id: &str) -> Result<&'a String,DYNERR> {
    match cmd.get_one::<String>(id) {
        Some(s) => Ok(s),
        None => {
            log::error!("missing argument `{}`",id);
            Err(Box::new(CommandError::InvalidCommand))
        }
    }
}

/// Log progress at every tenth
fn progress_logger() -> impl FnMut(f32) {
    let mut next = 0.0;
    move |p: f32| {
        if p >= next {
            log::info!("{:.0}% done",p*100.0);
            next = (p*10.0).floor()/10.0 + 0.1;
        }
    }
}
