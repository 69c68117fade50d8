use clap;
use std::io::Write;
use std::path::Path;
use log::error;
use crate::STDRESULT;

pub fn info(cmd: &clap::ArgMatches) -> STDRESULT {
    let img_path = super::required(cmd,"dimg")?;
    let reader = crate::open_container(Path::new(img_path))?;
    println!("{}",reader.get_metadata(cmd.get_one::<u16>("indent").copied())?);
    return Ok(());
}

pub fn catalog(cmd: &clap::ArgMatches) -> STDRESULT {
    let img_path = super::required(cmd,"dimg")?;
    let reader = crate::open_container(Path::new(img_path))?;
    let rows = reader.catalog()?;
    let mut files = 0;
    let mut dirs = 0;
    for row in rows {
        match row.is_dir {
            true => dirs += 1,
            false => files += 1
        }
        println!("{} {:8X} {:10} {}",match row.is_dir { true => "D", false => "F" },row.sector,row.size,row.path);
    }
    println!();
    println!("{} files, {} directories",files,dirs);
    return Ok(());
}

pub fn sector(cmd: &clap::ArgMatches) -> STDRESULT {
    let img_path = super::required(cmd,"dimg")?;
    let index = match cmd.get_one::<u32>("sector") {
        Some(i) => *i,
        None => return Err(Box::new(super::CommandError::InvalidCommand))
    };
    let decoder = crate::create_decoder_from_file(Path::new(img_path))?;
    if index >= decoder.total_sectors() {
        error!("sector {} is out of range, image has {}",index,decoder.total_sectors());
        return Err(Box::new(super::CommandError::OutOfRange));
    }
    let dat = decoder.read_sector(index)?;
    if cmd.get_flag("console") {
        crate::display_block(index as usize * crate::img::SECTOR_SIZE,&dat);
    } else {
        std::io::stdout().write_all(&dat)?;
    }
    return Ok(());
}
