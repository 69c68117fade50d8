use clap;
use std::io::Write;
use std::path::Path;
use log::{info,error};
use crate::STDRESULT;

pub fn get(cmd: &clap::ArgMatches) -> STDRESULT {
    let img_path = super::required(cmd,"dimg")?;
    let path_in_img = super::required(cmd,"file")?;
    let reader = crate::open_container(Path::new(img_path))?;
    let dat = reader.read_file(path_in_img)?;
    std::io::stdout().write_all(&dat)?;
    return Ok(());
}

pub fn get_default(cmd: &clap::ArgMatches) -> STDRESULT {
    let img_path = super::required(cmd,"dimg")?;
    let reader = crate::open_container(Path::new(img_path))?;
    let (kind,dat) = reader.get_default()?;
    match cmd.get_one::<String>("output") {
        Some(out) => {
            std::fs::write(out,&dat)?;
            eprintln!("wrote {} ({} bytes)",kind.file_name(),dat.len());
        },
        None => std::io::stdout().write_all(&dat)?
    }
    return Ok(());
}

pub fn extract(cmd: &clap::ArgMatches) -> STDRESULT {
    let img_path = super::required(cmd,"dimg")?;
    let dest = super::required(cmd,"output")?;
    let reader = crate::open_container(Path::new(img_path))?;
    let mut count = 0;
    let res = reader.extract_all(Path::new(dest),&mut |path| {
        info!("extracting {}",path);
        count += 1;
    });
    if let Err(e) = res {
        error!("extraction stopped after {} items",count);
        return Err(e);
    }
    eprintln!("extracted {} items",count);
    return Ok(());
}
