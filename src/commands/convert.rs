use clap;
use std::path::{Path,PathBuf};
use std::str::FromStr;
use log::error;
use crate::convert::{ConvertOptions,ConvertFlags};
use crate::fs::xdvdfs::build::BuildOptions;
use crate::img::DiskImageType;
use crate::{STDRESULT,DYNERR};

fn options(cmd: &clap::ArgMatches) -> Result<ConvertOptions,DYNERR> {
    let target = match DiskImageType::from_str(super::required(cmd,"type")?) {
        Ok(DiskImageType::GOD) | Err(_) => {
            error!("only iso and cci images can be written");
            return Err(Box::new(super::CommandError::UnsupportedFormat));
        },
        Ok(t) => t
    };
    let mut ans = ConvertOptions::new(target);
    ans.split_size = cmd.get_one::<u64>("split").copied().filter(|sz| *sz > 0);
    Ok(ans)
}

fn report(paths: Vec<PathBuf>) {
    for p in paths {
        eprintln!("wrote {}",p.display());
    }
}

pub fn convert(cmd: &clap::ArgMatches) -> STDRESULT {
    let img_path = super::required(cmd,"dimg")?;
    let out_path = super::required(cmd,"output")?;
    let mut opt = options(cmd)?;
    opt.flags = ConvertFlags {
        strip_video_partition: cmd.get_flag("strip"),
        scrub: cmd.get_flag("scrub"),
        trim: cmd.get_flag("trim")
    };
    let mut progress = super::progress_logger();
    let paths = crate::convert::convert_container(Path::new(img_path),Path::new(out_path),&opt,&mut progress)?;
    report(paths);
    return Ok(());
}

pub fn build(cmd: &clap::ArgMatches) -> STDRESULT {
    let folder = super::required(cmd,"folder")?;
    let out_path = super::required(cmd,"output")?;
    let opt = options(cmd)?;
    let build_opt = BuildOptions {
        base_sector: cmd.get_one::<u32>("base").copied().unwrap_or(0),
        ..BuildOptions::default()
    };
    let mut progress = super::progress_logger();
    let paths = crate::convert::convert_folder(Path::new(folder),Path::new(out_path),&opt,&build_opt,&mut progress)?;
    report(paths);
    return Ok(());
}
