// test of compressed images
use std::path::Path;
use xgdkit::convert::{self,ConvertOptions};
use xgdkit::fs::xdvdfs::build::BuildOptions;
use xgdkit::img::{DiskImageType,SectorDecoder};
use xgdkit::img::cci::Cci;

fn make_folder(root: &Path) {
    std::fs::create_dir_all(root.join("data")).expect("mkdir failed");
    std::fs::write(root.join("default.xbe"),vec![0x11;9000]).expect("write failed");
    // mix of compressible and incompressible content
    let mut x: u32 = 7;
    let noise: Vec<u8> = (0..30000).map(|_| {
        x = x.wrapping_mul(1103515245).wrapping_add(12345);
        (x >> 16) as u8
    }).collect();
    std::fs::write(root.join("data").join("noise.bin"),noise).expect("write failed");
    std::fs::write(root.join("data").join("zeros.bin"),vec![0;40000]).expect("write failed");
}

fn build(src: &Path,dest: &Path,target: DiskImageType,split: Option<u64>) -> Vec<std::path::PathBuf> {
    let mut opt = ConvertOptions::new(target);
    opt.split_size = split;
    convert::convert_folder(src,dest,&opt,&BuildOptions::default(),&mut |_p| {}).expect("build failed")
}

#[test]
fn same_sectors_as_raw() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    make_folder(&src);
    let mut opt = BuildOptions::default();
    opt.created = chrono::NaiveDate::from_ymd_opt(2005,11,22).and_then(|d| d.and_hms_opt(12,0,0));
    let iso = dir.path().join("game.iso");
    let cci = dir.path().join("game.cci");
    convert::convert_folder(&src,&iso,&ConvertOptions::new(DiskImageType::ISO),&opt,&mut |_p| {}).expect("build failed");
    convert::convert_folder(&src,&cci,&ConvertOptions::new(DiskImageType::CCI),&opt,&mut |_p| {}).expect("build failed");
    let raw = std::fs::read(&iso).expect("read failed");
    let dec = Cci::open(&cci).expect("open failed");
    assert_eq!(dec.what_am_i(),DiskImageType::CCI);
    assert_eq!(dec.total_sectors() as usize * 2048,raw.len());
    let all = dec.read_sectors(0,dec.total_sectors()).expect("read failed");
    assert!(all==raw);
    assert!(std::fs::metadata(&cci).expect("missing").len() < raw.len() as u64);
}

#[test]
fn extract_from_cci() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    make_folder(&src);
    let img = dir.path().join("game.cci");
    assert_eq!(build(&src,&img,DiskImageType::CCI,None),vec![img.clone()]);
    let reader = xgdkit::open_container(&img).expect("mount failed");
    let out = dir.path().join("out");
    reader.extract_all(&out,&mut |_p| {}).expect("extract failed");
    for name in ["default.xbe","data/noise.bin","data/zeros.bin"] {
        assert_eq!(std::fs::read(src.join(name)).expect("read failed"),std::fs::read(out.join(name)).expect("read failed"));
    }
    let (_,xbe) = reader.get_default().expect("no default");
    assert_eq!(xbe.len(),9000);
}

#[test]
fn split_cci() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    make_folder(&src);
    let img = dir.path().join("game.cci");
    let parts = build(&src,&img,DiskImageType::CCI,Some(16384));
    assert!(parts.len() > 1);
    assert_eq!(parts[0],dir.path().join("game.1.cci"));
    for p in &parts {
        assert!(std::fs::metadata(p).expect("missing part").len() <= 16384);
    }
    let reader = xgdkit::open_container(&parts[0]).expect("mount failed");
    assert_eq!(reader.read_file("data/noise.bin").expect("read failed"),std::fs::read(src.join("data").join("noise.bin")).expect("read failed"));
}
