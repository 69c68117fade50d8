// test of games on demand containers
use std::path::{Path,PathBuf};
use xgdkit::convert::{self,ConvertOptions};
use xgdkit::fs::xdvdfs::build::BuildOptions;
use xgdkit::img::{DiskImageType,SectorDecoder,SECTOR_SIZE};
use xgdkit::img::god;

/// Descriptor for the plain layout with `block_count` blocks starting at block 0
fn descriptor(block_count: u32,data_files: u32) -> Vec<u8> {
    let mut ans = vec![0u8;0x971a];
    ans[0..4].copy_from_slice(b"LIVE");
    ans[0x344..0x348].copy_from_slice(&god::CONTENT_TYPE_GAMES_ON_DEMAND.to_be_bytes());
    ans[0x379] = god::DESCRIPTOR_SIZE;
    ans[0x392..0x395].copy_from_slice(&block_count.to_le_bytes()[0..3]);
    ans[0x39d..0x3a1].copy_from_slice(&data_files.to_be_bytes());
    ans[0x3a9..0x3ad].copy_from_slice(&god::DESCRIPTOR_TYPE_SVOD.to_be_bytes());
    ans
}

/// Scatter a small raw image into a GOD container, returns the descriptor path
fn make_god(iso: &Path,dest_dir: &Path) -> PathBuf {
    let raw = std::fs::read(iso).expect("read failed");
    let sectors = raw.len() / SECTOR_SIZE;
    assert!(sectors < god::SECTORS_PER_BLOCK as usize);
    let desc = dest_dir.join("4D5307E6");
    std::fs::write(&desc,descriptor((sectors as u32 + 1) / 2,1)).expect("write failed");
    std::fs::create_dir(god::data_dir(&desc)).expect("mkdir failed");
    let mut data = vec![0u8;0x2000 + god::SECTORS_PER_BLOCK as usize * SECTOR_SIZE];
    for s in 0..sectors {
        let offset = 0x2000 + s * SECTOR_SIZE;
        data[offset..offset+SECTOR_SIZE].copy_from_slice(&raw[s*SECTOR_SIZE..(s+1)*SECTOR_SIZE]);
    }
    std::fs::write(god::data_dir(&desc).join(god::data_file_name(0)),data).expect("write failed");
    desc
}

fn make_folder(root: &Path) {
    std::fs::create_dir_all(root.join("maps")).expect("mkdir failed");
    std::fs::write(root.join("default.xex"),vec![0x58;6000]).expect("write failed");
    std::fs::write(root.join("maps").join("level1.map"),(0..20000).map(|i| (i%7) as u8).collect::<Vec<u8>>()).expect("write failed");
    std::fs::write(root.join("readme.txt"),b"hello").expect("write failed");
}

#[test]
fn extract_from_god() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    make_folder(&src);
    let iso = dir.path().join("game.iso");
    convert::convert_folder(&src,&iso,&ConvertOptions::new(DiskImageType::ISO),&BuildOptions::default(),&mut |_p| {}).expect("build failed");
    let desc = make_god(&iso,dir.path());
    assert!(god::is_god(&desc));
    let reader = xgdkit::open_container(&desc).expect("mount failed");
    let dec = reader.decoder().expect("no decoder");
    assert_eq!(dec.what_am_i(),DiskImageType::GOD);
    let out = dir.path().join("out");
    reader.extract_all(&out,&mut |_p| {}).expect("extract failed");
    for name in ["default.xex","maps/level1.map","readme.txt"] {
        assert_eq!(std::fs::read(src.join(name)).expect("read failed"),std::fs::read(out.join(name)).expect("read failed"));
    }
    let (kind,_) = reader.get_default().expect("no default");
    assert_eq!(kind.file_name(),"default.xex");
}

#[test]
fn convert_god_to_iso() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    make_folder(&src);
    let iso = dir.path().join("game.iso");
    convert::convert_folder(&src,&iso,&ConvertOptions::new(DiskImageType::ISO),&BuildOptions::default(),&mut |_p| {}).expect("build failed");
    let desc = make_god(&iso,dir.path());
    let out = dir.path().join("copy.iso");
    convert::convert_container(&desc,&out,&ConvertOptions::new(DiskImageType::ISO),&mut |_p| {}).expect("convert failed");
    let a = std::fs::read(&iso).expect("read failed");
    let b = std::fs::read(&out).expect("read failed");
    assert!(b.len() >= a.len());
    assert!(a[..]==b[0..a.len()]);
}

#[test]
fn missing_data_file() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let desc = dir.path().join("4D5307E6");
    std::fs::write(&desc,descriptor(0x20,2)).expect("write failed");
    std::fs::create_dir(god::data_dir(&desc)).expect("mkdir failed");
    std::fs::write(god::data_dir(&desc).join(god::data_file_name(0)),vec![0;0x4000]).expect("write failed");
    assert!(god::God::open(&desc).is_err());
    assert!(xgdkit::open_container(&desc).is_err());
    // cannot be a target
    let out = dir.path().join("x.god");
    assert!(xgdkit::convert::sink::create_sink(&out,DiskImageType::GOD,None).is_err());
}
