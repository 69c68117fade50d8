// test of the conversion pipeline
use std::io::{Seek,SeekFrom,Write};
use std::path::Path;
use xgdkit::convert::{self,ConvertOptions,ConvertFlags};
use xgdkit::fs::xdvdfs::build::BuildOptions;
use xgdkit::fs::xdvdfs::volume::VolumeKind;
use xgdkit::img::{DiskImageType,SECTOR_SIZE};

fn make_folder(root: &Path) {
    std::fs::create_dir_all(root.join("sub")).expect("mkdir failed");
    std::fs::write(root.join("default.xbe"),vec![0x42;5000]).expect("write failed");
    std::fs::write(root.join("sub").join("data.bin"),vec![0x24;3*SECTOR_SIZE+1]).expect("write failed");
}

fn build(src: &Path,dest: &Path,base: u32) -> u32 {
    let opt = BuildOptions { base_sector: base, ..BuildOptions::default() };
    convert::convert_folder(src,dest,&ConvertOptions::new(DiskImageType::ISO),&opt,&mut |_p| {}).expect("build failed");
    (std::fs::metadata(dest).expect("missing image").len() / SECTOR_SIZE as u64) as u32
}

fn convert_with(src: &Path,dest: &Path,flags: ConvertFlags) -> Vec<u8> {
    let mut opt = ConvertOptions::new(DiskImageType::ISO);
    opt.flags = flags;
    let mut last = 0.0;
    convert::convert_container(src,dest,&opt,&mut |p| {
        assert!(p >= last);
        last = p;
    }).expect("convert failed");
    assert_eq!(last,1.0);
    std::fs::read(dest).expect("read failed")
}

fn append_garbage(path: &Path,count: usize) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).expect("open failed");
    file.write_all(&vec![0x5a;count*SECTOR_SIZE]).expect("write failed");
}

#[test]
fn trim_and_scrub() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    make_folder(&src);
    let img = dir.path().join("game.iso");
    let used = build(&src,&img,0);
    let original = std::fs::read(&img).expect("read failed");
    append_garbage(&img,5);

    let trimmed = convert_with(&img,&dir.path().join("trim.iso"),ConvertFlags { trim: true, ..ConvertFlags::default() });
    let expected = (used + used % 2) as usize;
    assert_eq!(trimmed.len(),expected*SECTOR_SIZE);
    assert!(trimmed[0..original.len()]==original[..]);

    let scrubbed = convert_with(&img,&dir.path().join("scrub.iso"),ConvertFlags { scrub: true, ..ConvertFlags::default() });
    assert_eq!(scrubbed.len(),(used as usize + 5)*SECTOR_SIZE);
    assert!(scrubbed[0..original.len()]==original[..]);
    assert!(scrubbed[original.len()..].iter().all(|b| *b==0xff));

    let plain = convert_with(&img,&dir.path().join("plain.iso"),ConvertFlags::default());
    assert!(plain[original.len()..].iter().all(|b| *b==0x5a));
}

#[test]
fn strip_video_partition() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    make_folder(&src);
    let img = dir.path().join("game.iso");
    let base = 0x4100;
    let total = build(&src,&img,base);
    {
        let mut file = std::fs::OpenOptions::new().write(true).open(&img).expect("open failed");
        file.seek(SeekFrom::Start(5*SECTOR_SIZE as u64)).expect("seek failed");
        file.write_all(&[0x5a;SECTOR_SIZE]).expect("write failed");
    }
    let reader = xgdkit::open_container(&img).expect("mount failed");
    assert_eq!(reader.volume_info().expect("no volume").kind,VolumeKind::XGD3);
    drop(reader);

    let out = dir.path().join("stripped.iso");
    let stripped = convert_with(&img,&out,ConvertFlags { strip_video_partition: true, scrub: true, trim: false });
    assert_eq!(stripped.len(),(total - base) as usize * SECTOR_SIZE);
    let reader = xgdkit::open_container(&out).expect("mount failed");
    let vol = reader.volume_info().expect("no volume");
    assert_eq!(vol.kind,VolumeKind::Stripped);
    assert_eq!(vol.base_sector,0);
    assert_eq!(reader.read_file("sub/data.bin").expect("read failed"),vec![0x24;3*SECTOR_SIZE+1]);

    // scrub without strip keeps exactly the data sectors, the video partition counts as data
    let source = std::fs::read(&img).expect("read failed");
    let data = xgdkit::open_container(&img).expect("mount failed").get_data_sectors().expect("no data map");
    assert_eq!(data.len(),total as usize);
    assert!(data.iter().take(base as usize).all(|b| b));
    let scrubbed = convert_with(&img,&dir.path().join("scrub.iso"),ConvertFlags { scrub: true, ..ConvertFlags::default() });
    assert_eq!(scrubbed.len(),total as usize * SECTOR_SIZE);
    for (s,used) in data.iter().enumerate() {
        let range = s*SECTOR_SIZE..(s+1)*SECTOR_SIZE;
        match used {
            true => assert!(scrubbed[range.clone()]==source[range]),
            false => assert!(scrubbed[range].iter().all(|b| *b==0xff))
        }
    }
    assert!(scrubbed[5*SECTOR_SIZE..6*SECTOR_SIZE].iter().all(|b| *b==0x5a));
}

#[test]
fn split_output() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    make_folder(&src);
    let img = dir.path().join("game.iso");
    let total = build(&src,&img,0);
    let whole = std::fs::read(&img).expect("read failed");
    let mut opt = ConvertOptions::new(DiskImageType::ISO);
    opt.split_size = Some(8*SECTOR_SIZE as u64);
    let parts = convert::convert_container(&img,&dir.path().join("split.iso"),&opt,&mut |_p| {}).expect("convert failed");
    assert_eq!(parts.len(),(total as usize + 7) / 8);
    let mut joined = Vec::new();
    for p in &parts {
        joined.append(&mut std::fs::read(p).expect("read failed"));
    }
    assert!(joined==whole);
    let reader = xgdkit::open_container(&parts[0]).expect("mount failed");
    assert_eq!(reader.read_file("DEFAULT.XBE").expect("read failed"),vec![0x42;5000]);
    // too small to be useful
    opt.split_size = Some(100);
    assert!(convert::convert_container(&img,&dir.path().join("tiny.iso"),&opt,&mut |_p| {}).is_err());
}
