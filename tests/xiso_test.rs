// test of building, mounting, and extracting raw images
use std::path::Path;
use xgdkit::convert::{self,ConvertOptions};
use xgdkit::fs::xdvdfs::build::BuildOptions;
use xgdkit::fs::xdvdfs::{ContainerReader,DefaultExecutable};
use xgdkit::img::{DiskImageType,SectorDecoder};

fn make_folder(root: &Path) {
    std::fs::create_dir_all(root.join("media").join("music")).expect("mkdir failed");
    std::fs::create_dir_all(root.join("empty")).expect("mkdir failed");
    std::fs::write(root.join("default.xbe"),vec![0x42;10000]).expect("write failed");
    std::fs::write(root.join("a"),b"first").expect("write failed");
    std::fs::write(root.join("b"),vec![7;2048]).expect("write failed");
    std::fs::write(root.join("c"),b"").expect("write failed");
    std::fs::write(root.join("media").join("Title.png"),(0..50000).map(|i| (i%251) as u8).collect::<Vec<u8>>()).expect("write failed");
    std::fs::write(root.join("media").join("music").join("track01.wma"),vec![3;70000]).expect("write failed");
}

fn compare_trees(expected: &Path,actual: &Path) {
    for entry in std::fs::read_dir(expected).expect("read dir failed") {
        let entry = entry.expect("bad entry");
        let other = actual.join(entry.file_name());
        if entry.path().is_dir() {
            assert!(other.is_dir(),"missing {}",other.display());
            compare_trees(&entry.path(),&other);
        } else {
            let a = std::fs::read(entry.path()).expect("read failed");
            let b = std::fs::read(&other).expect("missing extracted file");
            assert_eq!(a,b,"{} differs",other.display());
        }
    }
}

fn build(src: &Path,dest: &Path,target: DiskImageType) {
    let opt = ConvertOptions::new(target);
    let mut last = 0.0;
    convert::convert_folder(src,dest,&opt,&BuildOptions::default(),&mut |p| {
        assert!(p >= last);
        last = p;
    }).expect("build failed");
    assert_eq!(last,1.0);
}

#[test]
fn build_and_extract() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    make_folder(&src);
    let img = dir.path().join("game.iso");
    build(&src,&img,DiskImageType::ISO);
    let reader = xgdkit::open_container(&img).expect("mount failed");
    assert_eq!(reader.mount_count(),1);
    let out = dir.path().join("out");
    let mut visited = Vec::new();
    reader.extract_all(&out,&mut |p| visited.push(p.to_string())).expect("extract failed");
    compare_trees(&src,&out);
    assert!(out.join("empty").is_dir());
    // each directory comes before its contents
    let media = visited.iter().position(|p| p=="media").expect("media not visited");
    let music = visited.iter().position(|p| p=="media/music").expect("music not visited");
    let track = visited.iter().position(|p| p=="media/music/track01.wma").expect("track not visited");
    assert!(media < music && music < track);
    assert_eq!(visited.len(),9);
}

#[test]
fn three_files() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    std::fs::create_dir(&src).expect("mkdir failed");
    for (name,len) in [("a",1),("b",2049),("c",0)] {
        std::fs::write(src.join(name),vec![name.as_bytes()[0];len]).expect("write failed");
    }
    let img = dir.path().join("abc.xiso");
    build(&src,&img,DiskImageType::ISO);
    let reader = xgdkit::open_container(&img).expect("mount failed");
    let vol = reader.volume_info().expect("no volume");
    assert_eq!(vol.base_sector,0);
    assert_eq!(vol.root_sector,0x21);
    assert_eq!(vol.root_size,48);
    let cat = reader.catalog().expect("catalog failed");
    let names: Vec<&str> = cat.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(names,vec!["b","a","c"]);
    // the largest file goes first, at the start of the partition
    assert_eq!(cat[0].sector,0);
    assert_eq!(cat[1].sector,2);
    assert_eq!(reader.read_file("B").expect("read failed"),vec![b'b';2049]);
    assert_eq!(reader.read_file("c").expect("read failed").len(),0);
    assert!(reader.read_file("d").is_err());
    assert!(reader.get_default().is_err());
    let data = reader.get_data_sectors().expect("scan failed");
    assert!(data[0] && data[1] && data[2]);
    assert!(!data[3]);
    assert!(data[0x20] && data[0x21]);
}

#[test]
fn default_executable() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    make_folder(&src);
    std::fs::rename(src.join("default.xbe"),src.join("DEFAULT.XEX")).expect("rename failed");
    let img = dir.path().join("game.iso");
    build(&src,&img,DiskImageType::ISO);
    let reader = xgdkit::open_container(&img).expect("mount failed");
    let (kind,dat) = reader.get_default().expect("no default");
    assert_eq!(kind,DefaultExecutable::Xex);
    assert_eq!(dat,vec![0x42;10000]);
    let meta = reader.get_metadata(Some(2)).expect("no metadata");
    let parsed = json::parse(&meta).expect("bad json");
    assert_eq!(parsed["xdvdfs"]["volume"],"stripped");
    assert_eq!(parsed["iso"]["total_sectors"].as_u32(),Some(reader.decoder().expect("no decoder").total_sectors()));
}

#[test]
fn mount_counting() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    make_folder(&src);
    let img = dir.path().join("game.iso");
    build(&src,&img,DiskImageType::ISO);
    let mut reader = ContainerReader::new(&img);
    assert!(reader.catalog().is_err());
    assert!(reader.try_mount());
    assert!(reader.try_mount());
    assert_eq!(reader.mount_count(),2);
    reader.dismount();
    assert!(reader.catalog().is_ok());
    reader.dismount();
    reader.dismount();
    assert_eq!(reader.mount_count(),0);
    assert!(reader.get_data_sectors().is_err());
    {
        let mounted = reader.mount().expect("mount failed");
        assert_eq!(mounted.mount_count(),1);
        assert!(mounted.catalog().is_ok());
    }
    assert!(!reader.is_mounted());
    // not an image
    std::fs::write(dir.path().join("junk.iso"),vec![0;4096]).expect("write failed");
    let mut junk = ContainerReader::new(&dir.path().join("junk.iso"));
    assert!(!junk.try_mount());
    assert!(xgdkit::open_container(&dir.path().join("missing.iso")).is_err());
}

#[test]
fn self_linked_entry() {
    let dir = tempfile::tempdir().expect("could not create temp dir");
    let src = dir.path().join("src");
    std::fs::create_dir(&src).expect("mkdir failed");
    std::fs::write(src.join("a"),b"aaa").expect("write failed");
    std::fs::write(src.join("b"),b"bbb").expect("write failed");
    let img = dir.path().join("loop.iso");
    build(&src,&img,DiskImageType::ISO);
    // `b` is at word 0 and `a` at word 4, point the left link of `a` back at itself
    let mut raw = std::fs::read(&img).expect("read failed");
    let link = 0x21*2048 + 16;
    raw[link..link+2].copy_from_slice(&[4,0]);
    std::fs::write(&img,&raw).expect("write failed");
    let (tx,rx) = std::sync::mpsc::channel();
    let path = img.clone();
    std::thread::spawn(move || {
        let reader = xgdkit::open_container(&path).expect("mount failed");
        let names: Vec<String> = reader.catalog().expect("catalog failed").into_iter().map(|c| c.path).collect();
        let data = reader.get_data_sectors().expect("scan failed");
        let out = path.with_extension("out");
        reader.extract_all(&out,&mut |_p| {}).expect("extract failed");
        tx.send((names,data.len())).expect("send failed");
    });
    let (names,sectors) = rx.recv_timeout(std::time::Duration::from_secs(20)).expect("walk did not terminate");
    assert_eq!(names,vec!["b","a"]);
    assert_eq!(sectors,raw.len()/2048);
}
