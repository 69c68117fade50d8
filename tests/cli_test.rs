use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use std::process::Command; // Run programs
use std::path::Path;

fn make_folder(root: &Path) {
    std::fs::create_dir_all(root.join("media")).expect("mkdir failed");
    std::fs::write(root.join("default.xbe"),b"XBEH and some more bytes").expect("write failed");
    std::fs::write(root.join("media").join("intro.bik"),vec![9;5000]).expect("write failed");
}

#[test]
fn build_then_read() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let src = dir.path().join("src");
    make_folder(&src);
    let img = dir.path().join("game.xiso");
    Command::cargo_bin("xgdkit")?
        .arg("build").arg("-f").arg(&src).arg("-o").arg(&img)
        .assert()
        .success()
        .stderr(predicate::str::contains("wrote"));

    Command::cargo_bin("xgdkit")?
        .arg("catalog").arg("-d").arg(&img)
        .assert()
        .success()
        .stdout(predicate::str::contains("media/intro.bik"))
        .stdout(predicate::str::contains("2 files, 1 directories"));

    Command::cargo_bin("xgdkit")?
        .arg("info").arg("-d").arg(&img).arg("--indent").arg("2")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"volume\": \"stripped\""));

    Command::cargo_bin("xgdkit")?
        .arg("get-default").arg("-d").arg(&img)
        .assert()
        .success()
        .stdout("XBEH and some more bytes");

    Command::cargo_bin("xgdkit")?
        .arg("get").arg("-f").arg("MEDIA/Intro.bik").arg("-d").arg(&img)
        .assert()
        .success()
        .stdout(predicate::function(|out: &[u8]| out.len()==5000 && out.iter().all(|b| *b==9)));

    Command::cargo_bin("xgdkit")?
        .arg("sector").arg("-s").arg("32").arg("-d").arg(&img).arg("--console")
        .assert()
        .success()
        .stdout(predicate::str::contains("MICROSOFT*XBOX*M"));

    let out = dir.path().join("out");
    Command::cargo_bin("xgdkit")?
        .arg("extract").arg("-d").arg(&img).arg("-o").arg(&out)
        .assert()
        .success();
    assert_eq!(std::fs::read(out.join("media").join("intro.bik"))?,vec![9;5000]);
    Ok(())
}

#[test]
fn convert_to_cci() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let src = dir.path().join("src");
    make_folder(&src);
    let img = dir.path().join("game.iso");
    Command::cargo_bin("xgdkit")?
        .arg("build").arg("-f").arg(&src).arg("-o").arg(&img)
        .assert()
        .success();
    let cci = dir.path().join("game.cci");
    Command::cargo_bin("xgdkit")?
        .arg("convert").arg("-d").arg(&img).arg("-o").arg(&cci).arg("-t").arg("cci").arg("--scrub").arg("--trim")
        .assert()
        .success();
    Command::cargo_bin("xgdkit")?
        .arg("ls").arg("-d").arg(&cci)
        .assert()
        .success()
        .stdout(predicate::str::contains("default.xbe"));
    Ok(())
}

#[test]
fn bad_inputs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let bogus = dir.path().join("bogus.iso");
    std::fs::write(&bogus,vec![0;4096])?;
    Command::cargo_bin("xgdkit")?
        .arg("catalog").arg("-d").arg(&bogus)
        .assert()
        .failure();
    Command::cargo_bin("xgdkit")?
        .arg("sector").arg("-s").arg("2").arg("-d").arg(&bogus)
        .assert()
        .failure();
    Command::cargo_bin("xgdkit")?
        .arg("convert").arg("-d").arg(&bogus).arg("-o").arg(dir.path().join("x.iso")).arg("-t").arg("god")
        .assert()
        .failure()
        .stderr(predicate::str::contains("god"));
    Command::cargo_bin("xgdkit")?
        .arg("build").arg("-f").arg(dir.path()).arg("-o").arg(dir.path().join("x.iso")).arg("--split").arg("100")
        .assert()
        .failure();
    Ok(())
}

#[test]
fn zero_split_writes_one_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let src = dir.path().join("src");
    make_folder(&src);
    let img = dir.path().join("game.iso");
    Command::cargo_bin("xgdkit")?
        .arg("build").arg("-f").arg(&src).arg("-o").arg(&img).arg("--split").arg("0")
        .assert()
        .success();
    assert!(img.exists());
    assert!(!dir.path().join("game.1.iso").exists());
    let copy = dir.path().join("copy.iso");
    Command::cargo_bin("xgdkit")?
        .arg("convert").arg("-d").arg(&img).arg("-o").arg(&copy).arg("--split").arg("0")
        .assert()
        .success();
    assert_eq!(std::fs::read(&img)?,std::fs::read(&copy)?);
    Ok(())
}
