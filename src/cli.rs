use clap::{value_parser, crate_version, Arg, ArgAction, Command, ValueHint};

const SPLIT_HELP: &str = "when the output would exceed BYTES it is continued in numbered parts,
e.g., `game.iso` becomes `game.1.iso`, `game.2.iso`, and so on.
BYTES must be at least 4096, or 0 to write a single file";
const DIMG_LONG_HELP: &str = "path to the container, this can be a raw image (iso, xiso),
a compressed image (cci), or the descriptor file of a games on demand container (no extension).
For split images give the first part, e.g., `game.1.iso`";

fn dimg_arg() -> Arg {
    Arg::new("dimg").short('d').long("dimg").help("path to disc image itself")
        .long_help(DIMG_LONG_HELP)
        .value_name("PATH")
        .value_hint(ValueHint::FilePath)
        .required(true)
}

fn output_arg(help: &'static str, req: bool) -> Arg {
    Arg::new("output").short('o').long("output").help(help)
        .value_name("PATH")
        .value_hint(ValueHint::AnyPath)
        .required(req)
}

fn type_arg() -> Arg {
    Arg::new("type").short('t').long("type").help("type of disc image to create")
        .value_name("TYPE")
        .value_parser(["iso","xiso","cci"])
        .required(false)
        .default_value("iso")
}

fn split_arg() -> Arg {
    Arg::new("split").long("split").help("split output into parts of at most BYTES")
        .long_help(SPLIT_HELP)
        .value_name("BYTES")
        .value_parser(value_parser!(u64))
        .required(false)
}

fn indent_arg() -> Arg {
    Arg::new("indent").long("indent").help("JSON indentation, omit to minify")
        .value_name("SPACES")
        .value_parser(value_parser!(u16).range(0..16))
        .required(false)
}

pub fn build_cli() -> Command {
    let long_help = "xgdkit is always invoked with exactly one of several subcommands.
Set RUST_LOG environment variable to control logging level.
  levels: trace,debug,info,warn,error

Examples:
---------
show volume info:      `xgdkit info -d game.iso --indent 2`
list files:            `xgdkit catalog -d game.cci`
extract everything:    `xgdkit extract -d game.iso -o ./game`
shrink an image:       `xgdkit convert -d game.iso -o game.cci -t cci --strip --scrub --trim`
build from a folder:   `xgdkit build -f ./game -o game.xiso --split 4294967295`";

    let mut main_cmd = Command::new("xgdkit")
        .about("Reads, converts, and builds Xbox game disc images.")
        .after_long_help(long_help)
        .version(crate_version!());

    main_cmd = main_cmd.subcommand(
        Command::new("info")
            .arg(dimg_arg())
            .arg(indent_arg())
            .about("write volume metadata to stdout as JSON")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("catalog")
            .arg(dimg_arg())
            .visible_alias("ls")
            .about("write every directory and file in the image to stdout")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("get")
            .arg(Arg::new("file").short('f').long("file").help("path of the file inside the image")
                .value_name("PATH")
                .required(true))
            .arg(dimg_arg())
            .about("read a file from the image, write to stdout")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("sector")
            .arg(Arg::new("sector").short('s').long("sector").help("absolute sector index")
                .value_name("INDEX")
                .value_parser(value_parser!(u32))
                .required(true))
            .arg(dimg_arg())
            .arg(Arg::new("console").long("console").help("format for console unconditionally")
                .action(ArgAction::SetTrue))
            .about("read a sector from the image, write to stdout")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("get-default")
            .arg(dimg_arg())
            .arg(output_arg("file to write, omit to write to stdout",false))
            .about("read the default executable from the image")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("extract")
            .arg(dimg_arg())
            .arg(output_arg("destination folder",true))
            .about("write every directory and file in the image below a folder")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("convert")
            .arg(dimg_arg())
            .arg(output_arg("path of the new image",true))
            .arg(type_arg())
            .arg(split_arg())
            .arg(Arg::new("strip").long("strip").help("remove the video partition").action(ArgAction::SetTrue))
            .arg(Arg::new("scrub").long("scrub").help("fill sectors that hold no data with 0xFF").action(ArgAction::SetTrue))
            .arg(Arg::new("trim").long("trim").help("end the image after the last sector that holds data").action(ArgAction::SetTrue))
            .about("re-encode a disc image")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("build")
            .arg(Arg::new("folder").short('f').long("folder").help("folder to put in the image")
                .value_name("PATH")
                .value_hint(ValueHint::DirPath)
                .required(true))
            .arg(output_arg("path of the new image",true))
            .arg(type_arg())
            .arg(split_arg())
            .arg(Arg::new("base").long("base").help("sector where the game partition starts")
                .value_name("SECTOR")
                .value_parser(value_parser!(u32))
                .required(false)
                .default_value("0"))
            .about("create a disc image from a folder")
    );
    main_cmd
}
