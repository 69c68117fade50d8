//! # Command Line Interface
//!
//! The command line is built in `cli.rs`, the subcommands are run from the `commands` module.

mod cli;

use env_logger;
use log::error;
use xgdkit::commands;

fn main() -> Result<(),Box<dyn std::error::Error>>
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let matches = cli::build_cli().get_matches();

    let res = match matches.subcommand() {
        Some(("info",cmd)) => commands::stat::info(cmd),
        Some(("catalog",cmd)) => commands::stat::catalog(cmd),
        Some(("sector",cmd)) => commands::stat::sector(cmd),
        Some(("get",cmd)) => commands::get::get(cmd),
        Some(("get-default",cmd)) => commands::get::get_default(cmd),
        Some(("extract",cmd)) => commands::get::extract(cmd),
        Some(("convert",cmd)) => commands::convert::convert(cmd),
        Some(("build",cmd)) => commands::convert::build(cmd),
        _ => {
            error!("No subcommand was found, try `xgdkit --help`");
            Err(Box::new(commands::CommandError::InvalidCommand) as Box<dyn std::error::Error>)
        }
    };
    res
}
