mod args;
mod backup;
mod parse;
mod storage;

use std::fmt::Display;

use clap::{
    builder::{styling::AnsiColor, Styles},
    Parser, Subcommand,
};
use log::error;
use serde::Serialize;

use crate::{error::Result, logger};

use self::args::{BackupArgs, GlobalArgs};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None, propagate_version = true, styles = cli_styles())]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up a data directory into containers in storage
    Backup(BackupArgs),
}

impl Command {
    fn global(&self) -> &GlobalArgs {
        match self {
            Command::Backup(args) => &args.global,
        }
    }
}

pub async fn main() {
    let cli = Cli::parse();
    init_logger(cli.command.global());

    let result = match cli.command {
        Command::Backup(args) => backup::main(args).await,
    };

    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }
}

fn init_logger(args: &GlobalArgs) {
    let level = logger::level_from_args(args.logger.verbose, args.logger.quiet);
    logger::init(level, args.logger.color.into());
}

fn print_stat<T: Display>(name: &str, value: T) {
    let style = AnsiColor::Cyan.on_default();
    println!("{style}{name}:{style:#} {value}");
}

fn print_stats_json<T: Serialize>(stats: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(stats)?;
    println!("{json}");
    Ok(())
}

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightMagenta.on_default())
        .usage(AnsiColor::BrightMagenta.on_default())
        .literal(AnsiColor::BrightBlue.on_default())
        .placeholder(AnsiColor::BrightCyan.on_default())
}
