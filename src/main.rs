mod aggregate;
mod annotate;
mod bolt;
mod cli;
mod command;
mod error;
mod invoke;
mod pack;
mod parse;
mod pool;
mod prepare;
mod regenie;
mod staar;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Bolt(args) => bolt::run(args),
        Command::Regenie(args) => regenie::run(args),
        Command::Staar(args) => staar::run(args),
        Command::MaskFiles(args) => prepare::run_mask_files(args),
        Command::FilterDosage(args) => prepare::run_filter_dosage(args),
    }
}
