use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

mod cli;
mod util;
mod cmd_format;
mod cmd_status;
mod cmd_check;
mod cmd_read;
mod cmd_write;

fn init_logger() {
    // RUST_LOG wins; default is info. Example: RUST_LOG=virt_cow=debug virtcow write ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Format { dev, create } =>
            cmd_format::exec(dev, create),

        cli::Cmd::Status { dev, json } =>
            cmd_status::exec(dev, json),

        cli::Cmd::Check { dev } =>
            cmd_check::exec(dev),

        cli::Cmd::Read { dev, sector, count, out } =>
            cmd_read::exec(dev, sector, count, out),

        cli::Cmd::Write { dev, sector, count, fill, input } =>
            cmd_write::exec(dev, sector, count, fill, input),
    }
}
