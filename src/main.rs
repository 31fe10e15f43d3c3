use anyhow::Result;
use clap::Parser;

use semsearch::cli::SubCommandExtend;
use semsearch::config::{Opts, SubCommand};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let opts = Opts::parse();
    std::fs::create_dir_all(opts.conf_dir.path())?;

    match &opts.subcmd {
        SubCommand::Add(cmd) => cmd.run(&opts).await,
        SubCommand::Index(cmd) => cmd.run(&opts).await,
        SubCommand::Search(cmd) => cmd.run(&opts).await,
        SubCommand::Prototype(cmd) => cmd.run(&opts).await,
        SubCommand::Tag(cmd) => cmd.run(&opts).await,
        SubCommand::Show(cmd) => cmd.run(&opts).await,
        SubCommand::Clean(cmd) => cmd.run(&opts).await,
    }
}
