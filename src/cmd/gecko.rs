use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;

use crate::config::ProjectConfig;

#[derive(FromArgs, PartialEq, Debug)]
/// Emits the patch set as a Gecko code text file.
#[argh(subcommand, name = "gecko")]
pub struct Args {
    #[argh(positional)]
    /// path to project config
    config: PathBuf,
    #[argh(option, short = 'o')]
    /// path to output Gecko text file
    out: PathBuf,
    #[argh(switch)]
    /// remove intermediate build products afterwards
    cleanup: bool,
}

pub fn run(args: Args) -> Result<()> {
    let config = ProjectConfig::load(&args.config)?;
    let mut project = config.into_project()?;
    project.build_gecko(&args.out)?;
    if args.cleanup {
        project.cleanup();
    }
    Ok(())
}
