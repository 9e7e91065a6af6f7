use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;

use crate::config::ProjectConfig;

#[derive(FromArgs, PartialEq, Debug)]
/// Builds a patched DOL from a project config.
#[argh(subcommand, name = "build")]
pub struct Args {
    #[argh(positional)]
    /// path to project config
    config: PathBuf,
    #[argh(option, short = 'i')]
    /// path to input DOL
    in_dol: PathBuf,
    #[argh(option, short = 'o')]
    /// path to output DOL
    out_dol: PathBuf,
    #[argh(option, short = 'm')]
    /// path to output symbol map (optional)
    map: Option<PathBuf>,
    #[argh(switch)]
    /// remove intermediate build products afterwards
    cleanup: bool,
}

pub fn run(args: Args) -> Result<()> {
    let config = ProjectConfig::load(&args.config)?;
    let mut project = config.into_project()?;
    project.build_dol(&args.in_dol, &args.out_dol)?;
    if let Some(map_path) = &args.map {
        project.save_map(map_path)?;
    }
    if args.cleanup {
        project.cleanup();
    }
    Ok(())
}
