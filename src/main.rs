use argh::FromArgs;
use dolkit::cmd;

#[derive(FromArgs, PartialEq, Debug)]
/// GameCube DOL patching toolkit.
struct TopLevel {
    #[argh(subcommand)]
    command: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Build(cmd::build::Args),
    Gecko(cmd::gecko::Args),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: TopLevel = argh::from_env();
    let result = match args.command {
        SubCommand::Build(c_args) => cmd::build::run(c_args),
        SubCommand::Gecko(c_args) => cmd::gecko::run(c_args),
    };
    if let Err(e) = result {
        eprintln!("Failed: {e:?}");
        std::process::exit(1);
    }
}
