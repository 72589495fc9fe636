mod cli;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Command::Generate(args) => run::generate(args),
        Command::Precompile(args) => run::precompile(args),
        Command::Keys(args) => run::keys(args),
    }
}
