//! Kiln CLI: pipeline automation over SSH.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    version,
    about = "Pipeline automation: typed expressions, per-host sessions, code regeneration"
)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: kiln::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    kiln::core::log::init(cli.verbose);
    if let Err(e) = kiln::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
