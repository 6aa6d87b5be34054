use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Fetch and list the direct dependencies of a NuGet package version",
    long_about = None
)]
pub struct Cli {
    /// Path to the JSON config file.
    #[arg(value_name = "CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Write a default config file when CONFIG does not exist, then use it.
    #[arg(long = "create-default")]
    pub create_default: bool,

    /// Also print the dependency list as JSON to stdout.
    #[arg(long = "print-json")]
    pub print_json: bool,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG is honoured as well.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
