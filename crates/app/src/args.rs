pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dcache")]
#[command(about = "Distributed, eventually-consistent fact store")]
pub struct Args {
    /// Path to the dcache directory (defaults to ~/.dcache)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
