mod args;
mod op;
mod ops;
mod process;
mod state;

use args::Args;
use clap::{Parser, Subcommand};
use op::Op;
use ops::{Export, Init, Query, Run, Summary, Version};

command_enum! {
    (Export, Export),
    (Init, Init),
    (Query, Query),
    (Run, Run),
    (Summary, Summary),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let ctx = op::OpContext::new(args.config_path);

    match args.command.execute(&ctx).await {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_renders_op_output() {
        let ctx = op::OpContext::new(None);
        let output = Command::Version(Version).execute(&ctx).await.unwrap();
        assert!(output.starts_with("dcache "));
        assert!(output.ends_with(&format!("(storage v{})", common::store::STORAGE_VERSION)));
    }
}
