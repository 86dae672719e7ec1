mod catalog;
mod cli;
mod discovery;
mod error;
mod logging;
mod model;
mod orchestrator;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_interactive = args.is_interactive();

    if is_interactive {
        let path = args
            .log_file
            .clone()
            .unwrap_or_else(logging::default_log_path);
        logging::init_file(&path);
    } else {
        logging::init_stderr();
    }

    match cli::run(args).await {
        Ok(code) => {
            // Non-TUI modes exit explicitly so the child's code is propagated.
            if !is_interactive || code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}
