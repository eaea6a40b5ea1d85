/// Scratchpad CLI
///
/// Runs a script file through the execution coordinator, or prepares it for
/// an external host, from the command line.

use scratchpad_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
