//! Cadenza CLI
//!
//! Administrative commands for the SQLite-backed step cache and scheduler:
//! migrations, inspection, and cleanup.

use cadenza_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
