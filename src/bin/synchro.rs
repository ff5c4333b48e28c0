/// Synchro CLI
///
/// Runs, checks and inspects activity programs against the simulated device.

use synchro_core::cli;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
