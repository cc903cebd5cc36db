use clap::Parser;

use plotter_zenoh_runtime::config::{log_filter, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .init(); // installs the subscriber globally

    if let Err(e) = plotter_zenoh_runtime::runtime::run(cli).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
