// SerBridge - Serial-port-to-network gateway
use clap::Parser;
use serbridge::cli::args::Args;
use serbridge::cli::commands::execute_command;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = execute_command(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
