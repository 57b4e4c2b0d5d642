//! ConvertAll background removal CLI

#[cfg(feature = "cli")]
use convertall_bgremove::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<std::process::ExitCode> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(2);
}
