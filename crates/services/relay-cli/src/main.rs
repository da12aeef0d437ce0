//! `relay-cli` binary entrypoint — thin wrapper around [`relay_cli::run_cli`].

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relay_cli::run_cli().await
}
