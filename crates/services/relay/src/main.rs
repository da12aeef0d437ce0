//! `relay` binary entrypoint — the published command name, wrapping
//! `relay-cli`'s subcommands.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relay_cli::run_cli().await
}
