//! `relay-http` binary entrypoint — loads configuration and runs the request
//! plane directly, with no CLI surface. Intended for container deployments
//! where `serve` is the only thing that ever runs; `relay-cli` is the place
//! for the administrative subcommands.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = relay_common::RelayConfig::load()?;
    relay_common::tracing::setup_tracing(config.server.log_format_json);

    relay_server::run(config).await?;
    Ok(())
}
