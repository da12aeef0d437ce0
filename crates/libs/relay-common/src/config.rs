//! Layered configuration for Relay: defaults, config files, then environment
//! overrides, 12-factor style. Mirrors the load order of a deployed service
//! where `KV_URL`/`KV_TOKEN`/`REMOTE_HOST_TOKEN`/`CRON_SECRET` come from the
//! environment and everything else has a sane default.

use config::{Config, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub kv: KvConfig,
    pub remote: RemoteConfig,
    pub cron: CronConfig,
    pub request: RequestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub log_format_json: bool,
    /// Canonical repository URL the agent adapter rewrites every request to.
    /// A deployment concern (see spec.md §9 Open Questions), not applied
    /// unless explicitly configured.
    #[serde(default)]
    pub canonical_repo_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KvConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RemoteConfig {
    /// `REMOTE_HOST_TOKEN`. Optional; increases the remote host's rate quota
    /// when present.
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CronConfig {
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RequestConfig {
    #[serde(default = "default_request_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_graph_build_deadline_ms")]
    pub graph_build_deadline_ms: u64,
}

fn default_request_deadline_ms() -> u64 {
    5_000
}

fn default_graph_build_deadline_ms() -> u64 {
    30_000
}

impl RelayConfig {
    /// Loads configuration. `KV_URL`, `KV_TOKEN`, and `CRON_SECRET` must each
    /// resolve to a non-empty value or this returns an error — the caller
    /// should exit nonzero on failure, per spec.md §6.10.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8787)?
            .set_default("server.log_format_json", false)?
            .set_default("request.deadline_ms", 5_000i64)?
            .set_default("request.graph_build_deadline_ms", 30_000i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false));

        if let Ok(port) = env::var("PORT") {
            if let Ok(p) = port.parse::<i64>() {
                builder = builder.set_override("server.port", p)?;
            }
        }
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }
        if let Ok(val) = env::var("RELAY_LOG_FORMAT") {
            builder = builder.set_override("server.log_format_json", val.eq_ignore_ascii_case("json"))?;
        }
        if let Ok(url) = env::var("KV_URL") {
            builder = builder.set_override("kv.url", url)?;
        }
        if let Ok(token) = env::var("KV_TOKEN") {
            builder = builder.set_override("kv.token", token)?;
        }
        if let Ok(token) = env::var("REMOTE_HOST_TOKEN") {
            builder = builder.set_override("remote.token", token)?;
        }
        if let Ok(secret) = env::var("CRON_SECRET") {
            builder = builder.set_override("cron.secret", secret)?;
        }
        if let Ok(url) = env::var("RELAY_CANONICAL_REPO_URL") {
            builder = builder.set_override("server.canonical_repo_url", url)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;

        if cfg.kv.url.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "KV_URL is required".to_string(),
            ));
        }
        if cfg.kv.token.as_deref().unwrap_or("").trim().is_empty() {
            return Err(config::ConfigError::Message(
                "KV_TOKEN is required".to_string(),
            ));
        }
        if cfg.cron.secret.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "CRON_SECRET is required".to_string(),
            ));
        }

        Ok(cfg)
    }
}
