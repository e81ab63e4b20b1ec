mod app;
mod input;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use parlor_core::{ClientConfig, ParlorConfig, SharedCredentials, TransportSession};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .with_writer(std::io::stderr)
        .init();

    let config = load_config()?;
    tracing::info!(
        graphql_url = %config.graphql_url,
        ws_url = %config.ws_url,
        "starting"
    );

    let token = env::var("PARLOR_ACCESS_TOKEN")
        .ok()
        .filter(|t| !t.is_empty());
    if token.is_none() {
        tracing::warn!("PARLOR_ACCESS_TOKEN not set; requests go out unauthenticated");
    }
    let credentials = Arc::new(SharedCredentials::new(token));
    let session = Arc::new(TransportSession::new(&config, credentials.clone())?);

    let result = app::run(config, session.clone(), credentials).await;
    session.shutdown();
    result
}

/// Defaults, then `config.toml`, then environment.
fn load_config() -> Result<ClientConfig, String> {
    let mut config = ParlorConfig::load()?.to_client_config();
    if let Ok(url) = env::var("PARLOR_GRAPHQL_URL") {
        config.graphql_url = url;
    }
    if let Ok(url) = env::var("PARLOR_WS_URL") {
        config.ws_url = url;
    }
    config.connect_timeout = parse_duration("PARLOR_CONNECT_TIMEOUT_SECS", config.connect_timeout);
    config.validate()?;
    Ok(config)
}

fn parse_duration(key: &str, default: Duration) -> Duration {
    let Ok(raw) = env::var(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, ?default, "ignoring invalid duration");
            default
        }
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("PARLOR_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("PARLOR_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("parlor_core=debug,parlor=debug");
    }
    tracing_subscriber::EnvFilter::new("parlor_core=info,parlor=info")
}
