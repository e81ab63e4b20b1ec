use std::ops::Range;
use std::time::Duration;

use url::Url;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request/response endpoint (`http(s)://.../v1/graphql`).
    pub graphql_url: String,
    /// Streaming endpoint (`ws(s)://.../v1/graphql`).
    pub ws_url: String,
    /// Deadline for the streaming socket to open and acknowledge
    /// `connection_init`.
    pub connect_timeout: Duration,
    /// Deadline for one request/response round trip.
    pub request_timeout: Duration,
    /// First reconnect delay; doubled on every consecutive failure.
    pub reconnect_base_delay: Duration,
    /// Upper bound for the exponential part of the reconnect delay.
    pub reconnect_max_delay: Duration,
    /// Simulated responder "thinking" time, drawn uniformly from this range.
    pub thinking_delay: Range<Duration>,
    /// Chat list previews longer than this many characters are truncated.
    pub preview_chars: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            graphql_url: String::new(),
            ws_url: String::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            thinking_delay: Duration::from_millis(1000)..Duration::from_millis(3000),
            preview_chars: 50,
        }
    }
}

impl ClientConfig {
    pub fn new(graphql_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            graphql_url: graphql_url.into(),
            ws_url: ws_url.into(),
            ..Self::default()
        }
    }

    /// Check endpoints and ranges. Called once at startup; a client never
    /// runs with an unvalidated config.
    pub fn validate(&self) -> Result<(), String> {
        check_endpoint("graphql_url", &self.graphql_url, &["http", "https"])?;
        check_endpoint("ws_url", &self.ws_url, &["ws", "wss"])?;
        if self.thinking_delay.start >= self.thinking_delay.end {
            return Err("thinking delay range is empty".to_string());
        }
        if self.reconnect_base_delay > self.reconnect_max_delay {
            return Err("reconnect base delay exceeds max delay".to_string());
        }
        if self.preview_chars == 0 {
            return Err("preview length must be positive".to_string());
        }
        Ok(())
    }
}

fn check_endpoint(name: &str, value: &str, schemes: &[&str]) -> Result<(), String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{name} is not set"));
    }
    let url = Url::parse(trimmed).map_err(|e| format!("{name} is not a valid url: {e}"))?;
    if !schemes.contains(&url.scheme()) {
        return Err(format!(
            "{name} must use {} scheme, got {}",
            schemes.join(" or "),
            url.scheme()
        ));
    }
    Ok(())
}
