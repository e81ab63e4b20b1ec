use std::time::Duration;

/// Streaming-channel lifecycle transition, published for diagnostics.
///
/// Published on a broadcast channel; a slow or absent listener never holds
/// up the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Opening a socket. `attempt` counts every open since startup.
    Connecting { attempt: u64 },
    /// `connection_ack` received.
    Connected,
    /// The socket went away, for any reason.
    Closed { code: Option<u16>, reason: String },
    /// Waiting before the next attempt after an unexpected close.
    Reconnecting { failures: u32, delay: Duration },
    /// Torn down because the credential changed.
    Invalidated,
}
