use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::Stream;
use parlor_protocol::ProtocolError;
use serde_json::Value;
use tokio::sync::mpsc;

use super::streaming::{Command, Delivery};
use crate::error::SyncError;

type Decoder<T> = fn(Option<Value>) -> Result<T, ProtocolError>;

/// A live subscription: a stream of snapshots, each a complete result.
///
/// Dropping the feed unsubscribes it. A feed cannot be restarted; open a
/// new one instead. The stream ends when the server completes the operation
/// or the channel shuts down.
pub struct Feed<T> {
    id: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
    commands: mpsc::UnboundedSender<Command>,
    decode: Decoder<T>,
}

impl<T> Feed<T> {
    pub(crate) fn new(
        id: String,
        rx: mpsc::UnboundedReceiver<Delivery>,
        commands: mpsc::UnboundedSender<Command>,
        decode: Decoder<T>,
    ) -> Self {
        Self {
            id,
            rx,
            commands,
            decode,
        }
    }

    /// Operation id on the streaming channel.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> Stream for Feed<T> {
    type Item = Result<T, SyncError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = match ready!(this.rx.poll_recv(cx)) {
            None => return Poll::Ready(None),
            Some(Err(e)) => Err(e),
            Some(Ok(resp)) if resp.is_error() => Err(SyncError::Operation(resp.errors)),
            Some(Ok(resp)) => (this.decode)(resp.data).map_err(SyncError::from),
        };
        Poll::Ready(Some(item))
    }
}

impl<T> Drop for Feed<T> {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe {
            id: std::mem::take(&mut self.id),
        });
    }
}
