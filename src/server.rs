//! Connection handling glue (spec §4.8, §1).
//!
//! Mirrors a classic `read_task`/`vfs_task`/`stream_writer` split:
//! one task drains decoded requests off the wire and hands them to a
//! processing task over an mpsc channel, a second task runs them
//! through the [`Dispatcher`], and replies go back out over a third
//! channel. The byte-level framing that would sit in front of the
//! first channel and behind the last is the external wire codec (spec
//! §1); this module is the part of the split that belongs to the
//! control plane.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dispatch::{Connection, Dispatcher};
use crate::object_client::ObjectClient;
use crate::peer::Peer;
use crate::wire::message::{Request, Response, Tag};

pub type InboundSender = mpsc::UnboundedSender<(Tag, Request)>;
pub type InboundReceiver = mpsc::UnboundedReceiver<(Tag, Request)>;
pub type OutboundSender = mpsc::UnboundedSender<(Tag, Response)>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<(Tag, Response)>;

/// Runs one connection's request/response loop until the inbound
/// channel closes. Spawned once per accepted socket by whatever owns
/// the byte-level transport.
pub struct ConnectionTask<C: ObjectClient, P: Peer> {
    dispatcher: Arc<Dispatcher<C, P>>,
    inbound: InboundReceiver,
    outbound: OutboundSender,
}

impl<C: ObjectClient + 'static, P: Peer + 'static> ConnectionTask<C, P> {
    pub fn spawn(dispatcher: Arc<Dispatcher<C, P>>, inbound: InboundReceiver, outbound: OutboundSender) -> JoinHandle<()> {
        tokio::spawn(Self { dispatcher, inbound, outbound }.run())
    }

    async fn run(mut self) {
        let mut conn = self.dispatcher.new_connection();
        while let Some((tag, req)) = self.inbound.recv().await {
            let resp = self.dispatcher.dispatch(&mut conn, tag, req).await;
            if self.outbound.send((tag, resp)).is_err() {
                tracing::debug!("outbound channel closed, dropping remaining replies");
                return;
            }
        }
    }
}

/// Convenience constructor pairing a fresh channel set with a spawned
/// [`ConnectionTask`], for transports that want to own the inbound
/// sender and outbound receiver directly.
pub fn spawn_connection<C: ObjectClient + 'static, P: Peer + 'static>(
    dispatcher: Arc<Dispatcher<C, P>>,
) -> (InboundSender, OutboundReceiver, JoinHandle<()>) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let handle = ConnectionTask::spawn(dispatcher, in_rx, out_tx);
    (in_tx, out_rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_client::mock::MockObjectClient;
    use crate::peer::mock::MockPeer;
    use crate::wire::message::CLIENT_VERSION;
    use crate::wire::Address;

    #[tokio::test]
    async fn connection_task_round_trips_a_version_request() {
        let dispatcher = Arc::new(Dispatcher::new(
            MockObjectClient::new(),
            MockPeer::default(),
            Address { ip: 1, port: 9922 },
            8192,
        ));
        let (inbound, mut outbound, _handle) = spawn_connection(dispatcher);

        inbound
            .send((1, Request::Version { msize: 4096, version: CLIENT_VERSION.to_string() }))
            .unwrap();

        let (tag, resp) = outbound.recv().await.unwrap();
        assert_eq!(tag, 1);
        assert!(matches!(resp, Response::Version { .. }));
    }
}
