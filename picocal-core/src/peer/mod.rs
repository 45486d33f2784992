//! Opportunistic sync with the paired device.
//!
//! A [`PeerLink`] sits on top of a [`PeerTransport`]. The transport moves raw
//! JSON payloads and reports session events; the link owns the session state
//! machine, validates what arrives, replies, and keeps the union of every
//! timeline the peer has pushed.
//!
//! Reachability is never cached: every send asks the transport at call time.
//! A send to an unreachable peer is dropped, not queued.

mod loopback;
pub mod protocol;
mod tcp;

pub use loopback::LoopbackTransport;
pub use tcp::TcpTransport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::day_flags::DayFlags;
use crate::error::{PicoCalError, PicoCalResult};
use protocol::{PeerReply, PeerRequest, REPLY_RECEIVED, REPLY_UNRECOGNIZED};

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Things a transport reports to its link.
#[derive(Debug)]
pub enum TransportEvent {
    /// Session went inactive; it may come back without intervention.
    BecameInactive,
    /// Session was torn down; the link re-activates it.
    Deactivated,
    ReachabilityChanged(bool),
    /// A payload pushed by the peer. Whatever is sent on `reply` goes back to it.
    Message {
        payload: Value,
        reply: oneshot::Sender<Value>,
    },
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Start (or restart) the session.
    async fn activate(&self) -> PicoCalResult<()>;

    /// Whether the peer can be reached right now.
    async fn is_reachable(&self) -> bool;

    /// Deliver `payload` and wait for the peer's reply.
    async fn send(&self, payload: Value) -> PicoCalResult<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Inactive,
    Activating,
    Active { reachable: bool },
}

/// Transport for a device that has no peer.
pub struct UnpairedTransport {
    _events: mpsc::UnboundedSender<TransportEvent>,
}

impl UnpairedTransport {
    pub fn new() -> (Self, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (UnpairedTransport { _events: tx }, rx)
    }
}

#[async_trait]
impl PeerTransport for UnpairedTransport {
    async fn activate(&self) -> PicoCalResult<()> {
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        false
    }

    async fn send(&self, _payload: Value) -> PicoCalResult<Value> {
        Err(PicoCalError::PeerNotReachable)
    }
}

struct LinkShared {
    transport: Arc<dyn PeerTransport>,
    state: watch::Sender<LinkState>,
    received: watch::Sender<DayFlags>,
}

impl LinkShared {
    async fn activate(&self) {
        self.state.send_replace(LinkState::Activating);
        match self.transport.activate().await {
            Ok(()) => {
                let reachable = self.transport.is_reachable().await;
                info!(reachable, "peer session activated");
                self.state.send_replace(LinkState::Active { reachable });
            }
            Err(e) => {
                warn!(error = %e, "peer session not activated");
                self.state.send_replace(LinkState::Inactive);
            }
        }
    }

    fn handle_incoming(&self, payload: &Value) -> PeerReply {
        match PeerRequest::decode(payload) {
            Ok(PeerRequest::ContributionDays(days)) => {
                debug!(days = days.len(), set = days.count_set(), "received peer timeline");
                self.received.send_modify(|current| *current = current.union(&days));
                PeerReply::Response(REPLY_RECEIVED.to_string())
            }
            Err(e) => {
                warn!(error = %e, "discarding peer message");
                PeerReply::Error(REPLY_UNRECOGNIZED.to_string())
            }
        }
    }

    async fn run(self: Arc<Self>, mut events: TransportEvents) {
        self.activate().await;

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::BecameInactive => {
                    info!("peer session became inactive");
                    self.state.send_replace(LinkState::Inactive);
                }
                TransportEvent::Deactivated => {
                    info!("peer session deactivated, reactivating");
                    self.activate().await;
                }
                TransportEvent::ReachabilityChanged(reachable) => {
                    debug!(reachable, "peer reachability changed");
                    self.state.send_if_modified(|state| match state {
                        LinkState::Active { reachable: r } if *r != reachable => {
                            *r = reachable;
                            true
                        }
                        _ => false,
                    });
                }
                TransportEvent::Message { payload, reply } => {
                    let response = self.handle_incoming(&payload);
                    if reply.send(response.encode()).is_err() {
                        debug!("peer hung up before reply");
                    }
                }
            }
        }

        debug!("peer transport closed");
    }
}

pub struct PeerLink {
    shared: Arc<LinkShared>,
    reply_timeout: Duration,
    task: JoinHandle<()>,
}

impl PeerLink {
    /// Activate `transport` and start answering whatever the peer pushes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        transport: Arc<dyn PeerTransport>,
        events: TransportEvents,
        reply_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(LinkShared {
            transport,
            state: watch::Sender::new(LinkState::Activating),
            received: watch::Sender::new(DayFlags::new()),
        });
        let task = tokio::spawn(shared.clone().run(events));

        PeerLink {
            shared,
            reply_timeout,
            task,
        }
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Wait for the current activation attempt to finish.
    pub async fn settled(&self) -> LinkState {
        let mut rx = self.subscribe_state();
        match rx.wait_for(|state| *state != LinkState::Activating).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Union of every timeline the peer has pushed since the last reset.
    pub fn received(&self) -> DayFlags {
        self.shared.received.borrow().clone()
    }

    pub fn subscribe_received(&self) -> watch::Receiver<DayFlags> {
        self.shared.received.subscribe()
    }

    /// Forget what the peer delivered (new month).
    pub fn reset_received(&self) {
        self.shared.received.send_replace(DayFlags::new());
    }

    /// Push `data` to the peer and wait for its acknowledgement.
    ///
    /// Fails with `PeerNotReachable` without sending if the peer can't be
    /// reached at call time.
    pub async fn send_with_reply(&self, data: &DayFlags) -> PicoCalResult<String> {
        if !matches!(self.state(), LinkState::Active { .. })
            || !self.shared.transport.is_reachable().await
        {
            return Err(PicoCalError::PeerNotReachable);
        }

        let payload = PeerRequest::ContributionDays(data.clone()).encode()?;
        let raw = timeout(self.reply_timeout, self.shared.transport.send(payload))
            .await
            .map_err(|_| PicoCalError::PeerTimeout(self.reply_timeout.as_secs()))??;

        match PeerReply::decode(&raw)? {
            PeerReply::Response(msg) => Ok(msg),
            PeerReply::Error(msg) => Err(PicoCalError::PeerRejected(msg)),
        }
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RefusingTransport;

    #[async_trait]
    impl PeerTransport for RefusingTransport {
        async fn activate(&self) -> PicoCalResult<()> {
            Err(PicoCalError::PeerNotReachable)
        }

        async fn is_reachable(&self) -> bool {
            true
        }

        async fn send(&self, _payload: Value) -> PicoCalResult<Value> {
            Ok(PeerReply::Response(REPLY_RECEIVED.to_string()).encode())
        }
    }

    #[tokio::test]
    async fn test_unpaired_link_is_never_reachable() {
        let (transport, events) = UnpairedTransport::new();
        let link = PeerLink::start(Arc::new(transport), events, DEFAULT_REPLY_TIMEOUT);
        assert_eq!(link.state(), LinkState::Activating);

        let settled = timeout(Duration::from_secs(1), link.settled()).await.unwrap();
        assert_eq!(settled, LinkState::Active { reachable: false });
        let result = link.send_with_reply(&DayFlags::from(vec![true])).await;
        assert!(matches!(result, Err(PicoCalError::PeerNotReachable)));
    }

    #[tokio::test]
    async fn test_failed_activation_leaves_link_inactive() {
        let (_tx, events) = mpsc::unbounded_channel();
        let link = PeerLink::start(Arc::new(RefusingTransport), events, DEFAULT_REPLY_TIMEOUT);

        let settled = timeout(Duration::from_secs(1), link.settled()).await.unwrap();
        assert_eq!(settled, LinkState::Inactive);
        // reachable transport, but no session: nothing is sent
        let result = link.send_with_reply(&DayFlags::from(vec![true])).await;
        assert!(matches!(result, Err(PicoCalError::PeerNotReachable)));
    }

    #[tokio::test]
    async fn test_incoming_arrays_are_unioned() {
        let (_tx, events) = mpsc::unbounded_channel();
        let link = PeerLink::start(Arc::new(RefusingTransport), events, DEFAULT_REPLY_TIMEOUT);
        let shared = &link.shared;

        let first = shared.handle_incoming(&serde_json::json!({ "contributionDays": [true, false] }));
        let second = shared.handle_incoming(&serde_json::json!({ "contributionDays": [false, false, true] }));
        assert_eq!(first, PeerReply::Response(REPLY_RECEIVED.to_string()));
        assert_eq!(second, first);
        assert_eq!(link.received(), DayFlags::from(vec![true, false, true]));

        let rejected = shared.handle_incoming(&serde_json::json!({ "contributionDays": 3 }));
        assert_eq!(rejected, PeerReply::Error(REPLY_UNRECOGNIZED.to_string()));
        assert_eq!(link.received(), DayFlags::from(vec![true, false, true]));

        link.reset_received();
        assert!(link.received().is_empty());
    }
}
