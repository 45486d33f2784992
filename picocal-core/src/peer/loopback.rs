//! Two in-process endpoints wired to each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::{PeerTransport, TransportEvent, TransportEvents};
use crate::error::{PicoCalError, PicoCalResult};

pub struct LoopbackTransport {
    reachable: Arc<AtomicBool>,
    own_events: mpsc::UnboundedSender<TransportEvent>,
    peer_events: mpsc::UnboundedSender<TransportEvent>,
    activations: AtomicUsize,
}

impl LoopbackTransport {
    /// A connected pair, reachable from the start.
    pub fn pair() -> (
        (Arc<LoopbackTransport>, TransportEvents),
        (Arc<LoopbackTransport>, TransportEvents),
    ) {
        let reachable = Arc::new(AtomicBool::new(true));
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = LoopbackTransport {
            reachable: reachable.clone(),
            own_events: a_tx.clone(),
            peer_events: b_tx.clone(),
            activations: AtomicUsize::new(0),
        };
        let b = LoopbackTransport {
            reachable,
            own_events: b_tx,
            peer_events: a_tx,
            activations: AtomicUsize::new(0),
        };

        ((Arc::new(a), a_rx), (Arc::new(b), b_rx))
    }

    /// Change reachability for both ends and notify both links.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        let _ = self
            .own_events
            .send(TransportEvent::ReachabilityChanged(reachable));
        let _ = self
            .peer_events
            .send(TransportEvent::ReachabilityChanged(reachable));
    }

    /// Tear this end's session down, as the platform would on a device switch.
    pub fn deactivate(&self) {
        let _ = self.own_events.send(TransportEvent::Deactivated);
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn activate(&self) -> PicoCalResult<()> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: Value) -> PicoCalResult<Value> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(PicoCalError::PeerNotReachable);
        }

        let (reply, response) = oneshot::channel();
        self.peer_events
            .send(TransportEvent::Message { payload, reply })
            .map_err(|_| PicoCalError::PeerNotReachable)?;
        response.await.map_err(|_| PicoCalError::PeerNotReachable)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::day_flags::DayFlags;
    use crate::peer::{DEFAULT_REPLY_TIMEOUT, LinkState, PeerLink};

    fn flags(v: &[bool]) -> DayFlags {
        DayFlags::from(v.to_vec())
    }

    async fn wait_active(link: &PeerLink) {
        let mut rx = link.subscribe_state();
        tokio::time::timeout(
            Duration::from_secs(1),
            rx.wait_for(|s| matches!(s, LinkState::Active { .. })),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_send_is_acknowledged_and_merged_on_receiver() {
        let ((phone_t, phone_rx), (watch_t, watch_rx)) = LoopbackTransport::pair();
        let phone = PeerLink::start(phone_t, phone_rx, DEFAULT_REPLY_TIMEOUT);
        let watch = PeerLink::start(watch_t, watch_rx, DEFAULT_REPLY_TIMEOUT);
        wait_active(&phone).await;
        wait_active(&watch).await;

        let reply = phone.send_with_reply(&flags(&[true, false])).await.unwrap();
        assert_eq!(reply, "Data received");
        phone.send_with_reply(&flags(&[false, false, true])).await.unwrap();

        assert_eq!(watch.received(), flags(&[true, false, true]));
        assert!(phone.received().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_send_is_dropped() {
        let ((phone_t, phone_rx), (watch_t, watch_rx)) = LoopbackTransport::pair();
        let control = phone_t.clone();
        let phone = PeerLink::start(phone_t, phone_rx, DEFAULT_REPLY_TIMEOUT);
        let watch = PeerLink::start(watch_t, watch_rx, DEFAULT_REPLY_TIMEOUT);
        wait_active(&phone).await;
        wait_active(&watch).await;

        control.set_reachable(false);
        let result = phone.send_with_reply(&flags(&[true])).await;
        assert!(matches!(result, Err(PicoCalError::PeerNotReachable)));

        // nothing was queued for later
        control.set_reachable(true);
        tokio::task::yield_now().await;
        assert!(watch.received().is_empty());
    }

    #[tokio::test]
    async fn test_deactivation_reactivates() {
        let ((phone_t, phone_rx), (_watch_t, _watch_rx)) = LoopbackTransport::pair();
        let control = phone_t.clone();
        let phone = PeerLink::start(phone_t, phone_rx, DEFAULT_REPLY_TIMEOUT);
        wait_active(&phone).await;
        assert_eq!(control.activations(), 1);

        control.deactivate();
        tokio::time::timeout(Duration::from_secs(1), async {
            while control.activations() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        wait_active(&phone).await;
    }

    #[tokio::test]
    async fn test_malformed_message_gets_error_reply() {
        let ((phone_t, phone_rx), (watch_t, watch_rx)) = LoopbackTransport::pair();
        let _phone = PeerLink::start(phone_t.clone(), phone_rx, DEFAULT_REPLY_TIMEOUT);
        let watch = PeerLink::start(watch_t, watch_rx, DEFAULT_REPLY_TIMEOUT);
        wait_active(&watch).await;

        let reply = phone_t
            .send(serde_json::json!({ "contributionDays": "yes" }))
            .await
            .unwrap();
        assert_eq!(reply, serde_json::json!({ "Error": "Data format not recognized" }));
        assert!(watch.received().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let ((phone_t, phone_rx), (_watch_t, watch_rx)) = LoopbackTransport::pair();
        let phone = PeerLink::start(phone_t, phone_rx, Duration::from_secs(5));
        wait_active(&phone).await;

        // nobody drains the watch side, so no reply ever comes
        let result = phone.send_with_reply(&flags(&[true])).await;
        assert!(matches!(result, Err(PicoCalError::PeerTimeout(5))));
        drop(watch_rx);
    }
}
