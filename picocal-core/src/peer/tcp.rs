//! Peer link over TCP for running two devices as separate processes.
//!
//! One connection per message: the sender writes a single JSON line, the
//! receiver answers with a single JSON line and closes.

use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::protocol::{PeerReply, REPLY_UNRECOGNIZED};
use super::{PeerTransport, TransportEvent, TransportEvents};
use crate::error::{PicoCalError, PicoCalResult};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// A month of flags is well under a kilobyte.
const MAX_MESSAGE_BYTES: u64 = 64 * 1024;

pub struct TcpTransport {
    listen: Option<SocketAddr>,
    peer: Option<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    read_timeout: Duration,
    listener: Mutex<Option<JoinHandle<()>>>,
    bound: Mutex<Option<SocketAddr>>,
}

impl TcpTransport {
    /// Accept peer messages on `listen` and deliver ours to `peer` (`host:port`).
    pub fn new(listen: Option<SocketAddr>, peer: Option<String>) -> (Self, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = TcpTransport {
            listen,
            peer,
            events: tx,
            read_timeout: DEFAULT_READ_TIMEOUT,
            listener: Mutex::new(None),
            bound: Mutex::new(None),
        };
        (transport, rx)
    }

    /// How long an incoming connection may take to deliver its line.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Address actually bound once activated (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connect(&self) -> Option<TcpStream> {
        let peer = self.peer.as_deref()?;
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(peer)).await {
            Ok(Ok(stream)) => Some(stream),
            Ok(Err(e)) => {
                debug!(peer, error = %e, "peer not reachable");
                None
            }
            Err(_) => {
                debug!(peer, "peer connect timed out");
                None
            }
        }
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn activate(&self) -> PicoCalResult<()> {
        let Some(addr) = self.listen else {
            return Ok(());
        };

        // release the port held by a previous session first
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            previous.abort();
            let _ = previous.await;
        }

        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        info!(%bound, "listening for peer");
        *self.bound.lock().unwrap_or_else(PoisonError::into_inner) = Some(bound);

        let task = tokio::spawn(accept_loop(listener, self.events.clone(), self.read_timeout));
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        self.connect().await.is_some()
    }

    async fn send(&self, payload: Value) -> PicoCalResult<Value> {
        let stream = self.connect().await.ok_or(PicoCalError::PeerNotReachable)?;
        let (read, mut write) = stream.into_split();

        let line = serde_json::to_string(&payload)
            .map_err(|e| PicoCalError::Serialization(e.to_string()))?;
        write.write_all(format!("{line}\n").as_bytes()).await?;
        write.shutdown().await?;

        let mut response = String::new();
        BufReader::new(read).read_line(&mut response).await?;
        if response.trim().is_empty() {
            return Err(PicoCalError::MalformedPeerMessage(
                "peer closed without reply".into(),
            ));
        }
        serde_json::from_str(response.trim())
            .map_err(|e| PicoCalError::MalformedPeerMessage(e.to_string()))
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(task) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::UnboundedSender<TransportEvent>,
    read_timeout: Duration,
) {
    loop {
        match listener.accept().await {
            Ok((stream, from)) => {
                debug!(%from, "peer connected");
                tokio::spawn(serve_connection(stream, events.clone(), read_timeout));
            }
            Err(e) => {
                warn!(error = %e, "peer listener failed");
                let _ = events.send(TransportEvent::Deactivated);
                return;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    events: mpsc::UnboundedSender<TransportEvent>,
    read_timeout: Duration,
) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read.take(MAX_MESSAGE_BYTES));
    let mut line = String::new();
    match timeout(read_timeout, reader.read_line(&mut line)).await {
        // reachability check: connected and closed without a message
        Ok(Ok(0)) => return,
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            debug!(error = %e, "failed reading peer message");
            return;
        }
        Err(_) => {
            warn!("peer connection sent no message in time, closing");
            return;
        }
    }

    let reply = match serde_json::from_str::<Value>(line.trim()) {
        Ok(payload) => {
            let (reply, response) = oneshot::channel();
            if events.send(TransportEvent::Message { payload, reply }).is_err() {
                return;
            }
            match response.await {
                Ok(reply) => reply,
                Err(_) => return,
            }
        }
        Err(e) => {
            warn!(error = %e, "peer sent invalid JSON");
            PeerReply::Error(REPLY_UNRECOGNIZED.to_string()).encode()
        }
    };

    let out = format!("{reply}\n");
    if let Err(e) = write.write_all(out.as_bytes()).await {
        debug!(error = %e, "failed writing peer reply");
    }
}
