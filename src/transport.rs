// UDP transport: shared local endpoint, per-session target, one-shot reply listener
//
// The protocol has no correlation id. Whatever datagram arrives first on the
// endpoint is taken as the reply, so only one listener may be armed at a time.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionTarget;
use crate::messages::{CommandEnvelope, DecodeError};
use crate::reply::ReplyRecord;

/// Largest UDP payload over IPv4
const MAX_DATAGRAM: usize = 65_507;

/// No listener armed
const NO_LISTENER: u64 = 0;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind local endpoint {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot resolve {target}: {reason}")]
    Resolve { target: String, reason: String },

    #[error("Failed to encode '{event}': {source}")]
    Encode {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to send '{event}' to {target}: {source}")]
    Transmission {
        event: String,
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Undecodable reply from {from}: {source}")]
    Decode {
        from: SocketAddr,
        #[source]
        source: DecodeError,
    },

    #[error("A reply listener is already armed on this endpoint")]
    ListenerBusy,

    #[error("Reply listener closed without a reply")]
    ListenerClosed,

    #[error("No reply within {0:?}")]
    Timeout(Duration),
}

/// Local UDP endpoint, bound once and shared by every session
#[derive(Debug, Clone)]
pub struct Endpoint {
    socket: Arc<UdpSocket>,
    listener: Arc<AtomicU64>,
    next_token: Arc<AtomicU64>,
}

impl Endpoint {
    /// Bind on all interfaces
    pub async fn bind(port: u16) -> Result<Self, TransportError> {
        Self::bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
    }

    pub async fn bind_addr(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        info!("Local endpoint bound on {}", addr);

        Ok(Self {
            socket: Arc::new(socket),
            listener: Arc::new(AtomicU64::new(NO_LISTENER)),
            next_token: Arc::new(AtomicU64::new(NO_LISTENER + 1)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn listener_armed(&self) -> bool {
        self.listener.load(Ordering::Acquire) != NO_LISTENER
    }

    fn claim_listener(&self) -> Result<ListenerSlot, TransportError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.listener
            .compare_exchange(NO_LISTENER, token, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TransportError::ListenerBusy)?;

        Ok(ListenerSlot {
            listener: Arc::clone(&self.listener),
            token,
        })
    }
}

/// Releases the endpoint's listener slot on drop, if still held by this token
#[derive(Debug)]
struct ListenerSlot {
    listener: Arc<AtomicU64>,
    token: u64,
}

impl ListenerSlot {
    fn release(&self) {
        let _ = self.listener.compare_exchange(
            self.token,
            NO_LISTENER,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl Drop for ListenerSlot {
    fn drop(&mut self) {
        self.release();
    }
}

/// Sending side of one controller session
#[derive(Debug)]
pub struct TransportSession {
    endpoint: Endpoint,
    target: SessionTarget,
    remote: SocketAddr,
}

impl TransportSession {
    /// Open a session. The target host is resolved here, once, to an address
    /// of the same family as the local endpoint.
    pub async fn open(endpoint: Endpoint, target: SessionTarget) -> Result<Self, TransportError> {
        let remote = resolve(&endpoint, &target).await?;
        info!("Session opened towards {} at {}", target, remote);

        Ok(Self {
            endpoint,
            target,
            remote,
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Encode and send one datagram. Delivery is not confirmed.
    pub async fn send(&self, envelope: &CommandEnvelope) -> Result<usize, TransportError> {
        let frame = envelope
            .encode()
            .map_err(|source| TransportError::Encode {
                event: envelope.event.clone(),
                source,
            })?;

        let sent = self
            .endpoint
            .socket
            .send_to(&frame, self.remote)
            .await
            .map_err(|source| TransportError::Transmission {
                event: envelope.event.clone(),
                target: self.target.to_string(),
                source,
            })?;

        debug!("Sent '{}' ({} bytes) to {}", envelope.event, sent, self.target);
        Ok(sent)
    }

    /// Arm the one-shot listener.
    ///
    /// The first datagram received on the endpoint, from anyone, is decoded
    /// and delivered, then the listener detaches.
    pub fn await_one_reply(&self) -> Result<ReplyListener, TransportError> {
        let slot = self.endpoint.claim_listener()?;
        let task_slot = ListenerSlot {
            listener: Arc::clone(&slot.listener),
            token: slot.token,
        };
        let socket = Arc::clone(&self.endpoint.socket);
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let _slot = task_slot;
            let mut buf = vec![0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        let outcome = CommandEnvelope::decode(&buf[..len])
                            .map(|envelope| ReplyRecord::new(envelope, from))
                            .map_err(|source| TransportError::Decode { from, source });

                        match &outcome {
                            Ok(record) => info!("Reply '{}' from {}", record.envelope.event, from),
                            Err(e) => warn!("{}", e),
                        }
                        let _ = tx.send(outcome);
                        break;
                    }
                    Err(e) => {
                        warn!("Receive failed on reply listener: {}", e);
                    }
                }
            }
        });

        Ok(ReplyListener {
            rx: Some(rx),
            task,
            slot,
        })
    }
}

async fn resolve(endpoint: &Endpoint, target: &SessionTarget) -> Result<SocketAddr, TransportError> {
    let failed = |reason: String| TransportError::Resolve {
        target: target.to_string(),
        reason,
    };

    let want_ipv4 = endpoint
        .local_addr()
        .map(|addr| addr.is_ipv4())
        .map_err(|e| failed(e.to_string()))?;

    tokio::net::lookup_host((target.host(), target.port()))
        .await
        .map_err(|e| failed(e.to_string()))?
        .find(|addr| addr.is_ipv4() == want_ipv4)
        .ok_or_else(|| failed("no address of the local endpoint's family".to_string()))
}

/// Handle on an armed one-shot listener. Dropping it detaches the listener.
#[derive(Debug)]
pub struct ReplyListener {
    rx: Option<oneshot::Receiver<Result<ReplyRecord, TransportError>>>,
    task: JoinHandle<()>,
    slot: ListenerSlot,
}

impl ReplyListener {
    /// Non-blocking poll. Yields the outcome exactly once.
    pub fn try_recv(&mut self) -> Option<Result<ReplyRecord, TransportError>> {
        let rx = self.rx.as_mut()?;
        match rx.try_recv() {
            Ok(outcome) => {
                self.rx = None;
                Some(outcome)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.rx = None;
                Some(Err(TransportError::ListenerClosed))
            }
        }
    }

    /// Wait for the first datagram, with no upper bound
    pub async fn recv(&mut self) -> Result<ReplyRecord, TransportError> {
        let rx = self.rx.as_mut().ok_or(TransportError::ListenerClosed)?;
        let outcome = rx.await;
        self.rx = None;
        outcome.unwrap_or(Err(TransportError::ListenerClosed))
    }

    /// Like [`recv`](Self::recv) but gives up after `limit`; the listener stays armed
    pub async fn recv_timeout(&mut self, limit: Duration) -> Result<ReplyRecord, TransportError> {
        tokio::time::timeout(limit, self.recv())
            .await
            .unwrap_or(Err(TransportError::Timeout(limit)))
    }

    pub fn is_finished(&self) -> bool {
        self.rx.is_none()
    }
}

impl Drop for ReplyListener {
    fn drop(&mut self) {
        self.task.abort();
        self.slot.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn loopback_pair() -> (TransportSession, UdpSocket) {
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = remote.local_addr().unwrap().port();
        let endpoint = Endpoint::bind_addr("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let session = TransportSession::open(endpoint, SessionTarget::new("test", "127.0.0.1", port))
            .await
            .unwrap();
        assert_eq!(session.remote_addr(), remote.local_addr().unwrap());
        (session, remote)
    }

    #[tokio::test]
    async fn test_send_reaches_target() {
        let (session, remote) = loopback_pair().await;
        let envelope = CommandEnvelope::new("arm", json!({ "copterId": "fccs_01" }));

        let sent = session.send(&envelope).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = remote.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, sent);
        assert_eq!(CommandEnvelope::decode(&buf[..len]).unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_first_reply_delivered_once() {
        let (session, remote) = loopback_pair().await;
        let local = session.endpoint().local_addr().unwrap();
        let mut listener = session.await_one_reply().unwrap();
        assert!(session.endpoint().listener_armed());

        let ack = CommandEnvelope::new("ack", json!({ "ok": true }));
        remote.send_to(&ack.encode().unwrap(), local).await.unwrap();

        let record = listener.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(record.envelope, ack);
        assert_eq!(record.from, remote.local_addr().unwrap());

        assert!(listener.is_finished());
        assert!(matches!(listener.try_recv(), None));
        assert!(matches!(listener.recv().await, Err(TransportError::ListenerClosed)));
    }

    #[tokio::test]
    async fn test_second_listener_rejected_until_first_detaches() {
        let (session, _remote) = loopback_pair().await;

        let first = session.await_one_reply().unwrap();
        assert!(matches!(session.await_one_reply(), Err(TransportError::ListenerBusy)));

        drop(first);
        assert!(!session.endpoint().listener_armed());
        assert!(session.await_one_reply().is_ok());
    }

    #[tokio::test]
    async fn test_malformed_reply_reported_not_raised() {
        let (session, remote) = loopback_pair().await;
        let local = session.endpoint().local_addr().unwrap();
        let mut listener = session.await_one_reply().unwrap();

        remote.send_to(b"\x00garbage{", local).await.unwrap();

        let outcome = listener.recv_timeout(Duration::from_secs(2)).await;
        assert!(matches!(outcome, Err(TransportError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_recv_timeout_keeps_listener_armed() {
        let (session, remote) = loopback_pair().await;
        let local = session.endpoint().local_addr().unwrap();
        let mut listener = session.await_one_reply().unwrap();

        let outcome = listener.recv_timeout(Duration::from_millis(50)).await;
        assert!(matches!(outcome, Err(TransportError::Timeout(_))));
        assert!(!listener.is_finished());

        let late = CommandEnvelope::new("ack", json!({}));
        remote.send_to(&late.encode().unwrap(), local).await.unwrap();
        let record = listener.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(record.envelope.event, "ack");
    }

    #[tokio::test]
    async fn test_non_object_reply_data_is_decode_error() {
        let (session, remote) = loopback_pair().await;
        let local = session.endpoint().local_addr().unwrap();
        let mut listener = session.await_one_reply().unwrap();

        remote
            .send_to(br#"{"event":"arm","data":null}"#, local)
            .await
            .unwrap();

        let outcome = listener.recv_timeout(Duration::from_secs(2)).await;
        assert!(matches!(
            outcome,
            Err(TransportError::Decode {
                source: DecodeError::DataNotObject(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_target_resolved_once_at_open() {
        let endpoint = Endpoint::bind_addr("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let session = TransportSession::open(endpoint, SessionTarget::new("test", "localhost", 30000))
            .await
            .unwrap();

        // Literal address of the endpoint's family, no lookup left for send
        assert!(session.remote_addr().is_ipv4());
        assert_eq!(session.remote_addr().port(), 30000);
        assert_eq!(session.target().host(), "localhost");
    }

    #[tokio::test]
    async fn test_unusable_host_rejected_before_any_send() {
        let endpoint = Endpoint::bind_addr("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        // IPv6 literal cannot be reached from an IPv4 endpoint
        let outcome = TransportSession::open(endpoint, SessionTarget::new("test", "::1", 30000)).await;
        assert!(matches!(outcome, Err(TransportError::Resolve { .. })));
    }

    #[tokio::test]
    async fn test_send_failure_is_transmission_error() {
        let endpoint = Endpoint::bind_addr("0.0.0.0:0".parse().unwrap())
            .await
            .unwrap();
        let session = TransportSession::open(
            endpoint,
            SessionTarget::new("test", "255.255.255.255", 30000),
        )
        .await
        .unwrap();

        // Broadcast without SO_BROADCAST is refused by the socket
        let envelope = CommandEnvelope::new("arm", json!({}));
        assert!(matches!(
            session.send(&envelope).await,
            Err(TransportError::Transmission { .. })
        ));
    }
}
