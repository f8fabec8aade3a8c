//! Registry of connected peers and their undelivered messages.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::signal::{SignalKind, SignalMessage};

/// Outgoing half of a connected peer's socket.
pub type ClientSender = mpsc::UnboundedSender<SignalMessage>;

#[derive(Debug)]
struct Client {
    token: String,
    sender: ClientSender,
    last_seen: Instant,
    session: u64,
}

#[derive(Debug)]
struct Queued {
    message: SignalMessage,
    queued_at: Instant,
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Registered; `session` identifies this socket for [`Realm::unregister`]
    Registered {
        /// Socket session number
        session: u64,
        /// Queued messages flushed to the new socket
        delivered: usize,
    },
    /// Another socket holds the ID with a different token
    IdTaken,
    /// The realm is at its concurrent limit
    LimitReached,
}

/// What happened to a forwarded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the destination socket
    Delivered,
    /// Destination offline; kept until it connects or the message expires
    Queued,
    /// Not deliverable and not worth keeping
    Dropped,
}

/// Counts from one [`Realm::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Queued messages that expired
    pub expired: usize,
    /// Clients dropped for silence
    pub dropped: usize,
}

/// Connected peers keyed by ID.
#[derive(Debug)]
pub struct Realm {
    clients: HashMap<String, Client>,
    queues: HashMap<String, VecDeque<Queued>>,
    concurrent_limit: usize,
    next_session: u64,
}

impl Realm {
    /// Create an empty realm admitting up to `concurrent_limit` clients.
    #[must_use]
    pub fn new(concurrent_limit: usize) -> Self {
        Self {
            clients: HashMap::new(),
            queues: HashMap::new(),
            concurrent_limit,
            next_session: 0,
        }
    }

    /// Number of connected clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Whether `id` is connected.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// IDs of connected clients, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register `id` for a new socket and flush its queued messages.
    ///
    /// The same token replaces an existing socket (a reconnect); a different
    /// token is refused.
    pub fn register(&mut self, id: &str, token: &str, sender: ClientSender) -> Registration {
        match self.clients.get(id) {
            Some(existing) if existing.token != token => return Registration::IdTaken,
            Some(_) => tracing::debug!("Client {} reconnected", id),
            None if self.clients.len() >= self.concurrent_limit => {
                return Registration::LimitReached
            }
            None => {}
        }

        self.next_session += 1;
        let session = self.next_session;

        let mut delivered = 0;
        if let Some(queue) = self.queues.remove(id) {
            for queued in queue {
                if sender.send(queued.message).is_ok() {
                    delivered += 1;
                }
            }
        }

        self.clients.insert(
            id.to_string(),
            Client {
                token: token.to_string(),
                sender,
                last_seen: Instant::now(),
                session,
            },
        );

        Registration::Registered { session, delivered }
    }

    /// Remove `id` if it is still held by `session`.
    pub fn unregister(&mut self, id: &str, session: u64) -> bool {
        if self.clients.get(id).is_some_and(|c| c.session == session) {
            self.clients.remove(id);
            true
        } else {
            false
        }
    }

    /// Record activity from `id`.
    pub fn touch(&mut self, id: &str) {
        if let Some(client) = self.clients.get_mut(id) {
            client.last_seen = Instant::now();
        }
    }

    /// Forward `message` from `src` to its destination.
    pub fn forward(&mut self, src: &str, mut message: SignalMessage) -> Delivery {
        if !message.kind.is_forwarded() {
            return Delivery::Dropped;
        }
        let Some(dst) = message.dst.clone() else {
            tracing::debug!("Dropping {:?} from {} without destination", message.kind, src);
            return Delivery::Dropped;
        };
        message.src = Some(src.to_string());

        if let Some(client) = self.clients.get(&dst) {
            match client.sender.send(message) {
                Ok(()) => return Delivery::Delivered,
                Err(mpsc::error::SendError(returned)) => message = returned,
            }
        }

        if message.kind.is_queued() {
            self.queues.entry(dst).or_default().push_back(Queued {
                message,
                queued_at: Instant::now(),
            });
            Delivery::Queued
        } else {
            Delivery::Dropped
        }
    }

    /// Expire stale queued messages and drop silent clients.
    ///
    /// The source of every expired message is told with an `EXPIRE` whose
    /// `src` is the unreachable peer.
    pub fn sweep(&mut self, expire_timeout: Duration, alive_timeout: Duration) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();

        let mut expired = Vec::new();
        for (dst, queue) in &mut self.queues {
            while queue
                .front()
                .is_some_and(|q| now.duration_since(q.queued_at) >= expire_timeout)
            {
                if let Some(queued) = queue.pop_front() {
                    expired.push((dst.clone(), queued.message));
                }
            }
        }
        self.queues.retain(|_, queue| !queue.is_empty());

        for (dst, message) in expired {
            report.expired += 1;
            let Some(src) = message.src else { continue };
            if let Some(client) = self.clients.get(&src) {
                let notice = SignalMessage::new(SignalKind::Expire)
                    .with_src(&dst)
                    .with_dst(&src);
                let _ = client.sender.send(notice);
            }
        }

        let before = self.clients.len();
        self.clients
            .retain(|_, client| now.duration_since(client.last_seen) < alive_timeout);
        report.dropped = before - self.clients.len();

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (ClientSender, mpsc::UnboundedReceiver<SignalMessage>) {
        mpsc::unbounded_channel()
    }

    fn offer_to(dst: &str) -> SignalMessage {
        SignalMessage::new(SignalKind::Offer).with_dst(dst)
    }

    #[test]
    fn test_register_and_id_taken() {
        let mut realm = Realm::new(10);
        let (tx, _rx) = client();
        assert!(matches!(
            realm.register("alpha", "t1", tx.clone()),
            Registration::Registered { delivered: 0, .. }
        ));
        assert_eq!(realm.register("alpha", "t2", tx.clone()), Registration::IdTaken);
        assert!(matches!(
            realm.register("alpha", "t1", tx),
            Registration::Registered { .. }
        ));
        assert_eq!(realm.len(), 1);
    }

    #[test]
    fn test_concurrent_limit() {
        let mut realm = Realm::new(1);
        let (tx, _rx) = client();
        realm.register("a", "t", tx.clone());
        assert_eq!(realm.register("b", "t", tx), Registration::LimitReached);
    }

    #[test]
    fn test_forward_sets_source() {
        let mut realm = Realm::new(10);
        let (tx, mut rx) = client();
        realm.register("bob", "t", tx);

        assert_eq!(realm.forward("alice", offer_to("bob")), Delivery::Delivered);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.src.as_deref(), Some("alice"));
        assert_eq!(received.kind, SignalKind::Offer);
    }

    #[test]
    fn test_forward_rules() {
        let mut realm = Realm::new(10);
        assert_eq!(
            realm.forward("a", SignalMessage::heartbeat().with_dst("b")),
            Delivery::Dropped
        );
        assert_eq!(
            realm.forward("a", SignalMessage::new(SignalKind::Offer)),
            Delivery::Dropped
        );
        assert_eq!(
            realm.forward("a", SignalMessage::new(SignalKind::Leave).with_dst("b")),
            Delivery::Dropped
        );
        assert_eq!(realm.forward("a", offer_to("b")), Delivery::Queued);
    }

    #[test]
    fn test_queue_flushed_on_register() {
        let mut realm = Realm::new(10);
        realm.forward("alice", offer_to("bob"));
        realm.forward("alice", SignalMessage::new(SignalKind::Candidate).with_dst("bob"));

        let (tx, mut rx) = client();
        assert!(matches!(
            realm.register("bob", "t", tx),
            Registration::Registered { delivered: 2, .. }
        ));
        assert_eq!(rx.try_recv().unwrap().kind, SignalKind::Offer);
        assert_eq!(rx.try_recv().unwrap().kind, SignalKind::Candidate);
    }

    #[test]
    fn test_unregister_ignores_stale_session() {
        let mut realm = Realm::new(10);
        let (tx, _rx) = client();
        let Registration::Registered { session: first, .. } = realm.register("a", "t", tx.clone())
        else {
            panic!("not registered");
        };
        let Registration::Registered { session: second, .. } = realm.register("a", "t", tx)
        else {
            panic!("not registered");
        };

        assert!(!realm.unregister("a", first));
        assert!(realm.contains("a"));
        assert!(realm.unregister("a", second));
        assert!(realm.is_empty());
    }

    #[test]
    fn test_sweep_expires_queued_messages() {
        let mut realm = Realm::new(10);
        let (tx, mut rx) = client();
        realm.register("alice", "t", tx);
        realm.forward("alice", offer_to("ghost"));

        let report = realm.sweep(Duration::ZERO, Duration::from_secs(60));
        assert_eq!(report.expired, 1);
        assert_eq!(report.dropped, 0);

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.kind, SignalKind::Expire);
        assert_eq!(notice.src.as_deref(), Some("ghost"));
        assert_eq!(notice.dst.as_deref(), Some("alice"));
    }

    #[test]
    fn test_sweep_drops_silent_clients() {
        let mut realm = Realm::new(10);
        let (tx, _rx) = client();
        realm.register("quiet", "t", tx);

        let report = realm.sweep(Duration::from_secs(5), Duration::ZERO);
        assert_eq!(report.dropped, 1);
        assert!(realm.is_empty());
        assert_eq!(realm.ids(), Vec::<String>::new());
    }
}
