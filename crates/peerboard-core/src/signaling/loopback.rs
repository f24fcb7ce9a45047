//! In-process broker.
//!
//! Every [`LoopbackBroker`] created from the same [`LoopbackNetwork`] can
//! reach the others. Frames are queued and delivered on `poll`, which keeps
//! delivery deterministic for tests and single-process embedding.

use super::{Broker, BrokerEvent, PeerFrame, PeerId, TransportError, TransportResult};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Mailbox {
    inbox: VecDeque<BrokerEvent>,
    /// Peers that exchanged frames with this one.
    contacts: HashSet<PeerId>,
}

#[derive(Debug)]
struct Hub {
    available: bool,
    peers: HashMap<PeerId, Mailbox>,
}

/// A shared in-process rendezvous.
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self {
            hub: Rc::new(RefCell::new(Hub {
                available: true,
                peers: HashMap::new(),
            })),
        }
    }

    /// A broker that will be issued a random id.
    pub fn broker(&self) -> LoopbackBroker {
        LoopbackBroker {
            hub: self.hub.clone(),
            requested: None,
            id: None,
            pending: Vec::new(),
        }
    }

    /// A broker that will be issued `id`.
    pub fn broker_with_id(&self, id: &str) -> LoopbackBroker {
        let mut broker = self.broker();
        broker.requested = Some(id.to_string());
        broker
    }

    /// Simulate the rendezvous going down (or coming back) for new registrations.
    pub fn set_available(&self, available: bool) {
        self.hub.borrow_mut().available = available;
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.hub.borrow().peers.len()
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One registration on a [`LoopbackNetwork`].
#[derive(Debug)]
pub struct LoopbackBroker {
    hub: Rc<RefCell<Hub>>,
    requested: Option<String>,
    id: Option<PeerId>,
    /// Events raised locally, delivered ahead of the mailbox.
    pending: Vec<BrokerEvent>,
}

impl LoopbackBroker {
    pub fn id(&self) -> Option<&PeerId> {
        self.id.as_ref()
    }
}

impl Broker for LoopbackBroker {
    fn register(&mut self) -> TransportResult<()> {
        if self.id.is_some() {
            return Ok(());
        }

        let mut hub = self.hub.borrow_mut();
        if !hub.available {
            self.pending
                .push(BrokerEvent::Unavailable("loopback broker offline".to_string()));
            return Ok(());
        }

        let raw = self
            .requested
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let id = PeerId::parse(&raw)?;
        if hub.peers.contains_key(&id) {
            self.pending
                .push(BrokerEvent::Unavailable(format!("peer id {} is taken", id)));
            return Ok(());
        }

        hub.peers.insert(id.clone(), Mailbox::default());
        self.pending.push(BrokerEvent::Assigned(id.clone()));
        self.id = Some(id);
        Ok(())
    }

    fn relay(&mut self, to: &PeerId, frame: PeerFrame) -> TransportResult<()> {
        let from = self.id.clone().ok_or(TransportError::NoIdentity)?;
        let mut hub = self.hub.borrow_mut();

        let Some(target) = hub.peers.get_mut(to) else {
            if let Some(own) = hub.peers.get_mut(&from) {
                own.inbox.push_back(BrokerEvent::PeerNotFound(to.clone()));
            }
            return Ok(());
        };
        target.contacts.insert(from.clone());
        target.inbox.push_back(BrokerEvent::Frame {
            from: from.clone(),
            frame,
        });
        if let Some(own) = hub.peers.get_mut(&from) {
            own.contacts.insert(to.clone());
        }
        Ok(())
    }

    fn poll(&mut self) -> Vec<BrokerEvent> {
        let mut events = std::mem::take(&mut self.pending);
        if let Some(id) = &self.id {
            if let Some(mailbox) = self.hub.borrow_mut().peers.get_mut(id) {
                events.extend(mailbox.inbox.drain(..));
            }
        }
        events
    }

    fn shutdown(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let mut hub = self.hub.borrow_mut();
        let Some(mailbox) = hub.peers.remove(&id) else {
            return;
        };
        for contact in mailbox.contacts {
            if let Some(other) = hub.peers.get_mut(&contact) {
                other.contacts.remove(&id);
                other.inbox.push_back(BrokerEvent::PeerLeft(id.clone()));
            }
        }
        self.pending.clear();
    }
}

impl Drop for LoopbackBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn registered(net: &LoopbackNetwork, id: &str) -> LoopbackBroker {
        let mut broker = net.broker_with_id(id);
        broker.register().unwrap();
        assert_eq!(
            broker.poll(),
            vec![BrokerEvent::Assigned(PeerId::parse(id).unwrap())]
        );
        broker
    }

    #[test]
    fn test_requested_id_released_on_drop() {
        let net = LoopbackNetwork::new();
        let broker = registered(&net, "host-1");
        assert_eq!(broker.id().map(PeerId::as_str), Some("host-1"));
        drop(broker);
        assert_eq!(net.peer_count(), 0);
        registered(&net, "host-1");
    }

    #[test]
    fn test_random_ids_are_unique() {
        let net = LoopbackNetwork::new();
        let mut a = net.broker();
        let mut b = net.broker();
        a.register().unwrap();
        b.register().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(net.peer_count(), 2);
    }

    #[test]
    fn test_relay_delivers_in_order() {
        let net = LoopbackNetwork::new();
        let mut a = registered(&net, "a");
        let mut b = registered(&net, "b");
        let to = PeerId::parse("b").unwrap();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());
        a.relay(&to, PeerFrame::Connect { connection: c1 }).unwrap();
        a.relay(&to, PeerFrame::Close { connection: c2 }).unwrap();

        let from = PeerId::parse("a").unwrap();
        assert_eq!(
            b.poll(),
            vec![
                BrokerEvent::Frame {
                    from: from.clone(),
                    frame: PeerFrame::Connect { connection: c1 }
                },
                BrokerEvent::Frame {
                    from,
                    frame: PeerFrame::Close { connection: c2 }
                },
            ]
        );
    }

    #[test]
    fn test_unknown_target() {
        let net = LoopbackNetwork::new();
        let mut a = registered(&net, "a");
        let ghost = PeerId::parse("ghost").unwrap();
        a.relay(&ghost, PeerFrame::HangUp { call: Uuid::nil() })
            .unwrap();
        assert_eq!(a.poll(), vec![BrokerEvent::PeerNotFound(ghost)]);
    }

    #[test]
    fn test_offline_registration() {
        let net = LoopbackNetwork::new();
        net.set_available(false);
        let mut a = net.broker();
        a.register().unwrap();
        assert!(matches!(a.poll().as_slice(), [BrokerEvent::Unavailable(_)]));
        assert!(a.id().is_none());
    }

    #[test]
    fn test_taken_id() {
        let net = LoopbackNetwork::new();
        let _a = registered(&net, "a");
        let mut dup = net.broker_with_id("a");
        dup.register().unwrap();
        assert!(matches!(dup.poll().as_slice(), [BrokerEvent::Unavailable(_)]));
    }

    #[test]
    fn test_shutdown_notifies_contacts() {
        let net = LoopbackNetwork::new();
        let mut a = registered(&net, "a");
        let mut b = registered(&net, "b");
        let bystander = registered(&net, "c");
        a.relay(&PeerId::parse("b").unwrap(), PeerFrame::HangUp { call: Uuid::nil() })
            .unwrap();
        b.poll();

        a.shutdown();
        a.shutdown();
        assert_eq!(b.poll(), vec![BrokerEvent::PeerLeft(PeerId::parse("a").unwrap())]);
        drop(bystander);
        assert!(b.poll().is_empty());
        assert_eq!(net.peer_count(), 1);
    }
}
