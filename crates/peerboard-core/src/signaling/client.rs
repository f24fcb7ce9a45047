//! Two-party session surface over a [`Broker`].

use super::{
    Broker, BrokerEvent, CallId, Connection, ConnectionId, MediaCall, PeerFrame, PeerId,
    TransportError, TransportResult,
};
use crate::media::{LocalStream, StreamDescriptor};
use crate::protocol::{self, SyncMessage};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Events surfaced by [`PeerClient::poll_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The broker issued our identifier.
    IdentityAssigned(PeerId),
    /// Host side: an inbound connection was accepted and is open.
    InboundAccepted(Connection),
    /// Guest side: the outbound connection is open.
    Opened(Connection),
    /// A decoded protocol message, in channel order.
    Message {
        connection: ConnectionId,
        message: SyncMessage,
    },
    /// The remote side closed the channel or left the broker.
    Closed(ConnectionId),
    /// A media call was offered.
    IncomingCall(MediaCall),
    /// The remote stream of the active call was negotiated.
    RemoteStream {
        call: CallId,
        stream: StreamDescriptor,
    },
    /// The active call ended.
    CallEnded(CallId),
    /// A signaling failure.
    Failed(TransportError),
}

#[derive(Debug)]
struct Channel {
    connection: Connection,
    open: bool,
    /// Set while an outbound connect waits for its answer.
    dialed_at: Option<Instant>,
}

#[derive(Debug)]
struct Offer {
    call: CallId,
    from: PeerId,
    stream: Option<StreamDescriptor>,
}

/// Peer client: one data channel and one media call at a time.
pub struct PeerClient<B: Broker> {
    broker: B,
    handshake_timeout: Duration,
    local_id: Option<PeerId>,
    accepting: bool,
    channel: Option<Channel>,
    call: Option<MediaCall>,
    offer: Option<Offer>,
    events: Vec<ClientEvent>,
}

impl<B: Broker> PeerClient<B> {
    pub fn new(broker: B, handshake_timeout: Duration) -> Self {
        Self {
            broker,
            handshake_timeout,
            local_id: None,
            accepting: false,
            channel: None,
            call: None,
            offer: None,
            events: Vec::new(),
        }
    }

    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    /// The open connection, if any.
    pub fn connection(&self) -> Option<&Connection> {
        self.channel
            .as_ref()
            .filter(|c| c.open)
            .map(|c| &c.connection)
    }

    pub fn is_open(&self, connection: ConnectionId) -> bool {
        self.connection().is_some_and(|c| c.id == connection)
    }

    pub fn call(&self) -> Option<&MediaCall> {
        self.call.as_ref()
    }

    /// True when an offer waits for [`attach_media_call`](Self::attach_media_call).
    pub fn has_pending_offer(&self) -> bool {
        self.offer.is_some()
    }

    /// Request a fresh identifier from the broker.
    pub fn create_identity(&mut self) -> TransportResult<()> {
        self.broker.register()
    }

    /// Accept the first inbound connection request. Later requests are rejected.
    pub fn accept_inbound(&mut self) {
        self.accepting = true;
    }

    /// Open a data channel to `remote`.
    pub fn connect(&mut self, remote: PeerId) -> TransportResult<ConnectionId> {
        if self.local_id.is_none() {
            return Err(TransportError::NoIdentity);
        }
        if self.channel.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let id = Uuid::new_v4();
        self.broker
            .relay(&remote, PeerFrame::Connect { connection: id })?;
        log::info!("Dialing {} (connection {})", remote, id);
        self.channel = Some(Channel {
            connection: Connection { id, remote },
            open: false,
            dialed_at: Some(Instant::now()),
        });
        Ok(id)
    }

    /// Pair a media call with `connection`.
    ///
    /// Answers the offer made by the connection's remote peer if one is
    /// pending, otherwise places a call. Without a local stream the call is
    /// receive-only. Returns `None` if `connection` is not the open one.
    pub fn attach_media_call(
        &mut self,
        connection: ConnectionId,
        local: Option<&LocalStream>,
    ) -> TransportResult<Option<CallId>> {
        let Some(remote) = self
            .connection()
            .filter(|c| c.id == connection)
            .map(|c| c.remote.clone())
        else {
            log::debug!("Not attaching media: connection {} is not open", connection);
            return Ok(None);
        };
        if let Some(call) = &self.call {
            return Ok(Some(call.id));
        }

        let descriptor = local.filter(|s| !s.is_released()).map(LocalStream::descriptor);

        if let Some(offer) = self.offer.take() {
            if offer.from == remote {
                self.broker.relay(
                    &remote,
                    PeerFrame::Answer {
                        call: offer.call,
                        stream: descriptor,
                    },
                )?;
                log::info!("Answered call {} from {}", offer.call, remote);
                self.call = Some(MediaCall {
                    id: offer.call,
                    remote,
                    outbound: false,
                });
                if let Some(stream) = offer.stream {
                    self.events.push(ClientEvent::RemoteStream {
                        call: offer.call,
                        stream,
                    });
                }
                return Ok(Some(offer.call));
            }
            self.decline(&offer.from, offer.call);
        }

        let id = Uuid::new_v4();
        self.broker.relay(
            &remote,
            PeerFrame::Call {
                call: id,
                stream: descriptor,
            },
        )?;
        log::info!("Calling {} (call {})", remote, id);
        self.call = Some(MediaCall {
            id,
            remote,
            outbound: true,
        });
        Ok(Some(id))
    }

    /// Send a message on an open channel. Dropped if the channel is not open.
    pub fn send(&mut self, connection: ConnectionId, message: &SyncMessage) {
        let Some(remote) = self
            .connection()
            .filter(|c| c.id == connection)
            .map(|c| c.remote.clone())
        else {
            log::debug!("Dropping {}: channel not open", message.tag());
            return;
        };
        let payload = match protocol::encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Failed to encode {}: {}", message.tag(), e);
                return;
            }
        };
        if let Err(e) = self
            .broker
            .relay(&remote, PeerFrame::Data { connection, payload })
        {
            log::debug!("Dropping {}: {}", message.tag(), e);
        }
    }

    /// Close the data channel, if any.
    pub fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            let id = channel.connection.id;
            // Best effort: the remote may already be gone.
            let _ = self
                .broker
                .relay(&channel.connection.remote, PeerFrame::Close { connection: id });
            log::info!("Closed connection {}", id);
        }
    }

    /// End the active call and decline any pending offer.
    pub fn hang_up(&mut self) {
        if let Some(call) = self.call.take() {
            let _ = self
                .broker
                .relay(&call.remote, PeerFrame::HangUp { call: call.id });
            log::info!("Hung up call {}", call.id);
        }
        if let Some(offer) = self.offer.take() {
            self.decline(&offer.from, offer.call);
        }
    }

    /// Tear down the call, the channel and the broker registration.
    pub fn destroy(&mut self) {
        self.hang_up();
        self.close();
        self.accepting = false;
        self.local_id = None;
        self.broker.shutdown();
        self.events.clear();
    }

    /// Poll for pending events (non-blocking).
    pub fn poll_events(&mut self) -> Vec<ClientEvent> {
        self.poll_events_at(Instant::now())
    }

    /// Like [`poll_events`](Self::poll_events), evaluating the handshake timeout at `now`.
    pub fn poll_events_at(&mut self, now: Instant) -> Vec<ClientEvent> {
        for event in self.broker.poll() {
            self.handle_broker_event(event);
        }

        let expired = self.channel.as_ref().is_some_and(|c| {
            c.dialed_at
                .is_some_and(|at| now.saturating_duration_since(at) >= self.handshake_timeout)
        });
        if expired {
            log::warn!("Handshake timed out after {:?}", self.handshake_timeout);
            self.close();
            self.events.push(ClientEvent::Failed(TransportError::HandshakeTimeout));
        }

        std::mem::take(&mut self.events)
    }

    fn handle_broker_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Assigned(id) => {
                log::info!("Assigned peer id {}", id);
                self.local_id = Some(id.clone());
                self.events.push(ClientEvent::IdentityAssigned(id));
            }
            BrokerEvent::Frame { from, frame } => self.handle_frame(from, frame),
            BrokerEvent::PeerNotFound(peer) => {
                if self.is_dialing(&peer) {
                    self.channel = None;
                    self.events
                        .push(ClientEvent::Failed(TransportError::PeerNotFound(peer)));
                } else {
                    self.remote_gone(&peer);
                }
            }
            BrokerEvent::PeerLeft(peer) => {
                if self.is_dialing(&peer) {
                    self.channel = None;
                    self.events
                        .push(ClientEvent::Failed(TransportError::PeerNotFound(peer)));
                } else {
                    self.remote_gone(&peer);
                }
            }
            BrokerEvent::Unavailable(reason) => {
                log::error!("Broker unavailable: {}", reason);
                self.reset();
                self.events
                    .push(ClientEvent::Failed(TransportError::BrokerUnavailable(reason)));
            }
            BrokerEvent::Closed => {
                log::error!("Broker connection closed");
                if let Some(channel) = self.channel.take().filter(|c| c.open) {
                    self.events.push(ClientEvent::Closed(channel.connection.id));
                }
                self.reset();
                self.events.push(ClientEvent::Failed(TransportError::BrokerLost));
            }
        }
    }

    fn handle_frame(&mut self, from: PeerId, frame: PeerFrame) {
        match frame {
            PeerFrame::Connect { connection } => {
                if self.accepting && self.channel.is_none() {
                    if let Err(e) = self.broker.relay(&from, PeerFrame::Accept { connection }) {
                        log::warn!("Failed to accept {}: {}", from, e);
                        return;
                    }
                    let accepted = Connection {
                        id: connection,
                        remote: from,
                    };
                    log::info!("Accepted connection {} from {}", connection, accepted.remote);
                    if let Some(stale) = self.offer.take_if(|o| o.from != accepted.remote) {
                        log::debug!("Dropping call {} from {}", stale.call, stale.from);
                        self.decline(&stale.from, stale.call);
                    }
                    self.channel = Some(Channel {
                        connection: accepted.clone(),
                        open: true,
                        dialed_at: None,
                    });
                    self.events.push(ClientEvent::InboundAccepted(accepted));
                } else {
                    log::warn!("Rejecting connection from {}", from);
                    let _ = self.broker.relay(&from, PeerFrame::Reject { connection });
                }
            }
            PeerFrame::Accept { connection } => {
                if let Some(channel) = self.channel.as_mut().filter(|c| {
                    !c.open && c.connection.id == connection && c.connection.remote == from
                }) {
                    channel.open = true;
                    channel.dialed_at = None;
                    log::info!("Connection {} to {} open", connection, from);
                    self.events
                        .push(ClientEvent::Opened(channel.connection.clone()));
                }
            }
            PeerFrame::Reject { connection } => {
                if self.is_dialing(&from)
                    && self
                        .channel
                        .as_ref()
                        .is_some_and(|c| c.connection.id == connection)
                {
                    self.channel = None;
                    self.events
                        .push(ClientEvent::Failed(TransportError::Rejected(from)));
                }
            }
            PeerFrame::Data {
                connection,
                payload,
            } => {
                if !self
                    .connection()
                    .is_some_and(|c| c.id == connection && c.remote == from)
                {
                    log::debug!("Dropping data for unknown connection {}", connection);
                    return;
                }
                match protocol::decode(&payload) {
                    Ok(message) => self.events.push(ClientEvent::Message {
                        connection,
                        message,
                    }),
                    Err(e) => log::warn!("Dropping malformed message from {}: {}", from, e),
                }
            }
            PeerFrame::Close { connection } => {
                if self
                    .channel
                    .as_ref()
                    .is_some_and(|c| c.connection.id == connection && c.connection.remote == from)
                {
                    self.channel = None;
                    log::info!("Connection {} closed by {}", connection, from);
                    self.events.push(ClientEvent::Closed(connection));
                }
            }
            PeerFrame::Call { call, stream } => {
                let foreign = self
                    .channel
                    .as_ref()
                    .is_some_and(|c| c.connection.remote != from);
                if self.call.is_some() || foreign {
                    log::warn!("Declining call {} from {}", call, from);
                    self.decline(&from, call);
                    return;
                }
                // The newest offer wins; an older one is from a peer we never connected to.
                if let Some(stale) = self.offer.take() {
                    self.decline(&stale.from, stale.call);
                }
                self.offer = Some(Offer {
                    call,
                    from: from.clone(),
                    stream,
                });
                self.events.push(ClientEvent::IncomingCall(MediaCall {
                    id: call,
                    remote: from,
                    outbound: false,
                }));
            }
            PeerFrame::Answer { call, stream } => {
                let ours = self
                    .call
                    .as_ref()
                    .is_some_and(|c| c.outbound && c.id == call && c.remote == from);
                if !ours {
                    return;
                }
                log::info!("Call {} answered by {}", call, from);
                if let Some(stream) = stream {
                    self.events.push(ClientEvent::RemoteStream { call, stream });
                }
            }
            PeerFrame::HangUp { call } => {
                if self.call.as_ref().is_some_and(|c| c.id == call && c.remote == from) {
                    self.call = None;
                    self.events.push(ClientEvent::CallEnded(call));
                } else if self.offer.as_ref().is_some_and(|o| o.call == call) {
                    self.offer = None;
                }
            }
        }
    }

    fn is_dialing(&self, peer: &PeerId) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|c| !c.open && &c.connection.remote == peer)
    }

    /// The remote peer disappeared from the broker.
    fn remote_gone(&mut self, peer: &PeerId) {
        if let Some(channel) = self
            .channel
            .take_if(|c| c.open && &c.connection.remote == peer)
        {
            log::info!("Peer {} left", peer);
            self.events.push(ClientEvent::Closed(channel.connection.id));
        }
        if let Some(call) = self.call.take_if(|c| &c.remote == peer) {
            self.events.push(ClientEvent::CallEnded(call.id));
        }
        let _ = self.offer.take_if(|o| &o.from == peer);
    }

    fn decline(&mut self, to: &PeerId, call: CallId) {
        let _ = self.broker.relay(to, PeerFrame::HangUp { call });
    }

    fn reset(&mut self) {
        self.channel = None;
        self.call = None;
        self.offer = None;
        self.local_id = None;
        self.accepting = false;
    }
}

impl<B: Broker> Drop for PeerClient<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}
