//! Peer session: role, connection lifecycle, and the shared document.
//!
//! A [`Session`] is driven by the embedding application's event loop through
//! [`Session::poll`]. Every signaling event, inbound message, finished image
//! decode and outbound send is handled there, on the caller's thread.
//!
//! Host flow: `start(Host)` → share [`Session::local_peer_id`] → the guest's
//! connection is accepted → the guest's `PEER_READY` is answered with one
//! `SYNC_FULL_STATE`.
//!
//! Guest flow: `start(Guest)` → `connect_to(host_id)` → channel opens →
//! `PEER_READY` is sent → the host's snapshot replaces the local document.

mod state;

pub use state::{ConnectionState, Lifecycle, Role};

use crate::bridge::SyncBridge;
use crate::config::SessionConfig;
use crate::document::{Document, DocumentCommand};
use crate::element::{CanvasElement, ElementPatch};
use crate::import::PageImport;
use crate::media::{self, LocalStream, MediaDevices, StreamDescriptor};
use crate::protocol::SyncMessage;
use crate::signaling::{Broker, ClientEvent, ConnectionId, PeerClient, PeerId, TransportError};
#[cfg(not(target_arch = "wasm32"))]
use crate::signaling::RelayBroker;
use std::time::Instant;
use thiserror::Error;

/// Session misuse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("A session is already active")]
    AlreadyActive,
    #[error("Only the {0:?} can do this")]
    WrongRole(Role),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Brokering failed; the session is back to disconnected.
    ConnectionError(TransportError),
    /// The other party left; the document was kept.
    PeerDisconnected,
    /// Only the camera could be opened; the microphone is off.
    MediaDegraded,
    /// No capture device could be opened.
    MediaUnavailable(String),
}

/// One participant's side of a board session.
pub struct Session<B: Broker> {
    config: SessionConfig,
    client: PeerClient<B>,
    lifecycle: Lifecycle,
    /// Guest: the host id to dial once our identity is assigned.
    pending_target: Option<PeerId>,
    dialing: bool,
    connection: Option<ConnectionId>,
    local_stream: Option<LocalStream>,
    remote_stream: Option<StreamDescriptor>,
    document: Document,
    bridge: SyncBridge,
    snapshot_sent: bool,
    synced: bool,
    notices: Vec<SessionNotice>,
}

impl<B: Broker> Session<B> {
    pub fn new(broker: B, config: SessionConfig) -> Self {
        let client = PeerClient::new(broker, config.handshake_timeout());
        Self {
            config,
            client,
            lifecycle: Lifecycle::default(),
            pending_target: None,
            dialing: false,
            connection: None,
            local_stream: None,
            remote_stream: None,
            document: Document::new(),
            bridge: SyncBridge::new(),
            snapshot_sent: false,
            synced: false,
            notices: Vec::new(),
        }
    }

    // --- Accessors ---

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn role(&self) -> Option<Role> {
        self.lifecycle.role()
    }

    /// Our identifier, once the broker has issued it.
    pub fn local_peer_id(&self) -> Option<&PeerId> {
        self.client.local_id()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// False for a guest until the host's snapshot has arrived.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.local_stream.as_ref()
    }

    pub fn remote_stream(&self) -> Option<&StreamDescriptor> {
        self.remote_stream.as_ref()
    }

    /// Images still being decoded.
    pub fn pending_rehydrations(&self) -> usize {
        self.bridge.pending_rehydrations()
    }

    /// Drain notices raised since the last call.
    pub fn take_notices(&mut self) -> Vec<SessionNotice> {
        std::mem::take(&mut self.notices)
    }

    // --- Lifecycle ---

    /// Choose a role and request a fresh identity.
    pub fn start(&mut self, role: Role) -> Result<(), SessionError> {
        if !self.lifecycle.begin(role) {
            return Err(SessionError::AlreadyActive);
        }
        log::info!("Starting session as {:?}", role);
        self.snapshot_sent = false;
        self.synced = role == Role::Host;

        if let Err(e) = self.client.create_identity() {
            log::error!("Could not request an identity: {}", e);
            self.teardown();
            return Err(e.into());
        }
        if role == Role::Host {
            self.client.accept_inbound();
        }
        Ok(())
    }

    /// Guest: connect to the host identified by `input`.
    ///
    /// The id is used verbatim. If our own identity is not assigned yet the
    /// dial happens as soon as it is.
    pub fn connect_to(&mut self, input: &str) -> Result<(), SessionError> {
        if self.role() != Some(Role::Guest) {
            return Err(SessionError::WrongRole(Role::Guest));
        }
        let busy = self.dialing || self.pending_target.is_some();
        if self.state() != ConnectionState::Connecting || busy {
            return Err(SessionError::AlreadyActive);
        }
        let target = PeerId::parse(input)?;
        if self.client.local_id().is_some() {
            self.dial(target);
        } else {
            self.pending_target = Some(target);
        }
        Ok(())
    }

    fn dial(&mut self, target: PeerId) {
        match self.client.connect(target) {
            Ok(_) => self.dialing = true,
            Err(e) => self.fail(e),
        }
    }

    /// Leave the session: hang up, disconnect, release the camera and
    /// discard the document.
    pub fn exit(&mut self) {
        log::info!("Exiting session");
        self.teardown();
        self.document.clear();
    }

    /// Process pending events. Returns true if the document changed.
    pub fn poll(&mut self) -> bool {
        self.poll_at(Instant::now())
    }

    /// Like [`poll`](Self::poll), evaluating timeouts at `now`.
    pub fn poll_at(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for event in self.client.poll_events_at(now) {
            changed |= self.handle_event(event);
        }
        changed |= self.bridge.poll_rehydration(&mut self.document) > 0;
        self.flush();
        changed
    }

    fn handle_event(&mut self, event: ClientEvent) -> bool {
        match event {
            ClientEvent::IdentityAssigned(id) => {
                log::info!("Session id is {}", id);
                if let Some(target) = self.pending_target.take() {
                    self.dial(target);
                }
            }
            ClientEvent::InboundAccepted(connection) => {
                self.lifecycle.connected();
                self.connection = Some(connection.id);
                self.snapshot_sent = false;
                log::info!("Guest {} joined", connection.remote);
                if self.client.has_pending_offer() {
                    self.attach_call(connection.id);
                }
            }
            ClientEvent::Opened(connection) => {
                self.lifecycle.connected();
                self.connection = Some(connection.id);
                self.dialing = false;
                self.synced = false;
                log::info!("Connected to host {}", connection.remote);
                self.bridge.queue(SyncMessage::PeerReady);
                self.attach_call(connection.id);
            }
            ClientEvent::Message {
                connection,
                message,
            } => {
                if self.connection != Some(connection) {
                    return false;
                }
                return self.handle_message(message);
            }
            ClientEvent::Closed(connection) => {
                if self.connection == Some(connection) {
                    log::info!("Peer disconnected");
                    self.notices.push(SessionNotice::PeerDisconnected);
                    self.teardown();
                }
            }
            ClientEvent::IncomingCall(call) => {
                if let Some(connection) = self
                    .connection
                    .filter(|_| self.client.connection().is_some_and(|c| c.remote == call.remote))
                {
                    self.attach_call(connection);
                }
            }
            ClientEvent::RemoteStream { stream, .. } => {
                log::info!("Remote stream {} available", stream.id);
                self.remote_stream = Some(stream);
            }
            ClientEvent::CallEnded(_) => {
                self.remote_stream = None;
            }
            ClientEvent::Failed(error) => self.fail(error),
        }
        false
    }

    fn handle_message(&mut self, message: SyncMessage) -> bool {
        log::debug!("Received {}", message.tag());
        match message {
            SyncMessage::PeerReady => {
                if self.role() != Some(Role::Host) || self.snapshot_sent {
                    log::debug!("Ignoring PEER_READY");
                    return false;
                }
                self.snapshot_sent = true;
                let snapshot = self.document.elements().to_vec();
                log::info!("Sending snapshot of {} elements", snapshot.len());
                self.bridge.queue(SyncMessage::SyncFullState(snapshot));
                false
            }
            message @ SyncMessage::SyncFullState(_) => {
                self.synced = true;
                self.bridge.apply_remote(&mut self.document, message)
            }
            message => self.bridge.apply_remote(&mut self.document, message),
        }
    }

    fn attach_call(&mut self, connection: ConnectionId) {
        if let Err(e) = self
            .client
            .attach_media_call(connection, self.local_stream.as_ref())
        {
            log::warn!("Media call setup failed: {}", e);
        }
    }

    fn fail(&mut self, error: TransportError) {
        log::error!("Connection error: {}", error);
        self.notices.push(SessionNotice::ConnectionError(error));
        self.teardown();
    }

    /// Release every handle and return to `disconnected`. The document is kept.
    fn teardown(&mut self) {
        self.client.destroy();
        self.lifecycle.reset();
        self.pending_target = None;
        self.dialing = false;
        self.connection = None;
        self.remote_stream = None;
        self.snapshot_sent = false;
        if let Some(mut stream) = self.local_stream.take() {
            stream.release();
        }
        let dropped = self.bridge.take_outgoing().len();
        if dropped > 0 {
            log::debug!("Dropped {} unsent messages", dropped);
        }
    }

    /// Send queued messages on the open channel, or drop them.
    fn flush(&mut self) {
        let messages = self.bridge.take_outgoing();
        match self.connection {
            Some(connection) => {
                for message in &messages {
                    self.client.send(connection, message);
                }
            }
            None if !messages.is_empty() => {
                log::debug!("Not connected, dropping {} messages", messages.len());
            }
            None => {}
        }
    }

    // --- Document edits ---

    /// A guest's document belongs to the host until the first snapshot lands.
    fn awaiting_snapshot(&self) -> bool {
        let waiting = self.role() == Some(Role::Guest) && !self.synced;
        if waiting {
            log::debug!("Ignoring local edit until the host snapshot arrives");
        }
        waiting
    }

    /// Apply a local command and send its effect. Returns true if the document changed.
    ///
    /// A guest's edits are refused until [`is_synced`](Self::is_synced).
    pub fn apply(&mut self, command: DocumentCommand) -> bool {
        if self.awaiting_snapshot() {
            return false;
        }
        let changed = self.bridge.apply_local(&mut self.document, command);
        self.flush();
        changed
    }

    /// Replace the document with `next`, sending the inferred add or removal.
    pub fn commit(&mut self, next: Vec<CanvasElement>) -> Option<SyncMessage> {
        if self.awaiting_snapshot() {
            return None;
        }
        let delta = self.bridge.commit(&mut self.document, next);
        self.flush();
        delta
    }

    /// Move, resize, restyle or (un)lock an element.
    pub fn update_element(&mut self, patch: ElementPatch) -> bool {
        if self.awaiting_snapshot() {
            return false;
        }
        let changed = self.bridge.update_element(&mut self.document, patch);
        self.flush();
        changed
    }

    /// A fresh page batch bounded by the configured page limit.
    pub fn page_import(&self) -> PageImport {
        PageImport::new(self.config.max_import_pages)
    }

    /// Commit a staged page batch.
    pub fn import_pages(&mut self, import: PageImport) -> bool {
        log::info!("Importing {} pages", import.len());
        self.apply(import.into_command())
    }

    // --- Media ---

    /// Use `stream` for calls. A previous stream is released.
    ///
    /// Calls already negotiated are not renegotiated.
    pub fn set_local_stream(&mut self, stream: LocalStream) {
        if let Some(mut old) = self.local_stream.replace(stream) {
            old.release();
        }
    }

    /// Open capture devices, degrading to video only. Never blocks the session.
    pub fn acquire_media(&mut self, devices: &mut dyn MediaDevices) -> bool {
        match media::acquire_local_stream(devices) {
            Ok(acquired) => {
                if !acquired.audio_available {
                    self.notices.push(SessionNotice::MediaDegraded);
                }
                self.set_local_stream(acquired.stream);
                true
            }
            Err(e) => {
                self.notices
                    .push(SessionNotice::MediaUnavailable(e.to_string()));
                false
            }
        }
    }

    pub fn set_microphone_enabled(&mut self, enabled: bool) {
        if let Some(stream) = &mut self.local_stream {
            stream.set_audio_enabled(enabled);
        }
    }

    pub fn set_camera_enabled(&mut self, enabled: bool) {
        if let Some(stream) = &mut self.local_stream {
            stream.set_video_enabled(enabled);
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Session<RelayBroker> {
    /// A session using the WebSocket broker at `config.broker_url`.
    ///
    /// Nothing connects until [`start`](Self::start).
    pub fn with_relay(config: SessionConfig) -> Result<Self, SessionError> {
        let broker = RelayBroker::from_config(&config)?;
        Ok(Self::new(broker, config))
    }
}

impl<B: Broker> Drop for Session<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
